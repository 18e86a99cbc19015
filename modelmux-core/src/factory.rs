//! Construction of live providers from typed configuration.
//!
//! The factory set is fixed at process start and handed to the registry;
//! factories never touch registry state. Additional types (bedrock in
//! enterprise builds) hook in through [`ProviderFactories::register`].

use crate::error::{GatewayError, Result};
use crate::providers::{
    anthropic::AnthropicProvider, azure::AzureOpenAiProvider, gemini::GeminiProvider,
    ollama::OllamaProvider, openai::OpenAiProvider, Provider, ProviderConfig, ProviderType,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Constructor for one provider type.
pub type ProviderFactory = fn(&ProviderConfig) -> Result<Arc<dyn Provider>>;

/// Map from provider type to constructor.
pub struct ProviderFactories {
    factories: HashMap<ProviderType, ProviderFactory>,
}

impl ProviderFactories {
    /// An empty set, for tests and fully custom deployments.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The built-in dialect factories. `custom` reuses the openai-style
    /// client against the configured endpoint; bedrock has no built-in
    /// factory and must be hooked in by the embedder.
    pub fn builtin() -> Self {
        let mut set = Self::empty();
        set.register(ProviderType::Openai, |config| {
            Ok(Arc::new(OpenAiProvider::new(config.clone())?))
        });
        set.register(ProviderType::Anthropic, |config| {
            Ok(Arc::new(AnthropicProvider::new(config.clone())?))
        });
        set.register(ProviderType::Ollama, |config| {
            Ok(Arc::new(OllamaProvider::new(config.clone())?))
        });
        set.register(ProviderType::Gemini, |config| {
            Ok(Arc::new(GeminiProvider::new(config.clone())?))
        });
        set.register(ProviderType::AzureOpenai, |config| {
            Ok(Arc::new(AzureOpenAiProvider::new(config.clone())?))
        });
        set.register(ProviderType::Custom, |config| {
            Ok(Arc::new(OpenAiProvider::new(config.clone())?))
        });
        set
    }

    /// Install or replace the factory for a type.
    pub fn register(&mut self, provider_type: ProviderType, factory: ProviderFactory) {
        self.factories.insert(provider_type, factory);
    }

    pub fn supports(&self, provider_type: ProviderType) -> bool {
        self.factories.contains_key(&provider_type)
    }

    /// Construct a provider for `config`, or `factory/unknown-type` when no
    /// factory covers its type.
    pub fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        let factory = self.factories.get(&config.provider_type).ok_or_else(|| {
            GatewayError::FactoryUnknownType {
                provider_type: config.provider_type.to_string(),
            }
        })?;
        factory(config)
    }
}

impl Default for ProviderFactories {
    fn default() -> Self {
        Self::builtin()
    }
}
