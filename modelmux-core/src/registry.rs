//! # Provider Registry
//!
//! The process-local owner of provider configs, live instances, and health
//! state. Instances are constructed lazily on first `get` and recreated when
//! their config changes; a single background task periodically probes every
//! enabled provider and refreshes the health cache.
//!
//! ## Locking
//!
//! One read/write mutex guards the config, instance, and health maps; no
//! I/O ever happens under it. First-touch construction is serialized with a
//! per-name async guard so a slow factory never blocks lookups for other
//! names, and a failed construction caches nothing.

use crate::error::{GatewayError, Result};
use crate::factory::ProviderFactories;
use crate::providers::{
    HealthRecord, HealthStatus, ProbeOutcome, Provider, ProviderConfig, ProviderConfigPatch,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Inner {
    configs: HashMap<String, ProviderConfig>,
    instances: HashMap<String, Arc<dyn Provider>>,
    health: HashMap<String, HealthRecord>,
}

struct ProbeTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Registry of provider configs, lazily-built instances, and cached health.
pub struct ProviderRegistry {
    inner: RwLock<Inner>,
    factories: ProviderFactories,
    /// Per-name guards serializing first-touch construction.
    build_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    probe: StdMutex<Option<ProbeTask>>,
}

impl ProviderRegistry {
    pub fn new(factories: ProviderFactories) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            factories,
            build_locks: StdMutex::new(HashMap::new()),
            probe: StdMutex::new(None),
        }
    }

    /// Register a new provider config. Fails with `conflict` when the name
    /// is taken and `validation` when the config is malformed. Health
    /// starts as `unknown` until the first probe.
    pub fn register(&self, config: ProviderConfig) -> Result<()> {
        config.validate()?;
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.configs.contains_key(&config.name) {
            return Err(GatewayError::Conflict {
                name: config.name.clone(),
            });
        }
        tracing::info!(provider = %config.name, provider_type = %config.provider_type, "registered provider");
        inner.health.insert(config.name.clone(), HealthRecord::unknown());
        inner.configs.insert(config.name.clone(), config);
        Ok(())
    }

    /// Apply a partial update. Any live instance is dropped so the next
    /// `get` rebuilds against the new config; health resets to `unknown`.
    pub fn update(&self, name: &str, patch: &ProviderConfigPatch) -> Result<ProviderConfig> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let current = inner.configs.get(name).ok_or_else(|| GatewayError::NotFound {
            name: name.to_string(),
        })?;
        let updated = patch.apply_to(current);
        updated.validate()?;
        inner.instances.remove(name);
        inner.health.insert(name.to_string(), HealthRecord::unknown());
        inner.configs.insert(name.to_string(), updated.clone());
        tracing::info!(provider = %name, "updated provider config");
        Ok(updated)
    }

    /// Remove a provider entirely: config, instance, and health record.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.configs.remove(name).is_none() {
            return Err(GatewayError::NotFound {
                name: name.to_string(),
            });
        }
        inner.instances.remove(name);
        inner.health.remove(name);
        drop(inner);
        self.build_locks
            .lock()
            .expect("build locks poisoned")
            .remove(name);
        tracing::info!(provider = %name, "unregistered provider");
        Ok(())
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    /// Disabled providers stay listed and keep their instance, but drop out
    /// of `list_enabled` and `get_healthy_providers`, so routing never
    /// sees them.
    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let config = inner
            .configs
            .get_mut(name)
            .ok_or_else(|| GatewayError::NotFound {
                name: name.to_string(),
            })?;
        config.enabled = enabled;
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .configs
            .contains_key(name)
    }

    /// All configs, disabled included, sorted by name.
    pub fn list(&self) -> Vec<ProviderConfig> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut configs: Vec<_> = inner.configs.values().cloned().collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    pub fn list_enabled(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut names: Vec<_> = inner
            .configs
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn get_config(&self, name: &str) -> Result<ProviderConfig> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                name: name.to_string(),
            })
    }

    /// The live instance for `name`, constructing it on first access.
    ///
    /// Construction failures leave no instance behind; the next `get`
    /// retries the factory.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        if let Some(instance) = self
            .inner
            .read()
            .expect("registry lock poisoned")
            .instances
            .get(name)
        {
            return Ok(Arc::clone(instance));
        }

        let build_lock = {
            let mut locks = self.build_locks.lock().expect("build locks poisoned");
            Arc::clone(
                locks
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let _guard = build_lock.lock().await;

        // Another caller may have built the instance while we waited.
        let config = {
            let inner = self.inner.read().expect("registry lock poisoned");
            if let Some(instance) = inner.instances.get(name) {
                return Ok(Arc::clone(instance));
            }
            inner
                .configs
                .get(name)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound {
                    name: name.to_string(),
                })?
        };

        tracing::debug!(provider = %name, "constructing provider instance");
        let instance = self.factories.create(&config)?;
        self.inner
            .write()
            .expect("registry lock poisoned")
            .instances
            .insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    /// Probe one provider under `deadline` and refresh its cached record.
    /// A probe failure only updates the record; it never unregisters.
    pub async fn health_check_single(&self, name: &str, deadline: Duration) -> Result<HealthRecord> {
        let provider = self.get(name).await?;
        let start = Instant::now();
        let outcome = tokio::time::timeout(deadline, provider.health_check()).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match outcome {
            Ok(Ok(ProbeOutcome::Pass)) => (HealthStatus::Healthy, None),
            Ok(Ok(ProbeOutcome::Warn(warning))) => (HealthStatus::Degraded, Some(warning)),
            Ok(Err(e)) => (HealthStatus::Unhealthy, Some(e.to_string())),
            Err(_) => (
                HealthStatus::Unhealthy,
                Some(format!("probe timed out after {deadline:?}")),
            ),
        };
        if status == HealthStatus::Unhealthy {
            tracing::warn!(provider = %name, reason = message.as_deref().unwrap_or(""), "probe failed");
        }

        let record = HealthRecord {
            status,
            message,
            checked_at: chrono::Utc::now(),
            latency_ms: Some(latency_ms),
        };

        let mut inner = self.inner.write().expect("registry lock poisoned");
        // The provider may have been unregistered while the probe ran;
        // do not resurrect its record.
        if inner.configs.contains_key(name) {
            inner.health.insert(name.to_string(), record.clone());
        }
        Ok(record)
    }

    /// Probe every enabled provider concurrently against a snapshot taken
    /// at the start of the call.
    pub async fn health_check_all(&self, deadline: Duration) -> HashMap<String, HealthRecord> {
        let names = self.list_enabled();
        let probes = names.iter().map(|name| self.health_check_single(name, deadline));
        let outcomes = futures::future::join_all(probes).await;

        names
            .into_iter()
            .zip(outcomes)
            .filter_map(|(name, outcome)| match outcome {
                Ok(record) => Some((name, record)),
                // Racing unregister or a factory failure; skip the entry.
                Err(e) => {
                    tracing::debug!(provider = %name, error = %e, "probe skipped");
                    None
                }
            })
            .collect()
    }

    pub fn get_health_result(&self, name: &str) -> Option<HealthRecord> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .health
            .get(name)
            .cloned()
    }

    /// Enabled providers whose last probe left them routable (healthy or
    /// degraded). Unknown and unhealthy are excluded.
    pub fn get_healthy_providers(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut names: Vec<_> = inner
            .configs
            .values()
            .filter(|config| config.enabled)
            .filter(|config| {
                inner
                    .health
                    .get(&config.name)
                    .is_some_and(|record| record.status.is_routable())
            })
            .map(|config| config.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Start the background probe loop. Restarting cancels the previous
    /// task first; `close` stops it.
    pub fn start_periodic_health_check(self: Arc<Self>, interval: Duration) {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let registry = Arc::clone(&self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a restart does
            // not double-probe.
            ticker.tick().await;
            tracing::info!(?interval, "periodic health checks started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.health_check_all(interval).await;
                    }
                    _ = cancel_rx.changed() => {
                        tracing::info!("periodic health checks stopped");
                        return;
                    }
                }
            }
        });

        let mut probe = self.probe.lock().expect("probe lock poisoned");
        if let Some(previous) = probe.replace(ProbeTask {
            cancel: cancel_tx,
            handle,
        }) {
            let _ = previous.cancel.send(true);
            previous.handle.abort();
        }
    }

    /// Cancel the probe task, wait for it to finish, and drop all
    /// instances (releasing their connection pools).
    pub async fn close(&self) {
        let task = self.probe.lock().expect("probe lock poisoned").take();
        if let Some(task) = task {
            let _ = task.cancel.send(true);
            let _ = task.handle.await;
        }
        self.inner
            .write()
            .expect("registry lock poisoned")
            .instances
            .clear();
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(ProviderFactories::builtin())
    }
}
