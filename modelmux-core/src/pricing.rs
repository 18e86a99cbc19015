//! Per-dialect price tables and the cost estimator used by the
//! cost-optimized routing strategy.

use crate::models::CompletionRequest;

/// USD price per 1k input/output tokens for one dialect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTable {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl PriceTable {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Self-hosted backends cost nothing.
    pub const FREE: PriceTable = PriceTable::new(0.0, 0.0);
}

/// When the request does not cap output tokens, assume this many for the
/// estimate.
const DEFAULT_OUTPUT_TOKENS: u32 = 1024;

/// Estimate the USD cost of a request against a price table.
///
/// Prompt tokens are approximated as character count / 4; output tokens as
/// `max_tokens` (or a fixed default when unset). This is an ordering
/// heuristic for routing, not billing.
pub fn estimate_cost(table: PriceTable, request: &CompletionRequest) -> f64 {
    let prompt_tokens = (request.prompt_chars() as f64) / 4.0;
    let output_tokens = f64::from(request.max_tokens.unwrap_or(DEFAULT_OUTPUT_TOKENS));
    (prompt_tokens / 1000.0) * table.input_per_1k + (output_tokens / 1000.0) * table.output_per_1k
}
