//! # Routing Strategies
//!
//! The pluggable rule that maps (candidates, weights) onto one candidate.
//! Strategies are pure over their inputs apart from the round-robin cursor,
//! which the router owns; the candidate list is always sorted by name
//! before dispatch so ordering is deterministic.

use crate::error::{GatewayError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The closed set of selection strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    /// Sample by normalized weight.
    Weighted,
    /// Cycle through candidates in name order.
    RoundRobin,
    /// Prefer the default provider, fall back to the heaviest candidate.
    StickyFailover,
    /// Pick the cheapest candidate by estimated request cost.
    CostOptimized,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::Weighted => "weighted",
            RoutingStrategy::RoundRobin => "round-robin",
            RoutingStrategy::StickyFailover => "sticky-failover",
            RoutingStrategy::CostOptimized => "cost-optimized",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "weighted" => Ok(RoutingStrategy::Weighted),
            "round-robin" => Ok(RoutingStrategy::RoundRobin),
            "sticky-failover" => Ok(RoutingStrategy::StickyFailover),
            "cost-optimized" => Ok(RoutingStrategy::CostOptimized),
            other => Err(GatewayError::validation(format!(
                "unknown routing strategy: {other}"
            ))),
        }
    }
}

/// Normalized per-candidate weights: uniform 1/N, overlaid by the router's
/// default weights, overlaid by per-request weights, then normalized to
/// sum 1. An all-zero overlay falls back to uniform.
pub fn effective_weights(
    candidates: &[String],
    default_weights: &HashMap<String, f64>,
    overrides: &HashMap<String, f64>,
) -> HashMap<String, f64> {
    if candidates.is_empty() {
        return HashMap::new();
    }
    let uniform = 1.0 / candidates.len() as f64;
    let mut weights: HashMap<String, f64> = candidates
        .iter()
        .map(|name| {
            let weight = overrides
                .get(name)
                .or_else(|| default_weights.get(name))
                .copied()
                .unwrap_or(uniform);
            (name.clone(), weight.max(0.0))
        })
        .collect();

    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        for weight in weights.values_mut() {
            *weight = uniform;
        }
    } else {
        for weight in weights.values_mut() {
            *weight /= total;
        }
    }
    weights
}

/// Everything a strategy may consult. `costs` is only populated for
/// cost-optimized dispatch.
pub struct SelectionInputs<'a> {
    /// Candidates sorted by name.
    pub candidates: &'a [String],
    /// Normalized weights covering every candidate.
    pub weights: &'a HashMap<String, f64>,
    pub default_provider: Option<&'a str>,
    pub costs: Option<&'a HashMap<String, f64>>,
}

/// Apply `strategy` to the inputs. Returns `None` only for an empty
/// candidate list.
pub fn select(
    strategy: RoutingStrategy,
    inputs: &SelectionInputs<'_>,
    round_robin_cursor: &AtomicUsize,
) -> Option<String> {
    if inputs.candidates.is_empty() {
        return None;
    }
    match strategy {
        RoutingStrategy::Weighted => Some(select_weighted(inputs.candidates, inputs.weights)),
        RoutingStrategy::RoundRobin => {
            let index =
                round_robin_cursor.fetch_add(1, Ordering::Relaxed) % inputs.candidates.len();
            Some(inputs.candidates[index].clone())
        }
        RoutingStrategy::StickyFailover => Some(select_sticky(inputs)),
        RoutingStrategy::CostOptimized => Some(select_cheapest(inputs)),
    }
}

fn select_weighted(candidates: &[String], weights: &HashMap<String, f64>) -> String {
    let total: f64 = candidates
        .iter()
        .map(|name| weights.get(name).copied().unwrap_or(0.0))
        .sum();
    let mut remaining = rand::thread_rng().gen_range(0.0..total.max(f64::MIN_POSITIVE));
    for name in candidates {
        remaining -= weights.get(name).copied().unwrap_or(0.0);
        if remaining <= 0.0 {
            return name.clone();
        }
    }
    // Floating-point slack can walk past the end of the scan; the last
    // candidate takes it.
    candidates[candidates.len() - 1].clone()
}

fn select_sticky(inputs: &SelectionInputs<'_>) -> String {
    if let Some(default) = inputs.default_provider {
        if inputs.candidates.iter().any(|name| name == default) {
            return default.to_string();
        }
    }
    // Heaviest candidate; the name-sorted scan breaks ties toward the
    // lexicographically first.
    let mut best = &inputs.candidates[0];
    let mut best_weight = inputs.weights.get(best).copied().unwrap_or(0.0);
    for name in &inputs.candidates[1..] {
        let weight = inputs.weights.get(name).copied().unwrap_or(0.0);
        if weight > best_weight {
            best = name;
            best_weight = weight;
        }
    }
    best.clone()
}

fn select_cheapest(inputs: &SelectionInputs<'_>) -> String {
    let Some(costs) = inputs.costs else {
        return select_weighted(inputs.candidates, inputs.weights);
    };
    let min_cost = inputs
        .candidates
        .iter()
        .map(|name| costs.get(name).copied().unwrap_or(f64::MAX))
        .fold(f64::MAX, f64::min);

    let tied: Vec<String> = inputs
        .candidates
        .iter()
        .filter(|name| {
            (costs.get(*name).copied().unwrap_or(f64::MAX) - min_cost).abs() < 1e-12
        })
        .cloned()
        .collect();
    if tied.len() == 1 {
        return tied[0].clone();
    }
    select_weighted(&tied, inputs.weights)
}
