//! Change detection against the previous run's statuses
//!
//! History is keyed by the raw proxy string exactly as it appears in the
//! source column. A proxy that is reformatted between runs loses its history
//! and is treated as new.

use crate::proxy::models::{RunTransition, VerdictRecord};
use indexmap::IndexSet;
use std::collections::HashMap;
use tracing::warn;

/// Pair each verdict with its previous status
pub fn transitions(
    current: &[VerdictRecord],
    previous: &HashMap<String, String>,
) -> Vec<RunTransition> {
    current
        .iter()
        .map(|verdict| RunTransition {
            proxy: verdict.proxy.clone(),
            previous: previous.get(&verdict.proxy).cloned(),
            current: verdict.status(),
        })
        .collect()
}

/// Proxies that were `valid` last run and are invalid now, in input order
///
/// Proxies with no previous status are never included.
pub fn detect_transitions(
    current: &[VerdictRecord],
    previous: &HashMap<String, String>,
) -> IndexSet<String> {
    let changed: IndexSet<String> = transitions(current, previous)
        .into_iter()
        .filter(RunTransition::became_invalid)
        .map(|t| t.proxy)
        .collect();

    if !changed.is_empty() {
        warn!(count = changed.len(), "proxies became invalid since the last run");
    }
    changed
}

/// Value for the previous-status column of each verdict row
///
/// The prior status when one exists, otherwise the current status so the
/// next run has a baseline.
pub fn baseline_statuses(
    current: &[VerdictRecord],
    previous: &HashMap<String, String>,
) -> Vec<String> {
    transitions(current, previous)
        .into_iter()
        .map(|t| t.previous.unwrap_or_else(|| t.current.as_str().to_string()))
        .collect()
}
