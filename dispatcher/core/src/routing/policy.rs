//! Routing Policy
//!
//! Picks the provider a task will run on.
//!
//! # Selection Flow
//!
//! ```text
//! 1. Explicit request  -> that provider, if registered and enabled
//! 2. Candidate pool    -> enabled providers minus the coordinator
//!                         (the coordinator alone if nothing else is enabled)
//! 3. Free capacity     -> highest speed_weight among providers with a free slot
//! 4. All saturated     -> shortest queue, then highest weight, then
//!                         registration order
//! ```
//!
//! Selection reads a registry snapshot and never blocks. The choice is a hint:
//! the slot is only reserved later, at admission.

use std::cmp::Ordering;
use std::sync::Arc;

use super::registry::ProviderEntry;
use crate::error::DispatchError;

/// Choose a provider for one task
///
/// `entries` must be in registration order.
pub(crate) fn select_provider(
    entries: &[Arc<ProviderEntry>],
    requested: Option<&str>,
    coordinator: Option<&str>,
) -> Result<Arc<ProviderEntry>, DispatchError> {
    if let Some(name) = requested {
        return entries
            .iter()
            .find(|e| e.name() == name && e.config.enabled)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownProvider {
                name: name.to_string(),
            });
    }

    let enabled: Vec<&Arc<ProviderEntry>> =
        entries.iter().filter(|e| e.config.enabled).collect();
    if enabled.is_empty() {
        return Err(DispatchError::NoProviderAvailable);
    }

    let offload: Vec<&Arc<ProviderEntry>> = enabled
        .iter()
        .copied()
        .filter(|e| Some(e.name()) != coordinator)
        .collect();
    let pool = if offload.is_empty() { enabled } else { offload };

    fastest_with_capacity(&pool)
        .or_else(|| shortest_queue(&pool))
        .cloned()
        .ok_or(DispatchError::NoProviderAvailable)
}

/// Highest weight among providers with a free slot; first registered wins ties
fn fastest_with_capacity<'a>(pool: &[&'a Arc<ProviderEntry>]) -> Option<&'a Arc<ProviderEntry>> {
    let mut best: Option<&'a Arc<ProviderEntry>> = None;
    for entry in pool.iter().copied().filter(|e| e.has_capacity()) {
        match best {
            Some(current) if entry.config.speed_weight <= current.config.speed_weight => {}
            _ => best = Some(entry),
        }
    }
    best
}

/// Shortest queue; ties go to the higher weight, then the earlier registration
fn shortest_queue<'a>(pool: &[&'a Arc<ProviderEntry>]) -> Option<&'a Arc<ProviderEntry>> {
    pool.iter().copied().reduce(|best, entry| {
        if compare_saturated(entry, best) == Ordering::Less {
            entry
        } else {
            best
        }
    })
}

/// `Less` means `a` is the better pick
fn compare_saturated(a: &ProviderEntry, b: &ProviderEntry) -> Ordering {
    a.load
        .queued()
        .cmp(&b.load.queued())
        .then_with(|| {
            b.config
                .speed_weight
                .partial_cmp(&a.config.speed_weight)
                .unwrap_or(Ordering::Equal)
        })
}
