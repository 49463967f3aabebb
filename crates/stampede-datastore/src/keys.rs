//! Naming scheme for every key the engine touches in the backing store.

use sha1::{Digest, Sha1};

pub(crate) fn test_events(test_id: &str) -> String {
    format!("{test_id}-test-events")
}

pub(crate) fn user_results(user_manager_id: &str) -> String {
    format!("{user_manager_id}-results")
}

pub(crate) fn user_work(user_manager_id: &str) -> String {
    format!("{user_manager_id}-work")
}

pub(crate) fn scenario_result(scenario_id: &str) -> String {
    format!("{scenario_id}-result")
}

pub(crate) fn scenario_user_managers(scenario_id: &str) -> String {
    format!("{scenario_id}-user-managers")
}

pub(crate) fn buffered_work(scenario_id: &str) -> String {
    format!("{scenario_id}-buffered-work")
}

pub(crate) fn buffered_events(scenario_id: &str) -> String {
    format!("{scenario_id}-buffered-events")
}

/// User-event channels are keyed per (manager, kind); the two parts are
/// folded through a 160-bit digest to keep the key flat.
pub(crate) fn user_events(user_manager_id: &str, kind: &str) -> String {
    concatenated(&format!("{user_manager_id}-user-events"), kind)
}

pub(crate) fn metric_set(scenario_id: &str, name: &str) -> String {
    format!("{scenario_id}-{name}-metrics-set")
}

pub(crate) fn metric_inc(scenario_id: &str, name: &str) -> String {
    format!("{scenario_id}-{name}-metrics-inc")
}

pub(crate) fn metric_last(scenario_id: &str, name: &str) -> String {
    format!("{scenario_id}-{name}-metrics-last")
}

fn concatenated(a: &str, b: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(a.as_bytes());
    hasher.update(b.as_bytes());
    hex::encode(hasher.finalize())
}
