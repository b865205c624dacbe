use std::{
    collections::HashMap,
    fmt::Write as _,
    sync::{Mutex, OnceLock},
};

pub(crate) const CACHE_LOOKUP_HIT: &str = "hit";
pub(crate) const CACHE_LOOKUP_MISS: &str = "miss";
pub(crate) const CACHE_LOOKUP_EXPIRED: &str = "expired";
pub(crate) const OUTCOME_OK: &str = "ok";
pub(crate) const OUTCOME_ERROR: &str = "error";

static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    cache_lookups: Mutex<HashMap<&'static str, u64>>,
    cache_invalidations: Mutex<u64>,
    resolution_failures: Mutex<u64>,
    storage_operations: Mutex<HashMap<(String, &'static str, &'static str), u64>>,
}

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

/// Render process-wide counters in the Prometheus text exposition format.
#[must_use]
pub fn render_metrics() -> String {
    let cache_lookups = metrics_state()
        .cache_lookups
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let cache_invalidations = metrics_state()
        .cache_invalidations
        .lock()
        .map_or(0, |guard| *guard);
    let resolution_failures = metrics_state()
        .resolution_failures
        .lock()
        .map_or(0, |guard| *guard);
    let storage_operations = metrics_state()
        .storage_operations
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());

    let mut output = String::new();
    output.push_str(
        "# HELP guildkeep_permission_cache_lookups_total Count of permission cache lookups by outcome\n",
    );
    output.push_str("# TYPE guildkeep_permission_cache_lookups_total counter\n");
    let mut lookup_entries: Vec<_> = cache_lookups.into_iter().collect();
    lookup_entries.sort_by_key(|(outcome, _)| *outcome);
    for (outcome, value) in lookup_entries {
        let _ = writeln!(
            output,
            "guildkeep_permission_cache_lookups_total{{outcome=\"{outcome}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP guildkeep_permission_cache_invalidations_total Count of guild-wide cache invalidations\n",
    );
    output.push_str("# TYPE guildkeep_permission_cache_invalidations_total counter\n");
    let _ = writeln!(
        output,
        "guildkeep_permission_cache_invalidations_total {cache_invalidations}"
    );

    output.push_str(
        "# HELP guildkeep_permission_resolution_failures_total Count of resolutions aborted by a stored inheritance cycle\n",
    );
    output.push_str("# TYPE guildkeep_permission_resolution_failures_total counter\n");
    let _ = writeln!(
        output,
        "guildkeep_permission_resolution_failures_total {resolution_failures}"
    );

    output.push_str(
        "# HELP guildkeep_storage_operations_total Count of storage operations by collection, operation, and outcome\n",
    );
    output.push_str("# TYPE guildkeep_storage_operations_total counter\n");
    let mut storage_entries: Vec<_> = storage_operations.into_iter().collect();
    storage_entries.sort_by(|((a_collection, a_op, a_outcome), _), ((b_collection, b_op, b_outcome), _)| {
        a_collection
            .cmp(b_collection)
            .then(a_op.cmp(b_op))
            .then(a_outcome.cmp(b_outcome))
    });
    for ((collection, operation, outcome), value) in storage_entries {
        let _ = writeln!(
            output,
            "guildkeep_storage_operations_total{{collection=\"{collection}\",operation=\"{operation}\",outcome=\"{outcome}\"}} {value}"
        );
    }

    output
}

pub(crate) fn record_cache_lookup(outcome: &'static str) {
    if let Ok(mut counters) = metrics_state().cache_lookups.lock() {
        let entry = counters.entry(outcome).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_cache_invalidation() {
    if let Ok(mut counter) = metrics_state().cache_invalidations.lock() {
        *counter += 1;
    }
}

pub(crate) fn record_resolution_failure() {
    if let Ok(mut counter) = metrics_state().resolution_failures.lock() {
        *counter += 1;
    }
}

pub(crate) fn record_storage_operation(
    collection: &str,
    operation: &'static str,
    outcome: &'static str,
) {
    if let Ok(mut counters) = metrics_state().storage_operations.lock() {
        let entry = counters
            .entry((collection.to_owned(), operation, outcome))
            .or_insert(0);
        *entry += 1;
    }
}
