//! Metric names and descriptions.
//!
//! Counters are emitted through the `metrics` facade at the call site; the
//! embedding service installs whichever recorder it exports with.

use metrics::{describe_counter, describe_histogram, Unit};

/// Enforcement decisions, labelled `result = allow | deny`.
pub const DECISIONS_TOTAL: &str = "depot_authz_decisions_total";

/// Catalog and engine disagreed on an action permission.
pub const DIVERGENCE_TOTAL: &str = "depot_authz_divergence_total";

/// Facts written by the synchronizer, labelled `operation`.
pub const SYNC_FACTS_TOTAL: &str = "depot_authz_sync_facts_total";

/// Duration of a full rebuild.
pub const REBUILD_DURATION_SECONDS: &str = "depot_authz_rebuild_duration_seconds";

/// Errors constructed, labelled `code` and `category`.
pub const ERRORS_TOTAL: &str = "depot_errors_total";

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(DECISIONS_TOTAL, Unit::Count, "Authorization decisions by result");
    describe_counter!(
        DIVERGENCE_TOTAL,
        Unit::Count,
        "Action checks where the catalog and the policy engine disagreed"
    );
    describe_counter!(SYNC_FACTS_TOTAL, Unit::Count, "Policy facts written by the synchronizer");
    describe_histogram!(
        REBUILD_DURATION_SECONDS,
        Unit::Seconds,
        "Time taken to recompute every policy fact from the catalog"
    );
    describe_counter!(ERRORS_TOTAL, Unit::Count, "Errors by code and category");
}
