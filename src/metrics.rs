//! Metrics instrumentation for smart-conn.
//!
//! All metrics are prefixed with `smart_conn.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a completed probe.
pub fn record_probe(vantage: &str, verdict: ProbeVerdict, duration: std::time::Duration) {
    let verdict_str = match verdict {
        ProbeVerdict::Healthy => "healthy",
        ProbeVerdict::Unhealthy => "unhealthy",
        ProbeVerdict::NoNodes => "no_nodes",
        ProbeVerdict::Error => "error",
    };

    counter!("smart_conn.probe.count", "vantage" => vantage.to_string(), "verdict" => verdict_str)
        .increment(1);
    histogram!("smart_conn.probe.duration.seconds", "vantage" => vantage.to_string())
        .record(duration.as_secs_f64());
}

/// Probe verdict for metrics.
#[derive(Debug, Clone, Copy)]
pub enum ProbeVerdict {
    /// The address passed the vantage policy.
    Healthy,
    /// Nodes responded but the vantage policy failed.
    Unhealthy,
    /// No nodes matched the vantage or responded.
    NoNodes,
    /// Transport or parse failure (downgraded to unhealthy by the prober).
    Error,
}

/// Record a finished failover run.
pub fn record_run(initiator: &str, outcome: RunOutcome, duration: std::time::Duration) {
    let outcome_str = match outcome {
        RunOutcome::StillHealthy => "still_healthy",
        RunOutcome::Remediated => "remediated",
        RunOutcome::Exhausted => "exhausted",
        RunOutcome::RecordNotFound => "record_not_found",
    };

    counter!("smart_conn.run.count", "initiator" => initiator.to_string(), "outcome" => outcome_str)
        .increment(1);
    histogram!("smart_conn.run.duration.seconds", "initiator" => initiator.to_string())
        .record(duration.as_secs_f64());
}

/// Failover run outcomes.
#[derive(Debug, Clone, Copy)]
pub enum RunOutcome {
    /// Current address is healthy, nothing changed.
    StillHealthy,
    /// A reserve candidate was applied and verified.
    Remediated,
    /// The reserve pool ran out before a healthy candidate was found.
    Exhausted,
    /// The record no longer exists at the provider.
    RecordNotFound,
}

/// Record a candidate trial inside a failover run.
pub fn record_candidate(result: CandidateResult) {
    let result_str = match result {
        CandidateResult::Promoted => "promoted",
        CandidateResult::ApplyFailed => "apply_failed",
        CandidateResult::ProbeFailed => "probe_failed",
    };

    counter!("smart_conn.candidate.count", "result" => result_str).increment(1);
}

/// Candidate trial results.
#[derive(Debug, Clone, Copy)]
pub enum CandidateResult {
    /// Applied and verified healthy.
    Promoted,
    /// The provider rejected the update.
    ApplyFailed,
    /// Applied but failed the re-probe.
    ProbeFailed,
}

/// Record pool sizes (call periodically or on change).
pub fn record_pool_sizes(reserve: usize, deprecated: usize) {
    gauge!("smart_conn.pool.reserve.count").set(reserve as f64);
    gauge!("smart_conn.pool.deprecated.count").set(deprecated as f64);
}

/// Record the number of active scheduled jobs.
pub fn record_active_jobs(count: usize) {
    gauge!("smart_conn.scheduler.jobs.count").set(count as f64);
}

/// Record a pool persistence failure (the mutation was rolled back).
pub fn record_persistence_failure(store: &str) {
    counter!("smart_conn.persistence.failure.count", "store" => store.to_string()).increment(1);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
