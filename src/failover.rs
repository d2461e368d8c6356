//! The failover orchestrator: one end-to-end decision procedure per record.
//!
//! A run probes the record's current address and, if it is unreachable,
//! deprecates it and rotates through reserve candidates: apply, re-probe,
//! deprecate on failure, until a candidate passes or the reserve is
//! exhausted. Candidate trials are strictly sequential within a run; runs
//! are bounded globally by a shared semaphore so manual and scheduled checks
//! cannot overload the probe service or the DNS provider.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::cloudflare::{DnsProvider, RecordUpdate};
use crate::error::FailoverError;
use crate::metrics::{self, CandidateResult, RunOutcome};
use crate::monitor::MonitorKey;
use crate::pool::IpPool;
use crate::probe::{Prober, Vantage};

/// Who started a failover run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    /// An operator asked for a check.
    Manual,
    /// A scheduler timer fired.
    Scheduled,
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initiator::Manual => f.write_str("manual"),
            Initiator::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// Terminal state of a failover run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The current address passed its probe; nothing was changed.
    StillHealthy,
    /// A reserve candidate was applied and verified healthy.
    Remediated {
        /// The address now bound to the record.
        new_ip: IpAddr,
    },
    /// The reserve ran out before a healthy candidate was found. The record
    /// is left pointing at the last applied (failed) address.
    Exhausted,
}

/// Why a tried candidate did not end the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialResult {
    /// Applied and verified; the run ended here.
    Promoted,
    /// The provider rejected the update; the candidate was skipped.
    ApplyFailed(String),
    /// Applied but failed the re-probe; the candidate was deprecated.
    ProbeFailed(String),
}

/// One candidate attempt within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTrial {
    /// The candidate address.
    pub ip: IpAddr,
    /// How the attempt ended.
    pub result: TrialResult,
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone)]
pub struct FailoverReport {
    /// The record the run operated on.
    pub key: MonitorKey,
    /// Record name, for human-readable output.
    pub record_name: String,
    /// Who started the run.
    pub initiator: Initiator,
    /// Vantage the probes were taken from.
    pub vantage: Vantage,
    /// The address bound to the record when the run started.
    pub old_ip: IpAddr,
    /// Diagnostic from the initial probe.
    pub initial_detail: String,
    /// Candidate attempts, in order.
    pub trials: Vec<CandidateTrial>,
    /// Terminal state.
    pub outcome: Outcome,
}

impl FailoverReport {
    /// One short human-readable line per aspect of the run, for routing to
    /// an operator.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} ({}) checked from {}: {}",
            self.record_name, self.old_ip, self.vantage, self.initial_detail
        )];

        for trial in &self.trials {
            match &trial.result {
                TrialResult::Promoted => lines.push(format!("candidate {} is healthy", trial.ip)),
                TrialResult::ApplyFailed(msg) => {
                    lines.push(format!("candidate {} could not be applied: {msg}", trial.ip))
                }
                TrialResult::ProbeFailed(msg) => {
                    lines.push(format!("candidate {} failed probing: {msg}", trial.ip))
                }
            }
        }

        match &self.outcome {
            Outcome::StillHealthy => lines.push("record is still healthy".to_string()),
            Outcome::Remediated { new_ip } => lines.push(format!("new IP {new_ip} active")),
            Outcome::Exhausted => lines.push(
                "WARNING: reserve pool exhausted, record is still unreachable".to_string(),
            ),
        }

        lines.join("\n")
    }
}

/// The failover engine, shared by manual triggers and the scheduler.
pub struct FailoverEngine {
    provider: Arc<dyn DnsProvider>,
    prober: Arc<dyn Prober>,
    pool: IpPool,
    governor: Arc<Semaphore>,
}

impl FailoverEngine {
    /// Build an engine. `max_concurrent_runs` sizes the shared admission
    /// semaphore bounding simultaneous runs.
    pub fn new(
        provider: Arc<dyn DnsProvider>,
        prober: Arc<dyn Prober>,
        pool: IpPool,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            provider,
            prober,
            pool,
            governor: Arc::new(Semaphore::new(max_concurrent_runs)),
        }
    }

    /// Execute one failover run for `key`, probing from `vantage`.
    ///
    /// Returns `RecordNotFound` without mutating anything when the record no
    /// longer exists, and `Persistence` when a pool write failed (the pool
    /// rolls the mutation back itself). Probe failures never surface as
    /// errors; they are unhealthy verdicts.
    pub async fn run(
        &self,
        key: &MonitorKey,
        vantage: Vantage,
        initiator: Initiator,
    ) -> Result<FailoverReport, FailoverError> {
        let _permit = self
            .governor
            .acquire()
            .await
            .map_err(|_| FailoverError::Config("concurrency governor is closed".to_string()))?;

        let timer = metrics::Timer::start();
        let result = self.run_admitted(key, vantage, initiator).await;

        match &result {
            Ok(report) => {
                let outcome = match report.outcome {
                    Outcome::StillHealthy => RunOutcome::StillHealthy,
                    Outcome::Remediated { .. } => RunOutcome::Remediated,
                    Outcome::Exhausted => RunOutcome::Exhausted,
                };
                metrics::record_run(&initiator.to_string(), outcome, timer.elapsed());
            }
            Err(FailoverError::RecordNotFound { .. }) => {
                metrics::record_run(
                    &initiator.to_string(),
                    RunOutcome::RecordNotFound,
                    timer.elapsed(),
                );
            }
            Err(_) => {}
        }

        result
    }

    async fn run_admitted(
        &self,
        key: &MonitorKey,
        vantage: Vantage,
        initiator: Initiator,
    ) -> Result<FailoverReport, FailoverError> {
        let record = self.provider.get_record(&key.zone_id, &key.record_id).await?;
        let old_ip: IpAddr = record
            .content
            .parse()
            .map_err(|_| FailoverError::InvalidAddress(record.content.clone()))?;

        info!(
            zone_id = %key.zone_id,
            record_id = %key.record_id,
            name = %record.name,
            %old_ip,
            %vantage,
            %initiator,
            "starting failover run"
        );

        let initial = self.prober.probe(old_ip, vantage).await;
        if initial.healthy {
            return Ok(FailoverReport {
                key: key.clone(),
                record_name: record.name,
                initiator,
                vantage,
                old_ip,
                initial_detail: initial.detail,
                trials: Vec::new(),
                outcome: Outcome::StillHealthy,
            });
        }

        // A failed address is never retried automatically again.
        self.pool.mark_deprecated(old_ip).await?;

        let mut trials = Vec::new();
        let outcome = loop {
            let Some(candidate) = self.pool.pop_reserve().await? else {
                warn!(
                    zone_id = %key.zone_id,
                    record_id = %key.record_id,
                    "reserve pool exhausted, record remains unreachable"
                );
                break Outcome::Exhausted;
            };

            let update = RecordUpdate::with_content(&record, candidate.to_string());
            if let Err(e) = self
                .provider
                .update_record(&key.zone_id, &key.record_id, &update)
                .await
            {
                warn!(%candidate, error = %e, "candidate could not be applied, trying next");
                metrics::record_candidate(CandidateResult::ApplyFailed);
                trials.push(CandidateTrial {
                    ip: candidate,
                    result: TrialResult::ApplyFailed(e.to_string()),
                });
                continue;
            }

            let probe = self.prober.probe(candidate, vantage).await;
            if probe.healthy {
                info!(%candidate, "candidate verified healthy, failover complete");
                metrics::record_candidate(CandidateResult::Promoted);
                trials.push(CandidateTrial {
                    ip: candidate,
                    result: TrialResult::Promoted,
                });
                break Outcome::Remediated { new_ip: candidate };
            }

            warn!(%candidate, detail = %probe.detail, "candidate failed probing, deprecating");
            metrics::record_candidate(CandidateResult::ProbeFailed);
            self.pool.mark_deprecated(candidate).await?;
            trials.push(CandidateTrial {
                ip: candidate,
                result: TrialResult::ProbeFailed(probe.detail),
            });
        };

        Ok(FailoverReport {
            key: key.clone(),
            record_name: record.name,
            initiator,
            vantage,
            old_ip,
            initial_detail: initial.detail,
            trials,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudflare::DnsRecord;
    use crate::probe::ProbeResult;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn record(content: &str) -> DnsRecord {
        DnsRecord {
            id: "r1".to_string(),
            name: "api.example.com".to_string(),
            record_type: "A".to_string(),
            content: content.to_string(),
            ttl: 120,
            proxied: true,
        }
    }

    struct FakeProvider {
        record: Mutex<Option<DnsRecord>>,
        fail_apply_for: HashSet<IpAddr>,
        updates: Mutex<Vec<RecordUpdate>>,
    }

    impl FakeProvider {
        fn new(record: Option<DnsRecord>) -> Self {
            Self {
                record: Mutex::new(record),
                fail_apply_for: HashSet::new(),
                updates: Mutex::new(Vec::new()),
            }
        }

        fn failing_apply(mut self, ips: &[&str]) -> Self {
            self.fail_apply_for = ips.iter().map(|s| ip(s)).collect();
            self
        }

        fn current_content(&self) -> String {
            self.record.lock().unwrap().as_ref().unwrap().content.clone()
        }

        fn update_count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DnsProvider for FakeProvider {
        async fn get_record(
            &self,
            zone_id: &str,
            record_id: &str,
        ) -> Result<DnsRecord, FailoverError> {
            self.record
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| FailoverError::RecordNotFound {
                    zone_id: zone_id.to_string(),
                    record_id: record_id.to_string(),
                })
        }

        async fn update_record(
            &self,
            _zone_id: &str,
            _record_id: &str,
            update: &RecordUpdate,
        ) -> Result<(), FailoverError> {
            let target: IpAddr = update.content.parse().unwrap();
            if self.fail_apply_for.contains(&target) {
                return Err(FailoverError::Provider("simulated apply failure".to_string()));
            }
            self.updates.lock().unwrap().push(update.clone());
            if let Some(rec) = self.record.lock().unwrap().as_mut() {
                rec.content = update.content.clone();
            }
            Ok(())
        }
    }

    struct FakeProber {
        healthy: HashMap<IpAddr, bool>,
        delay: Duration,
        current: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl FakeProber {
        fn new(healthy: &[(&str, bool)]) -> Self {
            Self {
                healthy: healthy.iter().map(|(s, h)| (ip(s), *h)).collect(),
                delay: Duration::ZERO,
                current: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn max_concurrency(&self) -> usize {
            self.max_seen.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, ip: IpAddr, _vantage: Vantage) -> ProbeResult {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.current.fetch_sub(1, Ordering::SeqCst);

            match self.healthy.get(&ip) {
                Some(true) => ProbeResult {
                    healthy: true,
                    detail: "all nodes ok".to_string(),
                },
                _ => ProbeResult {
                    healthy: false,
                    detail: "no attempts succeeded".to_string(),
                },
            }
        }
    }

    async fn temp_pool(reserve: &[&str]) -> (tempfile::TempDir, IpPool) {
        let dir = tempfile::tempdir().unwrap();
        let seed: Vec<IpAddr> = reserve.iter().map(|s| ip(s)).collect();
        let pool = IpPool::load(&dir.path().join("pool.json"), &seed)
            .await
            .unwrap();
        (dir, pool)
    }

    fn engine(provider: Arc<FakeProvider>, prober: Arc<FakeProber>, pool: IpPool) -> FailoverEngine {
        FailoverEngine::new(provider, prober, pool, 5)
    }

    fn key() -> MonitorKey {
        MonitorKey::new("z1", "r1")
    }

    #[tokio::test]
    async fn test_healthy_record_is_untouched() {
        let provider = Arc::new(FakeProvider::new(Some(record("1.1.1.1"))));
        let prober = Arc::new(FakeProber::new(&[("1.1.1.1", true)]));
        let (_dir, pool) = temp_pool(&["8.8.8.8"]).await;

        let report = engine(provider.clone(), prober, pool.clone())
            .run(&key(), Vantage::Ir, Initiator::Manual)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::StillHealthy);
        assert!(report.trials.is_empty());
        assert_eq!(provider.update_count(), 0);
        assert_eq!(pool.list_reserve().await, vec![ip("8.8.8.8")]);
        assert!(pool.list_deprecated().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_candidate_wins_after_first_fails_probe() {
        // reserve = [A, B, C]; A fails its re-probe, B passes
        let provider = Arc::new(FakeProvider::new(Some(record("1.1.1.1"))));
        let prober = Arc::new(FakeProber::new(&[
            ("1.1.1.1", false),
            ("10.0.0.1", false),
            ("10.0.0.2", true),
        ]));
        let (_dir, pool) = temp_pool(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]).await;

        let report = engine(provider.clone(), prober, pool.clone())
            .run(&key(), Vantage::Ir, Initiator::Manual)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Remediated { new_ip: ip("10.0.0.2") });
        assert_eq!(provider.current_content(), "10.0.0.2");
        assert_eq!(pool.list_reserve().await, vec![ip("10.0.0.3")]);
        assert_eq!(
            pool.list_deprecated().await,
            vec![ip("1.1.1.1"), ip("10.0.0.1")]
        );
        assert_eq!(report.trials.len(), 2);
        assert!(matches!(report.trials[0].result, TrialResult::ProbeFailed(_)));
        assert_eq!(report.trials[1].result, TrialResult::Promoted);
    }

    #[tokio::test]
    async fn test_empty_reserve_ends_exhausted_without_rollback() {
        let provider = Arc::new(FakeProvider::new(Some(record("1.1.1.1"))));
        let prober = Arc::new(FakeProber::new(&[("1.1.1.1", false)]));
        let (_dir, pool) = temp_pool(&[]).await;

        let report = engine(provider.clone(), prober, pool.clone())
            .run(&key(), Vantage::Ir, Initiator::Scheduled)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Exhausted);
        // The record is deliberately left pointing at the failed address
        assert_eq!(provider.current_content(), "1.1.1.1");
        assert_eq!(provider.update_count(), 0);
        assert_eq!(pool.list_deprecated().await, vec![ip("1.1.1.1")]);
        assert!(report.summary().contains("exhausted"));
    }

    #[tokio::test]
    async fn test_apply_failure_advances_to_next_candidate() {
        let provider =
            Arc::new(FakeProvider::new(Some(record("1.1.1.1"))).failing_apply(&["10.0.0.1"]));
        let prober = Arc::new(FakeProber::new(&[
            ("1.1.1.1", false),
            ("10.0.0.2", true),
        ]));
        let (_dir, pool) = temp_pool(&["10.0.0.1", "10.0.0.2"]).await;

        let report = engine(provider.clone(), prober, pool.clone())
            .run(&key(), Vantage::De, Initiator::Manual)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Remediated { new_ip: ip("10.0.0.2") });
        assert!(matches!(report.trials[0].result, TrialResult::ApplyFailed(_)));
        // A failed-to-apply candidate is consumed but not deprecated
        assert_eq!(pool.list_deprecated().await, vec![ip("1.1.1.1")]);
    }

    #[tokio::test]
    async fn test_missing_record_fails_fast_without_mutation() {
        let provider = Arc::new(FakeProvider::new(None));
        let prober = Arc::new(FakeProber::new(&[]));
        let (_dir, pool) = temp_pool(&["8.8.8.8"]).await;

        let err = engine(provider, prober, pool.clone())
            .run(&key(), Vantage::Ir, Initiator::Manual)
            .await
            .unwrap_err();

        assert!(matches!(err, FailoverError::RecordNotFound { .. }));
        assert_eq!(pool.list_reserve().await, vec![ip("8.8.8.8")]);
        assert!(pool.list_deprecated().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_address_content_is_rejected() {
        let provider = Arc::new(FakeProvider::new(Some(record("not-an-ip"))));
        let prober = Arc::new(FakeProber::new(&[]));
        let (_dir, pool) = temp_pool(&[]).await;

        let err = engine(provider, prober, pool)
            .run(&key(), Vantage::Ir, Initiator::Manual)
            .await
            .unwrap_err();

        assert!(matches!(err, FailoverError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        // zone z1, record r1 at 1.1.1.1; reserve [8.8.8.8, 8.8.4.4];
        // 1.1.1.1 fails at ir, 8.8.8.8 passes
        let provider = Arc::new(FakeProvider::new(Some(record("1.1.1.1"))));
        let prober = Arc::new(FakeProber::new(&[
            ("1.1.1.1", false),
            ("8.8.8.8", true),
        ]));
        let (_dir, pool) = temp_pool(&["8.8.8.8", "8.8.4.4"]).await;

        let report = engine(provider.clone(), prober, pool.clone())
            .run(&key(), Vantage::Ir, Initiator::Manual)
            .await
            .unwrap();

        assert_eq!(provider.current_content(), "8.8.8.8");
        assert_eq!(pool.list_deprecated().await, vec![ip("1.1.1.1")]);
        assert_eq!(pool.list_reserve().await, vec![ip("8.8.4.4")]);
        assert!(report.summary().contains("new IP 8.8.8.8 active"));
    }

    #[tokio::test]
    async fn test_governor_bounds_concurrent_runs() {
        let provider = Arc::new(FakeProvider::new(Some(record("1.1.1.1"))));
        let prober = Arc::new(
            FakeProber::new(&[("1.1.1.1", true)]).with_delay(Duration::from_millis(100)),
        );
        let (_dir, pool) = temp_pool(&[]).await;

        let engine = Arc::new(FailoverEngine::new(
            provider,
            prober.clone(),
            pool,
            2,
        ));

        let runs = (0..3).map(|_| {
            let engine = engine.clone();
            async move { engine.run(&key(), Vantage::Ir, Initiator::Manual).await }
        });
        for result in futures::future::join_all(runs).await {
            result.unwrap();
        }

        assert_eq!(prober.max_concurrency(), 2);
    }
}
