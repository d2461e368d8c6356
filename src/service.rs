//! Failover service wiring and the surface exposed to the presentation
//! layer (Telegram bot, CLI, ...).
//!
//! The service owns the durable stores, the engine and the scheduler, and
//! applies the reporting asymmetry: manual checks always return their
//! report, scheduled checks stay silent on a healthy pass and route
//! remediation or exhaustion reports to the configured [`Notifier`].

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cloudflare::CloudflareClient;
use crate::config::Config;
use crate::error::FailoverError;
use crate::failover::{FailoverEngine, FailoverReport, Initiator, Outcome};
use crate::monitor::{MonitorEntry, MonitorKey, MonitorStore};
use crate::pool::IpPool;
use crate::probe::{CheckHostProber, Vantage};
use crate::scheduler::{CheckRunner, Scheduler};

/// Interval for emitting pool size gauges.
const POOL_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Sink for reports of scheduled runs.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a report to the administrator channel.
    async fn notify(&self, report: &FailoverReport);
}

/// Default notifier: writes report summaries to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &FailoverReport) {
        match report.outcome {
            Outcome::Exhausted => warn!(
                zone_id = %report.key.zone_id,
                record_id = %report.key.record_id,
                "{}",
                report.summary()
            ),
            _ => info!(
                zone_id = %report.key.zone_id,
                record_id = %report.key.record_id,
                "{}",
                report.summary()
            ),
        }
    }
}

/// Which pool listing to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Untried FIFO candidates.
    Reserve,
    /// Permanently excluded addresses.
    Deprecated,
}

/// Glue between the scheduler's timers and the engine.
struct ScheduledCheck {
    engine: Arc<FailoverEngine>,
    monitors: MonitorStore,
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl CheckRunner for ScheduledCheck {
    async fn run_scheduled_check(&self, key: MonitorKey) {
        let Some(entry) = self.monitors.get(&key).await else {
            // Entry disappeared between the tick and the lookup
            debug!(zone_id = %key.zone_id, record_id = %key.record_id, "no config for scheduled check");
            return;
        };

        match self
            .engine
            .run(&key, entry.vantage, Initiator::Scheduled)
            .await
        {
            Ok(report) => match report.outcome {
                // Routine scheduled passes stay silent to avoid notification spam
                Outcome::StillHealthy => {
                    debug!(
                        zone_id = %key.zone_id,
                        record_id = %key.record_id,
                        "scheduled check passed"
                    );
                }
                _ => self.notifier.notify(&report).await,
            },
            Err(e) => {
                error!(
                    zone_id = %key.zone_id,
                    record_id = %key.record_id,
                    error = %e,
                    "scheduled check failed"
                );
            }
        }
    }
}

/// The Smart Connection failover service.
pub struct FailoverService {
    pool: IpPool,
    monitors: MonitorStore,
    engine: Arc<FailoverEngine>,
    scheduler: Scheduler,
}

impl FailoverService {
    /// Build the service: load both durable stores from the data directory,
    /// construct the Cloudflare and probe clients, and prepare (but do not
    /// start) the scheduler.
    pub async fn new(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self, FailoverError> {
        tokio::fs::create_dir_all(&config.service.data_dir).await?;

        let seed = parse_addresses(&config.service.seed_reserve.join("\n"));
        let pool = IpPool::load(&config.service.data_dir.join("pool.json"), &seed).await?;
        let monitors = MonitorStore::load(&config.service.data_dir.join("monitors.json")).await?;

        let provider = Arc::new(CloudflareClient::new(&config.cloudflare)?);
        let prober = Arc::new(CheckHostProber::new(&config.probe)?);
        let engine = Arc::new(FailoverEngine::new(
            provider,
            prober,
            pool.clone(),
            config.service.max_concurrent_runs,
        ));

        let runner = Arc::new(ScheduledCheck {
            engine: engine.clone(),
            monitors: monitors.clone(),
            notifier,
        });
        let scheduler = Scheduler::new(
            runner,
            Duration::from_secs(config.service.warmup_delay_secs),
        );

        Ok(Self {
            pool,
            monitors,
            engine,
            scheduler,
        })
    }

    /// Run the service until `shutdown` is cancelled: register all
    /// persisted timers, then keep the pool gauges fresh.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), FailoverError> {
        self.scheduler.start(&self.monitors).await;
        self.pool.emit_metrics().await;

        let mut interval = tokio::time::interval(POOL_METRICS_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    self.pool.emit_metrics().await;
                }
            }
        }

        self.scheduler.shutdown();
        info!("failover service stopped");
        Ok(())
    }

    /// Run one failover pass for a record right now and return its report.
    ///
    /// Uses the record's configured vantage; an unconfigured record is
    /// checked from the lenient `de` vantage.
    pub async fn trigger_manual_check(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<FailoverReport, FailoverError> {
        let key = MonitorKey::new(zone_id, record_id);
        let vantage = self
            .monitors
            .get(&key)
            .await
            .map(|e| e.vantage)
            .unwrap_or(Vantage::De);

        self.engine.run(&key, vantage, Initiator::Manual).await
    }

    /// Parse a delimiter-tolerant list of addresses and add the genuinely
    /// new ones to the reserve. Returns the number actually added.
    pub async fn add_reserve_ips(&self, raw: &str) -> Result<usize, FailoverError> {
        let ips = parse_addresses(raw);
        if ips.is_empty() {
            return Ok(0);
        }
        self.pool.add_reserve(&ips).await
    }

    /// List one of the two pool sets.
    pub async fn list_pool(&self, kind: PoolKind) -> Vec<IpAddr> {
        match kind {
            PoolKind::Reserve => self.pool.list_reserve().await,
            PoolKind::Deprecated => self.pool.list_deprecated().await,
        }
    }

    /// Administrative purge of the deprecated set.
    pub async fn clear_deprecated(&self) -> Result<usize, FailoverError> {
        self.pool.clear_deprecated().await
    }

    /// Set the probing vantage for a record, keeping its interval.
    pub async fn set_vantage(
        &self,
        zone_id: &str,
        record_id: &str,
        vantage: Vantage,
    ) -> Result<MonitorEntry, FailoverError> {
        let entry = self
            .monitors
            .set_vantage(MonitorKey::new(zone_id, record_id), vantage)
            .await?;
        self.scheduler.apply(&entry);
        Ok(entry)
    }

    /// Set the check interval for a record. Zero cancels its timer but
    /// keeps the entry (the vantage survives a disable/enable cycle).
    pub async fn set_interval(
        &self,
        zone_id: &str,
        record_id: &str,
        interval_secs: u64,
    ) -> Result<MonitorEntry, FailoverError> {
        let entry = self
            .monitors
            .set_interval(MonitorKey::new(zone_id, record_id), interval_secs)
            .await?;
        self.scheduler.apply(&entry);
        Ok(entry)
    }

    /// Number of live scheduled timers.
    pub fn active_jobs(&self) -> usize {
        self.scheduler.active_jobs()
    }
}

/// Split `raw` on commas, whitespace and newlines and parse each token as an
/// IP address. Malformed tokens are skipped with a warning.
fn parse_addresses(raw: &str) -> Vec<IpAddr> {
    let mut out = Vec::new();
    for token in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.parse::<IpAddr>() {
            Ok(ip) => out.push(ip),
            Err(_) => warn!(token, "ignoring malformed address token"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses_tolerates_mixed_delimiters() {
        let parsed = parse_addresses("1.1.1.1, 2.2.2.2\n3.3.3.3\t4.4.4.4,,  ,\n");
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[0], "1.1.1.1".parse::<IpAddr>().unwrap());
        assert_eq!(parsed[3], "4.4.4.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_parse_addresses_skips_malformed_tokens() {
        let parsed = parse_addresses("1.1.1.1 not-an-ip 300.300.300.300 2.2.2.2");
        assert_eq!(
            parsed,
            vec![
                "1.1.1.1".parse::<IpAddr>().unwrap(),
                "2.2.2.2".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_parse_addresses_accepts_ipv6() {
        let parsed = parse_addresses("fd00::1, 1.1.1.1");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_empty_input_parses_to_nothing() {
        assert!(parse_addresses("").is_empty());
        assert!(parse_addresses("  \n ,, ").is_empty());
    }
}
