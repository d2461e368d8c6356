//! Smart Connection - automatic failover for Cloudflare DNS "A" records.
//!
//! This crate monitors the reachability of the IP address bound to a DNS
//! record from a chosen geographic vantage and, when it becomes
//! unreachable, replaces it with a healthy candidate drawn from a managed
//! reserve pool. Failed addresses are recorded permanently and never
//! retried.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         smart-conn                            │
//! │                                                               │
//! │  ┌───────────┐  timers   ┌──────────────────┐                 │
//! │  │ Scheduler │──────────▶│ Failover Engine  │◀── manual       │
//! │  └───────────┘           │ (semaphore-bound)│    trigger      │
//! │        ▲                 └───┬──────────┬───┘                 │
//! │        │                     │          │                     │
//! │  ┌───────────┐        ┌──────▼───┐  ┌───▼────────┐            │
//! │  │ Monitor   │        │ IP Pool  │  │ Prober     │──▶ ping    │
//! │  │ Store     │        │ (JSON)   │  │ (vantage   │   service  │
//! │  │ (JSON)    │        └──────────┘  │  policy)   │            │
//! │  └───────────┘                      └────────────┘            │
//! │                                          │                    │
//! │                              Cloudflare DNS API ◀─ apply      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failover procedure
//!
//! ```text
//! probe current IP
//!   healthy   → done (manual runs get a report, scheduled stay silent)
//!   unhealthy → deprecate old IP, then loop:
//!                 pop reserve candidate (none → EXHAUSTED warning)
//!                 apply to record (provider error → next candidate)
//!                 re-probe (unhealthy → deprecate, next candidate)
//!               until a candidate passes → new IP active
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use smart_conn::{Config, FailoverService, LogNotifier};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = todo!("load from file");
//!     let service = FailoverService::new(&config, Arc::new(LogNotifier))
//!         .await
//!         .unwrap();
//!
//!     let shutdown = CancellationToken::new();
//!     service.run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod cloudflare;
pub mod config;
pub mod error;
pub mod failover;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod probe;
pub mod scheduler;
pub mod service;
pub mod telemetry;

// Re-export main types
pub use cloudflare::{CloudflareClient, DnsProvider, DnsRecord};
pub use config::{CloudflareConfig, Config, ProbeConfig, ServiceConfig, TelemetryConfig};
pub use error::FailoverError;
pub use failover::{FailoverEngine, FailoverReport, Initiator, Outcome};
pub use monitor::{MonitorEntry, MonitorKey, MonitorStore};
pub use pool::IpPool;
pub use probe::{CheckHostProber, ProbeResult, Prober, Vantage};
pub use service::{FailoverService, LogNotifier, Notifier, PoolKind};
