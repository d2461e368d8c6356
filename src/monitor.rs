//! Durable per-record monitoring configuration.
//!
//! Each DNS record under automatic checking has exactly one entry keyed by
//! (zone, record), holding its probing vantage and check interval. An
//! interval of zero means scheduling is disabled; the entry itself is kept
//! so the vantage survives a disable/enable cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::FailoverError;
use crate::metrics;
use crate::probe::Vantage;

/// Identifies one monitored DNS record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorKey {
    /// Cloudflare zone id.
    pub zone_id: String,
    /// Cloudflare record id.
    pub record_id: String,
}

impl MonitorKey {
    /// Build a key from its parts.
    pub fn new(zone_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            record_id: record_id.into(),
        }
    }
}

/// Monitoring configuration for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEntry {
    /// The record this entry configures.
    #[serde(flatten)]
    pub key: MonitorKey,
    /// Vantage to probe the record's address from.
    pub vantage: Vantage,
    /// Seconds between scheduled checks; 0 disables scheduling.
    pub interval_secs: u64,
}

impl MonitorEntry {
    /// Whether this entry should have a live timer.
    pub fn scheduled(&self) -> bool {
        self.interval_secs > 0
    }
}

#[derive(Debug)]
struct StoreInner {
    entries: HashMap<MonitorKey, MonitorEntry>,
    path: PathBuf,
}

impl StoreInner {
    async fn persist(&self) -> Result<(), FailoverError> {
        let mut entries: Vec<&MonitorEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            (&a.key.zone_id, &a.key.record_id).cmp(&(&b.key.zone_id, &b.key.record_id))
        });

        let json = serde_json::to_vec_pretty(&entries)
            .map_err(|e| FailoverError::Persistence(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| FailoverError::Persistence(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| FailoverError::Persistence(format!("rename {}: {e}", self.path.display())))?;

        Ok(())
    }
}

/// Thread-safe handle to the monitor config store.
#[derive(Debug, Clone)]
pub struct MonitorStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MonitorStore {
    /// Load the store from `path`, starting empty if the document does not
    /// exist yet.
    pub async fn load(path: &Path) -> Result<Self, FailoverError> {
        let entries = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let list: Vec<MonitorEntry> = serde_json::from_slice(&bytes)
                    .map_err(|e| FailoverError::Persistence(format!("parse {}: {e}", path.display())))?;
                info!(entries = list.len(), path = %path.display(), "loaded monitor configs");
                list.into_iter().map(|e| (e.key.clone(), e)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner {
                entries,
                path: path.to_path_buf(),
            })),
        })
    }

    /// Upsert the vantage for a record. A new entry starts with scheduling
    /// disabled (interval 0).
    pub async fn set_vantage(
        &self,
        key: MonitorKey,
        vantage: Vantage,
    ) -> Result<MonitorEntry, FailoverError> {
        self.upsert(key, |entry| entry.vantage = vantage, vantage, 0)
            .await
    }

    /// Upsert the check interval for a record. Zero disables scheduling but
    /// keeps the entry, so the configured vantage is preserved. A record
    /// enabled without a prior vantage defaults to the lenient `de` vantage.
    pub async fn set_interval(
        &self,
        key: MonitorKey,
        interval_secs: u64,
    ) -> Result<MonitorEntry, FailoverError> {
        self.upsert(
            key,
            |entry| entry.interval_secs = interval_secs,
            Vantage::De,
            interval_secs,
        )
        .await
    }

    async fn upsert(
        &self,
        key: MonitorKey,
        apply: impl FnOnce(&mut MonitorEntry),
        default_vantage: Vantage,
        default_interval: u64,
    ) -> Result<MonitorEntry, FailoverError> {
        let mut inner = self.inner.lock().await;

        let previous = inner.entries.get(&key).cloned();
        let entry = inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| MonitorEntry {
                key: key.clone(),
                vantage: default_vantage,
                interval_secs: default_interval,
            });
        apply(entry);
        let updated = entry.clone();

        if let Err(e) = inner.persist().await {
            match previous {
                Some(prev) => {
                    inner.entries.insert(key, prev);
                }
                None => {
                    inner.entries.remove(&key);
                }
            }
            metrics::record_persistence_failure("monitors");
            warn!(error = %e, "rolled back monitor config change");
            return Err(e);
        }

        info!(
            zone_id = %updated.key.zone_id,
            record_id = %updated.key.record_id,
            vantage = %updated.vantage,
            interval_secs = updated.interval_secs,
            "monitor config updated"
        );
        Ok(updated)
    }

    /// Fetch the entry for a record, if configured.
    pub async fn get(&self, key: &MonitorKey) -> Option<MonitorEntry> {
        self.inner.lock().await.entries.get(key).cloned()
    }

    /// All configured entries, sorted by key.
    pub async fn list(&self) -> Vec<MonitorEntry> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<MonitorEntry> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            (&a.key.zone_id, &a.key.record_id).cmp(&(&b.key.zone_id, &b.key.record_id))
        });
        entries
    }

    /// Entries that should have a live timer (interval > 0).
    pub async fn scheduled(&self) -> Vec<MonitorEntry> {
        self.list().await.into_iter().filter(|e| e.scheduled()).collect()
    }
}
