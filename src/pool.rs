//! Durable IP address pool: a FIFO reserve of untried candidates and a
//! permanent set of deprecated (known-bad) addresses.
//!
//! Invariants:
//! - an address is never in both sets at once
//! - `pop_reserve` always removes the oldest-added entry
//! - a mutation is only reported as successful once the full pool state has
//!   been written durably; on a write failure the in-memory change is rolled
//!   back and the caller gets `FailoverError::Persistence`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::FailoverError;
use crate::metrics;

/// On-disk representation of the pool.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolDocument {
    reserve: Vec<IpAddr>,
    deprecated: Vec<IpAddr>,
}

#[derive(Debug)]
struct PoolInner {
    reserve: VecDeque<IpAddr>,
    deprecated: BTreeSet<IpAddr>,
    path: PathBuf,
}

impl PoolInner {
    fn document(&self) -> PoolDocument {
        PoolDocument {
            reserve: self.reserve.iter().copied().collect(),
            deprecated: self.deprecated.iter().copied().collect(),
        }
    }

    /// Write the full pool state durably (write-then-rename).
    async fn persist(&self) -> Result<(), FailoverError> {
        let json = serde_json::to_vec_pretty(&self.document())
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

/// Thread-safe handle to the process-wide IP pool.
///
/// The inner mutex is a `tokio::sync::Mutex` because the persistence write
/// must complete under the lock: two concurrent failovers must never pop the
/// same candidate, and a pop is only committed once its write succeeded.
#[derive(Debug, Clone)]
pub struct IpPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl IpPool {
    /// Load the pool from `path`, or create it from `seed` on first load.
    ///
    /// Seed addresses are deduplicated preserving order. A freshly created
    /// pool is persisted immediately so later mutations always rewrite a
    /// complete document.
    pub async fn load(path: &Path, seed: &[IpAddr]) -> Result<Self, FailoverError> {
        let inner = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let doc: PoolDocument = serde_json::from_slice(&bytes)
                    .map_err(|e| FailoverError::Persistence(format!("parse {}: {e}", path.display())))?;
                info!(
                    reserve = doc.reserve.len(),
                    deprecated = doc.deprecated.len(),
                    path = %path.display(),
                    "loaded IP pool"
                );
                PoolInner {
                    reserve: doc.reserve.into_iter().collect(),
                    deprecated: doc.deprecated.into_iter().collect(),
                    path: path.to_path_buf(),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut reserve = VecDeque::new();
                for ip in seed {
                    if !reserve.contains(ip) {
                        reserve.push_back(*ip);
                    }
                }
                info!(reserve = reserve.len(), path = %path.display(), "seeding new IP pool");
                let inner = PoolInner {
                    reserve,
                    deprecated: BTreeSet::new(),
                    path: path.to_path_buf(),
                };
                inner.persist().await?;
                inner
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Add new reserve candidates, skipping any address already present in
    /// either set. Returns the number actually added.
    pub async fn add_reserve(&self, ips: &[IpAddr]) -> Result<usize, FailoverError> {
        let mut inner = self.inner.lock().await;

        let mut added = Vec::new();
        for ip in ips {
            if inner.reserve.contains(ip) || inner.deprecated.contains(ip) || added.contains(ip) {
                debug!(%ip, "skipping address already known to the pool");
                continue;
            }
            added.push(*ip);
        }

        if added.is_empty() {
            return Ok(0);
        }

        for ip in &added {
            inner.reserve.push_back(*ip);
        }

        if let Err(e) = inner.persist().await {
            for _ in &added {
                inner.reserve.pop_back();
            }
            metrics::record_persistence_failure("pool");
            warn!(error = %e, "rolled back reserve addition");
            return Err(e);
        }

        info!(count = added.len(), "added reserve addresses");
        Ok(added.len())
    }

    /// Pop the oldest reserve candidate, or `None` when the reserve is
    /// exhausted. The pop and its durability write are atomic with respect
    /// to concurrent callers.
    pub async fn pop_reserve(&self) -> Result<Option<IpAddr>, FailoverError> {
        let mut inner = self.inner.lock().await;

        let Some(ip) = inner.reserve.pop_front() else {
            return Ok(None);
        };

        if let Err(e) = inner.persist().await {
            inner.reserve.push_front(ip);
            metrics::record_persistence_failure("pool");
            warn!(%ip, error = %e, "rolled back reserve pop");
            return Err(e);
        }

        debug!(%ip, remaining = inner.reserve.len(), "popped reserve candidate");
        Ok(Some(ip))
    }

    /// Mark an address as permanently deprecated. Idempotent; removes the
    /// address from the reserve if it is still there.
    pub async fn mark_deprecated(&self, ip: IpAddr) -> Result<(), FailoverError> {
        let mut inner = self.inner.lock().await;

        if inner.deprecated.contains(&ip) {
            return Ok(());
        }

        let reserve_pos = inner.reserve.iter().position(|r| *r == ip);
        if let Some(pos) = reserve_pos {
            inner.reserve.remove(pos);
        }
        inner.deprecated.insert(ip);

        if let Err(e) = inner.persist().await {
            inner.deprecated.remove(&ip);
            if let Some(pos) = reserve_pos {
                inner.reserve.insert(pos, ip);
            }
            metrics::record_persistence_failure("pool");
            warn!(%ip, error = %e, "rolled back deprecation");
            return Err(e);
        }

        info!(%ip, "deprecated address");
        Ok(())
    }

    /// Current reserve candidates in pop order.
    pub async fn list_reserve(&self) -> Vec<IpAddr> {
        self.inner.lock().await.reserve.iter().copied().collect()
    }

    /// Current deprecated addresses.
    pub async fn list_deprecated(&self) -> Vec<IpAddr> {
        self.inner.lock().await.deprecated.iter().copied().collect()
    }

    /// Administrative purge of the deprecated set. Never restores addresses
    /// to the reserve. Returns the number of addresses removed.
    pub async fn clear_deprecated(&self) -> Result<usize, FailoverError> {
        let mut inner = self.inner.lock().await;

        let removed: Vec<IpAddr> = inner.deprecated.iter().copied().collect();
        if removed.is_empty() {
            return Ok(0);
        }
        inner.deprecated.clear();

        if let Err(e) = inner.persist().await {
            inner.deprecated.extend(removed.iter().copied());
            metrics::record_persistence_failure("pool");
            warn!(error = %e, "rolled back deprecated purge");
            return Err(e);
        }

        info!(count = removed.len(), "cleared deprecated addresses");
        Ok(removed.len())
    }

    /// Emit current pool size gauges.
    pub async fn emit_metrics(&self) {
        let inner = self.inner.lock().await;
        metrics::record_pool_sizes(inner.reserve.len(), inner.deprecated.len());
    }
}
