//! Reachability probing through a check-host style ping service.
//!
//! A probe is a two-step exchange: submit a ping job scoped to a vantage and
//! receive an opaque job id, wait a fixed delay, then fetch the per-node
//! results. Each node reports zero or more individual ping attempts; a node
//! counts as successful if at least one attempt succeeded.
//!
//! The overall verdict depends on the vantage: `ir` is strict (every
//! matching node must succeed), every other vantage is lenient (one
//! succeeding node is enough). Zero matching nodes is always a failure.
//!
//! A prober never returns an error: transport and parse failures are
//! downgraded to an unhealthy verdict carrying a diagnostic detail, so the
//! orchestrator cannot tell "could not probe" from "probed and failed".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ProbeConfig;
use crate::error::FailoverError;
use crate::metrics::{self, ProbeVerdict};

/// Geographic probing location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vantage {
    /// Iran. Strict policy: all matching nodes must succeed.
    Ir,
    /// Germany. Lenient policy: any matching node suffices.
    De,
}

impl Vantage {
    /// The node-name prefix used by the probe service for this vantage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Vantage::Ir => "ir",
            Vantage::De => "de",
        }
    }

    /// Whether every matching node must succeed for a healthy verdict.
    fn strict(&self) -> bool {
        matches!(self, Vantage::Ir)
    }
}

impl fmt::Display for Vantage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vantage {
    type Err = FailoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ir" => Ok(Vantage::Ir),
            "de" => Ok(Vantage::De),
            other => Err(FailoverError::Config(format!("unknown vantage: {other}"))),
        }
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Whether the address passed the vantage policy.
    pub healthy: bool,
    /// Short human-readable diagnostic.
    pub detail: String,
}

impl ProbeResult {
    fn healthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: true,
            detail: detail.into(),
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

/// Reachability prober seam used by the orchestrator.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `ip` from `vantage`. Infallible by design; failures are
    /// reported through an unhealthy [`ProbeResult`].
    async fn probe(&self, ip: IpAddr, vantage: Vantage) -> ProbeResult;
}

/// Per-node outcome extracted from a fetch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    /// Node identifier (e.g. "ir1.node.check-host.net").
    pub node: String,
    /// Whether at least one ping attempt from this node succeeded.
    pub success: bool,
}

/// Apply the vantage policy to a set of node outcomes.
///
/// Only nodes whose name starts with the vantage prefix participate. This is
/// the sole place the strict/lenient distinction lives.
pub fn verdict(vantage: Vantage, nodes: &[NodeOutcome]) -> ProbeResult {
    let matching: Vec<&NodeOutcome> = nodes
        .iter()
        .filter(|n| n.node.starts_with(vantage.as_str()))
        .collect();

    if matching.is_empty() {
        return ProbeResult::unhealthy(format!("no nodes responded for vantage {vantage}"));
    }

    let succeeded = matching.iter().filter(|n| n.success).count();
    let total = matching.len();

    let healthy = if vantage.strict() {
        succeeded == total
    } else {
        succeeded > 0
    };

    if healthy {
        ProbeResult::healthy(format!("{succeeded}/{total} nodes ok from {vantage}"))
    } else {
        ProbeResult::unhealthy(format!("{succeeded}/{total} nodes ok from {vantage}"))
    }
}

/// Submit response: an `ok` flag plus the opaque job id.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    ok: Option<u8>,
    request_id: Option<String>,
}

/// HTTP prober against a check-host style service.
pub struct CheckHostProber {
    client: reqwest::Client,
    api_base: String,
    fetch_delay: Duration,
}

impl CheckHostProber {
    /// Build a prober from configuration.
    pub fn new(config: &ProbeConfig) -> Result<Self, FailoverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            fetch_delay: Duration::from_secs(config.fetch_delay_secs),
        })
    }

    /// Submit a ping job scoped to `vantage`. Returns the opaque job id.
    async fn submit(&self, ip: IpAddr, vantage: Vantage) -> Result<String, FailoverError> {
        let url = format!("{}/check-ping", self.api_base);
        let response = self
            .client
            .get(&url)
            .query(&[("host", ip.to_string()), ("node", vantage.to_string())])
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?;

        let body: SubmitResponse = response.json().await?;
        if body.ok != Some(1) {
            return Err(FailoverError::Provider(
                "probe service refused the ping job".to_string(),
            ));
        }
        body.request_id
            .ok_or_else(|| FailoverError::Provider("probe service returned no job id".to_string()))
    }

    /// Fetch per-node results for a submitted job.
    ///
    /// The wire shape maps node name to either `null` (no results yet) or a
    /// list of attempt lists, each attempt being `["OK", 0.045]`-style
    /// heterogeneous arrays.
    async fn fetch(&self, job_id: &str) -> Result<Vec<NodeOutcome>, FailoverError> {
        let url = format!("{}/check-result/{}", self.api_base, job_id);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?;

        let body: HashMap<String, Option<Vec<Vec<serde_json::Value>>>> = response.json().await?;

        let mut outcomes = Vec::new();
        for (node, result) in body {
            let Some(attempt_sets) = result else {
                // Node never reported back; counts as a failed node
                outcomes.push(NodeOutcome {
                    node,
                    success: false,
                });
                continue;
            };

            let success = attempt_sets
                .iter()
                .flatten()
                .any(|attempt| attempt.get(0).and_then(|v| v.as_str()) == Some("OK"));
            outcomes.push(NodeOutcome { node, success });
        }

        outcomes.sort_by(|a, b| a.node.cmp(&b.node));
        Ok(outcomes)
    }
}

#[async_trait]
impl Prober for CheckHostProber {
    async fn probe(&self, ip: IpAddr, vantage: Vantage) -> ProbeResult {
        let timer = metrics::Timer::start();

        let job_id = match self.submit(ip, vantage).await {
            Ok(id) => id,
            Err(e) => {
                warn!(%ip, %vantage, error = %e, "ping submission failed");
                metrics::record_probe(vantage.as_str(), ProbeVerdict::Error, timer.elapsed());
                return ProbeResult::unhealthy(format!("probe submission failed: {e}"));
            }
        };

        debug!(%ip, %vantage, job_id, "ping job submitted");
        tokio::time::sleep(self.fetch_delay).await;

        let nodes = match self.fetch(&job_id).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(%ip, %vantage, job_id, error = %e, "ping result fetch failed");
                metrics::record_probe(vantage.as_str(), ProbeVerdict::Error, timer.elapsed());
                return ProbeResult::unhealthy(format!("probe result fetch failed: {e}"));
            }
        };

        let result = verdict(vantage, &nodes);
        let metric_verdict = if result.healthy {
            ProbeVerdict::Healthy
        } else if nodes.iter().all(|n| !n.node.starts_with(vantage.as_str())) {
            ProbeVerdict::NoNodes
        } else {
            ProbeVerdict::Unhealthy
        };
        metrics::record_probe(vantage.as_str(), metric_verdict, timer.elapsed());

        debug!(%ip, %vantage, healthy = result.healthy, detail = %result.detail, "probe verdict");
        result
    }
}
