//! Shared test infrastructure for failover integration tests.
//!
//! Provides stateful wiremock backends for the Cloudflare record API and a
//! check-host style probe service, plus config/service builders. The
//! Cloudflare mock keeps the record content in shared state so an applied
//! failover is visible to later fetches; the probe mock encodes the vantage
//! and target address into the job id so results can be computed per host.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use smart_conn::config::{CloudflareConfig, ProbeConfig, ServiceConfig};
use smart_conn::{Config, FailoverReport, Notifier, TelemetryConfig};

// --- Constants ---

pub const ZONE: &str = "z1";
pub const RECORD: &str = "r1";
pub const RECORD_NAME: &str = "api.example.com";

// --- Mock Cloudflare ---

#[derive(Clone)]
struct RecordState {
    record: Arc<Mutex<Option<Value>>>,
    fail_applies: Arc<Mutex<HashSet<String>>>,
}

struct GetRecord(RecordState);

impl Respond for GetRecord {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        match self.0.record.lock().unwrap().clone() {
            Some(record) => ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": record,
            })),
            None => ResponseTemplate::new(404).set_body_json(json!({
                "success": false,
                "errors": [{"code": 81044, "message": "Record does not exist."}],
                "result": null,
            })),
        }
    }
}

struct UpdateRecord(RecordState);

impl Respond for UpdateRecord {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("invalid update body");
        let content = body["content"].as_str().expect("update without content");

        if self.0.fail_applies.lock().unwrap().contains(content) {
            return ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "errors": [{"code": 9999, "message": "simulated provider rejection"}],
                "result": null,
            }));
        }

        let mut record = self.0.record.lock().unwrap();
        let record = record.as_mut().expect("update against missing record");
        for field in ["name", "type", "content", "ttl", "proxied"] {
            record[field] = body[field].clone();
        }

        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "result": record.clone(),
        }))
    }
}

/// Stateful mock of the Cloudflare record endpoints.
pub struct MockCloudflare {
    pub server: MockServer,
    state: RecordState,
}

impl MockCloudflare {
    /// Start with an A record bound to `content`.
    pub async fn start(content: &str) -> Self {
        Self::start_with(Some(json!({
            "id": RECORD,
            "name": RECORD_NAME,
            "type": "A",
            "content": content,
            "ttl": 120,
            "proxied": false,
        })))
        .await
    }

    /// Start with no record at all (fetches return 404).
    pub async fn start_empty() -> Self {
        Self::start_with(None).await
    }

    async fn start_with(record: Option<Value>) -> Self {
        let state = RecordState {
            record: Arc::new(Mutex::new(record)),
            fail_applies: Arc::new(Mutex::new(HashSet::new())),
        };

        let server = MockServer::start().await;
        let record_path = format!("/zones/{ZONE}/dns_records/{RECORD}");

        Mock::given(method("GET"))
            .and(path(record_path.clone()))
            .respond_with(GetRecord(state.clone()))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(record_path))
            .respond_with(UpdateRecord(state.clone()))
            .mount(&server)
            .await;

        Self { server, state }
    }

    /// Make updates to the given content fail with a provider error.
    pub fn fail_apply(&self, content: &str) {
        self.state
            .fail_applies
            .lock()
            .unwrap()
            .insert(content.to_string());
    }

    /// The record's current content.
    pub fn content(&self) -> String {
        self.state
            .record
            .lock()
            .unwrap()
            .as_ref()
            .expect("no record")["content"]
            .as_str()
            .unwrap()
            .to_string()
    }
}

// --- Mock probe service ---

#[derive(Clone, Default)]
struct ProbeHealth {
    // host -> per-node attempt outcomes
    nodes: Arc<Mutex<HashMap<String, Vec<bool>>>>,
}

struct SubmitPing;

impl Respond for SubmitPing {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut host = None;
        let mut node = None;
        for (k, v) in request.url.query_pairs() {
            match k.as_ref() {
                "host" => host = Some(v.to_string()),
                "node" => node = Some(v.to_string()),
                _ => {}
            }
        }
        let host = host.expect("submit without host");
        let node = node.expect("submit without node filter");

        ResponseTemplate::new(200).set_body_json(json!({
            "ok": 1,
            // Encode vantage and host so the result endpoint can look them up
            "request_id": format!("{node}-{host}"),
        }))
    }
}

struct FetchResult(ProbeHealth);

impl Respond for FetchResult {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let job_id = request
            .url
            .path_segments()
            .and_then(|mut s| s.nth(1))
            .expect("no job id in path")
            .to_string();
        let (vantage, host) = job_id.split_once('-').expect("malformed job id");

        let mut body = serde_json::Map::new();
        if let Some(outcomes) = self.0.nodes.lock().unwrap().get(host) {
            for (i, ok) in outcomes.iter().enumerate() {
                let node_name = format!("{vantage}{}.node.check-host.net", i + 1);
                let attempts = if *ok {
                    json!([[["OK", 0.045]]])
                } else {
                    json!([[["TIMEOUT", 3.0]]])
                };
                body.insert(node_name, attempts);
            }
        }

        ResponseTemplate::new(200).set_body_json(Value::Object(body))
    }
}

/// Stateful mock of a check-host style ping service.
pub struct MockCheckHost {
    pub server: MockServer,
    health: ProbeHealth,
}

impl MockCheckHost {
    pub async fn start() -> Self {
        let health = ProbeHealth::default();
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/check-ping"))
            .respond_with(SubmitPing)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/check-result/.+$"))
            .respond_with(FetchResult(health.clone()))
            .mount(&server)
            .await;

        Self { server, health }
    }

    /// Configure the per-node ping outcomes reported for `host`. A host
    /// without outcomes reports zero nodes (probe failure).
    pub fn set_nodes(&self, host: &str, outcomes: &[bool]) {
        self.health
            .nodes
            .lock()
            .unwrap()
            .insert(host.to_string(), outcomes.to_vec());
    }

    /// Number of HTTP requests the mock has served so far. A full probe is
    /// two requests: one submit, one result fetch.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |r| r.len())
    }
}

// --- Timing ---

/// Poll `condition` until it holds or `deadline` elapses. Returns whether it
/// ever held. Tests wait on the observable event instead of a fixed sleep.
pub async fn wait_until(
    deadline: std::time::Duration,
    mut condition: impl FnMut() -> bool,
) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    condition()
}

// --- Config builder ---

/// Build a config wired to the two mock servers, with all delays zeroed.
pub fn test_config(
    cloudflare: &MockCloudflare,
    probe: &MockCheckHost,
    data_dir: &std::path::Path,
    seed_reserve: &[&str],
) -> Config {
    Config {
        cloudflare: CloudflareConfig {
            api_key: "test-api-token".to_string(),
            email: None,
            api_base: cloudflare.server.uri(),
            timeout_secs: 5,
        },
        probe: ProbeConfig {
            api_base: probe.server.uri(),
            fetch_delay_secs: 0,
            timeout_secs: 5,
        },
        service: ServiceConfig {
            data_dir: data_dir.to_path_buf(),
            max_concurrent_runs: 5,
            warmup_delay_secs: 0,
            seed_reserve: seed_reserve.iter().map(|s| s.to_string()).collect(),
        },
        telemetry: TelemetryConfig::default(),
    }
}

// --- Report collection ---

/// Notifier that records every delivered report.
#[derive(Clone, Default)]
pub struct CollectingNotifier {
    reports: Arc<Mutex<Vec<FailoverReport>>>,
}

impl CollectingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<FailoverReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, report: &FailoverReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

// --- Assertions ---

/// Assert a pool listing matches the expected addresses in order.
pub fn assert_pool(actual: &[IpAddr], expected: &[&str]) {
    let expected: Vec<IpAddr> = expected.iter().map(|s| s.parse().unwrap()).collect();
    assert_eq!(
        actual, &expected[..],
        "pool mismatch.\nactual:   {actual:?}\nexpected: {expected:?}"
    );
}
