//! Elasticsearch `_bulk` client.
//!
//! Each batch becomes one NDJSON request:
//!
//! ```text
//! {"index":{"_index":"lbship-2024-05-01"}}
//! {"client":"10.0.0.5","method":"GET",...}
//! ```
//!
//! Nodes are used round-robin. A transport error or 5xx moves on to the next
//! node; every node is tried at most once per batch.

use crate::storage::{BulkOutcome, SinkError, Storage};
use async_trait::async_trait;
use lbship_core::AccessRecord;
use lbship_core::config::ElasticsearchConfig;
use lbship_core::error::ConfigError;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const NDJSON: &str = "application/x-ndjson";

/// Error bodies are truncated to this many bytes in [`SinkError::Status`].
const MAX_ERROR_BODY: usize = 512;

pub struct ElasticClient {
    client: reqwest::Client,
    nodes: Vec<String>,
    next: AtomicUsize,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl ElasticClient {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self, ConfigError> {
        let mut nodes = Vec::with_capacity(config.nodes.len());
        for node in &config.nodes {
            reqwest::Url::parse(node)
                .map_err(|e| ConfigError::Storage(format!("invalid node URL {node:?}: {e}")))?;
            nodes.push(node.trim_end_matches('/').to_string());
        }
        if nodes.is_empty() {
            return Err(ConfigError::Storage("no storage nodes configured".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .map_err(|e| ConfigError::Storage(e.to_string()))?;

        Ok(Self {
            client,
            nodes,
            next: AtomicUsize::new(0),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    async fn send_to(&self, node: &str, body: String) -> Result<BulkOutcome, SinkError> {
        let url = format!("{node}/_bulk");
        let mut req = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, NDJSON)
            .body(body);
        if let Some(ref user) = self.username {
            req = req.basic_auth(user, self.password.as_ref());
        }

        let resp = req.send().await.map_err(|e| SinkError::Transport {
            node: node.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            truncate_utf8(&mut body, MAX_ERROR_BODY);
            return Err(SinkError::Status {
                node: node.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: BulkResponse = resp.json().await.map_err(|e| SinkError::Response {
            node: node.to_string(),
            reason: e.to_string(),
        })?;
        Ok(outcome(&parsed))
    }
}

#[async_trait]
impl Storage for ElasticClient {
    async fn bulk(&self, index: &str, docs: &[AccessRecord]) -> Result<BulkOutcome, SinkError> {
        let body = bulk_body(index, docs)?;
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut last_err = None;

        for attempt in 0..self.nodes.len() {
            let node = &self.nodes[(start + attempt) % self.nodes.len()];
            match self.send_to(node, body.clone()).await {
                Ok(outcome) => {
                    if outcome.failed > 0 {
                        warn!(
                            node = %node,
                            index,
                            failed = outcome.failed,
                            indexed = outcome.indexed,
                            "Bulk request had rejected documents"
                        );
                    } else {
                        debug!(node = %node, index, count = outcome.indexed, "Bulk request indexed");
                    }
                    return Ok(outcome);
                }
                Err(e) if is_retryable(&e) => {
                    warn!(node = %node, error = %e, "Bulk request failed, trying next node");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| SinkError::Transport {
            node: String::new(),
            reason: "no storage nodes".into(),
        }))
    }

    fn name(&self) -> &str {
        "elasticsearch"
    }
}

/// Render the NDJSON `_bulk` body. Always ends with a newline.
pub fn bulk_body(index: &str, docs: &[AccessRecord]) -> Result<String, SinkError> {
    let action = serde_json::to_string(&serde_json::json!({ "index": { "_index": index } }))?;
    let mut body = String::with_capacity(docs.len() * 384);
    for doc in docs {
        body.push_str(&action);
        body.push('\n');
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

fn outcome(resp: &BulkResponse) -> BulkOutcome {
    if !resp.errors {
        return BulkOutcome {
            indexed: resp.items.len(),
            failed: 0,
        };
    }
    let failed = resp
        .items
        .iter()
        .filter(|item| {
            item.as_object()
                .and_then(|m| m.values().next())
                .is_some_and(|action| action.get("error").is_some())
        })
        .count();
    BulkOutcome {
        indexed: resp.items.len() - failed,
        failed,
    }
}

fn is_retryable(e: &SinkError) -> bool {
    match e {
        SinkError::Transport { .. } => true,
        SinkError::Status { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
