//! Grafana Loki adapter.
//!
//! Lines are pushed with the label set `{job, user_id, run_id, project,
//! level}` — the only high-cardinality dimensions the store indexes;
//! line content is opaque. A batch is split per level so every pushed
//! stream carries a static label set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use rt_domain::config::LogStoreConfig;
use rt_domain::error::{Error, Result};
use rt_protocol::{LineRecord, LogLevel};

use crate::LogStore;

pub struct LokiStore {
    base_url: String,
    service_name: String,
    query_limit: usize,
    client: reqwest::Client,
}

impl LokiStore {
    pub fn from_config(cfg: &LogStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            service_name: cfg.service_name.clone(),
            query_limit: cfg.query_limit,
            client,
        })
    }

    fn push_url(&self) -> String {
        format!("{}/loki/api/v1/push", self.base_url)
    }

    fn query_range_url(&self) -> String {
        format!("{}/loki/api/v1/query_range", self.base_url)
    }

    fn selector(&self, run_id: Uuid) -> String {
        format!(
            "{{job=\"{}\",run_id=\"{}\"}}",
            self.service_name, run_id
        )
    }
}

fn ts_to_nanos(ts: DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| Error::LogStore(format!("timestamp {ts} out of nanosecond range")))
}

fn nanos_to_ts(raw: &str) -> Result<DateTime<Utc>> {
    let nanos: i64 = raw
        .parse()
        .map_err(|e| Error::LogStore(format!("bad timestamp {raw:?}: {e}")))?;
    DateTime::from_timestamp(nanos.div_euclid(1_000_000_000), nanos.rem_euclid(1_000_000_000) as u32)
        .ok_or_else(|| Error::LogStore(format!("timestamp {raw:?} out of range")))
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QueryResponse {
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<QueryStream>,
}

#[derive(Debug, Deserialize)]
struct QueryStream {
    stream: HashMap<String, String>,
    values: Vec<(String, String)>,
}

#[async_trait::async_trait]
impl LogStore for LokiStore {
    async fn append(
        &self,
        run_id: Uuid,
        user_id: Uuid,
        project: &str,
        lines: &[LineRecord],
    ) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }

        // One stream per level so labels stay static within a stream.
        let mut streams = Vec::with_capacity(2);
        for level in [LogLevel::Stdout, LogLevel::Stderr] {
            let values: Vec<[String; 2]> = lines
                .iter()
                .filter(|l| l.level == level)
                .map(|l| Ok([ts_to_nanos(l.timestamp)?.to_string(), l.content.clone()]))
                .collect::<Result<_>>()?;
            if values.is_empty() {
                continue;
            }
            streams.push(serde_json::json!({
                "stream": {
                    "job": self.service_name,
                    "user_id": user_id.to_string(),
                    "run_id": run_id.to_string(),
                    "project": project,
                    "level": level.as_str(),
                },
                "values": values,
            }));
        }

        let response = self
            .client
            .post(self.push_url())
            .json(&serde_json::json!({ "streams": streams }))
            .send()
            .await
            .map_err(|e| Error::LogStore(format!("push: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::LogStore(format!("push rejected: {status}: {body}")));
        }
        Ok(())
    }

    async fn query(&self, run_id: Uuid) -> Result<Vec<LineRecord>> {
        // Client timestamps may run slightly ahead of the server clock;
        // pad the range end rather than dropping those lines.
        let end = ts_to_nanos(Utc::now() + chrono::Duration::hours(1))?;

        let response = self
            .client
            .get(self.query_range_url())
            .query(&[
                ("query", self.selector(run_id).as_str()),
                ("direction", "forward"),
                ("limit", &self.query_limit.to_string()),
                ("start", "0"),
                ("end", &end.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::LogStore(format!("query: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::LogStore(format!(
                "query rejected: {status}: {body}"
            )));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| Error::LogStore(format!("query response: {e}")))?;

        let mut lines = Vec::new();
        for stream in parsed.data.result {
            let level = stream
                .stream
                .get("level")
                .and_then(|s| LogLevel::parse(s))
                .unwrap_or(LogLevel::Stdout);
            for (ts, content) in stream.values {
                lines.push(LineRecord {
                    timestamp: nanos_to_ts(&ts)?,
                    level,
                    content,
                });
            }
        }

        // Streams come back per level; interleave them by timestamp.
        lines.sort_by_key(|l| l.timestamp);
        lines.truncate(self.query_limit);
        Ok(lines)
    }
}
