//! Pinecone-backed memory store.
//!
//! Text is embedded with Gemini and stored/queried through Pinecone's REST
//! API. Every failure is reported as [`BestEffort::Degraded`]; memory never
//! stops a run.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{BestEffort, GeminiClient, MemoryEntry, MemoryStore};
use crate::config::MemoryConfig;

const API_VERSION: &str = "2024-07";

/// Memory store backed by a Pinecone index.
pub(crate) struct PineconeMemory {
    http: reqwest::Client,
    embedder: GeminiClient,
    api_key: String,
    index: String,
    namespace: String,
    control_plane_url: String,
    /// Data-plane host, resolved at most once per instance.
    host: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    host: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl PineconeMemory {
    pub fn new(config: &MemoryConfig, api_key: String, embedder: GeminiClient) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("preflight/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let host = OnceCell::new();
        if !config.host.is_empty() {
            // Only fails if already set, which a fresh cell never is
            let _ = host.set(normalize_host(&config.host));
        }

        Ok(Self {
            http,
            embedder,
            api_key,
            index: config.index.clone(),
            namespace: config.namespace.clone(),
            control_plane_url: config.control_plane_url.trim_end_matches('/').to_string(),
            host,
        })
    }

    async fn host(&self) -> Result<&str> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let url = format!("{}/indexes/{}", self.control_plane_url, self.index);
                debug!("Resolving Pinecone host for index {}", self.index);

                let response = self
                    .http
                    .get(&url)
                    .header("Api-Key", &self.api_key)
                    .header("X-Pinecone-API-Version", API_VERSION)
                    .send()
                    .await
                    .context("Failed to describe Pinecone index")?;

                let status = response.status();
                if !status.is_success() {
                    bail!("Describing index '{}' returned {status}", self.index);
                }

                let described: DescribeIndexResponse = response
                    .json()
                    .await
                    .context("Failed to parse Pinecone index description")?;
                Ok(normalize_host(&described.host))
            })
            .await?;
        Ok(host.as_str())
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.host().await?);
        let response = self
            .http
            .post(&url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call Pinecone {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Pinecone {path} returned {status}: {text}");
        }
        Ok(response)
    }

    async fn try_query(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        // Resolve the index before paying for an embedding
        self.host().await?;
        let vector = self.embedder.embed(query).await?;
        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if !self.namespace.is_empty() {
            body["namespace"] = json!(self.namespace);
        }

        let response: QueryResponse = self
            .post("/query", &body)
            .await?
            .json()
            .await
            .context("Failed to parse Pinecone query response")?;

        Ok(contents(response))
    }

    async fn try_store(&self, entry: &MemoryEntry) -> Result<()> {
        self.host().await?;
        let vector = self.embedder.embed(&entry.content).await?;
        let id = format!("{}-{}", entry.kind, uuid::Uuid::new_v4());

        let mut metadata = Map::new();
        for (key, value) in &entry.metadata {
            metadata.insert(key.clone(), json!(value));
        }
        metadata.insert("type".to_string(), json!(entry.kind.to_string()));
        metadata.insert("content".to_string(), json!(entry.content));
        metadata.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));

        let mut body = json!({
            "vectors": [{ "id": id, "values": vector, "metadata": metadata }],
        });
        if !self.namespace.is_empty() {
            body["namespace"] = json!(self.namespace);
        }

        self.post("/vectors/upsert", &body).await?;
        debug!("Stored memory {}", id);
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for PineconeMemory {
    async fn query(&self, query: &str, top_k: usize) -> BestEffort<Vec<String>> {
        BestEffort::from_result(
            self.try_query(query, top_k)
                .await
                .map_err(|e| format!("memory query failed: {e:#}")),
            Vec::new(),
        )
    }

    async fn store(&self, entry: &MemoryEntry) -> BestEffort<()> {
        BestEffort::from_result(
            self.try_store(entry)
                .await
                .map_err(|e| format!("memory store failed: {e:#}")),
            (),
        )
    }
}

/// Pinecone reports hosts without a scheme.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// The `content` metadata of each match, in rank order.
fn contents(response: QueryResponse) -> Vec<String> {
    response
        .matches
        .into_iter()
        .filter_map(|m| m.metadata?.get("content")?.as_str().map(String::from))
        .collect()
}
