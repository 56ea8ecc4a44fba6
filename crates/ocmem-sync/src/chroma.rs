// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the external vector collection endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ocmem_core::OcmemError;

/// One record upserted into the external collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromaRecord {
    /// Stable record id, derived from the observation id.
    pub id: String,
    /// Document text sent for server-side retrieval.
    pub document: String,
    /// Embedding vector; may be empty when no provider is configured.
    pub embedding: Vec<f32>,
    /// Metadata filterable at the endpoint (project, kind, timestamps).
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    ids: Vec<&'a str>,
    documents: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    metadatas: Vec<&'a serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    #[serde(rename = "where")]
    filter: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<&'a str>>,
}

/// Client for a Chroma-style collection API.
#[derive(Debug, Clone)]
pub struct ChromaClient {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl ChromaClient {
    pub fn new(
        base_url: String,
        collection: String,
        timeout: Duration,
    ) -> Result<Self, OcmemError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcmemError::Provider {
                message: format!("failed to build vector-store HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
        })
    }

    fn collection_url(&self, action: &str) -> String {
        format!(
            "{}/collections/{}/{action}",
            self.base_url, self.collection
        )
    }

    /// Upsert a batch of records.
    pub async fn upsert(&self, records: &[ChromaRecord]) -> Result<(), OcmemError> {
        if records.is_empty() {
            return Ok(());
        }
        let body = UpsertBody {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            documents: records.iter().map(|r| r.document.as_str()).collect(),
            embeddings: records.iter().map(|r| r.embedding.as_slice()).collect(),
            metadatas: records.iter().map(|r| &r.metadata).collect(),
        };

        let response = self
            .client
            .post(self.collection_url("upsert"))
            .json(&body)
            .send()
            .await
            .map_err(|e| OcmemError::Provider {
                message: format!("vector-store upsert failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcmemError::Provider {
                message: format!("vector store returned {status}: {body}"),
                source: None,
            });
        }
        Ok(())
    }

    /// Delete every record whose metadata matches `project`. Best effort.
    pub async fn delete_by_project(&self, project: &str) -> Result<(), OcmemError> {
        let body = DeleteBody {
            filter: serde_json::json!({ "project": project }),
            ids: None,
        };
        let response = self
            .client
            .post(self.collection_url("delete"))
            .json(&body)
            .send()
            .await
            .map_err(|e| OcmemError::Provider {
                message: format!("vector-store delete failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcmemError::Provider {
                message: format!("vector store returned {status}: {body}"),
                source: None,
            });
        }
        Ok(())
    }
}
