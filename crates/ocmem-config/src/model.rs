// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the opencode-mem service.
//!
//! All sections are optional in the user file and default to sensible
//! values. Paths beginning with `~` are expanded to the user home at
//! access time, not at parse time.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OcmemConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage location settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Search strategy defaults.
    #[serde(default)]
    pub search: SearchConfig,

    /// Ingest queue processor settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// External vector-store replication settings.
    #[serde(default)]
    pub chroma: ChromaConfig,

    /// Context injection budgets.
    #[serde(default)]
    pub context: ContextConfig,

    /// Privacy filter toggles.
    #[serde(default)]
    pub privacy: PrivacyConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind. Overridden by the `PORT` environment variable when
    /// running as a host subprocess.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Serve the SSE live stream.
    #[serde(default = "default_true")]
    pub sse_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            sse_enabled: true,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4747
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Storage location configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding the database file. `~` expands to the user home.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> String {
    "~/.local/share/opencode".to_string()
}

impl StorageConfig {
    /// Absolute path of the database file.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.storage_path).join("opencodemem.db")
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Master switch. With embeddings off, search falls back to lexical only.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP endpoint producing embeddings. `None` disables embeddings.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model identifier recorded alongside stored vectors.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per observation before dead-lettering.
    #[serde(default = "default_embedding_attempts")]
    pub max_attempts: u32,

    /// Base retry delay; actual delay is `base * attempt`.
    #[serde(default = "default_embedding_retry_ms")]
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            model: default_embedding_model(),
            timeout_ms: default_embedding_timeout_ms(),
            max_attempts: default_embedding_attempts(),
            retry_delay_ms: default_embedding_retry_ms(),
        }
    }
}

impl EmbeddingConfig {
    /// Embeddings are active only when enabled and an endpoint is set.
    pub fn is_active(&self) -> bool {
        self.enabled && self.endpoint.is_some()
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_timeout_ms() -> u64 {
    2_000
}

fn default_embedding_attempts() -> u32 {
    3
}

fn default_embedding_retry_ms() -> u64 {
    500
}

/// Search strategy defaults, overridable per request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_true")]
    pub use_fts: bool,

    #[serde(default = "default_true")]
    pub use_semantic: bool,

    /// Minimum final score to keep a result. 0 disables the threshold.
    #[serde(default)]
    pub relevance_threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            use_fts: true,
            use_semantic: true,
            relevance_threshold: 0.0,
        }
    }
}

/// Ingest queue processor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Poll interval for the queue loop.
    #[serde(default = "default_ingest_poll_ms")]
    pub poll_interval_ms: u64,

    /// Messages dequeued per tick.
    #[serde(default = "default_ingest_batch")]
    pub batch_size: usize,

    /// Delay before a failed message becomes visible again.
    #[serde(default = "default_ingest_retry_ms")]
    pub retry_delay_ms: i64,

    /// Default retry budget for enqueued events.
    #[serde(default = "default_ingest_retries")]
    pub max_retries: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_ingest_poll_ms(),
            batch_size: default_ingest_batch(),
            retry_delay_ms: default_ingest_retry_ms(),
            max_retries: default_ingest_retries(),
        }
    }
}

fn default_ingest_poll_ms() -> u64 {
    1_000
}

fn default_ingest_batch() -> usize {
    10
}

fn default_ingest_retry_ms() -> i64 {
    5_000
}

fn default_ingest_retries() -> i64 {
    3
}

/// External vector collection replication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChromaConfig {
    /// Base URL of the collection endpoint. `None` disables replication.
    #[serde(default)]
    pub url: Option<String>,

    /// Collection name to upsert into.
    #[serde(default = "default_chroma_collection")]
    pub collection: String,

    /// Periodic sync interval in seconds.
    #[serde(default = "default_chroma_interval")]
    pub interval_secs: u64,

    /// Observations per sync batch.
    #[serde(default = "default_chroma_batch")]
    pub batch_size: usize,

    /// Request timeout in milliseconds.
    #[serde(default = "default_chroma_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            url: None,
            collection: default_chroma_collection(),
            interval_secs: default_chroma_interval(),
            batch_size: default_chroma_batch(),
            timeout_ms: default_chroma_timeout_ms(),
        }
    }
}

fn default_chroma_collection() -> String {
    "observations".to_string()
}

fn default_chroma_interval() -> u64 {
    60
}

fn default_chroma_batch() -> usize {
    100
}

fn default_chroma_timeout_ms() -> u64 {
    3_000
}

/// Context injection budgets.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_context_memories")]
    pub max_memories: usize,

    /// Skip memories older than this. `None` = no age limit.
    #[serde(default)]
    pub max_age_days: Option<i64>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
            max_memories: default_context_memories(),
            max_age_days: None,
        }
    }
}

fn default_context_tokens() -> usize {
    2_000
}

fn default_context_memories() -> usize {
    10
}

/// Privacy filter toggles.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrivacyConfig {
    /// Strip `<private>` regions and reject entirely-private writes.
    #[serde(default = "default_true")]
    pub strip_private_tags: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            strip_private_tags: true,
        }
    }
}

/// Expand a leading `~` to the user home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
