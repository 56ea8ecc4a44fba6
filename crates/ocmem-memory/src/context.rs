// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token-budgeted context injection.
//!
//! Selects recent memories for a project under token, count, and age
//! budgets and assembles the Markdown block a host chat surface prepends
//! to new sessions. Truncation is deterministic: iteration stops at the
//! first memory that would overflow the token budget.

use ocmem_core::OcmemError;
use ocmem_storage::Database;
use ocmem_storage::queries::memories;

/// Preview length taken from `content` when a memory has no summary.
const CONTENT_PREVIEW_CHARS: usize = 200;

/// Section header of the injected block.
const CONTEXT_HEADER: &str = "## Relevant Project Context";

/// Trailing provenance line of the injected block.
const CONTEXT_FOOTER: &str = "_Recalled from project memory (opencode-mem)._";

/// Budgets and scoping for one injection request.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub project: String,
    pub max_tokens: usize,
    pub max_memories: usize,
    /// Current session to exclude from recall.
    pub session_id: Option<String>,
    pub max_age_days: Option<i64>,
}

/// Assembled injection block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInjection {
    /// `None` when no memory fit the budgets.
    pub context: Option<String>,
    /// Number of memory lines included.
    pub count: usize,
    /// Token estimate consumed by the included lines.
    pub token_estimate: usize,
}

/// Estimate tokens as `ceil(len / 4)` over UTF-16 code units.
pub fn estimate_tokens(text: &str) -> usize {
    text.encode_utf16().count().div_ceil(4)
}

/// Build the context injection block for a project.
pub async fn build_context(
    db: &Database,
    request: &ContextRequest,
) -> Result<ContextInjection, OcmemError> {
    let candidates = memories::memories_for_context(
        db,
        &request.project,
        request.session_id.as_deref(),
        request.max_age_days,
        request.max_memories,
    )
    .await?;

    let mut lines = Vec::new();
    let mut consumed = 0usize;

    for memory in &candidates {
        let text = match &memory.summary {
            Some(summary) if !summary.is_empty() => summary.clone(),
            _ => memory.content.chars().take(CONTENT_PREVIEW_CHARS).collect(),
        };
        let item_tokens = estimate_tokens(&text);
        if consumed + item_tokens > request.max_tokens {
            // Deterministic truncation: stop at the first overflow.
            break;
        }
        consumed += item_tokens;
        lines.push(format!("[#{}] {}", memory.id, text));
    }

    if lines.is_empty() {
        return Ok(ContextInjection {
            context: None,
            count: 0,
            token_estimate: 0,
        });
    }

    let count = lines.len();
    let context = format!("{CONTEXT_HEADER}\n\n{}\n\n{CONTEXT_FOOTER}", lines.join("\n"));
    Ok(ContextInjection {
        context: Some(context),
        count,
        token_estimate: consumed,
    })
}
