// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Privacy sanitation for persisted text.
//!
//! Every write path runs its text through [`PrivacyFilter::sanitize`] before
//! anything reaches the store. The pass is idempotent: sanitizing already
//! sanitized text is a no-op.
//!
//! Users mark sensitive regions with `<private>...</private>` tags:
//!
//! ```text
//! Please fix this bug.
//! <private>My API key is sk-abc123</private>
//! The error occurs when...
//! ```
//!
//! Tagged regions are removed entirely. Known secret formats outside tags
//! (API keys, GitHub tokens, bearer tokens, SSNs, `key=value` credential
//! assignments) are replaced with redaction markers.

pub mod sanitize;

pub use sanitize::{PrivacyFilter, SanitizeOutcome, redact_secrets};
