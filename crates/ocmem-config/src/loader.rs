// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered merging.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `~/.config/opencode/opencode-mem.jsonc` (or the `.json` sibling)
//! 3. `OCMEM_*` environment variables
//! 4. `PORT` environment variable (subprocess convention)
//!
//! The user file is JSON-with-comments; comments are stripped before the
//! JSON provider sees it.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};

use crate::model::OcmemConfig;

/// Candidate user config files, first match wins.
fn config_candidates() -> Vec<PathBuf> {
    let Some(config_dir) = dirs::config_dir() else {
        return Vec::new();
    };
    vec![
        config_dir.join("opencode/opencode-mem.jsonc"),
        config_dir.join("opencode/opencode-mem.json"),
    ]
}

/// Load configuration from the user file with env var overrides.
pub fn load_config() -> Result<OcmemConfig, figment::Error> {
    let mut figment = Figment::new().merge(Serialized::defaults(OcmemConfig::default()));

    for candidate in config_candidates() {
        if let Ok(raw) = std::fs::read_to_string(&candidate) {
            figment = figment.merge(Json::string(&strip_jsonc_comments(&raw)));
            break;
        }
    }

    let mut config: OcmemConfig = figment.merge(env_provider()).extract()?;
    apply_port_override(&mut config);
    Ok(config)
}

/// Load configuration from a JSONC string only (no file lookup, no env).
/// Used for testing and explicit config specification.
pub fn load_config_from_str(jsonc: &str) -> Result<OcmemConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(OcmemConfig::default()))
        .merge(Json::string(&strip_jsonc_comments(jsonc)))
        .extract()
}

/// Environment variable provider: `OCMEM_SERVER_PORT` -> `server.port`.
fn env_provider() -> Env {
    Env::prefixed("OCMEM_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("server_", "server.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("embedding_", "embedding.", 1)
            .replacen("search_", "search.", 1)
            .replacen("ingest_", "ingest.", 1)
            .replacen("chroma_", "chroma.", 1)
            .replacen("context_", "context.", 1)
            .replacen("privacy_", "privacy.", 1);
        mapped.into()
    })
}

/// `PORT` overrides the listen port when running as a host subprocess.
fn apply_port_override(config: &mut OcmemConfig) {
    if let Ok(port) = std::env::var("PORT")
        && let Ok(port) = port.parse::<u16>()
    {
        config.server.port = port;
    }
}

/// Strip `//` line comments and `/* */` block comments from JSONC,
/// leaving string literals untouched.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}
