// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pure multi-signal ranker.
//!
//! Combines lexical, semantic, recency, and tag-boost scores into one
//! final score per candidate. Every individual signal lands in `[0, 1]`
//! and the ordering is deterministic for identical inputs.
//!
//! Recency uses batch min-max normalization of `created_at_ms` (all-equal
//! batches score 0.5). The coarse age-bucket curve survives only as the
//! standalone [`recency_bucket`] helper used for display scoring.

use std::collections::HashMap;

use ocmem_core::Observation;

/// Signal weights. Defaults favor lexical evidence; callers running
/// without embeddings set `semantic` to 0 (weights are used as-is, never
/// renormalized).
#[derive(Debug, Clone, Copy)]
pub struct RankerWeights {
    pub lexical: f64,
    pub semantic: f64,
    pub recency: f64,
    pub tag: f64,
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self {
            lexical: 0.45,
            semantic: 0.35,
            recency: 0.15,
            tag: 0.05,
        }
    }
}

/// Per-signal scores for one candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalScores {
    pub lexical: f64,
    pub semantic: f64,
    pub recency: f64,
    pub tag_boost: f64,
}

/// A candidate with its scores and final rank value.
#[derive(Debug, Clone)]
pub struct RankedObservation {
    pub observation: Observation,
    pub scores: SignalScores,
    pub final_score: f64,
}

/// Multi-signal ranker. Pure per call: no state beyond the weights.
#[derive(Debug, Clone, Default)]
pub struct Ranker {
    weights: RankerWeights,
}

impl Ranker {
    pub fn new(weights: RankerWeights) -> Self {
        Self { weights }
    }

    /// Score and sort candidates for `query`.
    ///
    /// `semantic` maps observation id to cosine similarity; missing ids
    /// score 0. Ties sort by newer `created_at_ms`, then higher id.
    pub fn rank(
        &self,
        query: &str,
        candidates: Vec<Observation>,
        semantic: &HashMap<i64, f64>,
    ) -> Vec<RankedObservation> {
        let recency = recency_normalizer(&candidates);

        let mut ranked: Vec<RankedObservation> = candidates
            .into_iter()
            .map(|obs| {
                let scores = SignalScores {
                    lexical: lexical_score(query, &obs),
                    semantic: semantic.get(&obs.id).copied().unwrap_or(0.0).clamp(0.0, 1.0),
                    recency: recency(obs.created_at_ms),
                    tag_boost: tag_boost(query, &obs),
                };
                let final_score = self.weights.lexical * scores.lexical
                    + self.weights.semantic * scores.semantic
                    + self.weights.recency * scores.recency
                    + self.weights.tag * scores.tag_boost;
                RankedObservation {
                    observation: obs,
                    scores,
                    final_score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.observation.created_at_ms.cmp(&a.observation.created_at_ms))
                .then_with(|| b.observation.id.cmp(&a.observation.id))
        });
        ranked
    }
}

/// Lexical score in `[0, 1]`.
///
/// A whole-query substring hit scores `min(1.0, 0.5 + |query| / |text|)`.
/// Otherwise the score is the fraction of query words (length >= 2) that
/// appear as substrings. An empty word set scores 0.
fn lexical_score(query: &str, obs: &Observation) -> f64 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    let haystack = format!(
        "{} {} {}",
        obs.title,
        obs.subtitle.as_deref().unwrap_or(""),
        obs.text
    )
    .to_lowercase();

    if haystack.contains(&query) {
        let text_len = obs.text.chars().count().max(1);
        return (0.5 + query.chars().count() as f64 / text_len as f64).min(1.0);
    }

    let words: Vec<&str> = query
        .split_whitespace()
        .filter(|w| w.chars().count() >= 2)
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| haystack.contains(**w)).count();
    hits as f64 / words.len() as f64
}

/// Fraction of the candidate's tag terms containing any query word.
///
/// Observations carry their tag terms as kind plus facts. No terms => 0.
fn tag_boost(query: &str, obs: &Observation) -> f64 {
    let mut tags: Vec<String> = vec![obs.kind.to_string()];
    tags.extend(obs.facts.iter().map(|f| f.to_lowercase()));
    if obs.facts.is_empty() {
        // A bare kind is not meaningful tag evidence.
        return 0.0;
    }

    let words: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() >= 2)
        .map(|w| w.to_string())
        .collect();
    if words.is_empty() {
        return 0.0;
    }

    let matching = tags
        .iter()
        .filter(|tag| words.iter().any(|w| tag.contains(w)))
        .count();
    matching as f64 / tags.len() as f64
}

/// Build a min-max normalizer over the batch's timestamps.
fn recency_normalizer(candidates: &[Observation]) -> impl Fn(i64) -> f64 + use<> {
    let min = candidates.iter().map(|o| o.created_at_ms).min().unwrap_or(0);
    let max = candidates.iter().map(|o| o.created_at_ms).max().unwrap_or(0);
    let span = (max - min) as f64;
    move |created_at_ms: i64| {
        if span <= 0.0 {
            0.5
        } else {
            (created_at_ms - min) as f64 / span
        }
    }
}

/// Coarse age-bucket score for standalone display scoring.
pub fn recency_bucket(created_at_ms: i64, now_ms: i64) -> f64 {
    let age_days = (now_ms - created_at_ms) as f64 / (24.0 * 60.0 * 60.0 * 1000.0);
    if age_days <= 1.0 {
        1.0
    } else if age_days <= 7.0 {
        0.8
    } else if age_days <= 30.0 {
        0.5
    } else if age_days <= 90.0 {
        0.3
    } else {
        0.1
    }
}
