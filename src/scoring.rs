//! Keyword relevance heuristic.
//!
//! score = 0.2 × source weight, +0.1 per positive keyword hit, −0.2 per
//! negative keyword hit, clamped to [0,1]. Any clamped value at or above 0.2
//! saturates to exactly 1.0, so most matching items share the top score and
//! recency decides their order in the delivery queue.

use serde::Deserialize;

const BASE_FACTOR: f64 = 0.2;
const POSITIVE_BONUS: f64 = 0.1;
const NEGATIVE_PENALTY: f64 = 0.2;
const SATURATION_FLOOR: f64 = 0.2;

/// Positive/negative keyword lists, as configured.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeywordConfig {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

/// Pure scoring function over (text, weight) with keywords fixed at construction.
#[derive(Debug, Clone)]
pub struct Scorer {
    positive: Vec<String>,
    negative: Vec<String>,
}

fn prepare(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

impl Scorer {
    pub fn new(keywords: &KeywordConfig) -> Self {
        Self {
            positive: prepare(&keywords.positive),
            negative: prepare(&keywords.negative),
        }
    }

    /// Relevance of `text` for a source with `source_weight`, always in [0,1].
    pub fn score(&self, text: &str, source_weight: f64) -> f64 {
        let weight = if source_weight.is_finite() {
            source_weight
        } else {
            0.0
        };
        let haystack = text.to_lowercase();

        let mut score = BASE_FACTOR * weight;
        for kw in &self.positive {
            if haystack.contains(kw.as_str()) {
                score += POSITIVE_BONUS;
            }
        }
        for kw in &self.negative {
            if haystack.contains(kw.as_str()) {
                score -= NEGATIVE_PENALTY;
            }
        }

        let score = score.clamp(0.0, 1.0);
        if score >= SATURATION_FLOOR {
            1.0
        } else {
            score
        }
    }
}
