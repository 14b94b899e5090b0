//! Ranking engine: order a candidate pool by relevance, recency, or a hybrid score.
//!
//! [`rank`] is a pure function. `now` is passed in rather than read from the
//! clock, and every comparison ends in a stable tie-break, so identical inputs
//! in identical order always produce identical output order.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{QueryResult, RankingStrategy, SourceId};

/// Coefficients of the hybrid composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    /// Relevance coefficient.
    pub alpha: f64,
    /// Recency coefficient.
    pub beta: f64,
    /// Source-weight coefficient.
    pub gamma: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.2,
            gamma: 0.2,
        }
    }
}

/// Order `results` by `strategy`.
///
/// `weights` holds the declared weight of every adapter queried for this
/// request, whether or not it produced candidates. Hybrid normalises source
/// weight by the largest of them. Sources missing from the map count as `0.0`.
pub fn rank(
    results: Vec<QueryResult>,
    strategy: RankingStrategy,
    weights: &HashMap<SourceId, f64>,
    hybrid: &HybridWeights,
    now: DateTime<Utc>,
) -> Vec<QueryResult> {
    let weight_of = |r: &QueryResult| weights.get(&r.source).copied().unwrap_or(0.0);

    match strategy {
        RankingStrategy::Relevance => {
            let mut ranked = results;
            ranked.sort_by(|a, b| {
                desc(a.relevance_score, b.relevance_score)
                    .then_with(|| desc(weight_of(a), weight_of(b)))
            });
            ranked
        }
        RankingStrategy::Recency => {
            let mut ranked = results;
            ranked.sort_by(|a, b| {
                // Missing timestamps sort last.
                b.timestamp
                    .cmp(&a.timestamp)
                    .then_with(|| desc(weight_of(a), weight_of(b)))
            });
            ranked
        }
        RankingStrategy::Hybrid => {
            let max_weight = weights.values().copied().fold(0.0_f64, f64::max);

            let mut scored: Vec<(f64, QueryResult)> = results
                .into_iter()
                .map(|r| {
                    let source_weight = if max_weight > 0.0 {
                        weight_of(&r) / max_weight
                    } else {
                        0.0
                    };
                    let composite = hybrid.alpha * r.relevance_score
                        + hybrid.beta * recency_score(r.timestamp, now)
                        + hybrid.gamma * source_weight;
                    (composite, r)
                })
                .collect();

            scored.sort_by(|(sa, a), (sb, b)| {
                desc(*sa, *sb).then_with(|| desc(a.relevance_score, b.relevance_score))
            });
            scored.into_iter().map(|(_, r)| r).collect()
        }
    }
}

/// `1 / (1 + age_in_days)`; future timestamps count as age zero, missing ones score `0`.
pub fn recency_score(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match timestamp {
        Some(ts) => {
            let age_secs = (now - ts).num_seconds().max(0) as f64;
            1.0 / (1.0 + age_secs / 86_400.0)
        }
        None => 0.0,
    }
}

/// Descending comparison with a total order over floats.
fn desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}
