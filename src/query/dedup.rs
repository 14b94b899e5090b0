//! Collapse duplicate candidates before ranking.
//!
//! Two results are duplicates when they share `(source, id)` or when their
//! normalised content (lowercased, whitespace collapsed) is identical. Output
//! order follows first occurrence; this module never ranks.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::types::{normalize_text, QueryResult, SourceId};

/// Deduplicate a candidate pool.
///
/// - Key duplicates keep the first occurrence's identity and content, raise
///   its score to the maximum seen, and merge metadata.
/// - Content duplicates keep the identity and content of the higher-scored
///   result at the position of the first occurrence, and merge metadata.
///
/// Merged metadata is the union of both sides. A key present on both sides
/// with different values is replaced by `"<source>:<key>"` entries, one per side.
///
/// Every output entry has a unique key and unique normalised content, so
/// `dedupe(dedupe(x)) == dedupe(x)`.
pub fn dedupe(results: Vec<QueryResult>) -> Vec<QueryResult> {
    let mut out: Vec<QueryResult> = Vec::with_capacity(results.len());
    let mut by_key: HashMap<(SourceId, String), usize> = HashMap::new();
    let mut by_content: HashMap<String, usize> = HashMap::new();

    for result in results {
        let key = (result.source.clone(), result.id.clone());

        if let Some(&idx) = by_key.get(&key) {
            let existing = &mut out[idx];
            if result.relevance_score > existing.relevance_score {
                existing.relevance_score = result.relevance_score;
            }
            let metadata = merge_metadata(existing, &result);
            existing.metadata = metadata;
            continue;
        }

        let content_key = normalize_text(&result.content);
        if let Some(&idx) = by_content.get(&content_key) {
            let existing = &mut out[idx];
            let metadata = merge_metadata(existing, &result);
            if result.relevance_score > existing.relevance_score {
                *existing = result;
            }
            existing.metadata = metadata;
            by_key.insert(key, idx);
            continue;
        }

        let idx = out.len();
        by_key.insert(key, idx);
        by_content.insert(content_key, idx);
        out.push(result);
    }

    out
}

/// Union of two metadata maps; conflicting keys are prefixed by source.
fn merge_metadata(a: &QueryResult, b: &QueryResult) -> Map<String, Value> {
    let mut merged = a.metadata.clone();

    for (key, value) in &b.metadata {
        match merged.get(key) {
            None => {
                merged.insert(key.clone(), value.clone());
            }
            Some(existing) if existing == value => {}
            Some(_) => {
                if a.source == b.source {
                    // Same backend, nothing to disambiguate by; keep the first.
                    continue;
                }
                if let Some(existing) = merged.remove(key) {
                    merged.insert(format!("{}:{key}", a.source), existing);
                }
                merged.insert(format!("{}:{key}", b.source), value.clone());
            }
        }
    }

    merged
}
