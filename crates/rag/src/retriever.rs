//! Context retrieval
//!
//! Runs one or more query vectors against a session index, merges the
//! per-query results keeping each chunk's best score, drops chunks that
//! mostly duplicate an already-selected overlapping neighbor, and
//! renders the survivors into a context bundle bounded in length.

use crate::index::{ScoredChunk, VectorIndex};
use resumatch_common::errors::Result;
use std::collections::HashMap;
use tracing::debug;

/// The rendered retrieval context handed to the scorer
#[derive(Clone, Debug)]
pub struct ContextBundle {
    pub text: String,
    pub chunks: Vec<ScoredChunk>,
}

/// Fraction of a candidate chunk that may be covered by an already
/// selected chunk before the candidate is considered a duplicate
const OVERLAP_DUPLICATE_RATIO: f64 = 0.5;

/// Retrieve the top-k chunks across all query vectors.
///
/// Each query ranks the whole index; duplicates keep the best score.
/// The merged set is deduplicated by character-range overlap, so a
/// dropped near-duplicate leaves room for the next diverse chunk, and
/// the result is returned in score order, at most `k` chunks.
pub fn retrieve(
    index: &VectorIndex,
    queries: &[Vec<f32>],
    k: usize,
    model_version: &str,
) -> Result<Vec<ScoredChunk>> {
    let mut best: HashMap<String, ScoredChunk> = HashMap::new();

    // Candidates are fetched over the full index so dedup can refill
    // from diverse chunks that a per-query top-k would have crowded out
    let candidates = index.len();
    for query in queries {
        for scored in index.query(query, candidates, model_version)? {
            best.entry(scored.chunk.id.clone())
                .and_modify(|existing| {
                    if scored.score > existing.score {
                        existing.score = scored.score;
                    }
                })
                .or_insert(scored);
        }
    }

    let mut merged: Vec<ScoredChunk> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
    });

    // Greedy dedup in score order: a chunk whose span is mostly covered
    // by an accepted neighbor from the same document adds little new text
    let mut selected: Vec<ScoredChunk> = Vec::new();
    for candidate in merged {
        let duplicate = selected.iter().any(|kept| {
            kept.chunk.source_doc_id == candidate.chunk.source_doc_id
                && overlap_ratio(
                    (candidate.chunk.start_offset, candidate.chunk.end_offset),
                    (kept.chunk.start_offset, kept.chunk.end_offset),
                ) >= OVERLAP_DUPLICATE_RATIO
        });
        if !duplicate {
            selected.push(candidate);
        }
        if selected.len() == k {
            break;
        }
    }

    debug!(selected = selected.len(), queries = queries.len(), "Retrieval complete");
    Ok(selected)
}

/// Fraction of span `a` covered by span `b`
fn overlap_ratio(a: (usize, usize), b: (usize, usize)) -> f64 {
    let len = a.1.saturating_sub(a.0);
    if len == 0 {
        return 0.0;
    }
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    end.saturating_sub(start) as f64 / len as f64
}

/// Render retrieved chunks into a bundle no longer than `max_length`
/// characters. Chunks are emitted in document order and never split;
/// a chunk that does not fit is skipped.
pub fn context_bundle(mut chunks: Vec<ScoredChunk>, max_length: usize) -> ContextBundle {
    chunks.sort_by(|a, b| {
        a.chunk
            .source_doc_id
            .cmp(&b.chunk.source_doc_id)
            .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
    });

    let mut text = String::new();
    let mut included = Vec::new();

    for scored in chunks {
        let chunk_len = scored.chunk.text.chars().count();
        let separator_len = if text.is_empty() { 0 } else { 2 };
        if text.chars().count() + separator_len + chunk_len > max_length {
            continue;
        }
        if separator_len > 0 {
            text.push_str("\n\n");
        }
        text.push_str(&scored.chunk.text);
        included.push(scored);
    }

    ContextBundle {
        text,
        chunks: included,
    }
}
