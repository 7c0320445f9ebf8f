//! Reciprocal-rank fusion of the semantic and lexical rankings.
//!
//! Each list contributes `1 / (1 + rank)` for the posts it contains, using
//! rank position only. Raw distances and BM25 scores are never compared
//! across modalities.

use std::collections::HashMap;

use uuid::Uuid;

/// A post's 1-based position in one ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    pub id: Uuid,
    pub rank: u32,
}

/// A fused entry with the ranks that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    pub id: Uuid,
    pub score: f64,
    pub semantic_rank: Option<u32>,
    pub lexical_rank: Option<u32>,
}

/// Assign competition ranks to a list already sorted best-first.
///
/// Equal keys share a rank and the next distinct key skips ahead
/// (1, 2, 2, 4), matching SQL `RANK()`.
pub fn competition_ranks<K: PartialEq>(sorted: &[(Uuid, K)]) -> Vec<Ranked> {
    let mut out = Vec::with_capacity(sorted.len());
    let mut rank = 0u32;
    for (i, (id, key)) in sorted.iter().enumerate() {
        if i == 0 || sorted[i - 1].1 != *key {
            rank = i as u32 + 1;
        }
        out.push(Ranked { id: *id, rank });
    }
    out
}

pub fn reciprocal(rank: u32) -> f64 {
    1.0 / (1.0 + rank as f64)
}

/// Outer-join both rankings on post id and order by fused score.
///
/// Ties on score are broken by id. The result is truncated to `limit`.
pub fn fuse(semantic: &[Ranked], lexical: &[Ranked], limit: usize) -> Vec<Fused> {
    let mut joined: HashMap<Uuid, Fused> = HashMap::with_capacity(semantic.len() + lexical.len());

    for r in semantic {
        let entry = joined.entry(r.id).or_insert_with(|| Fused {
            id: r.id,
            score: 0.0,
            semantic_rank: None,
            lexical_rank: None,
        });
        if entry.semantic_rank.is_none() {
            entry.semantic_rank = Some(r.rank);
            entry.score += reciprocal(r.rank);
        }
    }
    for r in lexical {
        let entry = joined.entry(r.id).or_insert_with(|| Fused {
            id: r.id,
            score: 0.0,
            semantic_rank: None,
            lexical_rank: None,
        });
        if entry.lexical_rank.is_none() {
            entry.lexical_rank = Some(r.rank);
            entry.score += reciprocal(r.rank);
        }
    }

    let mut fused: Vec<Fused> = joined.into_values().collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    fused.truncate(limit);
    fused
}
