//! Reciprocal Rank Fusion over two ranked lists.
//!
//! Only positions matter; the input scores are ignored apart from the order
//! they already imply.

use std::collections::HashMap;

use crate::models::RankedItem;

/// Default RRF constant.
pub const RRF_K: f32 = 60.0;

/// Rank assigned to an id missing from one of the lists.
pub const ABSENT_RANK: usize = 999;

/// Default number of fused results kept.
pub const FUSED_LIMIT: usize = 20;

/// 1-based rank of each id; the first occurrence wins.
fn rank_map(list: &[RankedItem]) -> HashMap<&str, usize> {
    let mut ranks = HashMap::with_capacity(list.len());
    for (i, item) in list.iter().enumerate() {
        ranks.entry(item.id.as_str()).or_insert(i + 1);
    }
    ranks
}

/// Fuse `a` and `b`: score(id) = 1/(k + rank_a) + 1/(k + rank_b).
///
/// Ties keep the order in which ids first appear (all of `a`, then the
/// rest of `b`). The result is cut to `limit` entries.
pub fn rrf_fusion(a: &[RankedItem], b: &[RankedItem], k: f32, limit: usize) -> Vec<RankedItem> {
    let rank_a = rank_map(a);
    let rank_b = rank_map(b);

    let mut seen = std::collections::HashSet::with_capacity(a.len() + b.len());
    let mut fused: Vec<RankedItem> = Vec::with_capacity(a.len() + b.len());

    for item in a.iter().chain(b) {
        let id = item.id.as_str();
        if !seen.insert(id) {
            continue;
        }
        let ra = rank_a.get(id).copied().unwrap_or(ABSENT_RANK) as f32;
        let rb = rank_b.get(id).copied().unwrap_or(ABSENT_RANK) as f32;
        fused.push(RankedItem::new(id, 1.0 / (k + ra) + 1.0 / (k + rb)));
    }

    // Stable: equal scores keep union order
    fused.sort_by(|x, y| {
        y.score
            .partial_cmp(&x.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(limit);
    fused
}
