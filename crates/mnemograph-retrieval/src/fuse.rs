//! Reciprocal rank fusion
//!
//! `score(d) = Σ_i 1 / (k + rank_i(d))` over the input ranked lists with
//! `k = 60`; entries missing from a list contribute nothing.

use std::collections::HashMap;

pub const RRF_K: f64 = 60.0;

/// Fuse ranked id lists (best first). Returns `(id, fused_score)` sorted by
/// score descending, ties broken by id for determinism.
pub fn reciprocal_rank_fusion(lists: &[Vec<String>]) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            *scores.entry(id.clone()).or_default() += 1.0 / (RRF_K + (rank + 1) as f64);
        }
    }
    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// 1-based rank of `id` within a list, for debug payloads.
pub fn rank_of(list: &[String], id: &str) -> Option<usize> {
    list.iter().position(|x| x == id).map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn agreement_beats_single_list_top() {
        let fused = reciprocal_rank_fusion(&[
            ids(&["a", "b", "c"]),
            ids(&["b", "a", "d"]),
            ids(&["b", "c", "a"]),
        ]);
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn missing_entries_contribute_zero() {
        let fused = reciprocal_rank_fusion(&[ids(&["a"]), ids(&["b"])]);
        let a = fused.iter().find(|(id, _)| id == "a").unwrap().1;
        let b = fused.iter().find(|(id, _)| id == "b").unwrap().1;
        assert!((a - b).abs() < 1e-9);
        assert!((a - 1.0 / 61.0).abs() < 1e-9);
    }

    #[test]
    fn deterministic_tie_break_by_id() {
        let fused = reciprocal_rank_fusion(&[ids(&["z"]), ids(&["a"])]);
        assert_eq!(fused[0].0, "a");
    }
}
