//! Reciprocal Rank Fusion of prefetch lists.

use std::collections::{HashMap, HashSet};

use crate::store::ScoredPoint;

/// A candidate after fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: u64,
    /// Sum of `1 / (k + rank)` over the lists containing this id.
    pub score: f32,
    /// Number of input lists the id appeared in.
    pub lists: usize,
    /// Best (lowest) 1-based rank across those lists.
    pub best_rank: usize,
    discovered: usize,
}

pub type FusedResult = Vec<FusedCandidate>;

/// Merge ranked lists with Reciprocal Rank Fusion.
///
/// Each list contributes `1 / (k + rank)` to every id it contains, with
/// `rank` 1-based. Only the first occurrence of an id within a list counts.
/// The output holds every id present in at least one list, ordered by
/// fused score descending; ties go to the id found in more lists, then to
/// the better best rank, then to whichever was seen first (list order,
/// then position).
///
/// # Examples
///
/// ```
/// use hybert::fusion::reciprocal_rank_fusion;
/// use hybert::store::ScoredPoint;
///
/// let hit = |id| ScoredPoint { id, score: 0.0 };
/// let fused =
///     reciprocal_rank_fusion(&[vec![hit(1), hit(2)], vec![hit(2)]], 60.0);
/// assert_eq!(fused[0].id, 2);
/// assert!((fused[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
/// ```
pub fn reciprocal_rank_fusion(
    lists: &[Vec<ScoredPoint>],
    k: f32,
) -> FusedResult {
    let total: usize = lists.iter().map(Vec::len).sum();
    let mut fused: Vec<FusedCandidate> = Vec::with_capacity(total);
    let mut slots: HashMap<u64, usize> = HashMap::with_capacity(total);

    for list in lists {
        let mut seen = HashSet::with_capacity(list.len());
        for (pos, hit) in list.iter().enumerate() {
            if !seen.insert(hit.id) {
                continue;
            }
            let rank = pos + 1;
            let contribution = 1.0 / (k + rank as f32);

            match slots.get(&hit.id) {
                Some(&slot) => {
                    let c = &mut fused[slot];
                    c.score += contribution;
                    c.lists += 1;
                    c.best_rank = c.best_rank.min(rank);
                }
                None => {
                    slots.insert(hit.id, fused.len());
                    fused.push(FusedCandidate {
                        id: hit.id,
                        score: contribution,
                        lists: 1,
                        best_rank: rank,
                        discovered: fused.len(),
                    });
                }
            }
        }
    }

    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.lists.cmp(&a.lists))
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.discovered.cmp(&b.discovered))
    });
    fused
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn hits(ids: &[u64]) -> Vec<ScoredPoint> {
        ids.iter()
            .enumerate()
            .map(|(i, &id)| ScoredPoint {
                id,
                score: 1.0 - i as f32 * 0.01,
            })
            .collect()
    }

    fn ids(fused: &FusedResult) -> Vec<u64> {
        fused.iter().map(|c| c.id).collect()
    }

    #[test]
    fn union_is_deduplicated() {
        let fused =
            reciprocal_rank_fusion(&[hits(&[1, 2, 3]), hits(&[3, 4])], 60.0);
        let mut got = ids(&fused);
        got.sort();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[test]
    fn appearing_in_both_lists_sums_contributions() {
        let fused = reciprocal_rank_fusion(&[hits(&[7]), hits(&[7])], 60.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-7);
        assert_eq!(fused[0].lists, 2);
        assert_eq!(fused[0].best_rank, 1);
    }

    #[test]
    fn symmetric_ranks_tie_on_score_and_keep_discovery_order() {
        // 1 is (1st, 2nd), 2 is (2nd, 1st): same score, same list count,
        // same best rank. Discovery order decides.
        let fused =
            reciprocal_rank_fusion(&[hits(&[1, 2]), hits(&[2, 1])], 60.0);
        assert_eq!(fused[0].score, fused[1].score);
        assert_eq!(ids(&fused), vec![1, 2]);
    }

    #[test]
    fn equal_single_list_scores_keep_discovery_order() {
        let fused =
            reciprocal_rank_fusion(&[hits(&[3, 4]), hits(&[8, 4])], 60.0);
        assert_eq!(ids(&fused), vec![4, 3, 8]);
    }

    #[test]
    fn more_lists_wins_an_exact_tie() {
        // k = 0: 10 scores 1/1 from one list, 30 scores 1/2 + 1/2.
        let fused =
            reciprocal_rank_fusion(&[hits(&[10, 30]), hits(&[20, 30])], 0.0);
        assert_eq!(fused[0].score, fused[1].score);
        assert_eq!(ids(&fused), vec![30, 10, 20]);
    }

    #[test]
    fn better_best_rank_wins_an_exact_tie() {
        // k = 0: 7 is at ranks (2, 6) and 9 at ranks (3, 3); both 2/3.
        let fused = reciprocal_rank_fusion(
            &[hits(&[1, 7, 9]), hits(&[2, 3, 9, 4, 5, 7])],
            0.0,
        );
        let pos = |id| fused.iter().position(|c| c.id == id).unwrap();
        assert_eq!(fused[pos(7)].score, fused[pos(9)].score);
        assert_eq!(pos(7) + 1, pos(9));
    }

    #[test]
    fn duplicate_ids_within_a_list_count_once() {
        let fused = reciprocal_rank_fusion(&[hits(&[1, 1, 2])], 60.0);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-7);
        // 2 keeps its position-based rank of 3.
        assert!((fused[1].score - 1.0 / 63.0).abs() < 1e-7);
    }

    #[test]
    fn empty_lists_fuse_to_nothing() {
        assert!(reciprocal_rank_fusion(&[vec![], vec![]], 60.0).is_empty());
        assert!(reciprocal_rank_fusion(&[], 60.0).is_empty());
    }

    #[test]
    fn smaller_k_favours_top_ranks_more() {
        // With k = 0, rank 1 alone (1.0) beats ranks 2 + 3 (0.83).
        let fused =
            reciprocal_rank_fusion(&[hits(&[1, 2]), hits(&[3, 4, 2])], 0.0);
        assert_eq!(fused[0].id, 1);
        // With k = 60, appearing twice wins.
        let fused =
            reciprocal_rank_fusion(&[hits(&[1, 2]), hits(&[3, 4, 2])], 60.0);
        assert_eq!(fused[0].id, 2);
    }

    proptest! {
        #[test]
        fn rank_one_in_both_lists_leads(
            tail_a in prop::collection::vec(100u64..200, 0..10),
            tail_b in prop::collection::vec(200u64..300, 0..10),
        ) {
            let mut a = vec![1u64];
            a.extend(&tail_a);
            let mut b = vec![1u64];
            b.extend(&tail_b);

            let fused = reciprocal_rank_fusion(&[hits(&a), hits(&b)], 60.0);
            prop_assert_eq!(fused[0].id, 1);
            prop_assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-6);
            for c in &fused[1..] {
                prop_assert!(c.score <= 1.0 / 61.0 + 1e-7);
            }
        }

        #[test]
        fn fused_scores_never_increase(
            a in prop::collection::vec(0u64..30, 0..20),
            b in prop::collection::vec(0u64..30, 0..20),
        ) {
            let fused = reciprocal_rank_fusion(&[hits(&a), hits(&b)], 60.0);
            for w in fused.windows(2) {
                prop_assert!(w[0].score >= w[1].score);
            }
            let mut expected: Vec<u64> = a.iter().chain(&b).copied().collect();
            expected.sort();
            expected.dedup();
            let mut got = ids(&fused);
            got.sort();
            prop_assert_eq!(got, expected);
        }
    }
}
