use crate::core::types::DocOrd;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// One ranked hit as it leaves a shard. `sort_key` is present only for
/// field sorts and is direction-normalized (greater always ranks first), so
/// shard and coordinator compare hits identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<i64>,
}

/// Ranking key inside one shard: the comparable part plus the segment
/// position for deterministic ties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedDoc {
    pub key: RankKey,
    pub seg_idx: u32,
    pub ord: DocOrd,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RankKey {
    Score(f32),
    /// Direction-normalized field key; docs missing the field rank last.
    Field(Option<i64>),
}

impl RankedDoc {
    /// Total order, best first. Ties break toward earlier segments and
    /// lower ordinals so output is deterministic.
    fn better_than(&self, other: &RankedDoc) -> Ordering {
        let primary = match (&self.key, &other.key) {
            (RankKey::Score(a), RankKey::Score(b)) => a.total_cmp(b),
            (RankKey::Field(a), RankKey::Field(b)) => match (a, b) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            },
            // Mixed keys cannot happen within one query.
            _ => Ordering::Equal,
        };
        primary.then_with(|| {
            (other.seg_idx, other.ord).cmp(&(self.seg_idx, self.ord))
        })
    }
}

impl Eq for RankedDoc {}

impl PartialOrd for RankedDoc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedDoc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.better_than(other)
    }
}

/// Bounded top-K heap. Keeps the best `capacity` docs seen, tracks the total
/// matched count and the max score across everything collected.
pub struct TopKCollector {
    capacity: usize,
    heap: BinaryHeap<Reverse<RankedDoc>>,
    total: u64,
    max_score: Option<f32>,
}

impl TopKCollector {
    pub fn new(capacity: usize) -> Self {
        TopKCollector {
            capacity,
            heap: BinaryHeap::with_capacity(capacity + 1),
            total: 0,
            max_score: None,
        }
    }

    pub fn collect(&mut self, doc: RankedDoc) {
        self.total += 1;
        self.max_score = Some(match self.max_score {
            Some(max) => max.max(doc.score),
            None => doc.score,
        });
        if self.capacity == 0 {
            return;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(doc));
        } else if let Some(Reverse(worst)) = self.heap.peek() {
            if doc.better_than(worst) == Ordering::Greater {
                self.heap.pop();
                self.heap.push(Reverse(doc));
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn max_score(&self) -> Option<f32> {
        self.max_score
    }

    /// Best-first drain.
    pub fn into_sorted(self) -> Vec<RankedDoc> {
        let mut docs: Vec<RankedDoc> = self.heap.into_iter().map(|Reverse(d)| d).collect();
        docs.sort_by(|a, b| b.better_than(a));
        docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(score: f32, seg_idx: u32, ord: DocOrd) -> RankedDoc {
        RankedDoc {
            key: RankKey::Score(score),
            seg_idx,
            ord,
            score,
        }
    }

    #[test]
    fn keeps_best_k_by_score() {
        let mut topk = TopKCollector::new(2);
        for (i, score) in [0.5f32, 2.0, 1.0, 3.0].into_iter().enumerate() {
            topk.collect(scored(score, 0, i as DocOrd));
        }
        assert_eq!(topk.total(), 4);
        assert_eq!(topk.max_score(), Some(3.0));
        let docs = topk.into_sorted();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].score, 3.0);
        assert_eq!(docs[1].score, 2.0);
    }

    #[test]
    fn equal_scores_tie_break_by_position() {
        let mut topk = TopKCollector::new(3);
        topk.collect(scored(1.0, 1, 5));
        topk.collect(scored(1.0, 0, 9));
        topk.collect(scored(1.0, 0, 2));
        let docs = topk.into_sorted();
        assert_eq!(
            docs.iter().map(|d| (d.seg_idx, d.ord)).collect::<Vec<_>>(),
            vec![(0, 2), (0, 9), (1, 5)]
        );
    }

    #[test]
    fn field_sort_ranks_missing_last() {
        let mut topk = TopKCollector::new(3);
        let field = |key: Option<i64>, ord: DocOrd| RankedDoc {
            key: RankKey::Field(key),
            seg_idx: 0,
            ord,
            score: 1.0,
        };
        topk.collect(field(Some(10), 0));
        topk.collect(field(None, 1));
        topk.collect(field(Some(50), 2));
        let docs = topk.into_sorted();
        assert_eq!(docs[0].ord, 2);
        assert_eq!(docs[1].ord, 0);
        assert_eq!(docs[2].ord, 1);
    }
}
