use crate::agg::partial::{finalize, AggResult, PartialAgg};
use crate::agg::spec::AggSpec;
use crate::core::types::ShardId;
use crate::shard::collector::Hit;
use crate::shard::executor::ShardResult;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Globally merged hits plus totals.
pub struct MergedHits {
    pub total: u64,
    pub max_score: Option<f32>,
    pub hits: Vec<Hit>,
}

fn compare(a: &(ShardId, &Hit), b: &(ShardId, &Hit)) -> Ordering {
    // Field sorts carry direction-normalized keys (greater ranks first);
    // score ordering otherwise. Ties are deterministic: shard asc, id asc.
    let primary = match (a.1.sort_key, b.1.sort_key) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.1.score.total_cmp(&a.1.score),
    };
    primary
        .then_with(|| a.0 .0.cmp(&b.0 .0))
        .then_with(|| a.1.id.cmp(&b.1.id))
}

/// K-way merge of per-shard top lists into the global `[from, from+size)`
/// window. Each shard contributed at most its local `from + size`, so the
/// global window is fully covered.
pub fn merge_hits(results: &[ShardResult], from: u32, size: u32) -> MergedHits {
    let total = results.iter().map(|r| r.total).sum();
    let max_score = results
        .iter()
        .filter_map(|r| r.max_score)
        .fold(None::<f32>, |acc, s| Some(acc.map_or(s, |a| a.max(s))));

    let mut all: Vec<(ShardId, &Hit)> = results
        .iter()
        .flat_map(|r| r.hits.iter().map(move |h| (r.shard_id, h)))
        .collect();
    all.sort_by(compare);

    let hits = all
        .into_iter()
        .skip(from as usize)
        .take(size as usize)
        .map(|(_, hit)| hit.clone())
        .collect();

    MergedHits {
        total,
        max_score,
        hits,
    }
}

/// Fold the per-shard partial states and reduce them to final results.
pub fn merge_aggregations(
    specs: &BTreeMap<String, AggSpec>,
    results: Vec<BTreeMap<String, PartialAgg>>,
) -> BTreeMap<String, AggResult> {
    let mut merged: BTreeMap<String, PartialAgg> = BTreeMap::new();
    for shard_aggs in results {
        for (name, partial) in shard_aggs {
            match merged.get_mut(&name) {
                Some(existing) => existing.merge(partial),
                None => {
                    merged.insert(name, partial);
                }
            }
        }
    }
    merged
        .into_iter()
        .filter_map(|(name, partial)| {
            specs
                .get(&name)
                .map(|spec| (name, finalize(spec, partial)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> Hit {
        Hit {
            id: id.into(),
            score,
            sort_key: None,
        }
    }

    fn shard_result(shard: u32, hits: Vec<Hit>, total: u64) -> ShardResult {
        ShardResult {
            shard_id: ShardId(shard),
            max_score: hits.iter().map(|h| h.score).fold(None, |acc: Option<f32>, s| {
                Some(acc.map_or(s, |a| a.max(s)))
            }),
            hits,
            total,
            aggregations: BTreeMap::new(),
            partial: false,
        }
    }

    #[test]
    fn global_order_is_score_then_shard_then_id() {
        let results = vec![
            shard_result(1, vec![hit("d", 2.0), hit("a", 1.0)], 2),
            shard_result(0, vec![hit("b", 2.0), hit("c", 0.5)], 2),
        ];
        let merged = merge_hits(&results, 0, 10);
        assert_eq!(merged.total, 4);
        assert_eq!(merged.max_score, Some(2.0));
        let ids: Vec<&str> = merged.hits.iter().map(|h| h.id.as_str()).collect();
        // 2.0 ties: shard 0 ("b") before shard 1 ("d")
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn pagination_slices_after_merge() {
        let results = vec![
            shard_result(0, vec![hit("a", 5.0), hit("b", 3.0)], 2),
            shard_result(1, vec![hit("c", 4.0), hit("d", 2.0)], 2),
        ];
        let merged = merge_hits(&results, 1, 2);
        let ids: Vec<&str> = merged.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn merge_is_deterministic() {
        let results = vec![
            shard_result(0, vec![hit("a", 1.0)], 1),
            shard_result(1, vec![hit("b", 1.0)], 1),
        ];
        let first = merge_hits(&results, 0, 10);
        let second = merge_hits(&results, 0, 10);
        assert_eq!(first.hits, second.hits);
    }
}
