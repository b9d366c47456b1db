use crate::cluster::view::NodeAddr;
use crate::core::cancel::Deadline;
use crate::core::error::{Error, ErrorKind};
use crate::core::types::ShardId;
use crate::rpc::wire::{ShardSearchRequest, ShardTransport};
use crate::shard::executor::ShardResult;
use crossbeam::channel;
use std::sync::Arc;
use std::thread;

#[derive(Debug)]
pub struct ShardFailure {
    pub shard_id: ShardId,
    pub error: Error,
}

pub struct ScatterOutcome {
    pub results: Vec<ShardResult>,
    pub failures: Vec<ShardFailure>,
}

/// Fan a shard request out to every target concurrently and join in arrival
/// order until the deadline. One OS thread per shard call; stragglers are
/// cancelled through the shared token and their sends land in a dropped
/// receiver.
pub fn scatter(
    transport: Arc<dyn ShardTransport>,
    routes: Vec<(ShardId, NodeAddr)>,
    index: &str,
    template: &ShardSearchRequest,
    deadline: &Deadline,
) -> ScatterOutcome {
    let expected = routes.len();
    let (tx, rx) = channel::bounded::<(ShardId, crate::core::error::Result<ShardResult>)>(expected);

    for (shard_id, node) in routes.iter().cloned() {
        let transport = transport.clone();
        let tx = tx.clone();
        let deadline = deadline.clone();
        let request = ShardSearchRequest {
            index: index.to_string(),
            shard_id,
            plan: template.plan.clone(),
            timeout_ms: template.timeout_ms,
        };
        thread::spawn(move || {
            let outcome = transport.search(&node, request, &deadline);
            // The receiver may be gone after the deadline; that is fine.
            let _ = tx.send((shard_id, outcome));
        });
    }
    drop(tx);

    let mut results = Vec::with_capacity(expected);
    let mut failures = Vec::new();
    let mut answered = std::collections::HashSet::new();

    for _ in 0..expected {
        match rx.recv_deadline(deadline.at) {
            Ok((shard_id, Ok(result))) => {
                answered.insert(shard_id);
                results.push(result);
            }
            Ok((shard_id, Err(error))) => {
                answered.insert(shard_id);
                log::warn!("shard {} failed: {}", shard_id.0, error);
                failures.push(ShardFailure { shard_id, error });
            }
            Err(_) => {
                // Aggregate deadline hit: cancel the stragglers and stop
                // waiting for them.
                deadline.cancel.cancel();
                break;
            }
        }
    }

    for (shard_id, _) in routes {
        if !answered.contains(&shard_id) {
            failures.push(ShardFailure {
                shard_id,
                error: Error::new(
                    ErrorKind::ShardTimeout,
                    format!("shard {} did not reply before the deadline", shard_id.0),
                ),
            });
        }
    }

    ScatterOutcome { results, failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Result;
    use crate::plan::physical::ShardPlan;
    use crate::plan::query::QueryNode;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct ScriptedTransport;

    impl ShardTransport for ScriptedTransport {
        fn search(
            &self,
            _node: &NodeAddr,
            request: ShardSearchRequest,
            _deadline: &Deadline,
        ) -> Result<ShardResult> {
            match request.shard_id.0 {
                // shard 1 fails, shard 2 hangs past any test deadline
                1 => Err(Error::new(ErrorKind::ShardUnreachable, "connection refused")),
                2 => {
                    thread::sleep(Duration::from_secs(5));
                    Ok(ShardResult::empty_partial(request.shard_id))
                }
                _ => Ok(ShardResult {
                    shard_id: request.shard_id,
                    hits: Vec::new(),
                    total: 1,
                    max_score: Some(1.0),
                    aggregations: BTreeMap::new(),
                    partial: false,
                }),
            }
        }
    }

    fn template() -> ShardSearchRequest {
        ShardSearchRequest {
            index: "idx".into(),
            shard_id: ShardId(0),
            plan: ShardPlan {
                query: QueryNode::match_all(),
                post_filter: None,
                aggs: BTreeMap::new(),
                from: 0,
                size: 10,
                sort: None,
            },
            timeout_ms: 200,
        }
    }

    #[test]
    fn collects_successes_failures_and_timeouts() {
        let deadline = Deadline::within(Duration::from_millis(300));
        let outcome = scatter(
            Arc::new(ScriptedTransport),
            vec![
                (ShardId(0), NodeAddr::new("a")),
                (ShardId(1), NodeAddr::new("b")),
                (ShardId(2), NodeAddr::new("c")),
            ],
            "idx",
            &template(),
            &deadline,
        );
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.failures.len(), 2);
        let kinds: Vec<ErrorKind> = outcome.failures.iter().map(|f| f.error.kind).collect();
        assert!(kinds.contains(&ErrorKind::ShardUnreachable));
        assert!(kinds.contains(&ErrorKind::ShardTimeout));
        assert!(deadline.cancel.is_cancelled());
    }

    #[test]
    fn all_shards_answering_is_not_partial() {
        let deadline = Deadline::within(Duration::from_millis(500));
        let outcome = scatter(
            Arc::new(ScriptedTransport),
            vec![
                (ShardId(0), NodeAddr::new("a")),
                (ShardId(3), NodeAddr::new("b")),
            ],
            "idx",
            &template(),
            &deadline,
        );
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.failures.is_empty());
    }
}
