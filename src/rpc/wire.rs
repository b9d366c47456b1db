use crate::cluster::view::NodeAddr;
use crate::core::cancel::Deadline;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::ShardId;
use crate::plan::physical::ShardPlan;
use crate::shard::executor::{ShardExecutor, ShardResult};
use crate::shard::shard::Shard;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Current wire version. Decoders also accept the previous minor version;
/// payload evolution is additive-only within that window.
pub const WIRE_VERSION: u8 = 2;
pub const MIN_WIRE_VERSION: u8 = 1;

/// The shard-search payload: the logical sub-plan for one shard plus its
/// routing identity and deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSearchRequest {
    pub index: String,
    pub shard_id: ShardId,
    pub plan: ShardPlan,
    pub timeout_ms: u64,
}

fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(payload)?;
    let mut framed = Vec::with_capacity(body.len() + 1);
    framed.push(WIRE_VERSION);
    framed.extend_from_slice(&body);
    Ok(framed)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    let (&version, body) = bytes
        .split_first()
        .ok_or_else(|| Error::new(ErrorKind::Wire, "empty payload"))?;
    if !(MIN_WIRE_VERSION..=WIRE_VERSION).contains(&version) {
        return Err(Error::new(
            ErrorKind::Wire,
            format!(
                "unsupported wire version {} (accept {}..={})",
                version, MIN_WIRE_VERSION, WIRE_VERSION
            ),
        ));
    }
    Ok(bincode::deserialize(body)?)
}

pub fn encode_request(request: &ShardSearchRequest) -> Result<Vec<u8>> {
    encode(request)
}

pub fn decode_request(bytes: &[u8]) -> Result<ShardSearchRequest> {
    decode(bytes)
}

pub fn encode_response(response: &ShardResult) -> Result<Vec<u8>> {
    encode(response)
}

pub fn decode_response(bytes: &[u8]) -> Result<ShardResult> {
    decode(bytes)
}

/// The transport seam between coordinator and shards. Implementations carry
/// the encoded payload to wherever the shard lives and bring a `ShardResult`
/// back; errors map onto the shard-failure kinds.
pub trait ShardTransport: Send + Sync {
    fn search(
        &self,
        node: &NodeAddr,
        request: ShardSearchRequest,
        deadline: &Deadline,
    ) -> Result<ShardResult>;
}

/// In-process transport over a shard map. Requests still round-trip through
/// the wire codec so the serialization path is always exercised.
pub struct LocalTransport {
    shards: HashMap<(String, u32), Arc<Shard>>,
    executor: ShardExecutor,
}

impl LocalTransport {
    /// Executors inherit the node's scoring configuration; the coordinator
    /// and its transports are wired from the same `Config`.
    pub fn new(config: &Config) -> Self {
        LocalTransport {
            shards: HashMap::new(),
            executor: ShardExecutor::new(config.bm25_k1, config.bm25_b),
        }
    }

    pub fn register(&mut self, index: &str, shard: Arc<Shard>) {
        self.shards.insert((index.to_string(), shard.id.0), shard);
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl ShardTransport for LocalTransport {
    fn search(
        &self,
        _node: &NodeAddr,
        request: ShardSearchRequest,
        deadline: &Deadline,
    ) -> Result<ShardResult> {
        let request = decode_request(&encode_request(&request)?)?;
        let shard = self
            .shards
            .get(&(request.index.clone(), request.shard_id.0))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::ShardUnreachable,
                    format!("shard {}/{} not hosted here", request.index, request.shard_id.0),
                )
            })?;
        let reader = shard.reader();
        let result = self
            .executor
            .execute(&reader, request.shard_id, &request.plan, deadline)?;
        decode_response(&encode_response(&result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::query::QueryNode;
    use std::collections::BTreeMap;

    fn request() -> ShardSearchRequest {
        ShardSearchRequest {
            index: "idx".into(),
            shard_id: ShardId(3),
            plan: ShardPlan {
                query: QueryNode::match_all(),
                post_filter: None,
                aggs: BTreeMap::new(),
                from: 0,
                size: 10,
                sort: None,
            },
            timeout_ms: 30_000,
        }
    }

    #[test]
    fn request_roundtrip() {
        let original = request();
        let decoded = decode_request(&encode_request(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn previous_minor_version_accepted() {
        let mut bytes = encode_request(&request()).unwrap();
        bytes[0] = MIN_WIRE_VERSION;
        assert!(decode_request(&bytes).is_ok());
    }

    #[test]
    fn future_version_rejected() {
        let mut bytes = encode_request(&request()).unwrap();
        bytes[0] = WIRE_VERSION + 1;
        let err = decode_request(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Wire);
    }
}
