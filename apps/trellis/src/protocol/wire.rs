use serde::Deserialize;
use serde_json::Value;

use super::{ClientBatch, ServerBatch, WireCall};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("empty message")]
    Empty,
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("malformed invocation #{index}: {reason}")]
    MalformedInvocation { index: usize, reason: String },
}

/// A client batch whose envelope parsed. Invocations that did not parse are
/// reported separately so the rest of the batch can still run.
#[derive(Debug, Default)]
pub struct DecodedClientBatch {
    pub batch: ClientBatch,
    pub malformed: Vec<WireError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClientBatch {
    #[serde(default)]
    csrf_token: Option<String>,
    #[serde(default)]
    client_id: Option<u64>,
    #[serde(default)]
    sync_id: Option<u64>,
    #[serde(default)]
    resynchronize: bool,
    #[serde(default)]
    rpc: Vec<Value>,
}

pub fn decode_client_batch(body: &str) -> Result<DecodedClientBatch, WireError> {
    if body.trim().is_empty() {
        return Err(WireError::Empty);
    }
    let raw: RawClientBatch = serde_json::from_str(body).map_err(|err| WireError::Malformed(err.to_string()))?;

    let mut rpc = Vec::with_capacity(raw.rpc.len());
    let mut malformed = Vec::new();
    for (index, call) in raw.rpc.into_iter().enumerate() {
        match serde_json::from_value::<WireCall>(call) {
            Ok(call) => rpc.push(call),
            Err(err) => malformed.push(WireError::MalformedInvocation {
                index,
                reason: err.to_string(),
            }),
        }
    }

    Ok(DecodedClientBatch {
        batch: ClientBatch {
            csrf_token: raw.csrf_token,
            client_id: raw.client_id,
            sync_id: raw.sync_id,
            resynchronize: raw.resynchronize,
            rpc,
        },
        malformed,
    })
}

pub fn encode_client_batch(batch: &ClientBatch) -> Result<String, WireError> {
    serde_json::to_string(batch).map_err(|err| WireError::Malformed(err.to_string()))
}

pub fn encode_server_batch(batch: &ServerBatch) -> Result<String, WireError> {
    serde_json::to_string(batch).map_err(|err| WireError::Malformed(err.to_string()))
}

pub fn decode_server_batch(body: &str) -> Result<ServerBatch, WireError> {
    if body.trim().is_empty() {
        return Err(WireError::Empty);
    }
    serde_json::from_str(body).map_err(|err| WireError::Malformed(err.to_string()))
}
