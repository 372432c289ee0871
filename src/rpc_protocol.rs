//! Wire events exchanged with the backend.
//!
//! Every event is a single JSON object terminated by `\n`:
//!
//! ```text
//! {"v":1,"id":7,"name":"hello","args":["RPC"]}      shell   -> backend
//! {"v":1,"id":7,"name":"OK","args":["RPC"]}         backend -> shell
//! ```
//!
//! Replies are named `OK`, `STREAM`, `STREAM_DONE` or `ERR` and carry the id
//! of the request they answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) const PROTOCOL_VERSION: u32 = 1;

pub(crate) const REPLY_OK: &str = "OK";
pub(crate) const REPLY_STREAM: &str = "STREAM";
pub(crate) const REPLY_STREAM_DONE: &str = "STREAM_DONE";
pub(crate) const REPLY_ERR: &str = "ERR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WireEvent {
    pub(crate) v: u32,
    pub(crate) id: u64,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) args: Vec<Value>,
}

impl WireEvent {
    pub(crate) fn request(id: u64, procedure: &str, args: Vec<Value>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            id,
            name: procedure.to_string(),
            args,
        }
    }

    #[cfg(test)]
    pub(crate) fn reply(id: u64, name: &str, args: Vec<Value>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            id,
            name: name.to_string(),
            args,
        }
    }
}

/// A successful reply: the response value and whether more chunks follow.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reply {
    pub(crate) value: Value,
    pub(crate) more: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReplyOutcome {
    Success(Reply),
    RemoteError { name: String, message: String },
}

pub(crate) fn encode_event(event: &WireEvent) -> Result<Vec<u8>, String> {
    let mut line = serde_json::to_vec(event)
        .map_err(|error| format!("Failed to encode rpc event: {error}"))?;
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
pub(crate) fn decode_event(line: &str) -> Result<WireEvent, String> {
    let raw: Value = serde_json::from_str(line.trim())
        .map_err(|error| format!("Failed to decode rpc event: {error}"))?;
    decode_event_value(raw)
}

/// Id of an event that may not decode as a whole.
pub(crate) fn event_id(raw: &Value) -> Option<u64> {
    raw.get("id").and_then(Value::as_u64)
}

pub(crate) fn decode_event_value(raw: Value) -> Result<WireEvent, String> {
    let event: WireEvent = serde_json::from_value(raw)
        .map_err(|error| format!("Failed to decode rpc event: {error}"))?;
    if event.v != PROTOCOL_VERSION {
        return Err(format!(
            "Unsupported rpc protocol version {} (expected {PROTOCOL_VERSION})",
            event.v
        ));
    }
    Ok(event)
}

pub(crate) fn classify_reply(event: WireEvent) -> Result<ReplyOutcome, String> {
    let mut args = event.args.into_iter();
    match event.name.as_str() {
        REPLY_OK => Ok(ReplyOutcome::Success(Reply {
            value: args.next().unwrap_or(Value::Null),
            more: false,
        })),
        REPLY_STREAM => Ok(ReplyOutcome::Success(Reply {
            value: args.next().unwrap_or(Value::Null),
            more: true,
        })),
        REPLY_STREAM_DONE => Ok(ReplyOutcome::Success(Reply {
            value: Value::Null,
            more: false,
        })),
        REPLY_ERR => {
            let name = args
                .next()
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_else(|| "RemoteError".to_string());
            let message = args
                .next()
                .map(|value| match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                })
                .unwrap_or_default();
            Ok(ReplyOutcome::RemoteError { name, message })
        }
        other => Err(format!("Unexpected rpc reply event '{other}'")),
    }
}
