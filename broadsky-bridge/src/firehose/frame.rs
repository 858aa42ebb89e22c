//! Event stream frame decoding.
//!
//! A frame is a binary websocket message holding two CBOR values back to
//! back: a header `{op, t}` and a body whose shape depends on `t`.

use std::io::Cursor;

use bytes::Bytes;
use serde::Deserialize;

use crate::model::{
    Action, CommitEvent, HandleEvent, InfoEvent, RepoOp, StreamEvent,
};

const OP_MESSAGE: i64 = 1;
const OP_ERROR: i64 = -1;

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("cbor decode error: {0}")]
    Cbor(String),
    #[error("upstream error frame: {error}: {}", .message.as_deref().unwrap_or(""))]
    ErrorFrame {
        error: String,
        message: Option<String>,
    },
    #[error("unknown frame op {0}")]
    UnknownOp(i64),
    #[error("malformed {kind} frame: {reason}")]
    Malformed { kind: String, reason: String },
}

impl From<ciborium::de::Error<std::io::Error>> for FrameError {
    fn from(value: ciborium::de::Error<std::io::Error>) -> Self {
        FrameError::Cbor(value.to_string())
    }
}

#[derive(Deserialize)]
struct FrameHeader {
    op: i64,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct WireOp {
    action: String,
    path: String,
    /// CID link, null for deletes.
    #[serde(default)]
    cid: Option<Bytes>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCommit {
    seq: i64,
    #[serde(default)]
    rebase: bool,
    #[serde(default)]
    too_big: bool,
    repo: String,
    #[serde(default)]
    commit: Option<Bytes>,
    #[serde(default)]
    rev: Option<String>,
    #[serde(default)]
    since: Option<String>,
    #[serde(default)]
    blocks: Bytes,
    #[serde(default)]
    ops: Vec<WireOp>,
    #[serde(default)]
    blobs: Vec<Bytes>,
    #[serde(default)]
    time: String,
}

#[derive(Deserialize)]
struct WireHandle {
    seq: i64,
    did: String,
    handle: String,
    #[serde(default)]
    time: String,
}

/// Renders a tag-42 CID link as its multibase string form.
///
/// Links carry a leading `0x00` multibase identity prefix before the binary
/// CID.
pub fn cid_link_to_string(link: &[u8]) -> Option<String> {
    let raw = link.strip_prefix(&[0x00]).unwrap_or(link);
    cid::Cid::try_from(raw).ok().map(|c| c.to_string())
}

fn convert_commit(wire: WireCommit) -> Result<CommitEvent, FrameError> {
    let mut ops = Vec::with_capacity(wire.ops.len());
    for op in wire.ops {
        let action = op.action.parse::<Action>().map_err(|e| {
            FrameError::Malformed {
                kind: "#commit".into(),
                reason: e.to_string(),
            }
        })?;
        ops.push(RepoOp {
            action,
            path: op.path,
            cid: op.cid.as_deref().and_then(cid_link_to_string),
        });
    }
    Ok(CommitEvent {
        seq: wire.seq,
        rebase: wire.rebase,
        too_big: wire.too_big,
        repo: wire.repo,
        commit: wire.commit.as_deref().and_then(cid_link_to_string),
        rev: wire.rev,
        since: wire.since,
        blocks: wire.blocks,
        ops,
        blobs: wire
            .blobs
            .iter()
            .filter_map(|b| cid_link_to_string(b))
            .collect(),
        time: wire.time,
    })
}

/// Decodes one frame. Message types the bridge does not forward
/// (`#identity`, `#account`, ...) decode to `Ok(None)`.
pub fn decode_frame(data: &[u8]) -> Result<Option<StreamEvent>, FrameError> {
    let mut reader = Cursor::new(data);
    let header: FrameHeader = ciborium::from_reader(&mut reader)?;
    match header.op {
        OP_ERROR => {
            let body: ErrorBody = ciborium::from_reader(&mut reader)?;
            Err(FrameError::ErrorFrame {
                error: body.error,
                message: body.message,
            })
        }
        OP_MESSAGE => match header.t.as_deref() {
            Some("#commit") => {
                let wire: WireCommit = ciborium::from_reader(&mut reader)?;
                Ok(Some(StreamEvent::Commit(convert_commit(wire)?)))
            }
            Some("#handle") => {
                let wire: WireHandle = ciborium::from_reader(&mut reader)?;
                Ok(Some(StreamEvent::Handle(HandleEvent {
                    seq: wire.seq,
                    did: wire.did,
                    handle: wire.handle,
                    time: wire.time,
                })))
            }
            Some("#info") => {
                let info: InfoEvent = ciborium::from_reader(&mut reader)?;
                Ok(Some(StreamEvent::Info(info)))
            }
            Some(other) => {
                tracing::trace!(t = other, "skip unhandled frame type");
                Ok(None)
            }
            None => Err(FrameError::Malformed {
                kind: "message".into(),
                reason: "missing `t` in header".into(),
            }),
        },
        other => Err(FrameError::UnknownOp(other)),
    }
}
