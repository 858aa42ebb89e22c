#![allow(dead_code)]

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use broadsky_bridge::{
    Action, BridgeError, BridgeTarget, Codec, CommitEvent, EventSink, RepoOp,
    StreamEvent,
};

pub fn target(debug: bool) -> BridgeTarget {
    BridgeTarget {
        repo_url: "wss://bsky.social/xrpc/com.atproto.sync.subscribeRepos"
            .into(),
        sink: broadsky_zenoh::DEFAULT_CONNECT.into(),
        subject: "test.stream".into(),
        codec: Codec::Json,
        debug,
    }
}

pub fn commit(seq: i64, ops: &[(Action, &str)]) -> StreamEvent {
    StreamEvent::Commit(CommitEvent {
        seq,
        repo: format!("did:plc:{seq}"),
        ops: ops
            .iter()
            .map(|(action, path)| RepoOp::new(*action, *path))
            .collect(),
        ..Default::default()
    })
}

/// Keeps every published payload; fails the `fail_at`-th publish (1-based).
#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    pub attempts: Mutex<usize>,
    pub fail_at: Option<usize>,
    /// Fail with `BridgeError::Encode` instead of `BridgeError::Publish`.
    pub fail_encoding: bool,
    pub closed: Mutex<bool>,
}

impl RecordingSink {
    pub fn failing_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            ..Default::default()
        }
    }

    pub fn rejecting_payload_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            fail_encoding: true,
            ..Default::default()
        }
    }

    pub fn subjects(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    pub fn seqs(&self) -> Vec<i64> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| {
                let value: serde_json::Value =
                    serde_json::from_slice(payload).unwrap();
                value["seq"].as_i64().unwrap()
            })
            .collect()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingSink {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
    ) -> Result<(), BridgeError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if self.fail_at == Some(attempt) && self.fail_encoding {
            return Err(BridgeError::Encode("payload rejected".into()));
        }
        if self.fail_at == Some(attempt) {
            return Err(BridgeError::Publish {
                subject: subject.to_string(),
                reason: "broken pipe".into(),
            });
        }
        self.published
            .lock()
            .unwrap()
            .push((subject.to_string(), payload));
        Ok(())
    }

    async fn close(&self) -> Result<(), BridgeError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Cloneable writer for capturing echoed lines.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
