use std::{io::Write, sync::Arc};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    codec::Codec,
    conf::BridgeTarget,
    error::BridgeError,
    metrics::MetricsAggregator,
    model::{CommitEvent, HandleEvent, InfoEvent, StreamEvent},
    sink::EventSink,
};

/// Per-event callbacks for one upstream connection.
///
/// The session feeds events one at a time from a single queue, so the
/// callbacks never run concurrently and commits reach the sink in upstream
/// order. Only encode and publish failures are returned; they stop the
/// session.
pub struct StreamDispatcher<S> {
    sink: S,
    commit_subject: String,
    codec: Codec,
    debug: bool,
    metrics: Arc<MetricsAggregator>,
    echo: Box<dyn Write + Send>,
}

impl<S: EventSink> StreamDispatcher<S> {
    pub fn new(
        target: &BridgeTarget,
        sink: S,
        metrics: Arc<MetricsAggregator>,
        echo: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            sink,
            commit_subject: target.commit_subject(),
            codec: target.codec,
            debug: target.debug,
            metrics,
            echo,
        }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub async fn dispatch(
        &mut self,
        event: StreamEvent,
    ) -> Result<(), BridgeError> {
        match event {
            StreamEvent::Commit(evt) => self.on_commit(&evt).await,
            StreamEvent::Handle(evt) => {
                self.on_handle(&evt);
                Ok(())
            }
            StreamEvent::Info(evt) => {
                self.on_info(&evt);
                Ok(())
            }
        }
    }

    pub async fn on_commit(
        &mut self,
        evt: &CommitEvent,
    ) -> Result<(), BridgeError> {
        let payload = self.codec.encode(evt)?;
        debug!(
            seq = evt.seq,
            repo = %evt.repo,
            ops = evt.ops.len(),
            bytes = payload.len(),
            "publish commit"
        );
        self.sink.publish(&self.commit_subject, payload).await?;
        self.metrics.record(&evt.ops);
        if self.debug {
            match render_commit(evt) {
                Ok(line) => self.emit(&line),
                Err(e) => warn!(seq = evt.seq, error = %e, "cannot render commit"),
            }
        }
        Ok(())
    }

    /// Handle changes are echoed in debug mode and never published.
    pub fn on_handle(&mut self, evt: &HandleEvent) {
        if self.debug {
            self.emit_json(evt);
        }
    }

    /// Info messages are always echoed.
    pub fn on_info(&mut self, evt: &InfoEvent) {
        self.emit_json(evt);
    }

    fn emit_json<T: Serialize>(&mut self, value: &T) {
        match serde_json::to_string(value) {
            Ok(line) => self.emit(&line),
            Err(e) => warn!(error = %e, "cannot render event"),
        }
    }

    fn emit(&mut self, line: &str) {
        if let Err(e) = writeln!(self.echo, "{line}") {
            warn!(error = %e, "echo write failed");
        }
    }
}

/// JSON form of a commit with the raw blocks replaced by their size.
pub fn render_commit(evt: &CommitEvent) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(evt)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "blocks".into(),
            serde_json::Value::String(format!("[{} bytes]", evt.blocks.len())),
        );
    }
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::model::{Action, RepoOp};

    #[test]
    fn rendered_commit_hides_blocks() {
        let evt = CommitEvent {
            seq: 3,
            repo: "did:plc:abc".into(),
            blocks: Bytes::from(vec![0u8; 1234]),
            ops: vec![RepoOp::new(Action::Create, "app.bsky.feed.post/1")],
            ..Default::default()
        };
        let line = render_commit(&evt).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["blocks"], "[1234 bytes]");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["ops"][0]["path"], "app.bsky.feed.post/1");
    }
}
