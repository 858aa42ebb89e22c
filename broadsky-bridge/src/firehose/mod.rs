//! Websocket client for the repo event stream.
//!
//! [`FirehoseSource`] dials the upstream and spawns a reader task that
//! decodes frames and pushes them, in arrival order, into a bounded queue.
//! The session is the single consumer of that queue through [`Upstream`].

mod frame;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use frame::{FrameError, cid_link_to_string, decode_frame};

use crate::{error::BridgeError, model::StreamEvent};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamMessage {
    Event(StreamEvent),
    /// The upstream is gone; `None` for a clean end of stream.
    Ended(Option<String>),
}

/// Receiving half of the upstream queue plus the handle to stop the reader.
pub struct Upstream {
    rx: mpsc::Receiver<UpstreamMessage>,
    shutdown: CancellationToken,
    reader: Option<JoinHandle<()>>,
    close_timeout: Duration,
}

impl Upstream {
    /// Creates a queue without a reader task. Whoever holds the sender
    /// produces the messages.
    pub fn channel(capacity: usize) -> (mpsc::Sender<UpstreamMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                rx,
                shutdown: CancellationToken::new(),
                reader: None,
                close_timeout: Duration::from_secs(5),
            },
        )
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Token the reader watches; cancelled by [`close`](Self::close).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn recv(&mut self) -> Option<UpstreamMessage> {
        self.rx.recv().await
    }

    /// Stops the reader and returns how many received events were never
    /// dispatched.
    pub async fn close(mut self) -> usize {
        self.shutdown.cancel();
        self.rx.close();
        let mut dropped = 0;
        while let Some(msg) = self.rx.recv().await {
            if matches!(msg, UpstreamMessage::Event(_)) {
                dropped += 1;
            }
        }
        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(self.close_timeout, &mut reader)
                .await
                .is_err()
            {
                warn!(
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "upstream reader did not stop in time, aborting"
                );
                reader.abort();
            }
        }
        dropped
    }
}

pub struct FirehoseSource;

impl FirehoseSource {
    /// Dials `url`; the TCP connect and the upgrade handshake together must
    /// finish within `connect_timeout`.
    pub async fn connect(
        url: &str,
        queue_capacity: usize,
        connect_timeout: Duration,
    ) -> Result<Upstream, BridgeError> {
        info!("dialing websocket source: {url}");
        let (ws, _response) =
            tokio::time::timeout(connect_timeout, connect_async(url))
                .await
                .map_err(|_| {
                    BridgeError::connection(
                        format!("ws {url}"),
                        format!(
                            "handshake timed out after {}ms",
                            connect_timeout.as_millis()
                        ),
                    )
                })?
                .map_err(|e| BridgeError::connection(format!("ws {url}"), e))?;
        let (tx, mut upstream) = Upstream::channel(queue_capacity);
        let reader = tokio::spawn(read_frames(
            ws,
            tx,
            upstream.shutdown_token(),
            url.to_string(),
        ));
        upstream.reader = Some(reader);
        Ok(upstream)
    }
}

async fn read_frames(
    ws: WsStream,
    tx: mpsc::Sender<UpstreamMessage>,
    shutdown: CancellationToken,
    url: String,
) {
    let (mut write, mut read) = ws.split();
    let reason = loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Binary(data))) => match decode_frame(&data) {
                    Ok(Some(evt)) => {
                        // waits for queue space, events are never dropped here
                        if tx.send(UpstreamMessage::Event(evt)).await.is_err() {
                            debug!("upstream queue closed, reader exiting");
                            let _ = write.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(url = %url, error = %e, "ending stream on bad frame");
                        break Some(e.to_string());
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(url = %url, "server sent Close frame");
                    break frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "websocket read error");
                    break Some(e.to_string());
                }
                None => {
                    info!(url = %url, "websocket stream ended");
                    break None;
                }
            },
            _ = shutdown.cancelled() => {
                debug!("shutdown signal received in reader");
                let _ = write.send(Message::Close(None)).await;
                return;
            }
        }
    };
    let _ = tx.send(UpstreamMessage::Ended(reason)).await;
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::frame::tests::commit_frame;
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn local_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!(
            "ws://{}/xrpc/com.atproto.sync.subscribeRepos",
            listener.local_addr().unwrap()
        );
        (listener, url)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reader_delivers_frames_in_order_then_ends() {
        let (listener, url) = local_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for seq in 1..=3 {
                let data =
                    commit_frame(seq, &[("create", "app.bsky.feed.post/1")]);
                ws.send(Message::Binary(data.into())).await.unwrap();
            }
            ws.close(None).await.unwrap();
        });

        let mut upstream =
            FirehoseSource::connect(&url, 2, TIMEOUT).await.unwrap();
        let mut seqs = vec![];
        loop {
            match upstream.recv().await {
                Some(UpstreamMessage::Event(StreamEvent::Commit(c))) => {
                    seqs.push(c.seq)
                }
                Some(UpstreamMessage::Ended(_)) | None => break,
                Some(other) => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(upstream.close().await, 0);
        server.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_stops_an_idle_reader() {
        let (listener, url) = local_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // wait for the client Close frame
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let upstream = FirehoseSource::connect(&url, 8, TIMEOUT)
            .await
            .unwrap()
            .with_close_timeout(Duration::from_secs(2));
        let dropped =
            tokio::time::timeout(Duration::from_secs(3), upstream.close())
                .await
                .expect("close did not finish in time");
        assert_eq!(dropped, 0);
        tokio::time::timeout(Duration::from_secs(3), server)
            .await
            .expect("server never saw Close")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_while_queue_is_full_still_sends_close_frame() {
        let (listener, url) = local_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for seq in 1..=3 {
                let data =
                    commit_frame(seq, &[("create", "app.bsky.feed.post/1")]);
                ws.send(Message::Binary(data.into())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    return true;
                }
            }
            false
        });

        let upstream = FirehoseSource::connect(&url, 1, TIMEOUT)
            .await
            .unwrap()
            .with_close_timeout(Duration::from_secs(2));
        // let the reader fill the queue and block on the next send
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(upstream.close().await, 1);
        let saw_close = tokio::time::timeout(Duration::from_secs(3), server)
            .await
            .expect("server never finished")
            .unwrap();
        assert!(saw_close);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn silent_upstream_times_out() {
        let (listener, url) = local_server().await;
        // accepts TCP but never answers the upgrade
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            FirehoseSource::connect(&url, 8, Duration::from_millis(200)),
        )
        .await
        .expect("dial ignored its timeout")
        .err()
        .unwrap();
        match err {
            BridgeError::Connection { reason, .. } => {
                assert!(reason.contains("timed out"), "{reason}")
            }
            other => panic!("unexpected {other:?}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn dial_failure_is_a_connection_error() {
        let (listener, url) = local_server().await;
        drop(listener);
        let err = FirehoseSource::connect(&url, 8, TIMEOUT)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::Connection { .. }));
    }

    #[tokio::test]
    async fn close_counts_undispatched_events() {
        let (tx, upstream) = Upstream::channel(8);
        for _ in 0..3 {
            tx.send(UpstreamMessage::Event(StreamEvent::Info(
                Default::default(),
            )))
            .await
            .unwrap();
        }
        tx.send(UpstreamMessage::Ended(None)).await.unwrap();
        assert_eq!(upstream.close().await, 3);
    }
}
