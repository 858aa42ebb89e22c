use std::{fmt::Display, io::Write, sync::Arc, time::Duration};

use broadsky_zenoh::BroadskyZenohConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    conf::{BridgeConfig, BridgeTarget},
    dispatch::StreamDispatcher,
    error::BridgeError,
    firehose::{FirehoseSource, Upstream, UpstreamMessage},
    metrics::MetricsAggregator,
    sink::{EventSink, ZenohSink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Running,
    Draining,
    Closed,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Running => "running",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested from outside.
    Cancelled,
    /// The upstream went away, with the reason if it was not a clean end.
    StreamEnded(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub dispatched: u64,
    /// Events received from upstream but discarded while draining.
    pub dropped: usize,
    pub end: SessionEnd,
}

/// Owns one upstream connection and one sink for the lifetime of a bridge
/// run: `Connecting -> Running -> Draining -> Closed`.
pub struct BridgeSession {
    target: BridgeTarget,
    conf: BridgeConfig,
    metrics: Arc<MetricsAggregator>,
    state: SessionState,
}

impl BridgeSession {
    pub fn new(
        target: BridgeTarget,
        conf: BridgeConfig,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            target,
            conf,
            metrics,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &BridgeTarget {
        &self.target
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, "session state");
        self.state = next;
    }

    /// Opens the sink first, then the upstream. Any failure closes the
    /// session. Returns `Ok(None)` when `token` fires before both are open.
    pub async fn connect(
        &mut self,
        z_conf: &BroadskyZenohConfig,
        token: &CancellationToken,
    ) -> Result<Option<(ZenohSink, Upstream)>, BridgeError> {
        let sink_addr = self.target.sink.clone();
        let dialed = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            res = ZenohSink::connect(&sink_addr, z_conf) => Some(res),
        };
        let sink = match dialed {
            Some(Ok(sink)) => sink,
            Some(Err(e)) => {
                self.transition(SessionState::Closed);
                return Err(e);
            }
            None => {
                info!("cancelled while dialing zenoh");
                self.transition(SessionState::Closed);
                return Ok(None);
            }
        };
        info!("zenoh connected, using base subject: {}", self.target.subject);

        let repo_url = self.target.repo_url.clone();
        let dialed = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            res = FirehoseSource::connect(
                &repo_url,
                self.conf.queue_capacity,
                Duration::from_millis(self.conf.connect_timeout_ms),
            ) => Some(res),
        };
        match dialed {
            Some(Ok(upstream)) => Ok(Some((
                sink,
                upstream.with_close_timeout(Duration::from_millis(
                    self.conf.upstream_close_timeout_ms,
                )),
            ))),
            Some(Err(e)) => {
                close_sink(&sink).await;
                self.transition(SessionState::Closed);
                Err(e)
            }
            None => {
                info!("cancelled while dialing upstream");
                close_sink(&sink).await;
                self.transition(SessionState::Closed);
                Ok(None)
            }
        }
    }

    /// Pumps upstream events through the dispatcher until the stream ends,
    /// `token` is cancelled, or a callback fails, then drains and closes.
    ///
    /// Cancellation is only observed between events.
    pub async fn run<S: EventSink>(
        &mut self,
        sink: S,
        mut upstream: Upstream,
        token: CancellationToken,
        echo: Box<dyn Write + Send>,
    ) -> Result<SessionReport, BridgeError> {
        let mut dispatcher =
            StreamDispatcher::new(&self.target, sink, self.metrics.clone(), echo);
        self.transition(SessionState::Running);

        let mut dispatched = 0u64;
        let outcome = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break Ok(SessionEnd::Cancelled),
                msg = upstream.recv() => match msg {
                    Some(UpstreamMessage::Event(evt)) => {
                        let kind = evt.kind();
                        if let Err(e) = dispatcher.dispatch(evt).await {
                            error!(kind, error = %e, "dispatch failed, stopping stream");
                            break Err(e);
                        }
                        dispatched += 1;
                    }
                    Some(UpstreamMessage::Ended(reason)) => {
                        break Ok(SessionEnd::StreamEnded(reason));
                    }
                    None => break Ok(SessionEnd::StreamEnded(None)),
                }
            }
        };

        self.transition(SessionState::Draining);
        let dropped = upstream.close().await;
        if dropped > 0 {
            let reason = match &outcome {
                Ok(SessionEnd::Cancelled) => "cancelled",
                Ok(SessionEnd::StreamEnded(_)) => "stream ended",
                Err(_) => "dispatch failed",
            };
            warn!(dropped, reason, "discarding undispatched upstream events");
        }
        close_sink(&dispatcher.into_sink()).await;
        self.transition(SessionState::Closed);

        let end = outcome?;
        Ok(SessionReport {
            dispatched,
            dropped,
            end,
        })
    }
}

async fn close_sink<S: EventSink>(sink: &S) {
    if let Err(e) = sink.close().await {
        warn!(error = %e, "sink close failed");
    }
}
