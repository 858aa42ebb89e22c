pub mod cli;
pub mod codec;
pub mod conf;
pub mod dispatch;
mod error;
pub mod firehose;
pub mod metrics;
pub mod model;
pub mod session;
pub mod sink;

use std::sync::Arc;

use broadsky_zenoh::BroadskyZenohConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use codec::Codec;
pub use conf::{BridgeConfig, BridgeTarget, normalize_repo_url};
pub use dispatch::StreamDispatcher;
pub use error::BridgeError;
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use model::{
    Action, CommitEvent, HandleEvent, InfoEvent, RepoOp, StreamEvent,
};
pub use session::{BridgeSession, SessionEnd, SessionReport, SessionState};
pub use sink::{EventSink, ZenohSink};

/// Runs one bridge session until the upstream ends, a fatal error occurs or
/// the process receives SIGINT/SIGTERM.
pub async fn start_bridge(
    target: BridgeTarget,
    metrics_listen: Option<&str>,
    conf: BridgeConfig,
    z_conf: BroadskyZenohConfig,
) -> Result<SessionReport, BridgeError> {
    let token = CancellationToken::new();
    let metrics = Arc::new(MetricsAggregator::new());

    let metrics_server = match metrics_listen {
        Some(listen) => {
            let state = metrics::MetricsState {
                metrics: metrics.clone(),
                repo: Arc::from(target.repo_url.as_str()),
                debug: target.debug,
            };
            Some(metrics::serve_metrics(listen, state, token.child_token()).await?)
        }
        None => None,
    };

    let watcher = tokio::spawn(cancel_on_signal(token.clone()));
    let mut session = BridgeSession::new(target, conf, metrics);
    let result = match session.connect(&z_conf, &token).await {
        Ok(Some((sink, upstream))) => {
            info!("Bridge Started");
            session
                .run(sink, upstream, token.clone(), Box::new(std::io::stdout()))
                .await
        }
        Ok(None) => Ok(SessionReport {
            dispatched: 0,
            dropped: 0,
            end: SessionEnd::Cancelled,
        }),
        Err(e) => Err(e),
    };
    info!("Bridge Exited");

    watcher.abort();
    token.cancel();
    if let Some(server) = metrics_server {
        if let Err(e) = server.await {
            warn!(error = %e, "metrics server task failed");
        }
    }
    result
}

async fn cancel_on_signal(token: CancellationToken) {
    shutdown_signal().await;
    info!("shutdown signal received");
    token.cancel();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
