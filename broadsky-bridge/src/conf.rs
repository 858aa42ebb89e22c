use envconfig::Envconfig;

use crate::{codec::Codec, error::BridgeError};

pub const SUBSCRIBE_REPOS_PATH: &str = "/xrpc/com.atproto.sync.subscribeRepos";
pub const DEFAULT_SUBJECT: &str = "broadsky.stream.test";
pub const DEFAULT_METRICS_LISTEN: &str = "127.0.0.1:5212";

#[derive(Envconfig, Clone, Debug)]
pub struct BridgeConfig {
    /// Either "json" or "plain"/"text".
    #[envconfig(from = "BROADSKY_LOG_FORMAT")]
    pub log_format: Option<String>,
    /// Decoded events buffered between the websocket reader and the
    /// dispatcher.
    #[envconfig(from = "BROADSKY_QUEUE_CAPACITY", default = "1024")]
    pub queue_capacity: usize,
    #[envconfig(from = "BROADSKY_UPSTREAM_CLOSE_TIMEOUT_MS", default = "5000")]
    pub upstream_close_timeout_ms: u64,
    /// Upper bound for the websocket dial including the upgrade handshake.
    #[envconfig(from = "BROADSKY_CONNECT_TIMEOUT_MS", default = "45000")]
    pub connect_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_format: None,
            queue_capacity: 1024,
            upstream_close_timeout_ms: 5000,
            connect_timeout_ms: 45000,
        }
    }
}

impl BridgeConfig {
    pub fn json_logs(&self) -> bool {
        matches!(
            self.log_format.as_deref().map(|s| s.to_ascii_lowercase()),
            Some(ref v) if v == "json" || v == "structured"
        )
    }
}

/// Where a session reads from and publishes to. Fixed for the lifetime of
/// the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTarget {
    pub repo_url: String,
    pub sink: String,
    pub subject: String,
    pub codec: Codec,
    pub debug: bool,
}

impl BridgeTarget {
    pub fn commit_subject(&self) -> String {
        format!("{}.commit", self.subject)
    }
}

/// Turns a user supplied repo address into a subscribeRepos websocket URL.
///
/// `bsky.social` becomes
/// `wss://bsky.social/xrpc/com.atproto.sync.subscribeRepos`, and a cursor is
/// appended as `?cursor=<cursor>`.
pub fn normalize_repo_url(
    repo: &str,
    cursor: Option<&str>,
) -> Result<String, BridgeError> {
    let repo = repo.trim();
    if repo.is_empty() {
        return Err(BridgeError::Config(
            "Please provide repo source, for example: wss://bsky.social".into(),
        ));
    }
    let mut url = repo.to_string();
    if !url.contains("subscribeRepos") {
        let base = url.trim_end_matches('/').len();
        url.truncate(base);
        url.push_str(SUBSCRIBE_REPOS_PATH);
    }
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        url.insert_str(0, "wss://");
    }
    if let Some(cursor) = cursor.map(str::trim).filter(|c| !c.is_empty()) {
        url.push_str("?cursor=");
        url.push_str(cursor);
    }
    Ok(url)
}
