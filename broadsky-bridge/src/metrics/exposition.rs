use std::fmt::Write;

use super::MetricsSnapshot;

const BSKY_NAMESPACE: &str = "app.bsky.";

/// Returns the record type below the `app.bsky.` namespace, e.g.
/// `feed.post` for `app.bsky.feed.post`.
pub fn split_bsky_type(collection: &str) -> Option<&str> {
    let rest = collection.strip_prefix(BSKY_NAMESPACE)?;
    let record_type = rest.split('/').next().unwrap_or_default();
    if record_type.is_empty() {
        None
    } else {
        Some(record_type)
    }
}

/// Renders a snapshot as plain text exposition lines.
///
/// Keys outside the `app.bsky.` namespace are still part of the total line
/// but get no line of their own.
pub fn render_exposition(snapshot: &MetricsSnapshot, repo: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "broadsky_bridge_events_total{{server=\"nil\",repo=\"{repo}\"}} {}",
        snapshot.total
    );
    for (key, n) in &snapshot.counts {
        let Some(record_type) = split_bsky_type(&key.collection) else {
            tracing::trace!(collection = %key.collection, "skip unrendered key");
            continue;
        };
        let _ = writeln!(
            out,
            "broadsky_bridge_events{{server=\"nil\",repo=\"{repo}\",action=\"{}\",type=\"{record_type}\"}} {n}",
            key.action
        );
    }
    out
}
