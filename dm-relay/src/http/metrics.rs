//! Prometheus metrics endpoint.

use crate::server::{DmRelay, RelayMetrics};
use crate::storage::StoreStats;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<DmRelay>>) -> impl IntoResponse {
    // Storage stats (best effort)
    let stats = relay.stats().await.unwrap_or_default();
    let body = render(
        relay.metrics(),
        relay.online_users(),
        relay.total_subscriptions(),
        &stats,
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn render(m: &RelayMetrics, online_users: usize, subscriptions: usize, stats: &StoreStats) -> String {
    let gauges: [(&str, &str, u64); 5] = [
        ("online_users", "Users with an open feed subscription", online_users as u64),
        ("subscriptions", "Open feed subscriptions", subscriptions as u64),
        ("store_messages", "Messages currently in database", stats.messages),
        ("store_unread", "Messages not yet read by their receiver", stats.unread),
        ("store_profiles", "Registered profiles", stats.profiles),
    ];
    let counters: [(&str, &str, &std::sync::atomic::AtomicU64); 8] = [
        ("messages_sent_total", "Messages stored", &m.messages_sent),
        ("bulk_marks_total", "Bulk mark-read calls", &m.bulk_marks),
        ("single_marks_total", "Single-message mark-read calls", &m.single_marks),
        ("rows_marked_read_total", "Rows moved from unread to read", &m.rows_marked_read),
        ("noop_marks_total", "Mark-read calls that changed nothing", &m.noop_marks),
        ("events_published_total", "Live events published", &m.events_published),
        ("feed_overflows_total", "Publishes that overran a lagging subscriber", &m.feed_overflows),
        ("store_errors_total", "Failed storage operations", &m.store_errors),
    ];

    let mut body = String::new();
    for (name, help, value) in gauges {
        let _ = write!(
            body,
            "# HELP dmsync_relay_{name} {help}\n# TYPE dmsync_relay_{name} gauge\ndmsync_relay_{name} {value}\n\n"
        );
    }
    let _ = write!(
        body,
        "# HELP dmsync_relay_info Server information\n# TYPE dmsync_relay_info gauge\ndmsync_relay_info{{version=\"{}\"}} 1\n\n",
        env!("CARGO_PKG_VERSION")
    );
    for (name, help, counter) in counters {
        let value = counter.load(Ordering::Relaxed);
        let _ = write!(
            body,
            "# HELP dmsync_relay_{name} {help}\n# TYPE dmsync_relay_{name} counter\ndmsync_relay_{name} {value}\n\n"
        );
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_format_is_valid() {
        let metrics = RelayMetrics::default();
        metrics.messages_sent.fetch_add(3, Ordering::Relaxed);
        let stats = StoreStats {
            messages: 3,
            unread: 2,
            profiles: 1,
        };

        let body = render(&metrics, 1, 2, &stats);
        assert!(body.contains("# TYPE dmsync_relay_online_users gauge"));
        assert!(body.contains("dmsync_relay_subscriptions 2\n"));
        assert!(body.contains("dmsync_relay_store_unread 2\n"));
        assert!(body.contains("# TYPE dmsync_relay_messages_sent_total counter"));
        assert!(body.contains("dmsync_relay_messages_sent_total 3\n"));
        assert!(body.contains("dmsync_relay_feed_overflows_total 0\n"));
    }
}
