//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Counters mirrored to Prometheus, with their snapshot accessors
const COUNTERS: &[(&str, &str, fn(&MetricsSnapshot) -> u64)] = &[
    ("connmgr_connections_total", "Connections added to a manager", |s| s.connections_total),
    ("connmgr_connections_removed", "Connections removed from a manager", |s| s.connections_removed),
    ("connmgr_connections_dropped", "Connections force-closed on shutdown", |s| s.connections_dropped),
    ("connmgr_connections_failed", "Failed connection attempts", |s| s.connections_failed),
    ("connmgr_timeouts_scheduled", "Idle timeouts armed or refreshed", |s| s.timeouts_scheduled),
    ("connmgr_timeouts_expired", "Idle timeouts that fired", |s| s.timeouts_expired),
    ("connmgr_drain_batches", "Drain batches processed", |s| s.drain_batches),
    ("connmgr_drain_notified", "Connections notified of pending shutdown", |s| s.drain_notified),
    ("connmgr_drain_idle_closed", "Idle connections closed while draining", |s| s.drain_idle_closed),
    ("connmgr_drain_busy_kept", "Busy connections left to close once idle", |s| s.drain_busy_kept),
    ("connmgr_streams_opened", "Total streams opened", |s| s.streams_opened),
    ("connmgr_streams_closed", "Total streams closed", |s| s.streams_closed),
    ("connmgr_bytes_echoed", "Total bytes echoed", |s| s.bytes_echoed),
    ("connmgr_errors_total", "Total errors", |s| s.errors_total),
];

/// Initialize the Prometheus metrics exporter
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    for (name, help, _) in COUNTERS {
        describe_counter!(*name, *help);
    }
    describe_gauge!("connmgr_connections_active", "Currently managed connections");

    // Build and install the Prometheus exporter
    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    // Start background task to sync atomic counters to metrics crate
    tokio::spawn(sync_metrics_task());

    Ok(())
}

/// Background task that periodically syncs our atomic counters to the metrics crate
async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));

    let mut last_snapshot = METRICS.snapshot();

    loop {
        interval.tick().await;

        let snapshot = METRICS.snapshot();

        // Update counters with deltas
        for (name, _, read) in COUNTERS {
            let delta = read(&snapshot).saturating_sub(read(&last_snapshot));
            if delta > 0 {
                counter!(*name).increment(delta);
            }
        }

        gauge!("connmgr_connections_active").set(snapshot.connections_active as f64);

        last_snapshot = snapshot;
    }
}
