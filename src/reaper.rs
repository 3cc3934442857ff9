use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;
use crate::model::now_ms;

/// Background task: expire finished bookings, then sweep non-compliant ones.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reap_once(&engine, now_ms()).await;
    }
}

async fn reap_once(engine: &Engine, now: i64) {
    let expired = engine.expire_finished(now).await;
    if expired > 0 {
        info!("expired {expired} finished bookings");
    }
    let report = engine.sweep_non_compliant(now).await;
    if report.any_cancelled() {
        info!("sweep cancelled {} non-compliant bookings", report.cancelled.len());
    }
    if !report.failed.is_empty() {
        warn!("sweep left {} bookings uncancelled", report.failed.len());
    }
}

/// Background task: compact the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
