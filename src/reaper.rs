use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::observability;

/// Background task that expires lapsed booking holds.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let expired = engine.collect_expired_holds(now);
        for (booking_id, _vehicle_id) in expired {
            match engine.expire_booking(booking_id, now).await {
                Ok(()) => {
                    metrics::counter!(observability::HOLDS_EXPIRED_TOTAL).increment(1);
                    info!("expired hold for booking {booking_id}");
                }
                Err(e) => {
                    // The owner may have answered in the meantime
                    tracing::debug!("sweep skip {booking_id}: {e}");
                }
            }
        }
    }
}

/// Background task that rewrites the journal once enough records pile
/// up past the last snapshot.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let records = engine.journal_records_since_snapshot().await;
        if records >= threshold {
            match engine.snapshot_journal().await {
                Ok(()) => info!("journal snapshot after {records} records"),
                Err(e) => tracing::warn!("journal snapshot failed: {e}"),
            }
        }
    }
}
