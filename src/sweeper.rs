use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::now_ms;

/// One reminder pass. Returns how many reminders went out.
pub async fn sweep_reminders(engine: &Engine, now: i64) -> usize {
    let mut sent = 0;
    for id in engine.due_reminders(now) {
        match engine.send_reminder(id, now).await {
            Ok(true) => sent += 1,
            Ok(false) => debug!(appointment_id = %id, "reminder no longer due"),
            Err(e) => warn!(appointment_id = %id, error = %e, "reminder failed"),
        }
    }
    sent
}

/// Periodically remind clients and stylists of appointments about a day out.
pub async fn run_reminders(engine: Arc<Engine>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(engine.policy().reminder_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let sent = sweep_reminders(&engine, now_ms()).await;
                if sent > 0 {
                    info!(sent, "reminder sweep");
                }
            }
        }
    }
    debug!("reminder sweeper stopped");
}

/// Compact the WAL whenever appends since the last compaction reach `threshold`.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let appends = engine.wal_appends_since_compact().await;
                if appends >= threshold
                    && let Err(e) = engine.compact_wal().await
                {
                    warn!(error = %e, appends, "WAL compaction failed");
                }
            }
        }
    }
    debug!("compactor stopped");
}
