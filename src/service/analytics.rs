// service/analytics.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::db::db::DBClient;

/// Analytics batching worker
///
/// Events are pushed through an explicit handle held in `AppState` and
/// flushed to Postgres in batches, either when the buffer fills or on a
/// fixed interval. On shutdown the channel is drained and the final batch
/// flushed, so a restart does not silently drop buffered events. When the
/// channel is full the event is shed with a warning; request handlers are
/// never blocked on analytics.

const DEFAULT_QUEUE_CAPACITY: usize = 4096;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_type: String,
    pub dealership_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn now(event_type: impl Into<String>, dealership_id: Option<Uuid>) -> Self {
        Self {
            event_type: event_type.into(),
            dealership_id,
            session_id: None,
            metadata: None,
            occurred_at: Utc::now(),
        }
    }
}

/// Cheap cloneable producer side, handed to handlers via AppState.
#[derive(Debug, Clone)]
pub struct AnalyticsHandle {
    tx: mpsc::Sender<AnalyticsEvent>,
}

impl AnalyticsHandle {
    /// Non-blocking enqueue; sheds the event if the queue is full.
    pub fn track(&self, event: AnalyticsEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!("AnalyticsTracker: queue full, dropping event: {}", e);
        }
    }
}

pub struct AnalyticsTracker {
    db_client: Arc<DBClient>,
    rx: mpsc::Receiver<AnalyticsEvent>,
    batch_size: usize,
    flush_interval: Duration,
}

impl AnalyticsTracker {
    pub fn new(db_client: Arc<DBClient>) -> (AnalyticsHandle, Self) {
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        (
            AnalyticsHandle { tx },
            Self {
                db_client,
                rx,
                batch_size: DEFAULT_BATCH_SIZE,
                flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            },
        )
    }

    /// Run the worker loop until the provided shutdown signal triggers,
    /// then drain whatever is left and flush it.
    pub async fn run(mut self, shutdown: impl std::future::Future<Output = ()>) {
        let mut shutdown = Box::pin(shutdown);
        let mut ticker = interval(self.flush_interval);
        let mut buffer: Vec<AnalyticsEvent> = Vec::with_capacity(self.batch_size);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("AnalyticsTracker: shutdown requested, draining queue");
                    self.rx.close();
                    while let Ok(event) = self.rx.try_recv() {
                        buffer.push(event);
                    }
                    self.flush(&mut buffer).await;
                    break;
                }
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            buffer.push(event);
                            if buffer.len() >= self.batch_size {
                                self.flush(&mut buffer).await;
                            }
                        }
                        None => {
                            self.flush(&mut buffer).await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut buffer).await;
                }
            }
        }

        tracing::info!("AnalyticsTracker: stopped");
    }

    async fn flush(&self, buffer: &mut Vec<AnalyticsEvent>) {
        if buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(buffer);
        let count = batch.len();

        let mut event_types = Vec::with_capacity(count);
        let mut dealership_ids = Vec::with_capacity(count);
        let mut session_ids = Vec::with_capacity(count);
        let mut metadatas = Vec::with_capacity(count);
        let mut occurred_ats = Vec::with_capacity(count);
        for event in &batch {
            event_types.push(event.event_type.clone());
            dealership_ids.push(event.dealership_id);
            session_ids.push(event.session_id.clone());
            metadatas.push(event.metadata.clone());
            occurred_ats.push(event.occurred_at);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO analytics_events (event_type, dealership_id, session_id, metadata, occurred_at)
            SELECT * FROM UNNEST($1::text[], $2::uuid[], $3::text[], $4::jsonb[], $5::timestamptz[])
            "#,
        )
        .bind(&event_types)
        .bind(&dealership_ids)
        .bind(&session_ids)
        .bind(&metadatas)
        .bind(&occurred_ats)
        .execute(&self.db_client.pool)
        .await;

        match result {
            Ok(_) => tracing::debug!("AnalyticsTracker: flushed {} events", count),
            Err(e) => {
                // Put the batch back and retry on the next tick; cap the
                // buffer so a long outage cannot grow it without bound.
                tracing::error!("AnalyticsTracker: flush of {} events failed: {}", count, e);
                buffer.extend(batch);
                let cap = self.batch_size * 10;
                if buffer.len() > cap {
                    let dropped = buffer.len() - cap;
                    buffer.drain(..dropped);
                    tracing::warn!("AnalyticsTracker: dropped {} oldest events after repeated flush failures", dropped);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_client() -> Arc<DBClient> {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/carsna_test")
            .unwrap();
        Arc::new(DBClient::new(pool))
    }

    #[tokio::test]
    async fn track_is_nonblocking_and_sheds_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = AnalyticsHandle { tx };

        handle.track(AnalyticsEvent::now("webhook_processed", None));
        // Second send exceeds capacity; must not block or panic
        handle.track(AnalyticsEvent::now("webhook_processed", None));
    }

    #[tokio::test]
    async fn worker_exits_when_all_handles_dropped() {
        let (handle, tracker) = AnalyticsTracker::new(lazy_client());
        drop(handle);

        // Closed channel with an empty buffer: the worker must terminate
        tracker.run(std::future::pending::<()>()).await;
    }

    #[tokio::test]
    async fn worker_exits_when_shutdown_fires_first() {
        let (_handle, tracker) = AnalyticsTracker::new(lazy_client());
        tracker.run(std::future::ready(())).await;
    }
}
