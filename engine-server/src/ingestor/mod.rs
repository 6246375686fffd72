//! User-data stream ingestor
//!
//! One long-lived WebSocket per venue key, one consumer. Events are
//! applied in delivery order through a bounded queue: when row writes
//! fall behind, the queue fills and the read loop stops pulling from the
//! socket. Reconnects run a snapshot reconciliation (a status-sync pass)
//! instead of replaying missed events.

pub mod events;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use venue_client::binance::stream::UserStreamEvent;
use venue_client::FuturesVenue;

use crate::config::StreamConfig;
use crate::db::Database;
use crate::sync::SyncScheduler;

const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(600);

/// Shared connection health, surfaced by `GET /websocket/status`.
#[derive(Default)]
pub struct IngestorStatus {
    pub connected: AtomicBool,
    pub reconnect_attempts: AtomicU32,
    pub last_event_ms: AtomicI64,
    pub events_applied: AtomicI64,
}

impl IngestorStatus {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "connected": self.connected.load(Ordering::Relaxed),
            "reconnect_attempts": self.reconnect_attempts.load(Ordering::Relaxed),
            "last_event_ms": self.last_event_ms.load(Ordering::Relaxed),
            "events_applied": self.events_applied.load(Ordering::Relaxed),
        })
    }
}

enum SessionEnd {
    /// Venue-enforced 24 h lifetime reached; reconnect without penalty.
    Rotation,
    Disconnected(String),
}

pub struct EventIngestor {
    db: Arc<Database>,
    venue: Arc<dyn FuturesVenue>,
    scheduler: Arc<SyncScheduler>,
    config: StreamConfig,
    status: Arc<IngestorStatus>,
}

impl EventIngestor {
    pub fn new(
        db: Arc<Database>,
        venue: Arc<dyn FuturesVenue>,
        scheduler: Arc<SyncScheduler>,
        config: StreamConfig,
    ) -> Self {
        Self {
            db,
            venue,
            scheduler,
            config,
            status: Arc::new(IngestorStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<IngestorStatus> {
        self.status.clone()
    }

    /// Connection supervisor: runs until the reconnect budget is spent.
    pub async fn run(self) -> Result<()> {
        let mut attempts: u32 = 0;
        loop {
            match self.run_session().await {
                Ok(SessionEnd::Rotation) => {
                    info!("user-data stream rotated after venue lifetime limit");
                    attempts = 0;
                }
                Ok(SessionEnd::Disconnected(reason)) => {
                    warn!(%reason, "user-data stream disconnected");
                    attempts += 1;
                }
                Err(err) => {
                    warn!(?err, "user-data stream session error");
                    attempts += 1;
                }
            }
            self.status.connected.store(false, Ordering::Relaxed);
            self.status
                .reconnect_attempts
                .store(attempts, Ordering::Relaxed);
            if attempts > self.config.max_reconnect_attempts {
                return Err(anyhow!("user-data stream exhausted reconnect budget"));
            }

            if attempts > 0 {
                // 2, 4, 8, ... capped at 600 s, with jitter.
                let base = Duration::from_secs(2u64.saturating_pow(attempts.min(16)))
                    .min(RECONNECT_BACKOFF_CAP);
                let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
                info!(delay_secs = base.as_secs(), attempts, "reconnecting user-data stream");
                tokio::time::sleep(base + jitter).await;
            }

            // Snapshot reconciliation instead of event replay.
            self.scheduler.trigger("status").await;
        }
    }

    async fn run_session(&self) -> Result<SessionEnd> {
        let listen_key = self.venue.start_user_data_stream().await?;
        let url = self.venue.user_stream_url(&listen_key);
        let (ws_stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();
        info!("user-data stream connected");
        self.status.connected.store(true, Ordering::Relaxed);
        self.status.reconnect_attempts.store(0, Ordering::Relaxed);

        // Single consumer behind a bounded queue: delivery order is
        // preserved and a full queue back-pressures the socket reads.
        let (event_tx, mut event_rx) = mpsc::channel::<UserStreamEvent>(self.config.queue_high_water_mark);
        let db = self.db.clone();
        let status = self.status.clone();
        let platform = self.venue.venue_name().to_string();
        let writer = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let result = match &event {
                    UserStreamEvent::OrderTradeUpdate(update) => {
                        events::apply_order_update(&db, &update.order).await
                    }
                    UserStreamEvent::AccountUpdate(update) => {
                        events::apply_account_update(&db, &platform, update).await
                    }
                    UserStreamEvent::ListenKeyExpired(_) => Ok(()),
                    UserStreamEvent::TradeLite(_) | UserStreamEvent::MarginCall(_) => Ok(()),
                };
                match result {
                    Ok(()) => {
                        status.events_applied.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => error!(?err, "event application failed"),
                }
            }
        });

        let mut keepalive = tokio::time::interval(Duration::from_secs(
            self.config.keepalive_interval_secs.max(1),
        ));
        keepalive.tick().await;
        let mut ping = tokio::time::interval(Duration::from_secs(self.config.ping_interval_secs.max(1)));
        ping.tick().await;
        let mut liveness = tokio::time::interval(Duration::from_secs(10));
        let pong_timeout = Duration::from_secs(self.config.pong_timeout_secs);
        let rotate_after = Duration::from_secs(self.config.rotate_after_secs);
        let connected_at = Instant::now();
        let mut last_pong = Instant::now();

        let end = loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if let Err(err) = self.venue.keepalive_user_data_stream().await {
                        warn!(?err, "listen-key keepalive failed");
                    }
                }
                _ = ping.tick() => {
                    if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break SessionEnd::Disconnected("ping write failed".into());
                    }
                }
                _ = liveness.tick() => {
                    if last_pong.elapsed() > pong_timeout {
                        break SessionEnd::Disconnected("pong timeout".into());
                    }
                    if connected_at.elapsed() > rotate_after {
                        break SessionEnd::Rotation;
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.status
                            .last_event_ms
                            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
                        match serde_json::from_str::<UserStreamEvent>(&text) {
                            Ok(UserStreamEvent::ListenKeyExpired(_)) => {
                                break SessionEnd::Disconnected("listen key expired".into());
                            }
                            Ok(event) => {
                                // Blocks when the persistence queue is full.
                                if event_tx.send(event).await.is_err() {
                                    break SessionEnd::Disconnected("event writer gone".into());
                                }
                            }
                            Err(err) => debug!(?err, %text, "unparsed stream message"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break SessionEnd::Disconnected(format!("closed by venue: {frame:?}"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        break SessionEnd::Disconnected(format!("socket error: {err}"));
                    }
                    None => {
                        break SessionEnd::Disconnected("stream ended".into());
                    }
                }
            }
        };

        // Connection-boundary cancellation: let in-flight row updates
        // finish before returning.
        drop(event_tx);
        let _ = writer.await;
        let _ = self.venue.close_user_data_stream().await;
        Ok(end)
    }
}
