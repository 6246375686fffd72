//! Periodic synchronizer
//!
//! Five idempotent reconciliation loops on independent cadences. Each
//! loop has a single-flight guard so an overlapping tick (or a manual
//! trigger racing the schedule) never runs twice concurrently, and a
//! failure is logged on the loop's status instead of tearing down the
//! scheduler.

mod audit;
mod balances;
mod orphans;
mod pnl;
mod status;

pub use audit::PositionAudit;
pub use balances::BalanceSync;
pub use orphans::OrphanCleanup;
pub use pnl::PnlBackfill;
pub use status::StatusSync;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info};

use venue_client::FuturesVenue;

use crate::config::SchedulerConfig;
use crate::db::Database;

#[async_trait]
pub trait SyncTask: Send + Sync + 'static {
    async fn run(&self) -> Result<()>;
}

pub struct SyncLoop {
    name: &'static str,
    interval: Duration,
    task: Arc<dyn SyncTask>,
    running: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
    last_run_ms: AtomicI64,
    last_error: Mutex<Option<String>>,
}

impl SyncLoop {
    fn new(name: &'static str, interval: Duration, task: Arc<dyn SyncTask>) -> Arc<Self> {
        Arc::new(Self {
            name,
            interval,
            task,
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_run_ms: AtomicI64::new(0),
            last_error: Mutex::new(None),
        })
    }

    /// Run once under the single-flight guard. Returns false when a run
    /// was already in flight.
    async fn run_once(self: &Arc<Self>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let result = self.task.run().await;
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.last_run_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
        match result {
            Ok(()) => {
                *self.last_error.lock().await = None;
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(loop_name = self.name, ?err, "sync loop run failed");
                *self.last_error.lock().await = Some(err.to_string());
            }
        }
        self.running.store(false, Ordering::Release);
        true
    }

    async fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "interval_secs": self.interval.as_secs(),
            "running": self.running.load(Ordering::Relaxed),
            "runs": self.runs.load(Ordering::Relaxed),
            "failures": self.failures.load(Ordering::Relaxed),
            "last_run_ms": self.last_run_ms.load(Ordering::Relaxed),
            "last_error": *self.last_error.lock().await,
        })
    }
}

pub struct SyncScheduler {
    loops: Vec<Arc<SyncLoop>>,
}

impl SyncScheduler {
    pub fn new(
        db: Arc<Database>,
        venue: Arc<dyn FuturesVenue>,
        config: &SchedulerConfig,
    ) -> Arc<Self> {
        let loops = vec![
            SyncLoop::new(
                "status",
                Duration::from_secs(config.status_sync_interval_secs),
                Arc::new(StatusSync::new(
                    db.clone(),
                    venue.clone(),
                    config.status_sync_max_age_hours,
                )),
            ),
            SyncLoop::new(
                "pnl",
                Duration::from_secs(config.pnl_backfill_interval_secs),
                Arc::new(PnlBackfill::new(db.clone(), venue.clone())),
            ),
            SyncLoop::new(
                "orphans",
                Duration::from_secs(config.orphan_cleanup_interval_secs),
                Arc::new(OrphanCleanup::new(db.clone(), venue.clone())),
            ),
            SyncLoop::new(
                "balances",
                Duration::from_secs(config.balance_sync_interval_secs),
                Arc::new(BalanceSync::new(db.clone(), venue.clone())),
            ),
            SyncLoop::new(
                "audit",
                Duration::from_secs(config.audit_interval_secs),
                Arc::new(PositionAudit::new(
                    db.clone(),
                    venue,
                    config.audit_confidence_threshold,
                    config.audit_create_synthetic,
                )),
            ),
        ];
        Arc::new(Self { loops })
    }

    /// Spawn one interval task per loop.
    pub fn spawn_all(self: &Arc<Self>) {
        for sync_loop in &self.loops {
            info!(loop_name = sync_loop.name, interval_secs = sync_loop.interval.as_secs(), "sync loop scheduled");
            let sync_loop = sync_loop.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(sync_loop.interval);
                // The immediate first tick would race startup; skip it.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    sync_loop.run_once().await;
                }
            });
        }
    }

    /// Manual trigger; a no-op when the loop is mid-run or unknown.
    pub async fn trigger(&self, name: &str) -> bool {
        match self.loops.iter().find(|l| l.name == name) {
            Some(sync_loop) => sync_loop.run_once().await,
            None => false,
        }
    }

    pub fn loop_names(&self) -> Vec<&'static str> {
        self.loops.iter().map(|l| l.name).collect()
    }

    pub async fn status(&self) -> serde_json::Value {
        let mut entries = Vec::with_capacity(self.loops.len());
        for sync_loop in &self.loops {
            entries.push(sync_loop.status().await);
        }
        serde_json::Value::Array(entries)
    }
}
