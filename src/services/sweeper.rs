//! Retention sweeper.
//!
//! Removes records older than the retention window on a schedule. Each
//! table is cleaned in its own transaction so one failure never blocks the
//! others; a sweep that hits errors still reports what it managed to
//! delete. The sweeper is idle between runs and a run can also be forced
//! with [`RetentionSweeper::sweep_now`].

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::RetentionConfig;
use crate::db::{self, CleanupReport, DbPool};
use crate::error::{Error, Result};

/// Sweeper lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Sweeping,
}

/// Outcome of one sweep.
#[derive(Debug, Clone)]
pub struct SweepSummary {
    pub started_at: DateTime<Utc>,
    pub cutoff: DateTime<Utc>,
    pub report: CleanupReport,
}

impl SweepSummary {
    pub fn total_deleted(&self) -> u64 {
        self.report.total_deleted()
    }

    pub fn total_bytes_freed(&self) -> u64 {
        self.report.total_bytes_freed()
    }

    /// True when at least one table's cleanup failed.
    pub fn had_errors(&self) -> bool {
        self.report.tables.iter().any(|t| t.error.is_some())
    }
}

/// Hook for surfacing store maintenance events to a supervisor.
#[async_trait::async_trait]
pub trait StatusObserver: Send + Sync {
    async fn on_sweep_completed(&self, summary: &SweepSummary);

    async fn on_cache_invalidated(&self, _project_id: &str, _reason: &str) {}
}

/// No-op observer for when nobody is watching.
pub struct NoOpObserver;

#[async_trait::async_trait]
impl StatusObserver for NoOpObserver {
    async fn on_sweep_completed(&self, _summary: &SweepSummary) {}
}

/// Background retention sweeper.
#[derive(Clone)]
pub struct RetentionSweeper {
    inner: Arc<RetentionSweeperInner>,
}

struct RetentionSweeperInner {
    pool: DbPool,
    config: RetentionConfig,
    running: RwLock<bool>,
    state: RwLock<SweepState>,
    last_sweep: RwLock<Option<SweepSummary>>,
    observer: Option<Arc<dyn StatusObserver>>,
}

impl RetentionSweeper {
    pub fn new(pool: DbPool, config: RetentionConfig) -> Self {
        Self::with_observer(pool, config, None)
    }

    pub fn with_observer(
        pool: DbPool,
        config: RetentionConfig,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Self {
        Self {
            inner: Arc::new(RetentionSweeperInner {
                pool,
                config,
                running: RwLock::new(false),
                state: RwLock::new(SweepState::Idle),
                last_sweep: RwLock::new(None),
                observer,
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SweepState {
        *self.inner.state.read().await
    }

    /// Summary of the most recent sweep, if any has run.
    pub async fn last_sweep(&self) -> Option<SweepSummary> {
        self.inner.last_sweep.read().await.clone()
    }

    /// Start the scheduled sweep loop. Returns a handle that stops the
    /// loop when asked (or when dropped).
    pub async fn start(&self) -> SweeperHandle {
        *self.inner.running.write().await = true;

        let sweeper = self.clone();
        let handle = tokio::spawn(async move {
            sweeper.run_loop().await;
        });

        info!(
            retention_days = self.inner.config.retention_days,
            interval_secs = self.inner.config.sweep_interval.as_secs(),
            "Retention sweeper started"
        );

        SweeperHandle {
            sweeper: self.clone(),
            _handle: handle,
        }
    }

    async fn run_loop(&self) {
        loop {
            sleep(self.inner.config.sweep_interval).await;

            if !*self.inner.running.read().await {
                info!("Retention sweeper stopping");
                break;
            }

            if let Err(e) = self.sweep_now().await {
                error!(error = %e, "Scheduled sweep failed");
            }
        }
    }

    /// Run a sweep immediately. At most one sweep runs at a time: a call
    /// that finds one in flight returns the previous summary, or
    /// `Error::Conflict` when none has completed yet.
    pub async fn sweep_now(&self) -> Result<SweepSummary> {
        {
            let mut state = self.inner.state.write().await;
            if *state == SweepState::Sweeping {
                warn!("Sweep already in progress, skipping");
                return match self.inner.last_sweep.read().await.clone() {
                    Some(last) => Ok(last),
                    None => Err(Error::Conflict("Sweep already in progress".to_string())),
                };
            }
            *state = SweepState::Sweeping;
        }

        let started_at = Utc::now();
        let cutoff = started_at - ChronoDuration::days(self.inner.config.retention_days);

        info!(cutoff = %cutoff, "Retention sweep starting");

        let report = db::cleanup(&self.inner.pool, cutoff).await;

        let summary = SweepSummary {
            started_at,
            cutoff,
            report,
        };

        if summary.had_errors() {
            warn!(
                deleted = summary.total_deleted(),
                bytes_freed = summary.total_bytes_freed(),
                "Retention sweep finished with table errors"
            );
        } else {
            info!(
                deleted = summary.total_deleted(),
                bytes_freed = summary.total_bytes_freed(),
                "Retention sweep finished"
            );
        }

        if let Some(observer) = &self.inner.observer {
            observer.on_sweep_completed(&summary).await;
        }

        *self.inner.last_sweep.write().await = Some(summary.clone());
        *self.inner.state.write().await = SweepState::Idle;

        Ok(summary)
    }
}

/// Handle to a running sweeper loop.
pub struct SweeperHandle {
    sweeper: RetentionSweeper,
    _handle: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop after its current wait.
    pub async fn stop(&self) {
        *self.sweeper.inner.running.write().await = false;
    }
}
