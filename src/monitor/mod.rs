//! Two-state monitoring scheduler.
//!
//! A single background task re-assesses every open position on a fixed
//! interval, hedges the ones whose delta breaches the threshold, and
//! publishes an atomically replaced status table. At most one tick is
//! ever in flight; stopping waits for the current tick to finish.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::HedgeError;
use crate::hedger::{
    BatchFailure, BatchHedgeReport, DeltaAssessment, DeltaHedger, PositionMetrics,
};
use crate::position::Position;

/// Published view of one position after a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionStatus {
    pub position: Position,
    pub assessment: DeltaAssessment,
    /// Mark-to-market figures, absent when the option's own snapshot
    /// could not be fetched.
    pub metrics: Option<PositionMetrics>,
    pub updated_at: DateTime<Utc>,
}

/// Scheduler state as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub interval_secs: f64,
    pub delta_threshold: f64,
    pub last_tick: Option<DateTime<Utc>>,
    /// Detail of the last whole-tick failure; cleared by the next
    /// successful tick.
    pub last_error: Option<String>,
    pub tracked_positions: usize,
}

#[derive(Debug, Default)]
struct MonitorShared {
    table: RwLock<HashMap<String, PositionStatus>>,
    last_tick: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

struct MonitorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the background monitoring task and its published state.
pub struct Monitor {
    hedger: Arc<DeltaHedger>,
    shared: Arc<MonitorShared>,
    task: Mutex<Option<MonitorTask>>,
}

impl Monitor {
    pub fn new(hedger: Arc<DeltaHedger>) -> Self {
        Self {
            hedger,
            shared: Arc::new(MonitorShared::default()),
            task: Mutex::new(None),
        }
    }

    pub fn hedger(&self) -> &Arc<DeltaHedger> {
        &self.hedger
    }

    /// Start monitoring with the given interval and threshold.
    ///
    /// Both parameters are validated before anything changes. If the
    /// scheduler is already running, the new parameters are applied live
    /// and the existing task keeps going.
    #[instrument(skip(self))]
    pub async fn start_monitoring(
        &self,
        interval_secs: f64,
        delta_threshold: f64,
    ) -> Result<MonitorStatus, HedgeError> {
        self.hedger
            .settings()
            .reconfigure_monitoring(interval_secs, delta_threshold)
            .await?;

        let mut task = self.task.lock().await;
        if task.is_some() {
            info!(interval_secs, delta_threshold, "monitoring reconfigured live");
            drop(task);
            return self.monitoring_status().await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let hedger = Arc::clone(&self.hedger);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            Self::run_loop(hedger, shared, shutdown_rx).await;
        });
        *task = Some(MonitorTask {
            shutdown: shutdown_tx,
            handle,
        });
        info!(interval_secs, delta_threshold, "monitoring started");
        drop(task);
        self.monitoring_status().await
    }

    /// Stop the scheduler, waiting for any tick in flight to finish.
    /// Returns `false` when nothing was running.
    #[instrument(skip(self))]
    pub async fn stop_monitoring(&self) -> bool {
        let task = self.task.lock().await.take();
        match task {
            Some(task) => {
                let _ = task.shutdown.send(true);
                if let Err(err) = task.handle.await {
                    warn!(error = %err, "monitoring task ended abnormally");
                }
                info!("monitoring stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Current scheduler state plus the active settings.
    pub async fn monitoring_status(&self) -> Result<MonitorStatus, HedgeError> {
        let settings = self.hedger.settings().current().await;
        Ok(MonitorStatus {
            running: self.is_running().await,
            interval_secs: settings.hedge_interval_secs,
            delta_threshold: settings.delta_threshold,
            last_tick: *self.shared.last_tick.read().await,
            last_error: self.shared.last_error.read().await.clone(),
            tracked_positions: self.shared.table.read().await.len(),
        })
    }

    /// Status of every tracked position, from the last completed tick.
    pub async fn all_positions_status(&self) -> Vec<PositionStatus> {
        let mut statuses: Vec<PositionStatus> =
            self.shared.table.read().await.values().cloned().collect();
        statuses.sort_by(|a, b| a.position.deal_id.cmp(&b.position.deal_id));
        statuses
    }

    /// Status of one tracked position.
    pub async fn position_status(&self, deal_id: &str) -> Result<PositionStatus, HedgeError> {
        self.shared
            .table
            .read()
            .await
            .get(deal_id)
            .cloned()
            .ok_or_else(|| HedgeError::NotFound(format!("position {deal_id}")))
    }

    /// Operator-triggered hedge of every tracked position, regardless of
    /// threshold. Works off the last published table rather than
    /// refetching per item; when no tick has published a table yet, the
    /// positions are fetched and assessed once.
    #[instrument(skip(self))]
    pub async fn hedge_all(&self) -> Result<BatchHedgeReport, HedgeError> {
        let statuses = self.all_positions_status().await;
        if statuses.is_empty() {
            return self.hedger.hedge_all_positions(true).await;
        }

        let mut report = BatchHedgeReport::default();
        for status in &statuses {
            let deal_id = status.position.deal_id.clone();
            match self
                .hedger
                .hedge_position(&status.position, &status.assessment, true)
                .await
            {
                Ok(outcome) => report.succeeded.push((deal_id, outcome)),
                Err(error) => report.failed.push(BatchFailure { deal_id, error }),
            }
        }
        info!(
            total = report.total(),
            failed = report.failed.len(),
            "manual hedge-all finished"
        );
        Ok(report)
    }

    async fn run_loop(
        hedger: Arc<DeltaHedger>,
        shared: Arc<MonitorShared>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            Self::run_tick(&hedger, &shared).await;

            // Interval is re-read each pass so live reconfiguration takes
            // effect without restarting the task.
            let interval = hedger.settings().current().await.hedge_interval_secs;
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs_f64(interval)) => {}
            }
        }
    }

    /// One monitoring pass: fetch, assess, hedge breaches, publish.
    async fn run_tick(hedger: &Arc<DeltaHedger>, shared: &Arc<MonitorShared>) {
        let positions = match hedger.get_open_positions().await {
            Ok(positions) => positions,
            Err(err) => {
                // The scheduler keeps running; the error is surfaced in
                // the status until a tick succeeds.
                warn!(error = %err, "position fetch failed, keeping last table");
                *shared.last_error.write().await = Some(err.to_string());
                return;
            }
        };

        let auto_hedge = hedger.settings().current().await.auto_hedge;
        let mut table = HashMap::with_capacity(positions.len());
        for position in &positions {
            let assessment = match hedger.assess_live(position).await {
                Ok(assessment) => assessment,
                Err(err) => {
                    warn!(deal_id = %position.deal_id, error = %err, "skipping unpriced position");
                    continue;
                }
            };

            if auto_hedge && assessment.needs_hedge {
                if let Err(err) = hedger.hedge_position(position, &assessment, false).await {
                    warn!(deal_id = %position.deal_id, error = %err, "automatic hedge failed");
                }
            }

            let metrics = hedger.position_metrics(position).await.ok();
            table.insert(
                position.deal_id.clone(),
                PositionStatus {
                    position: position.clone(),
                    assessment,
                    metrics,
                    updated_at: Utc::now(),
                },
            );
        }

        debug!(tracked = table.len(), "tick complete");
        *shared.table.write().await = table;
        *shared.last_tick.write().await = Some(Utc::now());
        *shared.last_error.write().await = None;
    }
}
