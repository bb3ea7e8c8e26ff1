//! Polling loop
//!
//! A single worker polls the queue, processes at most one notification at a
//! time, and sleeps between empty polls. Stopping is cooperative: the stop
//! token interrupts a pending receive or sleep immediately, while a
//! notification in progress finishes its current object first.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MnsSettings;
use crate::pipeline::{Ingestor, NotificationReport};

/// Pause between consecutive non-empty polls
pub const TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Processing,
    Stopping,
    Stopped,
}

/// Totals over a scheduler run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub polls: u64,
    pub notifications: u64,
    pub acknowledged: u64,
    pub objects_failed: u64,
    pub records: u64,
}

impl RunSummary {
    fn add(&mut self, report: &NotificationReport) {
        self.notifications += 1;
        self.acknowledged += u64::from(report.acknowledged);
        self.objects_failed += report.failed as u64;
        self.records += report.records;
    }
}

/// Requests a running scheduler to stop. Cheap to clone and safe to call
/// from any task or thread, any number of times.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!("OSS ingestion is shutting down...");
        }
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct IngestionScheduler {
    ingestor: Arc<Ingestor>,
    wait: Option<Duration>,
    poll_interval: Duration,
    token: CancellationToken,
    state: watch::Sender<SchedulerState>,
}

impl IngestionScheduler {
    pub fn new(ingestor: Arc<Ingestor>, settings: &MnsSettings) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            ingestor,
            wait: settings.wait(),
            poll_interval: settings.poll_interval(),
            token: CancellationToken::new(),
            state,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.token.clone(),
        }
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }

    /// Run until stopped.
    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        info!("Scheduler started");

        while !self.token.is_cancelled() {
            let fetched = self.tick(&mut summary).await;

            let pause = if fetched { TICK } else { self.poll_interval };
            if fetched {
                self.set_state(SchedulerState::Idle);
            }
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {},
            }
        }

        self.set_state(SchedulerState::Stopping);
        info!(
            notifications = summary.notifications,
            acknowledged = summary.acknowledged,
            records = summary.records,
            "Scheduler stopped"
        );
        self.set_state(SchedulerState::Stopped);

        summary
    }

    /// One poll, plus processing if a message arrived. Returns whether a
    /// message was received.
    async fn tick(&self, summary: &mut RunSummary) -> bool {
        self.set_state(SchedulerState::Polling);
        summary.polls += 1;
        debug!("Polling for notifications");

        let received = tokio::select! {
            _ = self.token.cancelled() => return false,
            received = self.ingestor.queue().receive(self.wait) => received,
        };

        match received {
            Ok(Some(message)) => {
                self.set_state(SchedulerState::Processing);
                let report = self.ingestor.process_notification(&message, &self.token).await;
                summary.add(&report);
                true
            },
            Ok(None) => {
                self.set_state(SchedulerState::Idle);
                false
            },
            Err(e) => {
                warn!(error = %e, "Failed to receive notification");
                self.set_state(SchedulerState::Idle);
                false
            },
        }
    }
}
