// File: ./src/scheduler/mod.rs
//! Periodic check-ins against a [`TaskProvider`].
//!
//! A check-in lists every calendar's tasks (completed included), feeds
//! completions not seen before to the [`DurationEstimator`], refreshes the
//! estimate of every pending task and publishes a [`Snapshot`].
//!
//! The scheduler owns its estimator and observed-completion set outright;
//! nothing else mutates them, so neither needs locking.
pub mod learning;
pub mod machine;
pub mod snapshot;

pub use learning::{CompletionKey, LearningState, LearningStore};
pub use machine::{Backoff, Outcome, SyncMachine, SyncState};
pub use snapshot::{CalendarFailure, Diagnostics, Snapshot};

use crate::config::SchedulerConfig;
use crate::error::SyncError;
use crate::estimator::DurationEstimator;
use crate::model::Task;
use crate::provider::TaskProvider;

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

/// One completion fed to the estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub calendar: String,
    pub uid: String,
    pub category: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckInReport {
    pub observations: Vec<Observation>,
    pub completions_without_duration: usize,
    /// Observed completions dropped because their task is gone.
    pub forgotten: usize,
    pub calendar_errors: Vec<CalendarFailure>,
    pub warnings: usize,
    pub tasks: usize,
}

pub struct SyncScheduler<P: TaskProvider> {
    provider: P,
    estimator: DurationEstimator,
    observed: BTreeSet<CompletionKey>,
    machine: SyncMachine,
    learning: Option<LearningStore>,

    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,

    failed_check_ins: u64,
    consecutive_failures: u32,
}

impl<P: TaskProvider> SyncScheduler<P> {
    pub fn new(provider: P, estimator: DurationEstimator, settings: &SchedulerConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::default()));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            provider,
            estimator,
            observed: BTreeSet::new(),
            machine: SyncMachine::new(
                settings.interval(),
                Backoff {
                    base: settings.backoff_base(),
                    max: settings.backoff_max(),
                },
            ),
            learning: None,
            snapshot_tx,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            failed_check_ins: 0,
            consecutive_failures: 0,
        }
    }

    /// Restores persisted profiles and observed completions from `store` and
    /// writes them back after every check-in that changes them.
    pub fn with_learning(mut self, store: LearningStore) -> anyhow::Result<Self> {
        let state = store.load()?;
        log::info!(
            "Restored {} estimate profile(s), {} observed completion(s)",
            state.profiles.len(),
            state.observed.len()
        );
        self.estimator.restore(state.profiles);
        self.observed = state.observed;
        self.learning = Some(store);
        Ok(self)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn estimator(&self) -> &DurationEstimator {
        &self.estimator
    }

    pub fn observed(&self) -> &BTreeSet<CompletionKey> {
        &self.observed
    }

    pub fn state(&self) -> SyncState {
        self.machine.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Requests cancellation: no further provider call is started.
    pub fn stop(&self) {
        self.cancel_tx.send_replace(true);
    }

    fn ensure_running(&self) -> Result<(), SyncError> {
        if *self.cancel_rx.borrow() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    // --- CHECK-IN ---

    /// Runs one check-in and publishes its snapshot. Failures are counted in
    /// the published diagnostics as well as returned.
    pub async fn check_in(&mut self) -> Result<CheckInReport, SyncError> {
        log::info!("Check-in started");
        match self.collect_and_learn().await {
            Ok((report, mut snapshot)) => {
                self.consecutive_failures = 0;
                snapshot.diagnostics.failed_check_ins = self.failed_check_ins;
                if report.observations.len() + report.completions_without_duration + report.forgotten
                    > 0
                {
                    snapshot.diagnostics.persistence_error = self.persist();
                }
                self.snapshot_tx.send_replace(Arc::new(snapshot));
                log::info!(
                    "Check-in done: {} task(s), {} new observation(s), {} calendar error(s)",
                    report.tasks,
                    report.observations.len(),
                    report.calendar_errors.len()
                );
                Ok(report)
            }
            Err(SyncError::Cancelled) => {
                log::info!("Check-in cancelled");
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                self.failed_check_ins += 1;
                if e.is_retryable() {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                }
                log::warn!("Check-in failed: {}", e);
                let mut snapshot = (*self.latest()).clone();
                snapshot.diagnostics.failed_check_ins = self.failed_check_ins;
                snapshot.diagnostics.consecutive_failures = self.consecutive_failures;
                snapshot.diagnostics.last_error = Some(e.to_string());
                self.snapshot_tx.send_replace(Arc::new(snapshot));
                Err(e)
            }
        }
    }

    async fn collect_and_learn(&mut self) -> Result<(CheckInReport, Snapshot), SyncError> {
        let mut report = CheckInReport::default();
        let mut diagnostics = Diagnostics::default();

        // Pull. Nothing is mutated until every calendar has been read, so a
        // cancelled or aborted check-in leaves no partial learning behind.
        self.ensure_running()?;
        let calendars = self.provider.list_calendars().await?;
        let listed: BTreeSet<String> = calendars.iter().map(|c| c.name.clone()).collect();
        let mut fetched: BTreeMap<String, Vec<Task>> = BTreeMap::new();
        for calendar in calendars {
            self.ensure_running()?;
            match self.provider.list_tasks(Some(&calendar.name), true).await {
                Ok(listing) => {
                    diagnostics.parse_warnings.extend(
                        listing
                            .warnings
                            .iter()
                            .map(|(cal, w)| format!("{}: {}", cal, w)),
                    );
                    fetched.insert(calendar.name, listing.tasks);
                }
                Err(e) if e.is_retryable() => return Err(e.into()),
                Err(e) => {
                    log::warn!("Skipping calendar '{}': {}", calendar.name, e);
                    report.calendar_errors.push(CalendarFailure {
                        calendar: calendar.name,
                        error: e.to_string(),
                    });
                }
            }
        }

        // Observe completions once each.
        for (calendar, tasks) in &fetched {
            for task in tasks.iter().filter(|t| t.is_completed()) {
                if !self.observed.insert((calendar.clone(), task.uid.clone())) {
                    continue;
                }
                match task.actual_duration {
                    Some(minutes) => {
                        self.estimator.observe(task.category(), f64::from(minutes));
                        report.observations.push(Observation {
                            calendar: calendar.clone(),
                            uid: task.uid.clone(),
                            category: task.category().to_string(),
                            minutes,
                        });
                    }
                    None => report.completions_without_duration += 1,
                }
            }
        }
        // Forget completions that vanished from calendars we could read, and
        // everything filed under calendars that are no longer listed.
        let before = self.observed.len();
        self.observed.retain(|(calendar, uid)| {
            listed.contains(calendar)
                && fetched
                    .get(calendar)
                    .is_none_or(|tasks| tasks.iter().any(|t| &t.uid == uid && t.is_completed()))
        });
        report.forgotten = before - self.observed.len();

        // Refresh estimates of what is still open.
        for task in fetched.values_mut().flatten() {
            if !task.is_completed() {
                task.estimated_duration = Some(self.estimator.estimate_minutes(task.category()));
            }
        }

        report.tasks = fetched.values().map(Vec::len).sum();
        report.warnings = diagnostics.parse_warnings.len();
        diagnostics.calendar_errors = report.calendar_errors.clone();
        diagnostics.observations = report.observations.len();
        diagnostics.completions_without_duration = report.completions_without_duration;
        Ok((report, Snapshot::from_tasks(Utc::now(), fetched, diagnostics)))
    }

    fn persist(&self) -> Option<String> {
        let store = self.learning.as_ref()?;
        let state = LearningState {
            profiles: self.estimator.profiles().clone(),
            observed: self.observed.clone(),
        };
        match store.save(&state) {
            Ok(()) => None,
            Err(e) => {
                log::warn!("Could not persist learning state: {:#}", e);
                Some(format!("{:#}", e))
            }
        }
    }

    // --- LOOP ---

    /// Drives check-ins until cancelled: one immediately, then every
    /// interval, on each trigger, or after a backoff delay.
    pub async fn run(mut self, mut triggers: mpsc::Receiver<()>) -> Self {
        enum Wake {
            Cancelled,
            Trigger,
            Timer,
        }

        let mut cancel = self.cancel_rx.clone();
        let mut triggers_open = true;
        let mut deadline = Instant::now();

        loop {
            if *cancel.borrow() {
                break;
            }
            let wake = tokio::select! {
                biased;
                _ = cancel.changed() => Wake::Cancelled,
                msg = triggers.recv(), if triggers_open => match msg {
                    Some(()) => Wake::Trigger,
                    None => {
                        triggers_open = false;
                        continue;
                    }
                },
                _ = sleep_until(deadline) => Wake::Timer,
            };

            let start = match wake {
                Wake::Cancelled => break,
                Wake::Trigger => self.machine.request(),
                Wake::Timer => match self.machine.state() {
                    SyncState::Backoff => self.machine.retry(),
                    _ => self.machine.request(),
                },
            };
            if !start {
                continue;
            }

            let outcome = match self.check_in().await {
                Ok(_) => Outcome::Succeeded,
                Err(SyncError::Cancelled) => break,
                Err(e) if e.is_retryable() => Outcome::Unavailable,
                Err(_) => Outcome::Failed,
            };
            // Triggers that queued up during the run collapse into one rerun.
            while triggers.try_recv().is_ok() {
                self.machine.request();
            }
            let delay = self.machine.settle(outcome);
            if outcome == Outcome::Unavailable {
                log::warn!(
                    "Provider unavailable ({} in a row), retrying in {:?}",
                    self.machine.consecutive_failures(),
                    delay
                );
            }
            deadline = Instant::now() + delay;
        }

        self.machine.stop();
        log::info!("Scheduler stopped");
        self
    }
}

impl<P: TaskProvider + 'static> SyncScheduler<P> {
    /// Moves the scheduler onto a tokio task.
    pub fn spawn(self) -> SchedulerHandle<P> {
        let (trigger, rx) = mpsc::channel(8);
        let cancel = self.cancel_tx.clone();
        let snapshots = self.subscribe();
        let task = tokio::spawn(self.run(rx));
        SchedulerHandle {
            trigger,
            cancel,
            snapshots,
            task,
        }
    }
}

pub struct SchedulerHandle<P: TaskProvider> {
    trigger: mpsc::Sender<()>,
    cancel: Arc<watch::Sender<bool>>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    task: JoinHandle<SyncScheduler<P>>,
}

impl<P: TaskProvider> SchedulerHandle<P> {
    /// Asks for a check-in now. A full queue means one is already pending.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    pub fn stop(&self) {
        self.cancel.send_replace(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop and hands the scheduler back.
    pub async fn join(self) -> Result<SyncScheduler<P>, tokio::task::JoinError> {
        self.stop();
        self.task.await
    }
}
