use crate::model::Task;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalendarFailure {
    pub calendar: String,
    pub error: String,
}

/// Everything that went wrong (or was skipped) on the way to a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// "calendar: warning"
    pub parse_warnings: Vec<String>,
    pub calendar_errors: Vec<CalendarFailure>,
    /// Completions fed to the estimator by the last successful check-in.
    pub observations: usize,
    /// Completions seen without an actual duration (marked observed, not learned from).
    pub completions_without_duration: usize,
    pub failed_check_ins: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub persistence_error: Option<String>,
}

/// Consolidated view published after each check-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// None until the first successful check-in.
    pub taken_at: Option<DateTime<Utc>>,
    /// Tasks per calendar, earliest due first, undated last.
    pub calendars: BTreeMap<String, Vec<Task>>,
    pub diagnostics: Diagnostics,
}

impl Snapshot {
    pub(crate) fn from_tasks(
        taken_at: DateTime<Utc>,
        calendars: BTreeMap<String, Vec<Task>>,
        diagnostics: Diagnostics,
    ) -> Self {
        let calendars = calendars
            .into_iter()
            .map(|(name, mut tasks)| {
                tasks.sort_by(Task::cmp_due);
                (name, tasks)
            })
            .collect();
        Self {
            taken_at: Some(taken_at),
            calendars,
            diagnostics,
        }
    }

    pub fn task_count(&self) -> usize {
        self.calendars.values().map(Vec::len).sum()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Task> {
        self.calendars
            .values()
            .flatten()
            .filter(|t| !t.is_completed())
    }
}
