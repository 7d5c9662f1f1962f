// File: ./src/provider/mod.rs
//! The operation set every task backend offers.
//!
//! Backends are chosen at construction time ([`CalDavProvider`] for a remote
//! store, [`LocalProvider`] for in-process/offline use). Callers, the
//! scheduler included, are generic over [`TaskProvider`].
pub mod caldav;
pub mod local;

pub use caldav::CalDavProvider;
pub use local::LocalProvider;

use crate::codec::Warning;
use crate::error::ProviderError;
use crate::model::item::due_window;
use crate::model::{CalendarListEntry, DateType, Event, EventDraft, Task, TaskDraft};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Result of `list_tasks`: the tasks plus any codec warnings met while
/// reading them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskListing {
    pub tasks: Vec<Task>,
    /// (calendar name, warning)
    pub warnings: Vec<(String, Warning)>,
}

impl TaskListing {
    pub(crate) fn extend(&mut self, other: TaskListing) {
        self.tasks.extend(other.tasks);
        self.warnings.extend(other.warnings);
    }

    pub(crate) fn retain_pending(&mut self, include_completed: bool) {
        if !include_completed {
            self.tasks.retain(|t| !t.is_completed());
        }
    }
}

/// Result of `list_events`: every instance in the range, recurring events
/// expanded, ordered by start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventListing {
    pub events: Vec<Event>,
    /// (calendar name, warning)
    pub warnings: Vec<(String, Warning)>,
}

impl EventListing {
    pub(crate) fn extend(&mut self, other: EventListing) {
        self.events.extend(other.events);
        self.warnings.extend(other.warnings);
    }

    pub(crate) fn sort(&mut self) {
        self.events.sort_by(|a, b| {
            a.starts_at()
                .cmp(&b.starts_at())
                .then_with(|| a.summary.cmp(&b.summary))
        });
    }
}

pub(crate) fn check_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), ProviderError> {
    if to <= from {
        return Err(ProviderError::Validation(format!(
            "Range end {} must be after its start {}",
            to.to_rfc3339(),
            from.to_rfc3339()
        )));
    }
    Ok(())
}

pub trait TaskProvider: Send + Sync {
    fn list_calendars(
        &self,
    ) -> impl Future<Output = Result<Vec<CalendarListEntry>, ProviderError>> + Send;

    /// Fails with `AlreadyExists` when a calendar of that name is present.
    fn create_calendar(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<CalendarListEntry, ProviderError>> + Send;

    /// `calendar_name = None` aggregates over every calendar.
    fn list_tasks(
        &self,
        calendar_name: Option<&str>,
        include_completed: bool,
    ) -> impl Future<Output = Result<TaskListing, ProviderError>> + Send;

    /// The draft's calendar must exist; it is never created implicitly.
    fn add_task(&self, draft: TaskDraft)
    -> impl Future<Output = Result<Task, ProviderError>> + Send;

    /// Only the named calendar is searched for `uid`. Completed tasks are
    /// rejected with `Validation`.
    fn update_due_date(
        &self,
        uid: &str,
        calendar_name: &str,
        due: Option<DateType>,
    ) -> impl Future<Output = Result<Task, ProviderError>> + Send;

    /// Idempotent: an already completed task is returned unchanged.
    fn complete_task(
        &self,
        uid: &str,
        calendar_name: &str,
        actual_duration: Option<u32>,
    ) -> impl Future<Output = Result<Task, ProviderError>> + Send;

    fn delete_task(
        &self,
        uid: &str,
        calendar_name: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// `list_tasks` narrowed to tasks due in the last `past_days` days,
    /// today included. Undated tasks are always kept. `past_days` must be
    /// at least 1.
    fn list_recent_tasks(
        &self,
        calendar_name: Option<&str>,
        include_completed: bool,
        past_days: u32,
    ) -> impl Future<Output = Result<TaskListing, ProviderError>> + Send {
        async move {
            let (from, to) = due_window(past_days, Utc::now().date_naive())?;
            let mut listing = self.list_tasks(calendar_name, include_completed).await?;
            listing.tasks.retain(|t| t.is_due_between(from, to));
            Ok(listing)
        }
    }

    /// Event instances overlapping `[from, to)`. `calendar_name = None`
    /// searches every calendar.
    fn list_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        calendar_name: Option<&str>,
    ) -> impl Future<Output = Result<EventListing, ProviderError>> + Send;

    /// The draft's calendar must exist.
    fn add_event(
        &self,
        draft: EventDraft,
    ) -> impl Future<Output = Result<Event, ProviderError>> + Send;

    /// Removes the whole series for a recurring event.
    fn delete_event(
        &self,
        uid: &str,
        calendar_name: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;
}
