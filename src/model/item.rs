// File: ./src/model/item.rs
use crate::error::ProviderError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

pub use crate::codec::DateType;

/// Estimator category used when a task carries no CATEGORIES.
pub const DEFAULT_CATEGORY: &str = "uncategorized";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarListEntry {
    pub name: String,
    pub href: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn from_wire(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("COMPLETED") {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub uid: String,
    pub calendar_name: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: TaskStatus,

    pub due: Option<DateType>,
    pub dtstart: Option<DateType>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Minutes
    pub estimated_duration: Option<u32>,
    /// Minutes, recorded once on completion
    pub actual_duration: Option<u32>,

    pub categories: Vec<String>,
    pub rrule: Option<String>,

    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub etag: String,
}

impl Task {
    pub fn new(summary: &str, calendar_name: &str) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            calendar_name: calendar_name.to_string(),
            summary: summary.to_string(),
            description: None,
            status: TaskStatus::Pending,
            due: None,
            dtstart: None,
            completed_at: None,
            estimated_duration: None,
            actual_duration: None,
            categories: Vec::new(),
            rrule: None,
            href: String::new(),
            etag: String::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// The label the duration estimator files this task under.
    pub fn category(&self) -> &str {
        self.categories
            .first()
            .map(String::as_str)
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
    }

    /// Marks the task completed. Returns false (and changes nothing) when it
    /// already was.
    pub fn complete(&mut self, actual_duration: Option<u32>, at: DateTime<Utc>) -> bool {
        if self.is_completed() {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(at);
        if self.actual_duration.is_none() {
            self.actual_duration = actual_duration;
        }
        true
    }

    /// True when the task has no due date or falls due within `[from, to]`.
    pub fn is_due_between(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.due
            .as_ref()
            .is_none_or(|d| (from..=to).contains(&d.to_date_naive()))
    }

    /// Due-date ordering: earliest first, undated last, then summary.
    pub fn cmp_due(&self, other: &Self) -> Ordering {
        match (&self.due, &other.due) {
            (Some(d1), Some(d2)) => d1.cmp(d2),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| self.summary.cmp(&other.summary))
        .then_with(|| self.uid.cmp(&other.uid))
    }
}

// --- INPUT VALIDATION ---

pub(crate) fn validate_required(value: &str, field: &str) -> Result<(), ProviderError> {
    if value.trim().is_empty() {
        return Err(ProviderError::Validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

impl DateType {
    /// Parses caller-supplied due input.
    ///
    /// Accepts `YYYY-MM-DD` (all-day) or an RFC 3339 timestamp with an explicit
    /// offset, which is converted to UTC. Timestamps without an offset are
    /// rejected: the instant they denote is ambiguous.
    pub fn parse_input(input: &str) -> Result<Self, ProviderError> {
        let input = input.trim();
        if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            return Ok(DateType::AllDay(date));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Ok(DateType::Specific(dt.with_timezone(&Utc)));
        }
        if NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S").is_ok()
            || NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M").is_ok()
        {
            return Err(ProviderError::Validation(format!(
                "Due date '{}' must include a timezone offset (e.g. 'Z' or '+02:00')",
                input
            )));
        }
        Err(ProviderError::Validation(format!(
            "Invalid due date format: '{}'. Expected YYYY-MM-DD or an RFC 3339 timestamp",
            input
        )))
    }
}

/// The `past_days` window ending on `today`, both ends inclusive: 1 is today
/// only, 7 is today and the six days before it.
pub fn due_window(past_days: u32, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ProviderError> {
    if past_days == 0 {
        return Err(ProviderError::Validation(
            "past_days must be a positive number of days".to_string(),
        ));
    }
    let from = today
        .checked_sub_days(chrono::Days::new(u64::from(past_days - 1)))
        .unwrap_or(NaiveDate::MIN);
    Ok((from, today))
}

/// Caller input for `add_task`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub summary: String,
    pub calendar_name: String,
    pub description: Option<String>,
    /// Raw due input, see [`DateType::parse_input`]
    pub due: Option<String>,
    pub categories: Vec<String>,
    pub estimated_duration: Option<u32>,
    pub rrule: Option<String>,
}

impl TaskDraft {
    pub fn new(summary: &str, calendar_name: &str) -> Self {
        Self {
            summary: summary.to_string(),
            calendar_name: calendar_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_due(mut self, due: &str) -> Self {
        self.due = Some(due.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.categories.push(category.to_string());
        self
    }

    pub fn with_rrule(mut self, rrule: &str) -> Self {
        self.rrule = Some(rrule.to_string());
        self
    }

    /// Validates the draft and builds a pending task with a fresh UID.
    pub fn into_task(self) -> Result<Task, ProviderError> {
        validate_required(&self.summary, "Task summary")?;
        validate_required(&self.calendar_name, "Calendar name")?;

        let due = self
            .due
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(DateType::parse_input)
            .transpose()?;

        if let Some(rule) = &self.rrule
            && !crate::model::recurrence::is_fixed_interval(rule)
        {
            return Err(ProviderError::Validation(format!(
                "Unsupported recurrence '{}': only FREQ and INTERVAL are allowed",
                rule
            )));
        }

        let mut task = Task::new(self.summary.trim(), self.calendar_name.trim());
        task.description = self.description.filter(|d| !d.trim().is_empty());
        task.due = due;
        task.categories = self
            .categories
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        task.estimated_duration = self.estimated_duration;
        task.rrule = self.rrule.map(|r| r.trim().to_string());
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn due_input_formats() {
        assert_eq!(
            DateType::parse_input("2025-07-08").unwrap(),
            DateType::AllDay(NaiveDate::from_ymd_opt(2025, 7, 8).unwrap())
        );
        assert_eq!(
            DateType::parse_input("2025-07-08T09:00:00-05:00").unwrap(),
            DateType::Specific(Utc.with_ymd_and_hms(2025, 7, 8, 14, 0, 0).unwrap())
        );
        assert!(matches!(
            DateType::parse_input("2025-07-08T09:00:00"),
            Err(ProviderError::Validation(_))
        ));
        assert!(matches!(
            DateType::parse_input("next tuesday"),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn draft_validation() {
        assert!(TaskDraft::new("  ", "Work").into_task().is_err());
        assert!(TaskDraft::new("Write", "").into_task().is_err());
        assert!(
            TaskDraft::new("Write", "Work")
                .with_due("31/12/2025")
                .into_task()
                .is_err()
        );
        assert!(
            TaskDraft::new("Water plants", "Home")
                .with_rrule("FREQ=WEEKLY;BYDAY=MO")
                .into_task()
                .is_err()
        );

        let task = TaskDraft::new(" Write report ", "Work")
            .with_due("2025-01-31")
            .with_category("writing")
            .into_task()
            .unwrap();
        assert_eq!(task.summary, "Write report");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.category(), "writing");
        assert!(!task.uid.is_empty());
    }

    #[test]
    fn category_defaults() {
        let task = Task::new("x", "Work");
        assert_eq!(task.category(), DEFAULT_CATEGORY);
    }

    #[test]
    fn completion_happens_once() {
        let mut task = Task::new("x", "Work");
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap();
        assert!(task.complete(Some(25), t1));
        assert!(!task.complete(Some(99), t2));
        assert_eq!(task.completed_at, Some(t1));
        assert_eq!(task.actual_duration, Some(25));
    }

    #[test]
    fn past_days_window() {
        let today = NaiveDate::from_ymd_opt(2025, 7, 12).unwrap();
        assert_eq!(due_window(1, today).unwrap(), (today, today));
        assert_eq!(
            due_window(7, today).unwrap().0,
            NaiveDate::from_ymd_opt(2025, 7, 6).unwrap()
        );
        assert!(matches!(
            due_window(0, today),
            Err(ProviderError::Validation(_))
        ));

        let (from, to) = due_window(7, today).unwrap();
        let mut task = Task::new("x", "c");
        assert!(task.is_due_between(from, to));
        task.due = Some(DateType::Specific(Utc.with_ymd_and_hms(2025, 7, 6, 0, 0, 0).unwrap()));
        assert!(task.is_due_between(from, to));
        task.due = Some(DateType::AllDay(NaiveDate::from_ymd_opt(2025, 7, 5).unwrap()));
        assert!(!task.is_due_between(from, to));
        task.due = Some(DateType::AllDay(NaiveDate::from_ymd_opt(2025, 7, 13).unwrap()));
        assert!(!task.is_due_between(from, to));
    }

    #[test]
    fn due_ordering_puts_undated_last() {
        let mut a = Task::new("a", "c");
        a.due = Some(DateType::AllDay(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()));
        let mut b = Task::new("b", "c");
        b.due = Some(DateType::AllDay(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        let c = Task::new("c", "c");
        let mut v = vec![c.clone(), a.clone(), b.clone()];
        v.sort_by(Task::cmp_due);
        assert_eq!(
            v.iter().map(|t| t.summary.as_str()).collect::<Vec<_>>(),
            vec!["b", "a", "c"]
        );
    }
}
