// File: ./src/model/recurrence.rs
use crate::model::item::{DateType, Task, TaskStatus};
use chrono::{DateTime, Utc};
use rrule::RRuleSet;
use std::str::FromStr;
use uuid::Uuid;

/// Rule parts a fixed-interval recurrence may carry.
const FIXED_INTERVAL_KEYS: &[&str] = &["FREQ", "INTERVAL"];
const FREQUENCIES: &[&str] = &["SECONDLY", "MINUTELY", "HOURLY", "DAILY", "WEEKLY", "MONTHLY", "YEARLY"];

pub(crate) fn strip_prefix(rule: &str) -> &str {
    let rule = rule.trim();
    if rule.get(..6).is_some_and(|p| p.eq_ignore_ascii_case("RRULE:")) {
        &rule[6..]
    } else {
        rule
    }
}

/// True when `rule` only uses `FREQ` and an optional positive `INTERVAL`.
pub fn is_fixed_interval(rule: &str) -> bool {
    let mut has_freq = false;
    for part in strip_prefix(rule).split(';').filter(|p| !p.is_empty()) {
        let Some((key, value)) = part.split_once('=') else {
            return false;
        };
        let key = key.trim().to_ascii_uppercase();
        let value = value.trim();
        if !FIXED_INTERVAL_KEYS.contains(&key.as_str()) {
            return false;
        }
        match key.as_str() {
            "FREQ" => {
                if !FREQUENCIES.contains(&value.to_ascii_uppercase().as_str()) {
                    return false;
                }
                has_freq = true;
            }
            _ => {
                if !matches!(value.parse::<u32>(), Ok(n) if n > 0) {
                    return false;
                }
            }
        }
    }
    has_freq
}

pub struct RecurrenceEngine;

impl RecurrenceEngine {
    /// Next pending occurrence of a completed recurring task, or None when the
    /// task does not recur (or the rule is outside the fixed-interval subset).
    ///
    /// The occurrence is the first one strictly after `max(now, seed)`, seed
    /// being DTSTART or else DUE. The due/start distance is preserved.
    pub fn next_occurrence(task: &Task, now: DateTime<Utc>) -> Option<Task> {
        let rule = task.rrule.as_deref()?;
        if !is_fixed_interval(rule) {
            return None;
        }
        let seed = task.dtstart.as_ref().or(task.due.as_ref())?;
        let seed_utc = match seed {
            DateType::AllDay(d) => d.and_hms_opt(0, 0, 0)?.and_utc(),
            DateType::Specific(dt) => *dt,
        };

        let rrule_string = format!(
            "DTSTART:{}\nRRULE:{}",
            seed_utc.format("%Y%m%dT%H%M%SZ"),
            strip_prefix(rule).to_ascii_uppercase()
        );
        let rrule_set = match RRuleSet::from_str(&rrule_string) {
            Ok(set) => set,
            Err(e) => {
                log::warn!("Ignoring recurrence '{}' on {}: {}", rule, task.uid, e);
                return None;
            }
        };

        let floor = std::cmp::max(now, seed_utc);
        let next_start = rrule_set
            .into_iter()
            .find(|d| d.to_utc() > floor)
            .map(|d| d.to_utc())?;
        let shift = next_start - seed_utc;

        let mut next = task.clone();
        next.uid = Uuid::new_v4().to_string();
        next.href = String::new();
        next.etag = String::new();
        next.status = TaskStatus::Pending;
        next.completed_at = None;
        next.actual_duration = None;
        next.dtstart = task.dtstart.map(|d| shift_date(d, shift));
        next.due = task.due.map(|d| shift_date(d, shift));
        Some(next)
    }
}

pub(crate) fn shift_date(date: DateType, by: chrono::Duration) -> DateType {
    match date {
        DateType::AllDay(d) => DateType::AllDay(d + by),
        DateType::Specific(dt) => DateType::Specific(dt + by),
    }
}

impl Task {
    /// See [`RecurrenceEngine::next_occurrence`].
    pub fn respawn(&self, now: DateTime<Utc>) -> Option<Task> {
        RecurrenceEngine::next_occurrence(self, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn fixed_interval_subset() {
        assert!(is_fixed_interval("FREQ=DAILY"));
        assert!(is_fixed_interval("RRULE:FREQ=WEEKLY;INTERVAL=2"));
        assert!(is_fixed_interval("freq=monthly;interval=1"));
        assert!(!is_fixed_interval("FREQ=WEEKLY;BYDAY=MO"));
        assert!(!is_fixed_interval("INTERVAL=2"));
        assert!(!is_fixed_interval("FREQ=DAILY;INTERVAL=0"));
        assert!(!is_fixed_interval("FREQ=FORTNIGHTLY"));
    }

    #[test]
    fn multibyte_rule_is_rejected_not_sliced() {
        assert!(!is_fixed_interval("FREQ=é"));
        assert!(!is_fixed_interval("RRULE:FREQ=DAILY;X=ü"));
        assert!(!is_fixed_interval("ééé"));

        let err = crate::model::TaskDraft::new("x", "Work")
            .with_rrule("FREQ=é")
            .into_task()
            .unwrap_err();
        assert!(matches!(err, crate::ProviderError::Validation(_)));
    }

    #[test]
    fn server_rule_with_multibyte_text_does_not_respawn() {
        let mut task = Task::new("x", "c");
        task.due = Some(DateType::AllDay(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()));
        task.rrule = Some("FREQ=é".to_string());
        assert!(task.respawn(Utc::now()).is_none());
    }

    #[test]
    fn next_daily_occurrence_after_now() {
        let mut task = Task::new("Water plants", "Home");
        task.rrule = Some("FREQ=DAILY;INTERVAL=2".to_string());
        task.due = Some(DateType::AllDay(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()));
        task.status = TaskStatus::Completed;
        task.actual_duration = Some(10);

        let now = Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap();
        let next = task.respawn(now).unwrap();
        assert_ne!(next.uid, task.uid);
        assert_eq!(next.status, TaskStatus::Pending);
        assert_eq!(next.actual_duration, None);
        assert_eq!(
            next.due,
            Some(DateType::AllDay(NaiveDate::from_ymd_opt(2025, 3, 5).unwrap()))
        );
    }

    #[test]
    fn keeps_start_to_due_distance() {
        let mut task = Task::new("Report", "Work");
        task.rrule = Some("FREQ=WEEKLY".to_string());
        task.dtstart = Some(DateType::Specific(
            Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap(),
        ));
        task.due = Some(DateType::Specific(
            Utc.with_ymd_and_hms(2025, 1, 6, 17, 0, 0).unwrap(),
        ));

        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let next = task.respawn(now).unwrap();
        assert_eq!(
            next.dtstart,
            Some(DateType::Specific(
                Utc.with_ymd_and_hms(2025, 1, 13, 9, 0, 0).unwrap()
            ))
        );
        assert_eq!(
            next.due,
            Some(DateType::Specific(
                Utc.with_ymd_and_hms(2025, 1, 13, 17, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn no_respawn_without_rule_or_seed() {
        let now = Utc::now();
        let mut task = Task::new("x", "c");
        assert!(task.respawn(now).is_none());
        task.rrule = Some("FREQ=DAILY".to_string());
        assert!(task.respawn(now).is_none());
    }
}
