// File: ./src/model/adapter.rs
//! Mapping between [`Task`] and the wire-level [`Record`].
use crate::codec::{
    DateType, Record, RecordKind, escape_text, format_duration, parse_duration, split_list,
    unescape_text,
};
use crate::model::item::{Task, TaskStatus};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

pub(crate) const STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

fn parse_stamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), STAMP_FORMAT)
        .ok()
        .map(|d| Utc.from_utc_datetime(&d))
}

pub(crate) fn set_date(record: &mut Record, name: &str, value: Option<&DateType>) {
    match value {
        Some(d @ DateType::AllDay(_)) => record.set_with_params(
            name,
            vec![("VALUE".to_string(), "DATE".to_string())],
            d.to_wire(),
        ),
        Some(d @ DateType::Specific(_)) => record.set(name, d.to_wire()),
        None => {
            record.remove(name);
        }
    }
}

pub(crate) fn set_optional(record: &mut Record, name: &str, value: Option<String>) {
    match value {
        Some(v) => record.set(name, v),
        None => {
            record.remove(name);
        }
    }
}

impl Task {
    /// Reads a task out of a VTODO record. Events and records without a UID
    /// yield None.
    pub fn from_record(record: &Record, calendar_name: &str) -> Option<Task> {
        if record.kind() != RecordKind::Todo {
            return None;
        }
        let uid = record.uid()?.to_string();

        let mut task = Task::new("", calendar_name);
        task.uid = uid;
        task.summary = record.get("SUMMARY").map(unescape_text).unwrap_or_default();
        task.description = record
            .get("DESCRIPTION")
            .map(unescape_text)
            .filter(|d| !d.is_empty());
        task.status = record
            .get("STATUS")
            .map(TaskStatus::from_wire)
            .unwrap_or(TaskStatus::Pending);
        task.due = record.get("DUE").and_then(DateType::from_wire);
        task.dtstart = record.get("DTSTART").and_then(DateType::from_wire);
        task.completed_at = record.get("COMPLETED").and_then(parse_stamp);
        task.categories = record.get("CATEGORIES").map(split_list).unwrap_or_default();
        task.estimated_duration = record.get("X-ESTIMATED-DURATION").and_then(parse_duration);
        task.actual_duration = record.get("X-ACTUAL-DURATION").and_then(parse_duration);
        task.rrule = record
            .get("RRULE")
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        Some(task)
    }

    /// A fresh VTODO record for a task that has never been stored.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new(RecordKind::Todo);
        record.set("UID", self.uid.clone());
        self.apply_to_record(&mut record);
        record
    }

    /// Writes the task's fields onto `record`, leaving unknown properties and
    /// nested components as they were. Bumps SEQUENCE when the record already
    /// carried one.
    pub(crate) fn apply_to_record(&self, record: &mut Record) {
        let now = Utc::now().format(STAMP_FORMAT).to_string();

        record.set("UID", self.uid.clone());
        record.set("SUMMARY", escape_text(&self.summary));
        set_optional(
            record,
            "DESCRIPTION",
            self.description.as_deref().map(escape_text),
        );
        set_date(record, "DUE", self.due.as_ref());
        set_date(record, "DTSTART", self.dtstart.as_ref());

        match self.status {
            TaskStatus::Completed => {
                record.set("STATUS", "COMPLETED");
                set_optional(
                    record,
                    "COMPLETED",
                    self.completed_at.map(|t| t.format(STAMP_FORMAT).to_string()),
                );
            }
            TaskStatus::Pending => {
                record.set("STATUS", "NEEDS-ACTION");
                record.remove("COMPLETED");
            }
        }

        let categories = (!self.categories.is_empty()).then(|| {
            self.categories
                .iter()
                .map(|c| escape_text(c))
                .collect::<Vec<_>>()
                .join(",")
        });
        set_optional(record, "CATEGORIES", categories);
        set_optional(
            record,
            "X-ESTIMATED-DURATION",
            self.estimated_duration.map(format_duration),
        );
        set_optional(
            record,
            "X-ACTUAL-DURATION",
            self.actual_duration.map(format_duration),
        );
        set_optional(record, "RRULE", self.rrule.clone());

        if let Some(seq) = record.get("SEQUENCE").and_then(|s| s.trim().parse::<u32>().ok()) {
            record.set("SEQUENCE", seq.saturating_add(1).to_string());
        }
        if record.get("DTSTAMP").is_some() {
            record.set("LAST-MODIFIED", now.clone());
        }
        record.set("DTSTAMP", now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use chrono::NaiveDate;

    #[test]
    fn task_fields_survive_the_wire() {
        let mut task = Task::new("Call Bob; then, Alice", "Work");
        task.description = Some("line one\nline two".to_string());
        task.due = Some(DateType::AllDay(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap()));
        task.categories = vec!["calls".to_string(), "social".to_string()];
        task.estimated_duration = Some(45);
        task.rrule = Some("FREQ=WEEKLY".to_string());

        let text = codec::serialize(&task.to_record());
        assert!(text.contains("DUE;VALUE=DATE:20250501\r\n"));
        assert!(text.contains("SUMMARY:Call Bob\\; then\\, Alice\r\n"));
        assert!(text.contains("X-ESTIMATED-DURATION:PT45M\r\n"));

        let (records, warnings) = codec::parse(&text);
        assert!(warnings.is_empty());
        let back = Task::from_record(&records[0], "Work").unwrap();
        assert_eq!(back, task);
        assert_eq!(back.category(), "calls");
    }

    #[test]
    fn completion_fields() {
        let mut task = Task::new("Ship", "Work");
        let at = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();
        task.complete(Some(90), at);

        let record = task.to_record();
        assert_eq!(record.get("STATUS"), Some("COMPLETED"));
        assert_eq!(record.get("COMPLETED"), Some("20250203T040506Z"));
        assert_eq!(record.get("X-ACTUAL-DURATION"), Some("PT90M"));

        let back = Task::from_record(&record, "Work").unwrap();
        assert_eq!(back.completed_at, Some(at));
        assert_eq!(back.actual_duration, Some(90));
    }

    #[test]
    fn write_back_keeps_unknown_properties() {
        let raw = "BEGIN:VTODO\r\nUID:abc\r\nSUMMARY:Old\r\nX-CUSTOM;FOO=bar:keep me\r\nSEQUENCE:3\r\n\
                   BEGIN:VALARM\r\nACTION:DISPLAY\r\nTRIGGER:-PT15M\r\nEND:VALARM\r\nEND:VTODO\r\n";
        let (mut records, _) = codec::parse(raw);
        let mut record = records.remove(0);
        let mut task = Task::from_record(&record, "Work").unwrap();
        task.summary = "New".to_string();
        task.apply_to_record(&mut record);

        assert_eq!(record.get("SUMMARY"), Some("New"));
        assert_eq!(record.get("X-CUSTOM"), Some("keep me"));
        assert_eq!(record.property("X-CUSTOM").unwrap().param("foo"), Some("bar"));
        assert_eq!(record.get("SEQUENCE"), Some("4"));
        assert_eq!(record.components().len(), 1);
    }

    #[test]
    fn sequence_stops_at_its_ceiling() {
        let raw = "BEGIN:VTODO\r\nUID:abc\r\nSUMMARY:Old\r\nSEQUENCE:4294967295\r\nEND:VTODO\r\n";
        let (mut records, _) = codec::parse(raw);
        let mut record = records.remove(0);
        let task = Task::from_record(&record, "Work").unwrap();
        task.apply_to_record(&mut record);
        assert_eq!(record.get("SEQUENCE"), Some("4294967295"));
    }

    #[test]
    fn events_are_not_tasks() {
        let (records, _) = codec::parse("BEGIN:VEVENT\nUID:e1\nSUMMARY:Meeting\nEND:VEVENT\n");
        assert_eq!(records.len(), 1);
        assert!(Task::from_record(&records[0], "Work").is_none());
    }
}
