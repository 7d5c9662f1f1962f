// File: ./src/provider/local.rs
//! In-process backend. Each task is kept as the calendar text it would have
//! on a server, so reads and writes go through the same codec as CalDAV.
use crate::codec::{self, Record};
use crate::context::AppContext;
use crate::error::ProviderError;
use crate::model::item::validate_required;
use crate::model::{CalendarListEntry, DateType, Event, EventDraft, Task, TaskDraft};
use crate::provider::{EventListing, TaskListing, TaskProvider, check_range};
use crate::storage::Storage;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub const LOCAL_HREF_PREFIX: &str = "local://";

/// calendar name -> (uid -> calendar text), tasks and events alike
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LocalState {
    calendars: BTreeMap<String, BTreeMap<String, String>>,
}

fn calendar_href(name: &str) -> String {
    format!("{}{}/", LOCAL_HREF_PREFIX, name)
}

/// Stored resource decoded for modification.
struct Stored {
    records: Vec<Record>,
    index: usize,
    task: Task,
}

impl Stored {
    fn read(calendar_name: &str, uid: &str, text: &str) -> Option<Stored> {
        let (records, _) = codec::parse(text);
        let index = records.iter().position(|r| r.uid() == Some(uid))?;
        let mut task = Task::from_record(&records[index], calendar_name)?;
        task.href = format!("{}{}.ics", calendar_href(calendar_name), uid);
        Some(Stored {
            records,
            index,
            task,
        })
    }

    fn write(mut self) -> (Task, String) {
        if let Some(record) = self.records.get_mut(self.index) {
            self.task.apply_to_record(record);
        }
        (self.task, codec::serialize_calendar(&self.records))
    }
}

#[derive(Debug, Default)]
pub struct LocalProvider {
    state: Mutex<LocalState>,
    path: Option<PathBuf>,
}

impl LocalProvider {
    /// Memory-only store, lost on drop.
    pub fn new() -> Self {
        Self::default()
    }

    /// File-backed store at `path`, created on first write.
    pub fn open(path: PathBuf) -> Result<Self> {
        let state: LocalState = Storage::load(&path)?;
        log::info!(
            "Loaded {} local calendar(s) from {:?}",
            state.calendars.len(),
            path
        );
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    pub fn from_context(ctx: &dyn AppContext) -> Result<Self> {
        Self::open(ctx.get_local_store_path()?)
    }

    fn snapshot(&self) -> LocalState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Applies `f` to a copy of the state, persists it, then publishes it.
    /// Nothing changes when `f` or the write fails.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut LocalState) -> Result<R, ProviderError>,
    ) -> Result<R, ProviderError> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            Storage::save(path, &next)?;
        }
        *guard = next;
        Ok(out)
    }

    fn stored(
        state: &LocalState,
        uid: &str,
        calendar_name: &str,
    ) -> Result<Stored, ProviderError> {
        let tasks = state
            .calendars
            .get(calendar_name)
            .ok_or_else(|| ProviderError::calendar_not_found(calendar_name))?;
        tasks
            .get(uid)
            .and_then(|text| Stored::read(calendar_name, uid, text))
            .ok_or_else(|| ProviderError::task_not_found(uid, calendar_name))
    }

    fn insert_new(state: &mut LocalState, task: &mut Task) -> Result<(), ProviderError> {
        let tasks = state
            .calendars
            .get_mut(&task.calendar_name)
            .ok_or_else(|| ProviderError::calendar_not_found(&task.calendar_name))?;
        if tasks.contains_key(&task.uid) {
            return Err(ProviderError::AlreadyExists(format!(
                "task '{}' in calendar '{}'",
                task.uid, task.calendar_name
            )));
        }
        task.href = format!("{}{}.ics", calendar_href(&task.calendar_name), task.uid);
        tasks.insert(
            task.uid.clone(),
            codec::serialize_calendar(&[task.to_record()]),
        );
        Ok(())
    }

    fn selected<'a>(
        state: &'a LocalState,
        calendar_name: Option<&str>,
    ) -> Result<Vec<(&'a String, &'a BTreeMap<String, String>)>, ProviderError> {
        match calendar_name {
            Some(name) => {
                let entry = state
                    .calendars
                    .get_key_value(name)
                    .ok_or_else(|| ProviderError::calendar_not_found(name))?;
                Ok(vec![entry])
            }
            None => Ok(state.calendars.iter().collect()),
        }
    }

    fn store(state: &mut LocalState, calendar_name: &str, uid: &str, text: String) {
        if let Some(tasks) = state.calendars.get_mut(calendar_name) {
            tasks.insert(uid.to_string(), text);
        }
    }
}

impl TaskProvider for LocalProvider {
    async fn list_calendars(&self) -> Result<Vec<CalendarListEntry>, ProviderError> {
        Ok(self
            .snapshot()
            .calendars
            .keys()
            .map(|name| CalendarListEntry {
                name: name.clone(),
                href: calendar_href(name),
            })
            .collect())
    }

    async fn create_calendar(&self, name: &str) -> Result<CalendarListEntry, ProviderError> {
        validate_required(name, "Calendar name")?;
        let name = name.trim().to_string();
        self.mutate(|state| {
            if state.calendars.contains_key(&name) {
                return Err(ProviderError::AlreadyExists(format!("calendar '{}'", name)));
            }
            state.calendars.insert(name.clone(), BTreeMap::new());
            Ok(())
        })?;
        Ok(CalendarListEntry {
            href: calendar_href(&name),
            name,
        })
    }

    async fn list_tasks(
        &self,
        calendar_name: Option<&str>,
        include_completed: bool,
    ) -> Result<TaskListing, ProviderError> {
        let state = self.snapshot();
        let mut listing = TaskListing::default();
        for (name, tasks) in Self::selected(&state, calendar_name)? {
            for (uid, text) in tasks {
                let (records, warnings) = codec::parse(text);
                listing
                    .warnings
                    .extend(warnings.into_iter().map(|w| (name.clone(), w)));
                if let Some(mut task) = records
                    .iter()
                    .find(|r| r.uid() == Some(uid.as_str()))
                    .and_then(|r| Task::from_record(r, name))
                {
                    task.href = format!("{}{}.ics", calendar_href(name), uid);
                    listing.tasks.push(task);
                }
            }
        }
        listing.retain_pending(include_completed);
        Ok(listing)
    }

    async fn add_task(&self, draft: TaskDraft) -> Result<Task, ProviderError> {
        let mut task = draft.into_task()?;
        self.mutate(|state| Self::insert_new(state, &mut task))?;
        Ok(task)
    }

    async fn update_due_date(
        &self,
        uid: &str,
        calendar_name: &str,
        due: Option<DateType>,
    ) -> Result<Task, ProviderError> {
        self.mutate(|state| {
            let mut stored = Self::stored(state, uid, calendar_name)?;
            if stored.task.is_completed() {
                return Err(ProviderError::Validation(format!(
                    "task '{}' is completed; its due date can no longer change",
                    uid
                )));
            }
            stored.task.due = due;
            let (task, text) = stored.write();
            Self::store(state, calendar_name, uid, text);
            Ok(task)
        })
    }

    async fn complete_task(
        &self,
        uid: &str,
        calendar_name: &str,
        actual_duration: Option<u32>,
    ) -> Result<Task, ProviderError> {
        let now = Utc::now();
        self.mutate(|state| {
            let mut stored = Self::stored(state, uid, calendar_name)?;
            if !stored.task.complete(actual_duration, now) {
                return Ok(stored.task);
            }
            let (task, text) = stored.write();
            Self::store(state, calendar_name, uid, text);
            if let Some(mut next) = task.respawn(now) {
                Self::insert_new(state, &mut next)?;
                log::info!("Scheduled next occurrence {} of {}", next.uid, uid);
            }
            Ok(task)
        })
    }

    async fn delete_task(&self, uid: &str, calendar_name: &str) -> Result<(), ProviderError> {
        self.mutate(|state| {
            Self::stored(state, uid, calendar_name)?;
            if let Some(resources) = state.calendars.get_mut(calendar_name) {
                resources.remove(uid);
            }
            Ok(())
        })
    }

    async fn list_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        calendar_name: Option<&str>,
    ) -> Result<EventListing, ProviderError> {
        check_range(from, to)?;
        let state = self.snapshot();
        let mut listing = EventListing::default();
        for (name, resources) in Self::selected(&state, calendar_name)? {
            for (uid, text) in resources {
                let (records, warnings) = codec::parse(text);
                listing
                    .warnings
                    .extend(warnings.into_iter().map(|w| (name.clone(), w)));
                if let Some(mut event) = records
                    .iter()
                    .find(|r| r.uid() == Some(uid.as_str()))
                    .and_then(|r| Event::from_record(r, name))
                {
                    event.href = format!("{}{}.ics", calendar_href(name), uid);
                    listing.events.extend(event.occurrences(from, to));
                }
            }
        }
        listing.sort();
        Ok(listing)
    }

    async fn add_event(&self, draft: EventDraft) -> Result<Event, ProviderError> {
        let mut event = draft.into_event()?;
        self.mutate(|state| {
            let resources = state
                .calendars
                .get_mut(&event.calendar_name)
                .ok_or_else(|| ProviderError::calendar_not_found(&event.calendar_name))?;
            if resources.contains_key(&event.uid) {
                return Err(ProviderError::AlreadyExists(format!(
                    "event '{}' in calendar '{}'",
                    event.uid, event.calendar_name
                )));
            }
            event.href = format!("{}{}.ics", calendar_href(&event.calendar_name), event.uid);
            resources.insert(
                event.uid.clone(),
                codec::serialize_calendar(&[event.to_record()]),
            );
            Ok(())
        })?;
        Ok(event)
    }

    async fn delete_event(&self, uid: &str, calendar_name: &str) -> Result<(), ProviderError> {
        self.mutate(|state| {
            let resources = state
                .calendars
                .get_mut(calendar_name)
                .ok_or_else(|| ProviderError::calendar_not_found(calendar_name))?;
            let is_event = resources.get(uid).is_some_and(|text| {
                codec::parse(text)
                    .0
                    .iter()
                    .any(|r| r.uid() == Some(uid) && Event::from_record(r, calendar_name).is_some())
            });
            if !is_event {
                return Err(ProviderError::event_not_found(uid, calendar_name));
            }
            resources.remove(uid);
            Ok(())
        })
    }
}
