// File: ./src/provider/caldav.rs
use crate::client::core::{DavRequest, DavResponse, DavTransport, HttpTransport};
use crate::client::dav::{self, DavEntry};
use crate::codec::{self, Record, Warning};
use crate::config::Config;
use crate::error::ProviderError;
use crate::model::{CalendarListEntry, DateType, Event, EventDraft, Task, TaskDraft};
use crate::provider::{EventListing, TaskListing, TaskProvider, check_range};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use http::StatusCode;
use std::sync::Mutex;

/// A task resolved inside one operation: where it lives, the version we saw,
/// and every record of its resource (overrides share the UID).
struct TaskHandle {
    href: String,
    etag: String,
    records: Vec<Record>,
    index: usize,
    task: Task,
}

impl TaskHandle {
    fn from_resource(
        calendar_name: &str,
        href: String,
        etag: Option<String>,
        data: &str,
        warnings: &mut Vec<(String, Warning)>,
    ) -> Vec<TaskHandle> {
        let (records, found) = codec::parse(data);
        warnings.extend(found.into_iter().map(|w| (calendar_name.to_string(), w)));
        let etag = etag.unwrap_or_default();
        let mut handles = Vec::new();
        for (index, record) in records.iter().enumerate() {
            // Recurrence overrides repeat the UID: the master (first) stands for the task.
            let Some(mut task) = Task::from_record(record, calendar_name) else {
                continue;
            };
            if handles.iter().any(|h: &TaskHandle| h.task.uid == task.uid) {
                continue;
            }
            task.href = href.clone();
            task.etag = etag.clone();
            handles.push(TaskHandle {
                href: href.clone(),
                etag: etag.clone(),
                records: records.clone(),
                index,
                task,
            });
        }
        handles
    }

    /// Serialized resource with the task's current fields written back.
    fn updated_body(&mut self) -> String {
        if let Some(record) = self.records.get_mut(self.index) {
            self.task.apply_to_record(record);
        }
        codec::serialize_calendar(&self.records)
    }
}

fn expect_success(
    resp: &DavResponse,
    what: impl FnOnce() -> ProviderError,
) -> Result<(), ProviderError> {
    if resp.status.is_success() {
        Ok(())
    } else if resp.status == StatusCode::NOT_FOUND {
        Err(what())
    } else {
        Err(ProviderError::Unavailable(format!(
            "server answered {}",
            resp.status
        )))
    }
}

/// Events of one resource, master first; overrides sharing its UID are dropped.
fn events_of_resource(
    calendar_name: &str,
    entry: &DavEntry,
    data: &str,
    warnings: &mut Vec<(String, Warning)>,
) -> Vec<Event> {
    let (records, found) = codec::parse(data);
    warnings.extend(found.into_iter().map(|w| (calendar_name.to_string(), w)));
    let mut events: Vec<Event> = Vec::new();
    for record in &records {
        let Some(mut event) = Event::from_record(record, calendar_name) else {
            continue;
        };
        if events.iter().any(|e| e.uid == event.uid) {
            continue;
        }
        event.href = entry.href.clone();
        event.etag = entry.etag.clone().unwrap_or_default();
        events.push(event);
    }
    events
}

/// Collection hrefs are joined with resource names, so they must end in `/`.
fn collection_href(href: String) -> String {
    if href.ends_with('/') {
        href
    } else {
        format!("{}/", href)
    }
}

fn last_segment(href: &str) -> String {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(href)
        .to_string()
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        slug
    }
}

/// CalDAV-backed provider. Calendars are addressed by display name; the
/// name -> collection mapping is cached and refreshed on a miss.
pub struct CalDavProvider<T: DavTransport> {
    transport: T,
    root: String,
    calendars: Mutex<Option<Vec<CalendarListEntry>>>,
}

impl CalDavProvider<HttpTransport> {
    pub fn connect(config: &Config) -> Result<Self, ProviderError> {
        let transport = HttpTransport::from_config(config)?;
        let root = transport.root().to_string();
        Ok(Self::new(transport, &root))
    }
}

impl<T: DavTransport> CalDavProvider<T> {
    pub fn new(transport: T, root: &str) -> Self {
        let mut root = root.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        Self {
            transport,
            root,
            calendars: Mutex::new(None),
        }
    }

    fn cached_calendars(&self) -> Option<Vec<CalendarListEntry>> {
        self.calendars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store_calendars(&self, calendars: Option<Vec<CalendarListEntry>>) {
        *self.calendars.lock().unwrap_or_else(|e| e.into_inner()) = calendars;
    }

    // --- RESOLUTION ---

    async fn fetch_calendars(&self) -> Result<Vec<CalendarListEntry>, ProviderError> {
        let resp = self
            .transport
            .send(
                DavRequest::new("PROPFIND", &self.root)
                    .header("Depth", "1")
                    .xml(dav::propfind_calendars()),
            )
            .await?;
        expect_success(&resp, || {
            ProviderError::Unavailable(format!("collection {} does not exist", self.root))
        })?;

        let mut calendars: Vec<CalendarListEntry> = dav::parse_multistatus(&resp.body)?
            .into_iter()
            .filter(|e| e.is_calendar)
            .map(|e| CalendarListEntry {
                name: e.display_name.unwrap_or_else(|| last_segment(&e.href)),
                href: collection_href(e.href),
            })
            .collect();
        calendars.sort_by(|a, b| a.name.cmp(&b.name));
        self.store_calendars(Some(calendars.clone()));
        Ok(calendars)
    }

    async fn resolve_calendar(&self, name: &str) -> Result<CalendarListEntry, ProviderError> {
        if let Some(found) = self
            .cached_calendars()
            .and_then(|cals| cals.into_iter().find(|c| c.name == name))
        {
            return Ok(found);
        }
        self.fetch_calendars()
            .await?
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ProviderError::calendar_not_found(name))
    }

    async fn query(
        &self,
        calendar: &CalendarListEntry,
        body: String,
    ) -> Result<Vec<DavEntry>, ProviderError> {
        let resp = self
            .transport
            .send(
                DavRequest::new("REPORT", &calendar.href)
                    .header("Depth", "1")
                    .xml(body),
            )
            .await?;
        expect_success(&resp, || ProviderError::calendar_not_found(&calendar.name))?;
        dav::parse_multistatus(&resp.body)
    }

    async fn report(
        &self,
        calendar: &CalendarListEntry,
        body: String,
    ) -> Result<(Vec<TaskHandle>, Vec<(String, Warning)>), ProviderError> {
        let mut warnings = Vec::new();
        let mut handles = Vec::new();
        for entry in self.query(calendar, body).await? {
            let Some(data) = entry.calendar_data.as_deref() else {
                continue;
            };
            handles.extend(TaskHandle::from_resource(
                &calendar.name,
                entry.href.clone(),
                entry.etag.clone(),
                data,
                &mut warnings,
            ));
        }
        for (cal, w) in &warnings {
            log::warn!("{}: {}", cal, w);
        }
        Ok((handles, warnings))
    }

    async fn resolve_task(
        &self,
        calendar: &CalendarListEntry,
        uid: &str,
    ) -> Result<TaskHandle, ProviderError> {
        let (handles, _) = self.report(calendar, dav::report_todo_by_uid(uid)).await?;
        handles
            .into_iter()
            .find(|h| h.task.uid == uid)
            .ok_or_else(|| ProviderError::task_not_found(uid, &calendar.name))
    }

    async fn list_calendar_tasks(
        &self,
        calendar: &CalendarListEntry,
    ) -> Result<TaskListing, ProviderError> {
        let (handles, warnings) = self.report(calendar, dav::report_all_todos()).await?;
        Ok(TaskListing {
            tasks: handles.into_iter().map(|h| h.task).collect(),
            warnings,
        })
    }

    async fn list_calendar_events(
        &self,
        calendar: &CalendarListEntry,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<EventListing, ProviderError> {
        let mut listing = EventListing::default();
        for entry in self.query(calendar, dav::report_events(from, to)).await? {
            let Some(data) = entry.calendar_data.as_deref() else {
                continue;
            };
            for event in events_of_resource(&calendar.name, &entry, data, &mut listing.warnings) {
                listing.events.extend(event.occurrences(from, to));
            }
        }
        for (cal, w) in &listing.warnings {
            log::warn!("{}: {}", cal, w);
        }
        Ok(listing)
    }

    async fn resolve_event(
        &self,
        calendar: &CalendarListEntry,
        uid: &str,
    ) -> Result<Event, ProviderError> {
        let mut warnings = Vec::new();
        for entry in self.query(calendar, dav::report_event_by_uid(uid)).await? {
            let Some(data) = entry.calendar_data.as_deref() else {
                continue;
            };
            if let Some(event) = events_of_resource(&calendar.name, &entry, data, &mut warnings)
                .into_iter()
                .find(|e| e.uid == uid)
            {
                return Ok(event);
            }
        }
        Err(ProviderError::event_not_found(uid, &calendar.name))
    }

    // --- WRITES ---

    /// PUT guarded by `If-None-Match: *`. Returns the new etag.
    async fn put_new(
        &self,
        href: &str,
        records: &[Record],
        calendar_name: &str,
        what: &str,
    ) -> Result<String, ProviderError> {
        let resp = self
            .transport
            .send(
                DavRequest::new("PUT", href)
                    .header("If-None-Match", "*")
                    .calendar(codec::serialize_calendar(records)),
            )
            .await?;
        if resp.status == StatusCode::PRECONDITION_FAILED {
            return Err(ProviderError::AlreadyExists(format!(
                "{} in calendar '{}'",
                what, calendar_name
            )));
        }
        expect_success(&resp, || ProviderError::calendar_not_found(calendar_name))?;
        Ok(resp.etag.unwrap_or_default())
    }

    async fn put_new_task(&self, task: &mut Task) -> Result<(), ProviderError> {
        task.etag = self
            .put_new(
                &task.href,
                &[task.to_record()],
                &task.calendar_name,
                &format!("task '{}'", task.uid),
            )
            .await?;
        Ok(())
    }

    /// DELETE, guarded by the etag when one is known.
    async fn delete_resource(
        &self,
        href: &str,
        etag: &str,
        what: impl FnOnce() -> ProviderError,
    ) -> Result<(), ProviderError> {
        let mut request = DavRequest::new("DELETE", href);
        if !etag.is_empty() {
            request = request.header("If-Match", etag.to_string());
        }
        let resp = self.transport.send(request).await?;
        expect_success(&resp, what)
    }

    async fn put_existing(&self, handle: &mut TaskHandle) -> Result<(), ProviderError> {
        let body = handle.updated_body();
        let mut request = DavRequest::new("PUT", &handle.href);
        if !handle.etag.is_empty() {
            request = request.header("If-Match", handle.etag.clone());
        }
        let resp = self.transport.send(request.calendar(body)).await?;
        if resp.status == StatusCode::PRECONDITION_FAILED {
            return Err(ProviderError::Unavailable(format!(
                "task '{}' changed on the server, retry",
                handle.task.uid
            )));
        }
        expect_success(&resp, || {
            ProviderError::task_not_found(&handle.task.uid, &handle.task.calendar_name)
        })?;
        handle.etag = resp.etag.unwrap_or_default();
        handle.task.etag = handle.etag.clone();
        Ok(())
    }
}

impl<T: DavTransport> TaskProvider for CalDavProvider<T> {
    async fn list_calendars(&self) -> Result<Vec<CalendarListEntry>, ProviderError> {
        self.fetch_calendars().await
    }

    async fn create_calendar(&self, name: &str) -> Result<CalendarListEntry, ProviderError> {
        crate::model::item::validate_required(name, "Calendar name")?;
        let name = name.trim();
        if self.fetch_calendars().await?.iter().any(|c| c.name == name) {
            return Err(ProviderError::AlreadyExists(format!("calendar '{}'", name)));
        }

        let href = format!("{}{}/", self.root, slugify(name));
        let resp = self
            .transport
            .send(DavRequest::new("MKCALENDAR", &href).xml(dav::mkcalendar(name)))
            .await?;
        if matches!(
            resp.status,
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::PRECONDITION_FAILED
        ) {
            return Err(ProviderError::AlreadyExists(format!("calendar '{}'", name)));
        }
        expect_success(&resp, || {
            ProviderError::Unavailable(format!("collection {} does not exist", self.root))
        })?;

        self.store_calendars(None);
        log::info!("Created calendar '{}' at {}", name, href);
        Ok(CalendarListEntry {
            name: name.to_string(),
            href,
        })
    }

    async fn list_tasks(
        &self,
        calendar_name: Option<&str>,
        include_completed: bool,
    ) -> Result<TaskListing, ProviderError> {
        let mut listing = match calendar_name {
            Some(name) => {
                let calendar = self.resolve_calendar(name).await?;
                self.list_calendar_tasks(&calendar).await?
            }
            None => {
                let calendars = self.fetch_calendars().await?;
                let parts =
                    try_join_all(calendars.iter().map(|cal| self.list_calendar_tasks(cal)))
                        .await?;
                let mut all = TaskListing::default();
                for part in parts {
                    all.extend(part);
                }
                all
            }
        };
        listing.retain_pending(include_completed);
        Ok(listing)
    }

    async fn add_task(&self, draft: TaskDraft) -> Result<Task, ProviderError> {
        let mut task = draft.into_task()?;
        let calendar = self.resolve_calendar(&task.calendar_name).await?;
        task.href = format!("{}{}.ics", calendar.href, task.uid);
        self.put_new_task(&mut task).await?;
        log::debug!("Added task {} to '{}'", task.uid, calendar.name);
        Ok(task)
    }

    async fn update_due_date(
        &self,
        uid: &str,
        calendar_name: &str,
        due: Option<DateType>,
    ) -> Result<Task, ProviderError> {
        let calendar = self.resolve_calendar(calendar_name).await?;
        let mut handle = self.resolve_task(&calendar, uid).await?;
        if handle.task.is_completed() {
            return Err(ProviderError::Validation(format!(
                "task '{}' is completed; its due date can no longer change",
                uid
            )));
        }
        handle.task.due = due;
        self.put_existing(&mut handle).await?;
        Ok(handle.task)
    }

    async fn complete_task(
        &self,
        uid: &str,
        calendar_name: &str,
        actual_duration: Option<u32>,
    ) -> Result<Task, ProviderError> {
        let calendar = self.resolve_calendar(calendar_name).await?;
        let mut handle = self.resolve_task(&calendar, uid).await?;
        let now = Utc::now();
        if !handle.task.complete(actual_duration, now) {
            log::debug!("Task {} already completed", uid);
            return Ok(handle.task);
        }
        self.put_existing(&mut handle).await?;

        if let Some(mut next) = handle.task.respawn(now) {
            next.href = format!("{}{}.ics", calendar.href, next.uid);
            // The completion above already landed; a lost occurrence is logged, not returned.
            match self.put_new_task(&mut next).await {
                Ok(()) => log::info!("Scheduled next occurrence {} of {}", next.uid, uid),
                Err(e) => log::warn!("Could not create next occurrence of {}: {}", uid, e),
            }
        }
        Ok(handle.task)
    }

    async fn delete_task(&self, uid: &str, calendar_name: &str) -> Result<(), ProviderError> {
        let calendar = self.resolve_calendar(calendar_name).await?;
        let handle = self.resolve_task(&calendar, uid).await?;
        self.delete_resource(&handle.href, &handle.etag, || {
            ProviderError::task_not_found(uid, calendar_name)
        })
        .await
    }

    async fn list_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        calendar_name: Option<&str>,
    ) -> Result<EventListing, ProviderError> {
        check_range(from, to)?;
        let mut listing = match calendar_name {
            Some(name) => {
                let calendar = self.resolve_calendar(name).await?;
                self.list_calendar_events(&calendar, from, to).await?
            }
            None => {
                let calendars = self.fetch_calendars().await?;
                let parts = try_join_all(
                    calendars
                        .iter()
                        .map(|cal| self.list_calendar_events(cal, from, to)),
                )
                .await?;
                let mut all = EventListing::default();
                for part in parts {
                    all.extend(part);
                }
                all
            }
        };
        listing.sort();
        Ok(listing)
    }

    async fn add_event(&self, draft: EventDraft) -> Result<Event, ProviderError> {
        let mut event = draft.into_event()?;
        let calendar = self.resolve_calendar(&event.calendar_name).await?;
        event.href = format!("{}{}.ics", calendar.href, event.uid);
        event.etag = self
            .put_new(
                &event.href,
                &[event.to_record()],
                &calendar.name,
                &format!("event '{}'", event.uid),
            )
            .await?;
        log::debug!("Added event {} to '{}'", event.uid, calendar.name);
        Ok(event)
    }

    async fn delete_event(&self, uid: &str, calendar_name: &str) -> Result<(), ProviderError> {
        let calendar = self.resolve_calendar(calendar_name).await?;
        let event = self.resolve_event(&calendar, uid).await?;
        self.delete_resource(&event.href, &event.etag, || {
            ProviderError::event_not_found(uid, calendar_name)
        })
        .await
    }
}
