// File: ./src/model/mod.rs
pub mod adapter;
pub mod event;
pub mod item;
pub mod recurrence;

pub use event::{Event, EventDraft};
pub use item::{CalendarListEntry, DEFAULT_CATEGORY, DateType, Task, TaskDraft, TaskStatus};
pub use recurrence::RecurrenceEngine;
