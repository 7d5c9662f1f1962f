// Local backend: same contract as CalDAV, kept in memory or in a file.
use chrono::{Days, NaiveDate, TimeZone, Utc};
use taskpulse::ProviderError;
use taskpulse::context::{AppContext, TestContext};
use taskpulse::model::{DateType, EventDraft, TaskDraft, TaskStatus};
use taskpulse::provider::{LocalProvider, TaskProvider};

async fn provider_with(calendars: &[&str]) -> LocalProvider {
    let p = LocalProvider::new();
    for name in calendars {
        p.create_calendar(name).await.unwrap();
    }
    p
}

#[tokio::test]
async fn test_calendars_are_created_once() {
    let p = provider_with(&["Work"]).await;
    let err = p.create_calendar("Work").await.unwrap_err();
    assert!(matches!(err, ProviderError::AlreadyExists(_)));
    let err = p.create_calendar("  ").await.unwrap_err();
    assert!(matches!(err, ProviderError::Validation(_)));

    p.create_calendar("Home").await.unwrap();
    let names: Vec<String> = p
        .list_calendars()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Home", "Work"]);
}

#[tokio::test]
async fn test_add_to_missing_calendar_changes_nothing() {
    let p = provider_with(&["Work"]).await;
    let err = p
        .add_task(TaskDraft::new("Boo", "Ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));

    let names: Vec<String> = p
        .list_calendars()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Work"]);
    assert!(p.list_tasks(None, true).await.unwrap().tasks.is_empty());
}

#[tokio::test]
async fn test_add_then_list_returns_the_task() {
    let p = provider_with(&["Work"]).await;
    let added = p
        .add_task(
            TaskDraft::new("Write report", "Work")
                .with_due("2025-03-01")
                .with_description("Q1, with appendix; final")
                .with_category("writing"),
        )
        .await
        .unwrap();
    assert!(added.href.starts_with("local://Work/"));

    let listing = p.list_tasks(Some("Work"), false).await.unwrap();
    assert!(listing.warnings.is_empty());
    assert_eq!(listing.tasks, vec![added.clone()]);
    let task = &listing.tasks[0];
    assert_eq!(task.description.as_deref(), Some("Q1, with appendix; final"));
    assert_eq!(task.category(), "writing");
    assert!(matches!(task.due, Some(DateType::AllDay(_))));
}

#[tokio::test]
async fn test_invalid_drafts_are_rejected() {
    let p = provider_with(&["Work"]).await;
    for draft in [
        TaskDraft::new("", "Work"),
        TaskDraft::new("Report", ""),
        TaskDraft::new("Report", "Work").with_due("tomorrow"),
        TaskDraft::new("Report", "Work").with_rrule("FREQ=WEEKLY;BYDAY=MO"),
    ] {
        let err = p.add_task(draft).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)), "{:?}", err);
    }
    assert!(p.list_tasks(None, true).await.unwrap().tasks.is_empty());
}

#[tokio::test]
async fn test_unknown_calendar_or_task_is_not_found() {
    let p = provider_with(&["Work"]).await;
    assert!(matches!(
        p.list_tasks(Some("Ghost"), true).await.unwrap_err(),
        ProviderError::NotFound(_)
    ));
    assert!(matches!(
        p.complete_task("nope", "Work", Some(5)).await.unwrap_err(),
        ProviderError::NotFound(_)
    ));
    assert!(matches!(
        p.update_due_date("nope", "Ghost", None).await.unwrap_err(),
        ProviderError::NotFound(_)
    ));
    assert!(matches!(
        p.delete_task("nope", "Work").await.unwrap_err(),
        ProviderError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_update_due_date_and_clear_it() {
    let p = provider_with(&["Work"]).await;
    let task = p
        .add_task(TaskDraft::new("Plan", "Work").with_due("2025-01-01"))
        .await
        .unwrap();

    let due = DateType::parse_input("2025-02-15T09:30:00Z").unwrap();
    let updated = p
        .update_due_date(&task.uid, "Work", Some(due))
        .await
        .unwrap();
    assert_eq!(updated.due, Some(due));

    let cleared = p.update_due_date(&task.uid, "Work", None).await.unwrap();
    assert_eq!(cleared.due, None);
    let listed = p.list_tasks(Some("Work"), false).await.unwrap();
    assert_eq!(listed.tasks[0].due, None);
}

#[tokio::test]
async fn test_complete_is_idempotent() {
    let p = provider_with(&["Work"]).await;
    let task = p
        .add_task(TaskDraft::new("Fix bug", "Work").with_category("bugfix"))
        .await
        .unwrap();

    let first = p.complete_task(&task.uid, "Work", Some(25)).await.unwrap();
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(first.actual_duration, Some(25));
    assert!(first.completed_at.is_some());

    let second = p.complete_task(&task.uid, "Work", Some(90)).await.unwrap();
    assert_eq!(second.actual_duration, Some(25));
    assert_eq!(
        second.completed_at.map(|t| t.timestamp()),
        first.completed_at.map(|t| t.timestamp())
    );

    assert!(p.list_tasks(Some("Work"), false).await.unwrap().tasks.is_empty());
    let all = p.list_tasks(Some("Work"), true).await.unwrap();
    assert_eq!(all.tasks.len(), 1);

    let err = p
        .update_due_date(&task.uid, "Work", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Validation(_)));
}

#[tokio::test]
async fn test_completing_recurring_task_spawns_next() {
    let p = provider_with(&["Home"]).await;
    let task = p
        .add_task(
            TaskDraft::new("Water plants", "Home")
                .with_due("2025-01-01")
                .with_rrule("FREQ=DAILY"),
        )
        .await
        .unwrap();

    p.complete_task(&task.uid, "Home", Some(5)).await.unwrap();
    let pending = p.list_tasks(Some("Home"), false).await.unwrap().tasks;
    assert_eq!(pending.len(), 1);
    let next = &pending[0];
    assert_ne!(next.uid, task.uid);
    assert_eq!(next.summary, "Water plants");
    assert_eq!(next.rrule.as_deref(), Some("FREQ=DAILY"));
    let first_day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    assert!(matches!(next.due, Some(DateType::AllDay(d)) if d > first_day));

    // A second completion of the same occurrence spawns nothing more.
    p.complete_task(&task.uid, "Home", Some(5)).await.unwrap();
    assert_eq!(p.list_tasks(Some("Home"), true).await.unwrap().tasks.len(), 2);
}

#[tokio::test]
async fn test_delete_removes_task() {
    let p = provider_with(&["Work"]).await;
    let task = p.add_task(TaskDraft::new("Old", "Work")).await.unwrap();
    p.delete_task(&task.uid, "Work").await.unwrap();
    assert!(p.list_tasks(None, true).await.unwrap().tasks.is_empty());
}

#[tokio::test]
async fn test_aggregate_listing_spans_calendars() {
    let p = provider_with(&["Home", "Work"]).await;
    p.add_task(TaskDraft::new("A", "Home")).await.unwrap();
    p.add_task(TaskDraft::new("B", "Work")).await.unwrap();
    let mut cals: Vec<String> = p
        .list_tasks(None, false)
        .await
        .unwrap()
        .tasks
        .into_iter()
        .map(|t| t.calendar_name)
        .collect();
    cals.sort();
    assert_eq!(cals, vec!["Home", "Work"]);
}

#[tokio::test]
async fn test_file_backed_store_survives_reopen() {
    let ctx = TestContext::new();
    let uid = {
        let p = LocalProvider::from_context(&ctx).unwrap();
        p.create_calendar("Work").await.unwrap();
        let task = p
            .add_task(TaskDraft::new("Persist me", "Work").with_due("2025-05-05"))
            .await
            .unwrap();
        p.complete_task(&task.uid, "Work", Some(12)).await.unwrap();
        task.uid
    };
    assert!(ctx.get_local_store_path().unwrap().exists());

    let reopened = LocalProvider::from_context(&ctx).unwrap();
    let tasks = reopened.list_tasks(Some("Work"), true).await.unwrap().tasks;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].uid, uid);
    assert_eq!(tasks[0].actual_duration, Some(12));
    assert!(tasks[0].is_completed());
}

#[tokio::test]
async fn test_recent_listing_keeps_undated_and_recent_tasks() {
    let p = provider_with(&["Work"]).await;
    let today = Utc::now().date_naive();
    let day = |back: u64| {
        today
            .checked_sub_days(Days::new(back))
            .unwrap()
            .format("%Y-%m-%d")
            .to_string()
    };
    for (summary, due) in [("today", day(0)), ("six days ago", day(6)), ("last month", day(30))] {
        p.add_task(TaskDraft::new(summary, "Work").with_due(&due))
            .await
            .unwrap();
    }
    p.add_task(TaskDraft::new("someday", "Work")).await.unwrap();
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap().format("%Y-%m-%d").to_string();
    p.add_task(TaskDraft::new("tomorrow", "Work").with_due(&tomorrow))
        .await
        .unwrap();

    let mut names: Vec<String> = p
        .list_recent_tasks(Some("Work"), false, 7)
        .await
        .unwrap()
        .tasks
        .into_iter()
        .map(|t| t.summary)
        .collect();
    names.sort();
    assert_eq!(names, vec!["six days ago", "someday", "today"]);

    let today_only = p.list_recent_tasks(None, false, 1).await.unwrap().tasks;
    assert_eq!(today_only.len(), 2);

    let err = p.list_recent_tasks(None, false, 0).await.unwrap_err();
    assert!(matches!(err, ProviderError::Validation(_)));
    let err = p.list_recent_tasks(Some("Ghost"), false, 7).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn test_events_listed_by_range_and_kept_apart_from_tasks() {
    let p = provider_with(&["Home", "Work"]).await;
    let standup = p
        .add_event(
            EventDraft::new("Standup", "Work", "2025-07-07T09:00:00Z", "2025-07-07T09:15:00Z")
                .with_rrule("FREQ=DAILY")
                .with_location("Room 4"),
        )
        .await
        .unwrap();
    assert!(standup.href.starts_with("local://Work/"));
    p.add_event(EventDraft::new("Dentist", "Home", "2025-07-08T15:00:00+02:00", "2025-07-08T16:00:00+02:00"))
        .await
        .unwrap();
    p.add_event(EventDraft::new("Holiday", "Home", "2025-08-01", "2025-08-15"))
        .await
        .unwrap();
    p.add_task(TaskDraft::new("Not an event", "Work").with_due("2025-07-08"))
        .await
        .unwrap();

    let from = Utc.with_ymd_and_hms(2025, 7, 8, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2025, 7, 10, 0, 0, 0).unwrap();
    let listing = p.list_events(from, to, None).await.unwrap();
    let seen: Vec<(String, DateType)> = listing
        .events
        .iter()
        .map(|e| (e.summary.clone(), e.start))
        .collect();
    assert_eq!(
        seen,
        vec![
            ("Standup".to_string(), DateType::Specific(Utc.with_ymd_and_hms(2025, 7, 8, 9, 0, 0).unwrap())),
            ("Dentist".to_string(), DateType::Specific(Utc.with_ymd_and_hms(2025, 7, 8, 13, 0, 0).unwrap())),
            ("Standup".to_string(), DateType::Specific(Utc.with_ymd_and_hms(2025, 7, 9, 9, 0, 0).unwrap())),
        ]
    );
    assert!(listing.events.iter().all(|e| e.summary != "Holiday"));

    let work_only = p.list_events(from, to, Some("Work")).await.unwrap();
    assert_eq!(work_only.events.len(), 2);
    assert!(work_only.events.iter().all(|e| e.uid == standup.uid));

    // Events never surface as tasks.
    assert_eq!(p.list_tasks(None, true).await.unwrap().tasks.len(), 1);

    assert!(matches!(
        p.list_events(to, from, None).await.unwrap_err(),
        ProviderError::Validation(_)
    ));
    assert!(matches!(
        p.list_events(from, to, Some("Ghost")).await.unwrap_err(),
        ProviderError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_event_delete_and_validation() {
    let p = provider_with(&["Work"]).await;
    let err = p
        .add_event(EventDraft::new("Late", "Work", "2025-07-08T10:00:00Z", "2025-07-08T09:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Validation(_)));
    let err = p
        .add_event(EventDraft::new("Nowhere", "Ghost", "2025-07-08", "2025-07-09"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));

    let event = p
        .add_event(EventDraft::new("Review", "Work", "2025-07-08", "2025-07-09"))
        .await
        .unwrap();
    let task = p.add_task(TaskDraft::new("Keep me", "Work")).await.unwrap();

    // Tasks and events are only removed through their own operation.
    assert!(matches!(
        p.delete_event(&task.uid, "Work").await.unwrap_err(),
        ProviderError::NotFound(_)
    ));
    assert!(matches!(
        p.delete_task(&event.uid, "Work").await.unwrap_err(),
        ProviderError::NotFound(_)
    ));

    p.delete_event(&event.uid, "Work").await.unwrap();
    let from = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
    assert!(p.list_events(from, to, None).await.unwrap().events.is_empty());
    assert_eq!(p.list_tasks(None, true).await.unwrap().tasks.len(), 1);
    assert!(matches!(
        p.delete_event(&event.uid, "Work").await.unwrap_err(),
        ProviderError::NotFound(_)
    ));
}
