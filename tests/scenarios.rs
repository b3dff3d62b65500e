mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, TimeDelta};
use nutrisync::application::diary::DiaryService;
use nutrisync::application::optimistic::Outcome;
use nutrisync::application::reminders::{
    REMINDER_SETTINGS_PATH, ReminderScheduler, SkipReason, TickOutcome,
};
use nutrisync::application::water::{WATER_TODAY_PATH, WaterTracker};
use nutrisync::events::{DiaryChange, EventBus, SignalName};
use nutrisync_api_types::MealWrite;
use reqwest::Method;
use serde_json::json;

use support::{Muted, RecordingNotifier, ScriptedApi, at, client, start_settled};

#[tokio::test]
async fn foods_are_served_from_cache_until_ttl_passes() {
    let api = ScriptedApi::new();
    api.respond(Method::GET, "/api/foods/", json!([{"id": 1, "name": "A"}]));
    let (client, clock) = client(&api, "2024-01-01T12:00:00+00:00");

    let first = client.get_value("/api/foods/", &[]).await.expect("t=0");
    assert_eq!(api.count(&Method::GET, "/api/foods/"), 1);

    clock.advance(TimeDelta::seconds(30));
    let cached = client.get_value("/api/foods/", &[]).await.expect("t=30");
    assert_eq!(cached, first);
    assert_eq!(api.count(&Method::GET, "/api/foods/"), 1);

    clock.advance(TimeDelta::seconds(31));
    client.get_value("/api/foods/", &[]).await.expect("t=61");
    assert_eq!(api.count(&Method::GET, "/api/foods/"), 2);
}

#[tokio::test]
async fn logging_a_meal_refreshes_summary_and_announces_diary_change() {
    let api = ScriptedApi::new();
    api.respond(Method::GET, "/api/daily-summary/", json!({"totals": {"calories": 0.0}}));
    api.respond(
        Method::POST,
        "/api/meals/",
        json!({"id": 10, "meal_type": "lunch", "quantity": 1.0, "date": "2024-01-01"}),
    );
    let (client, _) = client(&api, "2024-01-01T12:00:00+00:00");
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = bus.subscribe(SignalName::DiaryUpdated, move |signal| {
        sink.lock()
            .expect("sink")
            .push(signal.decode::<DiaryChange>().known());
    });
    let diary = DiaryService::new(client.clone(), bus);
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");

    client
        .get_value("/api/daily-summary/", &[("date", "2024-01-01")])
        .await
        .expect("summary");
    diary
        .add_meal(&MealWrite {
            food_id: 3,
            meal_type: "lunch".into(),
            quantity: 1.0,
            date,
            notes: None,
        })
        .await
        .expect("meal logged");

    client
        .get_value("/api/daily-summary/", &[("date", "2024-01-01")])
        .await
        .expect("summary again");
    assert_eq!(api.count(&Method::GET, "/api/daily-summary/"), 2);
    assert_eq!(*seen.lock().expect("sink"), vec![Some(DiaryChange { date })]);
}

#[tokio::test]
async fn water_tap_is_shown_immediately_and_confirmed() {
    let api = ScriptedApi::new();
    api.respond(Method::GET, WATER_TODAY_PATH, json!({"amount_ml": 500}));
    api.respond(Method::POST, WATER_TODAY_PATH, json!({"amount_ml": 750}));
    let (client, _) = client(&api, "2024-01-01T12:00:00+00:00");
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    let tracker = WaterTracker::new(client, EventBus::new(), date);
    tracker.load().await.expect("load");

    let mut updates = tracker.controller().watch();
    let _ = updates.borrow_and_update();
    let outcome = tracker.add(250).await;

    assert_eq!(
        outcome,
        Outcome::Confirmed {
            value: 750,
            reconciled: false
        }
    );
    assert_eq!(tracker.amount_ml(), 750);
    assert_eq!(updates.borrow_and_update().displayed, 750);

    tracker.controller().settle().await;
    assert_eq!(tracker.amount_ml(), 750);
    assert_eq!(api.count(&Method::GET, WATER_TODAY_PATH), 1);
}

#[tokio::test]
async fn failed_water_tap_reverts_and_refetches() {
    let api = ScriptedApi::new();
    api.respond(Method::GET, WATER_TODAY_PATH, json!({"amount_ml": 500}));
    api.fail(Method::POST, WATER_TODAY_PATH);
    let (client, _) = client(&api, "2024-01-01T12:00:00+00:00");
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    let tracker = WaterTracker::new(client, EventBus::new(), date);
    tracker.load().await.expect("load");

    let outcome = tracker.add(250).await;
    assert!(matches!(outcome, Outcome::RolledBack { restored: 500, .. }));
    assert_eq!(tracker.amount_ml(), 500);

    tracker.controller().settle().await;
    assert_eq!(api.count(&Method::GET, WATER_TODAY_PATH), 2);
}

#[tokio::test(start_paused = true)]
async fn breakfast_reminder_skips_weekend_and_fires_once_on_monday() {
    let api = ScriptedApi::new();
    api.respond(
        Method::GET,
        REMINDER_SETTINGS_PATH,
        json!({
            "reminders_enabled": true,
            "breakfast_time": "08:00",
            "active_days": "0,1,2,3,4",
            "browser_notifications": true
        }),
    );
    // Saturday
    let (client, clock) = client(&api, "2024-01-06T08:00:00+00:00");
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = Arc::new(ReminderScheduler::new(
        client,
        clock.clone(),
        notifier.clone(),
        Arc::new(Muted),
        Duration::from_secs(24 * 60 * 60),
    ));
    assert_eq!(
        start_settled(&scheduler).await,
        TickOutcome::Skipped(SkipReason::InactiveDay)
    );
    assert_eq!(
        scheduler.tick().await,
        TickOutcome::Skipped(SkipReason::InactiveDay)
    );
    assert!(notifier.tags().is_empty());

    clock.set(at("2024-01-08T08:00:00+00:00"));
    let first = scheduler.tick().await;
    let second = scheduler.tick().await;

    assert!(matches!(first, TickOutcome::Evaluated { ref dispatched, .. } if dispatched.len() == 1));
    assert!(matches!(second, TickOutcome::Evaluated { ref dispatched, .. } if dispatched.is_empty()));
    assert_eq!(notifier.tags(), vec!["meal-reminder-Breakfast".to_string()]);
    assert!(scheduler.stop());
}
