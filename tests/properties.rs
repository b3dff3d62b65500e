mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, TimeDelta};
use futures::FutureExt;
use nutrisync::application::error::ApiError;
use nutrisync::application::optimistic::{OptimisticController, Reader};
use nutrisync::application::reminders::{
    REMINDER_SETTINGS_PATH, ReminderScheduler, SkipReason, TickOutcome,
};
use nutrisync::events::{EventBus, SignalName};
use reqwest::Method;
use serde_json::json;

use support::{Muted, RecordingNotifier, ScriptedApi, client, start_settled};

const PATHS: [&str; 4] = [
    "/api/foods/",
    "/api/daily-summary/",
    "/api/water/today/",
    "/api/fasting/active/",
];

#[tokio::test]
async fn reads_within_ttl_never_reach_the_network() {
    for gap in [0, 1, 15, 30, 59] {
        let api = ScriptedApi::new();
        for path in PATHS {
            api.respond(Method::GET, path, json!({"path": path}));
        }
        let (client, clock) = client(&api, "2024-01-01T09:00:00+00:00");

        for path in PATHS {
            client.get_value(path, &[]).await.expect("first read");
        }
        clock.advance(TimeDelta::seconds(gap));
        for path in PATHS {
            client.get_value(path, &[]).await.expect("second read");
            assert_eq!(api.count(&Method::GET, path), 1, "gap {gap}s on {path}");
        }
    }
}

#[tokio::test]
async fn every_write_leaves_nothing_readable_from_cache() {
    for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
        for succeeds in [true, false] {
            let api = ScriptedApi::new();
            for path in PATHS {
                api.respond(Method::GET, path, json!([]));
            }
            if succeeds {
                api.respond(method.clone(), "/api/weight/", json!({}));
            } else {
                api.fail(method.clone(), "/api/weight/");
            }
            let (client, _) = client(&api, "2024-01-01T09:00:00+00:00");

            for path in PATHS {
                client.get_value(path, &[]).await.expect("warm cache");
            }
            let result = client
                .write_value(method.clone(), "/api/weight/", Some(json!({})))
                .await;
            assert_eq!(result.is_ok(), succeeds);
            assert!(client.cache().is_empty(), "{method} left entries behind");

            for path in PATHS {
                client.get_value(path, &[]).await.expect("re-read");
                assert_eq!(api.count(&Method::GET, path), 2, "{method} on {path}");
            }
        }
    }
}

fn scheduler_for(
    active_days: &str,
    start: &str,
) -> (
    Arc<ReminderScheduler>,
    Arc<RecordingNotifier>,
    Arc<nutrisync::infra::clock::ManualClock>,
) {
    let api = ScriptedApi::new();
    api.respond(
        Method::GET,
        REMINDER_SETTINGS_PATH,
        json!({
            "reminders_enabled": true,
            "breakfast_time": "08:00",
            "lunch_time": "08:00",
            "dinner_time": "19:00",
            "snack_time": "15:00",
            "active_days": active_days,
            "browser_notifications": true
        }),
    );
    let (client, clock) = client(&api, start);
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = Arc::new(ReminderScheduler::new(
        client,
        clock.clone(),
        notifier.clone(),
        Arc::new(Muted),
        Duration::from_secs(24 * 60 * 60),
    ));
    (scheduler, notifier, clock)
}

#[tokio::test(start_paused = true)]
async fn each_reminder_fires_at_most_once_per_day() {
    let (scheduler, notifier, clock) = scheduler_for("0,1,2,3,4,5,6", "2024-01-01T07:58:00+00:00");
    start_settled(&scheduler).await;

    // Tick every 20 seconds across two mornings.
    for _ in 0..2 {
        for _ in 0..9 {
            scheduler.tick().await;
            clock.advance(TimeDelta::seconds(20));
        }
        clock.advance(TimeDelta::days(1) - TimeDelta::seconds(180));
    }

    let mut tags = notifier.tags();
    tags.sort();
    assert_eq!(
        tags,
        vec![
            "meal-reminder-Breakfast".to_string(),
            "meal-reminder-Breakfast".to_string(),
            "meal-reminder-Lunch".to_string(),
            "meal-reminder-Lunch".to_string(),
        ]
    );
    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn nothing_fires_on_inactive_days() {
    // Tuesday and Thursday only.
    let (scheduler, notifier, clock) = scheduler_for("1,3", "2024-01-01T08:00:00+00:00");
    start_settled(&scheduler).await;

    let mut fired_on = Vec::new();
    for _ in 0..7 {
        let before = notifier.tags().len();
        let outcome = scheduler.tick().await;
        let weekday = clock_weekday(&clock);
        if notifier.tags().len() > before {
            fired_on.push(weekday);
        } else {
            assert!(
                matches!(outcome, TickOutcome::Skipped(SkipReason::InactiveDay)),
                "unexpected {outcome:?} on {weekday}"
            );
        }
        clock.advance(TimeDelta::days(1));
    }

    assert_eq!(fired_on, vec![chrono::Weekday::Tue, chrono::Weekday::Thu]);
    scheduler.stop();
}

fn clock_weekday(clock: &nutrisync::infra::clock::ManualClock) -> chrono::Weekday {
    use nutrisync::infra::clock::Clock;
    clock.now().weekday()
}

fn controller(start: i64, server: i64) -> (OptimisticController<i64>, ScriptedApi) {
    let api = ScriptedApi::new();
    let (client, _) = client(&api, "2024-01-01T09:00:00+00:00");
    let reader: Reader<i64> = Arc::new(move || async move { Ok::<_, ApiError>(server) }.boxed());
    let controller = OptimisticController::new(
        "counter",
        start,
        client.invalidator().clone(),
        EventBus::new(),
        SignalName::WaterUpdated,
        reader,
    );
    (controller, api)
}

#[tokio::test]
async fn failed_writes_restore_the_value_shown_before_the_action() {
    for (start, delta) in [(0, 250), (500, 250), (750, -250), (1000, 1000)] {
        let (controller, _) = controller(start, start);
        let outcome = controller
            .apply(
                |value| value + delta,
                |_| async { Err::<i64, _>(ApiError::Connection("offline".into())) },
            )
            .await;

        assert!(!outcome.is_confirmed());
        assert_eq!(controller.displayed(), start);
        controller.settle().await;
        assert_eq!(controller.displayed(), start);
    }
}

#[tokio::test]
async fn reapplying_a_confirmed_value_changes_nothing() {
    let (controller, _) = controller(500, 750);
    controller
        .apply(|value| value + 250, |_| async { Ok(750) })
        .await;
    let confirmed = controller.snapshot();

    for _ in 0..3 {
        assert!(controller.accept(750));
        assert_eq!(controller.snapshot(), confirmed);
    }
}
