//! Meal reminder scheduler.
//!
//! One instance per process. While running it evaluates once on start and then
//! on a fixed interval, reads
//! the reminder settings through the cached API client and dispatches a
//! notification for every event whose time equals the current minute, at most
//! once per event key and calendar day. A tick that finds the previous one
//! still running is skipped. Missed minutes are never caught up.
//!
//! Dispatch happens under the same lock that [`ReminderScheduler::stop`]
//! takes to clear the running flag, so nothing is dispatched once `stop`
//! has returned, even by a tick whose settings fetch was already in flight.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Datelike;
use metrics::counter;
use nutrisync_api_types::ReminderSettings;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::cache::lock::mutex_lock;
use crate::domain::reminders::{ClockTime, EventKey, FireLog, ReminderConfig};
use crate::infra::audio::{SoundCue, SoundPlayer};
use crate::infra::clock::Clock;
use crate::infra::notify::{Notification, Notifier, Permission};

use super::client::ApiClient;

const SOURCE: &str = "application::reminders";
const METRIC_REMINDER_DISPATCHED: &str = "nutrisync_reminder_dispatched_total";

pub const REMINDER_SETTINGS_PATH: &str = "/api/meal-reminders/my_settings/";
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The previous tick is still running.
    Overlap,
    Stopped,
    /// Settings could not be fetched or did not parse.
    SettingsUnavailable,
    Disabled,
    InactiveDay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Evaluated {
        dispatched: Vec<EventKey>,
        /// Due but not shown because notification permission is missing.
        suppressed: Vec<EventKey>,
    },
}

struct SchedulerState {
    running: bool,
    fires: FireLog,
}

pub struct ReminderScheduler {
    client: ApiClient,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    sound: Arc<dyn SoundPlayer>,
    tick_every: Duration,
    state: Mutex<SchedulerState>,
    tick_gate: AsyncMutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    background: watch::Sender<Option<TickOutcome>>,
}

impl ReminderScheduler {
    pub fn new(
        client: ApiClient,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        sound: Arc<dyn SoundPlayer>,
        tick_every: Duration,
    ) -> Self {
        Self {
            client,
            clock,
            notifier,
            sound,
            tick_every,
            state: Mutex::new(SchedulerState {
                running: false,
                fires: FireLog::new(),
            }),
            tick_gate: AsyncMutex::new(()),
            task: Mutex::new(None),
            background: watch::channel(None).0,
        }
    }

    pub fn is_running(&self) -> bool {
        mutex_lock(&self.state, SOURCE, "is_running").running
    }

    /// Outcome of the latest tick run by the background ticker.
    pub fn watch_background(&self) -> watch::Receiver<Option<TickOutcome>> {
        self.background.subscribe()
    }

    /// Start ticking. The first evaluation runs as soon as the ticker task is
    /// polled, so a reminder due in the current minute is not lost. Returns
    /// `false` if already running; a second call never creates a second ticker.
    /// Must be called within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        {
            let mut state = mutex_lock(&self.state, SOURCE, "start");
            if state.running {
                debug!("reminder scheduler already running");
                return false;
            }
            state.running = true;
        }

        if self.notifier.permission() == Permission::Default {
            let permission = self.notifier.request_permission();
            info!(permission = permission.as_str(), "notification permission requested");
        }

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(run_ticks(weak, self.tick_every));
        if let Some(previous) = mutex_lock(&self.task, SOURCE, "start").replace(handle) {
            previous.abort();
        }
        info!(tick_seconds = self.tick_every.as_secs(), "reminder scheduler started");
        true
    }

    /// Stop ticking. Returns `false` if already stopped. Once this returns no
    /// further notification is dispatched.
    pub fn stop(&self) -> bool {
        {
            let mut state = mutex_lock(&self.state, SOURCE, "stop");
            if !state.running {
                return false;
            }
            state.running = false;
        }
        if let Some(handle) = mutex_lock(&self.task, SOURCE, "stop").take() {
            handle.abort();
        }
        info!("reminder scheduler stopped");
        true
    }

    /// Evaluate the current minute once.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_gate) = self.tick_gate.try_lock() else {
            debug!("previous reminder tick still running, skipping");
            return TickOutcome::Skipped(SkipReason::Overlap);
        };
        if !self.is_running() {
            return TickOutcome::Skipped(SkipReason::Stopped);
        }

        let config = match self.load_config().await {
            Some(config) => config,
            None => return TickOutcome::Skipped(SkipReason::SettingsUnavailable),
        };
        if !config.enabled {
            return TickOutcome::Skipped(SkipReason::Disabled);
        }

        let now = self.clock.now();
        let today = now.date_naive();
        if !config.active_days.contains(now.weekday()) {
            debug!(weekday = %now.weekday(), "not an active reminder day");
            return TickOutcome::Skipped(SkipReason::InactiveDay);
        }
        let minute = ClockTime::from_time(now.time());
        let permitted =
            config.permission_granted && self.notifier.permission() == Permission::Granted;

        let mut state = mutex_lock(&self.state, SOURCE, "tick");
        if !state.running {
            return TickOutcome::Skipped(SkipReason::Stopped);
        }
        state.fires.prune_before(today);

        let mut dispatched = Vec::new();
        let mut suppressed = Vec::new();
        for event in config.due_at(minute) {
            let key = event.key();
            if state.fires.has_fired(&key, today) {
                debug!(event_key = %key, "reminder already sent today");
                continue;
            }
            if !permitted {
                suppressed.push(key);
                continue;
            }

            let notification = Notification::meal_reminder(&event.name);
            if let Err(err) = self.notifier.show(&notification) {
                warn!(event_key = %key, error = %err, "reminder notification failed");
            }
            if config.sound_enabled
                && let Err(err) = self.sound.play(SoundCue::Reminder)
            {
                debug!(error = %err, "reminder sound failed");
            }
            state.fires.record(key.clone(), today);
            counter!(METRIC_REMINDER_DISPATCHED).increment(1);
            info!(event_key = %key, date = %today, "reminder dispatched");
            dispatched.push(key);
        }

        if !suppressed.is_empty() {
            debug!(count = suppressed.len(), "reminders due without notification permission");
        }
        TickOutcome::Evaluated {
            dispatched,
            suppressed,
        }
    }

    async fn load_config(&self) -> Option<ReminderConfig> {
        let settings: ReminderSettings = match self.client.get(REMINDER_SETTINGS_PATH, &[]).await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, "reminder settings unavailable, skipping tick");
                return None;
            }
        };
        match ReminderConfig::try_from(&settings) {
            Ok(config) => Some(config),
            Err(err) => {
                warn!(error = %err, "reminder settings malformed, skipping tick");
                None
            }
        }
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        if let Some(handle) = mutex_lock(&self.task, SOURCE, "drop").take() {
            handle.abort();
        }
    }
}

/// Evaluates immediately, then once per interval.
async fn run_ticks(scheduler: Weak<ReminderScheduler>, every: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        {
            let Some(scheduler) = scheduler.upgrade() else {
                break;
            };
            if !scheduler.is_running() {
                break;
            }
            let outcome = scheduler.tick().await;
            debug!(?outcome, "reminder tick");
            scheduler.background.send_replace(Some(outcome));
        }
        ticker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, FixedOffset, TimeDelta};
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::application::test_support::{FakeTransport, Reply, client_with};
    use crate::infra::audio::AudioError;
    use crate::infra::clock::ManualClock;
    use crate::infra::notify::NotifyError;

    #[derive(Default)]
    struct RecordingNotifier {
        denied: bool,
        shown: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        fn shown(&self) -> Vec<String> {
            self.shown
                .lock()
                .expect("shown")
                .iter()
                .map(|n| n.title.clone())
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn permission(&self) -> Permission {
            if self.denied {
                Permission::Denied
            } else {
                Permission::Granted
            }
        }

        fn request_permission(&self) -> Permission {
            self.permission()
        }

        fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.shown.lock().expect("shown").push(notification.clone());
            Ok(())
        }
    }

    struct BrokenSpeaker;

    impl SoundPlayer for BrokenSpeaker {
        fn play(&self, _cue: SoundCue) -> Result<(), AudioError> {
            Err(AudioError::Unavailable)
        }
    }

    struct Fixture {
        scheduler: Arc<ReminderScheduler>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
        transport: FakeTransport,
    }

    fn at(timestamp: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(timestamp).expect("valid timestamp")
    }

    /// Ticker interval long enough that only explicit `tick()` calls evaluate.
    const MANUAL: Duration = Duration::from_secs(24 * 60 * 60);

    fn fixture(settings: serde_json::Value, denied: bool) -> Fixture {
        fixture_ticking(settings, denied, MANUAL)
    }

    fn fixture_ticking(settings: serde_json::Value, denied: bool, every: Duration) -> Fixture {
        let transport = FakeTransport::new();
        transport.on(Method::GET, REMINDER_SETTINGS_PATH, Reply::json(settings));
        let (client, clock) = client_with(&transport);
        let notifier = Arc::new(RecordingNotifier {
            denied,
            ..Default::default()
        });
        let scheduler = Arc::new(ReminderScheduler::new(
            client,
            clock.clone(),
            notifier.clone(),
            Arc::new(BrokenSpeaker),
            every,
        ));
        Fixture {
            scheduler,
            notifier,
            clock,
            transport,
        }
    }

    fn weekday_breakfast() -> serde_json::Value {
        json!({
            "reminders_enabled": true,
            "breakfast_time": "08:00:00",
            "lunch_time": "13:00",
            "dinner_time": "19:00",
            "snack_time": "15:00",
            "active_days": "0,1,2,3,4",
            "browser_notifications": true,
            "sound_enabled": true
        })
    }

    fn dispatched(outcome: TickOutcome) -> Vec<String> {
        match outcome {
            TickOutcome::Evaluated { dispatched, .. } => {
                dispatched.iter().map(|k| k.to_string()).collect()
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    /// Start the scheduler and wait for the ticker's immediate evaluation.
    async fn start_settled(fx: &Fixture) -> TickOutcome {
        let mut ticks = fx.scheduler.watch_background();
        assert!(fx.scheduler.start());
        ticks.changed().await.expect("ticker running");
        ticks.borrow_and_update().clone().expect("first outcome")
    }

    #[tokio::test(start_paused = true)]
    async fn weekend_is_skipped_and_monday_fires_once() {
        let fx = fixture(weekday_breakfast(), false);
        start_settled(&fx).await;

        fx.clock.set(at("2024-01-06T08:00:00+00:00"));
        assert_eq!(
            fx.scheduler.tick().await,
            TickOutcome::Skipped(SkipReason::InactiveDay)
        );

        fx.clock.set(at("2024-01-08T08:00:10+00:00"));
        assert_eq!(dispatched(fx.scheduler.tick().await), vec!["Breakfast_08:00"]);
        assert_eq!(dispatched(fx.scheduler.tick().await), Vec::<String>::new());
        assert_eq!(fx.notifier.shown(), vec!["Time for Breakfast!"]);
        fx.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn next_day_fires_again() {
        let fx = fixture(weekday_breakfast(), false);
        start_settled(&fx).await;

        fx.clock.set(at("2024-01-08T08:00:00+00:00"));
        assert_eq!(dispatched(fx.scheduler.tick().await).len(), 1);
        fx.clock.advance(TimeDelta::days(1));
        assert_eq!(dispatched(fx.scheduler.tick().await).len(), 1);
        assert_eq!(fx.notifier.shown().len(), 2);
        fx.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn events_at_the_same_minute_fire_independently() {
        let mut settings = weekday_breakfast();
        settings["snack_time"] = json!("08:00");
        let fx = fixture(settings, false);
        start_settled(&fx).await;

        fx.clock.set(at("2024-01-08T08:00:00+00:00"));
        assert_eq!(
            dispatched(fx.scheduler.tick().await),
            vec!["Breakfast_08:00", "Snack_08:00"]
        );
        fx.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn missed_minute_is_not_caught_up() {
        let fx = fixture(weekday_breakfast(), false);
        start_settled(&fx).await;

        fx.clock.set(at("2024-01-08T08:01:00+00:00"));
        assert_eq!(dispatched(fx.scheduler.tick().await), Vec::<String>::new());
        assert!(fx.notifier.shown().is_empty());
        fx.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn denied_permission_never_dispatches() {
        let fx = fixture(weekday_breakfast(), true);
        start_settled(&fx).await;

        fx.clock.set(at("2024-01-08T08:00:00+00:00"));
        match fx.scheduler.tick().await {
            TickOutcome::Evaluated {
                dispatched,
                suppressed,
            } => {
                assert!(dispatched.is_empty());
                assert_eq!(suppressed.len(), 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(fx.notifier.shown().is_empty());
        fx.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn server_side_notification_opt_out_suppresses() {
        let mut settings = weekday_breakfast();
        settings["browser_notifications"] = json!(false);
        let fx = fixture(settings, false);
        start_settled(&fx).await;

        fx.clock.set(at("2024-01-08T08:00:00+00:00"));
        fx.scheduler.tick().await;
        assert!(fx.notifier.shown().is_empty());
        fx.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_or_unavailable_settings_skip_the_tick() {
        let mut settings = weekday_breakfast();
        settings["reminders_enabled"] = json!(false);
        let fx = fixture(settings, false);
        start_settled(&fx).await;
        fx.clock.set(at("2024-01-08T08:00:00+00:00"));
        assert_eq!(
            fx.scheduler.tick().await,
            TickOutcome::Skipped(SkipReason::Disabled)
        );
        fx.scheduler.stop();

        let fx = fixture(weekday_breakfast(), false);
        fx.transport.on(
            Method::GET,
            REMINDER_SETTINGS_PATH,
            Reply::Fail(crate::infra::transport::TransportError::Timeout),
        );
        assert_eq!(
            start_settled(&fx).await,
            TickOutcome::Skipped(SkipReason::SettingsUnavailable)
        );
        fx.clock.set(at("2024-01-08T08:00:00+00:00"));
        assert_eq!(
            fx.scheduler.tick().await,
            TickOutcome::Skipped(SkipReason::SettingsUnavailable)
        );
        fx.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let fx = fixture(weekday_breakfast(), false);
        assert!(fx.scheduler.start());
        assert!(!fx.scheduler.start());
        assert!(fx.scheduler.is_running());

        assert!(fx.scheduler.stop());
        assert!(!fx.scheduler.stop());
        assert_eq!(
            fx.scheduler.tick().await,
            TickOutcome::Skipped(SkipReason::Stopped)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_tick_is_skipped() {
        let fx = fixture(weekday_breakfast(), false);
        start_settled(&fx).await;
        fx.transport.on(
            Method::GET,
            REMINDER_SETTINGS_PATH,
            Reply::delayed(Duration::from_secs(5), Reply::json(weekday_breakfast())),
        );
        fx.clock.set(at("2024-01-08T08:00:00+00:00"));
        let fetched = fx.transport.count(&Method::GET, REMINDER_SETTINGS_PATH);

        let scheduler = Arc::clone(&fx.scheduler);
        let slow = tokio::spawn(async move { scheduler.tick().await });
        while fx.transport.count(&Method::GET, REMINDER_SETTINGS_PATH) == fetched {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            fx.scheduler.tick().await,
            TickOutcome::Skipped(SkipReason::Overlap)
        );
        assert_eq!(dispatched(slow.await.expect("join")).len(), 1);
        assert_eq!(fx.notifier.shown().len(), 1);
        fx.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_settings_fetch_prevents_dispatch() {
        let fx = fixture(weekday_breakfast(), false);
        start_settled(&fx).await;
        fx.transport.on(
            Method::GET,
            REMINDER_SETTINGS_PATH,
            Reply::delayed(Duration::from_secs(5), Reply::json(weekday_breakfast())),
        );
        fx.clock.set(at("2024-01-08T08:00:00+00:00"));
        let fetched = fx.transport.count(&Method::GET, REMINDER_SETTINGS_PATH);

        let scheduler = Arc::clone(&fx.scheduler);
        let pending = tokio::spawn(async move { scheduler.tick().await });
        while fx.transport.count(&Method::GET, REMINDER_SETTINGS_PATH) == fetched {
            tokio::task::yield_now().await;
        }

        fx.scheduler.stop();
        assert_eq!(
            pending.await.expect("join"),
            TickOutcome::Skipped(SkipReason::Stopped)
        );
        assert!(fx.notifier.shown().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn background_ticker_fires_when_minute_arrives() {
        let fx = fixture_ticking(weekday_breakfast(), false, DEFAULT_TICK);
        fx.clock.set(at("2024-01-08T08:00:00+00:00"));
        fx.scheduler.start();

        for _ in 0..3 {
            tokio::time::sleep(DEFAULT_TICK).await;
        }
        assert_eq!(fx.notifier.shown(), vec!["Time for Breakfast!"]);
        fx.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_mid_minute_sends_the_reminder_due_now() {
        let fx = fixture_ticking(weekday_breakfast(), false, DEFAULT_TICK);
        fx.clock.set(at("2024-01-08T08:00:30+00:00"));

        assert_eq!(dispatched(start_settled(&fx).await), vec!["Breakfast_08:00"]);
        assert_eq!(fx.notifier.shown(), vec!["Time for Breakfast!"]);

        fx.clock.set(at("2024-01-08T08:01:30+00:00"));
        tokio::time::sleep(DEFAULT_TICK).await;
        assert_eq!(fx.notifier.shown(), vec!["Time for Breakfast!"]);
        fx.scheduler.stop();
    }
}
