use std::{process, sync::Arc};

use chrono::NaiveDate;
use nutrisync::{
    application::{
        client::ApiClient,
        dashboard::dashboard,
        error::AppError,
        fasting::{FastingState, FastingTracker},
        optimistic::Outcome,
        refresh::{InFlightFetches, RefreshOutcome},
        reminders::ReminderScheduler,
        water::WaterTracker,
    },
    cache::{CacheConfig, ResponseCache},
    config::{self, FastingCommand, WaterCommand},
    events::EventBus,
    infra::{
        audio::{Silent, SoundPlayer, TerminalBell},
        clock::{Clock, SystemClock},
        error::InfraError,
        notify::{LogNotifier, Permission},
        telemetry,
        transport::HttpTransport,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let server_message = error.server_message();
    if dispatcher::has_been_set() {
        error!(error = %error, server_message = server_message.as_deref(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, server_message = server_message.as_deref(), "application error");
    });
}

/// Shared wiring for every subcommand.
struct AppContext {
    client: ApiClient,
    bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl AppContext {
    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;
    let context = build_context(&settings)?;

    match cli_args.command {
        config::Command::Remind(_) => run_remind(&settings, context).await,
        config::Command::Water(args) => run_water(context, args.command).await,
        config::Command::Fasting(args) => run_fasting(context, args.command).await,
        config::Command::Summary(args) => run_summary(&settings, context, args.date).await,
    }
}

fn build_context(settings: &config::Settings) -> Result<AppContext, AppError> {
    let transport = HttpTransport::new(
        settings.api.base_url.as_str(),
        settings.api.token.clone(),
        settings.api.timeout,
    )?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(ResponseCache::new(
        CacheConfig::from(&settings.cache),
        Arc::clone(&clock),
    ));
    let client = ApiClient::new(Arc::new(transport), cache, settings.api.timeout);

    Ok(AppContext {
        client,
        bus: EventBus::new(),
        clock,
    })
}

async fn run_remind(settings: &config::Settings, context: AppContext) -> Result<(), AppError> {
    let sound: Arc<dyn SoundPlayer> = if settings.reminders.sound {
        Arc::new(TerminalBell)
    } else {
        Arc::new(Silent)
    };
    let scheduler = Arc::new(ReminderScheduler::new(
        context.client,
        context.clock,
        Arc::new(LogNotifier::new(Permission::Default)),
        sound,
        settings.reminders.tick,
    ));

    scheduler.start();
    let waited = tokio::signal::ctrl_c().await;
    scheduler.stop();
    waited.map_err(InfraError::from)?;

    info!("reminder agent exiting");
    Ok(())
}

async fn run_water(context: AppContext, command: WaterCommand) -> Result<(), AppError> {
    let (amount, removing) = match command {
        WaterCommand::Add(amount) => (amount, false),
        WaterCommand::Remove(amount) => (amount, true),
    };
    let date = amount.date.unwrap_or_else(|| context.today());
    let tracker = WaterTracker::new(context.client, context.bus, date);
    tracker.load().await?;

    let outcome = if removing {
        tracker.remove(amount.ml).await
    } else {
        tracker.add(amount.ml).await
    };

    match outcome {
        Outcome::Confirmed { value, .. } => {
            println!("{date}: {value} ml ({} glasses)", tracker.glasses());
            Ok(())
        }
        Outcome::RolledBack { restored, error } => {
            warn!(%date, restored, "water change rolled back");
            Err(error.into())
        }
    }
}

async fn run_fasting(context: AppContext, command: FastingCommand) -> Result<(), AppError> {
    let tracker = FastingTracker::new(context.client, context.bus);
    let current = tracker.load().await?;

    let outcome = match command {
        FastingCommand::Status => None,
        FastingCommand::Start => {
            let outcome = tracker.start().await;
            if outcome.is_none() {
                println!("a fast is already running");
            }
            outcome
        }
        FastingCommand::End => {
            let outcome = tracker.end().await;
            if outcome.is_none() {
                println!("no fast is running");
            }
            outcome
        }
    };

    let state = match outcome {
        Some(Outcome::Confirmed { value, .. }) => value,
        Some(Outcome::RolledBack { error, .. }) => return Err(error.into()),
        None => current,
    };

    match state {
        FastingState::Idle => println!("not fasting"),
        FastingState::Active(session) => {
            println!("fasting since {} (session {})", session.start_time, session.id)
        }
    }
    Ok(())
}

async fn run_summary(
    settings: &config::Settings,
    context: AppContext,
    date: Option<NaiveDate>,
) -> Result<(), AppError> {
    let date = date.unwrap_or_else(|| context.today());
    let view = dashboard(
        context.client,
        &context.bus,
        date,
        InFlightFetches::new(),
        settings.refresh.focus_debounce,
    );

    let outcome = view.on_mount().await;
    view.unmount();
    match outcome {
        RefreshOutcome::Failed(error) => Err(error.into()),
        RefreshOutcome::Refreshed | RefreshOutcome::Coalesced => {
            let summary = view.data().unwrap_or_default();
            let totals = summary.totals;
            println!(
                "{date}: {:.0} kcal, {:.1} g protein, {:.1} g carbs, {:.1} g fat ({} entries)",
                totals.calories,
                totals.protein,
                totals.carbs,
                totals.fat,
                summary.meals.len()
            );
            Ok(())
        }
    }
}
