use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "nutrisync_cache_hit_total",
            Unit::Count,
            "Total number of GET responses served from the request cache."
        );
        describe_counter!(
            "nutrisync_cache_miss_total",
            Unit::Count,
            "Total number of cacheable GETs that had to hit the network."
        );
        describe_counter!(
            "nutrisync_cache_invalidate_total",
            Unit::Count,
            "Total number of whole-cache invalidations."
        );
        describe_counter!(
            "nutrisync_cache_stale_put_total",
            Unit::Count,
            "Total number of responses refused because a newer read or an invalidation overtook them."
        );
        describe_counter!(
            "nutrisync_signal_published_total",
            Unit::Count,
            "Total number of change signals published on the event bus."
        );
        describe_counter!(
            "nutrisync_reminder_dispatched_total",
            Unit::Count,
            "Total number of meal reminder notifications dispatched."
        );
        describe_histogram!(
            "nutrisync_request_ms",
            Unit::Milliseconds,
            "API request latency in milliseconds, cache hits excluded."
        );
    });
}
