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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

/// Register metric descriptions with the installed recorder. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pagewright_cache_hit_total",
            Unit::Count,
            "Total number of cache hits."
        );
        describe_counter!(
            "pagewright_cache_miss_total",
            Unit::Count,
            "Total number of cache misses, including undecodable values."
        );
        describe_counter!(
            "pagewright_cache_recover_total",
            Unit::Count,
            "Total number of cache stores recreated after a storage fault."
        );
        describe_counter!(
            "pagewright_cache_evict_total",
            Unit::Count,
            "Total number of cache entries evicted to make space."
        );
        describe_counter!(
            "pagewright_rewrite_proxied_total",
            Unit::Count,
            "Total number of URLs rewritten to signed service URLs."
        );
        describe_counter!(
            "pagewright_rewrite_inlined_total",
            Unit::Count,
            "Total number of URLs replaced by data URLs."
        );
        describe_counter!(
            "pagewright_filter_failure_total",
            Unit::Count,
            "Total number of filters skipped after failing on a document."
        );
        describe_counter!(
            "pagewright_document_fallback_total",
            Unit::Count,
            "Total number of documents served unmodified after a pipeline failure."
        );
        describe_counter!(
            "pagewright_service_rejected_total",
            Unit::Count,
            "Total number of service requests rejected with a 4xx status."
        );
        describe_histogram!(
            "pagewright_document_ms",
            Unit::Milliseconds,
            "Document optimization latency in milliseconds."
        );
    });
}
