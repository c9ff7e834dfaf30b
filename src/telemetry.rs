use std::io::{self, IsTerminal};
use std::sync::OnceLock;
use std::time::Duration;

use indicatif::ProgressStyle;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Metadata};
use tracing_indicatif::{IndicatifLayer, TickSettings};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::error::TelemetryError;

const DEFAULT_DIRECTIVE: &str = "warn";
const SPINNER_TICK: Duration = Duration::from_millis(90);

static SUBSCRIBER: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Installs the process-wide subscriber.
///
/// Interactive stderr gets pretty events with progress spinners for the
/// crate's info-level spans. Anything else gets JSON lines on stderr, keeping
/// stdout free for command output. Only the first call installs; later calls
/// return its outcome.
pub(crate) fn initialise_tracing(
    service_name: &str,
    interactive_terminal: bool,
    level_override: Option<LevelFilter>,
) -> Result<(), &'static TelemetryError> {
    SUBSCRIBER
        .get_or_init(|| install(service_name, interactive_terminal, level_override))
        .as_ref()
        .copied()
}

fn install(
    service_name: &str,
    interactive_terminal: bool,
    level_override: Option<LevelFilter>,
) -> Result<(), TelemetryError> {
    let provider = SdkTracerProvider::builder().build();
    let tracer = provider.tracer(service_name.to_owned());
    global::set_tracer_provider(provider);

    let filter = log_filter(level_override);
    let (pretty, progress, json) = if interactive_terminal && io::stderr().is_terminal() {
        let indicatif = IndicatifLayer::new()
            .with_progress_style(spinner_style())
            .with_tick_settings(TickSettings {
                default_tick_interval: Some(SPINNER_TICK),
                ..TickSettings::default()
            });
        let pretty = fmt::layer()
            .pretty()
            .with_target(false)
            .with_writer(indicatif.get_stderr_writer())
            .with_filter(filter);
        let progress = indicatif.with_filter(filter_fn(is_progress_span));
        (Some(pretty), Some(progress), None)
    } else {
        let json = fmt::layer()
            .json()
            .with_target(false)
            .with_writer(io::stderr)
            .with_filter(filter);
        (None, None, Some(json))
    };

    tracing_subscriber::registry()
        .with(pretty)
        .with(progress)
        .with(json)
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;
    Ok(())
}

/// `--log-level` wins over `RUST_LOG`, which wins over the default.
fn log_filter(level_override: Option<LevelFilter>) -> EnvFilter {
    match level_override {
        Some(level) => EnvFilter::default().add_directive(level.into()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_error| EnvFilter::new(DEFAULT_DIRECTIVE)),
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {msg}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
}

fn is_progress_span(metadata: &Metadata<'_>) -> bool {
    metadata.is_span()
        && metadata.target().starts_with(env!("CARGO_CRATE_NAME"))
        && *metadata.level() <= Level::INFO
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(LevelFilter::DEBUG)]
    #[case(LevelFilter::OFF)]
    fn explicit_level_overrides_environment_filter(#[case] level: LevelFilter) {
        assert_eq!(Some(level), log_filter(Some(level)).max_level_hint());
    }
}
