pub(crate) mod command;
pub(crate) mod control;
pub(crate) mod measure;
pub(crate) mod report;
pub(crate) mod scan;
pub(crate) mod ui;

use std::time::Duration;

use owo_colors::OwoColorize;
use tracing::{Span, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::InteractionError;
use crate::hw::FoundDevice;
use crate::session::SensorSession;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::control::{ControlArgs, SensorCommand};
pub use self::measure::MeasureArgs;
pub use self::scan::ScanArgs;

/// Scans until the first sensor appears and connects to it.
#[instrument(skip(session), level = "info")]
pub(crate) async fn connect_first_sensor(
    session: &mut SensorSession,
    scan_timeout: Option<Duration>,
) -> Result<FoundDevice, InteractionError> {
    let span = Span::current();
    span.pb_set_message("Scanning for sensors");

    let attempt = async {
        session.scan().await?;
        let device = match session.wait_for_device(scan_timeout).await {
            Ok(device) => device,
            Err(error) => {
                if let Err(stop_error) = session.stop_scan().await {
                    tracing::debug!(?stop_error, "failed to stop scan after timeout");
                }
                return Err(error);
            }
        };

        span.pb_set_message(&format!(
            "Connecting to {}",
            device.local_name().unwrap_or(device.device_id())
        ));
        session.connect_to(&device).await?;
        Ok(device)
    };

    match attempt.await {
        Ok(device) => {
            span.pb_set_finish_message(&format!("{} Connected", "✓".green()));
            Ok(device)
        }
        Err(error) => {
            span.pb_set_finish_message(&format!("{} Connection failed", "✗".red()));
            Err(error)
        }
    }
}

/// Releases the radio, preferring the command's own error over a close failure.
pub(crate) async fn close_session(
    session: SensorSession,
    command_result: anyhow::Result<()>,
) -> anyhow::Result<()> {
    if let Err(error) = session.close().await {
        if command_result.is_ok() {
            return Err(error.into());
        }
        tracing::trace!(?error, "failed to close sensor session cleanly");
    }
    command_result
}
