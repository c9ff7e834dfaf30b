use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, ValueEnum};
use tracing::instrument;

use crate::session::SensorSession;

use super::command::parse_duration;
use super::report::Reporter;

/// One-shot commands accepted by the `command` subcommand.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SensorCommand {
    /// Zero the load cell.
    Tare,
    /// Sample the battery voltage.
    Battery,
    /// Power the sensor off.
    Shutdown,
}

/// Arguments for the `command` subcommand.
#[derive(Debug, Args)]
pub struct ControlArgs {
    #[arg(value_enum)]
    action: SensorCommand,
    /// Give up when no sensor is found within this time. Waits forever if omitted.
    #[arg(long, value_parser = parse_duration)]
    scan_timeout: Option<Duration>,
}

impl ControlArgs {
    /// Creates control arguments for one command.
    ///
    /// ```
    /// use progressor::{ControlArgs, SensorCommand};
    ///
    /// let args = ControlArgs::new(SensorCommand::Tare);
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(action: SensorCommand) -> Self {
        Self {
            action,
            scan_timeout: None,
        }
    }

    /// Bounds the wait for the first sensor.
    #[must_use]
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = Some(scan_timeout);
        self
    }
}

/// Executes the `command` subcommand.
#[instrument(skip_all, level = "debug", fields(action = %args.action))]
pub(crate) async fn run<W>(
    mut session: SensorSession,
    args: &ControlArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()>
where
    W: io::Write,
{
    let result = send(&mut session, args, reporter).await;
    super::close_session(session, result).await
}

async fn send<W>(
    session: &mut SensorSession,
    args: &ControlArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()>
where
    W: io::Write,
{
    let device = super::connect_first_sensor(session, args.scan_timeout).await?;
    reporter.connected(&device)?;

    let outcome = match args.action {
        SensorCommand::Tare => session.tare().await?,
        SensorCommand::Battery => session.sample_battery_voltage().await?,
        SensorCommand::Shutdown => session.shutdown().await?,
    };
    reporter.command(&args.action.to_string(), outcome)?;

    session.disconnect().await?;
    reporter.disconnected(&device)
}
