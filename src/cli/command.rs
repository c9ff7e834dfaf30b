use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::control::ControlArgs;
use crate::cli::measure::MeasureArgs;
use crate::cli::scan::ScanArgs;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{
    Capability, FakeBackendConfig, FakePermissionPrompt, NotificationPayloads, ScanFixture,
};
use crate::protocol::DEFAULT_NAME_PREFIX;
use crate::session::SensorConfig;

/// Command-line options for the Progressor BLE tool.
#[derive(Debug, Parser)]
#[command(
    name = "progressor",
    about = "Scan for, connect to and stream from Progressor force sensors."
)]
pub struct Args {
    /// Local-name prefix a peripheral must advertise to be treated as a sensor.
    #[arg(long, global = true, default_value = DEFAULT_NAME_PREFIX)]
    name_prefix: String,
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Uses the fake BLE backend with fixture-driven discovery and payloads.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `adapter|device_id|local_name|rssi;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake data-point notifications as comma-separated hexadecimal payloads.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Number of scan enumeration errors reported before the fixtures.
    #[arg(long, global = true, requires = "fake")]
    fake_scan_errors: Option<usize>,
    /// Artificial delay between fake advertisements (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    /// Artificial delay between fake notifications.
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_notification_interval: Option<Duration>,
    /// Makes every fake connection attempt fail.
    #[arg(long, global = true, requires = "fake")]
    fake_connect_failure: bool,
    /// Drops the fake link after this many notifications.
    #[arg(long, global = true, requires = "fake")]
    fake_disconnect_after: Option<usize>,
    /// Permissions the fake platform denies (comma-separated).
    #[arg(long, global = true, requires = "fake", value_delimiter = ',')]
    fake_deny: Vec<Capability>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use progressor::{Args, Command, ScanArgs};
    ///
    /// let args = Args::new(Command::Scan(ScanArgs::default()));
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            log_level: None,
            output: None,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_scan_errors: None,
            fake_discovery_delay: None,
            fake_notification_interval: None,
            fake_connect_failure: false,
            fake_disconnect_after: None,
            fake_deny: Vec::new(),
            command,
        }
    }

    /// Returns the explicit log level, if one was given.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the explicit output format, if one was given.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Returns the sensor session settings selected on the command line.
    #[must_use]
    pub fn sensor_config(&self) -> SensorConfig {
        SensorConfig::builder()
            .name_prefix(self.name_prefix.clone())
            .build()
    }

    /// Splits parsed CLI arguments into command and optional fake-runtime settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_notifications,
            fake_scan_errors,
            fake_discovery_delay,
            fake_notification_interval,
            fake_connect_failure,
            fake_disconnect_after,
            fake_deny,
            command,
            ..
        } = self;

        if !fake {
            return Ok((command, None));
        }
        let Some(scan_fixture) = fake_scan else {
            return Err(CliConfigError::MissingFakeScanFixture.into());
        };

        let fake_args = FakeArgs {
            scan_fixture,
            notifications: fake_notifications,
            scan_errors: fake_scan_errors.unwrap_or_default(),
            discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
            notification_interval: fake_notification_interval.unwrap_or(Duration::ZERO),
            fail_connect: fake_connect_failure,
            disconnect_after: fake_disconnect_after,
            denied_permissions: (!fake_deny.is_empty()).then_some(fake_deny),
        };
        Ok((command, Some(fake_args)))
    }
}

/// Fake backend arguments for programmatic runs.
///
/// ```
/// # fn demo() -> Result<(), progressor::FixtureError> {
/// let fake = progressor::FakeArgs::builder()
///     .scan_fixture("hci0|AA:BB|Progressor_7F21|-48")?
///     .notifications("01080000484180841e00")?
///     .build();
/// let _ = fake;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Builder)]
#[builder(derive(Debug))]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    #[builder(default)]
    scan_errors: usize,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default)]
    notification_interval: Duration,
    #[builder(default)]
    fail_connect: bool,
    disconnect_after: Option<usize>,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { parse_capabilities(value) })]
    denied_permissions: Option<Vec<Capability>>,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self) -> (FakeBackendConfig, FakePermissionPrompt) {
        let Self {
            scan_fixture,
            notifications,
            scan_errors,
            discovery_delay,
            notification_interval,
            fail_connect,
            disconnect_after,
            denied_permissions,
        } = self;

        let config = FakeBackendConfig::builder()
            .scan_fixture(scan_fixture)
            .maybe_notifications(notifications)
            .scan_errors(scan_errors)
            .discovery_delay(discovery_delay)
            .notification_interval(notification_interval)
            .fail_connect(fail_connect)
            .maybe_disconnect_after(disconnect_after)
            .build();
        let prompt = FakePermissionPrompt::denying(denied_permissions.unwrap_or_default());
        (config, prompt)
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for sensors and list each one as it is discovered.
    Scan(ScanArgs),
    /// Connect to the first sensor found, stream samples, then disconnect.
    Measure(MeasureArgs),
    /// Connect to the first sensor found and send one command.
    #[command(name = "command")]
    Control(ControlArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_args) => "scan",
            Self::Measure(_args) => "measure",
            Self::Control(_args) => "command",
        }
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Maps the CLI level onto a tracing filter.
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured, human-readable text.
    Pretty,
    /// One JSON object per line.
    Json,
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

fn parse_capabilities(value: &str) -> Result<Vec<Capability>, FixtureError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            raw.parse().map_err(|_error| FixtureError::UnknownCapability {
                value: raw.to_string(),
            })
        })
        .collect()
}
