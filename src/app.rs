use std::io;

use anyhow::Result;
use bon::Builder;
use tracing::instrument;

use crate::cli::report::Reporter;
use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::error::InteractionError;
use crate::hw::{BleManager, FakeBackend, FakeJournal, PermissionPrompt, UngatedPlatform};
use crate::session::{SensorConfig, SensorSession};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// The radio and permission platform a [`SensorSession`] runs against.
#[derive(Debug)]
pub struct SensorRuntime {
    manager: BleManager,
    prompt: Box<dyn PermissionPrompt>,
    journal: Option<FakeJournal>,
}

impl SensorRuntime {
    /// Creates a runtime backed by the host's BLE adapters.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform BLE manager cannot be created.
    pub async fn platform() -> Result<Self, InteractionError> {
        Ok(Self {
            manager: BleManager::init_platform().await?,
            prompt: Box::new(UngatedPlatform),
            journal: None,
        })
    }

    /// Creates a runtime backed by fake BLE fixtures.
    ///
    /// ```
    /// # fn demo() -> Result<(), progressor::FixtureError> {
    /// let fake = progressor::FakeArgs::builder()
    ///     .scan_fixture("hci0|AA:BB|Progressor_7F21|-48")?
    ///     .build();
    /// let runtime = progressor::SensorRuntime::fake(fake);
    /// assert!(runtime.journal().is_some());
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn fake(fake_args: FakeArgs) -> Self {
        let (config, prompt) = fake_args.into_backend_config();
        let backend = FakeBackend::new(config);
        let journal = backend.journal();
        Self {
            manager: BleManager::init(Box::new(backend)),
            prompt: Box::new(prompt),
            journal: Some(journal),
        }
    }

    /// Returns the fake radio's operation journal, if this runtime is fake.
    #[must_use]
    pub fn journal(&self) -> Option<FakeJournal> {
        self.journal.clone()
    }

    /// Builds a sensor session on this runtime.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn into_session(self, config: SensorConfig) -> SensorSession {
        SensorSession::new(self.manager, self.prompt, config)
    }
}

/// Settings shared by every CLI command.
#[derive(Debug, Default, Builder)]
pub struct RunOptions {
    #[builder(default)]
    config: SensorConfig,
    log_level: Option<LogLevel>,
    output_format: Option<OutputFormat>,
}

/// Runs one CLI command against the real standard streams.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = progressor::Args::try_parse_from([
///     "progressor",
///     "--fake",
///     "--fake-scan",
///     "hci0|AA:BB|Progressor_7F21|-48",
///     "scan",
///     "--duration",
///     "100ms",
/// ])?;
/// let options = progressor::RunOptions::builder()
///     .config(args.sensor_config())
///     .build();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let runtime = match maybe_fake_args {
///     Some(fake_args) => progressor::SensorRuntime::fake(fake_args),
///     None => progressor::SensorRuntime::platform().await?,
/// };
/// let mut out = Vec::new();
/// progressor::run(command, &mut out, runtime, options).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    runtime: SensorRuntime,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, out, &SystemTerminalClient, runtime, options).await
}

/// Runs one CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
#[instrument(
    skip(out, terminal_client, runtime, options),
    level = "info",
    fields(command = command.name(), log_level = ?options.log_level)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    runtime: SensorRuntime,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "progressor",
        terminal_client.stderr_is_terminal(),
        options.log_level.map(LogLevel::as_level_filter),
    )?;

    let stdout_is_terminal = terminal_client.stdout_is_terminal();
    let output_format = options.output_format.unwrap_or(if stdout_is_terminal {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });
    let mut reporter = Reporter::new(out, output_format, stdout_is_terminal);
    let session = runtime.into_session(options.config);

    match command {
        Command::Scan(args) => crate::cli::scan::run(session, &args, &mut reporter).await,
        Command::Measure(args) => crate::cli::measure::run(session, &args, &mut reporter).await,
        Command::Control(args) => crate::cli::control::run(session, &args, &mut reporter).await,
    }
}
