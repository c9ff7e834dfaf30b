use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{instrument, warn};

use crate::error::InteractionError;
use crate::session::{SensorSession, SessionEvent};

use super::command::parse_duration;
use super::report::Reporter;

const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// How long to scan before listing the sensors found (e.g. `5s`, `500ms`).
    #[arg(long, value_parser = parse_duration, default_value = "5s")]
    duration: Duration,
}

impl ScanArgs {
    /// Creates scan arguments with an explicit scan window.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for ScanArgs {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_DURATION)
    }
}

/// Executes the `scan` command.
#[instrument(skip_all, level = "debug", fields(duration = ?args.duration))]
pub(crate) async fn run<W>(
    mut session: SensorSession,
    args: &ScanArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()>
where
    W: io::Write,
{
    let result = scan(&mut session, args, reporter).await;
    super::close_session(session, result).await
}

async fn scan<W>(
    session: &mut SensorSession,
    args: &ScanArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()>
where
    W: io::Write,
{
    let mut events = session.subscribe();
    session.scan().await?;

    let window = sleep(args.duration);
    tokio::pin!(window);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|source| InteractionError::CtrlC { source })?;
                break;
            }
            () = &mut window => break,
            event = events.recv() => match event {
                Ok(SessionEvent::DeviceDiscovered(device)) => reporter.discovered(&device)?,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "discovery output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.stop_scan().await?;
    reporter.scan_finished(&session.devices())
}
