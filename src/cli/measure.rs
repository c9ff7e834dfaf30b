use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, instrument, warn};

use crate::error::InteractionError;
use crate::hw::ConnectionState;
use crate::session::{CommandOutcome, SensorSession, SessionEvent};

use super::command::parse_duration;
use super::report::Reporter;

/// Arguments for the `measure` command.
#[derive(Debug, Default, Args)]
pub struct MeasureArgs {
    /// Stop after this many samples. If omitted, stream until Ctrl+C.
    #[arg(long)]
    max_samples: Option<usize>,
    /// Stop after streaming for this long (e.g. `30s`).
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,
    /// Zero the load cell before streaming.
    #[arg(long)]
    tare: bool,
    /// Give up when no sensor is found within this time. Waits forever if omitted.
    #[arg(long, value_parser = parse_duration)]
    scan_timeout: Option<Duration>,
}

impl MeasureArgs {
    /// Creates measure arguments with an optional sample limit.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// let args = progressor::MeasureArgs::new(Some(20))
    ///     .with_duration(Duration::from_secs(10))
    ///     .with_tare();
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(max_samples: Option<usize>) -> Self {
        Self {
            max_samples,
            ..Self::default()
        }
    }

    /// Stops streaming after `duration`.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Tares the sensor before streaming.
    #[must_use]
    pub fn with_tare(mut self) -> Self {
        self.tare = true;
        self
    }

    /// Bounds the wait for the first sensor.
    #[must_use]
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = Some(scan_timeout);
        self
    }

    fn limit_reached(&self, received: usize) -> bool {
        self.max_samples.is_some_and(|limit| received >= limit)
    }
}

/// Why a measurement stream ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub(crate) enum StopReason {
    #[display("sample limit reached")]
    ReachedLimit,
    #[display("duration elapsed")]
    DurationElapsed,
    #[display("interrupted")]
    Interrupted,
    #[display("sensor disconnected")]
    Disconnected,
}

#[derive(Debug, Default)]
struct StreamTally {
    received: usize,
    peak: Option<f32>,
}

impl StreamTally {
    fn record(&mut self, weight: f32) {
        self.received += 1;
        self.peak = Some(self.peak.map_or(weight, |peak| peak.max(weight)));
    }
}

/// Executes the `measure` command.
#[instrument(skip_all, level = "debug", fields(max_samples = ?args.max_samples, duration = ?args.duration))]
pub(crate) async fn run<W>(
    mut session: SensorSession,
    args: &MeasureArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()>
where
    W: io::Write,
{
    let result = measure(&mut session, args, reporter).await;
    super::close_session(session, result).await
}

async fn measure<W>(
    session: &mut SensorSession,
    args: &MeasureArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()>
where
    W: io::Write,
{
    let device = super::connect_first_sensor(session, args.scan_timeout).await?;
    reporter.connected(&device)?;

    if args.tare {
        let outcome = session.tare().await?;
        reporter.command("tare", outcome)?;
    }

    let mut events = session.subscribe();
    let (tally, reason) = match session.start_measurement().await? {
        CommandOutcome::Sent => stream_samples(&mut events, args, reporter).await?,
        CommandOutcome::SkippedNotConnected | CommandOutcome::SkippedNotStreaming => {
            (StreamTally::default(), StopReason::Disconnected)
        }
    };
    session.stop_measurement().await?;
    info!(received = tally.received, %reason, "measurement finished");
    reporter.measurement_stopped(tally.received, tally.peak, reason)?;

    session.disconnect().await?;
    reporter.disconnected(&device)
}

async fn stream_samples<W>(
    events: &mut broadcast::Receiver<SessionEvent>,
    args: &MeasureArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<(StreamTally, StopReason)>
where
    W: io::Write,
{
    let mut tally = StreamTally::default();
    if args.limit_reached(0) {
        return Ok((tally, StopReason::ReachedLimit));
    }

    let window = async {
        match args.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(window);

    let reason = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|source| InteractionError::CtrlC { source })?;
                break StopReason::Interrupted;
            }
            () = &mut window => break StopReason::DurationElapsed,
            event = events.recv() => match event {
                Ok(SessionEvent::Sample(sample)) => {
                    tally.record(sample.weight);
                    reporter.sample(tally.received, sample)?;
                    if args.limit_reached(tally.received) {
                        break StopReason::ReachedLimit;
                    }
                }
                Ok(SessionEvent::ConnectionChanged(ConnectionState::Disconnected))
                | Err(RecvError::Closed) => break StopReason::Disconnected,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "sample output fell behind"),
            },
        }
    };

    Ok((tally, reason))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn tally_tracks_count_and_peak() {
        let mut tally = StreamTally::default();
        for weight in [3.5, 12.25, 7.0] {
            tally.record(weight);
        }
        assert_eq!(3, tally.received);
        assert_eq!(Some(12.25), tally.peak);
    }

    #[rstest]
    #[case(None, 1_000, false)]
    #[case(Some(3), 2, false)]
    #[case(Some(3), 3, true)]
    #[case(Some(0), 0, true)]
    fn sample_limit_is_inclusive(
        #[case] max_samples: Option<usize>,
        #[case] received: usize,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, MeasureArgs::new(max_samples).limit_reached(received));
    }
}
