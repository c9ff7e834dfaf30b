use std::io;

use anyhow::Result;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::cli::measure::StopReason;
use crate::codec::Sample;
use crate::hw::FoundDevice;
use crate::session::CommandOutcome;

use super::ui::{
    CommandOutcomeView, ConnectedDeviceView, DeviceListView, DiscoveryLineView,
    MeasurementSummaryView, Painter, SampleLineView,
};

/// JSON line emitted for each reportable step.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Record<'a> {
    Discovered {
        #[serde(flatten)]
        device: &'a FoundDevice,
    },
    ScanFinished {
        devices: usize,
    },
    Connected {
        #[serde(flatten)]
        device: &'a FoundDevice,
    },
    Sample {
        index: usize,
        #[serde(flatten)]
        sample: Sample,
    },
    Command {
        command: &'a str,
        outcome: CommandOutcome,
    },
    MeasurementStopped {
        samples: usize,
        peak: Option<f32>,
        reason: StopReason,
    },
    Disconnected {
        device_id: &'a str,
    },
}

/// Writes command progress either as styled text or as JSON lines.
pub(crate) struct Reporter<'a, W> {
    out: &'a mut W,
    format: OutputFormat,
    painter: Painter,
}

impl<'a, W> Reporter<'a, W>
where
    W: io::Write,
{
    pub(crate) fn new(out: &'a mut W, format: OutputFormat, use_colour: bool) -> Self {
        Self {
            out,
            format,
            painter: Painter::new(use_colour && format == OutputFormat::Pretty),
        }
    }

    pub(crate) fn discovered(&mut self, device: &FoundDevice) -> Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(self.out, "{}", DiscoveryLineView::new(device, &self.painter))?;
                Ok(())
            }
            OutputFormat::Json => self.json(&Record::Discovered { device }),
        }
    }

    pub(crate) fn scan_finished(&mut self, devices: &[FoundDevice]) -> Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(self.out)?;
                writeln!(self.out, "{}", DeviceListView::new(devices, &self.painter))?;
                Ok(())
            }
            OutputFormat::Json => self.json(&Record::ScanFinished {
                devices: devices.len(),
            }),
        }
    }

    pub(crate) fn connected(&mut self, device: &FoundDevice) -> Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(self.out, "{}", ConnectedDeviceView::new(device, &self.painter))?;
                Ok(())
            }
            OutputFormat::Json => self.json(&Record::Connected { device }),
        }
    }

    pub(crate) fn sample(&mut self, index: usize, sample: Sample) -> Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(
                    self.out,
                    "{}",
                    SampleLineView::new(index, sample, &self.painter)
                )?;
                Ok(())
            }
            OutputFormat::Json => self.json(&Record::Sample { index, sample }),
        }
    }

    pub(crate) fn command(&mut self, command: &str, outcome: CommandOutcome) -> Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(
                    self.out,
                    "{}",
                    CommandOutcomeView::new(command, outcome, &self.painter)
                )?;
                Ok(())
            }
            OutputFormat::Json => self.json(&Record::Command { command, outcome }),
        }
    }

    pub(crate) fn measurement_stopped(
        &mut self,
        samples: usize,
        peak: Option<f32>,
        reason: StopReason,
    ) -> Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(self.out)?;
                writeln!(
                    self.out,
                    "{}",
                    MeasurementSummaryView::new(samples, peak, reason, &self.painter)
                )?;
                Ok(())
            }
            OutputFormat::Json => self.json(&Record::MeasurementStopped {
                samples,
                peak,
                reason,
            }),
        }
    }

    pub(crate) fn disconnected(&mut self, device: &FoundDevice) -> Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(
                    self.out,
                    "{}",
                    self.painter.muted(format!("Disconnected from {}.", device.device_id()))
                )?;
                Ok(())
            }
            OutputFormat::Json => self.json(&Record::Disconnected {
                device_id: device.device_id(),
            }),
        }
    }

    fn json(&mut self, record: &Record<'_>) -> Result<()> {
        serde_json::to_writer(&mut *self.out, record)?;
        writeln!(self.out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    fn render(write: impl FnOnce(&mut Reporter<'_, Vec<u8>>) -> Result<()>) -> String {
        let mut out = Vec::new();
        let mut reporter = Reporter::new(&mut out, OutputFormat::Json, false);
        write(&mut reporter).expect("report should be written");
        String::from_utf8(out).expect("report should be UTF-8")
    }

    #[test]
    fn json_records_are_tagged_lines() {
        let device = FoundDevice::new("hci0", "AA:BB", Some("Progressor_1".into()), Some(-43));
        let rendered = render(|reporter| {
            reporter.discovered(&device)?;
            reporter.sample(1, Sample::from_raw(-12.5, 2_000_000))?;
            reporter.command("tare", CommandOutcome::SkippedNotConnected)?;
            reporter.measurement_stopped(1, Some(12.5), StopReason::ReachedLimit)
        });

        assert_snapshot!(rendered, @r#"
        {"event":"discovered","adapter_name":"hci0","device_id":"AA:BB","local_name":"Progressor_1","rssi":-43}
        {"event":"sample","index":1,"weight":12.5,"time":2.0}
        {"event":"command","command":"tare","outcome":"skipped_not_connected"}
        {"event":"measurement_stopped","samples":1,"peak":12.5,"reason":"reached_limit"}
        "#);
    }
}
