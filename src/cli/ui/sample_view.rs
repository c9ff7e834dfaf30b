use std::fmt::{self, Display, Formatter};

use crate::codec::Sample;
use crate::session::CommandOutcome;
use crate::utils::{format_kilograms, format_peak};

use super::painter::{Painter, Tone};
use super::table::Table;

/// One streamed sample.
pub(crate) struct SampleLineView<'a> {
    index: usize,
    sample: Sample,
    painter: &'a Painter,
}

impl<'a> SampleLineView<'a> {
    pub(crate) fn new(index: usize, sample: Sample, painter: &'a Painter) -> Self {
        Self {
            index,
            sample,
            painter,
        }
    }
}

impl Display for SampleLineView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.painter.muted(format!("[{:04}]", self.index)),
            self.painter
                .paint(Tone::Reading, format!("{:>11}", format_kilograms(self.sample.weight))),
            self.painter.muted(format!("t={:.6}s", self.sample.time)),
        )
    }
}

/// Summary printed when a measurement ends.
pub(crate) struct MeasurementSummaryView<'a> {
    samples: usize,
    peak: Option<f32>,
    reason: String,
    painter: &'a Painter,
}

impl<'a> MeasurementSummaryView<'a> {
    pub(crate) fn new(
        samples: usize,
        peak: Option<f32>,
        reason: impl Display,
        painter: &'a Painter,
    ) -> Self {
        Self {
            samples,
            peak,
            reason: reason.to_string(),
            painter,
        }
    }
}

impl Display for MeasurementSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("samples", self.painter.value(self.samples.to_string())),
                ("peak", self.painter.paint(Tone::Reading, format_peak(self.peak))),
                ("stopped", self.painter.value(&self.reason)),
            ],
        );
        write!(f, "{}\n{table}", self.painter.heading("Measurement summary:"))
    }
}

/// Result line for a one-shot sensor command.
pub(crate) struct CommandOutcomeView<'a> {
    command: &'a str,
    outcome: CommandOutcome,
    painter: &'a Painter,
}

impl<'a> CommandOutcomeView<'a> {
    pub(crate) fn new(command: &'a str, outcome: CommandOutcome, painter: &'a Painter) -> Self {
        Self {
            command,
            outcome,
            painter,
        }
    }
}

impl Display for CommandOutcomeView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let tone = match self.outcome {
            CommandOutcome::Sent => Tone::Success,
            CommandOutcome::SkippedNotConnected | CommandOutcome::SkippedNotStreaming => {
                Tone::Warning
            }
        };
        write!(
            f,
            "{} {}",
            self.painter.value(self.command),
            self.painter.paint(tone, self.outcome.to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn sample_line_pads_index_and_weight() {
        let painter = Painter::new(false);
        let line = SampleLineView::new(7, Sample::from_raw(-12.5, 2_000_000), &painter);
        assert_eq!("[0007]   12.500 kg t=2.000000s", line.to_string());
    }

    #[rstest]
    #[case(CommandOutcome::Sent, "tare sent")]
    #[case(CommandOutcome::SkippedNotConnected, "tare skipped (not connected)")]
    #[case(CommandOutcome::SkippedNotStreaming, "tare skipped (not streaming)")]
    fn command_outcome_renders_label(#[case] outcome: CommandOutcome, #[case] expected: &str) {
        let painter = Painter::new(false);
        assert_eq!(
            expected,
            CommandOutcomeView::new("tare", outcome, &painter).to_string()
        );
    }

    #[test]
    fn summary_without_samples_has_no_peak() {
        let painter = Painter::new(false);
        let rendered = MeasurementSummaryView::new(0, None, "interrupted", &painter).to_string();
        assert!(rendered.contains("│ peak    │ -"));
    }
}
