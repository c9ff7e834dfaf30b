use owo_colors::{OwoColorize, Style};

/// Semantic text roles used by the terminal views.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Tone {
    Heading,
    Success,
    Warning,
    Muted,
    Value,
    Reading,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Heading => Style::new().bold().cyan(),
            Self::Success => Style::new().bold().green(),
            Self::Warning => Style::new().bold().yellow(),
            Self::Muted => Style::new().dimmed(),
            Self::Value => Style::new().bold(),
            Self::Reading => Style::new().bold().magenta(),
        }
    }
}

/// Applies terminal styling when colour output is enabled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn paint(&self, tone: Tone, text: impl AsRef<str>) -> String {
        let text = text.as_ref();
        if self.use_colour {
            text.style(tone.style()).to_string()
        } else {
            text.to_owned()
        }
    }

    pub(crate) fn heading(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Heading, text)
    }

    pub(crate) fn muted(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Muted, text)
    }

    pub(crate) fn value(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Value, text)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Tone::Heading)]
    #[case(Tone::Success)]
    #[case(Tone::Warning)]
    #[case(Tone::Muted)]
    #[case(Tone::Value)]
    #[case(Tone::Reading)]
    fn plain_painter_leaves_text_untouched(#[case] tone: Tone) {
        assert_eq!("12.5 kg", Painter::new(false).paint(tone, "12.5 kg"));
    }

    #[rstest]
    #[case(Tone::Heading)]
    #[case(Tone::Reading)]
    fn colour_painter_wraps_text(#[case] tone: Tone) {
        let styled = Painter::new(true).paint(tone, "12.5 kg");
        assert_ne!("12.5 kg", styled);
        assert!(styled.contains("12.5 kg"));
    }
}
