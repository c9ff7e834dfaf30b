use std::fmt::{self, Display, Formatter};

use tabled::builder::Builder;
use tabled::settings::Style;

use super::painter::Painter;

/// Rounded table rendered through `Display`.
#[derive(Debug, Default)]
pub(crate) struct Table {
    records: Vec<Vec<String>>,
}

impl Table {
    /// Starts a table with one header row.
    pub(crate) fn with_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: vec![headers.into_iter().map(Into::into).collect()],
        }
    }

    /// Builds a two-column `field`/`value` table with muted field names.
    pub(crate) fn key_value(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        rows.into_iter()
            .fold(Self::with_headers(["field", "value"]), |table, (field, value)| {
                table.row([painter.muted(field), value])
            })
    }

    /// Appends one data row.
    pub(crate) fn row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.records.push(cells.into_iter().map(Into::into).collect());
        self
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        for record in &self.records {
            builder.push_record(record);
        }
        let mut table = builder.build();
        table.with(Style::rounded());
        write!(f, "{table}")
    }
}
