use std::fmt::{self, Display, Formatter};

use crate::hw::FoundDevice;
use crate::utils::format_rssi;

use super::painter::{Painter, Tone};
use super::table::Table;

const UNNAMED: &str = "<unnamed>";

/// One-line rendering of a freshly discovered sensor.
pub(crate) struct DiscoveryLineView<'a> {
    device: &'a FoundDevice,
    painter: &'a Painter,
}

impl<'a> DiscoveryLineView<'a> {
    pub(crate) fn new(device: &'a FoundDevice, painter: &'a Painter) -> Self {
        Self { device, painter }
    }
}

impl Display for DiscoveryLineView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.painter.paint(Tone::Success, "+"),
            self.painter.value(self.device.local_name().unwrap_or(UNNAMED)),
            self.painter.muted(self.device.device_id()),
            self.painter
                .muted(format!("rssi={}", format_rssi(self.device.rssi()))),
        )
    }
}

/// Summary table of every sensor found in a scan session.
pub(crate) struct DeviceListView<'a> {
    devices: &'a [FoundDevice],
    painter: &'a Painter,
}

impl<'a> DeviceListView<'a> {
    pub(crate) fn new(devices: &'a [FoundDevice], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for DeviceListView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.devices.is_empty() {
            return write!(f, "{}", self.painter.paint(Tone::Warning, "No sensors found."));
        }

        let table = self.devices.iter().fold(
            Table::with_headers(["name", "device_id", "adapter", "rssi"]),
            |table, device| {
                table.row([
                    self.painter
                        .value(device.local_name().unwrap_or(UNNAMED)),
                    device.device_id().to_owned(),
                    device.adapter_name().to_owned(),
                    format_rssi(device.rssi()),
                ])
            },
        );
        write!(
            f,
            "{}\n{table}",
            self.painter
                .heading(format!("Found {} sensor(s):", self.devices.len()))
        )
    }
}

/// Key-value rendering of the sensor a command connected to.
pub(crate) struct ConnectedDeviceView<'a> {
    device: &'a FoundDevice,
    painter: &'a Painter,
}

impl<'a> ConnectedDeviceView<'a> {
    pub(crate) fn new(device: &'a FoundDevice, painter: &'a Painter) -> Self {
        Self { device, painter }
    }
}

impl Display for ConnectedDeviceView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                (
                    "name",
                    self.painter
                        .value(self.device.local_name().unwrap_or(UNNAMED)),
                ),
                ("device_id", self.painter.value(self.device.device_id())),
                ("adapter", self.painter.value(self.device.adapter_name())),
                ("rssi", self.painter.value(format_rssi(self.device.rssi()))),
            ],
        );
        write!(
            f,
            "{}\n{table}",
            self.painter.paint(Tone::Success, "Connected to sensor:")
        )
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;

    use super::*;

    fn device(name: Option<&str>, rssi: Option<i16>) -> FoundDevice {
        FoundDevice::new("hci0", "AA:BB", name.map(String::from), rssi)
    }

    #[test]
    fn discovery_line_lists_name_id_and_rssi() {
        let painter = Painter::new(false);
        let device = device(Some("Progressor_1"), Some(-43));
        let line = DiscoveryLineView::new(&device, &painter);
        assert_eq!("+ Progressor_1 AA:BB rssi=-43", line.to_string());
    }

    #[test]
    fn empty_device_list_reports_nothing_found() {
        let painter = Painter::new(false);
        assert_eq!(
            "No sensors found.",
            DeviceListView::new(&[], &painter).to_string()
        );
    }

    #[test]
    fn device_list_renders_table() {
        let painter = Painter::new(false);
        let devices = [device(Some("Progressor_1"), None)];

        assert_snapshot!(DeviceListView::new(&devices, &painter).to_string(), @r"
        Found 1 sensor(s):
        ╭──────────────┬───────────┬─────────┬──────╮
        │ name         │ device_id │ adapter │ rssi │
        ├──────────────┼───────────┼─────────┼──────┤
        │ Progressor_1 │ AA:BB     │ hci0    │ -    │
        ╰──────────────┴───────────┴─────────┴──────╯
        ");
    }
}
