mod device_view;
mod painter;
mod sample_view;
mod table;

pub(crate) use self::device_view::{ConnectedDeviceView, DeviceListView, DiscoveryLineView};
pub(crate) use self::painter::Painter;
pub(crate) use self::sample_view::{CommandOutcomeView, MeasurementSummaryView, SampleLineView};
