use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument};

use super::hardware::{BleBackend, DisconnectWatch, NotificationStream, PeripheralLink, ScanStream};
use super::model::{FoundDevice, WriteMode};
use crate::codec::encode_sample_batch;
use crate::error::{FixtureError, InteractionError};
use crate::protocol::{EndpointId, Opcode};

const DEFAULT_SAMPLE_BATCHES: [&[(f32, i32)]; 2] = [
    &[(10.25, 100_000), (10.5, 112_500)],
    &[(-0.75, 125_000)],
];

/// Parsed fake scan fixture records.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct ScanFixture {
    devices: Vec<FoundDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let devices = parse_scan_fixture(value)?;
        Ok(Self { devices })
    }
}

/// Parsed fake notification payload fixtures.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = parse_notifications(value)?;
        Ok(Self { payloads })
    }
}

/// One radio operation recorded by the fake backend.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum JournalEntry {
    ScanStarted,
    ScanStopped,
    Connected(String),
    Write {
        endpoint: EndpointId,
        payload: Vec<u8>,
        mode: WriteMode,
    },
    Subscribed(EndpointId),
    Unsubscribed(EndpointId),
    Disconnected(String),
}

/// Shared record of everything the fake radio was asked to do.
#[derive(Debug, Clone, Default)]
pub struct FakeJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl FakeJournal {
    /// Returns all recorded operations in order.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the payloads written to the control point, in order.
    #[must_use]
    pub fn control_writes(&self) -> Vec<Vec<u8>> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                JournalEntry::Write {
                    endpoint: EndpointId::ControlPoint,
                    payload,
                    ..
                } => Some(payload),
                _ => None,
            })
            .collect()
    }

    fn record(&self, entry: JournalEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

/// Settings for constructing a fake hardware backend.
#[derive(Debug, Builder)]
pub(crate) struct FakeBackendConfig {
    scan_fixture: ScanFixture,
    notifications: Option<NotificationPayloads>,
    #[builder(default)]
    scan_errors: usize,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default)]
    notification_interval: Duration,
    #[builder(default)]
    fail_connect: bool,
    /// Connect attempts never resolve, as with an unresponsive peripheral.
    #[builder(default)]
    stall_connect: bool,
    #[builder(default)]
    fail_subscribe: bool,
    disconnect_after: Option<usize>,
}

/// Fake backend used in tests and non-hardware environments.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    devices: Vec<FoundDevice>,
    notifications: Vec<Vec<u8>>,
    scan_errors: usize,
    discovery_delay: Duration,
    notification_interval: Duration,
    fail_connect: bool,
    stall_connect: bool,
    fail_subscribe: bool,
    disconnect_after: Option<usize>,
    journal: FakeJournal,
}

impl FakeBackend {
    /// Creates a fake backend from explicit settings.
    pub(crate) fn new(config: FakeBackendConfig) -> Self {
        let notifications = config.notifications.map_or_else(
            || {
                DEFAULT_SAMPLE_BATCHES
                    .iter()
                    .map(|batch| encode_sample_batch(batch))
                    .collect()
            },
            Into::into,
        );

        Self {
            devices: config.scan_fixture.into(),
            notifications,
            scan_errors: config.scan_errors,
            discovery_delay: config.discovery_delay,
            notification_interval: config.notification_interval,
            fail_connect: config.fail_connect,
            stall_connect: config.stall_connect,
            fail_subscribe: config.fail_subscribe,
            disconnect_after: config.disconnect_after,
            journal: FakeJournal::default(),
        }
    }

    /// Returns a handle to the operation journal.
    pub(crate) fn journal(&self) -> FakeJournal {
        self.journal.clone()
    }
}

#[async_trait]
impl BleBackend for FakeBackend {
    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<ScanStream, InteractionError> {
        self.journal.record(JournalEntry::ScanStarted);

        let mut items: Vec<Result<FoundDevice, InteractionError>> = (1..=self.scan_errors)
            .map(|index| {
                Err(InteractionError::ScanEnumeration {
                    reason: format!("fake enumeration error #{index}"),
                })
            })
            .collect();
        items.extend(self.devices.iter().cloned().map(Ok));

        let advertisements = tokio_stream::iter(items);
        let stream: ScanStream = if self.discovery_delay.is_zero() {
            Box::pin(advertisements.chain(tokio_stream::pending()))
        } else {
            Box::pin(
                advertisements
                    .throttle(self.discovery_delay)
                    .chain(tokio_stream::pending()),
            )
        };
        Ok(stream)
    }

    async fn stop_scan(&self) -> Result<(), InteractionError> {
        self.journal.record(JournalEntry::ScanStopped);
        Ok(())
    }

    #[instrument(skip(self, device), level = "debug", fields(device_id = device.device_id()))]
    async fn connect(
        &self,
        device: &FoundDevice,
    ) -> Result<Box<dyn PeripheralLink>, InteractionError> {
        if self.stall_connect {
            debug!("fake connect stalled");
            std::future::pending::<()>().await;
        }
        if self.fail_connect {
            return Err(InteractionError::FakeConnectFailure {
                device_id: device.device_id().to_owned(),
            });
        }
        if !self
            .devices
            .iter()
            .any(|known| known.device_id() == device.device_id())
        {
            return Err(InteractionError::UnknownPeripheral {
                device_id: device.device_id().to_owned(),
            });
        }

        self.journal
            .record(JournalEntry::Connected(device.device_id().to_owned()));
        let (state, _receiver) = watch::channel(FakeLinkState {
            connected: true,
            measuring: false,
            subscribed: false,
        });
        info!("using fake BLE link");
        Ok(Box::new(FakeLink {
            device: device.clone(),
            state: Arc::new(state),
            notifications: self.notifications.clone(),
            notification_interval: self.notification_interval,
            fail_subscribe: self.fail_subscribe,
            disconnect_after: self.disconnect_after,
            journal: self.journal.clone(),
        }))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct FakeLinkState {
    connected: bool,
    measuring: bool,
    subscribed: bool,
}

impl FakeLinkState {
    fn streaming(self) -> bool {
        self.connected && self.measuring && self.subscribed
    }
}

/// Fake link that replays notification fixtures while a measurement runs.
#[derive(Debug)]
struct FakeLink {
    device: FoundDevice,
    state: Arc<watch::Sender<FakeLinkState>>,
    notifications: Vec<Vec<u8>>,
    notification_interval: Duration,
    fail_subscribe: bool,
    disconnect_after: Option<usize>,
    journal: FakeJournal,
}

impl FakeLink {
    fn ensure_connected(&self) -> Result<(), InteractionError> {
        if self.state.borrow().connected {
            Ok(())
        } else {
            Err(InteractionError::NotConnected)
        }
    }
}

#[async_trait]
impl PeripheralLink for FakeLink {
    fn device(&self) -> &FoundDevice {
        &self.device
    }

    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        self.ensure_connected()?;
        self.journal.record(JournalEntry::Write {
            endpoint,
            payload: payload.to_vec(),
            mode,
        });

        if endpoint == EndpointId::ControlPoint {
            match payload {
                [byte] if *byte == Opcode::StartMeasurement.byte() => {
                    self.state.send_modify(|state| state.measuring = true);
                }
                [byte] if *byte == Opcode::StopMeasurement.byte() => {
                    self.state.send_modify(|state| state.measuring = false);
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn subscribe(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        self.ensure_connected()?;
        if self.fail_subscribe {
            return Err(InteractionError::FakeSubscribeFailure { endpoint });
        }
        self.journal.record(JournalEntry::Subscribed(endpoint));
        if endpoint == EndpointId::DataPoint {
            self.state.send_modify(|state| state.subscribed = true);
        }
        Ok(())
    }

    async fn unsubscribe(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        self.ensure_connected()?;
        self.journal.record(JournalEntry::Unsubscribed(endpoint));
        if endpoint == EndpointId::DataPoint {
            self.state.send_modify(|state| state.subscribed = false);
        }
        Ok(())
    }

    async fn notifications(
        &self,
        endpoint: EndpointId,
    ) -> Result<NotificationStream, InteractionError> {
        self.ensure_connected()?;
        if endpoint != EndpointId::DataPoint {
            return Ok(Box::pin(tokio_stream::empty()));
        }

        let (sender, receiver) = mpsc::channel(16);
        tokio::spawn(replay_notifications(
            sender,
            Arc::clone(&self.state),
            self.notifications.clone(),
            self.notification_interval,
            self.disconnect_after,
        ));
        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    async fn disconnected(&self) -> Result<DisconnectWatch, InteractionError> {
        let mut state = self.state.subscribe();
        Ok(Box::pin(async move {
            let _ = state.wait_for(|state| !state.connected).await;
        }))
    }

    async fn disconnect(&self) -> Result<(), InteractionError> {
        self.journal
            .record(JournalEntry::Disconnected(self.device.device_id().to_owned()));
        self.state.send_modify(|state| {
            state.connected = false;
            state.measuring = false;
            state.subscribed = false;
        });
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, InteractionError> {
        Ok(self.state.borrow().connected)
    }
}

async fn replay_notifications(
    sender: mpsc::Sender<Vec<u8>>,
    state: Arc<watch::Sender<FakeLinkState>>,
    payloads: Vec<Vec<u8>>,
    interval: Duration,
    disconnect_after: Option<usize>,
) {
    let mut observed = state.subscribe();
    let mut delivered = 0usize;

    for payload in payloads {
        let ready = tokio::select! {
            () = sender.closed() => return,
            ready = wait_until_streaming(&mut observed) => ready,
        };
        if !ready {
            return;
        }
        if !interval.is_zero() {
            sleep(interval).await;
        }
        if sender.send(payload).await.is_err() {
            return;
        }
        delivered += 1;

        if disconnect_after == Some(delivered) {
            debug!(delivered, "fake peripheral dropping the link");
            state.send_modify(|state| {
                state.connected = false;
                state.measuring = false;
                state.subscribed = false;
            });
            return;
        }
    }

    tokio::select! {
        () = sender.closed() => {}
        _ = observed.wait_for(|state| !state.connected) => {}
    }
}

/// Waits for an active measurement; returns `false` once the link is closed.
async fn wait_until_streaming(observed: &mut watch::Receiver<FakeLinkState>) -> bool {
    observed
        .wait_for(|state| !state.connected || state.streaming())
        .await
        .is_ok_and(|state| state.connected)
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<FoundDevice>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<FoundDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    if fields.iter().any(|field| field.is_empty()) {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = if fields[2] == "-" {
        None
    } else {
        Some(fields[2].to_string())
    };
    let rssi = if fields[3] == "-" {
        None
    } else {
        Some(fields[3].parse::<i16>()?)
    };

    Ok(FoundDevice::new(fields[0], fields[1], local_name, rssi))
}

fn parse_notifications(raw_value: &str) -> Result<Vec<Vec<u8>>, FixtureError> {
    if raw_value.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw_value
        .split(',')
        .map(|payload| {
            let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
            Ok(hex::decode(cleaned)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("hci0|AA:BB|Progressor_1|-43", 1)]
    #[case("hci0|AA:BB|Progressor_1|-43;hci1|CC:DD|-|-", 2)]
    fn parse_scan_fixture_parses_records(#[case] fixture: &str, #[case] expected_count: usize) {
        let devices = parse_scan_fixture(fixture).expect("fixture should parse");
        assert_eq!(expected_count, devices.len());
    }

    #[test]
    fn parse_scan_record_maps_placeholders_to_none() {
        let device = parse_scan_record("hci1|CC:DD|-|-").expect("record should parse");
        assert_eq!(None, device.local_name());
        assert_eq!(None, device.rssi());
    }

    #[rstest]
    #[case::missing_field("hci0|AA:BB|Progressor_1")]
    #[case::extra_field("hci0|AA:BB|Progressor_1|-43|x")]
    fn parse_scan_fixture_rejects_invalid_field_count(#[case] fixture: &str) {
        let result = parse_scan_fixture(fixture);
        assert_matches!(result, Err(FixtureError::InvalidRecordFieldCount));
    }

    #[test]
    fn parse_scan_fixture_rejects_empty_input() {
        assert_matches!(parse_scan_fixture("  "), Err(FixtureError::EmptyFixture));
    }

    #[test]
    fn parse_notifications_decodes_comma_separated_hex() {
        let payloads = parse_notifications("02, 00 0E").expect("payloads should parse");
        assert_eq!(vec![vec![0x02], vec![0x00, 0x0E]], payloads);
    }

    #[test]
    fn parse_notifications_rejects_odd_length() {
        let result = parse_notifications("0");
        assert_matches!(result, Err(FixtureError::InvalidHex(_)));
    }

    #[test]
    fn default_notifications_are_sample_batches() {
        let backend = FakeBackend::new(
            FakeBackendConfig::builder()
                .scan_fixture("hci0|AA|Progressor_1|-40".parse().expect("fixture"))
                .build(),
        );
        assert_eq!(2, backend.notifications.len());
        assert_eq!(0x01, backend.notifications[0][0]);
    }
}
