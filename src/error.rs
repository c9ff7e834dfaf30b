use thiserror::Error;

use crate::hw::ConnectionState;
use crate::protocol::{EndpointId, endpoint_metadata};

/// Errors returned by BLE interaction operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("the BLE manager has been shut down")]
    ManagerShutDown,
    #[error("Bluetooth permissions were not granted")]
    PermissionDenied,
    #[error("peripheral `{device_id}` is no longer known to any adapter")]
    UnknownPeripheral { device_id: String },
    #[error(
        "required endpoint `{name}` ({uuid}) was not found on the connected device",
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint { endpoint: EndpointId },
    #[error("scan enumeration failed: {reason}")]
    ScanEnumeration { reason: String },
    #[error("the peripheral is not connected")]
    NotConnected,
    #[error("no `{prefix}*` device was discovered before the scan ended")]
    NoMatchingDevice { prefix: String },
    #[error("failed while waiting for Ctrl+C")]
    CtrlC { source: std::io::Error },
    #[error("fake backend rejected the connection to `{device_id}`")]
    FakeConnectFailure { device_id: String },
    #[error("fake backend rejected the subscription to `{endpoint}`")]
    FakeSubscribeFailure { endpoint: EndpointId },
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Rejected connection-state transitions.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ConnectError {
    #[error("a connection is already {state}; disconnect before connecting again")]
    AlreadyActive { state: ConnectionState },
}

/// Errors returned when parsing fake interaction fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain four pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("notification payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("unknown permission capability `{value}`")]
    UnknownCapability { value: String },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
