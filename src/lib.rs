mod app;
mod cli;
mod codec;
mod error;
mod hw;
mod protocol;
mod session;
mod telemetry;
mod terminal;
mod utils;

pub use app::{RunOptions, SensorRuntime, run, run_with_clients};
pub use cli::{
    Args, Command, ControlArgs, FakeArgs, LogLevel, MeasureArgs, OutputFormat, ScanArgs,
    SensorCommand,
};
pub use codec::{DecodedEvent, Sample, TelemetryCodec};
pub use error::{ConnectError, FixtureError, InteractionError};
pub use hw::{
    BleBackend, BleManager, Capability, Connection, ConnectionManager, ConnectionState,
    DeviceScanner, DisconnectWatch, FakeJournal, FakePermissionPrompt, FoundDevice, JournalEntry,
    NotificationStream, PeripheralLink, PermissionNegotiator, PermissionPrompt, ScanStream,
    StreamingSession, UngatedPlatform, WriteMode,
};
pub use protocol::{DEFAULT_NAME_PREFIX, EndpointId, Opcode};
pub use session::{CommandOutcome, SensorConfig, SensorSession, SessionEvent};
pub use terminal::TerminalClient;
