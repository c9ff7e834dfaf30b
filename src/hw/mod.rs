mod btleplug_backend;
mod connection;
mod fake_backend;
mod hardware;
mod model;
mod permissions;
mod scanner;
mod streaming;

pub use self::connection::{Connection, ConnectionManager};
pub(crate) use self::fake_backend::{
    FakeBackend, FakeBackendConfig, NotificationPayloads, ScanFixture,
};
pub use self::fake_backend::{FakeJournal, JournalEntry};
pub use self::hardware::{
    BleBackend, BleManager, DisconnectWatch, NotificationStream, PeripheralLink, ScanStream,
};
pub use self::model::{ConnectionState, FoundDevice, WriteMode};
pub use self::permissions::{
    Capability, FakePermissionPrompt, PermissionNegotiator, PermissionPrompt, UngatedPlatform,
};
pub use self::scanner::DeviceScanner;
pub use self::streaming::StreamingSession;
