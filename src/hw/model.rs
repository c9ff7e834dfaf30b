use serde::Serialize;

/// A BLE peripheral surfaced by discovery.
///
/// `device_id` is the backend's opaque handle; two records with the same
/// `device_id` refer to the same peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FoundDevice {
    adapter_name: String,
    device_id: String,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl FoundDevice {
    /// Creates a new discovered-device record.
    #[must_use]
    pub fn new(
        adapter_name: impl Into<String>,
        device_id: impl Into<String>,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            device_id: device_id.into(),
            local_name,
            rssi,
        }
    }

    /// Returns the adapter name used to discover this device.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Returns the backend-specific device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns whether the local name exists and starts with `prefix`.
    pub(crate) fn local_name_starts_with(&self, prefix: &str) -> bool {
        self.local_name
            .as_deref()
            .is_some_and(|name| name.starts_with(prefix))
    }
}

/// Lifecycle of the single sensor connection.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, derive_more::Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    #[display("disconnected")]
    Disconnected,
    #[display("connecting")]
    Connecting,
    #[display("connected")]
    Connected,
    #[display("disconnecting")]
    Disconnecting,
}

/// Delivery mode for control-point writes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}
