use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::btleplug_backend::BtleplugBackend;
use super::model::{FoundDevice, WriteMode};
use crate::error::InteractionError;
use crate::protocol::EndpointId;

/// Advertisements reported while scanning. Errors are per-event and non-fatal.
pub type ScanStream = Pin<Box<dyn Stream<Item = Result<FoundDevice, InteractionError>> + Send>>;

/// Raw notification values for one characteristic, in delivery order.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Resolves once the peripheral drops the link on its own.
pub type DisconnectWatch = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Platform radio operations used by discovery and connection management.
#[async_trait]
pub trait BleBackend: Send + Sync + Debug {
    /// Starts discovery and returns every advertisement the platform reports.
    async fn start_scan(&self) -> Result<ScanStream, InteractionError>;

    /// Stops platform discovery.
    async fn stop_scan(&self) -> Result<(), InteractionError>;

    /// Connects to a discovered peripheral and resolves the Progressor endpoints.
    async fn connect(
        &self,
        device: &FoundDevice,
    ) -> Result<Box<dyn PeripheralLink>, InteractionError>;
}

/// An established link to one peripheral with discovered services.
#[async_trait]
pub trait PeripheralLink: Send + Sync + Debug {
    /// Returns the peripheral this link is bound to.
    fn device(&self) -> &FoundDevice;

    /// Writes a payload to a characteristic endpoint.
    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError>;

    /// Enables notifications on a characteristic endpoint.
    async fn subscribe(&self, endpoint: EndpointId) -> Result<(), InteractionError>;

    /// Disables notifications on a characteristic endpoint.
    async fn unsubscribe(&self, endpoint: EndpointId) -> Result<(), InteractionError>;

    /// Opens a stream of notification values for one characteristic endpoint.
    async fn notifications(
        &self,
        endpoint: EndpointId,
    ) -> Result<NotificationStream, InteractionError>;

    /// Registers an observer for peripheral-initiated disconnects.
    async fn disconnected(&self) -> Result<DisconnectWatch, InteractionError>;

    /// Requests link teardown.
    async fn disconnect(&self) -> Result<(), InteractionError>;

    /// Queries the platform's view of the link.
    async fn is_connected(&self) -> Result<bool, InteractionError>;
}

/// Owner of the platform radio.
///
/// One instance is created by the application entry point and handed to the
/// scanner and the connection manager. Clones share the same radio. The manager
/// also tracks the active scan so that connecting can stop it.
#[derive(Debug, Clone)]
pub struct BleManager {
    inner: Arc<ManagerInner>,
}

#[derive(Debug)]
struct ManagerInner {
    backend: Box<dyn BleBackend>,
    active_scan: Mutex<Option<CancellationToken>>,
    shut_down: AtomicBool,
}

impl BleManager {
    /// Wraps a backend in a new manager.
    #[must_use]
    pub fn init(backend: Box<dyn BleBackend>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                backend,
                active_scan: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a manager backed by the host's BLE adapters.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform BLE manager cannot be created.
    pub async fn init_platform() -> Result<Self, InteractionError> {
        let backend = BtleplugBackend::new().await?;
        Ok(Self::init(Box::new(backend)))
    }

    /// Stops any active scan and rejects further radio operations.
    #[instrument(skip(self), level = "debug")]
    pub async fn shutdown(&self) {
        if let Err(error) = self.stop_scan().await {
            debug!(?error, "failed to stop scan during shutdown");
        }
        self.inner.shut_down.store(true, Ordering::SeqCst);
        info!("BLE manager shut down");
    }

    /// Returns whether [`BleManager::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    pub(crate) fn backend(&self) -> Result<&dyn BleBackend, InteractionError> {
        if self.is_shut_down() {
            return Err(InteractionError::ManagerShutDown);
        }
        Ok(self.inner.backend.as_ref())
    }

    /// Records a new scan session, cancelling any previous one.
    pub(crate) fn begin_scan(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self
            .inner
            .active_scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        token
    }

    /// Returns whether a scan session is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.inner
            .active_scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Ends the active scan session, if any, and stops platform discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the stop request.
    pub(crate) async fn stop_scan(&self) -> Result<(), InteractionError> {
        let active = self
            .inner
            .active_scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(token) = active else {
            return Ok(());
        };
        token.cancel();
        debug!("stopping platform scan");
        self.inner.backend.stop_scan().await
    }
}
