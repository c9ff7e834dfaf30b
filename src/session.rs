use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use crate::codec::Sample;
use crate::error::InteractionError;
use crate::hw::{
    BleManager, ConnectionManager, ConnectionState, DeviceScanner, FoundDevice,
    PermissionNegotiator, PermissionPrompt, StreamingSession,
};
use crate::protocol::{DEFAULT_NAME_PREFIX, Opcode};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Sensor session settings.
#[derive(Debug, Clone, Builder)]
pub struct SensorConfig {
    /// Local-name prefix a peripheral must advertise to be surfaced.
    #[builder(default = DEFAULT_NAME_PREFIX.to_string(), into)]
    name_prefix: String,
}

impl SensorConfig {
    /// Returns the local-name prefix used to filter discoveries.
    #[must_use]
    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Change notifications published by [`SensorSession`].
///
/// `ConnectionChanged` is published for every transition, in order, including
/// short-lived `Connecting` and `Disconnecting` states.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    DeviceDiscovered(FoundDevice),
    ConnectionChanged(ConnectionState),
    Sample(Sample),
    MeasurementStopped,
}

/// Result of a command that requires a live connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    #[display("sent")]
    Sent,
    #[display("skipped (not connected)")]
    SkippedNotConnected,
    #[display("skipped (not streaming)")]
    SkippedNotStreaming,
}

/// Samples of the running measurement.
///
/// Appends are refused while the log is closed, so closing it is enough to
/// guarantee that no stale sample is observed afterwards.
#[derive(Debug, Default)]
struct SampleLog {
    open: bool,
    samples: Vec<Sample>,
}

#[derive(Debug, Clone, Default)]
struct SharedSampleLog(Arc<Mutex<SampleLog>>);

impl SharedSampleLog {
    fn lock(&self) -> MutexGuard<'_, SampleLog> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) {
        let mut log = self.lock();
        log.open = true;
        log.samples.clear();
    }

    fn close(&self) {
        let mut log = self.lock();
        log.open = false;
        log.samples.clear();
    }

    fn push(&self, sample: Sample) -> bool {
        let mut log = self.lock();
        if log.open {
            log.samples.push(sample);
        }
        log.open
    }

    fn snapshot(&self) -> Vec<Sample> {
        self.lock().samples.clone()
    }
}

/// State container that ties permissions, discovery, the connection and the
/// measurement stream together for a UI.
///
/// Commands that need a peripheral are logged no-ops while nothing is
/// connected; only scanning and connecting surface permission errors.
#[derive(Debug)]
pub struct SensorSession {
    manager: BleManager,
    permissions: PermissionNegotiator,
    permissions_granted: bool,
    name_prefix: String,
    scanner: DeviceScanner,
    connections: ConnectionManager,
    streaming: StreamingSession,
    devices: Arc<Mutex<Vec<FoundDevice>>>,
    samples: SharedSampleLog,
    events: broadcast::Sender<SessionEvent>,
}

impl SensorSession {
    /// Creates a session around a shared BLE manager.
    ///
    /// Must be called from within a Tokio runtime; connection-state changes
    /// are republished by a background task.
    #[must_use]
    pub fn new(
        manager: BleManager,
        prompt: Box<dyn PermissionPrompt>,
        config: SensorConfig,
    ) -> Self {
        let (events, _receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let connections = ConnectionManager::new(manager.clone());
        let samples = SharedSampleLog::default();
        tokio::spawn(republish_connection_changes(
            connections.subscribe_transitions(),
            samples.clone(),
            events.clone(),
        ));

        Self {
            scanner: DeviceScanner::new(manager.clone(), config.name_prefix.clone()),
            manager,
            permissions: PermissionNegotiator::new(prompt),
            permissions_granted: false,
            name_prefix: config.name_prefix,
            connections,
            streaming: StreamingSession::new(),
            devices: Arc::default(),
            samples,
            events,
        }
    }

    /// Runs the permission sequence and remembers the outcome.
    pub async fn request_permissions(&mut self) -> bool {
        self.permissions_granted = self.permissions.request_permissions().await;
        self.permissions_granted
    }

    /// Starts a scan session, requesting permissions first if needed.
    ///
    /// The discovered-device list is reset when a new session starts. Calling
    /// this while a scan runs is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::PermissionDenied`] if permissions are not
    /// granted, or the platform error that prevented discovery.
    #[instrument(skip(self), level = "info")]
    pub async fn scan(&mut self) -> Result<(), InteractionError> {
        if !self.permissions_granted && !self.request_permissions().await {
            return Err(InteractionError::PermissionDenied);
        }
        if self.scanner.is_scanning() {
            debug!("scan already running");
            return Ok(());
        }

        lock(&self.devices).clear();
        let devices = Arc::clone(&self.devices);
        let events = self.events.clone();
        self.scanner
            .start_scan(move |device| {
                lock(&devices).push(device.clone());
                let _ = events.send(SessionEvent::DeviceDiscovered(device));
            })
            .await
    }

    /// Stops the running scan session. The discovered-device list is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the stop request.
    pub async fn stop_scan(&mut self) -> Result<(), InteractionError> {
        self.scanner.stop_scan().await
    }

    /// Connects to a discovered sensor. Any running scan is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::PermissionDenied`] before permissions are
    /// granted, a [`crate::ConnectError`] if a connection already exists, or
    /// the platform error that aborted the attempt.
    #[instrument(skip(self, device), level = "info", fields(device_id = device.device_id()))]
    pub async fn connect_to(&mut self, device: &FoundDevice) -> Result<(), InteractionError> {
        if !self.permissions_granted {
            return Err(InteractionError::PermissionDenied);
        }
        self.reconcile().await;
        self.connections.connect(device).await?;
        Ok(())
    }

    /// Disconnects, dropping the subscription and the buffered samples first.
    ///
    /// # Errors
    ///
    /// Returns the platform error if the disconnect request failed. The
    /// connection state is `Disconnected` either way.
    #[instrument(skip(self), level = "info")]
    pub async fn disconnect(&mut self) -> Result<(), InteractionError> {
        if self.streaming.has_subscription() {
            self.streaming.discard().await;
            self.samples.close();
            let _ = self.events.send(SessionEvent::MeasurementStopped);
        }
        self.connections.disconnect().await
    }

    /// Zeroes the load cell.
    ///
    /// # Errors
    ///
    /// Returns an error if the command write fails.
    pub async fn tare(&mut self) -> Result<CommandOutcome, InteractionError> {
        self.send_command(Opcode::Tare).await
    }

    /// Asks the sensor to sample its battery voltage.
    ///
    /// # Errors
    ///
    /// Returns an error if the command write fails.
    pub async fn sample_battery_voltage(&mut self) -> Result<CommandOutcome, InteractionError> {
        self.send_command(Opcode::SampleBatteryVoltage).await
    }

    /// Powers the sensor off and then disconnects, since it will not be
    /// reachable afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the command write or the disconnect fails.
    #[instrument(skip(self), level = "info")]
    pub async fn shutdown(&mut self) -> Result<CommandOutcome, InteractionError> {
        let outcome = self.send_command(Opcode::Shutdown).await?;
        if outcome == CommandOutcome::Sent {
            self.disconnect().await?;
        }
        Ok(outcome)
    }

    /// Starts streaming samples from the connected sensor.
    ///
    /// # Errors
    ///
    /// Returns an error if the start command or the subscription fails.
    #[instrument(skip(self), level = "info")]
    pub async fn start_measurement(&mut self) -> Result<CommandOutcome, InteractionError> {
        self.reconcile().await;
        let Some(connection) = self.connections.connection() else {
            info!("start measurement skipped: no sensor connected");
            return Ok(CommandOutcome::SkippedNotConnected);
        };
        if self.streaming.is_active() {
            debug!("measurement already running");
            return Ok(CommandOutcome::Sent);
        }

        self.samples.open();
        let samples = self.samples.clone();
        let events = self.events.clone();
        let started = self
            .streaming
            .start(connection, move |sample| {
                if samples.push(sample) {
                    let _ = events.send(SessionEvent::Sample(sample));
                }
            })
            .await;

        match started {
            Ok(()) => Ok(CommandOutcome::Sent),
            Err(error) => {
                self.samples.close();
                Err(error)
            }
        }
    }

    /// Stops streaming and clears the buffered samples.
    ///
    /// Reports [`CommandOutcome::SkippedNotStreaming`] without writing or
    /// publishing anything when no measurement was started.
    ///
    /// # Errors
    ///
    /// Returns an error if the stop command cannot be written; the listener is
    /// detached and the samples are cleared regardless.
    #[instrument(skip(self), level = "info")]
    pub async fn stop_measurement(&mut self) -> Result<CommandOutcome, InteractionError> {
        self.reconcile().await;
        let Some(connection) = self.connections.connection() else {
            info!("stop measurement skipped: no sensor connected");
            return Ok(CommandOutcome::SkippedNotConnected);
        };
        if !self.streaming.has_subscription() {
            info!("stop measurement skipped: not streaming");
            return Ok(CommandOutcome::SkippedNotStreaming);
        }

        let stopped = self.streaming.stop(connection).await;
        self.samples.close();
        let _ = self.events.send(SessionEvent::MeasurementStopped);
        stopped.map(|()| CommandOutcome::Sent)
    }

    /// Stops scanning, disconnects and shuts the BLE manager down.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while releasing the radio.
    pub async fn close(mut self) -> Result<(), InteractionError> {
        let stopped = self.scanner.stop_scan().await;
        let disconnected = self.disconnect().await;
        self.manager.shutdown().await;
        stopped.and(disconnected)
    }

    /// Returns the sensors discovered in the current scan session, in discovery order.
    #[must_use]
    pub fn devices(&self) -> Vec<FoundDevice> {
        lock(&self.devices).clone()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }

    /// Returns the samples of the running measurement, in arrival order.
    ///
    /// Empty unless a sensor is connected and streaming.
    #[must_use]
    pub fn samples(&self) -> Vec<Sample> {
        if self.connection_state() != ConnectionState::Connected {
            return Vec::new();
        }
        self.samples.snapshot()
    }

    /// Returns whether a measurement is streaming.
    #[must_use]
    pub fn is_measuring(&self) -> bool {
        self.connection_state() == ConnectionState::Connected && self.streaming.is_active()
    }

    /// Returns whether a scan session is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watches the latest connection state. Rapid transitions may be coalesced.
    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connections.watch_state()
    }

    /// Waits until the current scan session has surfaced a sensor.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::NoMatchingDevice`] if `timeout` elapses first.
    #[instrument(skip(self), level = "debug")]
    pub async fn wait_for_device(
        &self,
        timeout: Option<Duration>,
    ) -> Result<FoundDevice, InteractionError> {
        let mut events = self.subscribe();
        let wait = async {
            loop {
                let first = lock(&self.devices).first().cloned();
                if first.is_some() {
                    return first;
                }
                match events.recv().await {
                    Ok(SessionEvent::DeviceDiscovered(device)) => return Some(device),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        let found = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait).await.ok().flatten(),
            None => wait.await,
        };
        found.ok_or_else(|| InteractionError::NoMatchingDevice {
            prefix: self.name_prefix.clone(),
        })
    }

    async fn send_command(&mut self, opcode: Opcode) -> Result<CommandOutcome, InteractionError> {
        self.reconcile().await;
        let Some(connection) = self.connections.connection() else {
            info!(%opcode, "command skipped: no sensor connected");
            return Ok(CommandOutcome::SkippedNotConnected);
        };
        connection.send(opcode).await?;
        Ok(CommandOutcome::Sent)
    }

    /// Releases the subscription of a connection the peripheral already dropped.
    async fn reconcile(&mut self) {
        if self.connections.state() == ConnectionState::Disconnected
            && self.streaming.has_subscription()
        {
            self.streaming.discard().await;
            self.samples.close();
            let _ = self.events.send(SessionEvent::MeasurementStopped);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn republish_connection_changes(
    mut transitions: broadcast::Receiver<ConnectionState>,
    samples: SharedSampleLog,
    events: broadcast::Sender<SessionEvent>,
) {
    loop {
        let current = match transitions.recv().await {
            Ok(state) => state,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "connection transitions were dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if current == ConnectionState::Disconnected {
            samples.close();
        }
        if events.send(SessionEvent::ConnectionChanged(current)).is_err() {
            debug!(%current, "no session event subscribers");
        }
    }
    debug!("connection state channel closed");
}
