use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::hardware::{BleManager, DisconnectWatch, PeripheralLink};
use super::model::{ConnectionState, FoundDevice, WriteMode};
use crate::codec::TelemetryCodec;
use crate::error::{ConnectError, InteractionError};
use crate::protocol::{EndpointId, Opcode};

const TRANSITION_CHANNEL_CAPACITY: usize = 32;

/// The single live link to a sensor.
///
/// Owned by [`ConnectionManager`]; dropping it tears down every listener
/// bound to it.
#[derive(Debug)]
pub struct Connection {
    link: Box<dyn PeripheralLink>,
    teardown: CancellationToken,
}

impl Connection {
    /// Returns the connected peripheral.
    #[must_use]
    pub fn device(&self) -> &FoundDevice {
        self.link.device()
    }

    /// Writes one command opcode to the control point without response.
    ///
    /// # Errors
    ///
    /// Returns an error if the BLE write fails.
    #[instrument(skip(self), level = "debug", fields(%opcode))]
    pub async fn send(&self, opcode: Opcode) -> Result<(), InteractionError> {
        self.link
            .write(
                EndpointId::ControlPoint,
                &TelemetryCodec::encode_command(opcode),
                WriteMode::WithoutResponse,
            )
            .await
    }

    pub(crate) fn link(&self) -> &dyn PeripheralLink {
        self.link.as_ref()
    }

    /// Token cancelled when this connection is torn down for any reason.
    pub(crate) fn teardown_token(&self) -> &CancellationToken {
        &self.teardown
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.teardown.cancel();
    }
}

/// Connection state as a latest-value watch plus an ordered transition feed.
///
/// Every transition is broadcast from inside the watch update, so the feed
/// never reorders states and short-lived ones like `Connecting` are not lost.
#[derive(Debug)]
struct StateCell {
    current: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl StateCell {
    fn new() -> Self {
        let (current, _receiver) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _receiver) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            current,
            transitions,
        }
    }

    fn get(&self) -> ConnectionState {
        *self.current.borrow()
    }

    fn set(&self, next: ConnectionState) {
        self.current.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            if changed {
                let _ = self.transitions.send(next);
            }
            changed
        });
    }

    /// Moves to `next` only while the state is still `expected`.
    fn transition(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        self.current.send_if_modified(|current| {
            if *current != expected {
                return false;
            }
            *current = next;
            let _ = self.transitions.send(next);
            true
        })
    }
}

/// A connect attempt in flight.
///
/// Dropping it before [`PendingConnect::complete`] returns the state from
/// `Connecting` to `Disconnected`, whether the attempt failed or its future
/// was dropped mid-await.
#[derive(Debug)]
struct PendingConnect {
    state: Arc<StateCell>,
    completed: bool,
}

impl PendingConnect {
    fn begin(state: Arc<StateCell>) -> Self {
        state.set(ConnectionState::Connecting);
        Self {
            state,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.state.set(ConnectionState::Connected);
        self.completed = true;
    }
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        if !self.completed
            && self
                .state
                .transition(ConnectionState::Connecting, ConnectionState::Disconnected)
        {
            debug!("connect attempt ended without a connection");
        }
    }
}

/// Owns the connect/disconnect state machine for one sensor.
#[derive(Debug)]
pub struct ConnectionManager {
    manager: BleManager,
    state: Arc<StateCell>,
    active: Option<Connection>,
    observer: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Creates a manager in the `Disconnected` state.
    #[must_use]
    pub fn new(manager: BleManager) -> Self {
        Self {
            manager,
            state: Arc::new(StateCell::new()),
            active: None,
            observer: None,
        }
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Watches the latest connection state, including unsolicited drops.
    ///
    /// Rapid transitions may be coalesced; use
    /// [`ConnectionManager::subscribe_transitions`] to see every one.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.current.subscribe()
    }

    /// Subscribes to every state transition from now on, in order.
    #[must_use]
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.state.transitions.subscribe()
    }

    /// Returns the live connection, if the state is `Connected`.
    pub fn connection(&mut self) -> Option<&Connection> {
        self.reconcile();
        self.active.as_ref()
    }

    /// Connects to `device` and discovers its services.
    ///
    /// Any active scan is stopped first. A failed or abandoned attempt returns
    /// the state to `Disconnected`; nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::AlreadyActive`] if a connection is in progress or
    /// established, or the platform error that aborted the attempt.
    #[instrument(skip(self, device), level = "info", fields(device_id = device.device_id()))]
    pub async fn connect(
        &mut self,
        device: &FoundDevice,
    ) -> Result<&Connection, InteractionError> {
        self.reconcile();
        let current = self.state();
        if current != ConnectionState::Disconnected {
            return Err(ConnectError::AlreadyActive { state: current }.into());
        }
        let backend = self.manager.backend()?;

        let attempt = PendingConnect::begin(Arc::clone(&self.state));
        if let Err(error) = self.manager.stop_scan().await {
            debug!(?error, "failed to stop scan before connecting");
        }

        let link = backend.connect(device).await?;
        let dropped_by_peripheral = match link.disconnected().await {
            Ok(signal) => signal,
            Err(error) => {
                if let Err(disconnect_error) = link.disconnect().await {
                    debug!(
                        ?disconnect_error,
                        "failed to release link after observer error"
                    );
                }
                return Err(error);
            }
        };

        let teardown = CancellationToken::new();
        attempt.complete();
        self.observer = Some(tokio::spawn(observe_disconnect(
            dropped_by_peripheral,
            teardown.clone(),
            Arc::clone(&self.state),
        )));
        info!("connected");

        let connection = self.active.insert(Connection { link, teardown });
        Ok(&*connection)
    }
    /// Tears down the active connection. Without one this is a no-op.
    ///
    /// The state always ends `Disconnected`; the follow-up connectivity check
    /// is only logged.
    ///
    /// # Errors
    ///
    /// Returns the platform error if the disconnect request itself failed.
    #[instrument(skip(self), level = "info")]
    pub async fn disconnect(&mut self) -> Result<(), InteractionError> {
        self.reconcile();
        let Some(connection) = self.active.take() else {
            debug!("no active connection to disconnect");
            return Ok(());
        };

        self.state.set(ConnectionState::Disconnecting);
        connection.teardown.cancel();
        if let Some(observer) = self.observer.take()
            && let Err(error) = observer.await
        {
            debug!(?error, "disconnect observer ended abnormally");
        }

        let result = connection.link.disconnect().await;
        match connection.link.is_connected().await {
            Ok(false) => debug!("disconnect confirmed"),
            Ok(true) => warn!("peripheral still reports a connection after disconnect"),
            Err(error) => debug!(?error, "could not confirm disconnect"),
        }
        self.state.set(ConnectionState::Disconnected);
        info!("disconnected");
        result
    }

    /// Drops a connection the peripheral has already closed.
    fn reconcile(&mut self) {
        if self.state() == ConnectionState::Disconnected && self.active.take().is_some() {
            debug!("releasing connection closed by the peripheral");
            self.observer = None;
        }
    }
}

async fn observe_disconnect(
    dropped_by_peripheral: DisconnectWatch,
    teardown: CancellationToken,
    state: Arc<StateCell>,
) {
    tokio::select! {
        () = teardown.cancelled() => {}
        () = dropped_by_peripheral => {
            if state.transition(ConnectionState::Connected, ConnectionState::Disconnected) {
                info!("peripheral disconnected");
            }
            teardown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    use super::*;
    use crate::hw::fake_backend::{FakeBackend, FakeBackendConfig, FakeJournal, JournalEntry};

    const STALLED_CONNECT: Duration = Duration::from_millis(20);

    fn sensor() -> FoundDevice {
        FoundDevice::new("hci0", "AA:BB", Some("Progressor_7F21".to_owned()), Some(-48))
    }

    fn fake_backend(fail_connect: bool, stall_connect: bool) -> FakeBackend {
        FakeBackend::new(
            FakeBackendConfig::builder()
                .scan_fixture(
                    "hci0|AA:BB|Progressor_7F21|-48"
                        .parse()
                        .expect("fixture should parse"),
                )
                .fail_connect(fail_connect)
                .stall_connect(stall_connect)
                .build(),
        )
    }

    fn fake_manager(fail_connect: bool) -> (BleManager, FakeJournal) {
        let backend = fake_backend(fail_connect, false);
        let journal = backend.journal();
        (BleManager::init(Box::new(backend)), journal)
    }

    #[tokio::test]
    async fn connect_then_disconnect_walks_the_state_machine() -> anyhow::Result<()> {
        let (manager, journal) = fake_manager(false);
        let mut connections = ConnectionManager::new(manager);

        let teardown = connections
            .connect(&sensor())
            .await?
            .teardown_token()
            .clone();
        assert_eq!(ConnectionState::Connected, connections.state());
        assert_eq!(
            Some("AA:BB"),
            connections.connection().map(|live| live.device().device_id())
        );

        connections.disconnect().await?;
        assert_eq!(ConnectionState::Disconnected, connections.state());
        assert!(teardown.is_cancelled());
        assert!(connections.connection().is_none());
        assert_eq!(
            vec![
                JournalEntry::Connected("AA:BB".to_owned()),
                JournalEntry::Disconnected("AA:BB".to_owned()),
            ],
            journal.entries()
        );
        Ok(())
    }

    #[tokio::test]
    async fn second_connect_is_rejected_while_connected() -> anyhow::Result<()> {
        let (manager, journal) = fake_manager(false);
        let mut connections = ConnectionManager::new(manager);
        connections.connect(&sensor()).await?;

        let result = connections.connect(&sensor()).await.map(|_| ());
        assert_matches!(
            result,
            Err(InteractionError::Connect(ConnectError::AlreadyActive {
                state: ConnectionState::Connected
            }))
        );
        assert_eq!(ConnectionState::Connected, connections.state());
        assert_eq!(1, journal.entries().len());
        Ok(())
    }

    #[tokio::test]
    async fn failed_connect_returns_to_disconnected() {
        let (manager, journal) = fake_manager(true);
        let mut connections = ConnectionManager::new(manager);

        let result = connections.connect(&sensor()).await.map(|_| ());
        assert_matches!(result, Err(InteractionError::FakeConnectFailure { .. }));
        assert_eq!(ConnectionState::Disconnected, connections.state());
        assert_eq!(Vec::<JournalEntry>::new(), journal.entries());
    }

    #[tokio::test]
    async fn abandoned_connect_returns_to_disconnected() -> anyhow::Result<()> {
        let manager = BleManager::init(Box::new(fake_backend(false, true)));
        let mut connections = ConnectionManager::new(manager);
        let mut transitions = connections.subscribe_transitions();

        let timed_out = timeout(STALLED_CONNECT, connections.connect(&sensor()))
            .await
            .is_err();
        assert!(timed_out);
        assert_eq!(ConnectionState::Disconnected, connections.state());
        assert_eq!(ConnectionState::Connecting, transitions.try_recv()?);
        assert_eq!(ConnectionState::Disconnected, transitions.try_recv()?);

        // The next attempt reaches the radio again instead of being rejected.
        let timed_out = timeout(STALLED_CONNECT, connections.connect(&sensor()))
            .await
            .is_err();
        assert!(timed_out);
        assert_eq!(ConnectionState::Connecting, transitions.try_recv()?);
        assert_eq!(ConnectionState::Disconnected, transitions.try_recv()?);
        assert_eq!(ConnectionState::Disconnected, connections.state());
        Ok(())
    }

    #[tokio::test]
    async fn every_transition_is_published_in_order() -> anyhow::Result<()> {
        let (manager, _journal) = fake_manager(false);
        let mut connections = ConnectionManager::new(manager);
        let mut transitions = connections.subscribe_transitions();

        connections.connect(&sensor()).await?;
        connections.disconnect().await?;

        let mut published = Vec::new();
        while let Ok(state) = transitions.try_recv() {
            published.push(state);
        }
        assert_eq!(
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
            ],
            published
        );
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_no_op() -> anyhow::Result<()> {
        let (manager, journal) = fake_manager(false);
        let mut connections = ConnectionManager::new(manager);

        connections.disconnect().await?;
        assert_eq!(ConnectionState::Disconnected, connections.state());
        assert_eq!(Vec::<JournalEntry>::new(), journal.entries());
        Ok(())
    }

    #[tokio::test]
    async fn connecting_stops_an_active_scan() -> anyhow::Result<()> {
        let (manager, journal) = fake_manager(false);
        let scan = manager.begin_scan();
        let mut connections = ConnectionManager::new(manager.clone());

        connections.connect(&sensor()).await?;
        assert!(scan.is_cancelled());
        assert!(!manager.is_scanning());
        assert_eq!(
            vec![
                JournalEntry::ScanStopped,
                JournalEntry::Connected("AA:BB".to_owned()),
            ],
            journal.entries()
        );
        Ok(())
    }

    #[tokio::test]
    async fn peripheral_drop_is_observed_and_released() -> anyhow::Result<()> {
        let (manager, _journal) = fake_manager(false);
        let mut connections = ConnectionManager::new(manager);
        let mut states = connections.watch_state();

        let teardown = {
            let connection = connections.connect(&sensor()).await?;
            connection.link().disconnect().await?;
            connection.teardown_token().clone()
        };
        tokio::time::timeout(
            Duration::from_secs(1),
            states.wait_for(|state| *state == ConnectionState::Disconnected),
        )
        .await??;

        assert!(teardown.is_cancelled());
        assert!(connections.connection().is_none());

        connections.connect(&sensor()).await?;
        assert_eq!(ConnectionState::Connected, connections.state());
        Ok(())
    }

    #[tokio::test]
    async fn shut_down_manager_refuses_to_connect() {
        let (manager, _journal) = fake_manager(false);
        manager.shutdown().await;
        let mut connections = ConnectionManager::new(manager);

        let result = connections.connect(&sensor()).await.map(|_| ());
        assert_matches!(result, Err(InteractionError::ManagerShutDown));
        assert_eq!(ConnectionState::Disconnected, connections.state());
    }
}
