use std::collections::HashSet;

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::hardware::{BleManager, ScanStream};
use super::model::FoundDevice;
use crate::error::InteractionError;

/// Admits each matching peripheral at most once per scan session.
#[derive(Debug)]
pub(crate) struct DiscoveryFilter {
    name_prefix: String,
    seen: HashSet<String>,
}

impl DiscoveryFilter {
    pub(crate) fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            seen: HashSet::new(),
        }
    }

    /// Returns `true` the first time a named, prefix-matching peripheral is offered.
    pub(crate) fn admit(&mut self, device: &FoundDevice) -> bool {
        if !device.local_name_starts_with(&self.name_prefix) {
            return false;
        }
        self.seen.insert(device.device_id().to_owned())
    }
}

#[derive(Debug)]
struct ScanTask {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// Drives platform discovery and surfaces matching sensors.
#[derive(Debug)]
pub struct DeviceScanner {
    manager: BleManager,
    name_prefix: String,
    task: Option<ScanTask>,
}

impl DeviceScanner {
    /// Creates a scanner that surfaces peripherals whose name starts with `name_prefix`.
    #[must_use]
    pub fn new(manager: BleManager, name_prefix: impl Into<String>) -> Self {
        Self {
            manager,
            name_prefix: name_prefix.into(),
            task: None,
        }
    }

    /// Returns whether the current scan session is still running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.cancel.is_cancelled() && !task.pump.is_finished())
    }

    /// Starts a scan session that runs until [`DeviceScanner::stop_scan`] or a connect.
    ///
    /// `on_discovered` is called once per matching peripheral. Calling this
    /// while a session is running leaves that session (and its de-duplication
    /// state) untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses to start discovery.
    #[instrument(skip(self, on_discovered), level = "info", fields(prefix = %self.name_prefix))]
    pub async fn start_scan<F>(&mut self, on_discovered: F) -> Result<(), InteractionError>
    where
        F: FnMut(FoundDevice) + Send + 'static,
    {
        if self.is_scanning() {
            debug!("scan already running");
            return Ok(());
        }

        let stream = self.manager.backend()?.start_scan().await?;
        let cancel = self.manager.begin_scan();
        let filter = DiscoveryFilter::new(self.name_prefix.clone());
        let pump = tokio::spawn(pump_discoveries(
            stream,
            filter,
            cancel.clone(),
            on_discovered,
        ));
        info!("scan started");
        self.task = Some(ScanTask { cancel, pump });
        Ok(())
    }

    /// Stops the running scan session. Stopping an idle scanner is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the stop request.
    #[instrument(skip(self), level = "info")]
    pub async fn stop_scan(&mut self) -> Result<(), InteractionError> {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            if let Err(error) = task.pump.await {
                debug!(?error, "scan pump ended abnormally");
            }
        }
        self.manager.stop_scan().await
    }
}

async fn pump_discoveries<F>(
    mut stream: ScanStream,
    mut filter: DiscoveryFilter,
    cancel: CancellationToken,
    mut on_discovered: F,
) where
    F: FnMut(FoundDevice),
{
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(device)) => {
                if filter.admit(&device) {
                    info!(
                        device_id = device.device_id(),
                        name = device.local_name(),
                        "discovered sensor"
                    );
                    on_discovered(device);
                }
            }
            Some(Err(error)) => warn!(?error, "scan enumeration error"),
            None => {
                debug!("platform scan stream ended");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn device(id: &str, name: Option<&str>) -> FoundDevice {
        FoundDevice::new("hci0", id, name.map(String::from), Some(-50))
    }

    #[rstest]
    #[case::matching(Some("Progressor_7F21"), true)]
    #[case::other_name(Some("Polar H10"), false)]
    #[case::unnamed(None, false)]
    fn admit_applies_prefix_policy(#[case] name: Option<&str>, #[case] expected: bool) {
        let mut filter = DiscoveryFilter::new("Progressor");
        assert_eq!(expected, filter.admit(&device("AA", name)));
    }

    #[test]
    fn admit_drops_repeated_identities() {
        let mut filter = DiscoveryFilter::new("Progressor");

        assert!(filter.admit(&device("AA", Some("Progressor_1"))));
        assert!(!filter.admit(&device("AA", Some("Progressor_1"))));
        assert!(filter.admit(&device("BB", Some("Progressor_2"))));
    }

    #[test]
    fn unnamed_advertisement_does_not_block_later_named_one() {
        let mut filter = DiscoveryFilter::new("Progressor");

        assert!(!filter.admit(&device("AA", None)));
        assert!(filter.admit(&device("AA", Some("Progressor_1"))));
    }
}
