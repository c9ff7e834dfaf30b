use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, instrument, trace};

use super::hardware::{BleBackend, DisconnectWatch, NotificationStream, PeripheralLink, ScanStream};
use super::model::{FoundDevice, WriteMode};
use crate::error::InteractionError;
use crate::protocol::{
    EndpointId, endpoint_for_uuid, endpoint_metadata, required_characteristics,
};

const DISCOVERY_CHANNEL_CAPACITY: usize = 64;

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Hardware backend backed by `btleplug`.
#[derive(Debug)]
pub(crate) struct BtleplugBackend {
    manager: Manager,
}

impl BtleplugBackend {
    /// Creates the real BLE backend.
    pub(crate) async fn new() -> Result<Self, InteractionError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<AdapterHandle>, InteractionError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            handles.push(AdapterHandle { adapter, name });
        }
        Ok(handles)
    }

    /// Finds the platform peripheral behind a discovered device.
    ///
    /// The adapter that reported the device is searched first.
    async fn locate(
        &self,
        device: &FoundDevice,
    ) -> Result<(AdapterHandle, Peripheral), InteractionError> {
        let mut adapters = self.adapters().await?;
        adapters.sort_by_key(|handle| handle.name != device.adapter_name());

        for handle in adapters {
            let peripherals = handle.adapter.peripherals().await?;
            if let Some(peripheral) = peripherals
                .into_iter()
                .find(|peripheral| peripheral.id().to_string() == device.device_id())
            {
                return Ok((handle, peripheral));
            }
        }

        Err(InteractionError::UnknownPeripheral {
            device_id: device.device_id().to_owned(),
        })
    }
}

#[async_trait]
impl BleBackend for BtleplugBackend {
    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<ScanStream, InteractionError> {
        let adapters = self.adapters().await?;
        info!(adapter_count = adapters.len(), "starting BLE scan");

        let (sender, receiver) = mpsc::channel(DISCOVERY_CHANNEL_CAPACITY);
        for handle in adapters {
            let events = handle.adapter.events().await?;
            handle.adapter.start_scan(ScanFilter::default()).await?;
            tokio::spawn(forward_discoveries(handle, events, sender.clone()));
        }
        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), InteractionError> {
        for handle in self.adapters().await? {
            handle.adapter.stop_scan().await?;
        }
        Ok(())
    }

    #[instrument(skip(self, device), level = "debug", fields(device_id = device.device_id()))]
    async fn connect(
        &self,
        device: &FoundDevice,
    ) -> Result<Box<dyn PeripheralLink>, InteractionError> {
        let (handle, peripheral) = self.locate(device).await?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let characteristics = match characteristics_by_endpoint(&peripheral.characteristics()) {
            Ok(characteristics) => characteristics,
            Err(error) => {
                if let Err(disconnect_error) = peripheral.disconnect().await {
                    debug!(
                        ?disconnect_error,
                        "failed to disconnect after endpoint validation error"
                    );
                }
                return Err(error);
            }
        };

        info!(adapter = %handle.name, "connected to peripheral");
        Ok(Box::new(BtleplugLink {
            device: device.clone(),
            adapter: handle.adapter,
            peripheral,
            characteristics,
        }))
    }
}

#[derive(Debug, Clone)]
struct AdapterHandle {
    adapter: Adapter,
    name: String,
}

async fn forward_discoveries(
    handle: AdapterHandle,
    mut events: CentralEvents,
    sender: mpsc::Sender<Result<FoundDevice, InteractionError>>,
) {
    loop {
        let event = tokio::select! {
            () = sender.closed() => break,
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };
        let item = match describe_peripheral(&handle, &id).await {
            Ok(Some(device)) => Ok(device),
            Ok(None) => continue,
            Err(error) => Err(error),
        };
        if sender.send(item).await.is_err() {
            break;
        }
    }
    trace!(adapter = %handle.name, "discovery forwarder finished");
}

async fn describe_peripheral(
    handle: &AdapterHandle,
    id: &PeripheralId,
) -> Result<Option<FoundDevice>, InteractionError> {
    let peripheral = handle.adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    Ok(Some(FoundDevice::new(
        handle.name.clone(),
        id.to_string(),
        properties.local_name,
        properties.rssi,
    )))
}

fn characteristics_by_endpoint(
    characteristics: &BTreeSet<Characteristic>,
) -> Result<HashMap<EndpointId, Characteristic>, InteractionError> {
    required_characteristics()
        .map(|endpoint| {
            let uuid = endpoint_metadata(endpoint).uuid();
            characteristics
                .iter()
                .find(|characteristic| characteristic.uuid == uuid)
                .cloned()
                .map(|characteristic| (endpoint, characteristic))
                .ok_or(InteractionError::MissingEndpoint { endpoint })
        })
        .collect()
}

fn write_type(mode: WriteMode) -> WriteType {
    match mode {
        WriteMode::WithResponse => WriteType::WithResponse,
        WriteMode::WithoutResponse => WriteType::WithoutResponse,
    }
}

/// Link bound to a real peripheral.
#[derive(Debug)]
struct BtleplugLink {
    device: FoundDevice,
    adapter: Adapter,
    peripheral: Peripheral,
    characteristics: HashMap<EndpointId, Characteristic>,
}

impl BtleplugLink {
    fn characteristic_for(
        &self,
        endpoint: EndpointId,
    ) -> Result<&Characteristic, InteractionError> {
        self.characteristics
            .get(&endpoint)
            .ok_or(InteractionError::MissingEndpoint { endpoint })
    }
}

#[async_trait]
impl PeripheralLink for BtleplugLink {
    fn device(&self) -> &FoundDevice {
        &self.device
    }

    #[instrument(skip(self, payload), level = "trace", fields(%endpoint, ?mode, payload_len = payload.len()))]
    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral
            .write(characteristic, payload, write_type(mode))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(%endpoint))]
    async fn subscribe(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral.subscribe(characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(%endpoint))]
    async fn unsubscribe(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral.unsubscribe(characteristic).await?;
        Ok(())
    }

    async fn notifications(
        &self,
        endpoint: EndpointId,
    ) -> Result<NotificationStream, InteractionError> {
        self.characteristic_for(endpoint)?;
        let notifications = self.peripheral.notifications().await?;
        Ok(Box::pin(notifications.filter_map(move |notification| {
            (endpoint_for_uuid(notification.uuid) == Some(endpoint)).then_some(notification.value)
        })))
    }

    async fn disconnected(&self) -> Result<DisconnectWatch, InteractionError> {
        let mut events = self.adapter.events().await?;
        let id = self.peripheral.id();
        Ok(Box::pin(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(disconnected) = event
                    && disconnected == id
                {
                    return;
                }
            }
            debug!("adapter event stream ended; treating link as lost");
        }))
    }

    #[instrument(skip(self), level = "debug")]
    async fn disconnect(&self) -> Result<(), InteractionError> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, InteractionError> {
        Ok(self.peripheral.is_connected().await?)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use btleplug::api::CharPropFlags;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn characteristic(endpoint: EndpointId, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid: endpoint_metadata(endpoint).uuid(),
            service_uuid: endpoint_metadata(EndpointId::ProgressorService).uuid(),
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    #[test]
    fn characteristics_by_endpoint_resolves_both_characteristics() {
        let characteristics = BTreeSet::from([
            characteristic(EndpointId::ControlPoint, CharPropFlags::WRITE_WITHOUT_RESPONSE),
            characteristic(EndpointId::DataPoint, CharPropFlags::NOTIFY),
        ]);

        let resolved =
            characteristics_by_endpoint(&characteristics).expect("both endpoints should resolve");

        assert_eq!(2, resolved.len());
        assert_eq!(
            endpoint_metadata(EndpointId::DataPoint).uuid(),
            resolved[&EndpointId::DataPoint].uuid
        );
    }

    #[test]
    fn characteristics_by_endpoint_reports_missing_data_point() {
        let characteristics = BTreeSet::from([characteristic(
            EndpointId::ControlPoint,
            CharPropFlags::WRITE,
        )]);

        let result = characteristics_by_endpoint(&characteristics);

        assert_matches!(
            result,
            Err(InteractionError::MissingEndpoint {
                endpoint: EndpointId::DataPoint
            })
        );
    }

    #[rstest]
    #[case(WriteMode::WithResponse, WriteType::WithResponse)]
    #[case(WriteMode::WithoutResponse, WriteType::WithoutResponse)]
    fn write_type_maps_modes(#[case] mode: WriteMode, #[case] expected: WriteType) {
        assert_eq!(expected, write_type(mode));
    }
}
