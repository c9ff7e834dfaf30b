use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

/// Local-name prefix advertised by Progressor force sensors.
pub const DEFAULT_NAME_PREFIX: &str = "Progressor";

/// Known Progressor GATT endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// Primary Progressor service.
    #[strum(to_string = "progressor_service")]
    ProgressorService,
    /// Characteristic accepting one-byte command opcodes.
    #[strum(to_string = "control_point")]
    ControlPoint,
    /// Characteristic emitting telemetry notifications.
    #[strum(to_string = "data_point")]
    DataPoint,
}

/// Endpoint category in GATT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum EndpointKind {
    #[strum(to_string = "service")]
    Service,
    #[strum(to_string = "characteristic")]
    Characteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: Uuid,
    kind: EndpointKind,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Endpoint UUID.
    pub(crate) fn uuid(self) -> Uuid {
        self.uuid
    }

    /// Endpoint kind.
    pub(crate) fn kind(self) -> EndpointKind {
        self.kind
    }
}

/// Endpoint metadata keyed by typed endpoint IDs.
static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> = LazyLock::new(|| {
    EndpointId::iter()
        .map(|endpoint| (endpoint, metadata_for(endpoint)))
        .collect()
});

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

/// Returns the characteristic endpoints a connection cannot work without.
pub(crate) fn required_characteristics() -> impl Iterator<Item = EndpointId> {
    EndpointId::iter().filter(|endpoint| {
        matches!(
            endpoint_metadata(*endpoint).kind(),
            EndpointKind::Characteristic
        )
    })
}

/// Resolves a characteristic or service UUID back to its endpoint.
pub(crate) fn endpoint_for_uuid(uuid: Uuid) -> Option<EndpointId> {
    EndpointId::iter().find(|endpoint| endpoint_metadata(*endpoint).uuid() == uuid)
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::ProgressorService => EndpointMetadata {
            name: "Progressor service",
            uuid: Uuid::from_u128(0x7e4e1701_1ea6_40c9_9dcc_13d34ffead57),
            kind: EndpointKind::Service,
        },
        EndpointId::DataPoint => EndpointMetadata {
            name: "Progressor data point",
            uuid: Uuid::from_u128(0x7e4e1702_1ea6_40c9_9dcc_13d34ffead57),
            kind: EndpointKind::Characteristic,
        },
        EndpointId::ControlPoint => EndpointMetadata {
            name: "Progressor control point",
            uuid: Uuid::from_u128(0x7e4e1703_1ea6_40c9_9dcc_13d34ffead57),
            kind: EndpointKind::Characteristic,
        },
    }
}

/// One-byte commands accepted by the control point.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum Opcode {
    #[strum(to_string = "tare")]
    Tare,
    #[strum(to_string = "start_measurement")]
    StartMeasurement,
    #[strum(to_string = "stop_measurement")]
    StopMeasurement,
    #[strum(to_string = "shutdown")]
    Shutdown,
    #[strum(to_string = "sample_battery_voltage")]
    SampleBatteryVoltage,
}

impl Opcode {
    /// Wire byte for this command.
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Self::Tare => 0x64,
            Self::StartMeasurement => 0x65,
            Self::StopMeasurement => 0x66,
            Self::Shutdown => 0x6E,
            Self::SampleBatteryVoltage => 0x6F,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn endpoint_metadata_contains_expected_uuids() {
        let service = endpoint_metadata(EndpointId::ProgressorService);
        assert_eq!(
            "7e4e1701-1ea6-40c9-9dcc-13d34ffead57",
            service.uuid().to_string()
        );

        let control = endpoint_metadata(EndpointId::ControlPoint);
        assert_eq!(
            "7e4e1703-1ea6-40c9-9dcc-13d34ffead57",
            control.uuid().to_string()
        );
        assert_eq!("Progressor control point", control.name());
    }

    #[test]
    fn required_characteristics_exclude_service() {
        let required: Vec<EndpointId> = required_characteristics().collect();
        assert_eq!(
            vec![EndpointId::ControlPoint, EndpointId::DataPoint],
            required
        );
    }

    #[test]
    fn endpoint_for_uuid_round_trips_known_endpoints() {
        for endpoint in EndpointId::iter() {
            let uuid = endpoint_metadata(endpoint).uuid();
            assert_eq!(Some(endpoint), endpoint_for_uuid(uuid));
        }
        assert_eq!(None, endpoint_for_uuid(Uuid::nil()));
    }

    #[rstest]
    #[case(Opcode::Tare, 0x64)]
    #[case(Opcode::StartMeasurement, 0x65)]
    #[case(Opcode::StopMeasurement, 0x66)]
    #[case(Opcode::Shutdown, 0x6E)]
    #[case(Opcode::SampleBatteryVoltage, 0x6F)]
    fn opcode_bytes_match_wire_table(#[case] opcode: Opcode, #[case] expected: u8) {
        assert_eq!(expected, opcode.byte());
    }
}
