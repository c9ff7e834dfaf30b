use serde::Serialize;
use tracing::{instrument, trace};

use crate::protocol::Opcode;

const RESPONSE_BATTERY: u8 = 0x00;
const RESPONSE_SAMPLES: u8 = 0x01;
const RESPONSE_LOW_POWER: u8 = 0x02;

const SAMPLE_RECORD_LEN: usize = 8;
const SAMPLES_HEADER_LEN: usize = 2;
const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// One decoded force reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Load in kilograms, always non-negative.
    pub weight: f32,
    /// Seconds elapsed on the sensor clock.
    pub time: f64,
}

impl Sample {
    /// Builds a sample from raw wire values.
    #[must_use]
    pub fn from_raw(raw_weight: f32, elapsed_micros: i32) -> Self {
        Self {
            weight: raw_weight.abs(),
            time: f64::from(elapsed_micros) / MICROS_PER_SECOND,
        }
    }
}

/// Result of decoding one data-point notification.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    /// Response to a battery sample request. The payload is not interpreted.
    BatteryAck,
    /// Weight/time batch in packet order.
    Samples(Vec<Sample>),
    /// The sensor is about to power down.
    LowPowerWarning,
    /// Unrecognised response type.
    Unknown(u8),
    /// Empty or truncated payload.
    NoData,
}

impl DecodedEvent {
    /// Stable snake_case label used in logs and terminal output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::BatteryAck => "battery_ack",
            Self::Samples(_) => "samples",
            Self::LowPowerWarning => "low_power_warning",
            Self::Unknown(_) => "unknown",
            Self::NoData => "no_data",
        }
    }
}

/// Encodes commands and decodes notifications for the Progressor wire format.
pub struct TelemetryCodec;

impl TelemetryCodec {
    /// Encodes a command as its single opcode byte.
    ///
    /// ```
    /// use progressor::{Opcode, TelemetryCodec};
    ///
    /// assert_eq!([0x64], TelemetryCodec::encode_command(Opcode::Tare));
    /// ```
    #[must_use]
    pub fn encode_command(opcode: Opcode) -> [u8; 1] {
        [opcode.byte()]
    }

    /// Decodes one notification payload.
    ///
    /// Never fails: empty or truncated payloads decode to [`DecodedEvent::NoData`].
    /// A sample batch whose length byte is not a multiple of eight, or which
    /// claims more bytes than were received, yields only the whole records present.
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    pub fn decode_notification(payload: &[u8]) -> DecodedEvent {
        let Some((&response_type, body)) = payload.split_first() else {
            return DecodedEvent::NoData;
        };

        match response_type {
            RESPONSE_BATTERY => DecodedEvent::BatteryAck,
            RESPONSE_SAMPLES => decode_samples(body),
            RESPONSE_LOW_POWER => DecodedEvent::LowPowerWarning,
            other => DecodedEvent::Unknown(other),
        }
    }
}

fn decode_samples(body: &[u8]) -> DecodedEvent {
    let Some((&declared_len, data)) = body.split_first() else {
        return DecodedEvent::NoData;
    };

    let usable_len = usize::from(declared_len).min(data.len());
    if usable_len < usize::from(declared_len) {
        trace!(
            declared_len,
            received = data.len(),
            "sample batch shorter than its length byte"
        );
    }

    let samples = data[..usable_len]
        .chunks_exact(SAMPLE_RECORD_LEN)
        .map(|record| {
            let (weight, time) = record.split_at(SAMPLE_RECORD_LEN / 2);
            Sample::from_raw(
                f32::from_le_bytes([weight[0], weight[1], weight[2], weight[3]]),
                i32::from_le_bytes([time[0], time[1], time[2], time[3]]),
            )
        })
        .collect();

    DecodedEvent::Samples(samples)
}

/// Packs samples into a `0x01` batch, used by fixtures and tests.
pub(crate) fn encode_sample_batch(records: &[(f32, i32)]) -> Vec<u8> {
    let data_len = records.len() * SAMPLE_RECORD_LEN;
    let mut payload = Vec::with_capacity(SAMPLES_HEADER_LEN + data_len);
    payload.push(RESPONSE_SAMPLES);
    payload.push(u8::try_from(data_len).unwrap_or(u8::MAX));
    for (weight, micros) in records {
        payload.extend_from_slice(&weight.to_le_bytes());
        payload.extend_from_slice(&micros.to_le_bytes());
    }
    payload
}
