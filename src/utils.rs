const PLACEHOLDER: &str = "-";

/// Renders a notification payload as spaced uppercase byte pairs for trace logs.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }
    bytes
        .iter()
        .map(|byte| hex::encode_upper([*byte]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// RSSI in dBm, or a dash when the advertisement carried none.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    rssi.map_or_else(|| PLACEHOLDER.to_string(), |value| value.to_string())
}

/// Load in kilograms with gram resolution.
pub(crate) fn format_kilograms(weight: f32) -> String {
    format!("{weight:.3} kg")
}

/// Peak load, or a dash when no sample arrived.
pub(crate) fn format_peak(peak: Option<f32>) -> String {
    peak.map_or_else(|| PLACEHOLDER.to_string(), format_kilograms)
}
