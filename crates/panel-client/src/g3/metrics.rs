//! Decoding of the `MetricPayload` shape shared by the main feed and
//! per-circuit notifications (§4.E.1).

use super::codec::scan_fields;
use crate::error::ErrorKind;

/// Latest streamed values for one circuit or the main feed.
#[derive(Debug, Clone, Default)]
pub struct CircuitMetrics {
    pub voltage_v: f64,
    pub current_a: f64,
    pub power_w: f64,
    pub apparent_power_va: Option<f64>,
    pub reactive_power_var: Option<f64>,
    pub power_factor: Option<f64>,
    pub frequency_hz: Option<f64>,
}

/// Decodes a per-circuit `MetricPayload`. Field 7 (`frequency_hz`) is main
/// feed only; if present here it is still captured (forward-compatible),
/// but no circuit-level snapshot field surfaces it.
pub fn decode_circuit_metrics(payload: &[u8]) -> Result<CircuitMetrics, ErrorKind> {
    decode_metric_payload(payload)
}

/// Decodes the main-feed `MetricPayload` (field 14 of a notification).
pub fn decode_main_feed(payload: &[u8]) -> Result<CircuitMetrics, ErrorKind> {
    decode_metric_payload(payload)
}

fn decode_metric_payload(payload: &[u8]) -> Result<CircuitMetrics, ErrorKind> {
    let mut metrics = CircuitMetrics::default();
    for (field_number, value) in scan_fields(payload)? {
        match field_number {
            1 => metrics.voltage_v = value.as_f64()?,
            2 => metrics.current_a = value.as_f64()?,
            3 => metrics.power_w = value.as_f64()?,
            4 => metrics.apparent_power_va = Some(value.as_f64()?),
            5 => metrics.reactive_power_var = Some(value.as_f64()?),
            6 => metrics.power_factor = Some(value.as_f64()?),
            7 => metrics.frequency_hz = Some(value.as_f64()?),
            _ => {} // forward-compatible: unrecognized metric fields are ignored
        }
    }
    Ok(metrics)
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
