//! Transport-agnostic snapshot records and the capability bit-set (§3, §4.G).

use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Optional features a transport may advertise.
    ///
    /// G2 advertises every flag except `PUSH_STREAMING`; G3 advertises only
    /// `PUSH_STREAMING` (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PanelCapability: u16 {
        const RELAY_CONTROL    = 1 << 0;
        const PRIORITY_CONTROL = 1 << 1;
        const ENERGY_HISTORY   = 1 << 2;
        const BATTERY          = 1 << 3;
        const SOLAR            = 1 << 4;
        const DSM_STATE        = 1 << 5;
        const HARDWARE_STATUS  = 1 << 6;
        const PUSH_STREAMING   = 1 << 7;
    }
}

impl PanelCapability {
    /// Every flag G2 advertises.
    pub const G2: Self = Self::RELAY_CONTROL
        .union(Self::PRIORITY_CONTROL)
        .union(Self::ENERGY_HISTORY)
        .union(Self::BATTERY)
        .union(Self::SOLAR)
        .union(Self::DSM_STATE)
        .union(Self::HARDWARE_STATUS);

    /// Every flag G3 advertises.
    pub const G3: Self = Self::PUSH_STREAMING;
}

/// Which generation of panel hardware produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    G2,
    G3,
}

/// Relay (breaker contactor) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Open,
    Closed,
}

/// Load-shed priority, G2 only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    MustHave,
    NiceToHave,
    NonEssential,
}

/// Per-circuit projection, shared shape for both transports (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub circuit_id: String,
    pub name: String,
    /// Real power in watts. Negative indicates production.
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub is_on: bool,
    pub is_dual_phase: bool,

    // G3 only.
    pub apparent_power_va: Option<f64>,
    pub reactive_power_var: Option<f64>,
    pub power_factor: Option<f64>,

    // G2 only.
    pub relay_state: Option<RelayState>,
    pub priority: Option<Priority>,
    pub energy_consumed_wh: Option<f64>,
    pub energy_produced_wh: Option<f64>,
    pub tabs: Option<Vec<usize>>,
}

/// Voltage above which a circuit is considered energized (§3: "is_on" is
/// derived from voltage above an implementation-chosen off threshold).
pub const ON_VOLTAGE_THRESHOLD_V: f64 = 1.0;

impl CircuitSnapshot {
    pub fn is_energized(voltage_v: f64) -> bool {
        voltage_v.abs() > ON_VOLTAGE_THRESHOLD_V
    }
}

/// Caller-visible, transport-agnostic panel state (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelSnapshot {
    pub generation: Generation,
    pub serial_number: String,
    pub firmware_version: String,
    pub main_power_w: f64,

    // G3 only.
    pub main_voltage_v: Option<f64>,
    pub main_current_a: Option<f64>,
    pub main_frequency_hz: Option<f64>,

    // G2 only.
    pub grid_power_w: Option<f64>,
    pub battery_soe: Option<f64>,
    pub battery_max_energy_kwh: Option<f64>,
    pub dsm_state: Option<String>,
    pub main_relay_state: Option<RelayState>,
    pub door_state: Option<String>,

    pub circuits: HashMap<String, CircuitSnapshot>,
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
