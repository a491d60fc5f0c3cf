//! Hand-written request/response shapes for the G2 HTTP endpoints
//! (§4.D.1). Plain `serde`-derived structs stand in for the vendor's
//! generated DTOs; `g2::client` reaches these only through field access.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::snapshot::{Priority, RelayState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub serial_number: String,
    pub firmware_version: String,
    pub door_state: Option<String>,
}

/// One physical panel branch's instantaneous telemetry, used both for the
/// main-feed fields and as the source of unmapped-tab synthesis (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    pub position: usize,
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub relay_state: RelayState,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelStateResponse {
    pub total_tabs: usize,
    pub main_power_w: f64,
    pub grid_power_w: Option<f64>,
    pub dsm_state: Option<String>,
    pub main_relay_state: Option<RelayState>,
    pub branches: Vec<BranchRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub name: String,
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub relay_state: RelayState,
    pub priority: Priority,
    pub energy_consumed_wh: f64,
    pub energy_produced_wh: f64,
    pub tabs: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitsResponse {
    pub circuits: HashMap<String, CircuitRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSoeResponse {
    pub soe: f64,
    pub max_energy_kwh: f64,
}

/// Simulation-mode bundle: panel and circuits generated together and cached
/// under one `full_sim_data` key (§4.D caching table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullSimData {
    pub panel: PanelStateResponse,
    pub circuits: CircuitsResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticateRequest<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateResponse {
    pub access_token: String,
    pub token_type: String,
    pub iat_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetRelayRequest {
    pub relay_state: RelayState,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetPriorityRequest {
    pub priority: Priority,
}
