//! G2 transport: typed HTTP client with token management, response caching,
//! unmapped-circuit synthesis, and retry-mediated I/O (§4.D).

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock as StdRwLock;
use reqwest::StatusCode;
use tracing::{debug, instrument};

use super::wire::{
    AuthenticateRequest, AuthenticateResponse, BranchRecord, CircuitRecord, CircuitsResponse,
    FullSimData, PanelStateResponse, SetPriorityRequest, SetRelayRequest, StatusResponse,
    StorageSoeResponse,
};
use crate::cache::TimeWindowCache;
use crate::error::ErrorKind;
use crate::retry::{retry, retry_with_reauth, RetryPolicy};
use crate::sim::SimulationEngine;
use crate::snapshot::{Generation, PanelCapability, PanelSnapshot, Priority, RelayState};

/// Recognized options for a G2 client (§6).
#[derive(Debug, Clone)]
pub struct G2Config {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub use_ssl: bool,
    pub cache_window: Duration,
    pub retry: RetryPolicy,
    pub simulation_mode: bool,
    pub simulation_config_path: Option<std::path::PathBuf>,
    pub simulation_start_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl G2Config {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), ..Self::default_without_host() }
    }

    fn default_without_host() -> Self {
        Self {
            host: String::new(),
            port: 80,
            timeout: Duration::from_secs(30),
            use_ssl: false,
            cache_window: Duration::from_millis(1_000),
            retry: RetryPolicy::new(0, Duration::from_millis(500), 2.0),
            simulation_mode: false,
            simulation_config_path: None,
            simulation_start_time: None,
        }
    }
}

impl Default for G2Config {
    fn default() -> Self {
        Self::default_without_host()
    }
}

fn base_url(config: &G2Config) -> String {
    let scheme = if config.use_ssl { "https" } else { "http" };
    format!("{scheme}://{}:{}", config.host, config.port)
}

/// Classifies an HTTP status against one endpoint's declared response set
/// (§4.D.1, §7). A status outside `declared` is `UnexpectedStatus`.
fn classify_status(status: StatusCode, declared: &[u16], body: String) -> ErrorKind {
    let code = status.as_u16();
    if !declared.contains(&code) {
        return ErrorKind::UnexpectedStatus { status: code, body };
    }
    match code {
        401 | 403 => ErrorKind::AuthError(body),
        500 => ErrorKind::ServerError { status: code, body },
        502 | 503 | 504 => ErrorKind::RetriableHttp { status: code, body },
        _ => ErrorKind::UnexpectedStatus { status: code, body },
    }
}

#[derive(Debug)]
pub struct G2Client {
    config: G2Config,
    http: reqwest::Client,
    token: StdRwLock<Option<String>>,
    cache: TimeWindowCache<serde_json::Value>,
    simulation: Option<SimulationEngine>,
}

impl G2Client {
    pub fn new(config: G2Config) -> Result<Self, ErrorKind> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ErrorKind::from)?;

        let simulation = if config.simulation_mode {
            let path = config
                .simulation_config_path
                .clone()
                .ok_or_else(|| ErrorKind::ConfigError("simulation_mode requires simulation_config_path".into()))?;
            Some(SimulationEngine::load_from_path(&path, config.simulation_start_time)?)
        } else {
            None
        };

        Ok(Self {
            cache: TimeWindowCache::new(config.cache_window),
            token: StdRwLock::new(None),
            http,
            config,
            simulation,
        })
    }

    pub const CAPABILITIES: PanelCapability = PanelCapability::G2;

    /// Registers a new device and stores the returned bearer token.
    #[instrument(skip(self, description), fields(host = %self.config.host))]
    pub async fn authenticate(&self, name: &str, description: &str) -> Result<String, ErrorKind> {
        let url = format!("{}/api/v1/auth/register", base_url(&self.config));
        let body = AuthenticateRequest { name, description };

        let response = retry(&self.config.retry, |_attempt| async {
            let resp = self.http.post(&url).json(&body).send().await?;
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status.is_success() {
                serde_json::from_str::<AuthenticateResponse>(&text)
                    .map_err(|e| ErrorKind::ValidationError(e.to_string()))
            } else {
                Err(classify_status(status, &[200, 400, 500, 502, 503, 504], text))
            }
        })
        .await?;

        *self.token.write() = Some(response.access_token.clone());
        Ok(response.access_token)
    }

    /// Installs an externally-supplied token, superseding any prior one.
    /// Never persisted beyond process memory.
    pub fn set_access_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    fn bearer(&self) -> Result<String, ErrorKind> {
        self.token.read().clone().ok_or_else(|| ErrorKind::AuthError("no access token set".into()))
    }

    async fn reauth(&self) -> Result<(), ErrorKind> {
        self.authenticate("panel-client", "forced re-authentication after 401/403").await?;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned + serde::Serialize>(
        &self,
        path: &str,
        declared: &[u16],
    ) -> Result<T, ErrorKind> {
        let url = format!("{}{path}", base_url(&self.config));
        let declared = declared.to_vec();
        retry_with_reauth(
            &self.config.retry,
            |_attempt| {
                let url = url.clone();
                let declared = declared.clone();
                async move {
                    let token = self.bearer()?;
                    let resp = self.http.get(&url).bearer_auth(token).send().await?;
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        serde_json::from_str::<T>(&text)
                            .map_err(|e| ErrorKind::ValidationError(e.to_string()))
                    } else {
                        Err(classify_status(status, &declared, text))
                    }
                }
            },
            || self.reauth(),
        )
        .await
    }

    async fn post_json<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
        declared: &[u16],
    ) -> Result<(), ErrorKind> {
        let url = format!("{}{path}", base_url(&self.config));
        let declared = declared.to_vec();
        retry_with_reauth(
            &self.config.retry,
            |_attempt| {
                let url = url.clone();
                let declared = declared.clone();
                async move {
                    let token = self.bearer()?;
                    let resp = self.http.post(&url).bearer_auth(token).json(body).send().await?;
                    let status = resp.status();
                    if status.is_success() {
                        Ok(())
                    } else {
                        let text = resp.text().await.unwrap_or_default();
                        Err(classify_status(status, &declared, text))
                    }
                }
            },
            || self.reauth(),
        )
        .await
    }

    async fn cached_or_fetch<T, F, Fut>(&self, key: &str, fetch: F) -> Result<T, ErrorKind>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ErrorKind>>,
    {
        if let Some(cached) = self.cache.get(key) {
            debug!(key, "cache hit");
            return serde_json::from_value(cached).map_err(|e| ErrorKind::ValidationError(e.to_string()));
        }
        let value = fetch().await?;
        let json = serde_json::to_value(&value).map_err(|e| ErrorKind::ValidationError(e.to_string()))?;
        self.cache.put(key.to_string(), json);
        Ok(value)
    }

    async fn get_status(&self) -> Result<StatusResponse, ErrorKind> {
        if let Some(sim) = &self.simulation {
            return self
                .cached_or_fetch("status_sim", || async { sim.status() })
                .await;
        }
        self.cached_or_fetch("status", || {
            self.get_json::<StatusResponse>("/api/v1/status", &[200, 401, 403, 500, 502, 503, 504])
        })
        .await
    }

    async fn get_full_sim_data(&self, sim: &SimulationEngine) -> Result<FullSimData, ErrorKind> {
        self.cached_or_fetch("full_sim_data", || async { sim.generate() }).await
    }

    async fn get_panel_state(&self) -> Result<PanelStateResponse, ErrorKind> {
        if let Some(sim) = &self.simulation {
            return self.get_full_sim_data(sim).await.map(|d| d.panel);
        }
        self.cached_or_fetch("panel_state", || {
            self.get_json::<PanelStateResponse>("/api/v1/panel", &[200, 401, 403, 500, 502, 503, 504])
        })
        .await
    }

    async fn get_circuits_raw(&self) -> Result<CircuitsResponse, ErrorKind> {
        if let Some(sim) = &self.simulation {
            return self.get_full_sim_data(sim).await.map(|d| d.circuits);
        }
        self.cached_or_fetch("circuits", || {
            self.get_json::<CircuitsResponse>("/api/v1/circuits", &[200, 401, 403, 500, 502, 503, 504])
        })
        .await
    }

    async fn get_storage_soe(&self) -> Result<StorageSoeResponse, ErrorKind> {
        if let Some(sim) = &self.simulation {
            return self
                .cached_or_fetch("storage_soe_sim", || async { sim.storage_soe() })
                .await;
        }
        self.cached_or_fetch("storage_soe", || {
            self.get_json::<StorageSoeResponse>("/api/v1/storage/soe", &[200, 401, 403, 500, 502, 503, 504])
        })
        .await
    }

    /// Panel state's instantaneous status. Cached per `cache_window`.
    pub async fn status(&self) -> Result<StatusResponse, ErrorKind> {
        self.get_status().await
    }

    pub async fn panel_state(&self) -> Result<PanelStateResponse, ErrorKind> {
        self.get_panel_state().await
    }

    pub async fn storage_soe(&self) -> Result<StorageSoeResponse, ErrorKind> {
        self.get_storage_soe().await
    }

    /// Circuits augmented with synthesized `unmapped_tab_{p}` entries for
    /// every panel position no configured circuit claims (§4.D). Always
    /// obtains the current panel state (cached per `cache_window` like any
    /// other read) to run the synthesis against.
    pub async fn circuits(&self) -> Result<HashMap<String, CircuitRecord>, ErrorKind> {
        let (raw, panel) = tokio::join!(self.get_circuits_raw(), self.get_panel_state());
        Ok(synthesize_unmapped(&panel?, raw?.circuits))
    }

    /// Closes the circuit relay for `circuit_id`. Clears the entire cache.
    pub async fn set_circuit_relay(&self, circuit_id: &str, state: RelayState) -> Result<(), ErrorKind> {
        let path = format!("/api/v1/circuits/{circuit_id}/relay");
        self.post_json(&path, &SetRelayRequest { relay_state: state }, &[200, 400, 401, 403, 404, 500, 502, 503, 504])
            .await?;
        self.cache.clear();
        Ok(())
    }

    pub async fn set_circuit_priority(&self, circuit_id: &str, priority: Priority) -> Result<(), ErrorKind> {
        let path = format!("/api/v1/circuits/{circuit_id}/priority");
        self.post_json(&path, &SetPriorityRequest { priority }, &[200, 400, 401, 403, 404, 500, 502, 503, 504])
            .await?;
        self.cache.clear();
        Ok(())
    }

    /// Reachability probe used by `crate::factory`; never cached or retried.
    pub async fn ping(&self) -> Result<(), ErrorKind> {
        let url = format!("{}/api/v1/ping", base_url(&self.config));
        let resp = self.http.get(&url).send().await?;
        match resp.status().as_u16() {
            200 => Ok(()),
            other => Err(ErrorKind::UnexpectedStatus { status: other, body: String::new() }),
        }
    }

    /// Issues the four read endpoints concurrently and projects the result
    /// into the unified snapshot (§4.D).
    pub async fn snapshot(&self) -> Result<PanelSnapshot, ErrorKind> {
        let (status, panel, circuits_raw, storage) = tokio::join!(
            self.get_status(),
            self.get_panel_state(),
            self.get_circuits_raw(),
            self.get_storage_soe(),
        );
        let status = status?;
        let panel = panel?;
        let circuits_raw = circuits_raw?;
        let storage = storage?;

        let circuits = synthesize_unmapped(&panel, circuits_raw.circuits);

        Ok(PanelSnapshot {
            generation: Generation::G2,
            serial_number: status.serial_number,
            firmware_version: status.firmware_version,
            main_power_w: panel.main_power_w,
            main_voltage_v: None,
            main_current_a: None,
            main_frequency_hz: None,
            grid_power_w: panel.grid_power_w,
            battery_soe: Some(storage.soe),
            battery_max_energy_kwh: Some(storage.max_energy_kwh),
            dsm_state: panel.dsm_state,
            main_relay_state: panel.main_relay_state,
            door_state: status.door_state,
            circuits: circuits
                .into_iter()
                .map(|(id, c)| {
                    let is_dual_phase =
                        crate::phase::validate_tabs(&c.tabs, panel.total_tabs).unwrap_or(false);
                    (
                        id.clone(),
                        crate::snapshot::CircuitSnapshot {
                            circuit_id: id,
                            name: c.name,
                            power_w: c.power_w,
                            voltage_v: c.voltage_v,
                            current_a: c.current_a,
                            is_on: crate::snapshot::CircuitSnapshot::is_energized(c.voltage_v),
                            is_dual_phase,
                            apparent_power_va: None,
                            reactive_power_var: None,
                            power_factor: None,
                            relay_state: Some(c.relay_state),
                            priority: Some(c.priority),
                            energy_consumed_wh: Some(c.energy_consumed_wh),
                            energy_produced_wh: Some(c.energy_produced_wh),
                            tabs: Some(c.tabs),
                        },
                    )
                })
                .collect(),
        })
    }

    pub async fn close(&self) -> Result<(), ErrorKind> {
        self.cache.clear();
        Ok(())
    }
}

/// Injects a synthetic `unmapped_tab_{p}` entry for every panel position no
/// configured circuit's `tabs` list claims (§4.D steps 1-3).
fn synthesize_unmapped(
    panel: &PanelStateResponse,
    mut circuits: HashMap<String, CircuitRecord>,
) -> HashMap<String, CircuitRecord> {
    let mapped_positions: std::collections::HashSet<usize> =
        circuits.values().flat_map(|c| c.tabs.iter().copied()).collect();

    let branches_by_position: HashMap<usize, &BranchRecord> =
        panel.branches.iter().map(|b| (b.position, b)).collect();

    for position in 1..=panel.total_tabs {
        if mapped_positions.contains(&position) {
            continue;
        }
        let Some(branch) = branches_by_position.get(&position) else { continue };
        circuits.insert(
            format!("unmapped_tab_{position}"),
            CircuitRecord {
                name: format!("Unmapped tab {position}"),
                power_w: branch.power_w,
                voltage_v: branch.voltage_v,
                current_a: branch.current_a,
                relay_state: branch.relay_state,
                priority: branch.priority,
                energy_consumed_wh: 0.0,
                energy_produced_wh: 0.0,
                tabs: vec![position],
            },
        );
    }
    circuits
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
