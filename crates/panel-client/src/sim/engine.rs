//! Power-generation engine driven by a declarative configuration (§4.F).
//!
//! Produces data shaped exactly like the G2 wire model so `g2::client` can
//! treat a simulated panel identically to a live one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::config::{CircuitConfig, CircuitOverride, CircuitTemplate, SimulationConfig};
use crate::error::ErrorKind;
use crate::g2::wire::{
    BranchRecord, CircuitRecord, CircuitsResponse, FullSimData, PanelStateResponse,
    StatusResponse, StorageSoeResponse,
};
use crate::snapshot::{Priority, RelayState};

#[derive(Debug, Clone, Copy, Default)]
struct EnergyAccumulator {
    consumed_wh: f64,
    produced_wh: f64,
}

#[derive(Debug)]
pub struct SimulationEngine {
    config: SimulationConfig,
    sim_start: DateTime<Utc>,
    origin: Instant,
    process_seed: u64,
    rngs: RefCell<HashMap<String, StdRng>>,
    overrides: RefCell<HashMap<String, CircuitOverride>>,
    energy: RefCell<HashMap<String, EnergyAccumulator>>,
    last_tick: RefCell<Instant>,
}

fn derive_process_seed() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

fn seed_for(circuit_id: &str, process_seed: u64) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    circuit_id.hash(&mut hasher);
    hasher.finish() ^ process_seed
}

impl SimulationEngine {
    pub fn load_from_path(
        path: &Path,
        simulation_start_time: Option<DateTime<Utc>>,
    ) -> Result<Self, ErrorKind> {
        let config = SimulationConfig::load_from_path(path)?;
        Ok(Self::new(config, simulation_start_time, None))
    }

    /// `process_seed` is pinned by tests for reproducibility; `None` derives
    /// one from the construction instant (§4.F.1).
    pub fn new(
        config: SimulationConfig,
        simulation_start_time: Option<DateTime<Utc>>,
        process_seed: Option<u64>,
    ) -> Self {
        let now = Instant::now();
        Self {
            sim_start: simulation_start_time.unwrap_or_else(Utc::now),
            origin: now,
            process_seed: process_seed.unwrap_or_else(derive_process_seed),
            config,
            rngs: RefCell::new(HashMap::new()),
            overrides: RefCell::new(HashMap::new()),
            energy: RefCell::new(HashMap::new()),
            last_tick: RefCell::new(now),
        }
    }

    fn simulated_now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_default();
        self.sim_start + elapsed
    }

    fn draw_variation(&self, seed_key: &str, variation: f64) -> f64 {
        if variation <= 0.0 {
            return 0.0;
        }
        let mut rngs = self.rngs.borrow_mut();
        let rng = rngs
            .entry(seed_key.to_string())
            .or_insert_with(|| StdRng::seed_from_u64(seed_for(seed_key, self.process_seed)));
        rng.random_range(-variation..=variation)
    }

    fn elapsed_minutes(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() / 60.0
    }

    fn global_multiplier(&self) -> f64 {
        self.config.simulation_params.global_overrides.power_multiplier
    }

    /// Steps 1-4 of §4.F's power-generation algorithm for one template
    /// instance (a configured circuit or an unmapped-tab template).
    fn compute_power(&self, template: &CircuitTemplate, overrides: Option<&CircuitOverride>, seed_key: &str) -> f64 {
        let typical = overrides
            .and_then(|o| o.typical_power)
            .unwrap_or(template.typical_power);
        let variation =
            overrides.and_then(|o| o.variation).unwrap_or(template.variation);

        let hour = self.simulated_now().hour();
        let time_multiplier =
            template.time_of_day.as_ref().map(|tod| tod.multiplier_at(hour)).unwrap_or(1.0);
        let base = typical * time_multiplier * self.global_multiplier();

        if let Some(cycling) = &template.cycling {
            let period = (cycling.on_minutes + cycling.off_minutes) as f64;
            if period > 0.0 {
                let phase = self.elapsed_minutes() % period;
                if phase >= cycling.on_minutes as f64 {
                    return 0.0;
                }
            }
        }

        let noisy = base * (1.0 + self.draw_variation(seed_key, variation));
        noisy.clamp(template.power_range[0], template.power_range[1])
    }

    fn accumulate_energy(&self, key: &str, power_w: f64, dt_hours: f64) -> (f64, f64) {
        let mut energy = self.energy.borrow_mut();
        let entry = energy.entry(key.to_string()).or_default();
        entry.consumed_wh += power_w.max(0.0) * dt_hours;
        entry.produced_wh += (-power_w).max(0.0) * dt_hours;
        (entry.consumed_wh, entry.produced_wh)
    }

    fn template_for(&self, name: &str) -> Result<&CircuitTemplate, ErrorKind> {
        self.config
            .circuit_templates
            .get(name)
            .ok_or_else(|| ErrorKind::ConfigError(format!("undefined template {name}")))
    }

    fn relay_state_for(&self, template: &CircuitTemplate) -> RelayState {
        match template.relay_behavior {
            super::config::RelayBehavior::Controllable | super::config::RelayBehavior::NonControllable => {
                RelayState::Closed
            }
        }
    }

    /// One tick: regenerates every branch's instantaneous telemetry and
    /// rolls forward each branch's accumulated energy (§4.F steps 1-6).
    pub fn generate(&self) -> Result<FullSimData, ErrorKind> {
        let now = Instant::now();
        let dt_hours = now.duration_since(*self.last_tick.borrow()).as_secs_f64() / 3_600.0;
        *self.last_tick.borrow_mut() = now;

        let mut branch_power: HashMap<usize, f64> = HashMap::new();
        let mut circuits = HashMap::new();

        for circuit in &self.config.circuits {
            let template = self.template_for(&circuit.template)?;
            let overrides = self.overrides.borrow().get(&circuit.id).cloned();
            let total_power = self.compute_power(template, overrides.as_ref(), &format!("circuit:{}", circuit.id));

            let per_tab = split_power(total_power, circuit, &self.config.tab_synchronizations);
            for (position, power) in &per_tab {
                branch_power.insert(*position, *power);
            }

            let (consumed, produced) =
                self.accumulate_energy(&circuit.id, total_power, dt_hours);

            circuits.insert(
                circuit.id.clone(),
                CircuitRecord {
                    name: circuit.name.clone(),
                    power_w: total_power,
                    voltage_v: 120.0,
                    current_a: total_power / 120.0,
                    relay_state: self.relay_state_for(template),
                    priority: template.priority,
                    energy_consumed_wh: consumed,
                    energy_produced_wh: produced,
                    tabs: circuit.tabs.clone(),
                },
            );
        }

        for &position in &self.config.unmapped_tabs {
            let key = position.to_string();
            let Some(template) = self.config.unmapped_tab_templates.get(&key) else { continue };
            let power = self.compute_power(template, None, &format!("unmapped:{position}"));
            branch_power.insert(position, power);
            self.accumulate_energy(&format!("unmapped:{position}"), power, dt_hours);
        }

        let mut branches = Vec::with_capacity(self.config.panel_config.total_tabs);
        for position in 1..=self.config.panel_config.total_tabs {
            let power = branch_power.get(&position).copied().unwrap_or(0.0);
            branches.push(BranchRecord {
                position,
                power_w: power,
                voltage_v: if power == 0.0 && !branch_power.contains_key(&position) { 0.0 } else { 120.0 },
                current_a: power / 120.0,
                relay_state: RelayState::Closed,
                priority: Priority::NonEssential,
            });
        }

        let main_power_w = branches.iter().map(|b| b.power_w).sum();
        debug!(circuits = circuits.len(), main_power_w, "simulation tick generated");

        Ok(FullSimData {
            panel: PanelStateResponse {
                total_tabs: self.config.panel_config.total_tabs,
                main_power_w,
                grid_power_w: None,
                dsm_state: None,
                main_relay_state: Some(RelayState::Closed),
                branches,
            },
            circuits: CircuitsResponse { circuits },
        })
    }

    pub fn status(&self) -> Result<StatusResponse, ErrorKind> {
        Ok(StatusResponse {
            serial_number: self.config.panel_config.serial_number.clone(),
            firmware_version: "simulated-1.0".to_string(),
            door_state: Some("closed".to_string()),
        })
    }

    pub fn storage_soe(&self) -> Result<StorageSoeResponse, ErrorKind> {
        Ok(StorageSoeResponse { soe: 0.5, max_energy_kwh: 13.5 })
    }

    pub fn set_circuit_overrides(&self, overrides: HashMap<String, CircuitOverride>) {
        self.overrides.borrow_mut().extend(overrides);
    }

    pub fn clear_circuit_overrides(&self) {
        self.overrides.borrow_mut().clear();
    }
}

/// Splits a circuit's total generated power across its panel positions
/// (§4.F step 5). Falls back to an equal split unless a tab synchronization
/// names exactly this circuit's position set with a different scheme.
fn split_power(
    total_power: f64,
    circuit: &CircuitConfig,
    syncs: &[super::config::TabSynchronization],
) -> Vec<(usize, f64)> {
    if circuit.tabs.len() <= 1 {
        return circuit.tabs.iter().map(|&p| (p, total_power)).collect();
    }

    let matching = syncs.iter().find(|s| {
        let mut a = s.positions.clone();
        let mut b = circuit.tabs.clone();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    });

    match matching {
        Some(sync) if sync.power_split == super::config::PowerSplit::PrimarySecondary => circuit
            .tabs
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, if i == 0 { total_power } else { 0.0 }))
            .collect(),
        Some(sync) if sync.power_split == super::config::PowerSplit::CustomRatio => circuit
            .tabs
            .iter()
            .zip(&sync.custom_ratios)
            .map(|(&p, &ratio)| (p, total_power * ratio))
            .collect(),
        _ => {
            let n = circuit.tabs.len() as f64;
            circuit.tabs.iter().map(|&p| (p, total_power / n)).collect()
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
