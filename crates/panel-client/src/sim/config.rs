//! Declarative YAML schema for the simulation engine (§6, §4.F).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::snapshot::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitMode {
    Consumer,
    Producer,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayBehavior {
    Controllable,
    NonControllable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSplit {
    Equal,
    PrimarySecondary,
    CustomRatio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CyclingConfig {
    pub on_minutes: u32,
    pub off_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeOfDayConfig {
    #[serde(default)]
    pub peak_hours: Vec<u8>,
    #[serde(default = "default_multiplier")]
    pub peak_multiplier: f64,
    #[serde(default = "default_multiplier")]
    pub off_peak_multiplier: f64,
    /// One multiplier per hour of day, `[0]` = midnight. Takes precedence
    /// over `peak_hours` when present.
    pub hourly_multipliers: Option<[f64; 24]>,
}

fn default_multiplier() -> f64 {
    1.0
}

impl TimeOfDayConfig {
    pub fn multiplier_at(&self, hour: u32) -> f64 {
        if let Some(hourly) = &self.hourly_multipliers {
            return hourly[(hour % 24) as usize];
        }
        if self.peak_hours.contains(&(hour as u8)) {
            self.peak_multiplier
        } else {
            self.off_peak_multiplier
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmartBehaviorConfig {
    pub grid_response_max_reduction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatteryBehaviorConfig {
    #[serde(default)]
    pub charge_hours: Vec<u8>,
    #[serde(default)]
    pub discharge_hours: Vec<u8>,
    #[serde(default)]
    pub idle_hours: Vec<u8>,
    pub hourly_intensity: Option<[f64; 24]>,
    pub hourly_demand: Option<[f64; 24]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitTemplate {
    pub mode: CircuitMode,
    pub power_range: [f64; 2],
    pub typical_power: f64,
    #[serde(default)]
    pub variation: f64,
    pub efficiency: Option<f64>,
    pub relay_behavior: RelayBehavior,
    pub priority: Priority,
    pub cycling: Option<CyclingConfig>,
    pub time_of_day: Option<TimeOfDayConfig>,
    pub smart_behavior: Option<SmartBehaviorConfig>,
    pub battery_behavior: Option<BatteryBehaviorConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitOverride {
    pub typical_power: Option<f64>,
    pub variation: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitConfig {
    pub id: String,
    pub name: String,
    pub template: String,
    pub tabs: Vec<usize>,
    #[serde(default)]
    pub overrides: CircuitOverride,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TabSynchronization {
    pub id: String,
    pub positions: Vec<usize>,
    pub power_split: PowerSplit,
    #[serde(default)]
    pub energy_sync: bool,
    #[serde(default)]
    pub custom_ratios: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalOverrides {
    #[serde(default = "default_multiplier")]
    pub power_multiplier: f64,
}

impl Default for GlobalOverrides {
    fn default() -> Self {
        Self { power_multiplier: 1.0 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationParams {
    #[serde(default)]
    pub global_overrides: GlobalOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PanelConfigSection {
    pub serial_number: String,
    pub total_tabs: usize,
    pub main_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    pub panel_config: PanelConfigSection,
    pub circuit_templates: HashMap<String, CircuitTemplate>,
    pub circuits: Vec<CircuitConfig>,
    #[serde(default)]
    pub unmapped_tabs: Vec<usize>,
    #[serde(default)]
    pub unmapped_tab_templates: HashMap<String, CircuitTemplate>,
    #[serde(default)]
    pub tab_synchronizations: Vec<TabSynchronization>,
    #[serde(default)]
    pub simulation_params: SimulationParams,
}

impl SimulationConfig {
    pub fn load_from_str(yaml: &str) -> Result<Self, ErrorKind> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self, ErrorKind> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ErrorKind::ConfigError(format!("reading {}: {e}", path.display())))?;
        Self::load_from_str(&content)
    }

    /// Rejects undefined template references, out-of-range enum values (the
    /// type system already does this for enums, so this is mostly structural
    /// cross-reference checking), energy-sync outside a sync group, and
    /// malformed hour lists (§4.F "Validation").
    fn validate(&self) -> Result<(), ErrorKind> {
        if self.panel_config.total_tabs == 0 {
            return Err(ErrorKind::ConfigError("panel_config.total_tabs must be positive".into()));
        }

        for circuit in &self.circuits {
            if !self.circuit_templates.contains_key(&circuit.template) {
                return Err(ErrorKind::ConfigError(format!(
                    "circuit {} references undefined template {}",
                    circuit.id, circuit.template
                )));
            }
            for &tab in &circuit.tabs {
                if tab == 0 || tab > self.panel_config.total_tabs {
                    return Err(ErrorKind::ConfigError(format!(
                        "circuit {} references out-of-range tab {tab}",
                        circuit.id
                    )));
                }
            }
        }

        for position in &self.unmapped_tabs {
            if !self.unmapped_tab_templates.contains_key(&position.to_string()) {
                return Err(ErrorKind::ConfigError(format!(
                    "unmapped tab {position} has no matching unmapped_tab_templates entry"
                )));
            }
        }

        let mapped_positions: std::collections::HashSet<usize> = self
            .circuits
            .iter()
            .flat_map(|c| c.tabs.iter().copied())
            .chain(self.unmapped_tabs.iter().copied())
            .collect();

        for sync in &self.tab_synchronizations {
            if sync.power_split == PowerSplit::CustomRatio
                && sync.custom_ratios.len() != sync.positions.len()
            {
                return Err(ErrorKind::ConfigError(format!(
                    "tab_synchronization {} has custom_ratio split but ratio count does not match position count",
                    sync.id
                )));
            }
            if sync.energy_sync {
                if sync.positions.is_empty() {
                    return Err(ErrorKind::ConfigError(format!(
                        "tab_synchronization {} requests energy_sync with no positions",
                        sync.id
                    )));
                }
                for &position in &sync.positions {
                    if !mapped_positions.contains(&position) {
                        return Err(ErrorKind::ConfigError(format!(
                            "tab_synchronization {} requests energy_sync for tab {position}, which is outside any circuit or unmapped_tabs mapping",
                            sync.id
                        )));
                    }
                }
            }
        }

        for (name, template) in &self.circuit_templates {
            if template.power_range[0] > template.power_range[1] {
                return Err(ErrorKind::ConfigError(format!(
                    "template {name} has an inverted power_range"
                )));
            }
            if !(0.0..=1.0).contains(&template.variation) {
                return Err(ErrorKind::ConfigError(format!(
                    "template {name} variation must be within [0, 1]"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
