use super::*;

fn minimal_yaml() -> &'static str {
    r#"
panel_config:
  serial_number: SIM-001
  total_tabs: 2
  main_size: 200.0
circuit_templates:
  solar:
    mode: producer
    power_range: [-4000.0, 0.0]
    typical_power: -2500.0
    variation: 0.0
    relay_behavior: non_controllable
    priority: nice_to_have
    time_of_day:
      hourly_multipliers: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
circuits:
  - id: "1"
    name: Solar
    template: solar
    tabs: [1]
"#
}

#[test]
fn loads_a_minimal_valid_config() {
    let config = SimulationConfig::load_from_str(minimal_yaml()).unwrap();
    assert_eq!(config.panel_config.total_tabs, 2);
    assert_eq!(config.circuits.len(), 1);
}

#[test]
fn time_of_day_hourly_multipliers_take_precedence_over_peak_hours() {
    let tod = TimeOfDayConfig {
        peak_hours: vec![12],
        peak_multiplier: 2.0,
        off_peak_multiplier: 0.5,
        hourly_multipliers: Some([0.0; 24]),
    };
    assert_eq!(tod.multiplier_at(12), 0.0);
}

#[test]
fn peak_hours_profile_applies_without_an_hourly_array() {
    let tod = TimeOfDayConfig {
        peak_hours: vec![12],
        peak_multiplier: 2.0,
        off_peak_multiplier: 0.5,
        hourly_multipliers: None,
    };
    assert_eq!(tod.multiplier_at(12), 2.0);
    assert_eq!(tod.multiplier_at(20), 0.5);
}

#[test]
fn rejects_circuit_referencing_undefined_template() {
    let yaml = minimal_yaml().replace("template: solar", "template: missing");
    assert!(matches!(SimulationConfig::load_from_str(&yaml), Err(ErrorKind::ConfigError(_))));
}

#[test]
fn rejects_circuit_tab_outside_panel_range() {
    let yaml = minimal_yaml().replace("tabs: [1]", "tabs: [99]");
    assert!(matches!(SimulationConfig::load_from_str(&yaml), Err(ErrorKind::ConfigError(_))));
}

#[test]
fn rejects_custom_ratio_sync_with_mismatched_ratio_count() {
    let mut yaml = minimal_yaml().to_string();
    yaml.push_str(
        r#"
tab_synchronizations:
  - id: grp
    positions: [1, 2]
    power_split: custom_ratio
    custom_ratios: [0.5]
"#,
    );
    assert!(matches!(SimulationConfig::load_from_str(&yaml), Err(ErrorKind::ConfigError(_))));
}

#[test]
fn rejects_config_missing_required_sections() {
    assert!(matches!(SimulationConfig::load_from_str("{}"), Err(ErrorKind::ConfigError(_))));
}

#[test]
fn rejects_energy_sync_for_a_tab_outside_any_circuit_mapping() {
    let mut yaml = minimal_yaml().to_string();
    yaml.push_str(
        r#"
tab_synchronizations:
  - id: grp
    positions: [1, 2]
    power_split: equal
    energy_sync: true
"#,
    );
    // tab 1 belongs to circuit "1", but tab 2 is claimed by neither a circuit
    // nor unmapped_tabs.
    assert!(matches!(SimulationConfig::load_from_str(&yaml), Err(ErrorKind::ConfigError(_))));
}

#[test]
fn accepts_energy_sync_when_every_position_is_mapped() {
    let mut yaml = minimal_yaml().to_string();
    yaml.push_str(
        r#"
unmapped_tabs: [2]
unmapped_tab_templates:
  "2":
    mode: consumer
    power_range: [0.0, 0.0]
    typical_power: 0.0
    variation: 0.0
    relay_behavior: non_controllable
    priority: non_essential
tab_synchronizations:
  - id: grp
    positions: [1, 2]
    power_split: equal
    energy_sync: true
"#,
    );
    assert!(SimulationConfig::load_from_str(&yaml).is_ok());
}
