use super::{CircuitSnapshot, PanelCapability};

#[test]
fn g2_advertises_every_flag_except_push_streaming() {
    assert!(PanelCapability::G2.contains(PanelCapability::RELAY_CONTROL));
    assert!(PanelCapability::G2.contains(PanelCapability::PRIORITY_CONTROL));
    assert!(PanelCapability::G2.contains(PanelCapability::ENERGY_HISTORY));
    assert!(PanelCapability::G2.contains(PanelCapability::BATTERY));
    assert!(PanelCapability::G2.contains(PanelCapability::SOLAR));
    assert!(PanelCapability::G2.contains(PanelCapability::DSM_STATE));
    assert!(PanelCapability::G2.contains(PanelCapability::HARDWARE_STATUS));
    assert!(!PanelCapability::G2.contains(PanelCapability::PUSH_STREAMING));
}

#[test]
fn g3_advertises_only_push_streaming() {
    assert_eq!(PanelCapability::G3, PanelCapability::PUSH_STREAMING);
}

#[yare::parameterized(
    clearly_on = { 120.0, true },
    clearly_off = { 0.0, false },
    negative_still_on = { -120.0, true },
    at_threshold_is_off = { 1.0, false },
)]
fn on_off_threshold(voltage: f64, expected: bool) {
    assert_eq!(CircuitSnapshot::is_energized(voltage), expected);
}
