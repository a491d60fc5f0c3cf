//! Offline validation of which panel positions form a valid circuit (§4.J).
//!
//! Positions ("tabs") alternate electrical leg by 1-based parity: odd
//! positions sit on leg one, even positions on leg two. A circuit spanning
//! two positions (a 240 V load) is valid only if those positions are on
//! opposite legs and within the panel's bounds.

use crate::error::ErrorKind;

/// Which of the panel's two legs a position sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    One,
    Two,
}

/// Leg for a 1-based panel position.
pub fn leg_of(position: usize) -> Leg {
    if position % 2 == 1 {
        Leg::One
    } else {
        Leg::Two
    }
}

/// Validates that `tabs` describes a physically sensible circuit on a panel
/// with `total_tabs` positions, and reports whether it is dual-phase.
///
/// A single position is always valid (single-phase). Two positions are
/// valid iff they are distinct, both in `[1, total_tabs]`, and on opposite
/// legs. Any other arity, an out-of-range position, or same-leg pairing is
/// a `ConfigError`.
pub fn validate_tabs(tabs: &[usize], total_tabs: usize) -> Result<bool, ErrorKind> {
    for &position in tabs {
        if position == 0 || position > total_tabs {
            return Err(ErrorKind::ConfigError(format!(
                "position {position} is outside the panel's {total_tabs} tabs"
            )));
        }
    }

    match tabs {
        [_] => Ok(false),
        [a, b] => {
            if a == b {
                Err(ErrorKind::ConfigError(format!("duplicate position {a} in circuit tabs")))
            } else if leg_of(*a) == leg_of(*b) {
                Err(ErrorKind::ConfigError(format!(
                    "positions {a} and {b} are both on leg {:?}, not a valid dual-phase pair",
                    leg_of(*a)
                )))
            } else {
                Ok(true)
            }
        }
        other => Err(ErrorKind::ConfigError(format!(
            "circuit occupies {} positions; only 1 or 2 are valid",
            other.len()
        ))),
    }
}

#[cfg(test)]
#[path = "phase_tests.rs"]
mod tests;
