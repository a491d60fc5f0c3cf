//! Declarative panel simulation used in place of a live G2 backend (§4.F, §6).

pub mod config;
pub mod engine;

pub use config::SimulationConfig;
pub use engine::SimulationEngine;
