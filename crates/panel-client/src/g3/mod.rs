//! Generation-3 streaming binary RPC transport (§4.E).

pub mod client;
pub mod codec;
pub mod metrics;
pub mod topology;

pub use client::{G3Client, PanelData, UnregisterHandle, G3_PORT};
pub use metrics::CircuitMetrics;
pub use topology::CircuitInfo;
