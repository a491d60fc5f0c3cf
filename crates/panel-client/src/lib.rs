//! Transport-agnostic client for smart electrical-panel hardware.
//!
//! Two generations of panel hardware speak incompatible wire protocols: G2
//! is an HTTP API guarded by a bearer token, G3 is a persistent binary RPC
//! connection that pushes metric updates. [`factory::connect`] probes a host
//! and hands back whichever transport answers, behind the shared
//! [`snapshot::PanelSnapshot`] projection.

pub mod cache;
pub mod error;
pub mod factory;
pub mod g2;
pub mod g3;
pub mod phase;
pub mod retry;
pub mod sim;
pub mod snapshot;

pub use error::ErrorKind;
pub use factory::{connect, PanelClient};
pub use g2::{G2Client, G2Config};
pub use g3::G3Client;
pub use snapshot::{
    CircuitSnapshot, Generation, PanelCapability, PanelSnapshot, Priority, RelayState,
};
