//! Auto-detecting transport selection (§4.H).
//!
//! G2 is probed first since a plain HTTP `ping()` is cheap and most fleets
//! are still G2; G3 is tried only if that times out or refuses.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::ErrorKind;
use crate::g2::{G2Client, G2Config};
use crate::g3::{G3Client, G3_PORT};
use crate::snapshot::{Generation, PanelCapability, PanelSnapshot};

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Skips the probe and constructs this transport directly.
    pub generation: Option<Generation>,
    pub g2: G2Config,
    /// Defaults to [`G3_PORT`]; overridable for non-standard deployments and
    /// test rigs (§6).
    pub g3_port: u16,
    pub probe_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            generation: None,
            g2: G2Config::new(host),
            g3_port: G3_PORT,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// A client obtained through auto-detection, holding whichever transport
/// answered.
#[derive(Debug)]
pub enum PanelClient {
    G2(G2Client),
    G3(G3Client),
}

impl PanelClient {
    pub fn capabilities(&self) -> PanelCapability {
        match self {
            Self::G2(_) => G2Client::CAPABILITIES,
            Self::G3(_) => G3Client::CAPABILITIES,
        }
    }

    pub async fn snapshot(&self) -> Result<PanelSnapshot, ErrorKind> {
        match self {
            Self::G2(client) => client.snapshot().await,
            Self::G3(client) => client.snapshot().await,
        }
    }

    pub async fn close(&mut self) -> Result<(), ErrorKind> {
        match self {
            Self::G2(client) => client.close().await,
            Self::G3(client) => client.close().await,
        }
    }
}

/// Selects and constructs a transport for `options.g2.host` (§4.H).
pub async fn connect(options: ConnectOptions) -> Result<PanelClient, ErrorKind> {
    if let Some(generation) = options.generation {
        return connect_to(generation, options).await;
    }

    let g2 = G2Client::new(options.g2.clone())?;
    match tokio::time::timeout(options.probe_timeout, g2.ping()).await {
        Ok(Ok(())) => {
            debug!(host = %options.g2.host, "g2 probe responded");
            return Ok(PanelClient::G2(g2));
        }
        _ => debug!(host = %options.g2.host, "g2 probe failed, falling back to g3"),
    }

    let mut g3 = G3Client::with_port(options.g2.host.clone(), options.g3_port);
    match tokio::time::timeout(options.probe_timeout, g3.test_connection()).await {
        Ok(Ok(true)) => {
            info!(host = %options.g2.host, "g3 probe responded");
            g3.connect().await?;
            Ok(PanelClient::G3(g3))
        }
        _ => Err(ErrorKind::NoTransport),
    }
}

async fn connect_to(generation: Generation, options: ConnectOptions) -> Result<PanelClient, ErrorKind> {
    match generation {
        Generation::G2 => Ok(PanelClient::G2(G2Client::new(options.g2)?)),
        Generation::G3 => {
            let mut client = G3Client::with_port(options.g2.host, options.g3_port);
            client.connect().await?;
            Ok(PanelClient::G3(client))
        }
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
