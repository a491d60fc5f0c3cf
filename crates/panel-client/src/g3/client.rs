//! G3 transport client: a persistent TCP connection, a background
//! frame-reader task, and a shared reflection of the panel's latest known
//! state (§4.E).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::{self, write_varint_field};
use super::metrics::{decode_circuit_metrics, decode_main_feed, CircuitMetrics};
use super::topology::{pair_topology, CircuitInfo};
use crate::error::ErrorKind;
use crate::snapshot::{CircuitSnapshot, Generation, PanelCapability, PanelSnapshot};

/// Plaintext RPC port G3 panels listen on. No credentials exchanged.
pub const G3_PORT: u16 = 50065;

const FIELD_NAMING_TRAIT: u32 = 16;
const FIELD_METRIC_TRAIT: u32 = 26;
const FIELD_MAIN_FEED: u32 = 14;

type Callback = Box<dyn Fn(&PanelSnapshot) + Send + Sync>;

/// Live reflection of everything the background stream has told us so far.
#[derive(Debug, Default)]
pub struct PanelData {
    pub circuits: HashMap<String, CircuitInfo>,
    pub metric_iid_to_circuit: HashMap<u64, String>,
    pub metrics: HashMap<String, CircuitMetrics>,
    pub main_feed: Option<CircuitMetrics>,
    unknown_metric_count: u64,
}

impl PanelData {
    /// Count of notifications carrying a metric instance id this reflection
    /// has no circuit for (§4.E, resolves the G3 Open Question on firmware
    /// drift visibility).
    pub fn unknown_metric_count(&self) -> u64 {
        self.unknown_metric_count
    }

    fn project(&self) -> Result<PanelSnapshot, ErrorKind> {
        let main = self
            .main_feed
            .as_ref()
            .ok_or_else(|| ErrorKind::ValidationError("main feed not yet received".into()))?;

        let mut circuits = HashMap::with_capacity(self.circuits.len());
        for info in self.circuits.values() {
            let m = self.metrics.get(&info.circuit_id).ok_or_else(|| {
                ErrorKind::ValidationError(format!("circuit {} has no metrics yet", info.circuit_id))
            })?;
            circuits.insert(
                info.circuit_id.clone(),
                CircuitSnapshot {
                    circuit_id: info.circuit_id.clone(),
                    name: info.name.clone(),
                    power_w: m.power_w,
                    voltage_v: m.voltage_v,
                    current_a: m.current_a,
                    is_on: CircuitSnapshot::is_energized(m.voltage_v),
                    is_dual_phase: info.is_dual_phase,
                    apparent_power_va: m.apparent_power_va,
                    reactive_power_var: m.reactive_power_var,
                    power_factor: m.power_factor,
                    relay_state: None,
                    priority: None,
                    energy_consumed_wh: None,
                    energy_produced_wh: None,
                    tabs: None,
                },
            );
        }

        Ok(PanelSnapshot {
            generation: Generation::G3,
            serial_number: String::new(),
            firmware_version: String::new(),
            main_power_w: main.power_w,
            main_voltage_v: Some(main.voltage_v),
            main_current_a: Some(main.current_a),
            main_frequency_hz: main.frequency_hz,
            grid_power_w: None,
            battery_soe: None,
            battery_max_energy_kwh: None,
            dsm_state: None,
            main_relay_state: None,
            door_state: None,
            circuits,
        })
    }
}

/// Deregisters its callback from the client that issued it when dropped.
/// Holds only a `Weak` reference so the client can be dropped first without
/// the handle keeping it alive.
pub struct UnregisterHandle {
    id: u64,
    registry: Weak<Mutex<Vec<(u64, Callback)>>>,
}

impl Drop for UnregisterHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct G3Client {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    data: Arc<RwLock<PanelData>>,
    callbacks: Arc<Mutex<Vec<(u64, Callback)>>>,
    next_callback_id: AtomicU64,
    stream_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    connected: AtomicBool,
}

impl std::fmt::Debug for G3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("G3Client")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl G3Client {
    pub const CAPABILITIES: PanelCapability = PanelCapability::G3;

    pub fn new(host: impl Into<String>) -> Self {
        Self::with_port(host, G3_PORT)
    }

    /// Overrides the protocol port (§6 configuration surface); real hardware
    /// always listens on [`G3_PORT`], but test rigs and non-standard
    /// deployments may not.
    pub fn with_port(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            data: Arc::new(RwLock::new(PanelData::default())),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            next_callback_id: AtomicU64::new(1),
            stream_handle: Mutex::new(None),
            shutdown: CancellationToken::new(),
            connected: AtomicBool::new(false),
        }
    }

    /// Opens the TCP connection, runs topology discovery, and primes each
    /// circuit's name via `GetRevision`. Does not start streaming.
    pub async fn connect(&mut self) -> Result<bool, ErrorKind> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ErrorKind::GrpcConnect(e.to_string()))?;
        self.stream = Some(stream);

        let (naming, metric) = self.get_instances().await?;
        let mut circuits = pair_topology(naming, metric)?;
        for info in circuits.iter_mut() {
            info.name = self.get_revision(info.name_iid).await?;
        }

        let mut data = self.data.write().await;
        data.metric_iid_to_circuit =
            circuits.iter().map(|c| (c.metric_iid, c.circuit_id.clone())).collect();
        data.circuits = circuits.into_iter().map(|c| (c.circuit_id.clone(), c)).collect();
        drop(data);

        self.connected.store(true, Ordering::SeqCst);
        Ok(true)
    }

    /// Lightweight reachability probe used by `crate::factory`. Does not
    /// mutate any cached topology state.
    pub async fn test_connection(&mut self) -> Result<bool, ErrorKind> {
        let was_connected = self.stream.is_some();
        let (naming, metric) = self.get_instances().await?;
        if !was_connected {
            self.stream = None;
        }
        Ok(!naming.is_empty() || !metric.is_empty())
    }

    async fn get_instances(&mut self) -> Result<(Vec<u64>, Vec<u64>), ErrorKind> {
        if self.stream.is_none() {
            let stream = TcpStream::connect((self.host.as_str(), self.port))
                .await
                .map_err(|e| ErrorKind::GrpcConnect(e.to_string()))?;
            self.stream = Some(stream);
        }

        let mut body = Vec::new();
        write_varint_field(&mut body, 1, 0); // vendor filter: none
        write_varint_field(&mut body, 2, 0); // product filter: none
        let response = self.roundtrip(&body).await?;

        let mut naming = Vec::new();
        let mut metric = Vec::new();
        for (field_number, value) in codec::scan_fields(&response)? {
            match field_number {
                FIELD_NAMING_TRAIT => naming.push(value.as_u64()?),
                FIELD_METRIC_TRAIT => metric.push(value.as_u64()?),
                _ => {} // other trait families, not yet surfaced
            }
        }
        Ok((naming, metric))
    }

    async fn get_revision(&mut self, name_iid: u64) -> Result<String, ErrorKind> {
        let mut body = Vec::new();
        write_varint_field(&mut body, 1, name_iid);
        let response = self.roundtrip(&body).await?;

        for (field_number, value) in codec::scan_fields(&response)? {
            if field_number == 1 {
                return Ok(value.as_str()?.to_string());
            }
        }
        Err(ErrorKind::CodecError("GetRevision response missing revision field".into()))
    }

    async fn roundtrip(&mut self, body: &[u8]) -> Result<Vec<u8>, ErrorKind> {
        use tokio::io::AsyncWriteExt;

        let stream = self.stream.as_mut().ok_or_else(|| ErrorKind::GrpcError("not connected".into()))?;
        let frame = codec::frame(body);
        stream
            .write_all(&frame)
            .await
            .map_err(|e| ErrorKind::GrpcError(format!("writing request: {e}")))?;

        codec::read_frame(stream).await
    }

    /// Registers a callback invoked after every panel update while
    /// streaming is active. Dropping the returned handle deregisters it.
    pub fn register_callback(
        &self,
        callback: impl Fn(&PanelSnapshot) + Send + Sync + 'static,
    ) -> UnregisterHandle {
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().push((id, Box::new(callback)));
        UnregisterHandle { id, registry: Arc::downgrade(&self.callbacks) }
    }

    /// Issues the long-lived `Subscribe` RPC for every known circuit's
    /// metric instance id, then spawns the background task that reads
    /// notification frames off the connection until `stop_streaming` or
    /// `close` is called.
    pub async fn start_streaming(&mut self) -> Result<(), ErrorKind> {
        let metric_iids: Vec<u64> = self.data.read().await.metric_iid_to_circuit.keys().copied().collect();
        let mut subscribe = Vec::new();
        for iid in metric_iids {
            write_varint_field(&mut subscribe, 1, iid);
        }
        self.roundtrip(&subscribe).await?; // subscription ack, contents unused

        let stream =
            self.stream.take().ok_or_else(|| ErrorKind::GrpcError("not connected".into()))?;
        let data = Arc::clone(&self.data);
        let callbacks = Arc::clone(&self.callbacks);
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(stream_loop(stream, data, callbacks, shutdown));
        *self.stream_handle.lock() = Some(handle);
        Ok(())
    }

    /// Signals the background task to stop and waits for it to exit. The
    /// connection is consumed by the background task, so a fresh
    /// `connect()` is needed to resume.
    pub async fn stop_streaming(&mut self) -> Result<(), ErrorKind> {
        self.shutdown.cancel();
        let handle = self.stream_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shutdown = CancellationToken::new();
        Ok(())
    }

    /// Projects the current reflection into a transport-agnostic snapshot.
    /// Pure memory read, safe to call from within a callback.
    pub async fn snapshot(&self) -> Result<PanelSnapshot, ErrorKind> {
        self.data.read().await.project()
    }

    /// Borrow of the shared reflection for advanced callers (e.g. reading
    /// `unknown_metric_count`).
    pub fn data(&self) -> Arc<RwLock<PanelData>> {
        Arc::clone(&self.data)
    }

    pub async fn close(&mut self) -> Result<(), ErrorKind> {
        if self.stream_handle.lock().is_some() {
            self.stop_streaming().await?;
        }
        self.stream = None;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn stream_loop(
    mut stream: TcpStream,
    data: Arc<RwLock<PanelData>>,
    callbacks: Arc<Mutex<Vec<(u64, Callback)>>>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = codec::read_frame(&mut stream) => result,
        };

        let body = match frame {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "g3 stream closed");
                break;
            }
        };

        if let Err(e) = apply_notification(&body, &data).await {
            warn!(error = %e, "dropping malformed g3 notification");
            continue;
        }

        let snapshot = match data.read().await.project() {
            Ok(snapshot) => snapshot,
            Err(_) => continue, // not enough state yet to project a snapshot
        };
        dispatch(&callbacks, &snapshot);
    }
}

async fn apply_notification(body: &[u8], data: &Arc<RwLock<PanelData>>) -> Result<(), ErrorKind> {
    for (field_number, value) in codec::scan_fields(body)? {
        if field_number == FIELD_MAIN_FEED {
            let metrics = decode_main_feed(value.as_bytes()?)?;
            data.write().await.main_feed = Some(metrics);
            continue;
        }

        let metric_iid = field_number as u64;
        let payload = value.as_bytes()?;
        let circuit_id = data.read().await.metric_iid_to_circuit.get(&metric_iid).cloned();
        match circuit_id {
            Some(circuit_id) => {
                let metrics = decode_circuit_metrics(payload)?;
                data.write().await.metrics.insert(circuit_id, metrics);
            }
            None => data.write().await.unknown_metric_count += 1,
        }
    }
    Ok(())
}

fn dispatch(callbacks: &Arc<Mutex<Vec<(u64, Callback)>>>, snapshot: &PanelSnapshot) {
    let guard = callbacks.lock();
    for (id, callback) in guard.iter() {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(snapshot)));
        if outcome.is_err() {
            warn!(callback_id = id, "panel callback panicked");
        }
    }
    debug!(callback_count = guard.len(), "dispatched panel update");
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
