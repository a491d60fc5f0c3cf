//! End-to-end harness spanning both transports against the published API.
//!
//! Each scenario spins up a loopback mock of the wire it exercises and
//! drives the real `panel_client` client through it, the way a real panel
//! fleet would be driven. Internals of the transports stay private; these
//! helpers only use what `panel_client` exports.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use panel_client::g3::codec;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

async fn bind_and_serve(app: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

/// A G2 mock wired for the unmapped-synthesis scenario: one configured
/// circuit spanning two tabs on a four-tab panel, the remaining positions
/// reporting raw branch power with no matching circuit.
pub async fn spawn_g2_unmapped_panel() -> anyhow::Result<SocketAddr> {
    async fn auth() -> Json<serde_json::Value> {
        Json(json!({"access_token": "token", "token_type": "Bearer", "iat_ms": 0}))
    }
    async fn panel() -> Json<serde_json::Value> {
        Json(json!({
            "total_tabs": 4,
            "main_power_w": -2350.0,
            "grid_power_w": null,
            "dsm_state": null,
            "main_relay_state": "closed",
            "branches": [
                {"position": 1, "power_w": 75.0, "voltage_v": 120.0, "current_a": 0.625, "relay_state": "closed", "priority": "must_have"},
                {"position": 2, "power_w": -2500.0, "voltage_v": 120.0, "current_a": -20.833, "relay_state": "closed", "priority": "nice_to_have"},
                {"position": 3, "power_w": 75.0, "voltage_v": 120.0, "current_a": 0.625, "relay_state": "closed", "priority": "must_have"},
                {"position": 4, "power_w": 0.0, "voltage_v": 0.0, "current_a": 0.0, "relay_state": "open", "priority": "non_essential"},
            ],
        }))
    }
    async fn circuits() -> Json<serde_json::Value> {
        Json(json!({
            "circuits": {
                "A": {
                    "name": "Kitchen",
                    "power_w": 150.0,
                    "voltage_v": 120.0,
                    "current_a": 1.25,
                    "relay_state": "closed",
                    "priority": "must_have",
                    "energy_consumed_wh": 10.0,
                    "energy_produced_wh": 0.0,
                    "tabs": [1, 3],
                },
            },
        }))
    }

    let app = Router::new()
        .route("/api/v1/auth/register", post(auth))
        .route("/api/v1/panel", get(panel))
        .route("/api/v1/circuits", get(circuits));
    bind_and_serve(app).await
}

/// Counts the calls a mock server handler has actually received, so a test
/// can assert on the exact retry arithmetic instead of just the outcome.
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn calls(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A G2 mock whose status endpoint answers 503 `failures_before_success`
/// times before succeeding, for exercising the retry budget end to end.
pub async fn spawn_g2_retry_probe(failures_before_success: u32) -> anyhow::Result<(SocketAddr, CallCounter)> {
    #[derive(Clone)]
    struct RetryState {
        calls: Arc<AtomicU32>,
        failures_remaining: Arc<AtomicU32>,
    }

    async fn auth() -> Json<serde_json::Value> {
        Json(json!({"access_token": "token", "token_type": "Bearer", "iat_ms": 0}))
    }

    async fn status(State(state): State<RetryState>) -> (StatusCode, Json<serde_json::Value>) {
        state.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = state.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            state.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})));
        }
        (
            StatusCode::OK,
            Json(json!({"serial_number": "PANEL-1", "firmware_version": "1.0", "door_state": "closed"})),
        )
    }

    let calls = Arc::new(AtomicU32::new(0));
    let state = RetryState {
        calls: Arc::clone(&calls),
        failures_remaining: Arc::new(AtomicU32::new(failures_before_success)),
    };
    let app = Router::new()
        .route("/api/v1/auth/register", post(auth))
        .route("/api/v1/status", get(status))
        .with_state(state);
    Ok((bind_and_serve(app).await?, CallCounter(calls)))
}

/// Drives one accepted G3 connection through discovery (`GetInstances` then
/// one `GetRevision` per circuit, in whatever order the client asks), acks
/// the subscribe, then forwards whatever notification frames arrive on
/// `notify_rx` until the channel closes.
async fn run_g3_mock_panel(
    mut socket: TcpStream,
    names: HashMap<u64, &'static str>,
    naming_ids: Vec<u64>,
    metric_ids: Vec<u64>,
    mut notify_rx: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let Ok(_get_instances) = codec::read_frame(&mut socket).await else { return };
    let mut resp = Vec::new();
    for id in &naming_ids {
        codec::write_varint_field(&mut resp, 16, *id);
    }
    for id in &metric_ids {
        codec::write_varint_field(&mut resp, 26, *id);
    }
    if socket.write_all(&codec::frame(&resp)).await.is_err() {
        return;
    }

    for _ in 0..naming_ids.len() {
        let Ok(req) = codec::read_frame(&mut socket).await else { return };
        let Ok(fields) = codec::scan_fields(&req) else { return };
        let iid = fields.first().and_then(|(_, v)| v.as_u64().ok()).unwrap_or(0);
        let mut resp = Vec::new();
        codec::write_string_field(&mut resp, 1, names.get(&iid).copied().unwrap_or("unknown"));
        if socket.write_all(&codec::frame(&resp)).await.is_err() {
            return;
        }
    }

    // Subscribe ack.
    let Ok(_subscribe) = codec::read_frame(&mut socket).await else { return };
    if socket.write_all(&codec::frame(&[])).await.is_err() {
        return;
    }

    while let Some(notification) = notify_rx.recv().await {
        if socket.write_all(&codec::frame(&notification)).await.is_err() {
            return;
        }
    }
}

/// A G3 mock exposing two named circuits, for the callback fan-out
/// scenario. Returns the listen address and a sender for pushing raw
/// notification frames once a caller is streaming.
pub async fn spawn_g3_two_circuit_panel(
) -> anyhow::Result<(SocketAddr, tokio::sync::mpsc::UnboundedSender<Vec<u8>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (notify_tx, notify_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((socket, _)) = listener.accept().await else { return };
        let names = HashMap::from([(1u64, "kitchen"), (5u64, "garage")]);
        run_g3_mock_panel(socket, names, vec![1, 5], vec![2, 35], notify_rx).await;
    });

    Ok((addr, notify_tx))
}

/// A G3 mock that answers `GetInstances` with a single circuit on every
/// connection, serving both the factory's cheap probe and the subsequent
/// full connect.
pub async fn spawn_g3_discoverable_panel() -> anyhow::Result<SocketAddr> {
    async fn handle(mut socket: TcpStream) {
        let Ok(_get_instances) = codec::read_frame(&mut socket).await else { return };
        let mut resp = Vec::new();
        codec::write_varint_field(&mut resp, 16, 7);
        codec::write_varint_field(&mut resp, 26, 8);
        if socket.write_all(&codec::frame(&resp)).await.is_err() {
            return;
        }

        while let Ok(_get_revision) = codec::read_frame(&mut socket).await {
            let mut resp = Vec::new();
            codec::write_string_field(&mut resp, 1, "Only Circuit");
            if socket.write_all(&codec::frame(&resp)).await.is_err() {
                break;
            }
        }
    }

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            tokio::spawn(handle(socket));
        }
    });
    Ok(addr)
}

/// A solar-producer simulation config matching the fixed time-of-day
/// scenario: zero output at 20:00, full typical output at noon.
pub fn solar_producer_sim_yaml() -> &'static str {
    r#"
panel_config:
  serial_number: SIM-SPEC-001
  total_tabs: 1
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
  - id: "solar"
    name: Solar Array
    template: solar
    tabs: [1]
"#
}
