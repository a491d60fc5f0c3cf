//! Scenario coverage spanning both transports through the published API,
//! exercised over real loopback sockets rather than in-process mocks of
//! the client itself.

use std::io::Write as _;
use std::time::Duration;

use panel_client::factory::ConnectOptions;
use panel_client::{connect, G2Client, G2Config, Generation, PanelCapability, PanelClient};
use panel_client_specs::{
    solar_producer_sim_yaml, spawn_g2_retry_probe, spawn_g2_unmapped_panel,
    spawn_g3_discoverable_panel, spawn_g3_two_circuit_panel,
};

fn g2_config_for(addr: std::net::SocketAddr) -> G2Config {
    let mut config = G2Config::new(addr.ip().to_string());
    config.port = addr.port();
    config.cache_window = Duration::from_millis(0);
    config
}

/// Unmapped synthesis: a circuit spanning tabs 1 and 3 reports its own
/// total, while the bare tabs 2 and 4 surface as synthesized entries and
/// the claimed tabs never do.
#[tokio::test]
async fn unmapped_tabs_are_synthesized_around_a_configured_circuit() {
    let addr = spawn_g2_unmapped_panel().await.unwrap();
    let client = G2Client::new(g2_config_for(addr)).unwrap();
    client.authenticate("panel-client", "spec test").await.unwrap();

    let circuits = client.circuits().await.unwrap();

    assert_eq!(circuits["A"].power_w, 150.0);
    assert_eq!(circuits["unmapped_tab_2"].power_w, -2500.0);
    assert_eq!(circuits["unmapped_tab_4"].power_w, 0.0);
    assert!(!circuits.contains_key("unmapped_tab_1"));
    assert!(!circuits.contains_key("unmapped_tab_3"));
}

/// Retry budget: two retries exhaust after three total attempts, backing
/// off before each. A server that recovers within the budget is read
/// successfully on the final attempt.
#[tokio::test]
async fn a_transient_failure_within_the_retry_budget_eventually_succeeds() {
    let (addr, calls) = spawn_g2_retry_probe(2).await.unwrap();
    let mut config = g2_config_for(addr);
    config.retry = panel_client::retry::RetryPolicy::new(2, Duration::from_millis(5), 2.0);
    let client = G2Client::new(config).unwrap();
    client.authenticate("panel-client", "spec test").await.unwrap();

    let status = client.status().await.unwrap();
    assert_eq!(status.serial_number, "PANEL-1");
    assert_eq!(calls.calls(), 3);
}

#[tokio::test]
async fn a_transient_failure_beyond_the_retry_budget_propagates() {
    let (addr, calls) = spawn_g2_retry_probe(3).await.unwrap();
    let mut config = g2_config_for(addr);
    config.retry = panel_client::retry::RetryPolicy::new(2, Duration::from_millis(5), 2.0);
    let client = G2Client::new(config).unwrap();
    client.authenticate("panel-client", "spec test").await.unwrap();

    let err = client.status().await.unwrap_err();
    assert!(matches!(err, panel_client::ErrorKind::RetriableHttp { .. }));
    assert_eq!(calls.calls(), 3);
}

/// Callback fan-out: two callbacks registered in order both observe the
/// same notification, in registration order.
#[tokio::test]
async fn two_callbacks_both_observe_one_notification_in_order() {
    use std::sync::{Arc, Mutex};

    let (addr, notify_tx) = spawn_g3_two_circuit_panel().await.unwrap();
    let mut client = panel_client::G3Client::with_port(addr.ip().to_string(), addr.port());
    client.connect().await.unwrap();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let order_a = Arc::clone(&order);
    let _handle_a = client.register_callback(move |_| order_a.lock().unwrap().push("cb_a"));
    let order_b = Arc::clone(&order);
    let _handle_b = client.register_callback(move |_| order_b.lock().unwrap().push("cb_b"));

    client.start_streaming().await.unwrap();

    let mut main = Vec::new();
    panel_client::g3::codec::write_fixed64_field(&mut main, 1, 240.0);
    panel_client::g3::codec::write_fixed64_field(&mut main, 2, 10.0);
    panel_client::g3::codec::write_fixed64_field(&mut main, 3, 2400.0);

    let mut notification = Vec::new();
    panel_client::g3::codec::write_length_delimited_field(&mut notification, 14, &main);
    notify_tx.send(notification).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(order.lock().unwrap().as_slice(), &["cb_a", "cb_b"]);
    client.stop_streaming().await.unwrap();
}

/// A producer circuit's simulated output follows its time-of-day curve:
/// silent outside the configured peak hour, full typical output at noon,
/// reachable only through the published G2 client with simulation mode on.
#[tokio::test]
async fn simulated_solar_output_follows_its_time_of_day_curve() {
    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    config_file.write_all(solar_producer_sim_yaml().as_bytes()).unwrap();

    let mut config = G2Config::new("unused");
    config.simulation_mode = true;
    config.simulation_config_path = Some(config_file.path().to_path_buf());
    config.simulation_start_time = Some("2025-06-15T20:00:00Z".parse().unwrap());
    config.cache_window = Duration::from_millis(0);
    let client = G2Client::new(config).unwrap();

    let circuits = client.circuits().await.unwrap();
    assert_eq!(circuits["solar"].power_w, 0.0);

    let mut noon_config = G2Config::new("unused");
    noon_config.simulation_mode = true;
    noon_config.simulation_config_path = Some(config_file.path().to_path_buf());
    noon_config.simulation_start_time = Some("2025-06-15T12:00:00Z".parse().unwrap());
    noon_config.cache_window = Duration::from_millis(0);
    let noon_client = G2Client::new(noon_config).unwrap();

    let noon_circuits = noon_client.circuits().await.unwrap();
    assert_eq!(noon_circuits["solar"].power_w, -2500.0);
}

/// Factory auto-detection: a panel answering only on the G3 port is
/// returned as a G3 client exposing push-streaming capability.
#[tokio::test]
async fn factory_falls_back_to_g3_when_only_g3_responds() {
    let g3_addr = spawn_g3_discoverable_panel().await.unwrap();

    let dead_g2 = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_g2_port = dead_g2.local_addr().unwrap().port();
    drop(dead_g2);

    let mut options = ConnectOptions::new(g3_addr.ip().to_string());
    options.g2.port = dead_g2_port;
    options.g3_port = g3_addr.port();
    options.probe_timeout = Duration::from_millis(300);

    let client = connect(options).await.unwrap();
    assert!(matches!(client, PanelClient::G3(_)));
    assert_eq!(client.capabilities(), PanelCapability::G3);
}

#[tokio::test]
async fn factory_honors_an_explicit_generation_override() {
    let g3_addr = spawn_g3_discoverable_panel().await.unwrap();
    let mut options = ConnectOptions::new(g3_addr.ip().to_string());
    options.generation = Some(Generation::G3);
    options.g3_port = g3_addr.port();

    let client = connect(options).await.unwrap();
    assert!(matches!(client, PanelClient::G3(_)));
}
