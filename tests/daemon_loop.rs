//! Daemon main loop over an in-memory network
//!
//! Several daemons share one `MemoryNetwork` under a paused tokio clock, so
//! minutes of protocol time pass in milliseconds of test time.

mod common;

use batmand::api::{load_config, save_config, DaemonBuilder, DaemonConfig, DaemonState, InterfaceConfig};
use batmand::network::{MemoryNetwork, MemoryTransport, RecordingRouteTable, Transport};
use batmand::Daemon;
use common::{addr, create_temp_dir};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;

const HOSTS: u8 = 66;

fn node_config(address: Ipv4Addr) -> DaemonConfig {
    DaemonConfig::new(vec![InterfaceConfig::new("mesh0", address, 24)])
}

fn spawn_node(
    network: &MemoryNetwork,
    address: Ipv4Addr,
    seed: u64,
) -> (Daemon<MemoryTransport>, RecordingRouteTable) {
    let routes = RecordingRouteTable::new();
    let mut daemon = DaemonBuilder::new(node_config(address))
        .with_route_table(routes.clone())
        .with_jitter(StdRng::seed_from_u64(seed))
        .build(network.attach(&[address]))
        .expect("Failed to build daemon");
    daemon.start().expect("Failed to start daemon");
    (daemon, routes)
}

async fn run_for<T: Transport>(daemon: &mut Daemon<T>, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        daemon.tick().await;
    }
}

/// Two linked nodes detect the bidirectional link and route to each other
#[tokio::test(start_paused = true)]
async fn test_two_nodes_install_routes() {
    let network = MemoryNetwork::new();
    network.connect(addr(1), addr(2));
    let (mut a, routes_a) = spawn_node(&network, addr(1), 1);
    let (mut b, routes_b) = spawn_node(&network, addr(2), 2);

    tokio::join!(
        run_for(&mut a, Duration::from_secs(20)),
        run_for(&mut b, Duration::from_secs(20)),
    );

    // a neighbor is on-link: no gateway on the host route
    assert_eq!(routes_a.installed_via(addr(2), 32, HOSTS), Some(None));
    assert_eq!(routes_b.installed_via(addr(1), 32, HOSTS), Some(None));

    let originators = a.handle().originators();
    let b_entry = originators
        .iter()
        .find(|orig| orig.address == addr(2))
        .expect("node b known");
    assert_eq!(b_entry.router, Some(addr(2)));
    assert!(b_entry.packet_count >= 5);
}

/// A node learns a two-hop originator through the middle node
#[tokio::test(start_paused = true)]
async fn test_chain_routes_through_middle_node() {
    let network = MemoryNetwork::new();
    network.connect(addr(1), addr(2));
    network.connect(addr(2), addr(3));
    let (mut a, routes_a) = spawn_node(&network, addr(1), 1);
    let (mut b, _) = spawn_node(&network, addr(2), 2);
    let (mut c, routes_c) = spawn_node(&network, addr(3), 3);

    tokio::join!(
        run_for(&mut a, Duration::from_secs(15)),
        run_for(&mut b, Duration::from_secs(15)),
        run_for(&mut c, Duration::from_secs(15)),
    );

    assert_eq!(routes_a.installed_via(addr(3), 32, HOSTS), Some(Some(addr(2))));
    assert_eq!(routes_c.installed_via(addr(1), 32, HOSTS), Some(Some(addr(2))));
}

/// Without a link back, no route is installed
#[tokio::test(start_paused = true)]
async fn test_one_way_link_installs_nothing() {
    let network = MemoryNetwork::new();
    network.connect_one_way(addr(1), addr(2));
    let (mut a, routes_a) = spawn_node(&network, addr(1), 1);
    let (mut b, routes_b) = spawn_node(&network, addr(2), 2);

    tokio::join!(
        run_for(&mut a, Duration::from_secs(10)),
        run_for(&mut b, Duration::from_secs(10)),
    );

    assert_eq!(routes_a.installed_via(addr(2), 32, HOSTS), None);
    assert_eq!(routes_b.installed_via(addr(1), 32, HOSTS), None);
    assert!(b.stats().datagrams > 0);
}

/// Malformed datagrams are counted and otherwise ignored
#[tokio::test(start_paused = true)]
async fn test_malformed_datagram_ignored() {
    let network = MemoryNetwork::new();
    let (mut a, routes_a) = spawn_node(&network, addr(1), 1);
    let static_routes = routes_a.installed_count();

    network.inject(addr(2), addr(1), vec![1, 2, 3]);
    run_for(&mut a, Duration::from_secs(2)).await;

    assert_eq!(a.stats().datagrams, 1);
    assert_eq!(a.stats().malformed, 1);
    assert_eq!(routes_a.installed_count(), static_routes);
    assert!(a.handle().originators().is_empty());
}

/// A shut-down daemon leaves no routes behind and refuses to run again
#[tokio::test(start_paused = true)]
async fn test_shutdown_removes_routes() {
    let network = MemoryNetwork::new();
    network.connect(addr(1), addr(2));
    let (mut a, routes_a) = spawn_node(&network, addr(1), 1);
    let (mut b, _) = spawn_node(&network, addr(2), 2);

    tokio::join!(
        run_for(&mut a, Duration::from_secs(8)),
        run_for(&mut b, Duration::from_secs(8)),
    );
    assert!(routes_a.installed_via(addr(2), 32, HOSTS).is_some());

    a.shutdown();
    assert_eq!(a.lifecycle(), DaemonState::Stopped);
    assert_eq!(routes_a.installed_count(), 0);
    assert!(a.run().await.is_err());
}

/// A saved configuration drives a daemon after reload
#[tokio::test(start_paused = true)]
async fn test_daemon_from_saved_config() {
    let dir = create_temp_dir();
    let path = dir.path().join("batmand.json");
    save_config(&path, &node_config(addr(1)).with_aggregation(false)).expect("Failed to save config");

    let config = load_config(&path).expect("Failed to load config");
    assert!(!config.aggregation);

    let network = MemoryNetwork::new();
    let mut daemon = DaemonBuilder::new(config)
        .build(network.attach(&[addr(1)]))
        .expect("Failed to build daemon");
    daemon.start().expect("Failed to start daemon");
    run_for(&mut daemon, Duration::from_secs(3)).await;

    assert!(!network.sent_from(addr(1)).is_empty());
    daemon.shutdown();
}
