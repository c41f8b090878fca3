//! Black-box scenarios, driven only through the public crate API, against
//! real loopback sockets: a legacy (1.6-era) peer and a rate-limited sweep
//! of unresponsive hosts. Modern-protocol parsing and blacklist
//! short-circuiting are covered at the unit level in `src/parser/mod.rs`
//! and `src/coordinator.rs`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use minescan::blacklist::Blacklist;
use minescan::coordinator::{CoordinatorConfig, ScanCoordinator};
use minescan::discovery::TargetSpec;
use minescan::protocol::{self, ProbeConfig, ProbeOutcome};
use minescan::store::{SqliteStore, Store};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn temp_store() -> Arc<dyn Store> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenarios.db");
    std::mem::forget(dir);
    Arc::new(SqliteStore::connect(path.to_str().unwrap()).await.unwrap())
}

/// Builds the UTF-16BE `0xFF` kick packet a 1.6-era server sends in reply
/// to `MC|PingHost`, carrying the `§1\0protocol\0version\0motd\0online\0max`
/// payload.
fn legacy_kick_packet(version: &str, motd: &str, online: i64, max: i64) -> Vec<u8> {
    let text = format!("\u{a7}1\u{0}127\u{0}{version}\u{0}{motd}\u{0}{online}\u{0}{max}");
    let units: Vec<u16> = text.encode_utf16().collect();
    let mut pkt = vec![0xFFu8];
    pkt.extend_from_slice(&(units.len() as u16).to_be_bytes());
    for u in units {
        pkt.extend_from_slice(&u.to_be_bytes());
    }
    pkt
}

/// A server that only understands the legacy `0xFE 0x01 0xFA` ping:
/// anything else (a modern handshake) is dropped without a reply, so the
/// modern attempt times out and the prober must fall back to legacy.
async fn spawn_legacy_only_server(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut first = [0u8; 3];
                if stream.read_exact(&mut first).await.is_err() {
                    return;
                }
                if first == [0xFE, 0x01, 0xFA] {
                    let mut rest = vec![0u8; 4096];
                    let _ = tokio::time::timeout(
                        Duration::from_millis(50),
                        stream.read(&mut rest),
                    )
                    .await;
                    let reply = legacy_kick_packet("1.5.2", "A legacy MOTD", 3, 20);
                    let _ = stream.write_all(&reply).await;
                }
                // Anything else (modern handshake bytes): drop the
                // connection, forcing the modern attempt to time out.
            });
        }
    });
}

#[tokio::test]
async fn legacy_peer_falls_back_from_modern_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    spawn_legacy_only_server(addr).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let config = ProbeConfig {
        timeout: Duration::from_millis(300),
        protocol_version: 770,
        scan_all_protocols: false,
        protocol_versions: vec![],
        retries: 0,
        legacy_support: true,
    };

    let outcome = protocol::probe(&addr.ip().to_string(), addr.port(), &config).await;
    let ProbeOutcome::Success(raw) = outcome else {
        panic!("expected a successful legacy probe, got {outcome:?}");
    };
    assert!(raw.legacy);
    assert_eq!(raw.protocol_version_used, -1);

    let parsed = minescan::parser::parse(&raw);
    assert_eq!(parsed.version_name, "1.5.2");
    assert_eq!(parsed.protocol_version, -1);
    assert_eq!(parsed.max_players, 20);
    assert_eq!(parsed.online_players, 3);
    assert_eq!(parsed.motd_clean, "A legacy MOTD");
    assert!(parsed.legacy);
}

/// Accepts every connection and then holds it open without ever reading or
/// writing, so every probe against it is a TCP-accepted-but-silent peer.
async fn spawn_blackhole_server(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            // Leak the accepted socket: keep it open for the rest of the
            // test without spawning a task per connection to service it.
            std::mem::forget(stream);
        }
    });
}

#[tokio::test]
async fn rate_limited_blackhole_targets_take_at_least_one_timeout_period() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    spawn_blackhole_server(addr).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let dir = tempfile::tempdir().unwrap();
    let targets_path = dir.path().join("targets.txt");
    let lines: String = (0..10)
        .map(|_| format!("{}:{}\n", addr.ip(), addr.port()))
        .collect();
    tokio::fs::write(&targets_path, lines).await.unwrap();

    let store = temp_store().await;
    let blacklist = Arc::new(Blacklist::new());
    let coordinator_config = CoordinatorConfig {
        probe: ProbeConfig {
            timeout: Duration::from_secs(1),
            protocol_version: 770,
            scan_all_protocols: false,
            protocol_versions: vec![],
            retries: 0,
            legacy_support: false,
        },
        rate_limit: 100.0,
        max_concurrent: 10,
        max_connections_per_host: 0,
        max_memory_mb: 4096,
        gc_interval: 1000,
        memory_monitoring_enabled: false,
        batch_size: 10,
    };
    let coordinator = Arc::new(ScanCoordinator::new(store, blacklist, coordinator_config, None));

    let started = Instant::now();
    coordinator
        .start(TargetSpec::File {
            path: targets_path,
            ports: vec![],
        })
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed >= Duration::from_millis(950),
        "expected the 1s probe timeout to bound wall time, got {elapsed:?}"
    );

    let stats = coordinator.stats().await;
    assert_eq!(stats.targets_consumed, 10);
    assert_eq!(stats.total_scanned, 10);
    assert_eq!(stats.errors, 10);
    assert_eq!(stats.servers_found, 0);
}
