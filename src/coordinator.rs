//! Scan coordinator (C11): composes the target generator, blacklist, rate
//! limiter, concurrency gate, prober, parser and store into the per-target
//! pipeline.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::blacklist::Blacklist;
use crate::discovery::{self, TargetSpec};
use crate::error::ScanResult;
use crate::gate::ConcurrencyGate;
use crate::geolocation::GeolocationClient;
use crate::memory::MemoryGuard;
use crate::parser::{self, ParsedServer};
use crate::protocol::{self, ProbeConfig, ProbeOutcome};
use crate::ratelimit::RateLimiter;
use crate::store::{ScanOutcome, Store};

const STATS_PUSH_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    Idle = 0,
    Running = 1,
    Paused = 2,
    Stopped = 3,
}

impl From<u8> for ScanState {
    fn from(v: u8) -> Self {
        match v {
            1 => ScanState::Running,
            2 => ScanState::Paused,
            3 => ScanState::Stopped,
            _ => ScanState::Idle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ScanStats {
    pub targets_consumed: u64,
    pub total_scanned: u64,
    pub servers_found: u64,
    pub errors: u64,
    pub blacklisted_skipped: u64,
    pub started_at: Option<DateTime<Utc>>,
}

/// A registered side effect of a successful probe, or of a periodic stats
/// push. Exceptions from observers are caught and logged — they never
/// fail the probe.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_result(&self, ip: IpAddr, port: u16, parsed: &ParsedServer);
    async fn on_stats(&self, stats: &ScanStats, complete: bool);
}

pub type ResultCallback = dyn Fn(&ParsedServer) + Send + Sync;

pub struct CoordinatorConfig {
    pub probe: ProbeConfig,
    pub rate_limit: f64,
    pub max_concurrent: usize,
    pub max_connections_per_host: usize,
    pub max_memory_mb: u64,
    pub gc_interval: u64,
    pub memory_monitoring_enabled: bool,
    pub batch_size: usize,
}

pub struct ScanCoordinator {
    store: Arc<dyn Store>,
    blacklist: Arc<Blacklist>,
    rate_limiter: Arc<RateLimiter>,
    gate: Arc<ConcurrencyGate>,
    memory_guard: Arc<MemoryGuard>,
    geo: Option<Arc<GeolocationClient>>,
    probe_config: ProbeConfig,
    batch_size: usize,
    observers: Mutex<Vec<Arc<dyn Observer>>>,
    result_callback: Mutex<Option<Arc<ResultCallback>>>,
    state: AtomicU8,
    completed: AtomicU64,
    stats: Mutex<ScanStats>,
}

impl ScanCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        blacklist: Arc<Blacklist>,
        config: CoordinatorConfig,
        geo: Option<Arc<GeolocationClient>>,
    ) -> Self {
        ScanCoordinator {
            store,
            blacklist,
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            gate: Arc::new(ConcurrencyGate::new(
                config.max_concurrent,
                config.max_connections_per_host,
            )),
            memory_guard: Arc::new(MemoryGuard::new(
                config.max_memory_mb,
                config.gc_interval,
                config.memory_monitoring_enabled,
            )),
            geo,
            probe_config: config.probe,
            batch_size: config.batch_size,
            observers: Mutex::new(Vec::new()),
            result_callback: Mutex::new(None),
            state: AtomicU8::new(ScanState::Idle as u8),
            completed: AtomicU64::new(0),
            stats: Mutex::new(ScanStats::default()),
        }
    }

    pub fn state(&self) -> ScanState {
        ScanState::from(self.state.load(Ordering::SeqCst))
    }

    pub async fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.lock().await.push(observer);
    }

    pub async fn set_result_callback(&self, callback: Arc<ResultCallback>) {
        *self.result_callback.lock().await = Some(callback);
    }

    pub async fn stats(&self) -> ScanStats {
        self.stats.lock().await.clone()
    }

    pub fn pause(&self) {
        let _ = self.state.compare_exchange(
            ScanState::Running as u8,
            ScanState::Paused as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn resume(&self) {
        let _ = self.state.compare_exchange(
            ScanState::Paused as u8,
            ScanState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn stop(&self) {
        self.state.store(ScanState::Stopped as u8, Ordering::SeqCst);
    }

    /// Runs one scan to completion: consumes `target_spec` through C5,
    /// drives every target through the pipeline, and drains in-flight
    /// probes once stopped.
    pub async fn start(self: &Arc<Self>, target_spec: TargetSpec) -> ScanResult<()> {
        self.state.store(ScanState::Running as u8, Ordering::SeqCst);
        *self.stats.lock().await = ScanStats {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        let mut rx = discovery::generate(target_spec, Some(self.batch_size));
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            while self.state() == ScanState::Paused {
                tokio::task::yield_now().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if self.state() == ScanState::Stopped {
                break;
            }

            match rx.recv().await {
                Some((ip, port)) => {
                    self.stats.lock().await.targets_consumed += 1;
                    let coordinator = Arc::clone(self);
                    tasks.spawn(async move {
                        coordinator.run_target(ip, port).await;
                    });
                }
                None => break,
            }
        }

        // Drain in-flight probes; their own deadlines bound completion.
        while tasks.join_next().await.is_some() {}

        self.state.store(ScanState::Stopped as u8, Ordering::SeqCst);
        let final_stats = self.stats().await;
        for observer in self.observers.lock().await.iter() {
            observer.on_stats(&final_stats, true).await;
        }
        Ok(())
    }

    async fn run_target(self: Arc<Self>, ip: IpAddr, port: u16) {
        while self.state() == ScanState::Paused {
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if self.memory_guard.is_backpressured() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.rate_limiter.acquire(1.0).await;
        let _gate_guard = self.gate.acquire(ip).await;

        if self.blacklist.is_blocked(ip) {
            self.stats.lock().await.blacklisted_skipped += 1;
            return;
        }

        let ip_str = ip.to_string();
        let outcome = protocol::probe(&ip_str, port, &self.probe_config).await;

        match outcome {
            ProbeOutcome::Success(raw) => {
                let parsed = parser::parse(&raw);

                if let Some(geo) = &self.geo {
                    if let Some(location) = geo.lookup(ip).await {
                        if let Err(e) = self.store.upsert_location(&location).await {
                            log::debug!("geolocation store write failed for {ip}: {e}");
                        }
                    }
                }

                let scan_outcome = ScanOutcome {
                    ip,
                    port,
                    scan_time: Utc::now(),
                    parsed: Some(parsed.clone()),
                };
                if let Err(e) = self.store.put_endpoint_scan(&scan_outcome).await {
                    log::error!("store write failed for {ip}:{port}: {e}");
                }

                if let Some(callback) = self.result_callback.lock().await.as_ref() {
                    callback(&parsed);
                }
                for observer in self.observers.lock().await.iter() {
                    observer.on_result(ip, port, &parsed).await;
                }

                let mut stats = self.stats.lock().await;
                stats.servers_found += 1;
                stats.total_scanned += 1;
            }
            ProbeOutcome::NoResponse => {
                self.stats.lock().await.total_scanned += 1;
            }
            ProbeOutcome::Error(message) => {
                log::warn!("probe error for {ip}:{port}: {message}");
                let scan_outcome = ScanOutcome {
                    ip,
                    port,
                    scan_time: Utc::now(),
                    parsed: None,
                };
                if let Err(e) = self.store.put_endpoint_scan(&scan_outcome).await {
                    log::error!("store write failed for {ip}:{port}: {e}");
                }
                let mut stats = self.stats.lock().await;
                stats.errors += 1;
                stats.total_scanned += 1;
            }
        }

        self.memory_guard.on_probe_completed().await;

        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if completed % STATS_PUSH_INTERVAL == 0 {
            let stats = self.stats().await;
            for observer in self.observers.lock().await.iter() {
                observer.on_stats(&stats, false).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::time::Duration as StdDuration;

    async fn temp_coordinator() -> Arc<ScanCoordinator> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coord.db");
        std::mem::forget(dir);
        let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(path.to_str().unwrap()).await.unwrap());
        let blacklist = Arc::new(Blacklist::new());
        let config = CoordinatorConfig {
            probe: ProbeConfig {
                timeout: StdDuration::from_millis(100),
                protocol_version: 770,
                scan_all_protocols: false,
                protocol_versions: vec![],
                retries: 0,
                legacy_support: false,
            },
            rate_limit: 1000.0,
            max_concurrent: 10,
            max_connections_per_host: 0,
            max_memory_mb: 4096,
            gc_interval: 1000,
            memory_monitoring_enabled: false,
            batch_size: 100,
        };
        Arc::new(ScanCoordinator::new(store, blacklist, config, None))
    }

    #[tokio::test]
    async fn blacklisted_target_is_skipped_without_scanning() {
        let coordinator = temp_coordinator().await;
        coordinator
            .blacklist
            .add_entry("10.0.0.0/24")
            .unwrap();

        coordinator
            .start(TargetSpec::Range {
                cidr: "10.0.0.5/32".parse().unwrap(),
                ports: vec![25565],
            })
            .await
            .unwrap();

        let stats = coordinator.stats().await;
        assert_eq!(stats.blacklisted_skipped, 1);
        assert_eq!(stats.total_scanned, 0);
        assert_eq!(stats.targets_consumed, 1);
    }

    #[tokio::test]
    async fn pause_then_stop_transitions_state() {
        let coordinator = temp_coordinator().await;
        coordinator.state.store(ScanState::Running as u8, Ordering::SeqCst);
        coordinator.pause();
        assert_eq!(coordinator.state(), ScanState::Paused);
        coordinator.resume();
        assert_eq!(coordinator.state(), ScanState::Running);
        coordinator.stop();
        assert_eq!(coordinator.state(), ScanState::Stopped);
    }
}
