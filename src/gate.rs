//! Concurrency gate (C7): a global semaphore plus an optional, lazily
//! created per-host semaphore. Both must be held for the duration of a
//! probe and are released on completion regardless of outcome.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

pub struct ConcurrencyGate {
    global: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<IpAddr, Arc<Semaphore>>>,
}

/// Holds whichever permits were acquired for one probe; dropping this
/// releases them.
pub struct GateGuard {
    _global: OwnedSemaphorePermit,
    _host: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize, max_connections_per_host: usize) -> Self {
        ConcurrencyGate {
            global: Arc::new(Semaphore::new(max_concurrent.max(1))),
            per_host_limit: max_connections_per_host,
            per_host: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, host: IpAddr) -> GateGuard {
        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("global gate semaphore closed");

        let host_permit = if self.per_host_limit > 0 {
            let sem = {
                let mut map = self.per_host.lock().await;
                map.entry(host)
                    .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
                    .clone()
            };
            Some(
                sem.acquire_owned()
                    .await
                    .expect("per-host gate semaphore closed"),
            )
        } else {
            None
        };

        GateGuard {
            _global: global,
            _host: host_permit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn global_gate_bounds_concurrency() {
        let gate = Arc::new(ConcurrencyGate::new(1, 0));
        let host: IpAddr = "127.0.0.1".parse().unwrap();

        let first = gate.acquire(host).await;
        let gate2 = gate.clone();
        let handle = tokio::spawn(async move {
            let _second = gate2.acquire(host).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(first);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn per_host_gate_is_independent_per_host() {
        let gate = ConcurrencyGate::new(10, 1);
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();

        let _guard_a = gate.acquire(a).await;
        let _guard_b = gate.acquire(b).await;
    }
}
