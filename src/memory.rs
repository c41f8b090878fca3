//! Memory guard (C8): periodically samples process RSS and triggers
//! gentle/force cleanup as thresholds are crossed. Never terminates the
//! process — it only signals backpressure to the coordinator.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const GENTLE_THRESHOLD: f64 = 0.80;
const FORCE_THRESHOLD: f64 = 0.95;

pub struct MemoryGuard {
    max_memory_bytes: u64,
    gc_interval: u64,
    enabled: bool,
    completed: AtomicUsize,
    backpressure: AtomicU64,
}

impl MemoryGuard {
    pub fn new(max_memory_mb: u64, gc_interval: u64, enabled: bool) -> Self {
        MemoryGuard {
            max_memory_bytes: max_memory_mb * 1024 * 1024,
            gc_interval: gc_interval.max(1),
            enabled,
            completed: AtomicUsize::new(0),
            backpressure: AtomicU64::new(0),
        }
    }

    pub fn is_backpressured(&self) -> bool {
        self.backpressure.load(Ordering::Relaxed) != 0
    }

    /// Called after every completed probe. Samples RSS every `gc_interval`
    /// calls and runs the appropriate cleanup tier.
    pub async fn on_probe_completed(&self) {
        if !self.enabled {
            return;
        }
        let count = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if count as u64 % self.gc_interval != 0 {
            return;
        }

        let Some(rss) = sample_rss_bytes() else {
            return;
        };
        let ratio = rss as f64 / self.max_memory_bytes as f64;

        if ratio >= FORCE_THRESHOLD {
            log::error!(
                "memory guard: rss/max = {:.2} >= {:.2}, forcing cleanup",
                ratio,
                FORCE_THRESHOLD
            );
            self.backpressure.store(1, Ordering::Relaxed);
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
        } else if ratio >= GENTLE_THRESHOLD {
            log::warn!(
                "memory guard: rss/max = {:.2} >= {:.2}, gentle cleanup",
                ratio,
                GENTLE_THRESHOLD
            );
            self.backpressure.store(0, Ordering::Relaxed);
            tokio::task::yield_now().await;
        } else {
            self.backpressure.store(0, Ordering::Relaxed);
        }
    }
}

/// Best-effort RSS sample. Linux-only for now; other platforms report
/// `None` and the guard simply never trips.
#[cfg(target_os = "linux")]
fn sample_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096u64;
    Some(rss_pages * page_size)
}

#[cfg(not(target_os = "linux"))]
fn sample_rss_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_guard_never_backpressures() {
        let guard = MemoryGuard::new(1, 1, false);
        for _ in 0..10 {
            guard.on_probe_completed().await;
        }
        assert!(!guard.is_backpressured());
    }

    #[tokio::test]
    async fn enabled_guard_with_huge_ceiling_stays_calm() {
        let guard = MemoryGuard::new(1024 * 1024, 1, true);
        guard.on_probe_completed().await;
        assert!(!guard.is_backpressured());
    }
}
