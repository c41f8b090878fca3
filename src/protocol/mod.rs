//! SLP client (C2), legacy ping, and multi-protocol prober (C3).

pub mod legacy;
pub mod prober;
pub mod slp;

pub use prober::{probe, ProbeConfig, ProbeOutcome};

/// Raw shape of a successful status reply, before parsing (C4 owns the
/// structured parse — this is just "what came off the wire").
#[derive(Debug, Clone)]
pub struct RawStatus {
    pub json: serde_json::Value,
    pub latency_ms: i64,
    pub protocol_version_used: i32,
    pub legacy: bool,
}
