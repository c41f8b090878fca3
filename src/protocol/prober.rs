//! Multi-protocol prober (C3): tries protocol versions in order, falling
//! back to a legacy ping, and emits the first success.

use std::time::Duration;

use super::legacy::legacy_ping;
use super::slp::{ping_once, SlpError, SlpErrorKind};
use super::RawStatus;

/// What the prober needs from the scanner config to run one target.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub protocol_version: i32,
    pub scan_all_protocols: bool,
    pub protocol_versions: Vec<i32>,
    pub retries: u32,
    pub legacy_support: bool,
}

/// Terminal result of probing one `(ip, port)`, already classified the way
/// the coordinator's statistics need it.
#[derive(Debug)]
pub enum ProbeOutcome {
    Success(RawStatus),
    /// Nothing ever accepted the TCP connection across every attempt and
    /// protocol version tried. Not an error: an expected outcome of unused
    /// addresses.
    NoResponse,
    /// At least one attempt had its connection accepted by the peer before
    /// failing. Counted as `NET_ERROR`/`PROTOCOL_ERROR` in the statistics.
    Error(String),
}

/// Probes `(ip, port)`, trying every configured protocol version (and, as a
/// last resort, the legacy ping) before giving up.
pub async fn probe(ip: &str, port: u16, config: &ProbeConfig) -> ProbeOutcome {
    let mut candidates = vec![config.protocol_version];
    if config.scan_all_protocols {
        for v in &config.protocol_versions {
            if !candidates.contains(v) {
                candidates.push(*v);
            }
        }
    }

    let mut ever_connected = false;
    let mut last_error: Option<String> = None;

    for version in candidates {
        match probe_one_version(ip, port, version, config).await {
            Ok(status) => return ProbeOutcome::Success(status),
            Err(err) => {
                if err.connected {
                    ever_connected = true;
                }
                last_error = Some(describe(&err));
                // PROTOCOL_ERROR is non-retried at this level too: a
                // malformed reply under one version won't be fixed by
                // retrying the same version, so we've already moved on.
            }
        }

        if !config.scan_all_protocols {
            break;
        }
    }

    if config.legacy_support {
        match legacy_ping(ip, port, config.timeout).await {
            Ok(status) => return ProbeOutcome::Success(status),
            Err(err) => {
                if err.connected {
                    ever_connected = true;
                }
                last_error = Some(describe(&err));
            }
        }
    }

    if ever_connected {
        ProbeOutcome::Error(last_error.unwrap_or_else(|| "unknown probe error".to_string()))
    } else {
        ProbeOutcome::NoResponse
    }
}

/// Runs the retry loop for a single protocol version. A `PROTOCOL_ERROR`
/// is returned immediately without retrying — retrying will not fix a
/// malformed reply from the same peer/version.
async fn probe_one_version(
    ip: &str,
    port: u16,
    protocol_version: i32,
    config: &ProbeConfig,
) -> Result<RawStatus, SlpError> {
    let mut attempt = 0u32;
    loop {
        match ping_once(ip, port, protocol_version, config.timeout).await {
            Ok(status) => return Ok(status),
            Err(err) => {
                let is_protocol_error = matches!(err.kind, SlpErrorKind::Protocol(_));
                if is_protocol_error || attempt >= config.retries {
                    return Err(err);
                }
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
            }
        }
    }
}

fn describe(err: &SlpError) -> String {
    match &err.kind {
        SlpErrorKind::Net(e) => format!("net error: {e}"),
        SlpErrorKind::Timeout => "timed out".to_string(),
        SlpErrorKind::Protocol(e) => format!("protocol error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_clones_and_debugs() {
        let cfg = ProbeConfig {
            timeout: Duration::from_secs(1),
            protocol_version: 770,
            scan_all_protocols: true,
            protocol_versions: vec![769, 47],
            retries: 2,
            legacy_support: true,
        };
        let cloned = cfg.clone();
        assert_eq!(cloned.protocol_versions, vec![769, 47]);
    }

    #[tokio::test]
    async fn no_response_when_nothing_listens() {
        // Port 0 on loopback never accepts; connect fails immediately, so
        // `connected` stays false across every candidate and legacy ping.
        let config = ProbeConfig {
            timeout: Duration::from_millis(200),
            protocol_version: 770,
            scan_all_protocols: false,
            protocol_versions: vec![],
            retries: 0,
            legacy_support: false,
        };
        let outcome = probe("127.0.0.1", 1, &config).await;
        assert!(matches!(outcome, ProbeOutcome::NoResponse));
    }
}
