//! Target generator (C5): a lazy, finite, non-restartable stream of
//! `(ip, port)` pairs produced from a CIDR range, a target file, or an
//! external port scanner's greppable output.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use ipnet::IpNet;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub enum TargetSpec {
    Range { cidr: IpNet, ports: Vec<u16> },
    File { path: PathBuf, ports: Vec<u16> },
    External { command: String, args: Vec<String> },
}

/// Best-effort count of how many targets a spec will produce, for progress
/// reporting only.
pub fn estimate(spec: &TargetSpec) -> Option<u64> {
    match spec {
        TargetSpec::Range { cidr, ports } => {
            let hosts = cidr.hosts().count().max(1) as u64;
            Some(hosts * ports.len().max(1) as u64)
        }
        TargetSpec::File { path, ports } => {
            let lines = std::fs::read_to_string(path).ok()?.lines().count() as u64;
            Some(lines * ports.len().max(1) as u64)
        }
        TargetSpec::External { .. } => None,
    }
}

/// Spawns a background task that drives `spec` and yields targets on the
/// returned channel, cooperatively yielding every `batch_size` targets so
/// a coordinator polling for pause/stop state isn't starved.
pub fn generate(spec: TargetSpec, batch_size: Option<usize>) -> mpsc::Receiver<(IpAddr, u16)> {
    let batch_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1);
    let (tx, rx) = mpsc::channel(batch_size);

    tokio::spawn(async move {
        match spec {
            TargetSpec::Range { cidr, ports } => generate_range(cidr, ports, batch_size, tx).await,
            TargetSpec::File { path, ports } => generate_file(path, ports, batch_size, tx).await,
            TargetSpec::External { command, args } => {
                generate_external(command, args, batch_size, tx).await
            }
        }
    });

    rx
}

async fn generate_range(
    cidr: IpNet,
    ports: Vec<u16>,
    batch_size: usize,
    tx: mpsc::Sender<(IpAddr, u16)>,
) {
    let mut emitted = 0usize;
    // host iteration of a /32 (or /128) yields the single address itself.
    for host in cidr.hosts() {
        for &port in &ports {
            if tx.send((host, port)).await.is_err() {
                return;
            }
            emitted += 1;
            if emitted % batch_size == 0 {
                tokio::task::yield_now().await;
            }
        }
    }
}

async fn generate_file(
    path: PathBuf,
    default_ports: Vec<u16>,
    batch_size: usize,
    tx: mpsc::Sender<(IpAddr, u16)>,
) {
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to read target file {}: {}", path.display(), e);
            return;
        }
    };

    let mut emitted = 0usize;
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_file_entry(line, &default_ports) {
            Ok(targets) => {
                for target in targets {
                    if tx.send(target).await.is_err() {
                        return;
                    }
                    emitted += 1;
                    if emitted % batch_size == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }
            Err(e) => {
                log::warn!(
                    "{}:{}: skipping invalid target entry {:?}: {}",
                    path.display(),
                    lineno + 1,
                    line,
                    e
                );
            }
        }
    }
}

fn parse_file_entry(line: &str, default_ports: &[u16]) -> Result<Vec<(IpAddr, u16)>> {
    if let Some((ip_str, port_str)) = line.rsplit_once(':') {
        let ip: IpAddr = ip_str.parse().context("invalid ip")?;
        let port: u16 = port_str.parse().context("invalid port")?;
        Ok(vec![(ip, port)])
    } else {
        let ip: IpAddr = line.parse().context("invalid ip")?;
        Ok(default_ports.iter().map(|&p| (ip, p)).collect())
    }
}

/// Parses `masscan`/`nmap`-style greppable output: `Host: <ip> () Ports:
/// <port>/open/tcp//...`.
async fn generate_external(
    command: String,
    args: Vec<String>,
    batch_size: usize,
    tx: mpsc::Sender<(IpAddr, u16)>,
) {
    let mut child = match Command::new(&command)
        .args(&args)
        .stdout(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to spawn external scanner {}: {}", command, e);
            return;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        return;
    };
    let mut lines = BufReader::new(stdout).lines();

    let mut emitted = 0usize;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(target) = parse_greppable_line(&line) {
                    if tx.send(target).await.is_err() {
                        break;
                    }
                    emitted += 1;
                    if emitted % batch_size == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("external scanner output error: {}", e);
                break;
            }
        }
    }

    let _ = child.wait().await;
}

fn parse_greppable_line(line: &str) -> Option<(IpAddr, u16)> {
    let host_idx = line.find("Host: ")?;
    let rest = &line[host_idx + "Host: ".len()..];
    let ip_str = rest.split_whitespace().next()?;
    let ip: IpAddr = ip_str.parse().ok()?;

    let ports_idx = line.find("Ports: ")?;
    let ports_rest = &line[ports_idx + "Ports: ".len()..];
    let port_field = ports_rest.split(',').next()?;
    let port_str = port_field.split('/').next()?;
    let port: u16 = port_str.trim().parse().ok()?;

    Some((ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_greppable_host_and_port() {
        let line = "Host: 203.0.113.5 () Ports: 25565/open/tcp//minecraft//";
        let (ip, port) = parse_greppable_line(line).unwrap();
        assert_eq!(ip.to_string(), "203.0.113.5");
        assert_eq!(port, 25565);
    }

    #[test]
    fn parses_file_entry_ip_only() {
        let entries = parse_file_entry("203.0.113.5", &[25565, 25566]).unwrap();
        assert_eq!(entries, vec![
            ("203.0.113.5".parse().unwrap(), 25565),
            ("203.0.113.5".parse().unwrap(), 25566),
        ]);
    }

    #[test]
    fn parses_file_entry_ip_port() {
        let entries = parse_file_entry("203.0.113.5:25565", &[1, 2]).unwrap();
        assert_eq!(entries, vec![("203.0.113.5".parse().unwrap(), 25565)]);
    }

    #[tokio::test]
    async fn slash_32_emits_single_host() {
        let cidr: IpNet = "203.0.113.5/32".parse().unwrap();
        let mut rx = generate(
            TargetSpec::Range {
                cidr,
                ports: vec![25565],
            },
            None,
        );
        let target = rx.recv().await.unwrap();
        assert_eq!(target, ("203.0.113.5".parse().unwrap(), 25565));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn estimate_range_multiplies_hosts_by_ports() {
        let cidr: IpNet = "203.0.113.0/30".parse().unwrap();
        let spec = TargetSpec::Range {
            cidr,
            ports: vec![25565, 25566],
        };
        assert_eq!(estimate(&spec), Some(4));
    }
}
