//! Blacklist (C9): exact IPs and CIDR networks consulted before every
//! probe. Loaded once from the store plus a plain-text file, with an
//! optional mtime-triggered reload.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ipnet::IpNet;

use crate::model::BlacklistEntry;

const MAX_NETWORK_SIZE: u128 = 65536;

#[derive(Debug, Default)]
struct Snapshot {
    exact: HashSet<IpAddr>,
    networks: Vec<IpNet>,
}

/// Thread-safe membership test. Evaluation order: exact match first, then
/// a linear scan of the CIDR networks.
pub struct Blacklist {
    snapshot: RwLock<Snapshot>,
    file_path: Option<PathBuf>,
    last_mtime: RwLock<Option<SystemTime>>,
    /// Raw entries loaded from the store, kept so a file reload can
    /// re-apply them after clearing the snapshot's file-sourced entries.
    store_entries: RwLock<Vec<String>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Blacklist {
            snapshot: RwLock::new(Snapshot::default()),
            file_path: None,
            last_mtime: RwLock::new(None),
            store_entries: RwLock::new(Vec::new()),
        }
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Blacklist {
            snapshot: RwLock::new(Snapshot::default()),
            file_path: Some(path.into()),
            last_mtime: RwLock::new(None),
            store_entries: RwLock::new(Vec::new()),
        }
    }

    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        let snapshot = self.snapshot.read().unwrap();
        if snapshot.exact.contains(&ip) {
            return true;
        }
        snapshot.networks.iter().any(|net| net.contains(&ip))
    }

    /// Adds a single IP or CIDR entry. Rejects networks larger than /16.
    pub fn add_entry(&self, ip_or_cidr: &str) -> Result<()> {
        if let Ok(ip) = ip_or_cidr.parse::<IpAddr>() {
            self.snapshot.write().unwrap().exact.insert(ip);
            return Ok(());
        }
        let net: IpNet = ip_or_cidr
            .parse()
            .with_context(|| format!("invalid blacklist entry: {ip_or_cidr}"))?;
        if network_size(&net) > MAX_NETWORK_SIZE {
            anyhow::bail!(
                "network {} exceeds the /16-equivalent size cap",
                ip_or_cidr
            );
        }
        self.snapshot.write().unwrap().networks.push(net);
        Ok(())
    }

    pub fn load_store_entries(&self, entries: &[BlacklistEntry]) {
        let mut stored = self.store_entries.write().unwrap();
        for entry in entries {
            if let Err(e) = self.add_entry(&entry.ip_or_cidr) {
                log::warn!("skipping stored blacklist entry {:?}: {}", entry.ip_or_cidr, e);
                continue;
            }
            stored.push(entry.ip_or_cidr.clone());
        }
    }

    /// Loads entries from the configured file, replacing only the
    /// file-sourced subset of the in-memory set: store-sourced entries
    /// (loaded separately via `load_store_entries`) are re-applied after
    /// the clear so a file reload never drops them.
    pub async fn reload_from_file(&self) -> Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let entries = parse_file(path).await?;

        {
            let mut snapshot = self.snapshot.write().unwrap();
            snapshot.exact.clear();
            snapshot.networks.clear();
        }
        for ip_or_cidr in self.store_entries.read().unwrap().iter() {
            if let Err(e) = self.add_entry(ip_or_cidr) {
                log::warn!("skipping stored blacklist entry {:?}: {}", ip_or_cidr, e);
            }
        }
        for entry in &entries {
            if let Err(e) = self.add_entry(&entry.ip_or_cidr) {
                log::warn!("skipping blacklist file entry {:?}: {}", entry.ip_or_cidr, e);
            }
        }

        if let Ok(meta) = tokio::fs::metadata(path).await {
            if let Ok(mtime) = meta.modified() {
                *self.last_mtime.write().unwrap() = Some(mtime);
            }
        }
        Ok(())
    }

    /// Returns `true` if the file's mtime has advanced since the last load.
    pub async fn file_changed(&self) -> bool {
        let Some(path) = &self.file_path else {
            return false;
        };
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return false;
        };
        let Ok(mtime) = meta.modified() else {
            return false;
        };
        *self.last_mtime.read().unwrap() != Some(mtime)
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new()
    }
}

fn network_size(net: &IpNet) -> u128 {
    match net {
        IpNet::V4(n) => 1u128 << (32 - n.prefix_len()),
        IpNet::V6(n) => 1u128 << (128 - n.prefix_len()).min(127),
    }
}

async fn parse_file(path: &Path) -> Result<Vec<BlacklistEntry>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading blacklist file {}", path.display()))?;

    let mut entries = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let Some(ip_or_cidr) = fields.first() else {
            continue;
        };
        let added_time = fields
            .get(2)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        entries.push(BlacklistEntry {
            ip_or_cidr: ip_or_cidr.to_string(),
            reason: fields.get(1).filter(|s| !s.is_empty()).map(|s| s.to_string()),
            added_by: "file".to_string(),
            added_time,
            notes: fields.get(3).filter(|s| !s.is_empty()).map(|s| s.to_string()),
        });
        let _ = lineno;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_blocks() {
        let bl = Blacklist::new();
        bl.add_entry("10.0.0.5").unwrap();
        assert!(bl.is_blocked("10.0.0.5".parse().unwrap()));
        assert!(!bl.is_blocked("10.0.0.6".parse().unwrap()));
    }

    #[test]
    fn cidr_match_blocks_whole_range() {
        let bl = Blacklist::new();
        bl.add_entry("10.0.0.0/24").unwrap();
        assert!(bl.is_blocked("10.0.0.5".parse().unwrap()));
        assert!(!bl.is_blocked("10.0.1.5".parse().unwrap()));
    }

    #[test]
    fn network_larger_than_slash_16_is_refused() {
        let bl = Blacklist::new();
        assert!(bl.add_entry("10.0.0.0/8").is_err());
        assert!(bl.add_entry("10.0.0.0/16").is_ok());
    }

    #[tokio::test]
    async fn file_reload_preserves_store_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.txt");
        tokio::fs::write(&path, "10.0.0.0/24\n").await.unwrap();

        let bl = Blacklist::with_file(&path);
        bl.reload_from_file().await.unwrap();
        bl.load_store_entries(&[BlacklistEntry {
            ip_or_cidr: "192.168.0.5".to_string(),
            reason: None,
            added_by: "operator".to_string(),
            added_time: Utc::now(),
            notes: None,
        }]);

        assert!(bl.is_blocked("10.0.0.5".parse().unwrap()));
        assert!(bl.is_blocked("192.168.0.5".parse().unwrap()));

        // Touch the file with a new mtime and reload: the store-sourced
        // entry must survive the file-sourced snapshot being rebuilt.
        tokio::fs::write(&path, "10.0.0.0/24\n203.0.113.9\n").await.unwrap();
        bl.reload_from_file().await.unwrap();

        assert!(bl.is_blocked("10.0.0.5".parse().unwrap()));
        assert!(bl.is_blocked("203.0.113.9".parse().unwrap()));
        assert!(bl.is_blocked("192.168.0.5".parse().unwrap()));
    }
}
