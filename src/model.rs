//! Entities of the data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnlineMode {
    Online,
    Offline,
    Unknown,
}

impl fmt::Display for OnlineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OnlineMode::Online => "online",
            OnlineMode::Offline => "offline",
            OnlineMode::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerSoftware {
    Vanilla,
    Paper,
    Spigot,
    Bukkit,
    Purpur,
    Folia,
    Pufferfish,
    Forge,
    NeoForge,
    Fabric,
    Quilt,
    Velocity,
    BungeeCord,
    Waterfall,
    Unknown,
}

impl fmt::Display for ServerSoftware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerSoftware::Vanilla => "vanilla",
            ServerSoftware::Paper => "paper",
            ServerSoftware::Spigot => "spigot",
            ServerSoftware::Bukkit => "bukkit",
            ServerSoftware::Purpur => "purpur",
            ServerSoftware::Folia => "folia",
            ServerSoftware::Pufferfish => "pufferfish",
            ServerSoftware::Forge => "forge",
            ServerSoftware::NeoForge => "neoforge",
            ServerSoftware::Fabric => "fabric",
            ServerSoftware::Quilt => "quilt",
            ServerSoftware::Velocity => "velocity",
            ServerSoftware::BungeeCord => "bungeecord",
            ServerSoftware::Waterfall => "waterfall",
            ServerSoftware::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModType {
    Forge,
    Fabric,
    Quilt,
    Bukkit,
    Spigot,
    Paper,
    Plugin,
    NeoForge,
}

impl fmt::Display for ModType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModType::Forge => "forge",
            ModType::Fabric => "fabric",
            ModType::Quilt => "quilt",
            ModType::Bukkit => "bukkit",
            ModType::Spigot => "spigot",
            ModType::Paper => "paper",
            ModType::Plugin => "plugin",
            ModType::NeoForge => "neoforge",
        };
        f.write_str(s)
    }
}

/// `(ip, port)` — the smallest unit of scan identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointKey {
    pub ip: std::net::IpAddr,
    pub port: u16,
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub key: EndpointKey,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_online: Option<DateTime<Utc>>,
    pub total_scans: u64,
    pub successful_scans: u64,
    pub availability_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub ip: std::net::IpAddr,
    pub port: u16,
    pub scan_time: DateTime<Utc>,
    pub online_mode: OnlineMode,
    pub latency_ms: Option<i64>,
    pub minecraft_version: String,
    pub protocol_version: i32,
    pub server_software: ServerSoftware,
    pub motd_raw: Option<String>,
    pub motd_clean: Option<String>,
    pub favicon_hash: Option<String>,
    pub max_players: i64,
    pub online_players: i64,
    pub enforces_secure_chat: Option<bool>,
    pub prevents_chat_reports: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub uuid: String,
    pub last_known_name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_servers_seen: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSession {
    pub uuid: String,
    pub ip: std::net::IpAddr,
    pub port: u16,
    pub seen_time: DateTime<Utc>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mod {
    pub mod_id: String,
    pub mod_name: String,
    pub mod_type: ModType,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMod {
    pub ip: std::net::IpAddr,
    pub port: u16,
    pub mod_id: String,
    pub mod_version: String,
    pub detected_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favicon {
    pub hash: String,
    pub data: String,
    pub first_seen: DateTime<Utc>,
    pub usage_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub ip: std::net::IpAddr,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub isp: Option<String>,
    pub asn: Option<String>,
    pub asn_description: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub ip_or_cidr: String,
    pub reason: Option<String>,
    pub added_by: String,
    pub added_time: DateTime<Utc>,
    pub notes: Option<String>,
}
