//! Store (C10): durable persistence behind a small capability trait, with
//! an embedded (SQLite) and a networked (PostgreSQL) backend sharing the
//! same contract.

pub mod postgres;
pub mod schema;
pub mod sqlite;

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ScanError, ScanResult};
use crate::model::{BlacklistEntry, Endpoint, Location, Mod, Player, StatusSnapshot};
use crate::parser::ParsedServer;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// One terminal scan outcome, ready to persist. `parsed` is `None` for a
/// failed probe — the endpoint aggregate still updates, but no snapshot
/// is appended.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub ip: IpAddr,
    pub port: u16,
    pub scan_time: DateTime<Utc>,
    pub parsed: Option<ParsedServer>,
}

/// Aggregate counts keyed by a label (version string, software name, ...).
pub type GroupCounts = Vec<(String, i64)>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Updates the endpoint aggregate and, if `outcome.parsed` is `Some`,
    /// appends one immutable snapshot. Atomic per `(ip, port)`.
    async fn put_endpoint_scan(&self, outcome: &ScanOutcome) -> ScanResult<()>;

    async fn get_endpoint(
        &self,
        ip: IpAddr,
        port: u16,
    ) -> ScanResult<Option<(Endpoint, Option<StatusSnapshot>)>>;

    async fn list_endpoints(&self, limit: i64, offset: i64) -> ScanResult<Vec<Endpoint>>;

    async fn count_endpoints(&self) -> ScanResult<i64>;
    async fn group_by_version(&self) -> ScanResult<GroupCounts>;
    async fn group_by_software(&self) -> ScanResult<GroupCounts>;
    async fn group_by_online_mode(&self) -> ScanResult<GroupCounts>;
    async fn distinct_player_count(&self) -> ScanResult<i64>;
    async fn distinct_mod_count(&self) -> ScanResult<i64>;

    async fn add_blacklist_entry(&self, entry: &BlacklistEntry) -> ScanResult<()>;
    async fn remove_blacklist_entry(&self, ip_or_cidr: &str) -> ScanResult<()>;
    async fn list_blacklist(&self) -> ScanResult<Vec<BlacklistEntry>>;

    async fn upsert_location(&self, location: &Location) -> ScanResult<()>;
    async fn get_location(&self, ip: IpAddr) -> ScanResult<Option<Location>>;

    async fn list_players(&self, limit: i64) -> ScanResult<Vec<Player>>;
    async fn list_mods(&self, limit: i64) -> ScanResult<Vec<Mod>>;

    async fn close(&self) -> ScanResult<()>;
}

fn store_err(e: impl std::fmt::Display) -> ScanError {
    ScanError::Store(e.to_string())
}
