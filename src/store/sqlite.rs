//! Embedded backend: SQLite with WAL journaling, so concurrent readers
//! can run alongside the single writer.

use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::schema::{SQLITE_MIGRATIONS, CURRENT_VERSION};
use super::{store_err, GroupCounts, ScanOutcome, Store};
use crate::error::ScanResult;
use crate::model::{
    BlacklistEntry, Endpoint, EndpointKey, Location, Mod, ModType, OnlineMode, Player,
    ServerSoftware, StatusSnapshot,
};
use crate::parser::ParsedServer;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &str) -> ScanResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(store_err)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> ScanResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        for (idx, migration) in SQLITE_MIGRATIONS.iter().enumerate() {
            let version = (idx + 1) as i64;
            if version <= applied {
                continue;
            }
            let mut tx = self.pool.begin().await.map_err(store_err)?;
            sqlx::query(migration).execute(&mut *tx).await.map_err(store_err)?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            tx.commit().await.map_err(store_err)?;
        }
        debug_assert!(CURRENT_VERSION as usize <= SQLITE_MIGRATIONS.len());
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_endpoint_scan(&self, outcome: &ScanOutcome) -> ScanResult<()> {
        let ip = outcome.ip.to_string();
        let port = outcome.port as i64;
        let scan_time = outcome.scan_time.to_rfc3339();
        let success = outcome.parsed.is_some();

        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let existing = sqlx::query(
            "SELECT total_scans, successful_scans FROM endpoints WHERE ip = ? AND port = ?",
        )
        .bind(&ip)
        .bind(port)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        match existing {
            Some(row) => {
                let total: i64 = row.get("total_scans");
                let ok: i64 = row.get("successful_scans");
                let total_scans = total + 1;
                let successful_scans = ok + i64::from(success);
                let availability_pct = successful_scans as f64 / total_scans as f64 * 100.0;
                let last_online = if success { Some(scan_time.clone()) } else { None };

                sqlx::query(
                    "UPDATE endpoints SET
                       last_seen = ?,
                       last_online = COALESCE(?, last_online),
                       total_scans = ?,
                       successful_scans = ?,
                       availability_pct = ?
                     WHERE ip = ? AND port = ?",
                )
                .bind(&scan_time)
                .bind(&last_online)
                .bind(total_scans)
                .bind(successful_scans)
                .bind(availability_pct)
                .bind(&ip)
                .bind(port)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            // An endpoint row only comes into existence on a success — a
            // failure against a host we've never seen before leaves no
            // trace.
            None if success => {
                sqlx::query(
                    "INSERT INTO endpoints (ip, port, first_seen, last_seen, last_online, total_scans, successful_scans, availability_pct)
                     VALUES (?, ?, ?, ?, ?, 1, 1, 100.0)",
                )
                .bind(&ip)
                .bind(port)
                .bind(&scan_time)
                .bind(&scan_time)
                .bind(&scan_time)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            None => {}
        }

        if let Some(parsed) = &outcome.parsed {
            insert_snapshot(&mut tx, &ip, port, &scan_time, parsed).await?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn get_endpoint(
        &self,
        ip: IpAddr,
        port: u16,
    ) -> ScanResult<Option<(Endpoint, Option<StatusSnapshot>)>> {
        let ip_str = ip.to_string();
        let row = sqlx::query(
            "SELECT ip, port, first_seen, last_seen, last_online, total_scans, successful_scans, availability_pct
             FROM endpoints WHERE ip = ? AND port = ?",
        )
        .bind(&ip_str)
        .bind(port as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else { return Ok(None) };
        let endpoint = Endpoint {
            key: EndpointKey { ip, port },
            first_seen: parse_dt(row.get("first_seen")),
            last_seen: parse_dt(row.get("last_seen")),
            last_online: row
                .get::<Option<String>, _>("last_online")
                .map(|s| parse_dt(s)),
            total_scans: row.get::<i64, _>("total_scans") as u64,
            successful_scans: row.get::<i64, _>("successful_scans") as u64,
            availability_pct: row.get("availability_pct"),
        };

        let snapshot_row = sqlx::query(
            "SELECT * FROM status_snapshots WHERE ip = ? AND port = ? ORDER BY scan_time DESC LIMIT 1",
        )
        .bind(&ip_str)
        .bind(port as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let snapshot = snapshot_row.map(|r| row_to_snapshot(ip, port, &r));
        Ok(Some((endpoint, snapshot)))
    }

    async fn list_endpoints(&self, limit: i64, offset: i64) -> ScanResult<Vec<Endpoint>> {
        let rows = sqlx::query(
            "SELECT ip, port, first_seen, last_seen, last_online, total_scans, successful_scans, availability_pct
             FROM endpoints ORDER BY last_seen DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .iter()
            .map(|row| {
                let ip: IpAddr = row.get::<String, _>("ip").parse().unwrap_or(IpAddr::from([0, 0, 0, 0]));
                Endpoint {
                    key: EndpointKey {
                        ip,
                        port: row.get::<i64, _>("port") as u16,
                    },
                    first_seen: parse_dt(row.get("first_seen")),
                    last_seen: parse_dt(row.get("last_seen")),
                    last_online: row
                        .get::<Option<String>, _>("last_online")
                        .map(|s| parse_dt(s)),
                    total_scans: row.get::<i64, _>("total_scans") as u64,
                    successful_scans: row.get::<i64, _>("successful_scans") as u64,
                    availability_pct: row.get("availability_pct"),
                }
            })
            .collect())
    }

    async fn count_endpoints(&self) -> ScanResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM endpoints")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn group_by_version(&self) -> ScanResult<GroupCounts> {
        group_by(&self.pool, "minecraft_version").await
    }

    async fn group_by_software(&self) -> ScanResult<GroupCounts> {
        group_by(&self.pool, "server_software").await
    }

    async fn group_by_online_mode(&self) -> ScanResult<GroupCounts> {
        group_by(&self.pool, "online_mode").await
    }

    async fn distinct_player_count(&self) -> ScanResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM players")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn distinct_mod_count(&self) -> ScanResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM mods")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn add_blacklist_entry(&self, entry: &BlacklistEntry) -> ScanResult<()> {
        sqlx::query(
            "INSERT INTO blacklist_entries (ip_or_cidr, reason, added_by, added_time, notes)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(ip_or_cidr) DO UPDATE SET reason = excluded.reason, notes = excluded.notes",
        )
        .bind(&entry.ip_or_cidr)
        .bind(&entry.reason)
        .bind(&entry.added_by)
        .bind(entry.added_time.to_rfc3339())
        .bind(&entry.notes)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn remove_blacklist_entry(&self, ip_or_cidr: &str) -> ScanResult<()> {
        sqlx::query("DELETE FROM blacklist_entries WHERE ip_or_cidr = ?")
            .bind(ip_or_cidr)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn list_blacklist(&self) -> ScanResult<Vec<BlacklistEntry>> {
        let rows = sqlx::query("SELECT ip_or_cidr, reason, added_by, added_time, notes FROM blacklist_entries")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows
            .iter()
            .map(|row| BlacklistEntry {
                ip_or_cidr: row.get("ip_or_cidr"),
                reason: row.get("reason"),
                added_by: row.get("added_by"),
                added_time: parse_dt(row.get("added_time")),
                notes: row.get("notes"),
            })
            .collect())
    }

    async fn upsert_location(&self, location: &Location) -> ScanResult<()> {
        sqlx::query(
            "INSERT INTO locations (ip, country_code, country_name, region, city, latitude, longitude, isp, asn, asn_description, last_updated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(ip) DO UPDATE SET
               country_code = excluded.country_code, country_name = excluded.country_name,
               region = excluded.region, city = excluded.city, latitude = excluded.latitude,
               longitude = excluded.longitude, isp = excluded.isp, asn = excluded.asn,
               asn_description = excluded.asn_description, last_updated = excluded.last_updated",
        )
        .bind(location.ip.to_string())
        .bind(&location.country_code)
        .bind(&location.country_name)
        .bind(&location.region)
        .bind(&location.city)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&location.isp)
        .bind(&location.asn)
        .bind(&location.asn_description)
        .bind(location.last_updated.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_location(&self, ip: IpAddr) -> ScanResult<Option<Location>> {
        let row = sqlx::query("SELECT * FROM locations WHERE ip = ?")
            .bind(ip.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|r| Location {
            ip,
            country_code: r.get("country_code"),
            country_name: r.get("country_name"),
            region: r.get("region"),
            city: r.get("city"),
            latitude: r.get("latitude"),
            longitude: r.get("longitude"),
            isp: r.get("isp"),
            asn: r.get("asn"),
            asn_description: r.get("asn_description"),
            last_updated: parse_dt(r.get("last_updated")),
        }))
    }

    async fn list_players(&self, limit: i64) -> ScanResult<Vec<Player>> {
        let rows = sqlx::query(
            "SELECT uuid, last_known_name, first_seen, last_seen, total_servers_seen FROM players ORDER BY last_seen DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .iter()
            .map(|r| Player {
                uuid: r.get("uuid"),
                last_known_name: r.get("last_known_name"),
                first_seen: parse_dt(r.get("first_seen")),
                last_seen: parse_dt(r.get("last_seen")),
                total_servers_seen: r.get::<i64, _>("total_servers_seen") as u64,
            })
            .collect())
    }

    async fn list_mods(&self, limit: i64) -> ScanResult<Vec<Mod>> {
        let rows = sqlx::query("SELECT mod_id, mod_name, mod_type, first_seen FROM mods ORDER BY first_seen DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows
            .iter()
            .map(|r| Mod {
                mod_id: r.get("mod_id"),
                mod_name: r.get("mod_name"),
                mod_type: parse_mod_type(r.get("mod_type")),
                first_seen: parse_dt(r.get("first_seen")),
            })
            .collect())
    }

    async fn close(&self) -> ScanResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

async fn insert_snapshot(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ip: &str,
    port: i64,
    scan_time: &str,
    parsed: &ParsedServer,
) -> ScanResult<()> {
    sqlx::query(
        "INSERT INTO status_snapshots
         (ip, port, scan_time, online_mode, latency_ms, minecraft_version, protocol_version,
          server_software, motd_raw, motd_clean, favicon_hash, max_players, online_players,
          enforces_secure_chat, prevents_chat_reports)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(ip)
    .bind(port)
    .bind(scan_time)
    .bind(parsed.online_mode.to_string())
    .bind(parsed.latency_ms)
    .bind(&parsed.version_name)
    .bind(parsed.protocol_version)
    .bind(parsed.server_software.to_string())
    .bind(&parsed.motd_raw)
    .bind(&parsed.motd_clean)
    .bind(&parsed.favicon_hash)
    .bind(parsed.max_players)
    .bind(parsed.online_players)
    .bind(parsed.enforces_secure_chat.map(i64::from))
    .bind(parsed.prevents_chat_reports.map(i64::from))
    .execute(&mut **tx)
    .await
    .map_err(store_err)?;

    if let Some(hash) = &parsed.favicon_hash {
        if let Some(data) = &parsed.favicon_data {
            sqlx::query(
                "INSERT INTO favicons (hash, data, first_seen, usage_count) VALUES (?, ?, ?, 1)
                 ON CONFLICT(hash) DO UPDATE SET usage_count = favicons.usage_count + 1",
            )
            .bind(hash)
            .bind(data)
            .bind(scan_time)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }
    }

    for m in &parsed.mods {
        sqlx::query(
            "INSERT INTO mods (mod_id, mod_name, mod_type, first_seen) VALUES (?, ?, ?, ?)
             ON CONFLICT(mod_id) DO NOTHING",
        )
        .bind(&m.mod_id)
        .bind(&m.mod_id)
        .bind(m.mod_type.to_string())
        .bind(scan_time)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "INSERT INTO server_mods (ip, port, mod_id, mod_version, detected_time) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(ip, port, mod_id) DO UPDATE SET mod_version = excluded.mod_version, detected_time = excluded.detected_time",
        )
        .bind(ip)
        .bind(port)
        .bind(&m.mod_id)
        .bind(&m.mod_version)
        .bind(scan_time)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
    }

    for entry in &parsed.players_sample {
        let seen_on_this_endpoint: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM player_sessions WHERE uuid = ? AND ip = ? AND port = ?)",
        )
        .bind(&entry.uuid)
        .bind(ip)
        .bind(port)
        .fetch_one(&mut **tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "INSERT INTO players (uuid, last_known_name, first_seen, last_seen, total_servers_seen)
             VALUES (?, ?, ?, ?, 1)
             ON CONFLICT(uuid) DO UPDATE SET
               last_known_name = excluded.last_known_name,
               last_seen = excluded.last_seen,
               total_servers_seen = players.total_servers_seen + ?",
        )
        .bind(&entry.uuid)
        .bind(&entry.name)
        .bind(scan_time)
        .bind(scan_time)
        .bind(i64::from(!seen_on_this_endpoint))
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "INSERT INTO player_sessions (uuid, ip, port, seen_time, name) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.uuid)
        .bind(ip)
        .bind(port)
        .bind(scan_time)
        .bind(&entry.name)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
    }

    Ok(())
}

async fn group_by(pool: &SqlitePool, column: &str) -> ScanResult<GroupCounts> {
    let sql = format!(
        "SELECT {column} AS label, COUNT(*) AS n FROM status_snapshots GROUP BY {column} ORDER BY n DESC"
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await.map_err(store_err)?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("label"), r.get::<i64, _>("n")))
        .collect())
}

fn parse_dt(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_mod_type(s: String) -> ModType {
    match s.as_str() {
        "fabric" => ModType::Fabric,
        "quilt" => ModType::Quilt,
        "bukkit" => ModType::Bukkit,
        "spigot" => ModType::Spigot,
        "paper" => ModType::Paper,
        "plugin" => ModType::Plugin,
        "neoforge" => ModType::NeoForge,
        _ => ModType::Forge,
    }
}

fn row_to_snapshot(ip: IpAddr, port: u16, row: &sqlx::sqlite::SqliteRow) -> StatusSnapshot {
    StatusSnapshot {
        ip,
        port,
        scan_time: parse_dt(row.get("scan_time")),
        online_mode: parse_online_mode(row.get("online_mode")),
        latency_ms: row.get("latency_ms"),
        minecraft_version: row.get("minecraft_version"),
        protocol_version: row.get("protocol_version"),
        server_software: parse_software(row.get("server_software")),
        motd_raw: row.get("motd_raw"),
        motd_clean: row.get("motd_clean"),
        favicon_hash: row.get("favicon_hash"),
        max_players: row.get("max_players"),
        online_players: row.get("online_players"),
        enforces_secure_chat: row.get::<Option<i64>, _>("enforces_secure_chat").map(|v| v != 0),
        prevents_chat_reports: row.get::<Option<i64>, _>("prevents_chat_reports").map(|v| v != 0),
    }
}

fn parse_online_mode(s: String) -> OnlineMode {
    match s.as_str() {
        "online" => OnlineMode::Online,
        "offline" => OnlineMode::Offline,
        _ => OnlineMode::Unknown,
    }
}

fn parse_software(s: String) -> ServerSoftware {
    match s.as_str() {
        "vanilla" => ServerSoftware::Vanilla,
        "paper" => ServerSoftware::Paper,
        "spigot" => ServerSoftware::Spigot,
        "bukkit" => ServerSoftware::Bukkit,
        "purpur" => ServerSoftware::Purpur,
        "folia" => ServerSoftware::Folia,
        "pufferfish" => ServerSoftware::Pufferfish,
        "forge" => ServerSoftware::Forge,
        "neoforge" => ServerSoftware::NeoForge,
        "fabric" => ServerSoftware::Fabric,
        "quilt" => ServerSoftware::Quilt,
        "velocity" => ServerSoftware::Velocity,
        "bungeecord" => ServerSoftware::BungeeCord,
        "waterfall" => ServerSoftware::Waterfall,
        _ => ServerSoftware::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EndpointKey;

    async fn temp_store() -> SqliteStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        // leak the tempdir so the file survives for the connection's lifetime
        std::mem::forget(dir);
        SqliteStore::connect(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn failed_probe_on_unseen_host_creates_no_endpoint() {
        let store = temp_store().await;
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let outcome = ScanOutcome {
            ip,
            port: 25565,
            scan_time: Utc::now(),
            parsed: None,
        };
        store.put_endpoint_scan(&outcome).await.unwrap();

        assert!(store.get_endpoint(ip, 25565).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_endpoint_round_trips() {
        let store = temp_store().await;
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let parsed = ParsedServer {
            version_name: "1.21".into(),
            protocol_version: 770,
            server_software: ServerSoftware::Vanilla,
            motd_raw: "hi".into(),
            motd_clean: "hi".into(),
            max_players: 20,
            online_players: 1,
            players_sample: vec![],
            favicon_hash: None,
            favicon_data: None,
            mods: vec![],
            online_mode: OnlineMode::Unknown,
            enforces_secure_chat: None,
            prevents_chat_reports: None,
            latency_ms: 10,
            legacy: false,
        };
        let outcome = ScanOutcome {
            ip,
            port: 25565,
            scan_time: Utc::now(),
            parsed: Some(parsed),
        };
        store.put_endpoint_scan(&outcome).await.unwrap();

        let (endpoint, snapshot) = store.get_endpoint(ip, 25565).await.unwrap().unwrap();
        assert_eq!(endpoint.key, EndpointKey { ip, port: 25565 });
        assert_eq!(endpoint.total_scans, 1);
        assert_eq!(endpoint.successful_scans, 1);
        assert!(snapshot.is_some());
    }

    #[tokio::test]
    async fn availability_pct_matches_ratio_after_mixed_scans() {
        let store = temp_store().await;
        let ip: IpAddr = "203.0.113.6".parse().unwrap();

        for success in [true, false, true] {
            let parsed = if success {
                Some(ParsedServer {
                    version_name: "1.21".into(),
                    protocol_version: 770,
                    server_software: ServerSoftware::Vanilla,
                    motd_raw: "hi".into(),
                    motd_clean: "hi".into(),
                    max_players: 20,
                    online_players: 1,
                    players_sample: vec![],
                    favicon_hash: None,
                    favicon_data: None,
                    mods: vec![],
                    online_mode: OnlineMode::Unknown,
                    enforces_secure_chat: None,
                    prevents_chat_reports: None,
                    latency_ms: 10,
                    legacy: false,
                })
            } else {
                None
            };
            store
                .put_endpoint_scan(&ScanOutcome {
                    ip,
                    port: 25565,
                    scan_time: Utc::now(),
                    parsed,
                })
                .await
                .unwrap();
        }

        let (endpoint, _) = store.get_endpoint(ip, 25565).await.unwrap().unwrap();
        assert_eq!(endpoint.total_scans, 3);
        assert_eq!(endpoint.successful_scans, 2);
        assert!((endpoint.availability_pct - 200.0 / 3.0).abs() < 0.01);
    }
}
