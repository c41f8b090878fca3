//! Networked backend: PostgreSQL, same capability contract as
//! `SqliteStore`.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::schema::POSTGRES_MIGRATIONS;
use super::{store_err, GroupCounts, ScanOutcome, Store};
use crate::error::ScanResult;
use crate::model::{
    BlacklistEntry, Endpoint, EndpointKey, Location, Mod, ModType, OnlineMode, Player,
    ServerSoftware, StatusSnapshot,
};
use crate::parser::ParsedServer;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str, pool_size: u32) -> ScanResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect(url)
            .await
            .map_err(store_err)?;
        let store = PostgresStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> ScanResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (version BIGINT PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        for (idx, migration) in POSTGRES_MIGRATIONS.iter().enumerate() {
            let version = (idx + 1) as i64;
            if version <= applied {
                continue;
            }
            let mut tx = self.pool.begin().await.map_err(store_err)?;
            sqlx::query(migration).execute(&mut *tx).await.map_err(store_err)?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES ($1, $2)")
                .bind(version)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            tx.commit().await.map_err(store_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn put_endpoint_scan(&self, outcome: &ScanOutcome) -> ScanResult<()> {
        let ip = outcome.ip.to_string();
        let port = outcome.port as i32;
        let success = outcome.parsed.is_some();

        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let existing = sqlx::query(
            "SELECT total_scans, successful_scans FROM endpoints WHERE ip = $1 AND port = $2",
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
                let last_online = success.then_some(outcome.scan_time);

                sqlx::query(
                    "UPDATE endpoints SET
                       last_seen = $1,
                       last_online = COALESCE($2, last_online),
                       total_scans = $3,
                       successful_scans = $4,
                       availability_pct = $5
                     WHERE ip = $6 AND port = $7",
                )
                .bind(outcome.scan_time)
                .bind(last_online)
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
                     VALUES ($1, $2, $3, $4, $5, 1, 1, 100.0)",
                )
                .bind(&ip)
                .bind(port)
                .bind(outcome.scan_time)
                .bind(outcome.scan_time)
                .bind(outcome.scan_time)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            None => {}
        }

        if let Some(parsed) = &outcome.parsed {
            insert_snapshot(&mut tx, &ip, port, outcome.scan_time, parsed).await?;
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
             FROM endpoints WHERE ip = $1 AND port = $2",
        )
        .bind(&ip_str)
        .bind(port as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else { return Ok(None) };
        let endpoint = Endpoint {
            key: EndpointKey { ip, port },
            first_seen: row.get("first_seen"),
            last_seen: row.get("last_seen"),
            last_online: row.get("last_online"),
            total_scans: row.get::<i64, _>("total_scans") as u64,
            successful_scans: row.get::<i64, _>("successful_scans") as u64,
            availability_pct: row.get("availability_pct"),
        };

        let snapshot_row = sqlx::query(
            "SELECT * FROM status_snapshots WHERE ip = $1 AND port = $2 ORDER BY scan_time DESC LIMIT 1",
        )
        .bind(&ip_str)
        .bind(port as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let snapshot = snapshot_row.map(|r| row_to_snapshot(ip, port, &r));
        Ok(Some((endpoint, snapshot)))
    }

    async fn list_endpoints(&self, limit: i64, offset: i64) -> ScanResult<Vec<Endpoint>> {
        let rows = sqlx::query(
            "SELECT ip, port, first_seen, last_seen, last_online, total_scans, successful_scans, availability_pct
             FROM endpoints ORDER BY last_seen DESC LIMIT $1 OFFSET $2",
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
                        port: row.get::<i32, _>("port") as u16,
                    },
                    first_seen: row.get("first_seen"),
                    last_seen: row.get("last_seen"),
                    last_online: row.get("last_online"),
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
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT(ip_or_cidr) DO UPDATE SET reason = excluded.reason, notes = excluded.notes",
        )
        .bind(&entry.ip_or_cidr)
        .bind(&entry.reason)
        .bind(&entry.added_by)
        .bind(entry.added_time)
        .bind(&entry.notes)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn remove_blacklist_entry(&self, ip_or_cidr: &str) -> ScanResult<()> {
        sqlx::query("DELETE FROM blacklist_entries WHERE ip_or_cidr = $1")
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
                added_time: row.get("added_time"),
                notes: row.get("notes"),
            })
            .collect())
    }

    async fn upsert_location(&self, location: &Location) -> ScanResult<()> {
        sqlx::query(
            "INSERT INTO locations (ip, country_code, country_name, region, city, latitude, longitude, isp, asn, asn_description, last_updated)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
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
        .bind(location.last_updated)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_location(&self, ip: IpAddr) -> ScanResult<Option<Location>> {
        let row = sqlx::query("SELECT * FROM locations WHERE ip = $1")
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
            last_updated: r.get("last_updated"),
        }))
    }

    async fn list_players(&self, limit: i64) -> ScanResult<Vec<Player>> {
        let rows = sqlx::query(
            "SELECT uuid, last_known_name, first_seen, last_seen, total_servers_seen FROM players ORDER BY last_seen DESC LIMIT $1",
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
                first_seen: r.get("first_seen"),
                last_seen: r.get("last_seen"),
                total_servers_seen: r.get::<i64, _>("total_servers_seen") as u64,
            })
            .collect())
    }

    async fn list_mods(&self, limit: i64) -> ScanResult<Vec<Mod>> {
        let rows = sqlx::query("SELECT mod_id, mod_name, mod_type, first_seen FROM mods ORDER BY first_seen DESC LIMIT $1")
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
                first_seen: r.get("first_seen"),
            })
            .collect())
    }

    async fn close(&self) -> ScanResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

async fn insert_snapshot(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ip: &str,
    port: i32,
    scan_time: DateTime<Utc>,
    parsed: &ParsedServer,
) -> ScanResult<()> {
    sqlx::query(
        "INSERT INTO status_snapshots
         (ip, port, scan_time, online_mode, latency_ms, minecraft_version, protocol_version,
          server_software, motd_raw, motd_clean, favicon_hash, max_players, online_players,
          enforces_secure_chat, prevents_chat_reports)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
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
    .bind(parsed.enforces_secure_chat)
    .bind(parsed.prevents_chat_reports)
    .execute(&mut **tx)
    .await
    .map_err(store_err)?;

    if let Some(hash) = &parsed.favicon_hash {
        if let Some(data) = &parsed.favicon_data {
            sqlx::query(
                "INSERT INTO favicons (hash, data, first_seen, usage_count) VALUES ($1, $2, $3, 1)
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
            "INSERT INTO mods (mod_id, mod_name, mod_type, first_seen) VALUES ($1, $2, $3, $4)
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
            "INSERT INTO server_mods (ip, port, mod_id, mod_version, detected_time) VALUES ($1, $2, $3, $4, $5)
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
            "SELECT EXISTS(SELECT 1 FROM player_sessions WHERE uuid = $1 AND ip = $2 AND port = $3)",
        )
        .bind(&entry.uuid)
        .bind(ip)
        .bind(port)
        .fetch_one(&mut **tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "INSERT INTO players (uuid, last_known_name, first_seen, last_seen, total_servers_seen)
             VALUES ($1, $2, $3, $4, 1)
             ON CONFLICT(uuid) DO UPDATE SET
               last_known_name = excluded.last_known_name,
               last_seen = excluded.last_seen,
               total_servers_seen = players.total_servers_seen + $5",
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
            "INSERT INTO player_sessions (uuid, ip, port, seen_time, name) VALUES ($1, $2, $3, $4, $5)",
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

async fn group_by(pool: &PgPool, column: &str) -> ScanResult<GroupCounts> {
    let sql = format!(
        "SELECT {column} AS label, COUNT(*) AS n FROM status_snapshots GROUP BY {column} ORDER BY n DESC"
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await.map_err(store_err)?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("label"), r.get::<i64, _>("n")))
        .collect())
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

fn row_to_snapshot(ip: IpAddr, port: u16, row: &sqlx::postgres::PgRow) -> StatusSnapshot {
    StatusSnapshot {
        ip,
        port,
        scan_time: row.get("scan_time"),
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
        enforces_secure_chat: row.get("enforces_secure_chat"),
        prevents_chat_reports: row.get("prevents_chat_reports"),
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
