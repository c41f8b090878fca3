//! Schema definitions and migration runner. The schema is versioned
//! through a `schema_migrations(version, applied_at)` relation;
//! migrations apply in strictly increasing order, each inside its own
//! transaction. The initial schema is version 1.

pub const CURRENT_VERSION: i64 = 1;

pub const SQLITE_MIGRATIONS: &[&str] = &[SQLITE_V1];
pub const POSTGRES_MIGRATIONS: &[&str] = &[POSTGRES_V1];

const SQLITE_V1: &str = r#"
CREATE TABLE IF NOT EXISTS endpoints (
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    last_online TEXT,
    total_scans INTEGER NOT NULL DEFAULT 0,
    successful_scans INTEGER NOT NULL DEFAULT 0,
    availability_pct REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (ip, port),
    CHECK (successful_scans <= total_scans)
);

CREATE TABLE IF NOT EXISTS status_snapshots (
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    scan_time TEXT NOT NULL,
    online_mode TEXT NOT NULL,
    latency_ms INTEGER,
    minecraft_version TEXT NOT NULL,
    protocol_version INTEGER NOT NULL,
    server_software TEXT NOT NULL,
    motd_raw TEXT,
    motd_clean TEXT,
    favicon_hash TEXT,
    max_players INTEGER NOT NULL,
    online_players INTEGER NOT NULL,
    enforces_secure_chat INTEGER,
    prevents_chat_reports INTEGER,
    PRIMARY KEY (ip, port, scan_time)
);

CREATE TABLE IF NOT EXISTS players (
    uuid TEXT PRIMARY KEY,
    last_known_name TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    total_servers_seen INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS player_sessions (
    uuid TEXT NOT NULL,
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    seen_time TEXT NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mods (
    mod_id TEXT PRIMARY KEY,
    mod_name TEXT NOT NULL,
    mod_type TEXT NOT NULL,
    first_seen TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS server_mods (
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    mod_id TEXT NOT NULL,
    mod_version TEXT NOT NULL,
    detected_time TEXT NOT NULL,
    PRIMARY KEY (ip, port, mod_id)
);

CREATE TABLE IF NOT EXISTS favicons (
    hash TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS locations (
    ip TEXT PRIMARY KEY,
    country_code TEXT,
    country_name TEXT,
    region TEXT,
    city TEXT,
    latitude REAL,
    longitude REAL,
    isp TEXT,
    asn TEXT,
    asn_description TEXT,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS blacklist_entries (
    ip_or_cidr TEXT PRIMARY KEY,
    reason TEXT,
    added_by TEXT NOT NULL,
    added_time TEXT NOT NULL,
    notes TEXT
);
"#;

const POSTGRES_V1: &str = r#"
CREATE TABLE IF NOT EXISTS endpoints (
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    first_seen TIMESTAMPTZ NOT NULL,
    last_seen TIMESTAMPTZ NOT NULL,
    last_online TIMESTAMPTZ,
    total_scans BIGINT NOT NULL DEFAULT 0,
    successful_scans BIGINT NOT NULL DEFAULT 0,
    availability_pct DOUBLE PRECISION NOT NULL DEFAULT 0,
    PRIMARY KEY (ip, port),
    CHECK (successful_scans <= total_scans)
);

CREATE TABLE IF NOT EXISTS status_snapshots (
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    scan_time TIMESTAMPTZ NOT NULL,
    online_mode TEXT NOT NULL,
    latency_ms BIGINT,
    minecraft_version TEXT NOT NULL,
    protocol_version INTEGER NOT NULL,
    server_software TEXT NOT NULL,
    motd_raw TEXT,
    motd_clean TEXT,
    favicon_hash TEXT,
    max_players BIGINT NOT NULL,
    online_players BIGINT NOT NULL,
    enforces_secure_chat BOOLEAN,
    prevents_chat_reports BOOLEAN,
    PRIMARY KEY (ip, port, scan_time)
);

CREATE TABLE IF NOT EXISTS players (
    uuid TEXT PRIMARY KEY,
    last_known_name TEXT NOT NULL,
    first_seen TIMESTAMPTZ NOT NULL,
    last_seen TIMESTAMPTZ NOT NULL,
    total_servers_seen BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS player_sessions (
    uuid TEXT NOT NULL,
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    seen_time TIMESTAMPTZ NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mods (
    mod_id TEXT PRIMARY KEY,
    mod_name TEXT NOT NULL,
    mod_type TEXT NOT NULL,
    first_seen TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS server_mods (
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    mod_id TEXT NOT NULL,
    mod_version TEXT NOT NULL,
    detected_time TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (ip, port, mod_id)
);

CREATE TABLE IF NOT EXISTS favicons (
    hash TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    first_seen TIMESTAMPTZ NOT NULL,
    usage_count BIGINT NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS locations (
    ip TEXT PRIMARY KEY,
    country_code TEXT,
    country_name TEXT,
    region TEXT,
    city TEXT,
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    isp TEXT,
    asn TEXT,
    asn_description TEXT,
    last_updated TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS blacklist_entries (
    ip_or_cidr TEXT PRIMARY KEY,
    reason TEXT,
    added_by TEXT NOT NULL,
    added_time TIMESTAMPTZ NOT NULL,
    notes TEXT
);
"#;
