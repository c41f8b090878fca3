//! Status parser (C4): turns the raw JSON status document into a
//! structured `ParsedServer`.

mod classify;
mod motd;

use crate::model::{ModType, OnlineMode, ServerSoftware};
use crate::protocol::RawStatus;
use md5::{Digest, Md5};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct PlayerSampleEntry {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ParsedMod {
    pub mod_id: String,
    pub mod_version: String,
    pub mod_type: ModType,
}

#[derive(Debug, Clone)]
pub struct ParsedServer {
    pub version_name: String,
    pub protocol_version: i32,
    pub server_software: ServerSoftware,
    pub motd_raw: String,
    pub motd_clean: String,
    pub max_players: i64,
    pub online_players: i64,
    pub players_sample: Vec<PlayerSampleEntry>,
    pub favicon_hash: Option<String>,
    pub favicon_data: Option<String>,
    pub mods: Vec<ParsedMod>,
    pub online_mode: OnlineMode,
    pub enforces_secure_chat: Option<bool>,
    pub prevents_chat_reports: Option<bool>,
    pub latency_ms: i64,
    pub legacy: bool,
}

/// Parses a raw status reply into a `ParsedServer`. Defensive by
/// construction: every field read degrades to an `unknown`/default value
/// rather than failing the probe.
pub fn parse(raw: &RawStatus) -> ParsedServer {
    let json = &raw.json;

    let version_name = json
        .get("version")
        .and_then(|v| v.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string();
    let protocol_version = json
        .get("version")
        .and_then(|v| v.get("protocol"))
        .and_then(Value::as_i64)
        .map(|v| v as i32)
        .unwrap_or(-1);

    let description = json.get("description").cloned().unwrap_or(Value::Null);
    let (motd_raw, motd_clean) = motd::normalize(&description);

    let max_players = json
        .get("players")
        .and_then(|p| p.get("max"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let online_players = json
        .get("players")
        .and_then(|p| p.get("online"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let players_sample = json
        .get("players")
        .and_then(|p| p.get("sample"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|entry| {
                    let uuid = entry.get("id").and_then(Value::as_str)?.replace('-', "");
                    let name = entry
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    Some(PlayerSampleEntry { uuid, name })
                })
                .collect()
        })
        .unwrap_or_default();

    let favicon_data = json
        .get("favicon")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    let favicon_hash = favicon_data.as_ref().map(|data| {
        let bytes = data.as_bytes();
        let digest = Md5::digest(bytes);
        hex::encode(digest)
    });

    let mods = extract_mods(json);

    let server_software = classify::classify_software(json, &version_name, &motd_clean);
    let online_mode = classify::determine_online_mode(json, &motd_clean);
    let enforces_secure_chat = json.get("enforcesSecureChat").and_then(Value::as_bool);
    let prevents_chat_reports = json.get("preventsChatReports").and_then(Value::as_bool);

    ParsedServer {
        version_name,
        protocol_version,
        server_software,
        motd_raw,
        motd_clean,
        max_players,
        online_players,
        players_sample,
        favicon_hash,
        favicon_data,
        mods,
        online_mode,
        enforces_secure_chat,
        prevents_chat_reports,
        latency_ms: raw.latency_ms,
        legacy: raw.legacy,
    }
}

/// Union of every mod-list shape the status document might carry: Forge's
/// `forgeData.mods`/legacy `modinfo.modList`, NeoForge's `neoForgeData.mods`,
/// Fabric's `fabricMods`, and Bukkit/Spigot `plugins`.
fn extract_mods(json: &Value) -> Vec<ParsedMod> {
    let mut mods = Vec::new();

    if let Some(list) = json.get("forgeData").and_then(|d| d.get("mods")) {
        collect_entries(list, "modId", "version", ModType::Forge, &mut mods);
    }
    if let Some(list) = json.get("modinfo").and_then(|d| d.get("modList")) {
        collect_entries(list, "modid", "modmarker", ModType::Forge, &mut mods);
    }
    if let Some(list) = json.get("neoForgeData").and_then(|d| d.get("mods")) {
        collect_entries(list, "modId", "version", ModType::NeoForge, &mut mods);
    }
    if let Some(list) = json.get("fabricMods").and_then(Value::as_array) {
        for entry in list {
            let mod_id = entry
                .get("modId")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let mod_version = entry
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            mods.push(ParsedMod {
                mod_id,
                mod_version,
                mod_type: ModType::Fabric,
            });
        }
    }
    if let Some(list) = json.get("plugins").and_then(Value::as_array) {
        for entry in list {
            let name = entry
                .as_str()
                .map(str::to_string)
                .or_else(|| {
                    entry
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "unknown".to_string());
            mods.push(ParsedMod {
                mod_id: name,
                mod_version: String::new(),
                mod_type: ModType::Plugin,
            });
        }
    }

    mods
}

fn collect_entries(
    list: &Value,
    id_field: &str,
    version_field: &str,
    mod_type: ModType,
    out: &mut Vec<ParsedMod>,
) {
    let Some(arr) = list.as_array() else {
        return;
    };
    for entry in arr {
        let mod_id = entry
            .get(id_field)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let mod_version = entry
            .get(version_field)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        out.push(ParsedMod {
            mod_id,
            mod_version,
            mod_type,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(json: Value) -> RawStatus {
        RawStatus {
            json,
            latency_ms: 12,
            protocol_version_used: 770,
            legacy: false,
        }
    }

    #[test]
    fn modern_success_scenario() {
        let parsed = parse(&raw(json!({
            "version": {"name": "1.21", "protocol": 770},
            "players": {"max": 20, "online": 3, "sample": []},
            "description": "Welcome",
        })));
        assert_eq!(parsed.version_name, "1.21");
        assert_eq!(parsed.protocol_version, 770);
        assert_eq!(parsed.server_software, ServerSoftware::Vanilla);
        assert_eq!(parsed.motd_clean, "Welcome");
        assert_eq!(parsed.max_players, 20);
        assert_eq!(parsed.online_players, 3);
        assert_eq!(parsed.online_mode, OnlineMode::Unknown);
    }

    #[test]
    fn forge_mods_scenario() {
        let parsed = parse(&raw(json!({
            "version": {"name": "1.20.1-forge-47.2.0", "protocol": 763},
            "players": {"max": 20, "online": 0},
            "description": "",
            "forgeData": {"mods": [
                {"modId": "jei", "version": "15.2"},
                {"modId": "jade", "version": "11.0"},
            ]},
        })));
        assert_eq!(parsed.server_software, ServerSoftware::Forge);
        assert_eq!(parsed.mods.len(), 2);
        assert!(parsed.mods.iter().all(|m| m.mod_type == ModType::Forge));
    }

    #[test]
    fn paper_via_motd_scenario() {
        let parsed = parse(&raw(json!({
            "version": {"name": "1.20.4", "protocol": 765},
            "players": {"max": 20, "online": 0},
            "description": {"extra": [{"text": "Paper server", "color": "gold"}], "text": ""},
        })));
        assert_eq!(parsed.server_software, ServerSoftware::Paper);
        assert_eq!(parsed.motd_clean, "Paper server");
        assert!(parsed.motd_raw.contains("Paper server"));
    }

    #[test]
    fn missing_version_degrades_to_unknown() {
        let parsed = parse(&raw(json!({})));
        assert_eq!(parsed.version_name, "Unknown");
        assert_eq!(parsed.protocol_version, -1);
    }
}
