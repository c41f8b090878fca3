//! Software classification and online-mode heuristics.

use crate::model::{OnlineMode, ServerSoftware};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const KEYWORD_ORDER: &[(&str, ServerSoftware)] = &[
    ("purpur", ServerSoftware::Purpur),
    ("folia", ServerSoftware::Folia),
    ("pufferfish", ServerSoftware::Pufferfish),
    ("paper", ServerSoftware::Paper),
    ("spigot", ServerSoftware::Spigot),
    ("craftbukkit", ServerSoftware::Bukkit),
    ("bukkit", ServerSoftware::Bukkit),
    ("fabric", ServerSoftware::Fabric),
    ("quilt", ServerSoftware::Quilt),
    ("velocity", ServerSoftware::Velocity),
    ("bungeecord", ServerSoftware::BungeeCord),
    ("waterfall", ServerSoftware::Waterfall),
    ("forge", ServerSoftware::Forge),
    ("fml", ServerSoftware::Forge),
];

fn vanilla_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^1\.\d+(\.\d+)?$").unwrap())
}

/// Classifies server software from the status JSON and the already-cleaned
/// MOTD, following a fixed keyword priority cascade.
pub fn classify_software(json: &Value, version_name: &str, motd_clean: &str) -> ServerSoftware {
    if json.get("forgeData").is_some() || json.get("modinfo").is_some() {
        if version_name.to_lowercase().contains("neoforge") {
            return ServerSoftware::NeoForge;
        }
        return ServerSoftware::Forge;
    }

    let explicit_modded = json
        .get("isModded")
        .and_then(Value::as_bool)
        .or_else(|| json.get("modded").and_then(Value::as_bool))
        .unwrap_or(false);
    if explicit_modded {
        return ServerSoftware::NeoForge;
    }

    let lower_version = version_name.to_lowercase();
    for (keyword, software) in KEYWORD_ORDER {
        if lower_version.contains(keyword) {
            return *software;
        }
    }

    let lower_motd = motd_clean.to_lowercase();
    for (keyword, software) in KEYWORD_ORDER {
        if lower_motd.contains(keyword) {
            return *software;
        }
    }

    if vanilla_version_re().is_match(version_name) {
        return ServerSoftware::Vanilla;
    }

    ServerSoftware::Unknown
}

const OFFLINE_KEYWORDS: &[&str] = &[
    "cracked",
    "offline",
    "no premium",
    "no-premium",
    "pirate",
    "tlauncher",
    "free",
    "non-premium",
];

/// Online-mode heuristic: `unknown` is the expected common case, not a
/// failure of the heuristic.
pub fn determine_online_mode(json: &Value, motd_clean: &str) -> OnlineMode {
    if let Some(online_mode) = json.get("onlineMode").and_then(Value::as_bool) {
        return if online_mode {
            OnlineMode::Online
        } else {
            OnlineMode::Offline
        };
    }
    if json.get("enforcesSecureChat").and_then(Value::as_bool) == Some(true) {
        return OnlineMode::Online;
    }
    if json.get("preventsChatReports").and_then(Value::as_bool) == Some(true) {
        return OnlineMode::Offline;
    }
    let lower_motd = motd_clean.to_lowercase();
    if OFFLINE_KEYWORDS.iter().any(|kw| lower_motd.contains(kw)) {
        return OnlineMode::Offline;
    }
    OnlineMode::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vanilla_version_is_recognized() {
        let json = json!({});
        assert_eq!(
            classify_software(&json, "1.21", ""),
            ServerSoftware::Vanilla
        );
    }

    #[test]
    fn forge_data_wins_over_motd() {
        let json = json!({"forgeData": {"mods": []}});
        assert_eq!(
            classify_software(&json, "1.20.1-forge-47.2.0", "totally vanilla"),
            ServerSoftware::Forge
        );
    }

    #[test]
    fn motd_keyword_detects_paper() {
        let json = json!({});
        assert_eq!(
            classify_software(&json, "1.20.4", "Paper server"),
            ServerSoftware::Paper
        );
    }

    #[test]
    fn unknown_version_with_no_keywords() {
        let json = json!({});
        assert_eq!(
            classify_software(&json, "some custom build", ""),
            ServerSoftware::Unknown
        );
    }

    #[test]
    fn online_mode_defaults_to_unknown() {
        let json = json!({});
        assert_eq!(determine_online_mode(&json, ""), OnlineMode::Unknown);
    }

    #[test]
    fn online_mode_from_secure_chat() {
        let json = json!({"enforcesSecureChat": true});
        assert_eq!(determine_online_mode(&json, ""), OnlineMode::Online);
    }

    #[test]
    fn online_mode_from_motd_keyword() {
        let json = json!({});
        assert_eq!(
            determine_online_mode(&json, "this server is cracked"),
            OnlineMode::Offline
        );
    }
}
