//! MOTD normalization: turns the `description` field — a string, a
//! rich-text object, or a list of either — into a raw form (serialized
//! verbatim) and a clean, plain-text form.

use serde_json::Value;

const MAX_DEPTH: u32 = 10;

/// Legacy formatting-code table.
fn legacy_code(name: &str) -> Option<char> {
    Some(match name {
        "black" => '0',
        "dark_blue" => '1',
        "dark_green" => '2',
        "dark_aqua" => '3',
        "dark_red" => '4',
        "dark_purple" => '5',
        "gold" => '6',
        "gray" => '7',
        "dark_gray" => '8',
        "blue" => '9',
        "green" => 'a',
        "aqua" => 'b',
        "red" => 'c',
        "light_purple" => 'd',
        "yellow" => 'e',
        "white" => 'f',
        _ => return None,
    })
}

/// Approximates a `#rrggbb` hex color with the nearest legacy code, using
/// simple RGB-channel dominance.
fn hex_to_legacy(hex: &str) -> Option<char> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;

    if r > 200 && g > 200 && b > 200 {
        return Some('f');
    }
    if r < 50 && g < 50 && b < 50 {
        return Some('0');
    }
    let bright = 150;
    if r >= g && r >= b {
        return Some(if r > bright { 'c' } else { '4' });
    }
    if g >= r && g >= b {
        return Some(if g > bright { 'a' } else { '2' });
    }
    if b >= r && b >= g {
        return Some(if b > bright { '9' } else { '1' });
    }
    Some('7')
}

/// Returns `(motd_raw, motd_clean)`.
pub fn normalize(description: &Value) -> (String, String) {
    let raw = match description {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut out = String::new();
    walk(description, &mut out, 0);
    let clean = strip_legacy_and_ampersand_codes(&out);
    let clean = collapse_whitespace(&clean);
    (raw, clean)
}

/// Recursively walks `extra`/`with` chains, appending plain text plus any
/// legacy color codes implied by `color`.
fn walk(value: &Value, out: &mut String, depth: u32) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for item in items {
                walk(item, out, depth + 1);
            }
        }
        Value::Object(map) => {
            if let Some(color) = map.get("color").and_then(Value::as_str) {
                if let Some(code) = legacy_code(color).or_else(|| hex_to_legacy(color)) {
                    out.push('\u{a7}');
                    out.push(code);
                }
            }
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
            }
            if let Some(extra) = map.get("extra") {
                walk(extra, out, depth + 1);
            }
            if let Some(with) = map.get("with") {
                walk(with, out, depth + 1);
            }
        }
        _ => {}
    }
}

fn strip_legacy_and_ampersand_codes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if (c == '\u{a7}' || c == '&') && chars.peek().is_some() {
            chars.next();
            continue;
        }
        out.push(c);
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_string_round_trips() {
        let (raw, clean) = normalize(&json!("Welcome"));
        assert_eq!(raw, "Welcome");
        assert_eq!(clean, "Welcome");
    }

    #[test]
    fn strips_legacy_codes() {
        let (_raw, clean) = normalize(&json!("\u{a7}aGreen \u{a7}cRed"));
        assert_eq!(clean, "Green Red");
    }

    #[test]
    fn walks_extra_and_colors() {
        let desc = json!({
            "text": "",
            "extra": [{"text": "Paper server", "color": "gold"}],
        });
        let (_raw, clean) = normalize(&desc);
        assert_eq!(clean, "Paper server");
    }

    #[test]
    fn hex_color_approximates_white() {
        let desc = json!({"text": "hi", "color": "#ffffff"});
        let (_raw, clean) = normalize(&desc);
        assert_eq!(clean, "hi");
    }

    #[test]
    fn second_parse_of_serialized_form_is_stable() {
        let desc = json!({"text": "A", "extra": [{"text": " B", "color": "red"}]});
        let (raw1, clean1) = normalize(&desc);
        let reparsed: Value = serde_json::from_str(&raw1).unwrap();
        let (_raw2, clean2) = normalize(&reparsed);
        assert_eq!(clean1, clean2);
    }
}
