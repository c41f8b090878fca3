//! Legacy (1.6-style) Server List Ping: `0xFE 0x01 0xFA` MC|PingHost probe,
//! parsed out of the `0xFF` kick packet's UTF-16BE body.

use super::RawStatus;
use crate::error::ProtocolError;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::slp::{SlpError, SlpErrorKind};

/// `0xFE 0x01 0xFA` + "MC|PingHost" (UTF-16BE) + payload length + protocol
/// version + hostname length/bytes (UTF-16BE) + port. This is the fixed
/// probe byte sequence; it does not vary per target beyond host/port.
fn build_legacy_ping(host: &str, port: u16) -> Vec<u8> {
    let mut pkt = vec![0xFE, 0x01, 0xFA];

    let channel = "MC|PingHost";
    pkt.extend_from_slice(&(channel.len() as u16).to_be_bytes());
    for c in channel.encode_utf16() {
        pkt.extend_from_slice(&c.to_be_bytes());
    }

    let host_utf16: Vec<u16> = host.encode_utf16().collect();
    // payload length = 7 (protocol byte + 2 shorts + int) + 2*hostlen, as u16
    let payload_len: u16 = 7 + 2 * host_utf16.len() as u16;
    let mut rest = Vec::new();
    rest.extend_from_slice(&payload_len.to_be_bytes());
    rest.push(127u8); // protocol version placeholder byte for the legacy probe itself
    rest.extend_from_slice(&(host_utf16.len() as u16).to_be_bytes());
    for c in &host_utf16 {
        rest.extend_from_slice(&c.to_be_bytes());
    }
    rest.extend_from_slice(&(port as i32).to_be_bytes());

    pkt.extend_from_slice(&rest);
    pkt
}

pub async fn legacy_ping(
    ip: &str,
    port: u16,
    timeout_dur: Duration,
) -> Result<RawStatus, SlpError> {
    let deadline = Instant::now() + timeout_dur;

    let mut stream = match tokio::time::timeout_at(deadline.into(), TcpStream::connect((ip, port)))
        .await
    {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(SlpError::pre_connect(SlpErrorKind::Net(e))),
        Err(_) => return Err(SlpError::pre_connect(SlpErrorKind::Timeout)),
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    timeout(remaining, legacy_exchange(&mut stream, ip, port))
        .await
        .unwrap_or(Err(SlpError::post_connect(SlpErrorKind::Timeout)))
}

async fn legacy_exchange(
    stream: &mut TcpStream,
    ip: &str,
    port: u16,
) -> Result<RawStatus, SlpError> {
    let started = Instant::now();

    let probe = build_legacy_ping(ip, port);
    stream
        .write_all(&probe)
        .await
        .map_err(|e| SlpError::post_connect(SlpErrorKind::Net(e)))?;

    let mut response = vec![0u8; 4096];
    let n = stream
        .read(&mut response)
        .await
        .map_err(|e| SlpError::post_connect(SlpErrorKind::Net(e)))?;
    if n == 0 {
        return Err(SlpError::post_connect(SlpErrorKind::Protocol(
            ProtocolError::Truncated {
                expected: 1,
                got: 0,
            },
        )));
    }
    response.truncate(n);

    let latency_ms = started.elapsed().as_millis() as i64;
    let json = parse_legacy_response(&response)
        .map_err(|e| SlpError::post_connect(SlpErrorKind::Protocol(e)))?;

    Ok(RawStatus {
        json,
        latency_ms,
        protocol_version_used: -1,
        legacy: true,
    })
}

/// Parses the `0xFF` kick packet body into the same JSON shape a modern
/// status reply would carry, so the rest of the pipeline (C4) need not
/// special-case legacy servers.
fn parse_legacy_response(response: &[u8]) -> Result<serde_json::Value, ProtocolError> {
    if response.is_empty() || response[0] != 0xFF {
        return Err(ProtocolError::MalformedLegacy);
    }
    if response.len() < 3 {
        return Err(ProtocolError::MalformedLegacy);
    }
    // byte 0 = 0xFF, bytes 1-2 = u16 be string length in UTF-16 code units
    let body = &response[3..];
    if body.len() % 2 != 0 {
        return Err(ProtocolError::MalformedLegacy);
    }
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    let text = String::from_utf16(&units).map_err(|_| ProtocolError::MalformedLegacy)?;

    let parts: Vec<&str> = text.split('\u{0}').collect();
    if parts.len() < 6 {
        return Err(ProtocolError::MalformedLegacy);
    }
    // parts: ["§1", protocol, version_name, motd, online, max]
    let version_name = parts[2];
    let motd = parts[3];
    let online: i64 = parts[4].parse().map_err(|_| ProtocolError::MalformedLegacy)?;
    let max: i64 = parts[5].parse().map_err(|_| ProtocolError::MalformedLegacy)?;

    Ok(json!({
        "version": { "name": version_name, "protocol": -1 },
        "players": { "online": online, "max": max, "sample": [] },
        "description": motd,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_kick_body() {
        let version = "1.5.2";
        let motd = "A legacy MOTD";
        let text = format!("\u{a7}1\u{0}127\u{0}{version}\u{0}{motd}\u{0}3\u{0}20");
        let mut response = vec![0xFF, 0x00, 0x00];
        for unit in text.encode_utf16() {
            response.extend_from_slice(&unit.to_be_bytes());
        }
        let len = text.encode_utf16().count() as u16;
        response[1..3].copy_from_slice(&len.to_be_bytes());

        let json = parse_legacy_response(&response).unwrap();
        assert_eq!(json["version"]["name"], "1.5.2");
        assert_eq!(json["players"]["online"], 3);
        assert_eq!(json["players"]["max"], 20);
        assert_eq!(json["description"], "A legacy MOTD");
    }

    #[test]
    fn rejects_non_kick_packet() {
        let response = [0x00u8, 0x01, 0x02];
        assert!(parse_legacy_response(&response).is_err());
    }
}
