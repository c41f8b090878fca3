//! One probe against `(ip, port, protocol_version)`.

use crate::error::ProtocolError;
use crate::varint::{read_varint_async, write_varint};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::RawStatus;

const HANDSHAKE_PACKET_ID: i32 = 0x00;
const STATUS_REQUEST_PACKET_ID: i32 = 0x00;
const NEXT_STATE_STATUS: i32 = 1;

/// Errors specific to a single SLP attempt, before the retry loop in
/// `prober` decides whether to keep trying.
#[derive(Debug)]
pub enum SlpErrorKind {
    Net(std::io::Error),
    Timeout,
    Protocol(ProtocolError),
}

/// A failed attempt, tagged with whether the peer ever accepted the TCP
/// connection. A `NET_ERROR` only counts against the error statistic when
/// the peer accepted — an address nothing listens on is a "no response",
/// not an error.
#[derive(Debug)]
pub struct SlpError {
    pub connected: bool,
    pub kind: SlpErrorKind,
}

impl SlpError {
    pub(crate) fn pre_connect(kind: SlpErrorKind) -> Self {
        SlpError {
            connected: false,
            kind,
        }
    }

    pub(crate) fn post_connect(kind: SlpErrorKind) -> Self {
        SlpError {
            connected: true,
            kind,
        }
    }
}

fn build_handshake_packet(ip: &str, port: u16, protocol_version: i32) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(protocol_version, &mut body);
    write_varint(ip.len() as i32, &mut body);
    body.extend_from_slice(ip.as_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(NEXT_STATE_STATUS, &mut body);

    frame_packet(HANDSHAKE_PACKET_ID, &body)
}

fn build_status_request_packet() -> Vec<u8> {
    frame_packet(STATUS_REQUEST_PACKET_ID, &[])
}

fn frame_packet(packet_id: i32, data: &[u8]) -> Vec<u8> {
    let mut inner = Vec::new();
    write_varint(packet_id, &mut inner);
    inner.extend_from_slice(data);

    let mut packet = Vec::new();
    write_varint(inner.len() as i32, &mut packet);
    packet.extend_from_slice(&inner);
    packet
}

/// Performs a single modern-protocol probe within `timeout_dur`. Does not
/// retry — that is the prober's job.
pub async fn ping_once(
    ip: &str,
    port: u16,
    protocol_version: i32,
    timeout_dur: Duration,
) -> Result<RawStatus, SlpError> {
    let deadline = Instant::now() + timeout_dur;

    let mut stream = match tokio::time::timeout_at(
        deadline.into(),
        TcpStream::connect((ip, port)),
    )
    .await
    {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(SlpError::pre_connect(SlpErrorKind::Net(e))),
        Err(_) => return Err(SlpError::pre_connect(SlpErrorKind::Timeout)),
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    timeout(remaining, exchange_status(&mut stream, ip, port, protocol_version))
        .await
        .unwrap_or(Err(SlpError::post_connect(SlpErrorKind::Timeout)))
}

async fn exchange_status(
    stream: &mut TcpStream,
    ip: &str,
    port: u16,
    protocol_version: i32,
) -> Result<RawStatus, SlpError> {
    let started = Instant::now();

    let handshake = build_handshake_packet(ip, port, protocol_version);
    stream
        .write_all(&handshake)
        .await
        .map_err(|e| SlpError::post_connect(SlpErrorKind::Net(e)))?;

    let status_request = build_status_request_packet();
    stream
        .write_all(&status_request)
        .await
        .map_err(|e| SlpError::post_connect(SlpErrorKind::Net(e)))?;

    let packet_len = read_varint_async(stream)
        .await
        .map_err(|e| SlpError::post_connect(SlpErrorKind::Protocol(e)))?;
    if packet_len <= 0 {
        return Err(SlpError::post_connect(SlpErrorKind::Protocol(
            ProtocolError::Truncated {
                expected: 1,
                got: 0,
            },
        )));
    }

    let packet_id = read_varint_async(stream)
        .await
        .map_err(|e| SlpError::post_connect(SlpErrorKind::Protocol(e)))?;
    if packet_id != 0x00 {
        return Err(SlpError::post_connect(SlpErrorKind::Protocol(
            ProtocolError::UnexpectedPacketId(packet_id),
        )));
    }

    let json_len = read_varint_async(stream)
        .await
        .map_err(|e| SlpError::post_connect(SlpErrorKind::Protocol(e)))?;
    if json_len < 0 {
        return Err(SlpError::post_connect(SlpErrorKind::Protocol(
            ProtocolError::Truncated {
                expected: 0,
                got: 0,
            },
        )));
    }

    let mut json_bytes = vec![0u8; json_len as usize];
    stream.read_exact(&mut json_bytes).await.map_err(|_| {
        SlpError::post_connect(SlpErrorKind::Protocol(ProtocolError::Truncated {
            expected: json_len as usize,
            got: 0,
        }))
    })?;

    let latency_ms = started.elapsed().as_millis() as i64;

    let json_str = std::str::from_utf8(&json_bytes)
        .map_err(|_| SlpError::post_connect(SlpErrorKind::Protocol(ProtocolError::InvalidUtf8)))?;
    let json: serde_json::Value = serde_json::from_str(json_str).map_err(|e| {
        SlpError::post_connect(SlpErrorKind::Protocol(ProtocolError::MalformedJson(
            e.to_string(),
        )))
    })?;

    Ok(RawStatus {
        json,
        latency_ms,
        protocol_version_used: protocol_version,
        legacy: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_packet_carries_fields_in_order() {
        let pkt = build_handshake_packet("127.0.0.1", 25565, 770);
        // length varint, then id varint (0), then payload.
        let (_len, off1) = crate::varint::read_varint(&pkt).unwrap();
        let (id, off2) = crate::varint::read_varint(&pkt[off1..]).unwrap();
        assert_eq!(id, 0);
        let rest = &pkt[off1 + off2..];
        let (proto, off3) = crate::varint::read_varint(rest).unwrap();
        assert_eq!(proto, 770);
        let (addr_len, off4) = crate::varint::read_varint(&rest[off3..]).unwrap();
        assert_eq!(addr_len, 9);
        let addr_start = off3 + off4;
        assert_eq!(&rest[addr_start..addr_start + 9], b"127.0.0.1");
        let port_start = addr_start + 9;
        let port = u16::from_be_bytes([rest[port_start], rest[port_start + 1]]);
        assert_eq!(port, 25565);
        let (next_state, _) = crate::varint::read_varint(&rest[port_start + 2..]).unwrap();
        assert_eq!(next_state, 1);
    }

    #[test]
    fn status_request_is_empty_body_packet_zero() {
        let pkt = build_status_request_packet();
        let (len, off1) = crate::varint::read_varint(&pkt).unwrap();
        assert_eq!(len as usize, pkt.len() - off1);
        let (id, _) = crate::varint::read_varint(&pkt[off1..]).unwrap();
        assert_eq!(id, 0);
    }
}
