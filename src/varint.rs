//! VarInt codec (C1): the length-prefixed variable integer used by every
//! SLP packet. Seven data bits per byte, little-endian, MSB set while more
//! bytes follow.

use crate::error::ProtocolError;
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_VARINT_BYTES: usize = 5;

/// Appends the VarInt encoding of `val` to `buf`.
pub fn write_varint(mut val: i32, buf: &mut Vec<u8>) {
    loop {
        if (val & !0x7F) == 0 {
            buf.push(val as u8);
            return;
        }
        buf.push(((val & 0x7F) | 0x80) as u8);
        val = ((val as u32) >> 7) as i32;
    }
}

/// Decodes a VarInt from the front of `buf`, returning `(value, bytes_read)`.
pub fn read_varint(buf: &[u8]) -> Result<(i32, usize), ProtocolError> {
    let mut result: i32 = 0;
    for (num_read, &byte) in buf.iter().enumerate() {
        if num_read >= MAX_VARINT_BYTES {
            return Err(ProtocolError::VarIntOverflow);
        }
        let val = (byte & 0x7F) as i32;
        result |= val << (7 * num_read);
        if byte & 0x80 == 0 {
            return Ok((result, num_read + 1));
        }
    }
    Err(ProtocolError::Truncated {
        expected: 1,
        got: 0,
    })
}

/// Reads a VarInt directly off an async byte stream, one byte at a time.
pub async fn read_varint_async<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<i32, ProtocolError> {
    let mut result: i32 = 0;
    for num_read in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        reader
            .read_exact(&mut byte)
            .await
            .map_err(|_| ProtocolError::Truncated {
                expected: 1,
                got: 0,
            })?;
        let val = (byte[0] & 0x7F) as i32;
        result |= val << (7 * num_read);
        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(ProtocolError::VarIntOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_across_range() {
        for n in [0, 1, 2, 127, 128, 255, 300, 2_097_151, 2_097_152, i32::MAX] {
            let mut buf = Vec::new();
            write_varint(n, &mut buf);
            assert!(buf.len() <= 5);
            let (decoded, used) = read_varint(&buf).unwrap();
            assert_eq!(decoded, n);
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn rejects_six_byte_varint() {
        let buf = [0xFFu8, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert_eq!(read_varint(&buf), Err(ProtocolError::VarIntOverflow));
    }

    #[tokio::test]
    async fn async_reader_matches_buffer_reader() {
        let mut buf = Vec::new();
        write_varint(123456, &mut buf);
        let mut cursor = std::io::Cursor::new(buf.clone());
        let v = read_varint_async(&mut cursor).await.unwrap();
        assert_eq!(v, 123456);
    }
}
