//! Whitelist log records.
//!
//! The persisted whitelist is an append-only file of fixed 12-byte
//! records: a 4-byte IPv4 address followed by an 8-byte signed Unix
//! expiration time in seconds, both big-endian. An expiration of `-1`
//! marks a permanent entry. Superseded records for the same address are
//! never rewritten; replaying the file in order with last-value-wins
//! reconstructs the live map. The fields are encoded explicitly so the
//! on-disk format is independent of struct layout and host endianness.

use crate::error::{GateError, GateResult};
use std::net::Ipv4Addr;

/// Size of one record on disk.
pub const RECORD_LEN: usize = 12;

/// Expiration value marking a permanent entry.
pub const PERMANENT: i64 = -1;

/// One whitelist entry as persisted to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    pub ip: Ipv4Addr,
    /// Absolute Unix expiration in seconds; `None` = permanent.
    pub expires_at: Option<i64>,
}

impl LogRecord {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[..4].copy_from_slice(&self.ip.octets());
        out[4..].copy_from_slice(&self.expires_at.unwrap_or(PERMANENT).to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> GateResult<Self> {
        if buf.len() != RECORD_LEN {
            return Err(GateError::InvalidRecord(format!(
                "record is {} bytes, expected {}",
                buf.len(),
                RECORD_LEN
            )));
        }
        let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
        let raw = i64::from_be_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]);
        let expires_at = if raw == PERMANENT { None } else { Some(raw) };
        Ok(Self { ip, expires_at })
    }
}
