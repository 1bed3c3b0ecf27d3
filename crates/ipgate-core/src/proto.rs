//! Control-plane wire protocol.
//!
//! Wire format: `[1-byte command tag][fixed-size payload]`. The only
//! defined command is `Authenticate` (tag `0`): a 4-byte IPv4 address
//! followed by a 4-byte unsigned duration in seconds, both in network
//! byte order. The seconds field is big-endian on the wire by definition
//! here; relying on host order would make the protocol unportable.
//!
//! The protocol has no length framing. An unrecognized tag carries no
//! payload by definition, so the byte after it is read as the next tag;
//! extending the command set without adding length prefixes would
//! permanently desynchronize any connection whose peer speaks the newer
//! command table.

use crate::error::{GateError, GateResult};
use std::net::Ipv4Addr;

/// Command tag for [`Authenticate`].
pub const TAG_AUTHENTICATE: u8 = 0;

/// Size of the payload following an Authenticate tag byte.
pub const AUTHENTICATE_PAYLOAD_LEN: usize = 8;

/// Authenticate command: whitelist `ip` for `seconds` from receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticate {
    pub ip: Ipv4Addr,
    pub seconds: u32,
}

impl Authenticate {
    /// Encode as a complete wire command (tag byte plus payload).
    pub fn encode(&self) -> [u8; 1 + AUTHENTICATE_PAYLOAD_LEN] {
        let mut out = [0u8; 1 + AUTHENTICATE_PAYLOAD_LEN];
        out[0] = TAG_AUTHENTICATE;
        out[1..5].copy_from_slice(&self.ip.octets());
        out[5..9].copy_from_slice(&self.seconds.to_be_bytes());
        out
    }

    /// Decode from the fixed-size payload that follows the tag byte.
    pub fn decode(payload: &[u8]) -> GateResult<Self> {
        if payload.len() != AUTHENTICATE_PAYLOAD_LEN {
            return Err(GateError::Protocol(format!(
                "authenticate payload is {} bytes, expected {}",
                payload.len(),
                AUTHENTICATE_PAYLOAD_LEN
            )));
        }
        let ip = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
        let seconds = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        Ok(Self { ip, seconds })
    }
}
