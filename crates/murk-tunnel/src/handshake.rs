//! Obfuscated plaintext handshake: codec and role-split endpoints.
//!
//! One handshake is a single frame of random printable ASCII with a small
//! hex header hidden at a fixed offset:
//!
//! ```text
//! +--------+----------------+------------------------+-----------------+
//! | 1 junk | 4 hex: length  | 8 hex: masked channel  | random filler   |
//! +--------+----------------+------------------------+-----------------+
//! ```
//!
//! The channel id is XOR-masked with `(len << 16) | len` and every hex
//! character is independently upper- or lower-cased, so the header shows
//! no stable byte pattern. This is traffic shaping, not authentication;
//! anyone who knows the layout can decode it.
//!
//! The server role packs and writes one frame; the client role reads one
//! frame and rejects unless the frame length matches the advertised
//! length and the unmasked channel id is nonzero.

use bytes::Bytes;
use murk_core::defaults::{
    ACCEPT_MIN_ALIGNMENT, HANDSHAKE_HEADER_LEN, HANDSHAKE_HEADER_MAX, HANDSHAKE_MIN_ALIGNMENT,
};
use murk_core::Transmission;
use rand::Rng;

/// Decoded handshake header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Unmasked nonzero channel correlator.
    pub channel_id: u32,
    /// Advertised total frame length.
    pub frame_len: usize,
}

fn random_ascii(rng: &mut impl Rng) -> u8 {
    rng.gen_range(b' '..=b'~')
}

fn mask(frame_len: usize) -> u32 {
    let len = frame_len as u32;
    (len << 16) | len
}

/// Pack one handshake frame for `channel_id`.
///
/// The frame length is drawn uniformly from `[510, min(alignment, 4096)]`;
/// `None` if `alignment` leaves no room for that.
pub fn pack_headers(channel_id: u32, alignment: usize) -> Option<Vec<u8>> {
    if alignment < HANDSHAKE_MIN_ALIGNMENT {
        return None;
    }

    let mut rng = rand::thread_rng();
    let cap = alignment.min(HANDSHAKE_HEADER_MAX);
    let frame_len = rng.gen_range(HANDSHAKE_MIN_ALIGNMENT..=cap);

    let mut frame: Vec<u8> = (0..frame_len).map(|_| random_ascii(&mut rng)).collect();

    let header = format!("{:04X}{:08X}", frame_len, channel_id ^ mask(frame_len));
    frame[1..HANDSHAKE_HEADER_LEN].copy_from_slice(header.as_bytes());
    for byte in &mut frame[1..HANDSHAKE_HEADER_LEN] {
        *byte = if rng.gen_bool(0.5) {
            byte.to_ascii_lowercase()
        } else {
            byte.to_ascii_uppercase()
        };
    }
    // Re-randomize the byte just past the hex header so the header is not
    // followed by a predictable remnant of the original fill.
    frame[HANDSHAKE_HEADER_LEN] = random_ascii(&mut rng);

    Some(frame)
}

/// Decode the header of a received handshake frame.
///
/// Rejects frames shorter than the fixed header and advertised lengths
/// that leave no room for it. Whether the advertised length matches the
/// actual frame is the caller's check.
pub fn unpack_headers(buf: &[u8]) -> Option<Header> {
    if buf.len() < HANDSHAKE_HEADER_LEN {
        return None;
    }

    let frame_len = parse_hex(&buf[1..5])? as usize;
    if frame_len <= HANDSHAKE_HEADER_LEN {
        return None;
    }

    let raw_channel = parse_hex(&buf[5..13])?;
    Some(Header {
        channel_id: raw_channel ^ mask(frame_len),
        frame_len,
    })
}

fn parse_hex(bytes: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(bytes).ok()?;
    u32::from_str_radix(text, 16).ok()
}

/// Server half of the handshake: pack and send one frame.
///
/// Rejects a zero channel id or an `alignment` below the handshake
/// minimum before writing anything.
pub async fn handshake_server(
    transmission: &dyn Transmission,
    alignment: usize,
    channel_id: u32,
) -> bool {
    if channel_id == 0 {
        return false;
    }
    let frame = match pack_headers(channel_id, alignment) {
        Some(frame) => frame,
        None => return false,
    };
    transmission.write_frame(Bytes::from(frame)).await
}

/// Client half of the handshake: read one frame and decode it.
///
/// `None` on transport close, malformed header, a frame whose length
/// differs from the advertised one, or a zero channel id.
pub async fn handshake_client(transmission: &dyn Transmission) -> Option<u32> {
    let frame = transmission.read_frame().await?;
    let header = unpack_headers(&frame)?;
    if header.frame_len != frame.len() {
        return None;
    }
    if header.channel_id == 0 {
        return None;
    }
    Some(header.channel_id)
}

/// Server-side façade: the end that announces a channel id.
pub mod server {
    use super::*;

    /// Accept a tunneled session on `inbound`: derive the channel id via
    /// `measure`, then announce it. `None` if the alignment is too small
    /// for an accept, the measured id is zero, or the write fails.
    pub async fn accept(
        inbound: &dyn Transmission,
        alignment: usize,
        measure: impl FnOnce(&dyn Transmission) -> u32,
    ) -> Option<u32> {
        if alignment < ACCEPT_MIN_ALIGNMENT {
            return None;
        }
        let channel_id = measure(inbound);
        if channel_id == 0 {
            return None;
        }
        handshake_server(inbound, alignment, channel_id)
            .await
            .then_some(channel_id)
    }

    /// Announce an already-known channel id on `outbound`.
    pub async fn connect(
        outbound: &dyn Transmission,
        alignment: usize,
        channel_id: u32,
    ) -> Option<u32> {
        handshake_server(outbound, alignment, channel_id)
            .await
            .then_some(channel_id)
    }

    /// Fire a minimal greeting with a random channel id. Closes the
    /// transmission on failure.
    pub async fn hello(outbound: &dyn Transmission) -> bool {
        let channel_id = rand::thread_rng().gen_range(1..=i32::MAX as u32);
        let ok = handshake_server(outbound, HANDSHAKE_MIN_ALIGNMENT, channel_id).await;
        if !ok {
            outbound.close();
        }
        ok
    }
}

/// Client-side façade: the end that learns the channel id.
pub mod client {
    use super::*;

    /// Learn the channel id of an accepted session from `outbound`.
    pub async fn accept(outbound: &dyn Transmission) -> Option<u32> {
        handshake_client(outbound).await
    }

    /// Learn the channel id of a connected session from `inbound`.
    pub async fn connect(inbound: &dyn Transmission) -> Option<u32> {
        handshake_client(inbound).await
    }

    /// Consume a greeting. Closes the transmission on a malformed one.
    pub async fn hello(inbound: &dyn Transmission) -> bool {
        let ok = handshake_client(inbound).await.is_some();
        if !ok {
            inbound.close();
        }
        ok
    }
}
