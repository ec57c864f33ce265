/*! IL2P frame encode and decode.

Glues the header and payload codecs together: an encoded frame is
the protected 15-byte header block followed by the encoded payload
blocks, if any. The 3-byte sync word is added by the transmit path
and consumed by the deframer, not here.
 */
use log::debug;

use crate::packet::Packet;
use crate::{Error, Result, il2p_header, il2p_payload};

/// Sync word marking the start of a frame on air.
pub const SYNC_WORD: u32 = 0xF15E48;

/// Sync word length in bytes.
pub const SYNC_WORD_SIZE: usize = 3;

/// Largest encoded frame, sync word excluded.
pub const MAX_ENCODED_FRAME_SIZE: usize = il2p_header::HEADER_SIZE
    + il2p_header::HEADER_PARITY
    + il2p_payload::MAX_ENCODED_PAYLOAD_SIZE;

/// Encode a frame to its on-air representation.
pub fn encode(pp: &Packet) -> Result<Vec<u8>> {
    let (hdr, info_len) = il2p_header::encode(pp)?;
    let mut out = Vec::with_capacity(
        il2p_header::HEADER_SIZE + il2p_header::HEADER_PARITY + info_len + 5 * 16,
    );
    out.extend_from_slice(&il2p_header::protect(&hdr));
    if info_len > 0 {
        out.extend_from_slice(&il2p_payload::encode(pp.info())?);
    }
    Ok(out)
}

/// Decode a frame from a clarified header and the received encoded
/// payload bytes.
///
/// `symbols_corrected` starts with the header FEC correction count
/// and accumulates payload corrections.
pub fn decode_header_payload(
    hdr: &[u8; il2p_header::HEADER_SIZE],
    epayload: &[u8],
    symbols_corrected: &mut usize,
) -> Option<Packet> {
    let payload_len = il2p_header::payload_byte_count(hdr);
    let mut pp = il2p_header::decode(hdr, *symbols_corrected)?;
    if payload_len > 0 {
        let (payload, fixed) = il2p_payload::decode(epayload, payload_len)?;
        *symbols_corrected += fixed;
        pp.set_info(&payload);
    }
    Some(pp)
}

/// Decode a whole received frame (header block plus payload blocks).
pub fn decode(received: &[u8]) -> Result<Packet> {
    let hdr_len = il2p_header::HEADER_SIZE + il2p_header::HEADER_PARITY;
    if received.len() < hdr_len {
        return Err(Error::Framing(format!(
            "frame of {} bytes is shorter than a header",
            received.len()
        )));
    }
    let (hdr, mut corrected) = il2p_header::clarify(&received[..hdr_len])
        .ok_or_else(|| Error::Framing("header failed FEC".into()))?;
    decode_header_payload(&hdr, &received[hdr_len..], &mut corrected).ok_or_else(|| {
        debug!("IL2P: header ok but frame failed to decode");
        Error::Framing("frame failed to decode".into())
    })
}

/// Expand bytes to bits, MSB first, one bit per byte.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &b in bytes {
        for k in (0..8).rev() {
            bits.push((b >> k) & 1);
        }
    }
    bits
}

/// Encode a frame to its on-air bit stream: sync word, protected
/// header, encoded payload, MSB first throughout.
pub fn encode_bits(pp: &Packet) -> Result<Vec<u8>> {
    let mut bytes = vec![
        (SYNC_WORD >> 16) as u8,
        (SYNC_WORD >> 8) as u8,
        SYNC_WORD as u8,
    ];
    bytes.extend_from_slice(&encode(pp)?);
    Ok(bytes_to_bits(&bytes))
}
