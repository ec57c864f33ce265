/*! IL2P deframer.

Turns the demodulated bit stream back into frames. A 24-bit shift
register is matched against the sync word with a tolerance of one
flipped bit; after that the 15 header bytes are collected and error
corrected, the header says how many encoded payload bytes follow,
and the whole thing is handed to the frame decoder.

Anything that fails FEC is silently dropped back into the search
state, since it is most likely noise that happened to look like a
sync word.
 */
use log::{debug, info};

use crate::packet::Packet;
use crate::{il2p_frame, il2p_header, il2p_payload};

const SYNC_MASK: u32 = 0x00ff_ffff;
const HEADER_BYTES: usize = il2p_header::HEADER_SIZE + il2p_header::HEADER_PARITY;

enum State {
    /// Looking for the sync word.
    Searching,
    /// Collecting the protected header.
    Header { buf: Vec<u8> },
    /// Collecting the encoded payload.
    Payload {
        hdr: [u8; il2p_header::HEADER_SIZE],
        corrected: usize,
        eplen: usize,
        buf: Vec<u8>,
    },
}

/// Bit level deframer state machine.
pub struct Il2pDeframer {
    state: State,
    acc: u32,
    bit_count: usize,
    decoded: usize,
    failed: usize,
}

impl Il2pDeframer {
    /// Create a deframer in the searching state.
    pub fn new() -> Self {
        Self {
            state: State::Searching,
            acc: 0,
            bit_count: 0,
            decoded: 0,
            failed: 0,
        }
    }

    /// Number of frames decoded so far.
    pub fn decoded(&self) -> usize {
        self.decoded
    }

    /// Number of sync acquisitions that did not lead to a frame.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Feed one received bit, MSB of each byte first.
    ///
    /// Returns a packet when one completes.
    pub fn push_bit(&mut self, bit: u8) -> Option<Packet> {
        // Accumulate the most recent 24 bits, most recent in the LSB.
        self.acc = ((self.acc << 1) | u32::from(bit & 1)) & SYNC_MASK;

        match &mut self.state {
            State::Searching => {
                // Allow a single bit mismatch.
                if (self.acc ^ il2p_frame::SYNC_WORD).count_ones() <= 1 {
                    self.state = State::Header {
                        buf: Vec::with_capacity(HEADER_BYTES),
                    };
                    self.bit_count = 0;
                }
                None
            }
            State::Header { buf } => {
                self.bit_count += 1;
                if self.bit_count < 8 {
                    return None;
                }
                self.bit_count = 0;
                buf.push((self.acc & 0xff) as u8);
                if buf.len() < HEADER_BYTES {
                    return None;
                }
                match il2p_header::clarify(buf) {
                    None => {
                        // Header failed FEC; probably noise.
                        self.failed += 1;
                        self.state = State::Searching;
                        None
                    }
                    Some((hdr, corrected)) => {
                        let count = il2p_header::payload_byte_count(&hdr);
                        match il2p_payload::PayloadProperties::compute(count) {
                            Err(_) => {
                                self.failed += 1;
                                self.state = State::Searching;
                                None
                            }
                            Ok((_, 0)) => self.finish(hdr, &[], corrected),
                            Ok((_, eplen)) => {
                                self.state = State::Payload {
                                    hdr,
                                    corrected,
                                    eplen,
                                    buf: Vec::with_capacity(eplen),
                                };
                                None
                            }
                        }
                    }
                }
            }
            State::Payload {
                hdr,
                corrected,
                eplen,
                buf,
            } => {
                self.bit_count += 1;
                if self.bit_count < 8 {
                    return None;
                }
                self.bit_count = 0;
                buf.push((self.acc & 0xff) as u8);
                if buf.len() < *eplen {
                    return None;
                }
                let hdr = *hdr;
                let corrected = *corrected;
                let payload = std::mem::take(buf);
                self.finish(hdr, &payload, corrected)
            }
        }
    }

    fn finish(
        &mut self,
        hdr: [u8; il2p_header::HEADER_SIZE],
        epayload: &[u8],
        mut corrected: usize,
    ) -> Option<Packet> {
        self.state = State::Searching;
        match il2p_frame::decode_header_payload(&hdr, epayload, &mut corrected) {
            Some(pp) => {
                self.decoded += 1;
                debug!(
                    "IL2P: decoded frame of {} bytes, {corrected} symbols corrected",
                    pp.len()
                );
                Some(pp)
            }
            None => {
                self.failed += 1;
                None
            }
        }
    }
}

impl Default for Il2pDeframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Il2pDeframer {
    fn drop(&mut self) {
        info!(
            "IL2P deframer: decoded {}, failed {}",
            self.decoded, self.failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Address, CmdRes, FrameType};

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn test_packet() -> Packet {
        Packet::new_i(
            &addr("N0CALL-1"),
            &addr("M0XYZ-2"),
            CmdRes::Cmd,
            0,
            3,
            false,
            0xf0,
            b"the quick brown fox",
        )
        .unwrap()
    }

    fn to_bits(bytes: &[u8]) -> Vec<u8> {
        let mut bits = Vec::with_capacity(bytes.len() * 8);
        for &b in bytes {
            for k in (0..8).rev() {
                bits.push((b >> k) & 1);
            }
        }
        bits
    }

    fn wire_bits(pp: &Packet) -> Vec<u8> {
        let mut bytes = vec![
            (il2p_frame::SYNC_WORD >> 16) as u8,
            (il2p_frame::SYNC_WORD >> 8) as u8,
            il2p_frame::SYNC_WORD as u8,
        ];
        bytes.extend_from_slice(&il2p_frame::encode(pp).unwrap());
        to_bits(&bytes)
    }

    fn run(deframer: &mut Il2pDeframer, bits: &[u8]) -> Vec<Packet> {
        bits.iter().filter_map(|&b| deframer.push_bit(b)).collect()
    }

    #[test]
    fn decodes_clean_frame() {
        let pp = test_packet();
        let mut d = Il2pDeframer::new();
        let got = run(&mut d, &wire_bits(&pp));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].info(), b"the quick brown fox");
        assert_eq!(got[0].frame_type().ftype, FrameType::I);
        assert_eq!(d.decoded(), 1);
    }

    #[test]
    fn tolerates_leading_noise() {
        let pp = test_packet();
        let mut bits = to_bits(&[0x12, 0x34, 0xab]);
        bits.extend(wire_bits(&pp));
        let mut d = Il2pDeframer::new();
        let got = run(&mut d, &bits);
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn sync_word_hamming_one() {
        let pp = test_packet();
        let clean = wire_bits(&pp);
        // Any single flipped sync bit must still acquire.
        for flip in 0..24 {
            let mut bits = clean.clone();
            bits[flip] ^= 1;
            let mut d = Il2pDeframer::new();
            let got = run(&mut d, &bits);
            assert_eq!(got.len(), 1, "failed with sync bit {flip} flipped");
        }
        // Any two flipped sync bits must not.
        for a in 0..24 {
            for b in a + 1..24 {
                let mut bits = clean.clone();
                bits[a] ^= 1;
                bits[b] ^= 1;
                let mut d = Il2pDeframer::new();
                let got = run(&mut d, &bits);
                assert_eq!(got.len(), 0, "acquired with sync bits {a},{b} flipped");
            }
        }
    }

    #[test]
    fn bad_header_returns_to_search() {
        let pp = test_packet();
        let mut bits = wire_bits(&pp);
        // Wreck the header beyond repair, then append a clean frame.
        for b in bits[24..24 + 60].iter_mut() {
            *b ^= 1;
        }
        bits.extend(wire_bits(&pp));
        let mut d = Il2pDeframer::new();
        let got = run(&mut d, &bits);
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn back_to_back_frames() {
        let a = test_packet();
        let b = Packet::new_u(
            &addr("AA1A"),
            &addr("BB2B"),
            CmdRes::Res,
            FrameType::Ua,
            true,
            0,
            &[],
        )
        .unwrap();
        let mut bits = wire_bits(&a);
        bits.extend(wire_bits(&b));
        let mut d = Il2pDeframer::new();
        let got = run(&mut d, &bits);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].frame_type().ftype, FrameType::I);
        assert_eq!(got[1].frame_type().ftype, FrameType::Ua);
    }
}
