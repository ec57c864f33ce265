/*! IL2P payload codec.

Payloads up to 1023 bytes are split into up to five blocks of at
most 239 bytes, each scrambled and followed by 16 bytes of
Reed-Solomon parity. The split puts the remainder into the leading
"large" blocks so block sizes never differ by more than one.
 */
use crate::{Error, Result, fec, scrambler};

/// Largest payload that fits in a frame.
pub const MAX_PAYLOAD_SIZE: usize = 1023;

/// Largest number of blocks a payload can split into.
pub const MAX_PAYLOAD_BLOCKS: usize = 5;

/// Parity symbols appended to every payload block.
pub const PARITY_PER_BLOCK: usize = 16;

/// Largest encoded payload: data plus per-block parity.
pub const MAX_ENCODED_PAYLOAD_SIZE: usize =
    MAX_PAYLOAD_SIZE + MAX_PAYLOAD_BLOCKS * PARITY_PER_BLOCK;

/// How a payload of a given size splits into FEC blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadProperties {
    /// Total payload bytes.
    pub byte_count: usize,
    /// Number of blocks.
    pub block_count: usize,
    /// Size of the small blocks.
    pub small_block_size: usize,
    /// Size of the large blocks, always small + 1.
    pub large_block_size: usize,
    /// How many large blocks come first.
    pub large_block_count: usize,
    /// How many small blocks follow.
    pub small_block_count: usize,
}

impl PayloadProperties {
    /// Work out the split for a payload size.
    ///
    /// Returns the properties and the total encoded length.
    /// A zero length payload has no blocks and encodes to nothing.
    pub fn compute(payload_size: usize) -> Result<(Self, usize)> {
        if payload_size > MAX_PAYLOAD_SIZE {
            return Err(Error::Framing(format!(
                "payload of {payload_size} bytes exceeds {MAX_PAYLOAD_SIZE}"
            )));
        }
        if payload_size == 0 {
            return Ok((Self::default(), 0));
        }
        let block_count = payload_size.div_ceil(239);
        let small_block_size = payload_size / block_count;
        let large_block_size = small_block_size + 1;
        let large_block_count = payload_size - block_count * small_block_size;
        let small_block_count = block_count - large_block_count;
        let p = Self {
            byte_count: payload_size,
            block_count,
            small_block_size,
            large_block_size,
            large_block_count,
            small_block_count,
        };
        let encoded = p.small_block_count * (p.small_block_size + PARITY_PER_BLOCK)
            + p.large_block_count * (p.large_block_size + PARITY_PER_BLOCK);
        Ok((p, encoded))
    }

    fn block_sizes(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::repeat_n(self.large_block_size, self.large_block_count)
            .chain(std::iter::repeat_n(self.small_block_size, self.small_block_count))
    }
}

/// Scramble and FEC protect a payload for transmit.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    let (props, encoded_len) = PayloadProperties::compute(payload.len())?;
    let mut out = Vec::with_capacity(encoded_len);
    let rs = fec::for_parity(PARITY_PER_BLOCK);
    let mut pin = payload;
    for size in props.block_sizes() {
        let (block, rest) = pin.split_at(size);
        pin = rest;
        let scram = scrambler::scramble_block(block);
        out.extend_from_slice(&scram);
        out.extend_from_slice(&rs.encode(&scram));
    }
    debug_assert_eq!(out.len(), encoded_len);
    Ok(out)
}

/// Decode a received payload of `payload_size` clear bytes.
///
/// Returns the payload and the number of symbols corrected, or
/// `None` if any block failed FEC.
pub fn decode(received: &[u8], payload_size: usize) -> Option<(Vec<u8>, usize)> {
    let (props, encoded_len) = PayloadProperties::compute(payload_size).ok()?;
    if received.len() < encoded_len {
        return None;
    }
    let rs = fec::for_parity(PARITY_PER_BLOCK);
    let mut out = Vec::with_capacity(payload_size);
    let mut corrected = 0;
    let mut pin = received;
    for size in props.block_sizes() {
        let (block, rest) = pin.split_at(size + PARITY_PER_BLOCK);
        pin = rest;
        let (fixed, nfixed) = rs.decode(block)?;
        corrected += nfixed;
        out.extend_from_slice(&scrambler::descramble_block(&fixed));
    }
    Some((out, corrected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(size: usize) -> PayloadProperties {
        PayloadProperties::compute(size).unwrap().0
    }

    #[test]
    fn split_boundaries() {
        // One block right up to the limit.
        let p = props(239);
        assert_eq!(p.block_count, 1);
        assert_eq!(p.small_block_count, 1);
        assert_eq!(p.small_block_size, 239);
        assert_eq!(p.large_block_count, 0);

        // One byte more forces two even blocks.
        let p = props(240);
        assert_eq!(p.block_count, 2);
        assert_eq!(p.small_block_size, 120);
        assert_eq!(p.small_block_count, 2);
        assert_eq!(p.large_block_count, 0);

        // Two full blocks.
        let p = props(478);
        assert_eq!(p.block_count, 2);
        assert_eq!(p.small_block_size, 239);
        assert_eq!(p.small_block_count, 2);

        // The maximum: five blocks, sizes 205/204.
        let p = props(1023);
        assert_eq!(p.block_count, 5);
        assert_eq!(p.large_block_size, 205);
        assert_eq!(p.small_block_size, 204);
        assert_eq!(p.large_block_count, 3);
        assert_eq!(p.small_block_count, 2);
        assert_eq!(
            p.large_block_count * p.large_block_size
                + p.small_block_count * p.small_block_size,
            1023
        );
    }

    #[test]
    fn uneven_split_prefers_large_first() {
        let p = props(100);
        assert_eq!(p.block_count, 1);
        assert_eq!(p.small_block_size, 100);

        let p = props(500);
        assert_eq!(p.block_count, 3);
        assert_eq!(p.small_block_size, 166);
        assert_eq!(p.large_block_size, 167);
        assert_eq!(p.large_block_count, 2);
        assert_eq!(p.small_block_count, 1);
    }

    #[test]
    fn oversize_rejected() {
        assert!(PayloadProperties::compute(1024).is_err());
    }

    #[test]
    fn empty_payload() {
        let (p, encoded) = PayloadProperties::compute(0).unwrap();
        assert_eq!(p.block_count, 0);
        assert_eq!(encoded, 0);
        assert_eq!(encode(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn round_trip_various_sizes() {
        for size in [1usize, 2, 100, 238, 239, 240, 478, 479, 500, 1022, 1023] {
            let payload: Vec<u8> = (0..size).map(|i| (i * 13 + size) as u8).collect();
            let enc = encode(&payload).unwrap();
            let (_, expect_len) = PayloadProperties::compute(size).unwrap();
            assert_eq!(enc.len(), expect_len, "size {size}");
            let (dec, fixed) = decode(&enc, size).expect("decode failed");
            assert_eq!(dec, payload, "size {size}");
            assert_eq!(fixed, 0);
        }
    }

    #[test]
    fn corrects_errors_per_block() {
        let payload: Vec<u8> = (0..500usize).map(|i| (i ^ 0x3c) as u8).collect();
        let mut enc = encode(&payload).unwrap();
        // Corrupt a few bytes in each of the three blocks.
        enc[10] ^= 0xff;
        enc[200] ^= 0x55;
        enc[400] ^= 0xaa;
        let (dec, fixed) = decode(&enc, 500).unwrap();
        assert_eq!(dec, payload);
        assert_eq!(fixed, 3);
    }

    #[test]
    fn too_many_errors_fails() {
        let payload: Vec<u8> = (0..100usize).map(|i| i as u8).collect();
        let mut enc = encode(&payload).unwrap();
        for i in 0..30 {
            enc[i * 3] ^= 0x77;
        }
        assert!(decode(&enc, 100).is_none());
    }
}
