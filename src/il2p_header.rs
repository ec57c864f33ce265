/*! IL2P type 1 header codec.

The header is exactly 13 bytes. The low six bits of bytes 0–11
carry the destination and source callsigns in shifted 6-bit ASCII,
and byte 12 holds both SSIDs. One bit per byte is repurposed for
the control plane:

```text
bit 6, bytes 0..13:   UI, PID[4], Control[7]
bit 7, byte 0:        FEC level (always 1 here)
bit 7, byte 1:        header type (always 1 here)
bit 7, bytes 2..12:   payload byte count, 10 bits MSB first
```

On the wire the header is scrambled and protected by two
Reed-Solomon parity bytes.

Control field encodings, MSB to LSB:

| frame    | UI | PID  | control               |
|----------|----|------|-----------------------|
| S        | 0  | 0    | P/F, N(R), C, SS      |
| U not UI | 0  | 1    | P/F, opcode, C, 0, 0  |
| UI       | 1  | pid  | P/F, 5, C, 0, 0       |
| I        | 0  | pid  | P/F, N(R), N(S)       |
 */
use log::debug;

use crate::packet::{Address, CmdRes, FrameType, Packet};
use crate::{Error, Result, fec, scrambler};

/// Unprotected header size in bytes.
pub const HEADER_SIZE: usize = 13;

/// Reed-Solomon parity bytes protecting the header.
pub const HEADER_PARITY: usize = 2;

/// Largest payload a type 1 header can describe.
pub const MAX_PAYLOAD_SIZE: usize = 1023;

/// IL2P protocol identifiers, a 4-bit recoding of the AX.25 PID
/// with the frame class baked in.
pub struct Pids {}
impl Pids {
    /// AX.25 supervisory frames (RR, RNR, REJ, SREJ).
    pub const AX25_SUPERVISOR: u8 = 0;
    /// AX.25 unnumbered frames other than UI.
    pub const AX25_UNNUMBERED: u8 = 1;
    /// AX.25 layer 3.
    pub const AX25_LAYER3: u8 = 2;
    /// ISO 8208 / CCITT X.25 PLP.
    pub const ISO_8208_CCITT_X25_PLP: u8 = 3;
    /// Compressed TCP/IP.
    pub const COMPRESSED_TCPIP: u8 = 4;
    /// Uncompressed TCP/IP.
    pub const UNCOMPRESSED_TCPIP: u8 = 5;
    /// Segmentation fragment.
    pub const SEGMENTATION_FRAGMENT: u8 = 6;
    /// ARPA Internet Protocol.
    pub const ARPA_IP: u8 = 11;
    /// ARPA Address Resolution.
    pub const ARPA_ADDRESS_RESOLUTION: u8 = 12;
    /// FlexNet.
    pub const FLEX_NET: u8 = 13;
    /// TheNET.
    pub const THE_NET: u8 = 14;
    /// No layer 3.
    pub const NO_L3: u8 = 15;
}

// IL2P 4-bit PID to AX.25 8-bit PID. Entries 0 and 1 are the S and
// non-UI U classes, which have no PID in AX.25.
const AXPID: [u8; 16] = [
    0xf0, 0xf0, 0x20, 0x01, 0x06, 0x07, 0x08, 0xf0, 0xf0, 0xf0, 0xf0, 0xcc, 0xcd, 0xce,
    0xcf, 0xf0,
];

fn encode_pid(pid: u8) -> Option<u8> {
    match pid {
        p if (p & 0x30) == 0x20 => Some(Pids::AX25_LAYER3),
        p if (p & 0x30) == 0x10 => Some(Pids::AX25_LAYER3),
        0x01 => Some(Pids::ISO_8208_CCITT_X25_PLP),
        0x06 => Some(Pids::COMPRESSED_TCPIP),
        0x07 => Some(Pids::UNCOMPRESSED_TCPIP),
        0x08 => Some(Pids::SEGMENTATION_FRAGMENT),
        0xcc => Some(Pids::ARPA_IP),
        0xcd => Some(Pids::ARPA_ADDRESS_RESOLUTION),
        0xce => Some(Pids::FLEX_NET),
        0xcf => Some(Pids::THE_NET),
        0xf0 => Some(Pids::NO_L3),
        _ => None,
    }
}

fn decode_pid(pid: u8) -> u8 {
    AXPID[(pid & 0xf) as usize]
}

fn ascii_to_sixbit(a: u8) -> u8 {
    if (b' '..=b'_').contains(&a) {
        a - b' '
    } else {
        31 // '?' for any invalid.
    }
}

fn sixbit_to_ascii(s: u8) -> u8 {
    s + b' '
}

fn set_field(hdr: &mut [u8; HEADER_SIZE], bit_num: u8, lsb_index: usize, width: usize, value: u16) {
    let mut value = value;
    let mut index = lsb_index as isize;
    let mut width = width;
    while width > 0 && value != 0 {
        if value & 1 != 0 {
            hdr[index as usize] |= 1 << bit_num;
        }
        value >>= 1;
        index -= 1;
        width -= 1;
    }
}

fn get_field(hdr: &[u8; HEADER_SIZE], bit_num: u8, lsb_index: usize, width: usize) -> u16 {
    let mut result = 0u16;
    let first = lsb_index + 1 - width;
    for index in first..=lsb_index {
        result <<= 1;
        if hdr[index] & (1 << bit_num) != 0 {
            result |= 1;
        }
    }
    result
}

fn set_ui(hdr: &mut [u8; HEADER_SIZE], v: u16) {
    set_field(hdr, 6, 0, 1, v);
}
fn set_pid(hdr: &mut [u8; HEADER_SIZE], v: u16) {
    set_field(hdr, 6, 4, 4, v);
}
fn set_control(hdr: &mut [u8; HEADER_SIZE], v: u16) {
    set_field(hdr, 6, 11, 7, v);
}
fn set_fec_level(hdr: &mut [u8; HEADER_SIZE], v: u16) {
    set_field(hdr, 7, 0, 1, v);
}
fn set_hdr_type(hdr: &mut [u8; HEADER_SIZE], v: u16) {
    set_field(hdr, 7, 1, 1, v);
}
fn set_payload_byte_count(hdr: &mut [u8; HEADER_SIZE], v: u16) {
    set_field(hdr, 7, 11, 10, v);
}

fn get_ui(hdr: &[u8; HEADER_SIZE]) -> u16 {
    get_field(hdr, 6, 0, 1)
}
fn get_pid(hdr: &[u8; HEADER_SIZE]) -> u16 {
    get_field(hdr, 6, 4, 4)
}
fn get_control(hdr: &[u8; HEADER_SIZE]) -> u16 {
    get_field(hdr, 6, 11, 7)
}

/// Payload byte count recorded in an unpacked header.
pub fn payload_byte_count(hdr: &[u8; HEADER_SIZE]) -> usize {
    get_field(hdr, 7, 11, 10) as usize
}

/// Pack a frame's metadata into a type 1 header.
///
/// Returns the header and the payload byte count.
pub fn encode(pp: &Packet) -> Result<([u8; HEADER_SIZE], usize)> {
    let mut hdr = [0u8; HEADER_SIZE];

    let dst = pp.dst()?;
    let src = pp.src()?;
    for (i, ch) in dst.call().bytes().enumerate() {
        hdr[i] = ascii_to_sixbit(ch);
    }
    for (i, ch) in src.call().bytes().enumerate() {
        hdr[i + 6] = ascii_to_sixbit(ch);
    }
    hdr[12] = (dst.ssid() << 4) | src.ssid();

    let fi = pp.frame_type();
    let cmd = u16::from(fi.cr.is_command());
    let pf = u16::from(fi.pf);

    match fi.ftype {
        FrameType::Rr | FrameType::Rnr | FrameType::Rej | FrameType::Srej => {
            // S frames map control N(R) P/F S S 0 1 into
            // P/F N(R) C SS. C is copied from the C bit of the
            // destination address; reception assumes the source bit
            // is the opposite. PID 0 means none for S frames.
            set_ui(&mut hdr, 0);
            set_pid(&mut hdr, Pids::AX25_SUPERVISOR as u16);
            set_control(&mut hdr, (pf << 6) | ((fi.nr as u16) << 3) | (cmd << 2));
            let ss = match fi.ftype {
                FrameType::Rr => 0,
                FrameType::Rnr => 1,
                FrameType::Rej => 2,
                _ => 3,
            };
            set_control(&mut hdr, ss);
        }
        FrameType::Sabm
        | FrameType::Disc
        | FrameType::Dm
        | FrameType::Ua
        | FrameType::Frmr
        | FrameType::Ui => {
            // Only 3 bits are available for the opcode, so SABME got
            // left out. Control format: P/F opcode[3] C 0 0.
            if fi.ftype == FrameType::Ui {
                set_ui(&mut hdr, 1);
                let pid = pp.pid().and_then(encode_pid).ok_or_else(|| {
                    Error::Framing("UI frame with unencodable PID".into())
                })?;
                set_pid(&mut hdr, pid as u16);
            } else {
                set_pid(&mut hdr, Pids::AX25_UNNUMBERED as u16);
            }
            set_control(&mut hdr, (pf << 6) | (cmd << 2));
            let opcode = match fi.ftype {
                FrameType::Sabm => 0,
                FrameType::Disc => 1,
                FrameType::Dm => 2,
                FrameType::Ua => 3,
                FrameType::Frmr => 4,
                _ => 5, // UI
            };
            set_control(&mut hdr, opcode << 3);
        }
        FrameType::I => {
            // I frames, modulo 8 only: P/F N(R) N(S).
            set_ui(&mut hdr, 0);
            let pid = pp.pid().and_then(encode_pid).ok_or_else(|| {
                Error::Framing("I frame with unencodable PID".into())
            })?;
            set_pid(&mut hdr, pid as u16);
            set_control(
                &mut hdr,
                (pf << 6) | ((fi.nr as u16) << 3) | (fi.ns as u16),
            );
        }
        other => {
            return Err(Error::Framing(format!(
                "frame type {other:?} cannot be carried by IL2P"
            )));
        }
    }

    set_fec_level(&mut hdr, 1); // Only max FEC used.
    set_hdr_type(&mut hdr, 1); // Only header type 1 is used.

    let info_len = pp.info().len();
    if info_len > MAX_PAYLOAD_SIZE {
        return Err(Error::Framing(format!(
            "info part of {info_len} bytes does not fit in IL2P"
        )));
    }
    set_payload_byte_count(&mut hdr, info_len as u16);

    Ok((hdr, info_len))
}

fn decode_callsign(field: &[u8], num_sym_changed: usize, what: &str) -> Option<String> {
    let mut call = String::with_capacity(6);
    for &b in field {
        let ch = sixbit_to_ascii(b & 0x3f);
        call.push(ch as char);
    }
    let call = call.trim_end_matches(' ').to_string();
    for ch in call.chars() {
        if !ch.is_ascii_uppercase() && !ch.is_ascii_digit() {
            if num_sym_changed == 0 {
                debug!("IL2P: invalid character {ch:?} in {what} address {call:?}");
            }
            return None;
        }
    }
    if call.is_empty() {
        return None;
    }
    Some(call)
}

/// Unpack a corrected, descrambled header into a frame with no
/// information part yet.
///
/// `num_sym_changed` is the number of symbols FEC had to fix;
/// a complaint about garbage addresses is only worth logging when
/// the header arrived clean.
pub fn decode(hdr: &[u8; HEADER_SIZE], num_sym_changed: usize) -> Option<Packet> {
    let dst_call = decode_callsign(&hdr[0..6], num_sym_changed, "destination")?;
    let src_call = decode_callsign(&hdr[6..12], num_sym_changed, "source")?;
    let dst = Address::new(&dst_call, (hdr[12] >> 4) & 0xf).ok()?;
    let src = Address::new(&src_call, hdr[12] & 0xf).ok()?;

    let pid = get_pid(hdr) as u8;
    let ui = get_ui(hdr) != 0;
    let control = get_control(hdr);
    let pf = (control >> 6) & 1 != 0;
    let cr = if control & 0x04 != 0 {
        CmdRes::Cmd
    } else {
        CmdRes::Res
    };

    let pp = if pid == Pids::AX25_SUPERVISOR {
        // S frame; control is P/F N(R) C S S.
        let ftype = match control & 0x03 {
            0 => FrameType::Rr,
            1 => FrameType::Rnr,
            2 => FrameType::Rej,
            _ => FrameType::Srej,
        };
        let nr = ((control >> 3) & 0x07) as u8;
        Packet::new_s(&dst, &src, cr, ftype, nr, pf, &[])
    } else if pid == Pids::AX25_UNNUMBERED {
        // U frame other than UI; control is P/F opcode[3] C x x.
        let (ftype, axpid) = match (control >> 3) & 0x7 {
            0 => (FrameType::Sabm, 0),
            1 => (FrameType::Disc, 0),
            2 => (FrameType::Dm, 0),
            3 => (FrameType::Ua, 0),
            5 => (FrameType::Ui, 0xf0), // Should not happen with PID 1.
            _ => (FrameType::Frmr, 0),
        };
        Packet::new_u(&dst, &src, cr, ftype, pf, axpid, &[])
    } else if ui {
        Packet::new_u(&dst, &src, cr, FrameType::Ui, pf, decode_pid(pid), &[])
    } else {
        // I frame; control is P/F N(R) N(S). Always a command.
        let nr = ((control >> 3) & 0x7) as u8;
        let ns = (control & 0x7) as u8;
        Packet::new_i(&dst, &src, CmdRes::Cmd, nr, ns, pf, decode_pid(pid), &[])
    };

    match pp {
        Ok(pp) => Some(pp),
        Err(e) => {
            debug!("IL2P: header decoded to an unbuildable frame: {e}");
            None
        }
    }
}

/// Scramble and FEC protect a header for transmit. Returns the 15
/// on-air bytes.
pub fn protect(hdr: &[u8; HEADER_SIZE]) -> [u8; HEADER_SIZE + HEADER_PARITY] {
    let mut out = [0u8; HEADER_SIZE + HEADER_PARITY];
    let scrambled = scrambler::scramble_block(hdr);
    out[..HEADER_SIZE].copy_from_slice(&scrambled);
    let parity = fec::for_parity(HEADER_PARITY).encode(&scrambled);
    out[HEADER_SIZE..].copy_from_slice(&parity);
    out
}

/// Error correct and descramble 15 received header bytes.
///
/// Returns the clear header and the number of symbols corrected, or
/// `None` when FEC failed.
pub fn clarify(received: &[u8]) -> Option<([u8; HEADER_SIZE], usize)> {
    let (corrected, nfixed) = fec::for_parity(HEADER_PARITY).decode(received)?;
    let clear = scrambler::descramble_block(&corrected);
    let mut hdr = [0u8; HEADER_SIZE];
    hdr.copy_from_slice(&clear);
    Some((hdr, nfixed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn round_trip(pp: &Packet) -> Packet {
        let (hdr, count) = encode(pp).unwrap();
        assert_eq!(count, pp.info().len());
        assert_eq!(payload_byte_count(&hdr), pp.info().len());
        let mut got = decode(&hdr, 0).expect("header did not decode");
        got.set_info(pp.info());
        got
    }

    #[test]
    fn i_frame_header() {
        let pp = Packet::new_i(
            &addr("N0CALL-1"),
            &addr("M0XYZ-15"),
            CmdRes::Cmd,
            3,
            6,
            true,
            0xf0,
            b"some info",
        )
        .unwrap();
        let got = round_trip(&pp);
        let fi = got.frame_type();
        assert_eq!(fi.ftype, FrameType::I);
        assert_eq!(fi.nr, 3);
        assert_eq!(fi.ns, 6);
        assert!(fi.pf);
        assert_eq!(got.pid(), Some(0xf0));
        assert_eq!(got.dst().unwrap().to_string(), "N0CALL-1");
        assert_eq!(got.src().unwrap().to_string(), "M0XYZ-15");
        assert_eq!(got.info(), b"some info");
    }

    #[test]
    fn s_frame_headers() {
        for ftype in [FrameType::Rr, FrameType::Rnr, FrameType::Rej, FrameType::Srej] {
            for cr in [CmdRes::Cmd, CmdRes::Res] {
                let pp = Packet::new_s(
                    &addr("AA1A-2"),
                    &addr("BB2B-3"),
                    cr,
                    ftype,
                    5,
                    false,
                    &[],
                )
                .unwrap();
                let got = round_trip(&pp);
                let fi = got.frame_type();
                assert_eq!(fi.ftype, ftype);
                assert_eq!(fi.cr, cr);
                assert_eq!(fi.nr, 5);
                assert!(!fi.pf);
            }
        }
    }

    #[test]
    fn u_frame_headers() {
        for (ftype, cr) in [
            (FrameType::Sabm, CmdRes::Cmd),
            (FrameType::Disc, CmdRes::Cmd),
            (FrameType::Dm, CmdRes::Res),
            (FrameType::Ua, CmdRes::Res),
            (FrameType::Frmr, CmdRes::Res),
        ] {
            let pp =
                Packet::new_u(&addr("AA1A"), &addr("BB2B"), cr, ftype, true, 0, &[]).unwrap();
            let got = round_trip(&pp);
            assert_eq!(got.frame_type().ftype, ftype);
            assert_eq!(got.frame_type().cr, cr);
            assert!(got.frame_type().pf);
        }
    }

    #[test]
    fn ui_frame_pid_survives() {
        for pid in [0xf0u8, 0x08, 0xcc, 0x01] {
            let pp = Packet::new_u(
                &addr("AA1A"),
                &addr("BB2B"),
                CmdRes::Cmd,
                FrameType::Ui,
                false,
                pid,
                b"x",
            )
            .unwrap();
            let got = round_trip(&pp);
            assert_eq!(got.frame_type().ftype, FrameType::Ui);
            assert_eq!(got.pid(), Some(pid), "pid {pid:#x}");
        }
    }

    #[test]
    fn layer3_pids_collapse() {
        // Any yy01yyyy/yy10yyyy PID maps to the single AX.25 layer 3
        // code point, 0x20.
        let pp = Packet::new_i(
            &addr("AA1A"),
            &addr("BB2B"),
            CmdRes::Cmd,
            0,
            0,
            false,
            0x10,
            b"x",
        )
        .unwrap();
        let got = round_trip(&pp);
        assert_eq!(got.pid(), Some(0x20));
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut pp = Packet::new_i(
            &addr("AA1A"),
            &addr("BB2B"),
            CmdRes::Cmd,
            0,
            0,
            false,
            0xf0,
            &[],
        )
        .unwrap();
        pp.set_info(&vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(encode(&pp).is_err());
    }

    #[test]
    fn protect_clarify_fixes_errors() {
        let pp = Packet::new_u(
            &addr("K5OKC"),
            &addr("W1AW-4"),
            CmdRes::Cmd,
            FrameType::Sabm,
            true,
            0,
            &[],
        )
        .unwrap();
        let (hdr, _) = encode(&pp).unwrap();
        let mut wire = protect(&hdr);
        // One corrupted byte is within the 2-parity correction power.
        wire[7] ^= 0x55;
        let (clear, nfixed) = clarify(&wire).expect("uncorrectable");
        assert_eq!(clear, hdr);
        assert_eq!(nfixed, 1);

        // Two corrupted bytes exceed the correction power. The
        // decoder either notices, or at worst fabricates a
        // single-symbol "fix" that cannot restore the original.
        let mut wire = protect(&hdr);
        wire[3] ^= 0x0f;
        wire[9] ^= 0xf0;
        if let Some((clear, _)) = clarify(&wire) {
            assert_ne!(clear, hdr);
        }
    }

    #[test]
    fn garbage_addresses_rejected() {
        let mut hdr = [0u8; HEADER_SIZE];
        // Sixbit values decoding to punctuation.
        hdr[0] = ascii_to_sixbit(b'!');
        assert!(decode(&hdr, 0).is_none());
    }
}
