/*! AX.25 frame objects.

A [`Packet`] owns one serialized AX.25 frame: two 7-byte address
fields, a control byte, an optional PID byte, and an optional
information part. Callsigns are stored shifted left by one on the
wire, with the command/response bit in the high bit of each SSID
byte (destination carries "command", source carries "response").

[AX.25]: https://www.tapr.org/pdf/AX25.2.2.pdf
 */
use crate::{Error, Result};

/// Maximum number of bytes in the information part of a frame.
pub const MAX_INFO_LEN: usize = 2048;

/// Shortest parseable frame.
pub const MIN_PACKET_LEN: usize = 5;

/// Longest possible frame: addresses, control, PID (possibly
/// escaped), and a full information part.
pub const MAX_PACKET_LEN: usize = 2 * 7 + 1 + 2 + MAX_INFO_LEN;

/// PID meaning "no layer 3 protocol".
pub const PID_NO_LAYER_3: u8 = 0xf0;

/// PID marking a segmentation fragment.
pub const PID_SEGMENTATION_FRAGMENT: u8 = 0x08;

/// PID escape; a second PID byte follows.
pub const PID_ESCAPE_CHARACTER: u8 = 0xff;

const SSID_SSID_MASK: u8 = 0x1e;
const SSID_LAST_MASK: u8 = 0x01;
const SSID_CR_MASK: u8 = 0x80;

/// Frame types of AX.25 v2.0, plus catch-alls for frames we don't
/// speak.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    /// Information frame.
    I,
    /// Receive Ready: ready to receive, acks up to N(R)-1.
    Rr,
    /// Receive Not Ready: receiver busy.
    Rnr,
    /// Reject: go-back-N retransmission request.
    Rej,
    /// Selective Reject: retransmit only the named N(S).
    Srej,
    /// Set Asynchronous Balanced Mode: connection request.
    Sabm,
    /// SABM Extended (modulo 128). Not supported, always rejected.
    Sabme,
    /// Disconnect request.
    Disc,
    /// Disconnected Mode response.
    Dm,
    /// Unnumbered Acknowledge.
    Ua,
    /// Frame Reject (obsolete in v2.0, handled for compatibility).
    Frmr,
    /// Unnumbered Information.
    Ui,
    /// Exchange Identification. Not supported.
    Xid,
    /// Test frame. Not supported.
    Test,
    /// Some other unnumbered frame.
    UOther,
    /// Could not be classified as AX.25 at all.
    NotAx25,
}

/// The command/response dimension, carried in the address field
/// C-bits. `Both` and `Neither` are fossils from pre-2.0 stations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdRes {
    /// Response frame.
    Res,
    /// Command frame.
    Cmd,
    /// Neither C-bit set (old protocol version).
    Neither,
    /// Both C-bits set (old protocol version).
    Both,
}

impl CmdRes {
    /// True for the encodings that count as "command" on the wire.
    pub fn is_command(self) -> bool {
        matches!(self, CmdRes::Cmd | CmdRes::Both)
    }
}

/// Control metadata extracted from a frame.
///
/// `nr`/`ns` are only meaningful for the frame types that carry
/// them, and are zero otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlInfo {
    /// Frame type.
    pub ftype: FrameType,
    /// Command or response.
    pub cr: CmdRes,
    /// Poll/Final bit.
    pub pf: bool,
    /// Receive sequence number N(R), modulo 8.
    pub nr: u8,
    /// Send sequence number N(S), modulo 8.
    pub ns: u8,
}

/// A callsign plus SSID, e.g. `M0XYZ-7`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    call: String,
    ssid: u8,
}

impl Address {
    /// Create an address from a bare callsign and SSID.
    ///
    /// The callsign must be 1–6 uppercase letters or digits, and the
    /// SSID 0–15.
    pub fn new(call: &str, ssid: u8) -> Result<Self> {
        if call.is_empty() || call.len() > 6 {
            return Err(Error::InvalidArgument(format!(
                "callsign {call:?} must be 1 to 6 characters"
            )));
        }
        if !call.chars().all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit()) {
            return Err(Error::InvalidArgument(format!(
                "callsign {call:?} must be uppercase letters and digits"
            )));
        }
        if ssid > 15 {
            return Err(Error::InvalidArgument(format!(
                "SSID {ssid} not in range 0 to 15"
            )));
        }
        Ok(Self {
            call: call.to_string(),
            ssid,
        })
    }

    /// The bare callsign, without SSID.
    pub fn call(&self) -> &str {
        &self.call
    }

    /// The SSID, 0–15.
    pub fn ssid(&self) -> u8 {
        self.ssid
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.call)
        } else {
            write!(f, "{}-{}", self.call, self.ssid)
        }
    }
}

impl std::str::FromStr for Address {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('-') {
            None => Address::new(s, 0),
            Some((call, ssid)) => {
                let ssid = ssid.parse::<u8>().map_err(|_| {
                    Error::InvalidArgument(format!("bad SSID in address {s:?}"))
                })?;
                Address::new(call, ssid)
            }
        }
    }
}

/// One serialized AX.25 frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
}

impl Packet {
    /// Parse a frame from raw wire bytes, e.g. from a KISS client.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_PACKET_LEN || data.len() > MAX_PACKET_LEN {
            return Err(Error::Protocol(format!(
                "frame length {} not in allowable range of {MIN_PACKET_LEN} to {MAX_PACKET_LEN}",
                data.len()
            )));
        }
        Ok(Self {
            data: data.to_vec(),
        })
    }

    /// The serialized frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Serialized frame length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the frame has no bytes at all. Never the case for a
    /// parsed or built frame.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn with_addrs(dst: &Address, src: &Address, cr: CmdRes) -> Self {
        let mut data = Vec::with_capacity(32);
        for (n, addr) in [dst, src].into_iter().enumerate() {
            let mut field = [b' ' << 1; 7];
            for (i, ch) in addr.call.bytes().enumerate() {
                field[i] = ch << 1;
            }
            field[6] = 0x60 | ((addr.ssid & 0xf) << 1);
            match (n, cr) {
                (0, CmdRes::Cmd | CmdRes::Both) => field[6] |= SSID_CR_MASK,
                (1, CmdRes::Res | CmdRes::Both) => field[6] |= SSID_CR_MASK,
                _ => {}
            }
            if n == 1 {
                field[6] |= SSID_LAST_MASK;
            }
            data.extend_from_slice(&field);
        }
        Self { data }
    }

    /// Build an unnumbered frame (SABM, DISC, DM, UA, FRMR, UI).
    ///
    /// Only UI frames take a PID. Only UI and FRMR may carry an
    /// information part.
    pub fn new_u(
        dst: &Address,
        src: &Address,
        cr: CmdRes,
        ftype: FrameType,
        pf: bool,
        pid: u8,
        info: &[u8],
    ) -> Result<Self> {
        let (ctrl, info_ok) = match ftype {
            FrameType::Sabm => (0x2fu8, false),
            FrameType::Disc => (0x43, false),
            FrameType::Dm => (0x0f, false),
            FrameType::Ua => (0x63, false),
            FrameType::Frmr => (0x87, true),
            FrameType::Ui => (0x03, true),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "invalid frame type {ftype:?} for U frame"
                )));
            }
        };
        if !info_ok && !info.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "info part not allowed for {ftype:?}"
            )));
        }
        if info.len() > MAX_INFO_LEN {
            return Err(Error::InvalidArgument(format!(
                "info part too long: {}",
                info.len()
            )));
        }
        let mut pp = Self::with_addrs(dst, src, cr);
        pp.data.push(if pf { ctrl | 0x10 } else { ctrl });
        if ftype == FrameType::Ui {
            let pid = match pid {
                0 | PID_ESCAPE_CHARACTER => PID_NO_LAYER_3,
                p => p,
            };
            pp.data.push(pid);
        }
        pp.data.extend_from_slice(info);
        Ok(pp)
    }

    /// Build a supervisory frame (RR, RNR, REJ, SREJ).
    ///
    /// Only SREJ may carry an information part (the multi-SREJ
    /// extension listing additional N(S) values).
    pub fn new_s(
        dst: &Address,
        src: &Address,
        cr: CmdRes,
        ftype: FrameType,
        nr: u8,
        pf: bool,
        info: &[u8],
    ) -> Result<Self> {
        let ctrl: u8 = match ftype {
            FrameType::Rr => 0x01,
            FrameType::Rnr => 0x05,
            FrameType::Rej => 0x09,
            FrameType::Srej => 0x0d,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "invalid frame type {ftype:?} for S frame"
                )));
            }
        };
        if nr >= 8 {
            return Err(Error::InvalidArgument(format!("invalid N(R) {nr}")));
        }
        if !info.is_empty() && ftype != FrameType::Srej {
            return Err(Error::InvalidArgument(format!(
                "info part not allowed for {ftype:?}"
            )));
        }
        let mut pp = Self::with_addrs(dst, src, cr);
        let mut ctrl = ctrl | (nr << 5);
        if pf {
            ctrl |= 0x10;
        }
        pp.data.push(ctrl);
        pp.data.extend_from_slice(info);
        Ok(pp)
    }

    /// Build an information frame.
    pub fn new_i(
        dst: &Address,
        src: &Address,
        cr: CmdRes,
        nr: u8,
        ns: u8,
        pf: bool,
        pid: u8,
        info: &[u8],
    ) -> Result<Self> {
        if nr >= 8 || ns >= 8 {
            return Err(Error::InvalidArgument(format!(
                "invalid N(R) {nr} or N(S) {ns}"
            )));
        }
        if info.len() > MAX_INFO_LEN {
            return Err(Error::InvalidArgument(format!(
                "info part too long: {}",
                info.len()
            )));
        }
        let mut pp = Self::with_addrs(dst, src, cr);
        let mut ctrl = (nr << 5) | (ns << 1);
        if pf {
            ctrl |= 0x10;
        }
        pp.data.push(ctrl);
        pp.data.push(match pid {
            0 | PID_ESCAPE_CHARACTER => PID_NO_LAYER_3,
            p => p,
        });
        pp.data.extend_from_slice(info);
        Ok(pp)
    }

    fn addr_at(&self, n: usize) -> Result<Address> {
        let field = self.data.get(n * 7..n * 7 + 7).ok_or_else(|| {
            Error::Protocol(format!(
                "frame of {} bytes is too short for address fields",
                self.data.len()
            ))
        })?;
        let mut call = String::with_capacity(6);
        for b in &field[..6] {
            let ch = (b >> 1) & 0x7f;
            if ch != b' ' {
                call.push(ch as char);
            }
        }
        let ssid = (field[6] & SSID_SSID_MASK) >> 1;
        Address::new(&call, ssid)
    }

    /// Destination address.
    pub fn dst(&self) -> Result<Address> {
        self.addr_at(0)
    }

    /// Source address.
    pub fn src(&self) -> Result<Address> {
        self.addr_at(1)
    }

    const CONTROL_OFFSET: usize = 14;

    /// The raw control byte, if present.
    pub fn control(&self) -> Option<u8> {
        self.data.get(Self::CONTROL_OFFSET).copied()
    }

    fn num_pid(&self) -> usize {
        match self.control() {
            // I frames and UI frames carry a PID.
            Some(c) if (c & 0x01) == 0 || c == 0x03 || c == 0x13 => {
                match self.data.get(Self::CONTROL_OFFSET + 1) {
                    Some(&PID_ESCAPE_CHARACTER) => 2,
                    Some(_) => 1,
                    None => 0,
                }
            }
            _ => 0,
        }
    }

    /// The PID byte, for frames that have one.
    pub fn pid(&self) -> Option<u8> {
        match self.num_pid() {
            0 => None,
            _ => self.data.get(Self::CONTROL_OFFSET + 1).copied(),
        }
    }

    /// The information part. Empty slice if there is none.
    pub fn info(&self) -> &[u8] {
        let ofs = Self::CONTROL_OFFSET + 1 + self.num_pid();
        self.data.get(ofs..).unwrap_or(&[])
    }

    /// Replace the information part.
    pub fn set_info(&mut self, info: &[u8]) {
        let ofs = Self::CONTROL_OFFSET + 1 + self.num_pid();
        self.data.truncate(ofs);
        self.data.extend_from_slice(&info[..info.len().min(MAX_INFO_LEN)]);
    }

    /// Classify the frame and extract control metadata.
    pub fn frame_type(&self) -> ControlInfo {
        let mut fi = ControlInfo {
            ftype: FrameType::NotAx25,
            cr: CmdRes::Neither,
            pf: false,
            nr: 0,
            ns: 0,
        };
        let Some(c) = self.control() else {
            return fi;
        };
        let dst_c = self.data[6] & SSID_CR_MASK != 0;
        let src_c = self.data[13] & SSID_CR_MASK != 0;
        fi.cr = match (dst_c, src_c) {
            (true, true) => CmdRes::Both,
            (true, false) => CmdRes::Cmd,
            (false, true) => CmdRes::Res,
            (false, false) => CmdRes::Neither,
        };
        fi.pf = c & 0x10 != 0;
        if c & 1 == 0 {
            fi.ns = (c >> 1) & 7;
            fi.nr = (c >> 5) & 7;
            fi.ftype = FrameType::I;
        } else if c & 2 == 0 {
            fi.nr = (c >> 5) & 7;
            fi.ftype = match (c >> 2) & 3 {
                0 => FrameType::Rr,
                1 => FrameType::Rnr,
                2 => FrameType::Rej,
                _ => FrameType::Srej,
            };
        } else {
            fi.ftype = match c & 0xef {
                0x2f => FrameType::Sabm,
                0x6f => FrameType::Sabme,
                0x43 => FrameType::Disc,
                0x0f => FrameType::Dm,
                0x63 => FrameType::Ua,
                0x87 => FrameType::Frmr,
                0x03 => FrameType::Ui,
                0xaf => FrameType::Xid,
                0xe3 => FrameType::Test,
                _ => FrameType::UOther,
            };
        }
        fi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn address_parse() {
        let a = addr("M0XYZ-7");
        assert_eq!(a.call(), "M0XYZ");
        assert_eq!(a.ssid(), 7);
        assert_eq!(a.to_string(), "M0XYZ-7");
        assert_eq!(addr("K5OKC").to_string(), "K5OKC");
        assert!("toolongcall".parse::<Address>().is_err());
        assert!("lower".parse::<Address>().is_err());
        assert!("M0XYZ-16".parse::<Address>().is_err());
        assert!("M0X YZ".parse::<Address>().is_err());
    }

    #[test]
    fn i_frame_round_trip() {
        let pp = Packet::new_i(
            &addr("N0CALL-1"),
            &addr("M0XYZ"),
            CmdRes::Cmd,
            3,
            5,
            true,
            PID_NO_LAYER_3,
            b"hello",
        )
        .unwrap();
        let fi = pp.frame_type();
        assert_eq!(fi.ftype, FrameType::I);
        assert_eq!(fi.cr, CmdRes::Cmd);
        assert!(fi.pf);
        assert_eq!(fi.nr, 3);
        assert_eq!(fi.ns, 5);
        assert_eq!(pp.pid(), Some(PID_NO_LAYER_3));
        assert_eq!(pp.info(), b"hello");
        assert_eq!(pp.dst().unwrap().to_string(), "N0CALL-1");
        assert_eq!(pp.src().unwrap().to_string(), "M0XYZ");

        let pp2 = Packet::from_bytes(pp.as_bytes()).unwrap();
        assert_eq!(pp, pp2);
    }

    #[test]
    fn s_frames() {
        for (ftype, ctrl) in [
            (FrameType::Rr, 0x01u8),
            (FrameType::Rnr, 0x05),
            (FrameType::Rej, 0x09),
            (FrameType::Srej, 0x0d),
        ] {
            let pp = Packet::new_s(
                &addr("AA1A"),
                &addr("BB2B"),
                CmdRes::Res,
                ftype,
                6,
                false,
                &[],
            )
            .unwrap();
            assert_eq!(pp.control(), Some(ctrl | (6 << 5)));
            let fi = pp.frame_type();
            assert_eq!(fi.ftype, ftype);
            assert_eq!(fi.cr, CmdRes::Res);
            assert_eq!(fi.nr, 6);
            assert!(!fi.pf);
            assert_eq!(pp.pid(), None);
        }
    }

    #[test]
    fn u_frames() {
        for (ftype, ctrl) in [
            (FrameType::Sabm, 0x2fu8),
            (FrameType::Disc, 0x43),
            (FrameType::Dm, 0x0f),
            (FrameType::Ua, 0x63),
            (FrameType::Frmr, 0x87),
        ] {
            let pp = Packet::new_u(
                &addr("AA1A"),
                &addr("BB2B"),
                CmdRes::Cmd,
                ftype,
                true,
                0,
                &[],
            )
            .unwrap();
            assert_eq!(pp.control(), Some(ctrl | 0x10));
            assert_eq!(pp.frame_type().ftype, ftype);
            assert!(pp.frame_type().pf);
        }
        // UI gets a PID and can carry info.
        let pp = Packet::new_u(
            &addr("AA1A"),
            &addr("BB2B"),
            CmdRes::Cmd,
            FrameType::Ui,
            false,
            PID_NO_LAYER_3,
            b"beacon",
        )
        .unwrap();
        assert_eq!(pp.frame_type().ftype, FrameType::Ui);
        assert_eq!(pp.pid(), Some(PID_NO_LAYER_3));
        assert_eq!(pp.info(), b"beacon");
    }

    #[test]
    fn command_response_bits() {
        let pp = Packet::new_s(
            &addr("AA1A"),
            &addr("BB2B"),
            CmdRes::Cmd,
            FrameType::Rr,
            0,
            false,
            &[],
        )
        .unwrap();
        assert_eq!(pp.as_bytes()[6] & 0x80, 0x80);
        assert_eq!(pp.as_bytes()[13] & 0x80, 0);
        assert_eq!(pp.frame_type().cr, CmdRes::Cmd);

        let pp = Packet::new_s(
            &addr("AA1A"),
            &addr("BB2B"),
            CmdRes::Res,
            FrameType::Rr,
            0,
            false,
            &[],
        )
        .unwrap();
        assert_eq!(pp.as_bytes()[6] & 0x80, 0);
        assert_eq!(pp.as_bytes()[13] & 0x80, 0x80);
        assert_eq!(pp.frame_type().cr, CmdRes::Res);
    }

    #[test]
    fn set_info() {
        let mut pp = Packet::new_i(
            &addr("AA1A"),
            &addr("BB2B"),
            CmdRes::Cmd,
            0,
            0,
            false,
            PID_NO_LAYER_3,
            &[],
        )
        .unwrap();
        assert_eq!(pp.info(), b"");
        pp.set_info(b"new payload");
        assert_eq!(pp.info(), b"new payload");
        assert_eq!(pp.pid(), Some(PID_NO_LAYER_3));
    }

    #[test]
    fn reject_bad_lengths() {
        assert!(Packet::from_bytes(&[0u8; 3]).is_err());
        assert!(Packet::from_bytes(&[0u8; MAX_PACKET_LEN + 1]).is_err());
    }

    #[test]
    fn degenerate_short_frame_is_harmless() {
        // The minimum length is below a full pair of address
        // fields; such a frame parses but classifies as garbage.
        let pp = Packet::from_bytes(&[0u8; MIN_PACKET_LEN]).unwrap();
        assert_eq!(pp.frame_type().ftype, FrameType::NotAx25);
        assert!(pp.dst().is_err());
        assert!(pp.src().is_err());
        assert_eq!(pp.info(), b"");
        assert_eq!(pp.control(), None);
    }

    #[test]
    fn last_address_marker() {
        let pp = Packet::new_u(
            &addr("AA1A"),
            &addr("BB2B"),
            CmdRes::Cmd,
            FrameType::Sabm,
            true,
            0,
            &[],
        )
        .unwrap();
        assert_eq!(pp.as_bytes()[6] & SSID_LAST_MASK, 0);
        assert_eq!(pp.as_bytes()[13] & SSID_LAST_MASK, 1);
    }
}
