/*! KISS framing for the client byte stream.

[KISS][kiss] is SLIP-style framing: frames are delimited by FEND
bytes, and FEND/FESC occurring inside a frame are escaped. The
first byte of each frame carries the command in the low nibble
(0 = data frame) and the channel in the high nibble, which this
node ignores.

[kiss]: https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)
 */
use log::warn;

/// Frame delimiter.
pub const FEND: u8 = 0xC0;
/// Escape introducer.
pub const FESC: u8 = 0xDB;
/// Escaped FEND.
pub const TFEND: u8 = 0xDC;
/// Escaped FESC.
pub const TFESC: u8 = 0xDD;

/// Command nibble for a data frame.
pub const CMD_DATA_FRAME: u8 = 0;

/// Longest accepted unescaped frame.
pub const MAX_FRAME_LEN: usize = 2048 + 32;

/// Escape and delimit one message (command byte included by the
/// caller) for the wire.
#[must_use]
pub fn encapsulate(bytes: &[u8]) -> Vec<u8> {
    // Add 10% capacity to leave room for escapes.
    let mut ret = Vec::with_capacity((2 + bytes.len()) * 110 / 100);
    ret.push(FEND);
    for &b in bytes {
        match b {
            FEND => ret.extend([FESC, TFEND]),
            FESC => ret.extend([FESC, TFESC]),
            b => ret.push(b),
        }
    }
    ret.push(FEND);
    ret
}

/// Frame a data frame: command byte then escaped payload.
#[must_use]
pub fn frame_data(payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(payload.len() + 1);
    msg.push(CMD_DATA_FRAME);
    msg.extend_from_slice(payload);
    encapsulate(&msg)
}

enum State {
    /// Waiting for the opening FEND.
    Searching,
    /// Collecting frame bytes.
    Collecting(Vec<u8>),
}

/// Stateful deframer for the inbound byte stream.
pub struct KissDeframer {
    state: State,
    escaped: bool,
}

impl KissDeframer {
    /// Create a deframer waiting for a frame delimiter.
    pub fn new() -> Self {
        Self {
            state: State::Searching,
            escaped: false,
        }
    }

    /// Feed one byte. Returns a complete unescaped message
    /// (command byte first) when one finishes.
    pub fn push_byte(&mut self, byte: u8) -> Option<Vec<u8>> {
        match &mut self.state {
            State::Searching => {
                if byte == FEND {
                    self.state = State::Collecting(Vec::new());
                    self.escaped = false;
                }
                None
            }
            State::Collecting(buf) => {
                if byte == FEND {
                    if buf.is_empty() {
                        // Back to back delimiters; keep collecting.
                        return None;
                    }
                    let msg = std::mem::take(buf);
                    self.state = State::Collecting(Vec::new());
                    self.escaped = false;
                    return Some(msg);
                }
                if buf.len() >= MAX_FRAME_LEN {
                    warn!("KISS message exceeded maximum length");
                    self.state = State::Searching;
                    self.escaped = false;
                    return None;
                }
                if self.escaped {
                    match byte {
                        TFEND => buf.push(FEND),
                        TFESC => buf.push(FESC),
                        other => {
                            warn!("KISS protocol error: found {other:#04x} after FESC");
                        }
                    }
                    self.escaped = false;
                } else if byte == FESC {
                    self.escaped = true;
                } else {
                    buf.push(byte);
                }
                None
            }
        }
    }
}

impl Default for KissDeframer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(d: &mut KissDeframer, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| d.push_byte(b)).collect()
    }

    #[test]
    fn encapsulate_empty() {
        assert_eq!(encapsulate(&[]), vec![FEND, FEND]);
    }

    #[test]
    fn escapes_specials() {
        let got = encapsulate(b"fo\xC0o\xDB");
        assert_eq!(
            got,
            vec![FEND, b'f', b'o', FESC, TFEND, b'o', FESC, TFESC, FEND]
        );
    }

    #[test]
    fn frame_data_prepends_command() {
        let got = frame_data(b"abc");
        assert_eq!(got, vec![FEND, CMD_DATA_FRAME, b'a', b'b', b'c', FEND]);
    }

    #[test]
    fn deframe_round_trip() {
        let mut d = KissDeframer::new();
        for payload in [&b"hello"[..], b"\xC0\xDB\xC0", b"", &[0u8; 300]] {
            let mut msg = vec![CMD_DATA_FRAME];
            msg.extend_from_slice(payload);
            let wire = encapsulate(&msg);
            let got = feed(&mut d, &wire);
            assert_eq!(got.len(), 1, "payload {payload:?}");
            assert_eq!(got[0], msg);
        }
    }

    #[test]
    fn skips_garbage_before_fend() {
        let mut d = KissDeframer::new();
        let mut wire = b"garbage!".to_vec();
        wire.extend(frame_data(b"x"));
        let got = feed(&mut d, &wire);
        assert_eq!(got, vec![vec![CMD_DATA_FRAME, b'x']]);
    }

    #[test]
    fn consecutive_frames_share_delimiter() {
        let mut d = KissDeframer::new();
        // FEND a FEND b FEND: two frames, three delimiters.
        let wire = [
            &[FEND, CMD_DATA_FRAME, b'a'][..],
            &[FEND, CMD_DATA_FRAME, b'b', FEND][..],
        ]
        .concat();
        let got = feed(&mut d, &wire);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], vec![CMD_DATA_FRAME, b'a']);
        assert_eq!(got[1], vec![CMD_DATA_FRAME, b'b']);
    }

    #[test]
    fn empty_frames_ignored() {
        let mut d = KissDeframer::new();
        let got = feed(&mut d, &[FEND, FEND, FEND]);
        assert!(got.is_empty());
    }

    #[test]
    fn oversized_frame_dropped() {
        let mut d = KissDeframer::new();
        let mut wire = vec![FEND];
        wire.extend(vec![0x55u8; MAX_FRAME_LEN + 10]);
        wire.push(FEND);
        let got = feed(&mut d, &wire);
        assert!(got.is_empty());
    }
}
