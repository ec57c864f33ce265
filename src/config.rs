/*! Configuration file.

Line oriented text, one directive per line. Lines starting with `#`
or `*` are comments. Tokens may be quoted, with doubled quotes as
the escape. Directives are case insensitive; anything unrecognized
is ignored with a warning, and out of range values fall back to the
default so a typo never takes the node down.
 */
use std::path::Path;

use log::warn;

use crate::csma::CsmaParams;
use crate::link::LinkConfig;
use crate::{Error, Result};

/// A GPIO line assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpioSpec {
    /// GPIO number in the sysfs namespace.
    pub pin: u32,
    /// Active low.
    pub invert: bool,
}

/// Everything the node reads from its configuration file.
#[derive(Clone, Debug)]
pub struct Config {
    /// Audio device name.
    pub adevice: String,
    /// Own callsign.
    pub mycall: String,
    /// Push to talk output.
    pub ptt_gpio: Option<GpioSpec>,
    /// Data carrier detect indicator output.
    pub dcd_gpio: Option<GpioSpec>,
    /// Connected indicator output.
    pub con_gpio: Option<GpioSpec>,
    /// Sync indicator output.
    pub syn_gpio: Option<GpioSpec>,
    /// Transmit inhibit input.
    pub txinh_gpio: Option<GpioSpec>,
    /// Extra delay after DCD release, 10 ms units.
    pub dwait: u8,
    /// CSMA slot time, 10 ms units.
    pub slottime: u8,
    /// p-persistence threshold, 0-255.
    pub persist: u8,
    /// Idle before the first frame, 10 ms units.
    pub txdelay: u8,
    /// Idle after the last frame, 10 ms units.
    pub txtail: u8,
    /// Full duplex operation.
    pub fulldup: bool,
    /// Initial T1, seconds.
    pub frack: u32,
    /// Retry limit N2.
    pub retry: u32,
    /// Maximum information part length N1.
    pub paclen: usize,
    /// Window size k.
    pub maxframe: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adevice: "default".into(),
            mycall: "NOCALL".into(),
            ptt_gpio: None,
            dcd_gpio: None,
            con_gpio: None,
            syn_gpio: None,
            txinh_gpio: None,
            dwait: 0,
            slottime: 10,
            persist: 63,
            txdelay: 10,
            txtail: 10,
            fulldup: false,
            frack: 3,
            retry: 10,
            paclen: 256,
            maxframe: 4,
        }
    }
}

/// Split one line into tokens. Whitespace separates; quotes keep
/// spaces, and a doubled quote inside quotes is a literal quote.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    let mut any = false;
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                any = true;
                if in_quotes {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        token.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ' ' | '\t' | '\r' | '\n' if !in_quotes => {
                if any && !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
                any = false;
            }
            c => {
                any = true;
                token.push(c);
            }
        }
    }
    if !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

fn parse_number(tokens: &[String], line_no: usize, name: &str) -> Option<i64> {
    match tokens.get(1) {
        None => {
            warn!("config line {line_no}: missing value for {name}");
            None
        }
        Some(t) => match t.parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!("config line {line_no}: invalid value {t:?} for {name}");
                None
            }
        },
    }
}

fn ranged<T: TryFrom<i64>>(
    tokens: &[String],
    line_no: usize,
    name: &str,
    lo: i64,
    hi: i64,
    default: T,
) -> T {
    match parse_number(tokens, line_no, name) {
        Some(n) if (lo..=hi).contains(&n) => T::try_from(n).unwrap_or(default),
        Some(n) => {
            warn!("config line {line_no}: {name} value {n} outside range {lo} to {hi}, using default");
            default
        }
        None => default,
    }
}

fn parse_gpio(tokens: &[String], line_no: usize, name: &str) -> Option<GpioSpec> {
    if tokens.get(1).map(|t| t.to_ascii_uppercase()) != Some("GPIO".into()) {
        warn!("config line {line_no}: {name} expects GPIO <number>");
        return None;
    }
    let t = tokens.get(2)?;
    let (invert, num) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.as_str()),
    };
    match num.parse::<u32>() {
        Ok(pin) => Some(GpioSpec { pin, invert }),
        Err(_) => {
            warn!("config line {line_no}: bad GPIO number {t:?} for {name}");
            None
        }
    }
}

impl Config {
    /// Parse configuration text. Unknown directives warn and are
    /// ignored; bad values warn and keep their defaults.
    pub fn parse(text: &str) -> Self {
        let mut c = Self::default();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') || trimmed.starts_with('*') {
                continue;
            }
            let tokens = tokenize(line);
            let Some(directive) = tokens.first() else {
                continue;
            };
            match directive.to_ascii_uppercase().as_str() {
                "ADEVICE" => {
                    if let Some(name) = tokens.get(1) {
                        c.adevice = name.clone();
                    } else {
                        warn!("config line {line_no}: missing audio device name");
                    }
                }
                "MYCALL" => match tokens.get(1) {
                    Some(call) => {
                        let call = call.to_ascii_uppercase();
                        if call.len() <= 6
                            && !call.is_empty()
                            && call.chars().all(|ch| ch.is_ascii_alphanumeric())
                        {
                            c.mycall = call;
                        } else {
                            warn!(
                                "config line {line_no}: invalid MYCALL {call:?}, keeping {}",
                                c.mycall
                            );
                        }
                    }
                    None => warn!("config line {line_no}: missing value for MYCALL"),
                },
                "PTT" => c.ptt_gpio = parse_gpio(&tokens, line_no, "PTT"),
                "DCD" => c.dcd_gpio = parse_gpio(&tokens, line_no, "DCD"),
                "CON" => c.con_gpio = parse_gpio(&tokens, line_no, "CON"),
                "SYN" => c.syn_gpio = parse_gpio(&tokens, line_no, "SYN"),
                "TXINH" => c.txinh_gpio = parse_gpio(&tokens, line_no, "TXINH"),
                "DWAIT" => c.dwait = ranged(&tokens, line_no, "DWAIT", 0, 255, c.dwait),
                "SLOTTIME" => {
                    c.slottime = ranged(&tokens, line_no, "SLOTTIME", 0, 255, c.slottime)
                }
                "PERSIST" => c.persist = ranged(&tokens, line_no, "PERSIST", 0, 255, c.persist),
                "TXDELAY" => c.txdelay = ranged(&tokens, line_no, "TXDELAY", 0, 255, c.txdelay),
                "TXTAIL" => c.txtail = ranged(&tokens, line_no, "TXTAIL", 0, 255, c.txtail),
                "FULLDUP" => match tokens.get(1).map(|t| t.to_ascii_uppercase()) {
                    Some(v) if v == "ON" => c.fulldup = true,
                    Some(v) if v == "OFF" => c.fulldup = false,
                    other => {
                        warn!("config line {line_no}: FULLDUP expects on or off, got {other:?}")
                    }
                },
                "FRACK" => c.frack = ranged(&tokens, line_no, "FRACK", 1, 15, c.frack),
                "RETRY" => c.retry = ranged(&tokens, line_no, "RETRY", 1, 15, c.retry),
                "PACLEN" => {
                    c.paclen = ranged(&tokens, line_no, "PACLEN", 1, 2048, c.paclen as i64)
                        as usize
                }
                "MAXFRAME" => c.maxframe = ranged(&tokens, line_no, "MAXFRAME", 1, 7, c.maxframe),
                other => {
                    warn!("config line {line_no}: unknown directive {other:?} ignored");
                }
            }
        }
        c
    }

    /// Load from a file. A missing file warns and yields defaults,
    /// like starting with an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("could not open config file {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e, format!("reading {}", path.display()))),
        }
    }

    /// Channel access parameters for the transmitter.
    pub fn csma_params(&self) -> CsmaParams {
        CsmaParams {
            dwait: self.dwait,
            slottime: self.slottime,
            persist: self.persist,
            fulldup: self.fulldup,
        }
    }

    /// Link layer parameters.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            frack: self.frack,
            retry: self.retry,
            paclen: self.paclen,
            maxframe: self.maxframe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::parse("");
        assert_eq!(c.adevice, "default");
        assert_eq!(c.mycall, "NOCALL");
        assert_eq!(c.slottime, 10);
        assert_eq!(c.persist, 63);
        assert_eq!(c.txdelay, 10);
        assert_eq!(c.txtail, 10);
        assert_eq!(c.frack, 3);
        assert_eq!(c.retry, 10);
        assert_eq!(c.paclen, 256);
        assert_eq!(c.maxframe, 4);
        assert!(!c.fulldup);
        assert!(c.ptt_gpio.is_none());
    }

    #[test]
    fn full_example() {
        let c = Config::parse(
            "# node configuration\n\
             * legacy comment style\n\
             ADEVICE plughw:1,0\n\
             MYCALL k5okc\n\
             PTT GPIO 17\n\
             DCD GPIO -27\n\
             TXINH GPIO 22\n\
             DWAIT 5\n\
             SLOTTIME 20\n\
             PERSIST 100\n\
             TXDELAY 30\n\
             TXTAIL 12\n\
             FULLDUP on\n\
             FRACK 5\n\
             RETRY 8\n\
             PACLEN 512\n\
             MAXFRAME 7\n",
        );
        assert_eq!(c.adevice, "plughw:1,0");
        assert_eq!(c.mycall, "K5OKC");
        assert_eq!(c.ptt_gpio, Some(GpioSpec { pin: 17, invert: false }));
        assert_eq!(c.dcd_gpio, Some(GpioSpec { pin: 27, invert: true }));
        assert_eq!(c.txinh_gpio, Some(GpioSpec { pin: 22, invert: false }));
        assert_eq!(c.dwait, 5);
        assert_eq!(c.slottime, 20);
        assert_eq!(c.persist, 100);
        assert_eq!(c.txdelay, 30);
        assert_eq!(c.txtail, 12);
        assert!(c.fulldup);
        assert_eq!(c.frack, 5);
        assert_eq!(c.retry, 8);
        assert_eq!(c.paclen, 512);
        assert_eq!(c.maxframe, 7);
    }

    #[test]
    fn case_insensitive_directives() {
        let c = Config::parse("maxframe 6\nFrAcK 2\n");
        assert_eq!(c.maxframe, 6);
        assert_eq!(c.frack, 2);
    }

    #[test]
    fn out_of_range_falls_back() {
        let c = Config::parse(
            "MAXFRAME 9\nRETRY 99\nFRACK 0\nPACLEN 4000\nPERSIST 300\n",
        );
        assert_eq!(c.maxframe, 4);
        assert_eq!(c.retry, 10);
        assert_eq!(c.frack, 3);
        assert_eq!(c.paclen, 256);
        assert_eq!(c.persist, 63);
    }

    #[test]
    fn bad_mycall_kept_default() {
        let c = Config::parse("MYCALL toolongcall\n");
        assert_eq!(c.mycall, "NOCALL");
        let c = Config::parse("MYCALL W1-AW\n");
        assert_eq!(c.mycall, "NOCALL");
    }

    #[test]
    fn unknown_directives_ignored() {
        let c = Config::parse("NOSUCHTHING 42\nMAXFRAME 2\n");
        assert_eq!(c.maxframe, 2);
    }

    #[test]
    fn quoted_tokens() {
        assert_eq!(
            tokenize(r#"ADEVICE "name with spaces""#),
            vec!["ADEVICE".to_string(), "name with spaces".to_string()]
        );
        // Doubled quotes escape.
        assert_eq!(
            tokenize(r#"X "say ""hi"" there""#),
            vec!["X".to_string(), r#"say "hi" there"#.to_string()]
        );
        let c = Config::parse("ADEVICE \"my device\"\n");
        assert_eq!(c.adevice, "my device");
    }

    #[test]
    fn tabs_as_separators() {
        let c = Config::parse("MAXFRAME\t3\n");
        assert_eq!(c.maxframe, 3);
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let c = Config::load(Path::new("/nonexistent/ilnode.conf")).unwrap();
        assert_eq!(c.mycall, "NOCALL");
    }
}
