#![warn(missing_docs)]
/*! IL2P/AX.25 packet radio node with a QPSK audio modem.

This crate implements a complete amateur packet radio node: a
connection-oriented AX.25 v2.0 data link layer, IL2P forward error
corrected framing, and a 1200 baud QPSK modem on a 1 kHz audio
carrier at 9600 samples/s.

# Architecture overview

Receive direction:

```text
   [ Audio source ]
         ↓
   [ Demodulator ]  downconvert → RRC → TED → Costas → slicer
         ↓
   [ Il2pDeframer ]  sync word → header → payload → RS decode
         ↓
   [ ReceiveQueue ]
         ↓
   [ LinkManager ]  AX.25 v2.0 state machines, one per peer
         ↓
   [ KISS client ]
```

Transmit direction:

```text
   [ KISS client ]
         ↓
   [ LinkManager ] → [ TransmitQueue ]
                           ↓
                      [ Csma ]  DCD wait, slot time, p-persistence
                           ↓
                 [ il2p_frame::encode ] → [ Modulator ] → audio
```

The threading model is described in [`node`]: one audio receive
thread, one transmit thread, one KISS listener, and the main event
loop which owns every link state machine.

Most modules are usable on their own; the modem and framing layers
take and produce plain slices and [`packet::Packet`] values, so the
whole radio path can be exercised in tests without an audio device.
 */

// Framing and FEC.
pub mod fec;
pub mod il2p_deframer;
pub mod il2p_frame;
pub mod il2p_header;
pub mod il2p_payload;
pub mod scrambler;

// Modem.
pub mod costas;
pub mod demodulator;
pub mod modulator;
pub mod qpsk;
pub mod rrc;
pub mod ted;

// Link layer and plumbing.
pub mod audio;
pub mod config;
pub mod csma;
pub mod kiss;
pub mod link;
pub mod node;
pub mod packet;
pub mod ptt;
pub mod pty;
pub mod rxqueue;
pub mod txqueue;

/// Float type used. Usually f32, but not guaranteed.
pub type Float = f32;

/// Complex (I/Q) data.
pub type Complex = num_complex::Complex<Float>;

/// Audio sample rate, in samples per second.
pub const SAMPLE_RATE: Float = 9600.0;

/// Symbol rate, in baud.
pub const SYMBOL_RATE: Float = 1200.0;

/// Passband carrier center frequency, in Hz.
pub const CENTER_FREQ: Float = 1000.0;

/// Audio samples per symbol.
pub const CYCLES: usize = (SAMPLE_RATE / SYMBOL_RATE) as usize;

/// Errors for this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wrapped IO error, with context.
    #[error("IO error {1}: {0}")]
    Io(std::io::Error, String),

    /// Audio device error.
    #[error("audio device error: {0}")]
    Audio(String),

    /// Configuration file problem.
    #[error("config error: {0}")]
    Config(String),

    /// A frame failed to encode or decode at the IL2P layer.
    #[error("framing error: {0}")]
    Framing(String),

    /// AX.25 protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid argument provided to an API.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Channel never became free, or a device never became ready.
    #[error("timed out: {0}")]
    Timeout(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e, "unknown".into())
    }
}

/// Crate result type, defaulting the error to this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod tests {
    //! Test helper functions.
    use super::*;

    /// For testing, assert that two slices are almost equal.
    ///
    /// Floating point numbers are almost never exactly equal.
    pub fn assert_almost_equal_complex(left: &[Complex], right: &[Complex]) {
        assert_eq!(
            left.len(),
            right.len(),
            "\nleft: {left:?}\nright: {right:?}"
        );
        for i in 0..left.len() {
            let dist = (left[i] - right[i]).norm_sqr().sqrt();
            if dist > 0.001 {
                assert_eq!(
                    left[i], right[i],
                    "\nElement {i}:\nleft: {left:?}\nright: {right:?}"
                );
            }
        }
    }
}
