/*! QPSK modulator.

Turns bit streams into filtered passband PCM. Each symbol becomes
one constellation point followed by seven zero samples (a
zero-insertion upsample from 1200 to 9600), the result is pulse
shaped by the RRC filter, mixed up to the 1 kHz carrier, and the
real part scaled to 16 bit PCM.

Between frames the transmitter sends idle: the flag byte 0x00 sent
one bit per symbol at 75% amplitude, a steady low level tone the
far receiver can AGC and carrier lock on.
 */
use crate::{CENTER_FREQ, CYCLES, Complex, Float, SAMPLE_RATE, SYMBOL_RATE, qpsk, rrc};

/// The idle flag byte sent during txdelay and txtail.
pub const IDLE_FLAG: u8 = 0x00;

const TAU: Float = 2.0 * std::f32::consts::PI;

/// How the bits map onto symbols.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Two bits per symbol, full amplitude. Used for frames.
    Qpsk,
    /// One bit per symbol, full amplitude.
    Bpsk,
    /// One bit per symbol at 75% amplitude. Used for idle flags.
    Idle,
}

/// Modulator state: pulse filter memory and carrier phase.
pub struct Modulator {
    fir: rrc::Fir,
    phase: Complex,
    rect: Complex,
}

impl Modulator {
    /// Create a modulator with a freshly designed RRC filter.
    pub fn new() -> Self {
        let w = TAU * CENTER_FREQ / SAMPLE_RATE;
        Self {
            fir: rrc::Fir::new(&rrc::taps(SAMPLE_RATE, SYMBOL_RATE, 0.35)),
            phase: Complex::new(1.0, 0.0),
            rect: Complex::new(w.cos(), w.sin()),
        }
    }

    /// Modulate a bit stream, appending PCM samples to `out`.
    ///
    /// Returns the number of symbols produced. In QPSK mode a
    /// trailing odd bit is dropped; framed traffic is always a
    /// whole number of bytes so this does not come up on air.
    pub fn modulate_bits(&mut self, mode: Mode, bits: &[u8], out: &mut Vec<i16>) -> usize {
        let symbols: Vec<Complex> = match mode {
            Mode::Qpsk => bits
                .chunks_exact(2)
                .map(|pair| {
                    let dibit = ((pair[0] << 1) | pair[1]) & 0x3;
                    qpsk::constellation_point(dibit)
                })
                .collect(),
            Mode::Bpsk => bits
                .iter()
                .map(|&b| qpsk::constellation_point(if b == 0 { 0 } else { 3 }))
                .collect(),
            Mode::Idle => bits
                .iter()
                .map(|&b| qpsk::constellation_point(if b == 0 { 0 } else { 3 }) * 0.75)
                .collect(),
        };
        self.put_symbols(&symbols, out);
        symbols.len()
    }

    /// Modulate `num_flags` idle flag bytes.
    pub fn modulate_idle(&mut self, num_flags: usize, out: &mut Vec<i16>) -> usize {
        let bits = crate::il2p_frame::bytes_to_bits(&vec![IDLE_FLAG; num_flags]);
        self.modulate_bits(Mode::Idle, &bits, out)
    }

    /// Upsample, filter, upconvert and write PCM.
    fn put_symbols(&mut self, symbols: &[Complex], out: &mut Vec<i16>) {
        // Zero-insertion from the symbol rate to the sample rate.
        let mut signal = vec![Complex::default(); symbols.len() * CYCLES];
        for (i, &sym) in symbols.iter().enumerate() {
            signal[i * CYCLES] = sym;
        }

        self.fir.process(&mut signal);

        // Shift the filtered baseband up to passband.
        out.reserve(signal.len());
        for s in signal {
            self.phase *= self.rect;
            let pcm = (s * self.phase).re * 32768.0;
            out.push(pcm as i16);
        }
        // Keep the recursive oscillator on the unit circle.
        self.phase /= self.phase.norm();
    }
}

impl Default for Modulator {
    fn default() -> Self {
        Self::new()
    }
}
