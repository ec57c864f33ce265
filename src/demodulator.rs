/*! QPSK demodulator.

Consumes passband PCM and produces decoded frames. For every
symbol period (8 samples):

1. Mix down by the 1 kHz carrier.
2. Run the samples through the RRC matched filter.
3. Feed two samples per symbol to the timing error detector.
4. Take the TED middle sample as the symbol decision.
5. Derotate by the Costas loop phase and compute the phase error.
6. Advance the loop, wrap phase, clamp frequency.
7. If the phase error magnitude is within π/4 the symbol is
   trusted: DCD asserts and the sliced dibit goes to the deframer,
   MSB first.

The π/4 gate doubles as data carrier detect: noise keeps the
detector out of lock, so the gate stays shut between frames.
 */
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::costas::CostasLoop;
use crate::il2p_deframer::Il2pDeframer;
use crate::packet::Packet;
use crate::ted::TimingErrorDetector;
use crate::{CENTER_FREQ, CYCLES, Complex, Float, SAMPLE_RATE, SYMBOL_RATE, qpsk, rrc};

const TAU: Float = 2.0 * std::f32::consts::PI;

/// Demodulator state.
pub struct Demodulator {
    fir: rrc::Fir,
    phase: Complex,
    rect: Complex,
    ted: TimingErrorDetector,
    costas: CostasLoop,
    deframer: Il2pDeframer,
    dcd: Arc<AtomicBool>,

    // Partial symbol period carried between calls.
    pending: Vec<Complex>,

    // Audio level envelope, for the level meter.
    quick_attack: Float,
    sluggish_decay: Float,
    peak: Float,
    valley: Float,

    offset_freq: Float,
}

impl Demodulator {
    /// Create a demodulator.
    ///
    /// `dcd` is shared with whoever needs carrier sense, normally
    /// the CSMA logic in the transmitter.
    pub fn new(dcd: Arc<AtomicBool>) -> Self {
        let w = TAU * CENTER_FREQ / SAMPLE_RATE;
        Self {
            fir: rrc::Fir::new(&rrc::taps(SAMPLE_RATE, SYMBOL_RATE, 0.35)),
            phase: Complex::new(1.0, 0.0),
            rect: Complex::new(w.cos(), -w.sin()),
            ted: TimingErrorDetector::new(),
            costas: CostasLoop::new(TAU / 180.0, -1.0, 1.0),
            deframer: Il2pDeframer::new(),
            dcd,
            pending: Vec::with_capacity(CYCLES),
            quick_attack: 0.080 * 0.2,
            sluggish_decay: 0.00012 * 0.2,
            peak: 0.0,
            valley: 0.0,
            offset_freq: 0.0,
        }
    }

    /// Process PCM samples, forwarding any decoded frames to `sink`.
    ///
    /// Sample counts that are not a multiple of the symbol period
    /// are fine; the remainder is carried into the next call.
    pub fn process<F: FnMut(Packet)>(&mut self, pcm: &[i16], sink: &mut F) {
        for &s in pcm {
            // Downconvert as the samples arrive.
            self.phase *= self.rect;
            self.pending.push(self.phase * (s as Float / 32768.0));
            if self.pending.len() == CYCLES {
                let mut block: [Complex; CYCLES] = [Complex::default(); CYCLES];
                block.copy_from_slice(&self.pending);
                self.pending.clear();
                self.process_symbol(&mut block, sink);
            }
        }
        self.phase /= self.phase.norm();
    }

    fn process_symbol<F: FnMut(Packet)>(&mut self, block: &mut [Complex; CYCLES], sink: &mut F) {
        self.fir.process(block);

        // Two samples per symbol for the timing error detector.
        for i in (0..CYCLES).step_by(CYCLES / 2) {
            self.ted.input(block[i]);
        }
        let decision = self.ted.middle_sample();

        self.update_levels(decision.norm_sqr());

        let costas_symbol = decision * Complex::from_polar(1.0, -self.costas.phase());
        let phase_error = CostasLoop::phase_detector(costas_symbol);
        self.costas.advance(phase_error);

        // If the phase error isn't within +/- pi/4 radians the
        // symbol probably can't be decoded properly.
        if phase_error.abs() <= std::f32::consts::FRAC_PI_4 {
            self.dcd.store(true, Ordering::Relaxed);
            let dibit = qpsk::slice_dibit(costas_symbol);
            for bit in [(dibit >> 1) & 1, dibit & 1] {
                if let Some(pp) = self.deframer.push_bit(bit) {
                    sink(pp);
                }
            }
        } else {
            self.dcd.store(false, Ordering::Relaxed);
        }

        // Detected frequency error, for external display.
        self.offset_freq = self.costas.frequency() * SYMBOL_RATE / TAU;
    }

    fn update_levels(&mut self, fsam: Float) {
        if fsam >= self.peak {
            self.peak = fsam * self.quick_attack + self.peak * (1.0 - self.quick_attack);
        } else {
            self.peak = fsam * self.sluggish_decay + self.peak * (1.0 - self.sluggish_decay);
        }
        if fsam <= self.valley {
            self.valley = fsam * self.quick_attack + self.valley * (1.0 - self.quick_attack);
        } else {
            self.valley =
                fsam * self.sluggish_decay + self.valley * (1.0 - self.sluggish_decay);
        }
    }

    /// Received audio level, half of peak to peak, scaled 0-100ish.
    pub fn audio_level(&self) -> i32 {
        ((self.peak - self.valley) * 50.0 + 0.5) as i32
    }

    /// Carrier frequency offset estimate in Hz.
    pub fn offset_freq(&self) -> Float {
        self.offset_freq
    }

    /// Whether the demodulator currently trusts the channel.
    pub fn dcd(&self) -> bool {
        self.dcd.load(Ordering::Relaxed)
    }

    /// Frames decoded since startup.
    pub fn decoded(&self) -> usize {
        self.deframer.decoded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il2p_frame;
    use crate::packet::{Address, CmdRes, FrameType};

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn test_packet(info: &[u8]) -> Packet {
        Packet::new_i(
            &addr("N0CALL-1"),
            &addr("M0XYZ-2"),
            CmdRes::Cmd,
            1,
            4,
            false,
            0xf0,
            info,
        )
        .unwrap()
    }

    /// Build passband PCM for a frame with the baseband rotated by
    /// `rot` radians, so tests can park the constellation right on
    /// a Costas lock point.
    fn synth(pp: &Packet, rot: Float) -> Vec<i16> {
        let bits = il2p_frame::encode_bits(pp).unwrap();
        let rotator = Complex::from_polar(1.0, rot);
        let mut fir = rrc::Fir::new(&rrc::taps(SAMPLE_RATE, SYMBOL_RATE, 0.35));
        let w = TAU * CENTER_FREQ / SAMPLE_RATE;

        let mut symbols = Vec::with_capacity(bits.len() / 2);
        for pair in bits.chunks_exact(2) {
            let dibit = ((pair[0] << 1) | pair[1]) & 3;
            symbols.push(qpsk::constellation_point(dibit) * rotator);
        }
        // Zero-stuff, filter, and upconvert; two extra samples in
        // front put the matched filter peaks on the demodulator's
        // decision instants, and idle tails flush the filters.
        let lead = 2;
        let tail = 40 * CYCLES;
        let mut signal = vec![Complex::default(); lead + symbols.len() * CYCLES + tail];
        for (i, &sym) in symbols.iter().enumerate() {
            signal[lead + i * CYCLES] = sym;
        }
        fir.process(&mut signal);
        let mut phase = Complex::new(1.0, 0.0);
        let rect = Complex::new(w.cos(), w.sin());
        signal
            .iter()
            .map(|&s| {
                phase *= rect;
                ((s * phase).re * 32768.0) as i16
            })
            .collect()
    }

    #[test]
    fn decodes_over_the_air_somewhere_in_lock_space() {
        // A QPSK Costas loop has four stable lock points and only
        // one of them yields the true bit stream; sweep the carrier
        // phase and require that some rotation decodes the frame.
        let pp = test_packet(b"over the air payload");
        let mut hits = 0;
        for deg in (0..360).step_by(5) {
            let pcm = synth(&pp, (deg as Float).to_radians());
            let mut got = Vec::new();
            let mut demod = Demodulator::new(Arc::new(AtomicBool::new(false)));
            demod.process(&pcm, &mut |p| got.push(p));
            if got.iter().any(|p| {
                p.info() == pp.info() && p.frame_type().ftype == FrameType::I
            }) {
                hits += 1;
            }
        }
        assert!(hits >= 1, "no rotation decoded the frame");
    }

    #[test]
    fn silence_produces_nothing() {
        let mut demod = Demodulator::new(Arc::new(AtomicBool::new(false)));
        let mut got = Vec::new();
        demod.process(&vec![0i16; 9600], &mut |p| got.push(p));
        assert!(got.is_empty());
        assert_eq!(demod.decoded(), 0);
    }

    #[test]
    fn split_calls_equal_one_call() {
        // Feeding the same PCM in odd-sized chunks must not change
        // the outcome.
        let pp = test_packet(b"chunk boundaries");
        let mut best = None;
        for deg in (0..360).step_by(5) {
            let pcm = synth(&pp, (deg as Float).to_radians());
            let mut got = Vec::new();
            let mut demod = Demodulator::new(Arc::new(AtomicBool::new(false)));
            demod.process(&pcm, &mut |p| got.push(p));
            if !got.is_empty() {
                best = Some((deg, pcm));
                break;
            }
        }
        let (_, pcm) = best.expect("no decodable rotation found");

        let mut got = Vec::new();
        let mut demod = Demodulator::new(Arc::new(AtomicBool::new(false)));
        for chunk in pcm.chunks(7) {
            demod.process(chunk, &mut |p| got.push(p));
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].info(), b"chunk boundaries");
    }

    #[test]
    fn audio_level_reacts() {
        let pp = test_packet(b"level");
        let pcm = synth(&pp, 0.0);
        let mut demod = Demodulator::new(Arc::new(AtomicBool::new(false)));
        demod.process(&pcm, &mut |_| {});
        assert!(demod.audio_level() > 0);
    }
}
