/*! Root raised cosine pulse shaping.

The same 127 tap filter is used for transmit pulse shaping and as
the receive matched filter. Lower bauds need more taps, and at 1200
baud on a 9600 Hz sample rate, 127 covers almost 16 symbols of
pulse tail.
 */
use crate::{Complex, Float};

/// Filter length in taps.
pub const NTAPS: usize = 127;

/// Passband gain factor applied by the filter.
pub const GAIN: Float = 1.85;

/// Design the root raised cosine taps.
///
/// `fs` is the sample rate, `rs` the symbol rate and `alpha` the
/// excess bandwidth. The taps are normalized so their sum equals
/// [`GAIN`].
pub fn taps(fs: Float, rs: Float, alpha: Float) -> Vec<Float> {
    let spb = fs / rs; // samples per symbol
    let pi = std::f32::consts::PI;
    let mut coeffs = vec![0.0 as Float; NTAPS];
    let mut scale: Float = 0.0;

    for (i, c) in coeffs.iter_mut().enumerate() {
        let xindx = i as Float - (NTAPS / 2) as Float;
        let x1 = pi * xindx / spb;
        let x2 = 4.0 * alpha * xindx / spb;
        let x3 = x2 * x2 - 1.0;

        let (num, den);
        if x3.abs() >= 0.000001 {
            // Away from the rounding-sensitive singularities.
            num = if i != NTAPS / 2 {
                ((1.0 + alpha) * x1).cos()
                    + ((1.0 - alpha) * x1).sin() / (4.0 * alpha * xindx / spb)
            } else {
                ((1.0 + alpha) * x1).cos() + (1.0 - alpha) * pi / (4.0 * alpha)
            };
            den = x3 * pi;
        } else {
            if alpha == 1.0 {
                *c = -1.0;
                scale += *c;
                continue;
            }
            let x3 = (1.0 - alpha) * x1;
            let x2 = (1.0 + alpha) * x1;
            num = x2.sin() * (1.0 + alpha) * pi
                - x3.cos() * ((1.0 - alpha) * pi * spb) / (4.0 * alpha * xindx)
                + x3.sin() * spb * spb / (4.0 * alpha * xindx * xindx);
            den = -32.0 * pi * alpha * alpha * xindx / spb;
        }

        *c = 4.0 * alpha * num / den;
        scale += *c;
    }

    for c in coeffs.iter_mut() {
        *c = (*c * GAIN) / scale;
    }

    coeffs
}

/// A streaming FIR filter over complex samples with real taps.
///
/// Keeps its own delay line, so consecutive calls filter one
/// continuous signal.
pub struct Fir {
    taps: Vec<Float>,
    mem: Vec<Complex>,
}

impl Fir {
    /// Create a filter from taps.
    pub fn new(taps: &[Float]) -> Self {
        Self {
            taps: taps.to_vec(),
            mem: vec![Complex::default(); taps.len()],
        }
    }

    /// Filter samples in place, applying [`GAIN`].
    pub fn process(&mut self, samples: &mut [Complex]) {
        let n = self.taps.len();
        for s in samples.iter_mut() {
            self.mem.copy_within(1..n, 0);
            self.mem[n - 1] = *s;
            let mut y = Complex::default();
            for (m, t) in self.mem.iter().zip(self.taps.iter()) {
                y += m * t;
            }
            *s = y * GAIN;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SAMPLE_RATE, SYMBOL_RATE};

    #[test]
    fn taps_are_symmetric() {
        let h = taps(SAMPLE_RATE, SYMBOL_RATE, 0.35);
        assert_eq!(h.len(), NTAPS);
        for i in 0..NTAPS / 2 {
            let a = h[i];
            let b = h[NTAPS - 1 - i];
            assert!((a - b).abs() < 1e-6, "tap {i}: {a} vs {b}");
        }
        // Center tap is the peak.
        let center = h[NTAPS / 2];
        assert!(h.iter().all(|&t| t <= center));
    }

    #[test]
    fn taps_sum_to_gain() {
        let h = taps(SAMPLE_RATE, SYMBOL_RATE, 0.35);
        let sum: Float = h.iter().sum();
        assert!((sum - GAIN).abs() < 1e-3, "sum = {sum}");
    }

    #[test]
    fn dc_response() {
        // A long run of constant input converges to sum(taps)*GAIN.
        let h = taps(SAMPLE_RATE, SYMBOL_RATE, 0.35);
        let mut fir = Fir::new(&h);
        let mut buf = vec![Complex::new(1.0, 0.0); NTAPS * 2];
        fir.process(&mut buf);
        let settled = buf[buf.len() - 1];
        assert!((settled.re - GAIN * GAIN).abs() < 1e-2, "{settled}");
        assert!(settled.im.abs() < 1e-4);
    }

    #[test]
    fn state_carries_across_calls() {
        let h = taps(SAMPLE_RATE, SYMBOL_RATE, 0.35);
        let mut one = Fir::new(&h);
        let mut split = Fir::new(&h);

        let input: Vec<Complex> = (0..64)
            .map(|i| Complex::new((i as Float * 0.3).sin(), (i as Float * 0.7).cos()))
            .collect();

        let mut a = input.clone();
        one.process(&mut a);

        let mut b1 = input[..20].to_vec();
        let mut b2 = input[20..].to_vec();
        split.process(&mut b1);
        split.process(&mut b2);
        b1.extend_from_slice(&b2);

        crate::tests::assert_almost_equal_complex(&a, &b1);
    }
}
