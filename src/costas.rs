/*! Costas loop carrier recovery.

A second order control loop that tracks the residual carrier phase
and frequency of the downconverted signal. The phase detector is
the QPSK limiter form, which drives the constellation to its stable
points.

Loop gains follow the standard critically damped derivation from
damping factor and loop bandwidth, both in radians per sample.
 */
use crate::{Complex, Float};

const TAU: Float = 2.0 * std::f32::consts::PI;

/// Costas loop state.
pub struct CostasLoop {
    phase: Float,
    freq: Float,
    max_freq: Float,
    min_freq: Float,
    damping: Float,
    loop_bw: Float,
    alpha: Float,
    beta: Float,
}

impl CostasLoop {
    /// Create a loop with the given bandwidth and frequency limits,
    /// all in radians per sample.
    ///
    /// The loop bandwidth determines the lock range and should be
    /// set around TAU/100 to TAU/200.
    pub fn new(loop_bw: Float, min_freq: Float, max_freq: Float) -> Self {
        let mut c = Self {
            phase: 0.0,
            freq: 0.0,
            max_freq,
            min_freq,
            damping: 2.0f32.sqrt() / 2.0,
            loop_bw: 0.0,
            alpha: 0.0,
            beta: 0.0,
        };
        c.set_loop_bandwidth(loop_bw);
        c
    }

    fn update_gains(&mut self) {
        let denom = 1.0 + 2.0 * self.damping * self.loop_bw + self.loop_bw * self.loop_bw;
        self.alpha = (4.0 * self.damping * self.loop_bw) / denom;
        self.beta = (4.0 * self.loop_bw * self.loop_bw) / denom;
    }

    /// Set the loop bandwidth in radians per sample and rederive
    /// the gains.
    pub fn set_loop_bandwidth(&mut self, bw: Float) {
        self.loop_bw = bw.max(0.0);
        self.update_gains();
    }

    /// QPSK limiter phase error for a derotated sample.
    ///
    /// Needs a zero case: even though it is not likely, a sample
    /// exactly on an axis has no usable error.
    pub fn phase_detector(sample: Complex) -> Float {
        let re = sample.re;
        let im = sample.im;
        if re == 0.0 || im == 0.0 {
            return 0.0;
        }
        let real_limit: Float = if re > 0.0 { 1.0 } else { -1.0 };
        let imag_limit: Float = if im > 0.0 { 1.0 } else { -1.0 };
        real_limit * im - imag_limit * re
    }

    /// Advance the loop by one symbol with the given error.
    pub fn advance(&mut self, error: Float) {
        self.freq += self.beta * error;
        self.phase += self.freq + self.alpha * error;
        self.wrap_phase();
        self.limit_frequency();
    }

    fn wrap_phase(&mut self) {
        while self.phase > TAU {
            self.phase -= TAU;
        }
        while self.phase < -TAU {
            self.phase += TAU;
        }
    }

    fn limit_frequency(&mut self) {
        self.freq = self.freq.clamp(self.min_freq, self.max_freq);
    }

    /// Current phase estimate, radians.
    pub fn phase(&self) -> Float {
        self.phase
    }

    /// Current frequency estimate, radians per sample.
    pub fn frequency(&self) -> Float {
        self.freq
    }

    /// Loop filter proportional gain.
    pub fn alpha(&self) -> Float {
        self.alpha
    }

    /// Loop filter integrator gain.
    pub fn beta(&self) -> Float {
        self.beta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_loop() -> CostasLoop {
        CostasLoop::new(TAU / 180.0, -1.0, 1.0)
    }

    #[test]
    fn gains_from_bandwidth() {
        let c = test_loop();
        let wn = TAU / 180.0;
        let zeta = 2.0f32.sqrt() / 2.0;
        let denom = 1.0 + 2.0 * zeta * wn + wn * wn;
        assert!((c.alpha() - 4.0 * zeta * wn / denom).abs() < 1e-6);
        assert!((c.beta() - 4.0 * wn * wn / denom).abs() < 1e-6);
        assert!(c.alpha() > c.beta());
    }

    #[test]
    fn detector_zero_cases() {
        assert_eq!(CostasLoop::phase_detector(Complex::new(0.0, 1.0)), 0.0);
        assert_eq!(CostasLoop::phase_detector(Complex::new(1.0, 0.0)), 0.0);
        assert_eq!(CostasLoop::phase_detector(Complex::new(0.0, 0.0)), 0.0);
    }

    #[test]
    fn detector_sign() {
        // A point just counterclockwise of the 45 degree diagonal
        // has positive error; just clockwise negative, pulling the
        // constellation toward the diagonal.
        let a = Complex::from_polar(1.0, std::f32::consts::FRAC_PI_4 + 0.1);
        let b = Complex::from_polar(1.0, std::f32::consts::FRAC_PI_4 - 0.1);
        let ea = CostasLoop::phase_detector(a);
        let eb = CostasLoop::phase_detector(b);
        assert!(ea > 0.0, "{ea}");
        assert!(eb < 0.0, "{eb}");
        // On the diagonal, error is zero.
        let d = Complex::from_polar(1.0, std::f32::consts::FRAC_PI_4);
        assert!(CostasLoop::phase_detector(d).abs() < 1e-6);
    }

    #[test]
    fn phase_wraps_and_freq_clamps() {
        let mut c = test_loop();
        for _ in 0..100_000 {
            c.advance(1.0);
        }
        assert!(c.phase() <= TAU && c.phase() >= -TAU);
        assert!(c.frequency() <= 1.0);
        let mut c = test_loop();
        for _ in 0..100_000 {
            c.advance(-1.0);
        }
        assert!(c.frequency() >= -1.0);
    }

    #[test]
    fn converges_to_static_offset() {
        // Feed the loop a constellation with a constant 10 degree
        // offset from the diagonal; the loop should take it out.
        let mut c = test_loop();
        let offset: Float = 10.0f32.to_radians();
        let target = std::f32::consts::FRAC_PI_4 + offset;
        let mut last_err = 0.0;
        for _ in 0..2000 {
            let sample = Complex::from_polar(1.0, target - c.phase());
            last_err = CostasLoop::phase_detector(sample);
            c.advance(last_err);
        }
        assert!(last_err.abs() < 0.01, "loop failed to pull in: {last_err}");
    }
}
