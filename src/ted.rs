/*! Gardner style timing error detector.

Runs at two samples per symbol. Each symbol instant the detector
looks at the previous decision sample, the mid-symbol sample, and
the current decision sample:

```text
error = (Re(prev) - Re(cur)) * Re(mid) + (Im(prev) - Im(cur)) * Im(mid)
```

Negative means the symbol was sampled early, positive late. The
error is clamped to ±0.3 and any NaN/Inf is squashed to zero.
 */
use crate::{Complex, Float};

const INPUTS_PER_SYMBOL: usize = 2;
const MAX_ERROR: Float = 0.3;

/// Timing error detector state.
pub struct TimingErrorDetector {
    error: Float,
    prev_error: Float,
    input_clock: usize,
    // Most recent sample first: current, middle, previous.
    window: [Complex; 3],
}

impl TimingErrorDetector {
    /// Create a detector with a zeroed window.
    pub fn new() -> Self {
        Self {
            error: 0.0,
            prev_error: 0.0,
            input_clock: INPUTS_PER_SYMBOL - 1,
            window: [Complex::default(); 3],
        }
    }

    /// Reset to the initial state, so the next input advance
    /// corresponds to a symbol sampling instant.
    pub fn reset(&mut self) {
        self.error = 0.0;
        self.prev_error = 0.0;
        self.window = [Complex::default(); 3];
        self.input_clock = INPUTS_PER_SYMBOL - 1;
    }

    /// Provide one input sample at 2 samples per symbol.
    ///
    /// On symbol instants this recomputes the error estimate.
    pub fn input(&mut self, x: Complex) {
        self.window = [x, self.window[0], self.window[1]];
        self.input_clock = (self.input_clock + 1) % INPUTS_PER_SYMBOL;
        if self.input_clock == 0 {
            self.prev_error = self.error;
            self.error = self.compute_error();
        }
    }

    fn compute_error(&self) -> Float {
        let [current, middle, previous] = self.window;
        let err = (previous.re - current.re) * middle.re
            + (previous.im - current.im) * middle.im;
        normalize(err, MAX_ERROR)
    }

    /// The mid-symbol sample, used as the symbol decision.
    pub fn middle_sample(&self) -> Complex {
        self.window[1]
    }

    /// The current timing error estimate.
    pub fn error(&self) -> Float {
        self.error
    }

    /// The error estimate from the previous symbol.
    pub fn prev_error(&self) -> Float {
        self.prev_error
    }

    /// Samples per symbol this detector requires.
    pub fn inputs_per_symbol(&self) -> usize {
        INPUTS_PER_SYMBOL
    }
}

impl Default for TimingErrorDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Constrain the error to ±maximum and squash floating point
/// garbage to zero.
fn normalize(error: Float, maximum: Float) -> Float {
    if error.is_nan() || error.is_infinite() {
        return 0.0;
    }
    error.clamp(-maximum, maximum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(x: Float) -> Complex {
        Complex::new(x, 0.0)
    }

    #[test]
    fn no_error_on_symmetric_transition() {
        // A transition sampled dead center: prev and cur are equal
        // magnitude opposite sign, mid is zero.
        let mut ted = TimingErrorDetector::new();
        ted.input(re(1.0)); // symbol instant
        ted.input(re(0.0)); // midpoint
        ted.input(re(-1.0)); // symbol instant
        assert_eq!(ted.error(), 0.0);
        assert_eq!(ted.middle_sample(), re(0.0));
    }

    #[test]
    fn late_sampling_sign() {
        // Sampling late on a falling edge: the midpoint has already
        // moved toward the new symbol.
        let mut ted = TimingErrorDetector::new();
        ted.input(re(0.9)); // symbol instant, a bit past the peak
        ted.input(re(-0.2)); // midpoint, past zero
        ted.input(re(-1.0)); // next symbol
        // (prev - cur) * mid = (0.9 - (-1.0)) * (-0.2) < 0
        assert!(ted.error() < 0.0);
    }

    #[test]
    fn error_updates_every_other_input() {
        let mut ted = TimingErrorDetector::new();
        ted.input(re(1.0));
        let e1 = ted.error();
        ted.input(re(0.5));
        // Mid-symbol input must not recompute.
        assert_eq!(ted.error(), e1);
        ted.input(re(-1.0));
        assert_eq!(ted.prev_error(), e1);
    }

    #[test]
    fn clamps_and_sanitizes() {
        let mut ted = TimingErrorDetector::new();
        ted.input(re(100.0));
        ted.input(re(100.0));
        ted.input(re(-100.0));
        assert_eq!(ted.error().abs(), MAX_ERROR);

        let mut ted = TimingErrorDetector::new();
        ted.input(re(Float::NAN));
        ted.input(re(1.0));
        ted.input(re(1.0));
        assert_eq!(ted.error(), 0.0);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut ted = TimingErrorDetector::new();
        for i in 0..7 {
            ted.input(re(i as Float));
        }
        ted.reset();
        assert_eq!(ted.error(), 0.0);
        assert_eq!(ted.middle_sample(), Complex::default());
        // First input after reset lands on a symbol instant again.
        ted.input(re(2.0));
        ted.input(re(3.0));
        let after_two = ted.error();
        ted.input(re(4.0));
        assert_ne!(after_two, ted.error());
    }
}
