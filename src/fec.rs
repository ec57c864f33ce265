/*! Reed-Solomon codec over GF(256).

Conventional RS(255, 255−r) with field polynomial 0x11D, first
consecutive root 0, and primitive element 1, as used by IL2P. The
supported parity lengths are 2 (header) and 16 (payload blocks),
plus the other sizes the framing layer's FEC levels are defined
over.

Blocks shorter than the full codeword are virtually zero-padded at
the front. A "correction" that lands inside that padding means the
decoder was fooled by an uncorrectable block, so it is rejected.
 */
use std::sync::OnceLock;

use crate::{Error, Result};

/// Codeword length, symbols.
const NN: usize = 255;

/// Index-form representation of zero (alpha to the minus infinity).
const A0: u8 = NN as u8;

/// Parity lengths with a prebuilt codec.
pub const SUPPORTED_PARITY: [usize; 5] = [2, 4, 6, 8, 16];

fn modnn(x: usize) -> usize {
    x % NN
}

/// One RS codec, for a fixed number of parity symbols.
pub struct ReedSolomon {
    alpha_to: [u8; NN + 1],
    index_of: [u8; NN + 1],
    genpoly: Vec<u8>, // Index form.
    nroots: usize,
    fcr: usize,
    prim: usize,
    iprim: usize,
}

impl ReedSolomon {
    /// Create a codec over GF(2^8).
    ///
    /// `gfpoly` is the field generator polynomial, `fcr` the first
    /// consecutive root (index form), `prim` the primitive element,
    /// and `nroots` the number of parity symbols.
    pub fn new(gfpoly: u32, fcr: usize, prim: usize, nroots: usize) -> Result<Self> {
        if fcr >= NN + 1 || prim == 0 || prim >= NN + 1 || nroots >= NN + 1 {
            return Err(Error::InvalidArgument(format!(
                "bad RS parameters fcr={fcr} prim={prim} nroots={nroots}"
            )));
        }
        let mut alpha_to = [0u8; NN + 1];
        let mut index_of = [0u8; NN + 1];
        index_of[0] = A0;
        alpha_to[NN] = 0;
        let mut sr: u32 = 1;
        for i in 0..NN {
            index_of[sr as usize] = i as u8;
            alpha_to[i] = sr as u8;
            sr <<= 1;
            if sr & 256 != 0 {
                sr ^= gfpoly;
            }
            sr &= NN as u32;
        }
        if sr != 1 {
            return Err(Error::InvalidArgument(format!(
                "field generator polynomial {gfpoly:#x} is not primitive"
            )));
        }

        // Find prim-th root of 1, used in decoding.
        let mut iprim = 1;
        while iprim % prim != 0 {
            iprim += NN;
        }
        let iprim = iprim / prim;

        // Form the code generator polynomial from its roots.
        let mut genpoly = vec![0u8; nroots + 1];
        genpoly[0] = 1;
        let mut root = fcr * prim;
        for i in 0..nroots {
            genpoly[i + 1] = 1;
            for j in (1..=i).rev() {
                genpoly[j] = if genpoly[j] != 0 {
                    genpoly[j - 1]
                        ^ alpha_to[modnn(index_of[genpoly[j] as usize] as usize + root)]
                } else {
                    genpoly[j - 1]
                };
            }
            genpoly[0] = alpha_to[modnn(index_of[genpoly[0] as usize] as usize + root)];
            root += prim;
        }
        // Index form for quicker encoding.
        for g in genpoly.iter_mut() {
            *g = index_of[*g as usize];
        }

        Ok(Self {
            alpha_to,
            index_of,
            genpoly,
            nroots,
            fcr,
            prim,
            iprim,
        })
    }

    /// Number of parity symbols this codec produces.
    pub fn parity_len(&self) -> usize {
        self.nroots
    }

    /// Encode, returning the parity symbols.
    ///
    /// `data` may be shorter than the nominal 255−r symbols; it is
    /// treated as if zero-padded at the front, which contributes
    /// nothing to the parity.
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        assert!(data.len() <= NN - self.nroots);
        let mut bb = vec![0u8; self.nroots];
        for &d in data {
            let feedback = self.index_of[(d ^ bb[0]) as usize];
            if feedback != A0 {
                for j in 1..self.nroots {
                    bb[j] ^= self.alpha_to
                        [modnn(feedback as usize + self.genpoly[self.nroots - j] as usize)];
                }
            }
            bb.copy_within(1.., 0);
            bb[self.nroots - 1] = if feedback != A0 {
                self.alpha_to[modnn(feedback as usize + self.genpoly[0] as usize)]
            } else {
                0
            };
        }
        bb
    }

    /// Decode a received block of data followed by parity.
    ///
    /// Returns the corrected data portion and the number of symbols
    /// corrected, or `None` if the block is uncorrectable. A
    /// correction located in the virtual padding region also counts
    /// as uncorrectable.
    pub fn decode(&self, block: &[u8]) -> Option<(Vec<u8>, usize)> {
        assert!(block.len() >= self.nroots && block.len() <= NN);
        let pad = NN - block.len();
        let mut data = vec![0u8; NN];
        data[pad..].copy_from_slice(block);

        let locs = match self.correct(&mut data) {
            Some(locs) => locs,
            None => return None,
        };
        // A fix inside the virtual padding means the codeword was
        // actually beyond repair.
        if locs.iter().any(|&l| l < pad) {
            return None;
        }
        let dlen = block.len() - self.nroots;
        Some((data[pad..pad + dlen].to_vec(), locs.len()))
    }

    /// Berlekamp-Massey plus Chien search over a full 255-symbol
    /// codeword. Returns the corrected error locations.
    fn correct(&self, data: &mut [u8]) -> Option<Vec<usize>> {
        let nroots = self.nroots;
        let al = &self.alpha_to;
        let il = &self.index_of;

        // Syndromes: evaluate data(x) at the roots of g(x).
        let mut s = vec![data[0]; nroots];
        for &d in &data[1..NN] {
            for i in 0..nroots {
                s[i] = if s[i] == 0 {
                    d
                } else {
                    d ^ al[modnn(il[s[i] as usize] as usize + (self.fcr + i) * self.prim)]
                };
            }
        }
        let mut syn_error = 0u8;
        for sy in s.iter_mut() {
            syn_error |= *sy;
            *sy = il[*sy as usize];
        }
        if syn_error == 0 {
            // Already a codeword.
            return Some(Vec::new());
        }

        // Berlekamp-Massey for the error locator polynomial lambda.
        let mut lambda = vec![0u8; nroots + 1];
        lambda[0] = 1;
        let mut b: Vec<u8> = lambda.iter().map(|&l| il[l as usize]).collect();
        let mut t = vec![0u8; nroots + 1];
        let mut el = 0usize;
        for r in 1..=nroots {
            let mut discr_r = 0u8;
            for i in 0..r {
                if lambda[i] != 0 && s[r - i - 1] != A0 {
                    discr_r ^=
                        al[modnn(il[lambda[i] as usize] as usize + s[r - i - 1] as usize)];
                }
            }
            let discr_r = il[discr_r as usize];
            if discr_r == A0 {
                // B(x) <- x*B(x)
                b.copy_within(0..nroots, 1);
                b[0] = A0;
            } else {
                // T(x) <- lambda(x) - discr_r*x*B(x)
                t[0] = lambda[0];
                for i in 0..nroots {
                    t[i + 1] = if b[i] != A0 {
                        lambda[i + 1] ^ al[modnn(discr_r as usize + b[i] as usize)]
                    } else {
                        lambda[i + 1]
                    };
                }
                if 2 * el <= r - 1 {
                    el = r - el;
                    // B(x) <- inv(discr_r) * lambda(x)
                    for i in 0..=nroots {
                        b[i] = if lambda[i] == 0 {
                            A0
                        } else {
                            modnn(
                                il[lambda[i] as usize] as usize + NN - discr_r as usize,
                            ) as u8
                        };
                    }
                } else {
                    b.copy_within(0..nroots, 1);
                    b[0] = A0;
                }
                lambda.copy_from_slice(&t);
            }
        }

        // Index form, and the degree of lambda.
        let mut deg_lambda = 0;
        for (i, l) in lambda.iter_mut().enumerate() {
            *l = il[*l as usize];
            if *l != A0 {
                deg_lambda = i;
            }
        }

        // Chien search for the roots of lambda.
        let mut reg = lambda.clone();
        let mut root = Vec::new();
        let mut loc = Vec::new();
        let mut k = self.iprim - 1;
        for i in 1..=NN {
            let mut q = 1u8; // lambda[0] is always unity.
            for j in (1..=deg_lambda).rev() {
                if reg[j] != A0 {
                    reg[j] = modnn(reg[j] as usize + j) as u8;
                    q ^= al[reg[j] as usize];
                }
            }
            if q == 0 {
                root.push(i);
                loc.push(k);
                if root.len() == deg_lambda {
                    break;
                }
            }
            k = modnn(k + self.iprim);
        }
        if deg_lambda != root.len() {
            // deg(lambda) != number of roots: uncorrectable.
            return None;
        }

        // Error evaluator polynomial omega(x) = s(x)*lambda(x) mod x^nroots.
        let mut omega = vec![A0; nroots + 1];
        let mut deg_omega = 0;
        for i in 0..nroots {
            let mut tmp = 0u8;
            for j in (0..=deg_lambda.min(i)).rev() {
                if s[i - j] != A0 && lambda[j] != A0 {
                    tmp ^= al[modnn(s[i - j] as usize + lambda[j] as usize)];
                }
            }
            if tmp != 0 {
                deg_omega = i;
            }
            omega[i] = il[tmp as usize];
        }

        // Forney: compute error values and apply them.
        for j in (0..root.len()).rev() {
            let mut num1 = 0u8;
            for i in (0..=deg_omega).rev() {
                if omega[i] != A0 {
                    num1 ^= al[modnn(omega[i] as usize + i * root[j])];
                }
            }
            let num2 = al[(root[j] as i64 * (self.fcr as i64 - 1) + NN as i64)
                .rem_euclid(NN as i64) as usize];
            let mut den = 0u8;
            // lambda[i+1] for even i is the formal derivative of lambda.
            let mut i = deg_lambda.min(nroots - 1) & !1;
            loop {
                if lambda[i + 1] != A0 {
                    den ^= al[modnn(lambda[i + 1] as usize + i * root[j])];
                }
                if i < 2 {
                    break;
                }
                i -= 2;
            }
            if den == 0 {
                return None;
            }
            if num1 != 0 {
                data[loc[j]] ^= al[modnn(
                    il[num1 as usize] as usize + il[num2 as usize] as usize + NN
                        - il[den as usize] as usize,
                )];
            }
        }
        Some(loc)
    }
}

static CODECS: OnceLock<Vec<ReedSolomon>> = OnceLock::new();

/// The shared codec for a given parity length.
///
/// Falls back to the 2-parity codec for unsupported lengths, which
/// matches asking for FEC the framing layer never generates.
pub fn for_parity(nparity: usize) -> &'static ReedSolomon {
    let tab = CODECS.get_or_init(|| {
        SUPPORTED_PARITY
            .iter()
            .map(|&r| {
                ReedSolomon::new(0x11d, 0, 1, r)
                    .expect("RS codec init with known good parameters")
            })
            .collect()
    });
    tab.iter().find(|rs| rs.nroots == nparity).unwrap_or(&tab[0])
}
