//! Biquad (second-order IIR) filter coefficients.
//!
//! Coefficient names follow the usual transfer function
//! `H(z) = (b0 + b1 z^-1 + b2 z^-2) / (a0 + a1 z^-1 + a2 z^-2)`.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
}

impl Biquad {
    pub fn new(a0: f64, a1: f64, a2: f64, b0: f64, b1: f64, b2: f64) -> Self {
        Self {
            a0,
            a1,
            a2,
            b0,
            b1,
            b2,
        }
    }

    /// Returns the same filter scaled so that `a0 == 1`.
    pub fn normalized(&self) -> Self {
        Self::new(
            1.0,
            self.a1 / self.a0,
            self.a2 / self.a0,
            self.b0 / self.a0,
            self.b1 / self.a0,
            self.b2 / self.a0,
        )
    }

    /// Coefficients in DSP parameter order: `[-a1, -a2, b0, b1, b2]` of the
    /// normalized filter.  The first entry belongs at the highest address.
    pub fn dsp_coefficients(&self) -> [f64; 5] {
        let n = self.normalized();
        [-n.a1, -n.a2, n.b0, n.b1, n.b2]
    }
}
