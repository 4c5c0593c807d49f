// sir_ddft - A Rust implementation of the SIR-DDFT model
// Copyright (C) 2021 Julian Jeggle, Raphael Wittkowski

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The reciprocal-space influence function theta(k): the per-k-vector
//! convolution weight applied to the charge structure factor between the
//! forward and inverse FFT.
//!
//! theta(k) = (pi^(n/2-1) / (Gamma(n/2) V)) * |k|^(n-3) * Gamma((3-n)/2, pi^2 |k|^2 / kappa^2) * B(k)
//!
//! where the first `Gamma` is the (complete) gamma function, the second is
//! the upper incomplete gamma function, and `B(k)` is the product of the
//! per-axis inverse B-spline structure-factor moduli. `n=1` (Coulomb) is
//! handled by the textbook closed form directly, for numerical stability near
//! the `a = (3-n)/2 = 1` boundary.

use std::f64::consts::PI;

use crate::error::{PmeError, Result};
use crate::matrix::Matrix;
use crate::spline::bspline_weights;

/// Lanczos approximation to `Gamma(x)` for `x > 0` (g=7, n=9 coefficients).
fn gamma_function(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        PI / ((PI * x).sin() * gamma_function(1.0 - x))
    } else {
        let x = x - 1.0;
        let mut a = COEFFS[0];
        let t = x + G + 0.5;
        for (i, &c) in COEFFS.iter().enumerate().skip(1) {
            a += c / (x + i as f64);
        }
        (2.0 * PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * a
    }
}

/// Lower incomplete gamma `gamma(a,x)` via its power series, for `x < a+1`.
fn gamma_lower_series(a: f64, x: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    let mut sum = 1.0 / a;
    let mut term = sum;
    let mut ap = a;
    for _ in 0..300 {
        ap += 1.0;
        term *= x / ap;
        sum += term;
        if term.abs() < sum.abs() * 1e-16 {
            break;
        }
    }
    sum * x.powf(a) * (-x).exp()
}

/// Upper incomplete gamma `Gamma(a,x)` via a modified Lentz continued
/// fraction, for `x >= a+1`.
fn gamma_upper_continued_fraction(a: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..300 {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < 1e-15 {
            break;
        }
    }
    x.powf(a) * (-x).exp() * h
}

/// `Gamma(a,x)` for `a` in `(0,2]`, crossing over near `x = a+1` as the
/// series and continued fraction have complementary convergence regimes.
fn gamma_upper_core(a: f64, x: f64) -> f64 {
    if x < a + 1.0 {
        gamma_function(a) - gamma_lower_series(a, x)
    } else {
        gamma_upper_continued_fraction(a, x)
    }
}

/// Exponential integral `E1(x) = Gamma(0,x)`, needed at the `a=0` boundary
/// (kernel exponent `n=3`) where the `a<=0` recurrence below is singular.
fn exponential_integral_e1(x: f64) -> f64 {
    const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
    if x < 1.0 {
        let mut sum = 0.0;
        let mut xk = 1.0;
        let mut fact = 1.0;
        let mut sign = 1.0;
        for k in 1..=200 {
            xk *= x;
            fact *= k as f64;
            let term = sign * xk / (k as f64 * fact);
            sum += term;
            sign = -sign;
            if term.abs() < 1e-17 {
                break;
            }
        }
        -EULER_GAMMA - x.ln() + sum
    } else {
        gamma_upper_continued_fraction(0.0, x)
    }
}

/// Upper incomplete gamma `Gamma(a,x)` for any real order `a` (including
/// zero and negative orders, which the regularized incomplete gamma exposed
/// by general-purpose statistics crates cannot express). Shifts `a` into the
/// `(0,2]` range computable by [`gamma_upper_core`] using the recurrence
/// `Gamma(a+1,x) = a*Gamma(a,x) + x^a*exp(-x)`.
fn gamma_upper(a: f64, x: f64) -> f64 {
    if a.abs() < 1e-10 {
        return exponential_integral_e1(x);
    }
    if a > 0.0 && a <= 2.0 {
        gamma_upper_core(a, x)
    } else if a > 2.0 {
        let lower = gamma_upper(a - 1.0, x);
        (a - 1.0) * lower + x.powf(a - 1.0) * (-x).exp()
    } else {
        let upper = gamma_upper(a + 1.0, x);
        (upper - x.powf(a) * (-x).exp()) / a
    }
}

/// theta(k) for the Coulomb kernel (n=1), the textbook closed form
/// `exp(-pi^2 |k|^2 / kappa^2) / (pi * V * |k|^2)`. Caller guarantees `k2 > 0`.
fn theta_coulomb(k2: f64, kappa: f64, volume: f64) -> f64 {
    (-(PI * PI) * k2 / (kappa * kappa)).exp() / (PI * volume * k2)
}

/// theta(k) for a general r^-n kernel via the incomplete gamma form. Caller
/// guarantees `k2 > 0`. At `n=1` this reduces exactly to [`theta_coulomb`]:
/// `a = (3-1)/2 = 1` so `Gamma(1,x) = exp(-x)`, and the prefactor
/// `pi^(1/2-1) / Gamma(1/2) = 1/pi` leaves `exp(-x) / (pi V k2)`.
fn theta_general(n: u32, k2: f64, kappa: f64, volume: f64) -> f64 {
    let half_n = n as f64 / 2.0;
    let a = 1.5 - half_n;
    let x = (PI * PI) * k2 / (kappa * kappa);
    let g = gamma_upper(a, x);
    let prefactor = PI.powf(half_n - 1.0) / (gamma_function(half_n) * volume);
    prefactor * k2.powf((n as f64 - 3.0) / 2.0) * g
}

/// Squared moduli of the per-axis B-spline structure factor,
/// `|sum_j M_p(j) exp(2 pi i j m / dim)|^2` for `m = 0..dim-1`, with
/// Essmann's near-zero fix-up (replace a vanishing modulus, which occurs at
/// even spline orders for `m = dim/2`, by the average of its neighbours).
fn spline_moduli_squared(order: usize, dim: usize) -> Vec<f64> {
    let weights = bspline_weights(0.0, order);
    let mut out = vec![f64::NAN; dim];
    for m in 0..dim {
        let mut re = 0.0;
        let mut im = 0.0;
        for (j, &w) in weights.iter().enumerate() {
            let angle = 2.0 * PI * (j as f64) * (m as f64) / (dim as f64);
            re += w * angle.cos();
            im += w * angle.sin();
        }
        let mag2 = re * re + im * im;
        out[m] = if mag2 < 1e-10 { f64::NAN } else { mag2 };
    }
    for m in 0..dim {
        if out[m].is_nan() {
            let prev = out[(m + dim - 1) % dim];
            let next = out[(m + 1) % dim];
            let prev = if prev.is_nan() { 0.0 } else { prev };
            let next = if next.is_nan() { 0.0 } else { next };
            out[m] = (0.5 * (prev + next)).max(1e-10);
        }
    }
    out
}

/// Wrapped integer frequency for grid index `i` of a `dim`-length axis:
/// `0..=dim/2` map to themselves, the rest map to their negative aliases.
fn wrapped_frequency(i: usize, dim: usize) -> i64 {
    let i = i as i64;
    let dim = dim as i64;
    if i <= dim / 2 {
        i
    } else {
        i - dim
    }
}

/// The precomputed reciprocal-space influence grid: one `theta(k)` value per
/// grid point, flattened row-major `(A,B,C)` to match the complex charge
/// grid it is multiplied into.
#[derive(Debug, Clone)]
pub struct InfluenceGrid {
    dims: [usize; 3],
    values: Vec<f64>,
}

impl InfluenceGrid {
    /// Recompute the full influence grid. Depends only on the grid
    /// dimensions, the reciprocal lattice, `kappa`, the spline order and the
    /// kernel exponent `n`; callers should cache and only rebuild on setup or
    /// lattice change.
    pub fn compute(dims: [usize; 3], reciprocal: &Matrix<f64>, kappa: f64, order: usize, n: u32, volume: f64) -> Result<Self> {
        use crate::matrix::MatrixOps;
        if dims.iter().any(|&d| d == 0) {
            return Err(PmeError::Configuration("grid dimensions must be positive".into()));
        }
        if kappa <= 0.0 {
            return Err(PmeError::Configuration("splitting parameter kappa must be positive".into()));
        }
        let moduli: Vec<Vec<f64>> = dims.iter().map(|&d| spline_moduli_squared(order, d)).collect();
        let mut values = vec![0.0; dims[0] * dims[1] * dims[2]];
        for i in 0..dims[0] {
            let mi = wrapped_frequency(i, dims[0]) as f64;
            for j in 0..dims[1] {
                let mj = wrapped_frequency(j, dims[1]) as f64;
                for k in 0..dims[2] {
                    let mk = wrapped_frequency(k, dims[2]) as f64;
                    let idx = (i * dims[1] + j) * dims[2] + k;
                    if i == 0 && j == 0 && k == 0 {
                        values[idx] = 0.0;
                        continue;
                    }
                    let m = [mi, mj, mk];
                    let mut kvec = [0.0; 3];
                    for row in 0..3 {
                        let mut acc = 0.0;
                        for col in 0..3 {
                            acc += reciprocal.at(row, col) * m[col];
                        }
                        kvec[row] = acc;
                    }
                    let k2 = kvec[0] * kvec[0] + kvec[1] * kvec[1] + kvec[2] * kvec[2];
                    let raw = if n == 1 {
                        theta_coulomb(k2, kappa, volume)
                    } else {
                        theta_general(n, k2, kappa, volume)
                    };
                    let b = 1.0 / (moduli[0][i] * moduli[1][j] * moduli[2][k]);
                    values[idx] = raw * b;
                }
            }
        }
        Ok(InfluenceGrid { dims, values })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// theta(k) at grid index `(i,j,k)`.
    pub fn at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.values[(i * self.dims[1] + j) * self.dims[2] + k]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;

    fn cubic_reciprocal(side: f64) -> Matrix<f64> {
        let b = std::f64::consts::TAU / side;
        Matrix::from_data(3, 3, vec![b, 0.0, 0.0, 0.0, b, 0.0, 0.0, 0.0, b]).unwrap()
    }

    #[test]
    fn dc_bin_is_zero() {
        let reciprocal = cubic_reciprocal(10.0);
        let grid = InfluenceGrid::compute([8, 8, 8], &reciprocal, 0.3, 4, 1, 1000.0).unwrap();
        assert_eq!(grid.at(0, 0, 0), 0.0);
    }

    #[test]
    fn hermitian_symmetric_under_frequency_negation() {
        let reciprocal = cubic_reciprocal(10.0);
        let grid = InfluenceGrid::compute([8, 8, 8], &reciprocal, 0.3, 4, 1, 1000.0).unwrap();
        // index i and its negative-frequency alias dim-i give the same |k|^2.
        let a = grid.at(1, 2, 3);
        let b = grid.at(7, 6, 5);
        assert!((a - b).abs() < 1e-12, "a={} b={}", a, b);
    }

    #[test]
    fn coulomb_and_general_paths_agree_at_n_equals_1() {
        for &k2 in &[0.05, 1.3, 6.0] {
            let via_coulomb = theta_coulomb(k2, 0.3, 1000.0);
            let via_general = theta_general(1, k2, 0.3, 1000.0);
            assert!(
                (via_coulomb - via_general).abs() / via_coulomb.abs() < 1e-8,
                "k2={} via_coulomb={} via_general={}",
                k2,
                via_coulomb,
                via_general
            );
        }
    }

    #[test]
    fn gamma_upper_matches_known_closed_form_at_a_eq_2() {
        // Gamma(2,x) = (1+x) exp(-x)
        for &x in &[0.1, 1.0, 5.0, 20.0] {
            let expected = (1.0 + x) * (-x).exp();
            let got = gamma_upper(2.0, x);
            assert!((got - expected).abs() < 1e-10 * expected.abs().max(1.0), "x={} got={} expected={}", x, got, expected);
        }
    }

    #[test]
    fn gamma_upper_handles_negative_order() {
        // Gamma(a+1,x) = a*Gamma(a,x) + x^a*exp(-x) with a=-1 must recover Gamma(0,x).
        for &x in &[0.5, 2.0, 10.0] {
            let g0 = gamma_upper(0.0, x);
            let g_m1 = gamma_upper(-1.0, x);
            let rebuilt = -1.0 * g_m1 + x.powf(-1.0) * (-x).exp();
            assert!((rebuilt - g0).abs() < 1e-9 * g0.abs().max(1.0), "x={}", x);
        }
    }
}
