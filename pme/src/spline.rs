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

//! Cardinal B-splines used to spread/interpolate charges onto the grid.
//!
//! For spline order `p` and fractional offset `w` in `[0,1)`, [`bspline_weights`]
//! returns the `p` consecutive values `M_p(w+i)` for `i=0..p-1`, via the
//! classic recurrence `M_k(x) = (x/(k-1))*M_{k-1}(x) + ((k-x)/(k-1))*M_{k-1}(x-1)`
//! seeded by the order-2 (tent) spline.

/// Spline weights `M_p(w+i)` for `i=0..p-1`, order `p >= 1`.
///
/// `p=1` is the (discontinuous) box function used only as the base case for
/// derivative construction; callers spreading/probing charge always use `p>=2`.
pub fn bspline_weights(w: f64, p: usize) -> Vec<f64> {
    assert!(p >= 1, "spline order must be at least 1");
    assert!((0.0..1.0).contains(&w) || w == 0.0, "fractional offset must be in [0,1)");
    if p == 1 {
        return vec![1.0];
    }
    // Classic in-place recurrence (Essmann et al., 1995). `m[i]` ends up
    // holding `M_p(w + (p-1-i))`; we reverse at the end for the canonical
    // `weights[i] = M_p(w+i)` convention.
    let mut m = vec![0.0_f64; p];
    m[p - 1] = 0.0;
    m[1] = w;
    m[0] = 1.0 - w;
    for k in 3..=p {
        let div = 1.0 / (k as f64 - 1.0);
        m[k - 1] = div * w * m[k - 2];
        for j in 1..=(k - 2) {
            m[k - 1 - j] = div * ((w + j as f64) * m[k - 2 - j] + (k as f64 - j as f64 - w) * m[k - 1 - j]);
        }
        m[0] = div * (1.0 - w) * m[0];
    }
    m.reverse();
    m
}

/// The `deriv`-th derivative of the order-`p` spline, evaluated at the same
/// `p` support points `w+i` for `i=0..p-1`. `deriv=0` is [`bspline_weights`]
/// itself; `deriv >= p` returns all zeros, since a degree-(p-1) piecewise
/// polynomial has no more than p-1 nonzero derivatives.
///
/// Built by repeated application of `dM_p/dx = M_{p-1}(x) - M_{p-1}(x-1)`,
/// starting from the order-`(p-deriv)` spline and widening the support by one
/// grid point per application, which is equivalent to the `deriv`-fold finite
/// difference `d^n M_p/dx^n (x) = sum_j (-1)^j C(n,j) M_{p-n}(x-j)`.
pub fn bspline_derivative_weights(w: f64, p: usize, deriv: usize) -> Vec<f64> {
    if deriv == 0 {
        return bspline_weights(w, p);
    }
    if deriv >= p {
        // An order-p spline is a degree-(p-1) piecewise polynomial: derivatives
        // at or beyond order p vanish identically everywhere they are defined.
        return vec![0.0; p];
    }
    let mut cur = bspline_weights(w, p - deriv);
    for _ in 0..deriv {
        let len = cur.len() + 1;
        let mut next = vec![0.0; len];
        for i in 0..len {
            let left = if i >= 1 && i - 1 < cur.len() { cur[i - 1] } else { 0.0 };
            let right = if i < cur.len() { cur[i] } else { 0.0 };
            next[i] = right - left;
        }
        cur = next;
    }
    cur
}

/// Per-axis spline values and derivatives for one atom, stored contiguously
/// by axis to support a streaming inner loop during spread/probe.
///
/// `weights(axis, deriv)` returns the `p` values `d^deriv M_p/dx^deriv (w_axis+i)`.
#[derive(Debug, Clone)]
pub struct SplineTensor {
    order: usize,
    max_deriv: usize,
    // layout: axis-major, then derivative order, then the `order` support values.
    data: Vec<f64>,
}

impl SplineTensor {
    /// Compute values and derivatives `0..=max_deriv` for all three axes at
    /// fractional offsets `w = (wx, wy, wz)`.
    pub fn compute(w: [f64; 3], order: usize, max_deriv: usize) -> Self {
        let stride = order;
        let per_axis = (max_deriv + 1) * stride;
        let mut data = vec![0.0; 3 * per_axis];
        for axis in 0..3 {
            for d in 0..=max_deriv {
                let weights = bspline_derivative_weights(w[axis], order, d);
                let base = axis * per_axis + d * stride;
                data[base..base + stride].copy_from_slice(&weights);
            }
        }
        SplineTensor { order, max_deriv, data }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn max_deriv(&self) -> usize {
        self.max_deriv
    }

    /// The `order`-length weights for `axis` (0=x,1=y,2=z) at derivative `deriv`.
    pub fn weights(&self, axis: usize, deriv: usize) -> &[f64] {
        let per_axis = (self.max_deriv + 1) * self.order;
        let base = axis * per_axis + deriv * self.order;
        &self.data[base..base + self.order]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_of_unity_holds_for_all_offsets_and_orders() {
        for &p in &[4usize, 6, 8] {
            for &w in &[0.0, 0.25, 0.5, 0.999] {
                let weights = bspline_weights(w, p);
                let sum: f64 = weights.iter().sum();
                assert!((sum - 1.0).abs() < 1e-13, "p={} w={} sum={}", p, w, sum);
            }
        }
    }

    #[test]
    fn derivative_sums_to_zero() {
        for &p in &[4usize, 6, 8] {
            for &w in &[0.0, 0.25, 0.5, 0.999] {
                let d = bspline_derivative_weights(w, p, 1);
                let sum: f64 = d.iter().sum();
                assert!(sum.abs() < 1e-12, "p={} w={} sum={}", p, w, sum);
            }
        }
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let p = 6;
        let h = 1e-6;
        for &w in &[0.2, 0.5, 0.73] {
            let d = bspline_derivative_weights(w, p, 1);
            let plus = bspline_weights((w + h).min(0.999999), p);
            let minus = bspline_weights((w - h).max(0.0), p);
            for i in 0..p {
                let fd = (plus[i] - minus[i]) / (2.0 * h);
                assert!((fd - d[i]).abs() < 1e-4, "i={} fd={} analytic={}", i, fd, d[i]);
            }
        }
    }
}
