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

//! Canonical Cartesian multipole component ordering, and the transform
//! mapping Cartesian multipole components to their fractional equivalents.

use std::collections::HashMap;

use crate::matrix::Matrix;

/// Number of canonical Cartesian multipole components up to and including
/// angular momentum `l`: `(l+1)(l+2)(l+3)/6`. `l=0` is a scalar charge,
/// `l=1` adds a dipole, `l=2` a quadrupole, and so on.
pub fn n_cartesian(l: u32) -> usize {
    let l = l as u64;
    (((l + 1) * (l + 2) * (l + 3)) / 6) as usize
}

/// Canonical ordering of `(i,j,k)` monomial exponents (`x^i y^j z^k`) for all
/// total degrees `0..=l`, matching the `(x,y,z,xx,xy,xz,yy,yz,zz,...)`
/// convention: within a degree, `i` decreases fastest, then `j`.
pub fn canonical_order(l: u32) -> Vec<(u32, u32, u32)> {
    let mut out = Vec::with_capacity(n_cartesian(l));
    for d in 0..=l {
        for i in (0..=d).rev() {
            for j in (0..=(d - i)).rev() {
                let k = d - i - j;
                out.push((i, j, k));
            }
        }
    }
    out
}

/// Sparse trivariate polynomial in `(u, v, w)`, keyed by exponent triple.
type Poly = HashMap<(u32, u32, u32), f64>;

fn poly_mul(a: &Poly, b: &Poly) -> Poly {
    let mut out = Poly::new();
    for (&(ai, aj, ak), &av) in a {
        for (&(bi, bj, bk), &bv) in b {
            *out.entry((ai + bi, aj + bj, ak + bk)).or_insert(0.0) += av * bv;
        }
    }
    out
}

fn poly_one() -> Poly {
    let mut p = Poly::new();
    p.insert((0, 0, 0), 1.0);
    p
}

fn poly_pow(base: &Poly, n: u32) -> Poly {
    let mut out = poly_one();
    for _ in 0..n {
        out = poly_mul(&out, base);
    }
    out
}

/// Build the `nCartesian(l) x nCartesian(l)` matrix mapping a Cartesian
/// multipole parameter vector (canonical order, see [`canonical_order`]) to
/// its fractional-coordinate equivalent.
///
/// `frac_to_cart` is the 3x3 lattice matrix `F` with `cartesian = F . fractional`.
/// Each Cartesian monomial `x^i y^j z^k` is substituted with
/// `x = F[0][0] u + F[0][1] v + F[0][2] w` (and analogously for `y`, `z`) and
/// re-expanded in the fractional monomials `u^i' v^j' w^k'` of the same total
/// degree; the coefficients of that expansion are this transform's entries.
/// Built once per lattice change, since it depends only on `frac_to_cart`.
pub fn cartesian_to_fractional_transform(frac_to_cart: &Matrix<f64>, l: u32) -> Matrix<f64> {
    use crate::matrix::MatrixOps;

    let order = canonical_order(l);
    let n = order.len();
    let mut out = Matrix::new(n, n);

    let linear_form = |row: usize| -> Poly {
        let mut p = Poly::new();
        p.insert((1, 0, 0), frac_to_cart.at(row, 0));
        p.insert((0, 1, 0), frac_to_cart.at(row, 1));
        p.insert((0, 0, 1), frac_to_cart.at(row, 2));
        p
    };
    let (lx, ly, lz) = (linear_form(0), linear_form(1), linear_form(2));

    for (row, &(i, j, k)) in order.iter().enumerate() {
        let expanded = poly_mul(&poly_mul(&poly_pow(&lx, i), &poly_pow(&ly, j)), &poly_pow(&lz, k));
        for (col, &(ip, jp, kp)) in order.iter().enumerate() {
            if let Some(&coeff) = expanded.get(&(ip, jp, kp)) {
                out.set(row, col, coeff);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixOps;

    #[test]
    fn n_cartesian_matches_known_values() {
        assert_eq!(n_cartesian(0), 1);
        assert_eq!(n_cartesian(1), 4);
        assert_eq!(n_cartesian(2), 10);
    }

    #[test]
    fn canonical_order_matches_spec_example() {
        let order = canonical_order(2);
        assert_eq!(
            order,
            vec![
                (0, 0, 0),
                (1, 0, 0),
                (0, 1, 0),
                (0, 0, 1),
                (2, 0, 0),
                (1, 1, 0),
                (1, 0, 1),
                (0, 2, 0),
                (0, 1, 1),
                (0, 0, 2),
            ]
        );
    }

    #[test]
    fn transform_is_identity_for_identity_lattice() {
        let identity = Matrix::from_data(3, 3, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        let t = cartesian_to_fractional_transform(&identity, 2);
        for i in 0..t.rows() {
            for j in 0..t.cols() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((t.at(i, j) - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn dipole_transform_matches_hand_derived_matrix_for_a_sheared_lattice() {
        // x = 2u, y = u + 3v, z = w: a non-orthogonal (sheared) lattice with
        // an off-diagonal xy coupling, small enough to expand by hand.
        let sheared = Matrix::from_data(3, 3, vec![2.0, 0.0, 0.0, 1.0, 3.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        let t = cartesian_to_fractional_transform(&sheared, 1);
        // order: (0,0,0), (1,0,0), (0,1,0), (0,0,1)
        let expected = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 2.0, 0.0, 0.0],
            [0.0, 1.0, 3.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        for i in 0..4 {
            for j in 0..4 {
                assert!(
                    (t.at(i, j) - expected[i][j]).abs() < 1e-12,
                    "({},{}): got {} expected {}",
                    i,
                    j,
                    t.at(i, j),
                    expected[i][j]
                );
            }
        }
    }
}
