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

//! Periodic lattice geometry: construction from cell parameters, the
//! reciprocal lattice, and fractional/Cartesian coordinate transforms.

use crate::error::{PmeError, Result};
use crate::matrix::{Matrix, MatrixOps, SortOrder};

/// Which convention to build the Cartesian lattice matrix in.
///
/// The choice is observable: it changes the orientation of forces and stress
/// in the caller's Cartesian frame, even though both conventions reproduce
/// the same metric (lengths and angles).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatticeKind {
    /// `a` parallel to +x, `b` in the xy half-plane with positive y.
    XAligned,
    /// Symmetric positive-definite form: the unique symmetric square root of
    /// the metric tensor.
    ShapeMatrix,
}

/// A 3x3 Cartesian lattice with its derived reciprocal lattice and volume.
#[derive(Debug, Clone)]
pub struct Lattice {
    /// Columns are the Cartesian vectors a, b, c.
    matrix: Matrix<f64>,
    reciprocal: Matrix<f64>,
    volume: f64,
}

impl Lattice {
    /// Build a lattice from cell lengths (Angstrom) and angles (degrees).
    pub fn build(a: f64, b: f64, c: f64, alpha_deg: f64, beta_deg: f64, gamma_deg: f64, kind: LatticeKind) -> Result<Self> {
        if a <= 0.0 || b <= 0.0 || c <= 0.0 {
            return Err(PmeError::Configuration("lattice lengths must be positive".into()));
        }
        let matrix = match kind {
            LatticeKind::XAligned => Self::build_x_aligned(a, b, c, alpha_deg, beta_deg, gamma_deg)?,
            LatticeKind::ShapeMatrix => Self::build_shape_matrix(a, b, c, alpha_deg, beta_deg, gamma_deg)?,
        };
        Self::from_matrix(matrix)
    }

    /// Wrap an already-built 3x3 Cartesian lattice matrix (columns a, b, c).
    pub fn from_matrix(matrix: Matrix<f64>) -> Result<Self> {
        if matrix.rows() != 3 || matrix.cols() != 3 {
            return Err(PmeError::ShapeMismatch("lattice matrix must be 3x3".into()));
        }
        let volume = cell_volume(&matrix);
        if volume <= 0.0 || !volume.is_finite() {
            return Err(PmeError::NumericDegeneracy(format!(
                "lattice has non-positive or non-finite volume: {}",
                volume
            )));
        }
        let reciprocal = reciprocal_lattice(&matrix, volume)?;
        Ok(Lattice { matrix, reciprocal, volume })
    }

    fn build_x_aligned(a: f64, b: f64, c: f64, alpha_deg: f64, beta_deg: f64, gamma_deg: f64) -> Result<Matrix<f64>> {
        let (alpha, beta, gamma) = (alpha_deg.to_radians(), beta_deg.to_radians(), gamma_deg.to_radians());
        let (cos_a, cos_b, cos_g, sin_g) = (alpha.cos(), beta.cos(), gamma.cos(), gamma.sin());
        if sin_g.abs() < 1e-12 {
            return Err(PmeError::Configuration("gamma angle too close to 0 or 180 degrees".into()));
        }
        let term = 1.0 - cos_a * cos_a - cos_b * cos_b - cos_g * cos_g + 2.0 * cos_a * cos_b * cos_g;
        if term < 0.0 {
            return Err(PmeError::Configuration(
                "cell angles do not correspond to a valid unit cell".into(),
            ));
        }
        let v = term.sqrt();
        // Columns: a, b, c
        let data = vec![
            a, b * cos_g, c * cos_b,
            0.0, b * sin_g, c * (cos_a - cos_b * cos_g) / sin_g,
            0.0, 0.0, c * v / sin_g,
        ];
        Matrix::from_data(3, 3, data)
    }

    fn build_shape_matrix(a: f64, b: f64, c: f64, alpha_deg: f64, beta_deg: f64, gamma_deg: f64) -> Result<Matrix<f64>> {
        let (alpha, beta, gamma) = (alpha_deg.to_radians(), beta_deg.to_radians(), gamma_deg.to_radians());
        // Metric tensor G = A^T A for the target cell (symmetric by construction).
        let metric = Matrix::from_data(
            3,
            3,
            vec![
                a * a, a * b * gamma.cos(), a * c * beta.cos(),
                a * b * gamma.cos(), b * b, b * c * alpha.cos(),
                a * c * beta.cos(), b * c * alpha.cos(), c * c,
            ],
        )?;
        symmetric_matrix_sqrt(&metric)
    }

    /// The 3x3 Cartesian lattice matrix (columns a, b, c).
    pub fn matrix(&self) -> &Matrix<f64> {
        &self.matrix
    }

    /// The reciprocal lattice `2*pi*(L^-T)`, satisfying `reciprocal . L^T = 2*pi*I`.
    pub fn reciprocal(&self) -> &Matrix<f64> {
        &self.reciprocal
    }

    /// The (positive) cell volume `|det(L)|`.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Fractional coordinates `L^-1 . x` of a Cartesian point.
    pub fn fractional_of(&self, cart: [f64; 3]) -> Result<[f64; 3]> {
        // L^-1 = (1/2pi) * reciprocal^T
        let r = &self.reciprocal;
        let mut out = [0.0; 3];
        for i in 0..3 {
            let mut acc = 0.0;
            for j in 0..3 {
                acc += r.at(j, i) * cart[j];
            }
            out[i] = acc / std::f64::consts::TAU;
        }
        Ok(out)
    }

    /// Cartesian coordinates `L . f` of a fractional point.
    pub fn cartesian_of(&self, frac: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for i in 0..3 {
            let mut acc = 0.0;
            for j in 0..3 {
                acc += self.matrix.at(i, j) * frac[j];
            }
            out[i] = acc;
        }
        out
    }

    /// Map a force expressed w.r.t. fractional coordinates (`-dE/du`) to a
    /// Cartesian force (`-dE/dx`), via the chain rule `dE/dx = (L^-1)^T . dE/du`
    /// and `L^-1 = (1/2pi) reciprocal^T`, i.e. `force_cart = (1/2pi) . reciprocal . force_frac`.
    pub fn force_frac_to_cart(&self, force_frac: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for i in 0..3 {
            let mut acc = 0.0;
            for j in 0..3 {
                acc += self.reciprocal.at(i, j) * force_frac[j];
            }
            out[i] = acc / std::f64::consts::TAU;
        }
        out
    }

    /// Wrap fractional coordinates into `[0,1)^3`.
    pub fn wrap_fractional(frac: [f64; 3]) -> [f64; 3] {
        [
            frac[0] - frac[0].floor(),
            frac[1] - frac[1].floor(),
            frac[2] - frac[2].floor(),
        ]
    }

    /// Reconstruct the symmetric 3x3 Cartesian stress tensor from the
    /// length-6 upper-triangular virial layout `(xx,xy,xz,yy,yz,zz)` used at
    /// the flat-call boundary.
    pub fn stress_from_virial(virial_upper: [f64; 6]) -> Matrix<f64> {
        let [xx, xy, xz, yy, yz, zz] = virial_upper;
        Matrix::from_data(3, 3, vec![xx, xy, xz, xy, yy, yz, xz, yz, zz]).expect("6 values always form a 3x3 matrix")
    }
}

fn cell_volume(matrix: &Matrix<f64>) -> f64 {
    let m = matrix;
    (m.at(0, 0) * (m.at(1, 1) * m.at(2, 2) - m.at(1, 2) * m.at(2, 1))
        - m.at(0, 1) * (m.at(1, 0) * m.at(2, 2) - m.at(1, 2) * m.at(2, 0))
        + m.at(0, 2) * (m.at(1, 0) * m.at(2, 1) - m.at(1, 1) * m.at(2, 0)))
    .abs()
}

fn reciprocal_lattice(matrix: &Matrix<f64>, volume: f64) -> Result<Matrix<f64>> {
    let inv = matrix.inverse()?;
    let mut inv_t = inv.clone();
    inv_t.transpose_in_place();
    let _ = volume;
    let mut out = Matrix::new(3, 3);
    for r in 0..3 {
        for c in 0..3 {
            out.set(r, c, std::f64::consts::TAU * inv_t.at(r, c));
        }
    }
    Ok(out)
}

/// Unique symmetric positive-definite square root of a symmetric
/// positive-definite matrix, via spectral decomposition (taking the
/// positive root of each eigenvalue).
fn symmetric_matrix_sqrt(metric: &Matrix<f64>) -> Result<Matrix<f64>> {
    let (lambda_re, lambda_im, v) = metric.diagonalize(SortOrder::Descending)?;
    let n = metric.rows();
    let mut sqrt_lambda = vec![0.0; n];
    for i in 0..n {
        if lambda_im[i].abs() > 1e-9 {
            return Err(PmeError::NumericDegeneracy(
                "metric tensor produced a complex eigenvalue".into(),
            ));
        }
        if lambda_re[i] < 0.0 {
            return Err(PmeError::NumericDegeneracy(format!(
                "metric tensor is not positive semi-definite (lambda_{}={})",
                i, lambda_re[i]
            )));
        }
        sqrt_lambda[i] = lambda_re[i].sqrt();
    }
    let mut out = Matrix::new(n, n);
    for row in 0..n {
        for col in 0..n {
            let mut acc = 0.0;
            for k in 0..n {
                acc += v.at(row, k) * sqrt_lambda[k] * v.at(col, k);
            }
            out.set(row, col, acc);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reciprocal_satisfies_orthogonality() {
        let l = Lattice::build(10.0, 12.0, 15.0, 80.0, 90.0, 100.0, LatticeKind::ShapeMatrix).unwrap();
        let prod = l.reciprocal().multiply(&{
            let mut t = l.matrix().clone();
            t.transpose_in_place();
            t
        }).unwrap();
        let mut ident_scaled = Matrix::new(3, 3);
        for i in 0..3 {
            ident_scaled.set(i, i, std::f64::consts::TAU);
        }
        assert!(prod.almost_equals(&ident_scaled, 1e-9).unwrap());
    }

    #[test]
    fn fractional_cartesian_round_trip() {
        let l = Lattice::build(10.0, 10.0, 10.0, 90.0, 90.0, 90.0, LatticeKind::XAligned).unwrap();
        let f = [0.3, 0.6, 0.9];
        let cart = l.cartesian_of(f);
        let back = l.fractional_of(cart).unwrap();
        for i in 0..3 {
            assert!((back[i] - f[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn cubic_volume_matches_a_cubed() {
        let l = Lattice::build(10.0, 10.0, 10.0, 90.0, 90.0, 90.0, LatticeKind::XAligned).unwrap();
        assert!((l.volume() - 1000.0).abs() < 1e-9);
    }
}
