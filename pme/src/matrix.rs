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

//! Dense row-major matrices.
//!
//! [`Matrix`] always owns its storage; [`MatrixView`] and [`MatrixViewMut`]
//! borrow a caller-provided slice instead. All three share the read-only
//! [`MatrixOps`] surface (and [`MatrixOpsMut`] for the mutable ones) via a
//! blanket impl, so spreading/probing kernels can be written once against
//! `&impl MatrixOps<T>` and run over either an owned `Matrix` or a view into
//! the caller's own buffer.

use std::ops::{Add, AddAssign, Mul, Sub};

use num_complex::Complex64;

use crate::error::{PmeError, Result};

/// Element types a [`Matrix`] can hold.
pub trait MatrixElement:
    Copy + Default + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> + AddAssign + 'static
{
    /// Magnitude, used by [`MatrixOps::almost_equals`].
    fn magnitude(&self) -> f64;
}

impl MatrixElement for f64 {
    fn magnitude(&self) -> f64 {
        self.abs()
    }
}

impl MatrixElement for Complex64 {
    fn magnitude(&self) -> f64 {
        Complex64::norm(*self)
    }
}

/// Shared read-only accessors for owning and borrowing matrix storage.
pub trait MatrixData<T> {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;
    fn raw(&self) -> &[T];
}

/// Additional mutable access, implemented only by owning/borrowing-mut storage.
pub trait MatrixDataMut<T>: MatrixData<T> {
    fn raw_mut(&mut self) -> &mut [T];

    /// Reinterpret the same backing storage under new dimensions (used by
    /// `transpose_in_place`, which permutes the buffer but does not resize
    /// it). Caller must ensure `rows*cols` still matches the buffer length.
    fn set_dims(&mut self, rows: usize, cols: usize);
}

/// Owning dense row-major matrix.
#[derive(Debug, Clone)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

/// Non-owning read-only view into a caller-owned buffer.
pub struct MatrixView<'a, T> {
    rows: usize,
    cols: usize,
    data: &'a [T],
}

/// Non-owning mutable view into a caller-owned buffer.
pub struct MatrixViewMut<'a, T> {
    rows: usize,
    cols: usize,
    data: &'a mut [T],
}

impl<T: MatrixElement> Matrix<T> {
    /// Construct a zero-filled `rows x cols` matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Matrix {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }

    /// Construct a matrix from row-major initializer data.
    ///
    /// Fails with [`PmeError::ShapeMismatch`] if `data.len() != rows*cols`.
    pub fn from_data(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(PmeError::ShapeMismatch(format!(
                "expected {} elements for a {}x{} matrix, got {}",
                rows * cols,
                rows,
                cols,
                data.len()
            )));
        }
        Ok(Matrix { rows, cols, data })
    }

    /// Borrow this matrix's storage as a read-only view.
    pub fn view(&self) -> MatrixView<'_, T> {
        MatrixView {
            rows: self.rows,
            cols: self.cols,
            data: &self.data,
        }
    }

    /// Borrow this matrix's storage as a mutable view.
    pub fn view_mut(&mut self) -> MatrixViewMut<'_, T> {
        MatrixViewMut {
            rows: self.rows,
            cols: self.cols,
            data: &mut self.data,
        }
    }
}

impl<'a, T: MatrixElement> MatrixView<'a, T> {
    /// Wrap a caller-owned `rows x cols` row-major slice without copying it.
    ///
    /// The slice must stay valid and unmutated by anyone else for the
    /// lifetime of the returned view.
    pub fn from_slice(rows: usize, cols: usize, data: &'a [T]) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(PmeError::ShapeMismatch(format!(
                "expected {} elements for a {}x{} matrix view, got {}",
                rows * cols,
                rows,
                cols,
                data.len()
            )));
        }
        Ok(MatrixView { rows, cols, data })
    }
}

impl<'a, T: MatrixElement> MatrixViewMut<'a, T> {
    /// Wrap a caller-owned `rows x cols` row-major mutable slice without copying it.
    pub fn from_slice_mut(rows: usize, cols: usize, data: &'a mut [T]) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(PmeError::ShapeMismatch(format!(
                "expected {} elements for a {}x{} matrix view, got {}",
                rows * cols,
                rows,
                cols,
                data.len()
            )));
        }
        Ok(MatrixViewMut { rows, cols, data })
    }
}

impl<T> MatrixData<T> for Matrix<T> {
    fn rows(&self) -> usize {
        self.rows
    }
    fn cols(&self) -> usize {
        self.cols
    }
    fn raw(&self) -> &[T] {
        &self.data
    }
}
impl<T> MatrixDataMut<T> for Matrix<T> {
    fn raw_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
    fn set_dims(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
    }
}

impl<'a, T> MatrixData<T> for MatrixView<'a, T> {
    fn rows(&self) -> usize {
        self.rows
    }
    fn cols(&self) -> usize {
        self.cols
    }
    fn raw(&self) -> &[T] {
        self.data
    }
}

impl<'a, T> MatrixData<T> for MatrixViewMut<'a, T> {
    fn rows(&self) -> usize {
        self.rows
    }
    fn cols(&self) -> usize {
        self.cols
    }
    fn raw(&self) -> &[T] {
        self.data
    }
}
impl<'a, T> MatrixDataMut<T> for MatrixViewMut<'a, T> {
    fn raw_mut(&mut self) -> &mut [T] {
        self.data
    }
    fn set_dims(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
    }
}

/// A strided window into a row, column, or other 1D cut of a matrix.
///
/// Does not own storage; must not outlive the matrix it was taken from.
/// Several operations (e.g. [`SliceView::to_vec`] fast-pathing, or any future
/// SIMD-friendly accumulation) require `stride == 1`.
#[derive(Clone, Copy)]
pub struct SliceView<'a, T> {
    data: &'a [T],
    len: usize,
    stride: usize,
}

impl<'a, T: MatrixElement> SliceView<'a, T> {
    /// Wrap an arbitrary contiguous slice (e.g. a caller-local `[f64; 3]`) as
    /// a stride-1 window, so it can be combined with a matrix row/column via
    /// [`SliceViewMut::add_assign_slice`].
    pub fn from_slice(data: &'a [T]) -> Self {
        SliceView { len: data.len(), data, stride: 1 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_contiguous(&self) -> bool {
        self.stride == 1
    }

    pub fn at(&self, i: usize) -> T {
        self.data[i * self.stride]
    }

    pub fn to_vec(&self) -> Vec<T> {
        (0..self.len).map(|i| self.at(i)).collect()
    }

    /// Element-wise addition against another slice of the same length.
    pub fn add(&self, other: &SliceView<'_, T>) -> Result<Vec<T>> {
        if self.len != other.len {
            return Err(PmeError::ShapeMismatch(format!(
                "slice length mismatch: {} vs {}",
                self.len, other.len
            )));
        }
        Ok((0..self.len).map(|i| self.at(i) + other.at(i)).collect())
    }
}

pub struct SliceViewMut<'a, T> {
    data: &'a mut [T],
    len: usize,
    stride: usize,
}

impl<'a, T: MatrixElement> SliceViewMut<'a, T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_contiguous(&self) -> bool {
        self.stride == 1
    }

    pub fn at(&self, i: usize) -> T {
        self.data[i * self.stride]
    }

    pub fn set(&mut self, i: usize, v: T) {
        self.data[i * self.stride] = v;
    }

    /// Add a scalar to every element in place.
    pub fn add_scalar_assign(&mut self, scalar: T) {
        for i in 0..self.len {
            let v = self.at(i) + scalar;
            self.set(i, v);
        }
    }

    /// Add another same-length slice in place. Requires both operands to be
    /// contiguous (`stride == 1`).
    pub fn add_assign_slice(&mut self, other: &SliceView<'_, T>) -> Result<()> {
        if self.len != other.len() {
            return Err(PmeError::ShapeMismatch(format!(
                "slice length mismatch: {} vs {}",
                self.len,
                other.len()
            )));
        }
        if self.stride != 1 || !other.is_contiguous() {
            return Err(PmeError::Precondition(
                "add_assign_slice requires contiguous (stride==1) operands".into(),
            ));
        }
        for i in 0..self.len {
            let v = self.at(i) + other.at(i);
            self.set(i, v);
        }
        Ok(())
    }
}

/// Ordering used when sorting eigenpairs by their real component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Read-only operations shared by [`Matrix`], [`MatrixView`] and [`MatrixViewMut`].
pub trait MatrixOps<T: MatrixElement>: MatrixData<T> {
    /// Unchecked element access (debug-asserted only, per the data model's
    /// "bounds-unchecked by design" contract).
    fn at(&self, r: usize, c: usize) -> T {
        debug_assert!(r < self.rows() && c < self.cols());
        self.raw()[r * self.cols() + c]
    }

    fn row(&self, r: usize) -> SliceView<'_, T> {
        debug_assert!(r < self.rows());
        SliceView {
            data: &self.raw()[r * self.cols()..(r + 1) * self.cols()],
            len: self.cols(),
            stride: 1,
        }
    }

    fn col(&self, c: usize) -> SliceView<'_, T> {
        debug_assert!(c < self.cols());
        SliceView {
            data: &self.raw()[c..],
            len: self.rows(),
            stride: self.cols(),
        }
    }

    /// `self * other`, requiring `self.cols() == other.rows()`.
    fn multiply<O: MatrixData<T>>(&self, other: &O) -> Result<Matrix<T>> {
        if self.cols() != other.rows() {
            return Err(PmeError::ShapeMismatch(format!(
                "cannot multiply {}x{} by {}x{}",
                self.rows(),
                self.cols(),
                other.rows(),
                other.cols()
            )));
        }
        let (r, k, c) = (self.rows(), self.cols(), other.cols());
        let mut out = Matrix::new(r, c);
        for i in 0..r {
            for j in 0..c {
                let mut acc = T::default();
                for l in 0..k {
                    acc += self.at(i, l) * other.raw()[l * c + j];
                }
                out.data[i * c + j] = acc;
            }
        }
        Ok(out)
    }

    /// Element-wise absolute-value comparison against `other`.
    fn almost_equals<O: MatrixData<T>>(&self, other: &O, tol: f64) -> Result<bool> {
        if self.rows() != other.rows() || self.cols() != other.cols() {
            return Err(PmeError::ShapeMismatch(format!(
                "size mismatch in almost_equals: {}x{} vs {}x{}",
                self.rows(),
                self.cols(),
                other.rows(),
                other.cols()
            )));
        }
        for i in 0..self.raw().len() {
            let diff = self.raw()[i] - other.raw()[i];
            if diff.magnitude() > tol {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn is_square(&self) -> bool {
        self.rows() == self.cols()
    }

    fn to_owned_matrix(&self) -> Matrix<T> {
        Matrix {
            rows: self.rows(),
            cols: self.cols(),
            data: self.raw().to_vec(),
        }
    }
}

impl<T: MatrixElement, M: MatrixData<T>> MatrixOps<T> for M {}

/// Mutation operations shared by owning and mutably-borrowed storage.
pub trait MatrixOpsMut<T: MatrixElement>: MatrixDataMut<T> + MatrixOps<T> {
    fn set(&mut self, r: usize, c: usize, v: T) {
        let cols = self.cols();
        debug_assert!(r < self.rows() && c < cols);
        self.raw_mut()[r * cols + c] = v;
    }

    fn row_mut(&mut self, r: usize) -> SliceViewMut<'_, T> {
        debug_assert!(r < self.rows());
        let cols = self.cols();
        SliceViewMut {
            data: &mut self.raw_mut()[r * cols..(r + 1) * cols],
            len: cols,
            stride: 1,
        }
    }

    fn col_mut(&mut self, c: usize) -> SliceViewMut<'_, T> {
        debug_assert!(c < self.cols());
        let cols = self.cols();
        let rows = self.rows();
        SliceViewMut {
            data: &mut self.raw_mut()[c..],
            len: rows,
            stride: cols,
        }
    }

    /// Classical cycle-following in-place transposition, then swap (rows, cols).
    ///
    /// O(rows*cols) time, O(rows*cols) auxiliary bits for the visited marker.
    fn transpose_in_place(&mut self) {
        let (r, c) = (self.rows(), self.cols());
        let n = r * c;
        if n < 2 {
            return;
        }
        let mut visited = vec![false; n];
        // Index i in the old (r x c) linearization maps to (i*r) % (n-1) in
        // the new (c x r) linearization, with the last element fixed.
        for start in 0..n {
            if visited[start] || start == n - 1 {
                continue;
            }
            let mut current = start;
            let mut carry = self.raw()[current];
            loop {
                let next = (current * r) % (n - 1);
                visited[current] = true;
                let tmp = self.raw()[next];
                self.raw_mut()[next] = carry;
                carry = tmp;
                current = next;
                if current == start {
                    break;
                }
            }
        }
        self.set_dims(c, r);
    }
}

impl<T: MatrixElement, M: MatrixDataMut<T>> MatrixOpsMut<T> for M {}

impl Matrix<f64> {
    /// Inverse of a real matrix.
    ///
    /// For 3x3 matrices, uses the direct closed-form cofactor/determinant
    /// formula. Otherwise requires a symmetric matrix, diagonalizes it,
    /// inverts each eigenvalue (failing if any `|lambda|` is below a guard
    /// threshold), and recomposes `V * diag(1/lambda) * V^T`.
    pub fn inverse(&self) -> Result<Matrix<f64>> {
        if !self.is_square() {
            return Err(PmeError::Precondition("inverse requires a square matrix".into()));
        }
        if self.rows == 3 {
            return self.inverse_3x3();
        }
        self.inverse_via_diagonalization()
    }

    fn inverse_3x3(&self) -> Result<Matrix<f64>> {
        let m = &self.data;
        let (a, b, c, d, e, f, g, h, i) = (
            m[0], m[1], m[2], m[3], m[4], m[5], m[6], m[7], m[8],
        );
        let det = a * (e * i - f * h) - b * (d * i - f * g) + c * (d * h - e * g);
        if det.abs() < 1e-300 {
            return Err(PmeError::NumericDegeneracy("3x3 matrix is singular".into()));
        }
        let inv_det = 1.0 / det;
        let cof = [
            (e * i - f * h),
            -(b * i - c * h),
            (b * f - c * e),
            -(d * i - f * g),
            (a * i - c * g),
            -(a * f - c * d),
            (d * h - e * g),
            -(a * h - b * g),
            (a * e - b * d),
        ];
        let data: Vec<f64> = cof.iter().map(|x| x * inv_det).collect();
        Matrix::from_data(3, 3, data)
    }

    fn inverse_via_diagonalization(&self) -> Result<Matrix<f64>> {
        self.assert_symmetric(1e-9)?;
        let (lambda_re, lambda_im, v) = self.diagonalize(SortOrder::Ascending)?;
        let n = self.rows;
        const GUARD: f64 = 1e-12;
        let mut inv_lambda = vec![0.0; n];
        for i in 0..n {
            if lambda_im[i].abs() > 1e-9 {
                return Err(PmeError::NumericDegeneracy(
                    "symmetric matrix produced a complex eigenvalue".into(),
                ));
            }
            if lambda_re[i].abs() < GUARD {
                return Err(PmeError::NumericDegeneracy(format!(
                    "eigenvalue {} is too small to invert (|lambda|={})",
                    i, lambda_re[i]
                )));
            }
            inv_lambda[i] = 1.0 / lambda_re[i];
        }
        // Recompose V * diag(1/lambda) * V^T
        let mut out = Matrix::new(n, n);
        for row in 0..n {
            for col in 0..n {
                let mut acc = 0.0;
                for k in 0..n {
                    acc += v.at(row, k) * inv_lambda[k] * v.at(col, k);
                }
                out.data[row * n + col] = acc;
            }
        }
        Ok(out)
    }

    fn assert_symmetric(&self, tol: f64) -> Result<()> {
        let n = self.rows;
        for i in 0..n {
            for j in (i + 1)..n {
                if (self.at(i, j) - self.at(j, i)).abs() > tol {
                    return Err(PmeError::Precondition(format!(
                        "matrix is not symmetric at ({}, {}): {} vs {}",
                        i,
                        j,
                        self.at(i, j),
                        self.at(j, i)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Real general eigendecomposition, delegated to the LAPACK collaborator
    /// via `nalgebra-lapack`. Requires a square matrix.
    ///
    /// Returns `(lambda_real, lambda_imag, V)` sorted by the real component
    /// per `order`. For a real eigenvalue, the matching column of `V` is its
    /// (real) eigenvector. For a complex-conjugate pair of eigenvalues at
    /// indices `(i, i+1)`, columns `i` and `i+1` of `V` hold the eigenvector's
    /// real and imaginary parts respectively, following the LAPACK `dgeev`
    /// packing convention.
    pub fn diagonalize(&self, order: SortOrder) -> Result<(Vec<f64>, Vec<f64>, Matrix<f64>)> {
        if !self.is_square() {
            return Err(PmeError::Precondition("diagonalize requires a square matrix".into()));
        }
        #[cfg(feature = "nalgebra-lapack")]
        {
            diagonalize_lapack(self, order)
        }
        #[cfg(not(feature = "nalgebra-lapack"))]
        {
            let _ = order;
            Err(PmeError::ExternalKernel(
                "no LAPACK backend compiled in (enable one of the lapack-* features)".into(),
            ))
        }
    }
}

#[cfg(feature = "nalgebra-lapack")]
fn diagonalize_lapack(
    m: &Matrix<f64>,
    order: SortOrder,
) -> Result<(Vec<f64>, Vec<f64>, Matrix<f64>)> {
    use nalgebra::DMatrix;
    use nalgebra_lapack::Eigen;

    let n = m.rows();
    // nalgebra is column-major; transpose our row-major buffer on the way in.
    let dm = DMatrix::from_fn(n, n, |r, c| m.at(r, c));
    let eigen = Eigen::new(dm, false, true).ok_or_else(|| {
        PmeError::ExternalKernel("LAPACK general eigensolver (dgeev) did not converge".into())
    })?;

    let mut idx: Vec<usize> = (0..n).collect();
    match order {
        SortOrder::Ascending => idx.sort_by(|&a, &b| eigen.eigenvalues_re[a].partial_cmp(&eigen.eigenvalues_re[b]).unwrap()),
        SortOrder::Descending => idx.sort_by(|&a, &b| eigen.eigenvalues_re[b].partial_cmp(&eigen.eigenvalues_re[a]).unwrap()),
    }

    let lambda_re: Vec<f64> = idx.iter().map(|&i| eigen.eigenvalues_re[i]).collect();
    let lambda_im: Vec<f64> = idx.iter().map(|&i| eigen.eigenvalues_im[i]).collect();
    let eigenvectors = eigen
        .eigenvectors
        .ok_or_else(|| PmeError::ExternalKernel("LAPACK eigensolver did not return eigenvectors".into()))?;
    let mut v = Matrix::new(n, n);
    for (new_col, &old_col) in idx.iter().enumerate() {
        for row in 0..n {
            v.set(row, new_col, eigenvectors[(row, old_col)]);
        }
    }
    Ok((lambda_re, lambda_im, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_round_trip() {
        let mut m = Matrix::from_data(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        m.transpose_in_place();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 2);
        m.transpose_in_place();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 3);
        assert!(m.almost_equals(&Matrix::from_data(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(), 1e-12).unwrap());
    }

    #[test]
    fn inverse_3x3_matches_known_value() {
        let m = Matrix::from_data(3, 3, vec![2.0, 0.0, 1.0, 3.0, 1.0, 0.0, 0.0, 4.0, 1.0]).unwrap();
        let inv = m.inverse().unwrap();
        let prod = m.multiply(&inv).unwrap();
        let ident = Matrix::from_data(3, 3, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        assert!(prod.almost_equals(&ident, 1e-12).unwrap());
    }

    #[test]
    fn multiply_rejects_mismatched_shapes() {
        let a = Matrix::<f64>::new(2, 3);
        let b = Matrix::<f64>::new(2, 3);
        assert!(a.multiply(&b).is_err());
    }

    #[test]
    fn row_mut_add_assign_slice_updates_in_place() {
        let mut m = Matrix::from_data(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let delta = [10.0, 20.0, 30.0];
        m.row_mut(1).add_assign_slice(&SliceView::from_slice(&delta)).unwrap();
        assert_eq!(m.raw(), &[1.0, 2.0, 3.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn col_mut_add_scalar_assign_touches_only_that_column() {
        let mut m = Matrix::from_data(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        m.col_mut(1).add_scalar_assign(100.0);
        assert_eq!(m.raw(), &[1.0, 102.0, 3.0, 104.0]);
    }

    #[test]
    fn add_assign_slice_rejects_length_mismatch() {
        let mut m = Matrix::from_data(1, 2, vec![1.0, 2.0]).unwrap();
        let delta = [1.0, 2.0, 3.0];
        assert!(m.row_mut(0).add_assign_slice(&SliceView::from_slice(&delta)).is_err());
    }
}
