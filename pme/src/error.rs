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

//! Error taxonomy for the reciprocal-space core.
//!
//! All fallible public operations return [`PmeError`]. Failures are raised
//! with a descriptive message and propagated with `?`; nothing in this crate
//! attempts recovery from a `PmeError` on the caller's behalf.

use thiserror::Error;

/// Errors surfaced by the matrix, lattice, spline, influence and orchestrator
/// layers.
#[derive(Debug, Error)]
pub enum PmeError {
    /// Invalid setup parameters: non-positive grid dimension, spline order
    /// below 2, non-positive splitting parameter, a grid dimension smaller
    /// than the spline order, or a degenerate lattice.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Caller-provided matrix/array dimensions are inconsistent with the
    /// configured atom count, angular momentum, or grid shape.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A matrix operation's precondition was violated: non-square where
    /// square is required, non-symmetric where symmetric is required, or a
    /// slice arithmetic operation requires contiguous (stride==1) operands.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A numerically degenerate situation was encountered: zero cell volume,
    /// a singular matrix passed to `inverse`, or an eigenvalue too small to
    /// invert safely.
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    /// An external collaborator (FFT planner, LAPACK eigensolver) failed.
    #[error("external kernel failure: {0}")]
    ExternalKernel(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PmeError>;
