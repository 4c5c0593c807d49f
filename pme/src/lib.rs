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

//! A Particle Mesh Ewald reciprocal-space core for arbitrary Cartesian
//! multipoles and `1/r^n` kernels.
//!
//! Usage
//! -----
//! ```
//! use pme::{LatticeKind, PMEInstance};
//! use pme::matrix::MatrixView;
//!
//! // Configure the kernel (Coulomb, n=1), splitting parameter, spline order
//! // and grid shape, then fix the periodic cell.
//! let mut pme = PMEInstance::new();
//! pme.setup(1, 0.3, 4, [16, 16, 16], 1.0, 1).unwrap();
//! pme.set_lattice_vectors(20.0, 20.0, 20.0, 90.0, 90.0, 90.0, LatticeKind::XAligned).unwrap();
//!
//! // One monopole (angular momentum 0) at the cell center.
//! let parameters = MatrixView::from_slice(1, 1, &[1.0]).unwrap();
//! let coordinates = MatrixView::from_slice(1, 3, &[10.0, 10.0, 10.0]).unwrap();
//! let energy = pme.compute_e_rec(1, 0, &parameters, &coordinates).unwrap();
//! assert!(energy.is_finite());
//! ```

pub mod error;
pub mod grid;
pub mod influence;
pub mod instance;
pub mod lattice;
pub mod matrix;
pub mod multipole;
pub mod spline;

pub use error::{PmeError, Result};
pub use instance::{PMEInstance, PMEState};
pub use lattice::{Lattice, LatticeKind};
