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

//! `PMEInstance`: the orchestrator state machine holding configured
//! parameters, owned scratch (grid, FFT plans, thread pool) and exposing the
//! `setup` / `set_lattice_vectors` / `compute_*_rec` operations.
//!
//! States: `Unconfigured -> Configured -> LatticeSet -> Computed`. `setup`
//! (re-)allocates scratch and drops to `Configured`; `set_lattice_vectors`
//! rebuilds the influence function and fractional-transform tensors and
//! advances to `LatticeSet`; each `compute_*_rec` requires at least
//! `LatticeSet` and leaves the instance in `Computed`.

use scoped_threadpool::Pool;

use crate::error::{PmeError, Result};
use crate::grid::{convolve_plane_range, probe_atom, probe_atom_force, spread_atom, AtomSplineData, Fft3D, Grid3D};
use crate::influence::InfluenceGrid;
use crate::lattice::{Lattice, LatticeKind};
use crate::matrix::{Matrix, MatrixData, MatrixOps, MatrixOpsMut, SliceView};
use crate::multipole::{cartesian_to_fractional_transform, n_cartesian};

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PMEState {
    Unconfigured,
    Configured,
    LatticeSet,
    Computed,
}

#[derive(Debug, Clone, Copy)]
struct SetupParams {
    r_power: u32,
    kappa: f64,
    order: usize,
    dims: [usize; 3],
    scale: f64,
    n_threads: usize,
}

/// Particle Mesh Ewald reciprocal-space engine.
///
/// Owns its FFT plans, thread pool and precomputed influence grid; nothing
/// here is `Clone` or `Sync` across instances on purpose, matching the
/// flat-call boundary's one-instance-per-pointer model in `pme-ffi`.
pub struct PMEInstance {
    state: PMEState,
    setup: Option<SetupParams>,
    lattice: Option<Lattice>,
    influence: Option<InfluenceGrid>,
    fft: Option<Fft3D>,
    thread_pool: Option<Pool>,
    multipole_transform: Option<(u32, Matrix<f64>)>,
}

impl Default for PMEInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl PMEInstance {
    pub fn new() -> Self {
        PMEInstance {
            state: PMEState::Unconfigured,
            setup: None,
            lattice: None,
            influence: None,
            fft: None,
            thread_pool: None,
            multipole_transform: None,
        }
    }

    pub fn state(&self) -> PMEState {
        self.state
    }

    /// Configure the kernel exponent, splitting parameter, spline order,
    /// grid shape, scale factor and thread count. Allocates FFT plans and a
    /// thread pool; invalidates any previously set lattice.
    #[allow(clippy::too_many_arguments)]
    pub fn setup(&mut self, r_power: u32, kappa: f64, order: usize, dims: [usize; 3], scale: f64, n_threads: usize) -> Result<()> {
        if r_power == 0 {
            return Err(PmeError::Configuration("rPower must be a positive integer".into()));
        }
        if kappa <= 0.0 {
            return Err(PmeError::Configuration("splitting parameter kappa must be positive".into()));
        }
        if order < 2 {
            return Err(PmeError::Configuration("spline order must be at least 2".into()));
        }
        if dims.iter().any(|&d| d < order) {
            return Err(PmeError::Configuration(format!(
                "grid dimensions {:?} must each be at least the spline order {}",
                dims, order
            )));
        }
        if n_threads == 0 {
            return Err(PmeError::Configuration("thread count must be at least 1".into()));
        }
        let fft = Fft3D::new(dims)?;
        tracing::debug!(r_power, kappa, order, ?dims, scale, n_threads, "pme setup");
        self.setup = Some(SetupParams { r_power, kappa, order, dims, scale, n_threads });
        self.fft = Some(fft);
        self.thread_pool = Some(Pool::new(n_threads as u32));
        self.lattice = None;
        self.influence = None;
        self.multipole_transform = None;
        self.state = PMEState::Configured;
        Ok(())
    }

    /// Build the lattice and, with it, the influence function and
    /// fractional-transform tensors. Requires `setup` to have been called.
    pub fn set_lattice_vectors(&mut self, a: f64, b: f64, c: f64, alpha_deg: f64, beta_deg: f64, gamma_deg: f64, kind: LatticeKind) -> Result<()> {
        let params = self.setup.ok_or_else(|| {
            PmeError::Precondition("set_lattice_vectors requires setup to have been called first".into())
        })?;
        let lattice = Lattice::build(a, b, c, alpha_deg, beta_deg, gamma_deg, kind)?;
        let influence = InfluenceGrid::compute(params.dims, lattice.reciprocal(), params.kappa, params.order, params.r_power, lattice.volume())?;
        tracing::debug!(a, b, c, alpha_deg, beta_deg, gamma_deg, ?kind, "pme lattice set, influence function and fractional transforms invalidated");
        self.lattice = Some(lattice);
        self.influence = Some(influence);
        self.multipole_transform = None;
        self.state = PMEState::LatticeSet;
        Ok(())
    }

    fn require_lattice_set(&self) -> Result<&SetupParams> {
        match self.state {
            PMEState::LatticeSet | PMEState::Computed => Ok(self.setup.as_ref().unwrap()),
            _ => Err(PmeError::Precondition(
                "compute_*_rec requires setup and set_lattice_vectors to have been called".into(),
            )),
        }
    }

    fn cartesian_to_fractional_matrix(&mut self, angmom: u32) -> &Matrix<f64> {
        let needs_rebuild = match &self.multipole_transform {
            Some((l, _)) => *l != angmom,
            None => true,
        };
        if needs_rebuild {
            let lattice = self.lattice.as_ref().expect("lattice set before multipole transform is requested");
            let t = cartesian_to_fractional_transform(lattice.matrix(), angmom);
            self.multipole_transform = Some((angmom, t));
        }
        &self.multipole_transform.as_ref().unwrap().1
    }

    fn validate_shapes(n_atoms: usize, angmom: u32, parameters: &impl MatrixData<f64>, coordinates: &impl MatrixData<f64>) -> Result<()> {
        let expected_cols = n_cartesian(angmom);
        if parameters.rows() != n_atoms || parameters.cols() != expected_cols {
            return Err(PmeError::ShapeMismatch(format!(
                "parameters must be {}x{} (nAtoms x nCartesian(angMom)), got {}x{}",
                n_atoms,
                expected_cols,
                parameters.rows(),
                parameters.cols()
            )));
        }
        if coordinates.rows() != n_atoms || coordinates.cols() != 3 {
            return Err(PmeError::ShapeMismatch(format!(
                "coordinates must be {}x3, got {}x{}",
                n_atoms,
                coordinates.rows(),
                coordinates.cols()
            )));
        }
        Ok(())
    }

    /// Shared spread -> FFT -> convolve -> IFFT pipeline. Returns the
    /// per-atom fractional multipole vectors (needed again during probing)
    /// alongside the inverse-transformed, normalized real-space grid.
    fn run_pipeline(
        &mut self,
        n_atoms: usize,
        angmom: u32,
        parameters: &impl MatrixData<f64>,
        coordinates: &impl MatrixData<f64>,
        max_deriv: usize,
    ) -> Result<(Vec<Vec<f64>>, Vec<AtomSplineData>, Grid3D)> {
        let params = *self.require_lattice_set()?;
        let transform = self.cartesian_to_fractional_matrix(angmom).clone();
        let lattice = self.lattice.as_ref().unwrap();

        let ncart = n_cartesian(angmom);
        let mut params_frac = Vec::with_capacity(n_atoms);
        let mut atoms = Vec::with_capacity(n_atoms);
        for a in 0..n_atoms {
            let cart_vec = parameters.row(a).to_vec();
            let mut frac_vec = vec![0.0; ncart];
            for row in 0..ncart {
                let mut acc = 0.0;
                for col in 0..ncart {
                    acc += transform.at(row, col) * cart_vec[col];
                }
                frac_vec[row] = acc;
            }
            let pos_row = coordinates.row(a);
            let cart_pos = [pos_row.at(0), pos_row.at(1), pos_row.at(2)];
            let frac_pos = Lattice::wrap_fractional(lattice.fractional_of(cart_pos)?);
            let atom = AtomSplineData::build(frac_pos, params.dims, params.order, max_deriv);
            params_frac.push(frac_vec);
            atoms.push(atom);
        }

        let mut grid = Grid3D::zeros(params.dims);
        {
            let pool = self.thread_pool.as_mut().unwrap();
            Self::spread_parallel(&mut grid, params.order, angmom, &params_frac, &atoms, params.n_threads, pool);
        }

        {
            let fft = self.fft.as_mut().unwrap();
            fft.forward_inplace(&mut grid);
        }

        {
            let influence = self.influence.as_ref().unwrap();
            let pool = self.thread_pool.as_mut().unwrap();
            Self::convolve_parallel(&mut grid, influence, params.n_threads, pool);
        }

        let fft = self.fft.as_mut().unwrap();
        fft.inverse_inplace(&mut grid);
        let n = (params.dims[0] * params.dims[1] * params.dims[2]) as f64;
        grid.scale(1.0 / n);

        self.state = PMEState::Computed;
        Ok((params_frac, atoms, grid))
    }

    fn spread_parallel(
        grid: &mut Grid3D,
        order: usize,
        angmom: u32,
        params_frac: &[Vec<f64>],
        atoms: &[AtomSplineData],
        n_threads: usize,
        pool: &mut Pool,
    ) {
        let dims = grid.dims();
        if n_threads < 2 || atoms.len() < n_threads {
            for (p, a) in params_frac.iter().zip(atoms.iter()) {
                spread_atom(grid, order, angmom, p, a);
            }
            return;
        }
        let chunk = (atoms.len() + n_threads - 1) / n_threads;
        let mut private_grids: Vec<Grid3D> = (0..n_threads).map(|_| Grid3D::zeros(dims)).collect();
        pool.scoped(|s| {
            for ((param_chunk, atom_chunk), pgrid) in params_frac.chunks(chunk).zip(atoms.chunks(chunk)).zip(private_grids.iter_mut()) {
                s.execute(move || {
                    for (p, a) in param_chunk.iter().zip(atom_chunk.iter()) {
                        spread_atom(pgrid, order, angmom, p, a);
                    }
                });
            }
        });
        // Deterministic reduction: private grids in thread-index order, plane-index ascending.
        for pgrid in &private_grids {
            for (dst, src) in grid.data_mut().iter_mut().zip(pgrid.data()) {
                *dst += src;
            }
        }
    }

    fn convolve_parallel(grid: &mut Grid3D, influence: &InfluenceGrid, n_threads: usize, pool: &mut Pool) {
        let a = grid.dims()[0];
        if n_threads < 2 || a < n_threads {
            convolve_plane_range(grid, influence, 0..a);
            return;
        }
        let chunk = (a + n_threads - 1) / n_threads;
        let [_, b, c] = grid.dims();
        let mut planes: Vec<&mut [num_complex::Complex64]> = grid.data_mut().chunks_mut(b * c).collect();
        pool.scoped(|s| {
            let mut start = 0usize;
            for plane_group in planes.chunks_mut(chunk) {
                let group_start = start;
                start += plane_group.len();
                let influence = &*influence;
                s.execute(move || {
                    for (offset, plane) in plane_group.iter_mut().enumerate() {
                        let i = group_start + offset;
                        for j in 0..b {
                            for k in 0..c {
                                plane[j * c + k] *= influence.at(i, j, k);
                            }
                        }
                    }
                });
            }
        });
    }

    /// Reciprocal-space energy only.
    pub fn compute_e_rec(&mut self, n_atoms: usize, angmom: u32, parameters: &impl MatrixData<f64>, coordinates: &impl MatrixData<f64>) -> Result<f64> {
        Self::validate_shapes(n_atoms, angmom, parameters, coordinates)?;
        let (params_frac, atoms, grid) = self.run_pipeline(n_atoms, angmom, parameters, coordinates, angmom as usize)?;
        let order = self.setup.unwrap().order;
        let scale = self.setup.unwrap().scale;
        let mut energy = 0.0;
        for (p, a) in params_frac.iter().zip(atoms.iter()) {
            let probed = probe_atom(&grid, order, angmom, a);
            energy += p.iter().zip(probed.iter()).map(|(x, y)| x * y).sum::<f64>();
        }
        Ok(0.5 * scale * energy)
    }

    /// Reciprocal-space energy and forces, accumulated into `forces` (not
    /// overwritten, per the flat-call boundary's accumulation contract).
    pub fn compute_ef_rec(
        &mut self,
        n_atoms: usize,
        angmom: u32,
        parameters: &impl MatrixData<f64>,
        coordinates: &impl MatrixData<f64>,
        forces: &mut impl crate::matrix::MatrixDataMut<f64>,
    ) -> Result<f64> {
        Self::validate_shapes(n_atoms, angmom, parameters, coordinates)?;
        if forces.rows() != n_atoms || forces.cols() != 3 {
            return Err(PmeError::ShapeMismatch(format!("forces must be {}x3, got {}x{}", n_atoms, forces.rows(), forces.cols())));
        }
        let max_deriv = angmom as usize + 1;
        let (params_frac, atoms, grid) = self.run_pipeline(n_atoms, angmom, parameters, coordinates, max_deriv)?;
        let order = self.setup.unwrap().order;
        let scale = self.setup.unwrap().scale;
        let lattice = self.lattice.as_ref().unwrap();
        let mut energy = 0.0;
        for (a_idx, (p, a)) in params_frac.iter().zip(atoms.iter()).enumerate() {
            let probed = probe_atom(&grid, order, angmom, a);
            energy += p.iter().zip(probed.iter()).map(|(x, y)| x * y).sum::<f64>();
            let force_frac = probe_atom_force(&grid, order, angmom, p, a);
            let force_cart = lattice.force_frac_to_cart(force_frac);
            let scaled = [scale * force_cart[0], scale * force_cart[1], scale * force_cart[2]];
            forces.row_mut(a_idx).add_assign_slice(&SliceView::from_slice(&scaled)).unwrap();
        }
        Ok(0.5 * scale * energy)
    }

    /// Reciprocal-space energy, forces and virial (length-6 upper-triangular
    /// `(xx,xy,xz,yy,yz,zz)`, accumulated), from the real-space virial
    /// definition `virial += 1/2 (F_a \otimes r_a + r_a \otimes F_a)`.
    pub fn compute_efv_rec(
        &mut self,
        n_atoms: usize,
        angmom: u32,
        parameters: &impl MatrixData<f64>,
        coordinates: &impl MatrixData<f64>,
        forces: &mut impl crate::matrix::MatrixDataMut<f64>,
        virial: &mut [f64; 6],
    ) -> Result<f64> {
        Self::validate_shapes(n_atoms, angmom, parameters, coordinates)?;
        if forces.rows() != n_atoms || forces.cols() != 3 {
            return Err(PmeError::ShapeMismatch(format!("forces must be {}x3, got {}x{}", n_atoms, forces.rows(), forces.cols())));
        }
        let max_deriv = angmom as usize + 1;
        let (params_frac, atoms, grid) = self.run_pipeline(n_atoms, angmom, parameters, coordinates, max_deriv)?;
        let order = self.setup.unwrap().order;
        let scale = self.setup.unwrap().scale;
        let lattice = self.lattice.as_ref().unwrap();
        let mut energy = 0.0;
        for (a_idx, (p, a)) in params_frac.iter().zip(atoms.iter()).enumerate() {
            let probed = probe_atom(&grid, order, angmom, a);
            energy += p.iter().zip(probed.iter()).map(|(x, y)| x * y).sum::<f64>();
            let force_frac = probe_atom_force(&grid, order, angmom, p, a);
            let force_cart = lattice.force_frac_to_cart(force_frac);
            let coord_row = coordinates.row(a_idx);
            let r_cart = [coord_row.at(0), coord_row.at(1), coord_row.at(2)];
            let f_scaled = [scale * force_cart[0], scale * force_cart[1], scale * force_cart[2]];
            forces.row_mut(a_idx).add_assign_slice(&SliceView::from_slice(&f_scaled)).unwrap();
            // (xx,xy,xz,yy,yz,zz)
            virial[0] += f_scaled[0] * r_cart[0];
            virial[1] += 0.5 * (f_scaled[0] * r_cart[1] + f_scaled[1] * r_cart[0]);
            virial[2] += 0.5 * (f_scaled[0] * r_cart[2] + f_scaled[2] * r_cart[0]);
            virial[3] += f_scaled[1] * r_cart[1];
            virial[4] += 0.5 * (f_scaled[1] * r_cart[2] + f_scaled[2] * r_cart[1]);
            virial[5] += f_scaled[2] * r_cart[2];
        }
        Ok(0.5 * scale * energy)
    }
}
