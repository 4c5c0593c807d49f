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

//! Flat C-ABI boundary over [`pme::PMEInstance`].
//!
//! One opaque `*mut PmeHandle` per instance, created by [`pme_create`] and
//! released by [`pme_destroy`]. Every other entry point takes that pointer
//! as its first argument. Failures never unwind across the boundary and
//! never abort the host process (REDESIGN FLAG R-1): `setup`/`set_lattice_vectors`
//! return a nonzero status code, and the `compute_*` functions return
//! `f64::NAN`; in both cases the failure's message is left retrievable via
//! [`pme_last_error_message`] until the next call on the same handle.

use std::ffi::CString;
use std::os::raw::{c_char, c_double};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use pme::matrix::{MatrixView, MatrixViewMut};
use pme::{LatticeKind, PMEInstance};

/// Opaque handle returned by [`pme_create`].
pub struct PmeHandle {
    instance: PMEInstance,
    last_error: Option<CString>,
}

fn set_error(handle: &mut PmeHandle, message: String) {
    tracing::warn!(%message, "pme-ffi call failed");
    handle.last_error = CString::new(message.replace('\0', "")).ok();
}

fn clear_error(handle: &mut PmeHandle) {
    handle.last_error = None;
}

/// Allocate a new, unconfigured instance. Never returns null.
#[no_mangle]
pub extern "C" fn pme_create() -> *mut PmeHandle {
    let handle = Box::new(PmeHandle { instance: PMEInstance::new(), last_error: None });
    Box::into_raw(handle)
}

/// Release an instance created by [`pme_create`]. `handle` must not be used
/// afterwards. A null `handle` is a no-op.
///
/// # Safety
/// `handle` must be either null or a pointer previously returned by
/// [`pme_create`] and not yet passed to `pme_destroy`.
#[no_mangle]
pub unsafe extern "C" fn pme_destroy(handle: *mut PmeHandle) {
    if handle.is_null() {
        return;
    }
    drop(Box::from_raw(handle));
}

/// Configure the kernel exponent, splitting parameter, spline order, grid
/// shape, scale factor and thread count. Returns 0 on success, nonzero on
/// failure (see [`pme_last_error_message`]).
///
/// # Safety
/// `handle` must be a live pointer from [`pme_create`].
#[no_mangle]
pub unsafe extern "C" fn pme_setup(
    handle: *mut PmeHandle,
    r_power: u32,
    kappa: c_double,
    spline_order: usize,
    a_dim: usize,
    b_dim: usize,
    c_dim: usize,
    scale_factor: c_double,
    n_threads: usize,
) -> i32 {
    let handle = &mut *handle;
    clear_error(handle);
    let result = catch_unwind(AssertUnwindSafe(|| {
        handle.instance.setup(r_power, kappa, spline_order, [a_dim, b_dim, c_dim], scale_factor, n_threads)
    }));
    match result {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            set_error(handle, e.to_string());
            1
        }
        Err(_) => {
            set_error(handle, "pme_setup panicked".to_string());
            2
        }
    }
}

fn lattice_kind_from_raw(raw: i32) -> Option<LatticeKind> {
    match raw {
        0 => Some(LatticeKind::XAligned),
        1 => Some(LatticeKind::ShapeMatrix),
        _ => None,
    }
}

/// Fix the periodic cell. `lattice_type` is 0 for `XAligned`, 1 for
/// `ShapeMatrix`. Returns 0 on success, nonzero on failure.
///
/// # Safety
/// `handle` must be a live pointer from [`pme_create`].
#[no_mangle]
pub unsafe extern "C" fn pme_set_lattice_vectors(
    handle: *mut PmeHandle,
    a: c_double,
    b: c_double,
    c: c_double,
    alpha_deg: c_double,
    beta_deg: c_double,
    gamma_deg: c_double,
    lattice_type: i32,
) -> i32 {
    let handle = &mut *handle;
    clear_error(handle);
    let kind = match lattice_kind_from_raw(lattice_type) {
        Some(k) => k,
        None => {
            set_error(handle, format!("unknown lattice type code {}", lattice_type));
            return 1;
        }
    };
    let result = catch_unwind(AssertUnwindSafe(|| {
        handle.instance.set_lattice_vectors(a, b, c, alpha_deg, beta_deg, gamma_deg, kind)
    }));
    match result {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            set_error(handle, e.to_string());
            1
        }
        Err(_) => {
            set_error(handle, "pme_set_lattice_vectors panicked".to_string());
            2
        }
    }
}

/// Reciprocal-space energy only. Returns `f64::NAN` on failure (see
/// [`pme_last_error_message`]).
///
/// # Safety
/// `handle` must be live; `parameters` must point to `nAtoms * nCartesian(parameterAngMom)`
/// readable `f64`s and `coordinates` to `nAtoms * 3` readable `f64`s, both row-major.
#[no_mangle]
pub unsafe extern "C" fn pme_compute_e_rec(
    handle: *mut PmeHandle,
    n_atoms: usize,
    parameter_ang_mom: u32,
    parameters: *const c_double,
    coordinates: *const c_double,
) -> c_double {
    let handle = &mut *handle;
    clear_error(handle);
    let ncart = pme::multipole::n_cartesian(parameter_ang_mom);
    let params_slice = std::slice::from_raw_parts(parameters, n_atoms * ncart);
    let coords_slice = std::slice::from_raw_parts(coordinates, n_atoms * 3);
    let result = catch_unwind(AssertUnwindSafe(|| {
        let params = MatrixView::from_slice(n_atoms, ncart, params_slice)?;
        let coords = MatrixView::from_slice(n_atoms, 3, coords_slice)?;
        handle.instance.compute_e_rec(n_atoms, parameter_ang_mom, &params, &coords)
    }));
    match result {
        Ok(Ok(energy)) => energy,
        Ok(Err(e)) => {
            set_error(handle, e.to_string());
            f64::NAN
        }
        Err(_) => {
            set_error(handle, "pme_compute_e_rec panicked".to_string());
            f64::NAN
        }
    }
}

/// Reciprocal-space energy and forces; forces are accumulated into `forces`,
/// not overwritten. Returns `f64::NAN` on failure.
///
/// # Safety
/// Same as [`pme_compute_e_rec`], plus `forces` must point to `nAtoms * 3`
/// readable and writable `f64`s, row-major.
#[no_mangle]
pub unsafe extern "C" fn pme_compute_ef_rec(
    handle: *mut PmeHandle,
    n_atoms: usize,
    parameter_ang_mom: u32,
    parameters: *const c_double,
    coordinates: *const c_double,
    forces: *mut c_double,
) -> c_double {
    let handle = &mut *handle;
    clear_error(handle);
    let ncart = pme::multipole::n_cartesian(parameter_ang_mom);
    let params_slice = std::slice::from_raw_parts(parameters, n_atoms * ncart);
    let coords_slice = std::slice::from_raw_parts(coordinates, n_atoms * 3);
    let forces_slice = std::slice::from_raw_parts_mut(forces, n_atoms * 3);
    let result = catch_unwind(AssertUnwindSafe(|| {
        let params = MatrixView::from_slice(n_atoms, ncart, params_slice)?;
        let coords = MatrixView::from_slice(n_atoms, 3, coords_slice)?;
        let mut forces_view = MatrixViewMut::from_slice_mut(n_atoms, 3, forces_slice)?;
        handle.instance.compute_ef_rec(n_atoms, parameter_ang_mom, &params, &coords, &mut forces_view)
    }));
    match result {
        Ok(Ok(energy)) => energy,
        Ok(Err(e)) => {
            set_error(handle, e.to_string());
            f64::NAN
        }
        Err(_) => {
            set_error(handle, "pme_compute_ef_rec panicked".to_string());
            f64::NAN
        }
    }
}

/// Reciprocal-space energy, forces and virial; both are accumulated, not
/// overwritten. `virial` is the length-6 upper-triangular layout
/// `(xx,xy,xz,yy,yz,zz)`. Returns `f64::NAN` on failure.
///
/// # Safety
/// Same as [`pme_compute_ef_rec`], plus `virial` must point to 6 readable
/// and writable `f64`s.
#[no_mangle]
pub unsafe extern "C" fn pme_compute_efv_rec(
    handle: *mut PmeHandle,
    n_atoms: usize,
    parameter_ang_mom: u32,
    parameters: *const c_double,
    coordinates: *const c_double,
    forces: *mut c_double,
    virial: *mut c_double,
) -> c_double {
    let handle = &mut *handle;
    clear_error(handle);
    let ncart = pme::multipole::n_cartesian(parameter_ang_mom);
    let params_slice = std::slice::from_raw_parts(parameters, n_atoms * ncart);
    let coords_slice = std::slice::from_raw_parts(coordinates, n_atoms * 3);
    let forces_slice = std::slice::from_raw_parts_mut(forces, n_atoms * 3);
    let virial_slice = std::slice::from_raw_parts_mut(virial, 6);
    let result = catch_unwind(AssertUnwindSafe(|| {
        let params = MatrixView::from_slice(n_atoms, ncart, params_slice)?;
        let coords = MatrixView::from_slice(n_atoms, 3, coords_slice)?;
        let mut forces_view = MatrixViewMut::from_slice_mut(n_atoms, 3, forces_slice)?;
        let mut virial_upper = [0.0; 6];
        virial_upper.copy_from_slice(virial_slice);
        let energy = handle.instance.compute_efv_rec(
            n_atoms,
            parameter_ang_mom,
            &params,
            &coords,
            &mut forces_view,
            &mut virial_upper,
        )?;
        virial_slice.copy_from_slice(&virial_upper);
        Ok::<f64, pme::PmeError>(energy)
    }));
    match result {
        Ok(Ok(energy)) => energy,
        Ok(Err(e)) => {
            set_error(handle, e.to_string());
            f64::NAN
        }
        Err(_) => {
            set_error(handle, "pme_compute_efv_rec panicked".to_string());
            f64::NAN
        }
    }
}

/// The diagnostic message of the most recent failed call on this handle, or
/// null if the most recent call succeeded. The returned pointer is valid
/// until the next call on the same handle, or until `pme_destroy`.
///
/// # Safety
/// `handle` must be a live pointer from [`pme_create`].
#[no_mangle]
pub unsafe extern "C" fn pme_last_error_message(handle: *mut PmeHandle) -> *const c_char {
    let handle = &*handle;
    match &handle.last_error {
        Some(msg) => msg.as_ptr(),
        None => ptr::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_setup_compute_destroy_round_trip() {
        unsafe {
            let handle = pme_create();
            assert_eq!(pme_setup(handle, 1, 0.3, 4, 16, 16, 16, 1.0, 1), 0);
            assert_eq!(pme_set_lattice_vectors(handle, 20.0, 20.0, 20.0, 90.0, 90.0, 90.0, 0), 0);
            let params = [1.0f64];
            let coords = [10.0f64, 10.0, 10.0];
            let energy = pme_compute_e_rec(handle, 1, 0, params.as_ptr(), coords.as_ptr());
            assert!(energy.is_finite());
            assert!(pme_last_error_message(handle).is_null());
            pme_destroy(handle);
        }
    }

    #[test]
    fn invalid_setup_reports_error_message() {
        unsafe {
            let handle = pme_create();
            assert_ne!(pme_setup(handle, 0, 0.3, 4, 16, 16, 16, 1.0, 1), 0);
            assert!(!pme_last_error_message(handle).is_null());
            pme_destroy(handle);
        }
    }
}
