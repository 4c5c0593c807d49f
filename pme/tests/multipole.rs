use pme::matrix::{MatrixOps, MatrixView};
use pme::{Lattice, LatticeKind, PMEInstance};

#[test]
fn quadrupole_energy_is_translation_invariant_on_a_triclinic_lattice() {
    // A genuinely non-orthogonal cell, so the Cartesian -> fractional
    // multipole transform used by `spread_atom`/`probe_atom` has nontrivial
    // off-diagonal entries at angMom=2.
    let build = || {
        let mut inst = PMEInstance::new();
        inst.setup(1, 0.3, 6, [24, 24, 24], 1.0, 1).unwrap();
        inst.set_lattice_vectors(18.0, 19.0, 20.0, 80.0, 95.0, 100.0, LatticeKind::XAligned).unwrap();
        inst
    };
    let lattice = Lattice::build(18.0, 19.0, 20.0, 80.0, 95.0, 100.0, LatticeKind::XAligned).unwrap();
    let a_vec = [lattice.matrix().at(0, 0), lattice.matrix().at(1, 0), lattice.matrix().at(2, 0)];

    // angMom=2 parameters: monopole, dipole (x,y,z), quadrupole (xx,xy,xz,yy,yz,zz).
    let params = [0.4, 0.2, -0.1, 0.05, 0.3, -0.15, 0.1, 0.2, -0.05, 0.25];
    let p = MatrixView::from_slice(1, 10, &params).unwrap();

    let center = [9.0, 9.5, 10.0];
    let mut inst_a = build();
    let c_a = MatrixView::from_slice(1, 3, &center).unwrap();
    let e_a = inst_a.compute_e_rec(1, 2, &p, &c_a).unwrap();

    let shifted = [center[0] + a_vec[0], center[1] + a_vec[1], center[2] + a_vec[2]];
    let mut inst_b = build();
    let c_b = MatrixView::from_slice(1, 3, &shifted).unwrap();
    let e_b = inst_b.compute_e_rec(1, 2, &p, &c_b).unwrap();

    assert!((e_a - e_b).abs() < 1e-6 * e_a.abs().max(1.0), "e_a={} e_b={}", e_a, e_b);
}

#[test]
fn dipole_energy_scales_quadratically_with_moment_on_a_triclinic_lattice() {
    let build = || {
        let mut inst = PMEInstance::new();
        inst.setup(1, 0.3, 6, [24, 24, 24], 1.0, 1).unwrap();
        inst.set_lattice_vectors(18.0, 19.0, 20.0, 80.0, 95.0, 100.0, LatticeKind::XAligned).unwrap();
        inst
    };
    let coords = [9.0, 9.5, 10.0];
    let c = MatrixView::from_slice(1, 3, &coords).unwrap();

    let run = |scale: f64| {
        let params = [0.0, scale * 0.5, scale * -0.3, scale * 0.2];
        let p = MatrixView::from_slice(1, 4, &params).unwrap();
        let mut inst = build();
        inst.compute_e_rec(1, 1, &p, &c).unwrap()
    };

    let e_base = run(1.0);
    let e_scaled = run(3.0);
    assert!((e_scaled - 9.0 * e_base).abs() < 1e-9 * e_base.abs().max(1.0), "e_base={} e_scaled={}", e_base, e_scaled);
}
