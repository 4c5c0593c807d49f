use approx::assert_abs_diff_eq;
use pme::matrix::MatrixOps;
use pme::{Lattice, LatticeKind};

#[test]
fn reciprocal_satisfies_two_pi_orthogonality() {
    let l = Lattice::build(12.0, 15.0, 18.0, 75.0, 95.0, 105.0, LatticeKind::ShapeMatrix).unwrap();
    for i in 0..3 {
        for j in 0..3 {
            let mut dot = 0.0;
            for k in 0..3 {
                dot += l.reciprocal().at(i, k) * l.matrix().at(j, k);
            }
            let expected = if i == j { std::f64::consts::TAU } else { 0.0 };
            assert_abs_diff_eq!(dot, expected, epsilon = 1e-8);
        }
    }
}

#[test]
fn volume_matches_determinant_magnitude() {
    let l = Lattice::build(10.0, 11.0, 12.0, 80.0, 85.0, 95.0, LatticeKind::XAligned).unwrap();
    let m = l.matrix();
    let det = m.at(0, 0) * (m.at(1, 1) * m.at(2, 2) - m.at(1, 2) * m.at(2, 1))
        - m.at(0, 1) * (m.at(1, 0) * m.at(2, 2) - m.at(1, 2) * m.at(2, 0))
        + m.at(0, 2) * (m.at(1, 0) * m.at(2, 1) - m.at(1, 1) * m.at(2, 0));
    assert_abs_diff_eq!(l.volume(), det.abs(), epsilon = 1e-6);
}

#[test]
fn fractional_cartesian_round_trip_for_triclinic_cell() {
    let l = Lattice::build(10.0, 12.0, 9.0, 70.0, 100.0, 110.0, LatticeKind::XAligned).unwrap();
    for f in [[0.1, 0.2, 0.3], [0.9, 0.05, 0.5], [0.0, 0.0, 0.0]] {
        let cart = l.cartesian_of(f);
        let back = l.fractional_of(cart).unwrap();
        for i in 0..3 {
            assert_abs_diff_eq!(back[i], f[i], epsilon = 1e-9);
        }
    }
}

#[test]
fn shape_matrix_and_x_aligned_conventions_share_the_same_metric() {
    let x_aligned = Lattice::build(10.0, 11.0, 12.0, 80.0, 85.0, 95.0, LatticeKind::XAligned).unwrap();
    let shape = Lattice::build(10.0, 11.0, 12.0, 80.0, 85.0, 95.0, LatticeKind::ShapeMatrix).unwrap();
    assert_abs_diff_eq!(x_aligned.volume(), shape.volume(), epsilon = 1e-6);
}
