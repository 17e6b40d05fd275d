use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::data::lattice;

/// Orientation matrix pair for one crystal: `ub` maps integer Miller
/// triples to observed Q vectors, `ub_inverse` maps Q back to fractional
/// Miller space. Neither matrix is constrained to be orthogonal; the
/// reciprocal cell metric is folded in.
#[derive(Clone, Copy, Debug)]
pub struct Orientation {
    pub ub: Matrix3<f64>,
    pub ub_inverse: Matrix3<f64>,
}

impl Orientation {
    /// Build the pair from a UB matrix, `None` when it cannot be
    /// inverted.
    pub fn from_ub(ub: Matrix3<f64>) -> Option<Self> {
        let ub_inverse = ub.try_inverse()?;
        if !ub_inverse.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Orientation { ub, ub_inverse })
    }

    /// Build the pair from an inverse UB matrix, `None` when it cannot
    /// be inverted.
    pub fn from_ub_inverse(ub_inverse: Matrix3<f64>) -> Option<Self> {
        let ub = ub_inverse.try_inverse()?;
        if !ub.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Orientation { ub, ub_inverse })
    }

    /// Cell parameters `[a, b, c, alpha, beta, gamma, volume]` implied by
    /// the UB matrix, for diagnostics.
    pub fn lattice_parameters(&self) -> Option<[f64; 7]> {
        lattice::lattice_parameters_of_ub(&self.ub)
    }
}

/// Right-handed rotation for the z-x-z Euler angles `(phi, chi, omega)`
/// in degrees: `R = Rz(omega) * Rx(chi) * Rz(phi)`, phi applied first.
pub fn euler_rotation(phi: f64, chi: f64, omega: f64) -> Matrix3<f64> {
    let rz_phi = Rotation3::from_axis_angle(&Vector3::z_axis(), phi.to_radians());
    let rx_chi = Rotation3::from_axis_angle(&Vector3::x_axis(), chi.to_radians());
    let rz_omega = Rotation3::from_axis_angle(&Vector3::z_axis(), omega.to_radians());
    (rz_omega * rx_chi * rz_phi).into_inner()
}

/// Partial derivatives of `euler_rotation` with respect to each angle,
/// ordered `(phi, chi, omega)`, in per-degree units.
pub fn euler_rotation_partials(phi: f64, chi: f64, omega: f64) -> [Matrix3<f64>; 3] {
    let per_degree = std::f64::consts::PI / 180.0;
    let (sin_phi, cos_phi) = phi.to_radians().sin_cos();
    let (sin_chi, cos_chi) = chi.to_radians().sin_cos();
    let (sin_omega, cos_omega) = omega.to_radians().sin_cos();

    let rz_phi = Matrix3::new(
        cos_phi, -sin_phi, 0.0,
        sin_phi, cos_phi, 0.0,
        0.0, 0.0, 1.0,
    );
    let rx_chi = Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, cos_chi, -sin_chi,
        0.0, sin_chi, cos_chi,
    );
    let rz_omega = Matrix3::new(
        cos_omega, -sin_omega, 0.0,
        sin_omega, cos_omega, 0.0,
        0.0, 0.0, 1.0,
    );

    let dz_phi = Matrix3::new(
        -sin_phi, -cos_phi, 0.0,
        cos_phi, -sin_phi, 0.0,
        0.0, 0.0, 0.0,
    );
    let dx_chi = Matrix3::new(
        0.0, 0.0, 0.0,
        0.0, -sin_chi, -cos_chi,
        0.0, cos_chi, -sin_chi,
    );
    let dz_omega = Matrix3::new(
        -sin_omega, -cos_omega, 0.0,
        cos_omega, -sin_omega, 0.0,
        0.0, 0.0, 0.0,
    );

    [
        rz_omega * rx_chi * dz_phi * per_degree,
        rz_omega * dx_chi * rz_phi * per_degree,
        dz_omega * rx_chi * rz_phi * per_degree,
    ]
}

/// UB for a trial rotation of the unrotated reciprocal cell:
/// `UB = R(phi, chi, omega) * B`.
pub fn ub_from_angles(b: &Matrix3<f64>, phi: f64, chi: f64, omega: f64) -> Matrix3<f64> {
    euler_rotation(phi, chi, omega) * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::lattice::LatticeConstants;
    use approx::assert_relative_eq;

    #[test]
    fn test_euler_identity() {
        let rotation = euler_rotation(0.0, 0.0, 0.0);
        assert_relative_eq!(rotation, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_euler_application_order() {
        // phi about z first: x -> y
        let phi_only = euler_rotation(90.0, 0.0, 0.0);
        assert_relative_eq!(phi_only * Vector3::x(), Vector3::y(), epsilon = 1e-12);

        // then chi about x: the rotated x (now y) continues on to z
        let phi_chi = euler_rotation(90.0, 90.0, 0.0);
        assert_relative_eq!(phi_chi * Vector3::x(), Vector3::z(), epsilon = 1e-12);

        // omega about z leaves z fixed
        let all_three = euler_rotation(90.0, 90.0, 37.0);
        assert_relative_eq!(all_three * Vector3::x(), Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_is_orthogonal() {
        let rotation = euler_rotation(37.5, 62.1, 203.4);
        assert_relative_eq!(rotation * rotation.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(rotation.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_partials_match_finite_differences() {
        let (phi, chi, omega) = (24.0, 57.0, 131.0);
        let partials = euler_rotation_partials(phi, chi, omega);
        let step = 1.0e-6;

        let numeric = [
            (euler_rotation(phi + step, chi, omega) - euler_rotation(phi - step, chi, omega)) / (2.0 * step),
            (euler_rotation(phi, chi + step, omega) - euler_rotation(phi, chi - step, omega)) / (2.0 * step),
            (euler_rotation(phi, chi, omega + step) - euler_rotation(phi, chi, omega - step)) / (2.0 * step),
        ];

        for (analytic, approximate) in partials.iter().zip(numeric.iter()) {
            assert_relative_eq!(*analytic, *approximate, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_orientation_roundtrip() {
        let b = LatticeConstants::quartz().b_matrix().unwrap();
        let ub = ub_from_angles(&b, 20.0, 40.0, 60.0);
        let orientation = Orientation::from_ub(ub).unwrap();

        assert_relative_eq!(
            orientation.ub * orientation.ub_inverse,
            Matrix3::identity(),
            epsilon = 1e-10
        );

        let params = orientation.lattice_parameters().unwrap();
        assert_relative_eq!(params[0], 4.9138, epsilon = 1e-9);
        assert_relative_eq!(params[5], 120.0, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        assert!(Orientation::from_ub(Matrix3::zeros()).is_none());
        assert!(Orientation::from_ub_inverse(Matrix3::zeros()).is_none());
    }
}
