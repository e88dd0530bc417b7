//! Local linear models of the plant and of the balancing loop.

use crate::controller::ControllerGains;
use crate::plant::{derivative, Forces, PlantParams, State, STATE_DIM};
use nalgebra::DMatrix;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// `ds/dt ~ A (s - s0) + B (F - F0)` around an operating point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linearization {
    /// Row-major 4x4 state Jacobian.
    pub a: Vec<f64>,
    /// Sensitivity to the cart force.
    pub b: Vec<f64>,
    pub eigenvalues: Vec<Complex<f64>>,
}

fn central_difference(
    params: &PlantParams,
    state: &State,
    forces: &Forces,
) -> (Vec<f64>, Vec<f64>) {
    let mut a = vec![0.0; STATE_DIM * STATE_DIM];
    let base = state.to_array();
    for j in 0..STATE_DIM {
        let eps = 1e-6 * base[j].abs().max(1.0);
        let mut plus = base;
        let mut minus = base;
        plus[j] += eps;
        minus[j] -= eps;
        let fp = derivative(params, &State::new(plus[0], plus[1], plus[2], plus[3]), forces);
        let fm = derivative(params, &State::new(minus[0], minus[1], minus[2], minus[3]), forces);
        for i in 0..STATE_DIM {
            a[i * STATE_DIM + j] = (fp[i] - fm[i]) / (2.0 * eps);
        }
    }

    let eps = 1e-6 * forces.cart.abs().max(1.0);
    let fp = derivative(
        params,
        state,
        &Forces {
            cart: forces.cart + eps,
            ..*forces
        },
    );
    let fm = derivative(
        params,
        state,
        &Forces {
            cart: forces.cart - eps,
            ..*forces
        },
    );
    let b = (0..STATE_DIM)
        .map(|i| (fp[i] - fm[i]) / (2.0 * eps))
        .collect();
    (a, b)
}

fn eigenvalues(a: &[f64]) -> Vec<Complex<f64>> {
    let matrix = DMatrix::from_row_slice(STATE_DIM, STATE_DIM, a);
    matrix.complex_eigenvalues().iter().copied().collect()
}

pub fn linearize(params: &PlantParams, state: &State, forces: &Forces) -> Linearization {
    let (a, b) = central_difference(params, state, forces);
    let eigenvalues = eigenvalues(&a);
    Linearization { a, b, eigenvalues }
}

/// Poles of the Normal-mode loop at the balance target, `eig(A + B K)`.
pub fn closed_loop_poles(params: &PlantParams, gains: &ControllerGains) -> Vec<Complex<f64>> {
    let target = State::upright_at(gains.target_x);
    let (mut a, b) = central_difference(params, &target, &Forces::default());
    let k = gains.normal_feedback_row();
    for i in 0..STATE_DIM {
        for j in 0..STATE_DIM {
            a[i * STATE_DIM + j] += b[i] * k[j];
        }
    }
    eigenvalues(&a)
}
