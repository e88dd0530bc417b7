//! Equations of motion for the cart-pendulum plant.
//!
//! The pendulum is a point mass on a massless rod pivoted on the cart. The
//! angle `phi` is measured from the hanging equilibrium, so `phi = 0` points
//! straight down and `phi = pi` is upright. Viscous damping acts at the
//! cart/rail interface and at the pivot.

use crate::traits::DynamicalSystem;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Dimension of the plant state `(x, x_dot, phi, phi_dot)`.
pub const STATE_DIM: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantParams {
    pub gravity: f64,
    pub cart_mass: f64,
    pub pendulum_mass: f64,
    pub length: f64,
    pub cart_damping: f64,
    pub pivot_damping: f64,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            gravity: 9.81,
            cart_mass: 10.0,
            pendulum_mass: 1.0,
            length: 1.0,
            cart_damping: 0.03,
            pivot_damping: 0.05,
        }
    }
}

impl PlantParams {
    /// Same plant with both damping coefficients removed.
    pub fn undamped(self) -> Self {
        Self {
            cart_damping: 0.0,
            pivot_damping: 0.0,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    pub x: f64,
    pub x_dot: f64,
    pub phi: f64,
    pub phi_dot: f64,
}

impl State {
    pub const HANGING: State = State {
        x: 0.0,
        x_dot: 0.0,
        phi: 0.0,
        phi_dot: 0.0,
    };

    pub fn new(x: f64, x_dot: f64, phi: f64, phi_dot: f64) -> Self {
        Self {
            x,
            x_dot,
            phi,
            phi_dot,
        }
    }

    pub fn upright_at(x: f64) -> Self {
        Self::new(x, 0.0, PI, 0.0)
    }

    pub fn to_array(self) -> [f64; STATE_DIM] {
        [self.x, self.x_dot, self.phi, self.phi_dot]
    }

    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            &[x, x_dot, phi, phi_dot] => Some(Self::new(x, x_dot, phi, phi_dot)),
            _ => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Signed angular distance from upright.
    pub fn upright_error(&self) -> f64 {
        self.phi - PI
    }
}

/// Generalized forces acting on the plant, held constant over one step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Forces {
    /// Total horizontal force on the cart (actuator plus any cart disturbance).
    pub cart: f64,
    /// Horizontal force at the pendulum tip.
    pub tip_x: f64,
    /// Vertical force at the pendulum tip (positive up).
    pub tip_y: f64,
}

impl Forces {
    pub fn on_cart(cart: f64) -> Self {
        Self {
            cart,
            ..Self::default()
        }
    }
}

/// Returns `(x_dot, x_ddot, phi_dot, phi_ddot)` for the given state and forces.
///
/// Both accelerations come from the closed-form solution of the 2x2 mass
/// matrix system, whose determinant is proportional to
/// `m_c + m_p * sin^2(phi)`. Callers must supply positive masses and length;
/// degenerate parameters are not guarded against here.
pub fn derivative(params: &PlantParams, state: &State, forces: &Forces) -> [f64; STATE_DIM] {
    let PlantParams {
        gravity: g,
        cart_mass: mc,
        pendulum_mass: mp,
        length: l,
        cart_damping: dx,
        pivot_damping: dphi,
    } = *params;
    let State {
        x_dot, phi, phi_dot, ..
    } = *state;
    let Forces {
        cart: f,
        tip_x: fpx,
        tip_y: fpy,
    } = *forces;

    let (s, c) = phi.sin_cos();
    let shared = mc + mp * s * s;

    let x_ddot = (f * l + dphi * phi_dot * c + fpx * l * s * s - fpy * l * s * c - dx * l * x_dot
        + l * l * mp * phi_dot * phi_dot * s
        + g * l * mp * s * c)
        / (l * shared);

    let phi_ddot = -(dphi * (mc + mp) * phi_dot + l * l * mp * mp * phi_dot * phi_dot * s * c
        - fpx * l * mc * c
        + f * l * mp * c
        - fpy * l * (mc + mp) * s
        + g * l * mp * (mc + mp) * s
        - dx * l * mp * x_dot * c)
        / (l * l * mp * shared);

    [x_dot, x_ddot, phi_dot, phi_ddot]
}

/// Total mechanical energy, zero at the hanging rest position.
pub fn energy(params: &PlantParams, state: &State) -> f64 {
    let PlantParams {
        gravity: g,
        cart_mass: mc,
        pendulum_mass: mp,
        length: l,
        ..
    } = *params;
    let (s, c) = state.phi.sin_cos();
    let tip_vx = state.x_dot + l * state.phi_dot * c;
    let tip_vy = l * state.phi_dot * s;

    0.5 * mc * state.x_dot * state.x_dot + 0.5 * mp * (tip_vx * tip_vx + tip_vy * tip_vy)
        - g * l * mp * (c - 1.0)
}

/// Pendulum tip position `(x, y)` in the plant frame (pivot height is y = 0).
pub fn tip_position(params: &PlantParams, state: &State) -> (f64, f64) {
    let (s, c) = state.phi.sin_cos();
    (state.x + params.length * s, -params.length * c)
}

/// Pendulum tip velocity `(vx, vy)`.
pub fn tip_velocity(params: &PlantParams, state: &State) -> (f64, f64) {
    let (s, c) = state.phi.sin_cos();
    let l = params.length;
    (state.x_dot + l * state.phi_dot * c, l * state.phi_dot * s)
}

/// The plant with its forces frozen, viewed as an autonomous vector field.
pub struct ForcedPlant<'a> {
    pub params: &'a PlantParams,
    pub forces: Forces,
}

impl DynamicalSystem<f64> for ForcedPlant<'_> {
    fn dimension(&self) -> usize {
        STATE_DIM
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let state = State::new(x[0], x[1], x[2], x[3]);
        out.copy_from_slice(&derivative(self.params, &state, &self.forces));
    }
}
