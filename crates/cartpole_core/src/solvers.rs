use crate::plant::{Forces, ForcedPlant, PlantParams, State, STATE_DIM};
use crate::traits::{DynamicalSystem, Scalar, Steppable};
use std::f64::consts::TAU;

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let two = T::one() + T::one();
        let half = T::one() / two;
        let sixth = T::one() / (two + two + two);

        let t0 = *t;

        // k1 = f(t, y)
        system.apply(t0, state, &mut self.k1);

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

/// Brings an angle that left `[0, 2pi)` by less than one turn back into range.
///
/// A single correction is enough because one tick never rotates the pendulum
/// by a full turn.
pub fn wrap_angle(phi: f64) -> f64 {
    let wrapped = if phi >= TAU {
        phi - TAU
    } else if phi < 0.0 {
        phi + TAU
    } else {
        phi
    };
    // phi slightly below zero can round up to exactly TAU.
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Advances the plant by one RK4 step of size `h` with the forces held fixed,
/// then wraps the angle into `[0, 2pi)`.
///
/// Non-finite results are returned as-is for the caller to detect.
pub fn integrate(params: &PlantParams, state: &State, forces: &Forces, h: f64) -> State {
    integrate_with(&mut RK4::new(STATE_DIM), params, state, forces, h)
}

/// Same as [`integrate`] but reuses `solver`'s stage buffers, so a long-running
/// loop does no allocation per tick.
pub fn integrate_with(
    solver: &mut RK4<f64>,
    params: &PlantParams,
    state: &State,
    forces: &Forces,
    h: f64,
) -> State {
    let plant = ForcedPlant {
        params,
        forces: *forces,
    };
    let mut buffer = state.to_array();
    let mut t = 0.0;
    solver.step(&plant, &mut t, &mut buffer, h);

    let [x, x_dot, phi, phi_dot] = buffer;
    State::new(x, x_dot, wrap_angle(phi), phi_dot)
}
