//! Hybrid balance / recovery / swing-up controller.
//!
//! Three guards are evaluated in a fixed order every tick, each overriding the
//! force chosen by the previous one:
//!
//! 1. **Normal**: pendulum inside the cone `|phi - pi| < normal_cone`; a PD law
//!    on angle and cart position balances it while steering the cart to
//!    `target_x`.
//! 2. **Recovery**: pendulum below horizontal; the cart is parked at
//!    `recovery_x` while the pendulum is damped out. Once everything is at
//!    rest the swing-up is armed and its timer stamped.
//! 3. **SwingUp**: a push / coast / pull force profile keyed to the time since
//!    arming, kept until the pendulum enters the Normal cone.
//!
//! Normal and Recovery hold only while their guard does; SwingUp latches.

use crate::plant::State;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Normal,
    Recovery,
    SwingUp,
}

impl Default for ControlMode {
    fn default() -> Self {
        ControlMode::Normal
    }
}

impl ControlMode {
    /// Same spelling as the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::Normal => "normal",
            ControlMode::Recovery => "recovery",
            ControlMode::SwingUp => "swing_up",
        }
    }
}

/// Tuning constants of the hybrid controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerGains {
    pub k_phi: f64,
    pub k_phi_dot: f64,
    pub k_x: f64,
    pub k_x_dot: f64,
    /// Tilt of the angle setpoint per metre of cart position error.
    pub angle_lead: f64,
    /// Angular rate setpoint per m/s of cart velocity.
    pub rate_lead: f64,
    pub target_x: f64,
    /// Half-angle of the Normal cone around upright (rad).
    pub normal_cone: f64,
    pub recovery_x: f64,
    pub recovery_position_gain: f64,
    pub recovery_velocity_gain: f64,
    pub recovery_angle_gain: f64,
    pub recovery_scale: f64,
    /// Rest threshold on `|phi_dot|`, `|x_dot|` and `|x - recovery_x|`.
    pub settle_tolerance: f64,
    pub swing_force: f64,
    /// Duration of the initial push (s).
    pub swing_push: f64,
    /// Time after arming at which the reverse pull starts (s).
    pub swing_coast: f64,
}

impl Default for ControllerGains {
    fn default() -> Self {
        Self {
            k_phi: 3000.0,
            k_phi_dot: 600.0,
            k_x: 130.0,
            k_x_dot: 100.0,
            angle_lead: 0.15,
            rate_lead: 0.6,
            target_x: 2.5,
            normal_cone: 0.3 * PI,
            recovery_x: 0.2,
            recovery_position_gain: 75.0,
            recovery_velocity_gain: 100.0,
            recovery_angle_gain: 200.0,
            recovery_scale: 5.0,
            settle_tolerance: 0.05,
            swing_force: 350.0,
            swing_push: 0.2,
            swing_coast: 0.3,
        }
    }
}

impl ControllerGains {
    /// Linear Normal-mode feedback row `K` such that `F = K . s + const`,
    /// ordered like the state `(x, x_dot, phi, phi_dot)`.
    pub fn normal_feedback_row(&self) -> [f64; 4] {
        [
            self.angle_lead * self.k_phi - self.k_x,
            self.rate_lead * self.k_phi_dot - self.k_x_dot,
            -self.k_phi,
            -self.k_phi_dot,
        ]
    }

    pub fn in_normal_cone(&self, state: &State) -> bool {
        state.upright_error().abs() < self.normal_cone
    }
}

/// Discrete controller memory: whether the swing-up is latched and when it
/// was (last) armed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerState {
    pub swing_up: bool,
    pub timer: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlOutput {
    pub force: f64,
    pub mode: ControlMode,
    pub memory: ControllerState,
}

fn fallen(state: &State) -> bool {
    state.phi < FRAC_PI_2 || state.phi > 3.0 * FRAC_PI_2
}

/// Balancing PD law with the cart error fed into the angle setpoint.
pub fn normal_force(gains: &ControllerGains, state: &State) -> f64 {
    let delta_x = gains.target_x - state.x;
    let phi_des = PI - gains.angle_lead * delta_x;
    let phi_dot_des = gains.rate_lead * state.x_dot;

    gains.k_phi * (phi_des - state.phi) + gains.k_phi_dot * (phi_dot_des - state.phi_dot)
        + gains.k_x * delta_x
        - gains.k_x_dot * state.x_dot
}

/// Parks the cart at `recovery_x` and damps the hanging pendulum.
pub fn recovery_force(gains: &ControllerGains, state: &State) -> f64 {
    // Measure the angle on the near side of the bottom so the sine term
    // keeps its sign across the wrap.
    let phi = if state.phi > PI {
        state.phi - 2.0 * PI
    } else {
        state.phi
    };
    gains.recovery_scale
        * (gains.recovery_position_gain * (gains.recovery_x - state.x)
            - gains.recovery_velocity_gain * state.x_dot
            + gains.recovery_angle_gain * phi.sin())
}

/// Open-loop pump profile as a function of time since arming.
pub fn swing_up_force(gains: &ControllerGains, elapsed: f64) -> f64 {
    if elapsed < gains.swing_push {
        gains.swing_force
    } else if elapsed > gains.swing_coast {
        -gains.swing_force
    } else {
        0.0
    }
}

fn settled(gains: &ControllerGains, state: &State) -> bool {
    let tol = gains.settle_tolerance;
    state.phi_dot.abs() < tol && state.x_dot.abs() < tol && (state.x - gains.recovery_x).abs() < tol
}

/// One evaluation of the hybrid law. Pure: the same inputs always produce
/// the same output.
///
/// When no guard holds (pendulum between horizontal and the Normal cone and no
/// swing-up latched) the commanded force is zero and the mode is reported as
/// Normal.
pub fn evaluate(
    gains: &ControllerGains,
    state: &State,
    now: f64,
    memory: ControllerState,
) -> ControlOutput {
    let mut memory = memory;
    let mut force = 0.0;
    let mut mode = ControlMode::Normal;

    if gains.in_normal_cone(state) {
        force = normal_force(gains, state);
    }

    if fallen(state) {
        force = recovery_force(gains, state);
        mode = ControlMode::Recovery;
        if settled(gains, state) {
            memory.swing_up = true;
            memory.timer = now;
        }
    }

    if memory.swing_up {
        force = swing_up_force(gains, now - memory.timer);
        mode = ControlMode::SwingUp;
        if gains.in_normal_cone(state) {
            memory.swing_up = false;
        }
    }

    ControlOutput {
        force,
        mode,
        memory,
    }
}

/// Owns the controller memory between ticks and logs mode changes.
#[derive(Debug, Clone, Default)]
pub struct Controller {
    pub gains: ControllerGains,
    memory: ControllerState,
    mode: ControlMode,
}

impl Controller {
    pub fn new(gains: ControllerGains) -> Self {
        Self {
            gains,
            memory: ControllerState::default(),
            mode: ControlMode::Normal,
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn memory(&self) -> ControllerState {
        self.memory
    }

    pub fn command(&mut self, state: &State, now: f64) -> f64 {
        let out = evaluate(&self.gains, state, now, self.memory);
        if out.mode != self.mode {
            log::info!(
                "controller mode {:?} -> {:?} at t = {:.3} s",
                self.mode,
                out.mode,
                now
            );
        }
        self.mode = out.mode;
        self.memory = out.memory;
        out.force
    }

    pub fn reset(&mut self) {
        self.memory = ControllerState::default();
        self.mode = ControlMode::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_match_serialized_form() {
        for mode in [ControlMode::Normal, ControlMode::Recovery, ControlMode::SwingUp] {
            let json = serde_json::to_string(&mode).expect("serializes");
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
    }

    #[test]
    fn normal_force_is_zero_at_target() {
        let gains = ControllerGains::default();
        let state = State::upright_at(gains.target_x);
        assert_eq!(normal_force(&gains, &state), 0.0);
    }

    #[test]
    fn normal_force_matches_reference_law() {
        let gains = ControllerGains::default();
        let state = State::new(2.0, 0.1, PI + 0.05, -0.2);
        let delta_x = 0.5;
        let expected = 3000.0 * (PI - 0.15 * delta_x - state.phi)
            + 600.0 * (0.6 * 0.1 + 0.2)
            + 130.0 * delta_x
            - 100.0 * 0.1;
        assert!((normal_force(&gains, &state) - expected).abs() < 1e-9);
    }

    #[test]
    fn feedback_row_reproduces_normal_force_differences() {
        let gains = ControllerGains::default();
        let base = State::upright_at(gains.target_x);
        let k = gains.normal_feedback_row();
        let offset = State::new(base.x + 0.1, 0.2, base.phi - 0.05, 0.3);
        let predicted: f64 = k
            .iter()
            .zip(offset.to_array().iter().zip(base.to_array()))
            .map(|(k, (a, b))| k * (a - b))
            .sum();
        assert!((normal_force(&gains, &offset) - predicted).abs() < 1e-9);
    }

    #[test]
    fn recovery_force_is_continuous_across_the_wrap() {
        let gains = ControllerGains::default();
        let below = State::new(0.2, 0.0, 1e-6, 0.0);
        let above = State::new(0.2, 0.0, 2.0 * PI - 1e-6, 0.0);
        let a = recovery_force(&gains, &below);
        let b = recovery_force(&gains, &above);
        assert!((a + b).abs() < 1e-9, "expected opposite forces, got {a} {b}");
        assert!(a.abs() < 1e-2);
    }

    #[test]
    fn swing_profile_pushes_coasts_then_pulls() {
        let gains = ControllerGains::default();
        assert_eq!(swing_up_force(&gains, 0.0), 350.0);
        assert_eq!(swing_up_force(&gains, 0.19), 350.0);
        assert_eq!(swing_up_force(&gains, 0.25), 0.0);
        assert_eq!(swing_up_force(&gains, 0.3), 0.0);
        assert_eq!(swing_up_force(&gains, 0.31), -350.0);
        assert_eq!(swing_up_force(&gains, 5.0), -350.0);
    }

    #[test]
    fn hanging_at_rest_off_park_position_is_recovery() {
        let gains = ControllerGains::default();
        let out = evaluate(&gains, &State::HANGING, 0.0, ControllerState::default());
        assert_eq!(out.mode, ControlMode::Recovery);
        assert!(!out.memory.swing_up);
        assert!((out.force - 5.0 * 75.0 * 0.2).abs() < 1e-12);
    }

    #[test]
    fn settling_at_park_position_arms_swing_up() {
        let gains = ControllerGains::default();
        let state = State::new(0.2, 0.01, 0.001, -0.01);
        let out = evaluate(&gains, &state, 3.5, ControllerState::default());
        assert_eq!(out.mode, ControlMode::SwingUp);
        assert!(out.memory.swing_up);
        assert_eq!(out.memory.timer, 3.5);
        assert_eq!(out.force, gains.swing_force);
    }

    #[test]
    fn swing_up_latches_outside_recovery_region() {
        let gains = ControllerGains::default();
        let memory = ControllerState {
            swing_up: true,
            timer: 1.0,
        };
        // Past horizontal but not yet inside the cone: no guard except the latch.
        let state = State::new(0.5, -1.0, 1.7, -4.0);
        let out = evaluate(&gains, &state, 1.5, memory);
        assert_eq!(out.mode, ControlMode::SwingUp);
        assert_eq!(out.force, -350.0);
        assert!(out.memory.swing_up);
    }

    #[test]
    fn reaching_the_cone_releases_swing_up() {
        let gains = ControllerGains::default();
        let memory = ControllerState {
            swing_up: true,
            timer: 1.0,
        };
        let state = State::new(0.5, -1.0, PI - 0.5, -4.0);
        let out = evaluate(&gains, &state, 1.6, memory);
        assert_eq!(out.mode, ControlMode::SwingUp);
        assert!(!out.memory.swing_up);

        let next = evaluate(&gains, &state, 1.6 + 1.0 / 120.0, out.memory);
        assert_eq!(next.mode, ControlMode::Normal);
        assert_eq!(next.force, normal_force(&gains, &state));
    }

    #[test]
    fn no_guard_gives_zero_force() {
        let gains = ControllerGains::default();
        let state = State::new(0.0, 0.0, 1.8, 0.0);
        let out = evaluate(&gains, &state, 0.0, ControllerState::default());
        assert_eq!(out.force, 0.0);
        assert_eq!(out.mode, ControlMode::Normal);
    }

    #[test]
    fn evaluate_is_deterministic() {
        let gains = ControllerGains::default();
        let rng = fastrand::Rng::with_seed(3);
        for _ in 0..500 {
            let state = State::new(
                rng.f64() * 4.0 - 2.0,
                rng.f64() - 0.5,
                rng.f64() * 2.0 * PI,
                rng.f64() * 4.0 - 2.0,
            );
            let memory = ControllerState {
                swing_up: rng.bool(),
                timer: rng.f64() * 10.0,
            };
            let now = memory.timer + rng.f64();
            assert_eq!(
                evaluate(&gains, &state, now, memory),
                evaluate(&gains, &state, now, memory)
            );
        }
    }

    #[test]
    fn controller_tracks_mode_and_resets() {
        let mut controller = Controller::new(ControllerGains::default());
        assert_eq!(controller.mode(), ControlMode::Normal);
        controller.command(&State::new(0.2, 0.0, 0.0, 0.0), 2.0);
        assert_eq!(controller.mode(), ControlMode::SwingUp);
        assert_eq!(controller.memory().timer, 2.0);
        controller.reset();
        assert_eq!(controller.mode(), ControlMode::Normal);
        assert!(!controller.memory().swing_up);
    }
}
