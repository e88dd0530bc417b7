//! The simulation driver: owns the plant state and advances it one fixed tick
//! at a time.
//!
//! Each tick reads the force command and one snapshot of the pointer target,
//! computes disturbance forces from the current state, integrates, and then
//! publishes a [`Telemetry`] record. The state vector is replaced as a whole
//! and only ever by this type.

use crate::config::SimulationConfig;
use crate::controller::{ControlMode, Controller};
use crate::disturbance::{self, DisturbanceTarget, TargetChannel};
use crate::equation_engine::ExpressionError;
use crate::plant::{self, Forces, State, STATE_DIM};
use crate::solvers::{integrate_with, wrap_angle, RK4};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("state became non-finite at t = {time}: {state:?}")]
    NonFiniteState { time: f64, state: State },
    #[error("step size must be positive and finite (got {0})")]
    InvalidStep(f64),
    #[error("simulation halted after a non-finite state; reset to continue")]
    Faulted,
}

/// Where this tick's actuator force comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForceCommand {
    /// Use the built-in hybrid controller.
    Controller,
    /// Use an externally computed force. Non-finite values count as invalid.
    Override(f64),
    /// The external override failed to produce a value this tick.
    Invalid,
}

impl From<Result<f64, ExpressionError>> for ForceCommand {
    fn from(result: Result<f64, ExpressionError>) -> Self {
        match result {
            Ok(force) => ForceCommand::Override(force),
            Err(_) => ForceCommand::Invalid,
        }
    }
}

/// Everything a renderer or logger needs after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub state: State,
    pub f_ext: f64,
    pub f_px: f64,
    pub f_py: f64,
    pub f_cart_disturbance: f64,
    pub time: f64,
    pub energy: f64,
    pub mode: ControlMode,
    pub override_invalid: bool,
    pub ticks: u64,
}

pub struct Simulation {
    config: SimulationConfig,
    state: State,
    time: f64,
    ticks: u64,
    controller: Controller,
    solver: RK4<f64>,
    telemetry: Telemetry,
    accumulator: f64,
    faulted: bool,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let state = config.initial_state;
        Ok(Self {
            controller: Controller::new(config.gains),
            solver: RK4::new(STATE_DIM),
            telemetry: Self::initial_telemetry(&config, state),
            config,
            state,
            time: 0.0,
            ticks: 0,
            accumulator: 0.0,
            faulted: false,
        })
    }

    fn initial_telemetry(config: &SimulationConfig, state: State) -> Telemetry {
        Telemetry {
            state,
            f_ext: 0.0,
            f_px: 0.0,
            f_py: 0.0,
            f_cart_disturbance: 0.0,
            time: 0.0,
            energy: plant::energy(&config.plant, &state),
            mode: ControlMode::Normal,
            override_invalid: false,
            ticks: 0,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn mode(&self) -> ControlMode {
        self.controller.mode()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn tip_position(&self) -> (f64, f64) {
        plant::tip_position(&self.config.plant, &self.state)
    }

    /// Replaces the state, e.g. when the user drops the pendulum somewhere.
    pub fn set_state(&mut self, state: State) -> Result<()> {
        if !state.is_finite() {
            bail!("State must be finite.");
        }
        self.state = State {
            phi: wrap_angle(state.phi.rem_euclid(std::f64::consts::TAU)),
            ..state
        };
        self.telemetry.state = self.state;
        self.telemetry.energy = plant::energy(&self.config.plant, &self.state);
        Ok(())
    }

    /// Back to the configured initial condition with a fresh controller.
    pub fn reset(&mut self) {
        log::debug!("simulation reset after {} ticks", self.ticks);
        self.state = self.config.initial_state;
        self.time = 0.0;
        self.ticks = 0;
        self.accumulator = 0.0;
        self.faulted = false;
        self.controller.reset();
        self.telemetry = Self::initial_telemetry(&self.config, self.state);
    }

    /// One tick with the configured step.
    pub fn step(
        &mut self,
        command: ForceCommand,
        target: &DisturbanceTarget,
    ) -> Result<&Telemetry, SimError> {
        self.tick(self.config.step, command, target)
    }

    /// Advances the simulation by `h` seconds.
    ///
    /// `target` is copied once up front, so concurrent pointer updates never
    /// mix into a half-finished tick.
    pub fn tick(
        &mut self,
        h: f64,
        command: ForceCommand,
        target: &DisturbanceTarget,
    ) -> Result<&Telemetry, SimError> {
        if self.faulted {
            return Err(SimError::Faulted);
        }
        if !(h.is_finite() && h > 0.0) {
            return Err(SimError::InvalidStep(h));
        }
        let target = *target;
        let state = self.state;

        let (f_ext, override_invalid) = match command {
            ForceCommand::Controller => (self.controller.command(&state, self.time), false),
            ForceCommand::Override(force) if force.is_finite() => (force, false),
            ForceCommand::Override(_) | ForceCommand::Invalid => (0.0, true),
        };
        if override_invalid && !self.telemetry.override_invalid {
            log::warn!(
                "force override invalid at t = {:.3} s; applying zero force",
                self.time
            );
        }

        let disturbance = disturbance::compute(
            &self.config.spring,
            self.config.disturbance,
            &self.config.plant,
            &state,
            &target,
        );
        let forces = Forces {
            cart: f_ext + disturbance.cart,
            tip_x: disturbance.tip_x,
            tip_y: disturbance.tip_y,
        };

        let next = integrate_with(&mut self.solver, &self.config.plant, &state, &forces, h);
        let time = self.time + h;
        if !next.is_finite() {
            self.faulted = true;
            log::error!("non-finite state at t = {time:.3} s: {next:?}");
            return Err(SimError::NonFiniteState { time, state: next });
        }

        self.state = next;
        self.time = time;
        self.ticks += 1;
        self.telemetry = Telemetry {
            state: next,
            f_ext,
            f_px: disturbance.tip_x,
            f_py: disturbance.tip_y,
            f_cart_disturbance: disturbance.cart,
            time,
            energy: plant::energy(&self.config.plant, &next),
            mode: self.controller.mode(),
            override_invalid,
            ticks: self.ticks,
        };
        Ok(&self.telemetry)
    }

    /// Consumes measured wall-clock time in fixed steps.
    ///
    /// At most `max_substeps` ticks run per call; any backlog beyond that is
    /// dropped so a stalled host does not trigger a burst of catch-up work.
    /// `command` is asked for a fresh force before every tick. Returns the
    /// number of ticks taken.
    pub fn advance<F>(
        &mut self,
        elapsed: f64,
        target: &TargetChannel,
        mut command: F,
    ) -> Result<usize, SimError>
    where
        F: FnMut(&State, f64) -> ForceCommand,
    {
        if !(elapsed.is_finite() && elapsed >= 0.0) {
            return Err(SimError::InvalidStep(elapsed));
        }
        let h = self.config.step;
        self.accumulator += elapsed;

        let mut taken = 0;
        while self.accumulator >= h && taken < self.config.max_substeps {
            let snapshot = target.snapshot();
            let cmd = command(&self.state, self.time);
            self.tick(h, cmd, &snapshot)?;
            self.accumulator -= h;
            taken += 1;
        }
        if self.accumulator >= h {
            log::debug!(
                "dropping {:.3} s of simulation backlog",
                self.accumulator - self.accumulator % h
            );
            self.accumulator %= h;
        }
        Ok(taken)
    }
}
