use crate::controller::ControllerGains;
use crate::disturbance::{DisturbanceMode, SpringDamper};
use crate::plant::{PlantParams, State};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Everything needed to start a simulation instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub plant: PlantParams,
    pub gains: ControllerGains,
    pub spring: SpringDamper,
    pub disturbance: DisturbanceMode,
    /// Fixed integration step (s).
    pub step: f64,
    pub initial_state: State,
    /// Upper bound on fixed steps taken by one `advance` call.
    pub max_substeps: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::tip_disturbance()
    }
}

impl SimulationConfig {
    /// Reference profile: pointer tugs the pendulum tip, cart starts at the
    /// balance target with the pendulum hanging.
    pub fn tip_disturbance() -> Self {
        let gains = ControllerGains::default();
        Self {
            plant: PlantParams::default(),
            gains,
            spring: SpringDamper::default(),
            disturbance: DisturbanceMode::Tip,
            step: 1.0 / 120.0,
            initial_state: State::new(gains.target_x, 0.0, 0.0, 0.0),
            max_substeps: 8,
        }
    }

    /// Simplified profile: pointer drags the cart along the rail.
    pub fn cart_disturbance() -> Self {
        Self {
            disturbance: DisturbanceMode::Cart,
            ..Self::tip_disturbance()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.plant;
        for (name, value) in [
            ("gravity", p.gravity),
            ("cart_mass", p.cart_mass),
            ("pendulum_mass", p.pendulum_mass),
            ("length", p.length),
            ("cart_damping", p.cart_damping),
            ("pivot_damping", p.pivot_damping),
            ("spring.stiffness", self.spring.stiffness),
            ("spring.damping", self.spring.damping),
            ("step", self.step),
        ] {
            if !value.is_finite() {
                bail!("{name} must be finite (got {value}).");
            }
        }
        if p.cart_mass <= 0.0 || p.pendulum_mass <= 0.0 {
            bail!("Masses must be positive.");
        }
        if p.length <= 0.0 {
            bail!("Pendulum length must be positive.");
        }
        if p.cart_damping < 0.0 || p.pivot_damping < 0.0 {
            bail!("Damping coefficients must be non-negative.");
        }
        if self.step <= 0.0 {
            bail!("step must be positive.");
        }
        if self.max_substeps == 0 {
            bail!("max_substeps must be greater than zero.");
        }
        if !self.initial_state.is_finite() {
            bail!("Initial state must be finite.");
        }
        if !(0.0..TAU).contains(&self.initial_state.phi) {
            bail!(
                "Initial angle must lie in [0, 2pi) (got {}).",
                self.initial_state.phi
            );
        }
        let g = &self.gains;
        if g.swing_coast < g.swing_push {
            bail!("swing_coast must not precede swing_push.");
        }
        if g.settle_tolerance <= 0.0 || g.normal_cone <= 0.0 {
            bail!("settle_tolerance and normal_cone must be positive.");
        }
        Ok(())
    }
}
