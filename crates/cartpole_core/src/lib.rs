//! The `cartpole_core` crate simulates and controls a cart-pendulum plant.
//! Everything here is deterministic, so one instance can
//! be ticked from a browser animation frame or a fixed-rate timer.
//!
//! Key components:
//! - **Plant**: equations of motion, energy, tip kinematics.
//! - **Solvers**: RK4 (`Steppable`) and the angle-wrapping `integrate` step.
//! - **Controller**: hybrid Normal / Recovery / SwingUp law.
//! - **Disturbance**: spring-damper pull toward a pointer target.
//! - **Simulation**: the per-tick driver and its telemetry.
//! - **Equation Engine**: sandboxed user force expressions.
//! - **Linearization**: Jacobians and closed-loop poles for diagnostics.

pub mod config;
pub mod controller;
pub mod disturbance;
pub mod equation_engine;
pub mod linearization;
pub mod plant;
pub mod simulation;
pub mod solvers;
pub mod traits;

pub use config::SimulationConfig;
pub use controller::{ControlMode, ControllerGains};
pub use disturbance::{DisturbanceMode, DisturbanceTarget, TargetChannel};
pub use plant::{PlantParams, State};
pub use simulation::{ForceCommand, SimError, Simulation, Telemetry};
