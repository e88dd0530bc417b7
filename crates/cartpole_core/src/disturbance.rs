//! Spring-damper disturbances that drag a point of the plant toward an
//! externally supplied target (typically the pointer position).

use crate::plant::{tip_position, tip_velocity, PlantParams, State};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpringDamper {
    pub stiffness: f64,
    pub damping: f64,
}

impl Default for SpringDamper {
    fn default() -> Self {
        Self {
            stiffness: 1000.0,
            damping: 100.0,
        }
    }
}

impl SpringDamper {
    /// `k (target - position) - c velocity`
    pub fn force(
        &self,
        target: Vector2<f64>,
        position: Vector2<f64>,
        velocity: Vector2<f64>,
    ) -> Vector2<f64> {
        (target - position) * self.stiffness - velocity * self.damping
    }
}

/// Which point of the plant the disturbance is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisturbanceMode {
    /// Pulls the pendulum tip in both axes.
    Tip,
    /// Pulls the cart along the rail; the vertical component is discarded.
    Cart,
}

impl Default for DisturbanceMode {
    fn default() -> Self {
        DisturbanceMode::Tip
    }
}

/// Target point in plant coordinates. Inactive targets exert no force.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DisturbanceTarget {
    pub x: f64,
    pub y: f64,
    pub active: bool,
}

impl DisturbanceTarget {
    pub const INACTIVE: DisturbanceTarget = DisturbanceTarget {
        x: 0.0,
        y: 0.0,
        active: false,
    };

    pub fn at(x: f64, y: f64) -> Self {
        Self { x, y, active: true }
    }
}

/// Disturbance forces for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DisturbanceForces {
    pub cart: f64,
    pub tip_x: f64,
    pub tip_y: f64,
}

pub fn compute(
    spring: &SpringDamper,
    mode: DisturbanceMode,
    params: &PlantParams,
    state: &State,
    target: &DisturbanceTarget,
) -> DisturbanceForces {
    if !target.active {
        return DisturbanceForces::default();
    }
    let goal = Vector2::new(target.x, target.y);
    match mode {
        DisturbanceMode::Tip => {
            let (px, py) = tip_position(params, state);
            let (vx, vy) = tip_velocity(params, state);
            let f = spring.force(goal, Vector2::new(px, py), Vector2::new(vx, vy));
            DisturbanceForces {
                cart: 0.0,
                tip_x: f.x,
                tip_y: f.y,
            }
        }
        DisturbanceMode::Cart => {
            let f = spring.force(
                goal,
                Vector2::new(state.x, target.y),
                Vector2::new(state.x_dot, 0.0),
            );
            DisturbanceForces {
                cart: f.x,
                ..DisturbanceForces::default()
            }
        }
    }
}

/// Pointer target shared with an input thread that may update it between
/// ticks. Readers always get one consistent copy.
#[derive(Debug, Default)]
pub struct TargetChannel {
    target: Mutex<DisturbanceTarget>,
}

impl TargetChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, x: f64, y: f64) {
        self.store(DisturbanceTarget::at(x, y));
    }

    pub fn clear(&self) {
        self.store(DisturbanceTarget::INACTIVE);
    }

    pub fn store(&self, target: DisturbanceTarget) {
        // A poisoned lock only means a writer panicked; the value is plain data.
        let mut guard = self.target.lock().unwrap_or_else(|p| p.into_inner());
        *guard = target;
    }

    pub fn snapshot(&self) -> DisturbanceTarget {
        *self.target.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn inactive_target_gives_exactly_zero() {
        let params = PlantParams::default();
        let state = State::new(1.0, 3.0, 2.0, -5.0);
        for mode in [DisturbanceMode::Tip, DisturbanceMode::Cart] {
            let f = compute(
                &SpringDamper::default(),
                mode,
                &params,
                &state,
                &DisturbanceTarget::INACTIVE,
            );
            assert_eq!(f, DisturbanceForces::default());
        }
    }

    #[test]
    fn target_on_resting_tip_gives_exactly_zero() {
        let params = PlantParams::default();
        let state = State::new(1.3, 0.0, 0.7, 0.0);
        let (px, py) = tip_position(&params, &state);
        let f = compute(
            &SpringDamper::default(),
            DisturbanceMode::Tip,
            &params,
            &state,
            &DisturbanceTarget::at(px, py),
        );
        assert_eq!(f.tip_x, 0.0);
        assert_eq!(f.tip_y, 0.0);
        assert_eq!(f.cart, 0.0);
    }

    #[test]
    fn tip_force_is_spring_plus_damper() {
        let params = PlantParams::default();
        let state = State::new(0.0, 0.5, 0.0, 0.0);
        let f = compute(
            &SpringDamper::default(),
            DisturbanceMode::Tip,
            &params,
            &state,
            &DisturbanceTarget::at(0.1, -1.0),
        );
        assert!((f.tip_x - (1000.0 * 0.1 - 100.0 * 0.5)).abs() < 1e-12);
        assert!(f.tip_y.abs() < 1e-12);
    }

    #[test]
    fn cart_mode_ignores_vertical_offset() {
        let params = PlantParams::default();
        let state = State::new(1.0, -0.2, 0.3, 0.0);
        let f = compute(
            &SpringDamper::default(),
            DisturbanceMode::Cart,
            &params,
            &state,
            &DisturbanceTarget::at(1.5, 7.0),
        );
        assert!((f.cart - (500.0 + 20.0)).abs() < 1e-9);
        assert_eq!(f.tip_x, 0.0);
        assert_eq!(f.tip_y, 0.0);
    }

    #[test]
    fn channel_snapshots_latest_target_across_threads() {
        let channel = Arc::new(TargetChannel::new());
        assert!(!channel.snapshot().active);

        let writer = {
            let channel = channel.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    channel.set(i as f64, -(i as f64));
                }
            })
        };
        writer.join().expect("writer thread");

        let target = channel.snapshot();
        assert!(target.active);
        assert_eq!((target.x, target.y), (99.0, -99.0));

        channel.clear();
        assert_eq!(channel.snapshot(), DisturbanceTarget::INACTIVE);
    }
}
