//! The browser-facing simulation handle.
//!
//! The front end owns drawing, pointer capture and the animation loop; it
//! calls `advance` (measured frame time) or `tick` (fixed step) once per
//! frame and reads back `telemetry`.

use cartpole_core::equation_engine::{ExpressionError, ForceExpression};
use cartpole_core::{
    ForceCommand, Simulation, SimulationConfig, State, TargetChannel, Telemetry,
};
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmCartPole {
    pub(crate) sim: Simulation,
    target: TargetChannel,
    expression: Option<Result<ForceExpression, ExpressionError>>,
}

pub(crate) fn profile_config(profile: &str) -> Result<SimulationConfig, String> {
    match profile {
        "tip" | "" => Ok(SimulationConfig::tip_disturbance()),
        "cart" => Ok(SimulationConfig::cart_disturbance()),
        other => Err(format!("Unknown profile '{other}'")),
    }
}

fn command_for(
    expression: &Option<Result<ForceExpression, ExpressionError>>,
    state: &State,
    t: f64,
) -> ForceCommand {
    match expression {
        None => ForceCommand::Controller,
        Some(Ok(expr)) => expr.evaluate(state, t).into(),
        Some(Err(_)) => ForceCommand::Invalid,
    }
}

impl WasmCartPole {
    pub(crate) fn from_config(config: SimulationConfig) -> Result<Self, String> {
        let sim = Simulation::new(config).map_err(|e| format!("Invalid configuration: {e}"))?;
        Ok(Self {
            sim,
            target: TargetChannel::new(),
            expression: None,
        })
    }

    pub(crate) fn tick_inner(&mut self, h: f64) -> Result<(), String> {
        let command = command_for(&self.expression, &self.sim.state(), self.sim.time());
        let target = self.target.snapshot();
        self.sim
            .tick(h, command, &target)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    pub(crate) fn advance_inner(&mut self, elapsed: f64) -> Result<u32, String> {
        let expression = &self.expression;
        self.sim
            .advance(elapsed, &self.target, |state, t| {
                command_for(expression, state, t)
            })
            .map(|n| n as u32)
            .map_err(|e| e.to_string())
    }

    pub(crate) fn telemetry_inner(&self) -> &Telemetry {
        self.sim.telemetry()
    }
}

#[wasm_bindgen]
impl WasmCartPole {
    /// `profile` is `"tip"` (pointer tugs the pendulum) or `"cart"`.
    #[wasm_bindgen(constructor)]
    pub fn new(profile: &str) -> Result<WasmCartPole, JsValue> {
        console_error_panic_hook::set_once();

        let config = profile_config(profile).map_err(|e| JsValue::from_str(&e))?;
        Self::from_config(config).map_err(|e| JsValue::from_str(&e))
    }

    /// Builds from a (possibly partial) `SimulationConfig` object.
    pub fn with_config(config: JsValue) -> Result<WasmCartPole, JsValue> {
        console_error_panic_hook::set_once();

        let config: SimulationConfig = from_value(config)
            .map_err(|e| JsValue::from_str(&format!("Failed to parse configuration: {e}")))?;
        Self::from_config(config).map_err(|e| JsValue::from_str(&e))
    }

    /// Installs a force expression, or removes it with `undefined`.
    /// Returns the compile error, if any; a broken expression stays installed
    /// and makes every tick apply zero force until replaced.
    pub fn set_override(&mut self, expression: Option<String>) -> Option<String> {
        self.expression = expression
            .filter(|source| !source.trim().is_empty())
            .map(|source| ForceExpression::compile(&source));
        match &self.expression {
            Some(Err(e)) => Some(e.to_string()),
            _ => None,
        }
    }

    pub fn set_target(&mut self, x: f64, y: f64) {
        self.target.set(x, y);
    }

    pub fn clear_target(&mut self) {
        self.target.clear();
    }

    pub fn tick(&mut self, h: f64) -> Result<(), JsValue> {
        self.tick_inner(h).map_err(|e| JsValue::from_str(&e))
    }

    /// Runs as many fixed steps as fit into `elapsed` seconds of wall time.
    pub fn advance(&mut self, elapsed: f64) -> Result<u32, JsValue> {
        self.advance_inner(elapsed)
            .map_err(|e| JsValue::from_str(&e))
    }

    pub fn telemetry(&self) -> Result<JsValue, JsValue> {
        to_value(self.telemetry_inner())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
    }

    pub fn get_state(&self) -> Vec<f64> {
        self.sim.state().to_array().to_vec()
    }

    pub fn set_state(&mut self, state: &[f64]) -> Result<(), JsValue> {
        let state = State::from_slice(state)
            .ok_or_else(|| JsValue::from_str("State must have exactly 4 entries."))?;
        self.sim
            .set_state(state)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn get_t(&self) -> f64 {
        self.sim.time()
    }

    pub fn tip_position(&self) -> Vec<f64> {
        let (x, y) = self.sim.tip_position();
        vec![x, y]
    }

    /// Same spelling as `telemetry().mode`.
    pub fn mode(&self) -> String {
        self.sim.mode().as_str().to_string()
    }

    pub fn override_invalid(&self) -> bool {
        self.telemetry_inner().override_invalid
    }

    pub fn is_faulted(&self) -> bool {
        self.sim.is_faulted()
    }

    pub fn reset(&mut self) {
        self.sim.reset();
    }
}
