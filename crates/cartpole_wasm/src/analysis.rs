//! Linear-model diagnostics exposed to the front end.

use crate::system::WasmCartPole;
use cartpole_core::linearization::{closed_loop_poles, linearize};
use cartpole_core::plant::Forces;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
impl WasmCartPole {
    /// Jacobians and open-loop eigenvalues at the current state, with the
    /// last applied actuator force held fixed.
    pub fn linearize(&self) -> Result<JsValue, JsValue> {
        let telemetry = self.sim.telemetry();
        let forces = Forces {
            cart: telemetry.f_ext + telemetry.f_cart_disturbance,
            tip_x: telemetry.f_px,
            tip_y: telemetry.f_py,
        };
        let result = linearize(&self.sim.config().plant, &self.sim.state(), &forces);
        to_value(&result).map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
    }

    /// Normal-mode closed-loop poles as interleaved `[re, im, re, im, ...]`.
    pub fn closed_loop_poles(&self) -> Vec<f64> {
        let config = self.sim.config();
        closed_loop_poles(&config.plant, &config.gains)
            .into_iter()
            .flat_map(|c| [c.re, c.im])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::system::WasmCartPole;

    #[test]
    fn closed_loop_poles_are_interleaved_and_stable() {
        let handle = WasmCartPole::new("tip").expect("handle");
        let poles = handle.closed_loop_poles();
        assert_eq!(poles.len(), 8);
        for pair in poles.chunks(2) {
            assert!(pair[0] < 0.0, "unstable pole {pair:?}");
        }
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use crate::system::WasmCartPole;
    use cartpole_core::linearization::Linearization;
    use serde_wasm_bindgen::from_value;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn linearize_returns_full_jacobians() {
        let handle = WasmCartPole::new("tip").expect("handle");
        let lin: Linearization =
            from_value(handle.linearize().expect("linearize")).expect("decodes");
        assert_eq!(lin.a.len(), 16);
        assert_eq!(lin.b.len(), 4);
        assert_eq!(lin.eigenvalues.len(), 4);
    }
}
