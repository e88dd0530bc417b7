//! WASM bindings for the cart-pendulum simulator.
//!
//! Exposes `WasmCartPole`, a single simulation instance driven from the page's
//! animation loop.

mod analysis;
mod system;

pub use system::WasmCartPole;
