/// Tab Freezer - Chrome Extension that suspends idle tabs
/// Built with Rust + WASM + Yew

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod host;
pub mod placeholder;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod storage;
pub mod tab_data;

#[cfg(target_arch = "wasm32")]
pub mod bindings;
#[cfg(target_arch = "wasm32")]
pub mod ui;

#[cfg(test)]
mod testing;

use wasm_bindgen::prelude::*;

// Set up panic hook for better error messages in the browser console
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

// Re-export domain normalization for the options page
#[wasm_bindgen]
pub fn normalize_domain(input: &str) -> String {
    domain::normalize(input)
}

// Start the Yew app for the frozen-tab placeholder
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn start_frozen_page() {
    yew::Renderer::<ui::frozen::FrozenPage>::new().render();
}
