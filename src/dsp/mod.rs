//! DSP: everything that touches samples.
//!
//! The same graph code runs in the realtime engine (AudioWorklet via WASM,
//! or a native audio callback) and in the offline renderer, so playback and
//! export produce identical output.

pub mod delay;
pub mod effects;
pub mod engine;
pub mod equalizer;
pub mod filter;
pub mod graph;
pub mod mixer;
pub mod renderer;
