pub mod buffer;
pub mod config;
pub mod dsp;
pub mod error;
pub mod history;
pub mod intake;
pub mod project;
pub mod studio;
pub mod timeline;
pub mod transport;
pub mod voice;

pub use config::StudioConfig;
pub use error::StudioError;
pub use studio::Studio;

use crate::buffer::AudioBuffer;
use crate::dsp::effects::EffectState;
use crate::dsp::engine::PlaybackEngine;
use crate::dsp::equalizer::EqPreset;
use crate::dsp::renderer::{self, EncodeStep, WavEncoder};
use crate::project::ProjectDocument;
use crate::timeline::{ClipId, ClipSource, RowId};
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the codie-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

/// WASM-exposed workstation: a studio plus the engine that plays it.
///
/// The page calls the editing methods; the audio callback calls
/// [`Workstation::process`] with each output block.
#[wasm_bindgen]
pub struct Workstation {
    studio: Studio,
    engine: PlaybackEngine,
}

#[wasm_bindgen]
impl Workstation {
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: u32, channels: usize) -> Workstation {
        Self::with_config(StudioConfig::with_layout(sample_rate, channels))
    }

    /// Build from a TOML config document.
    pub fn from_toml(source: &str) -> Result<Workstation, JsValue> {
        let config = StudioConfig::from_toml(source).map_err(js_error)?;
        Ok(Self::with_config(config))
    }

    // ---- clips ----

    /// Add interleaved PCM (any layout) as a new clip at the playhead.
    pub fn add_pcm(&mut self, samples: &[f32], channels: usize, sample_rate: u32, name: &str) -> Result<u64, JsValue> {
        let buffer = AudioBuffer::from_interleaved(samples, channels, sample_rate).map_err(js_error)?;
        let source = ClipSource::Uploaded { name: name.to_string() };
        let clip = self.studio.add_external_buffer(buffer, source).map_err(js_error)?;
        Ok(clip.0)
    }

    /// Decode an uploaded WAV/MP3 file and add it at the playhead.
    pub fn import_file(&mut self, bytes: &[u8], name: &str) -> Result<u64, JsValue> {
        let clip = self.studio.import_audio(bytes, name).map_err(js_error)?;
        Ok(clip.0)
    }

    pub fn place_clip(&mut self, clip: u64, row: u32, start: f64) -> Result<f64, JsValue> {
        self.studio.place_clip(ClipId(clip), RowId(row), start).map_err(js_error)
    }

    /// Returns the ids of the two new clips.
    pub fn split_clip(&mut self, clip: u64, at: f64) -> Result<Vec<u64>, JsValue> {
        let (head, tail) = self.studio.split_clip(ClipId(clip), at).map_err(js_error)?;
        Ok(vec![head.0, tail.0])
    }

    pub fn select_clip(&mut self, clip: u64, selected: bool) -> Result<(), JsValue> {
        self.studio.select_clip(ClipId(clip), selected).map_err(js_error)
    }

    pub fn clear_selection(&mut self) {
        self.studio.clear_selection();
    }

    pub fn delete_selected(&mut self) -> Vec<u64> {
        self.studio.delete_selected().into_iter().map(|c| c.0).collect()
    }

    pub fn ripple_delete(&mut self, clip: u64) -> Result<(), JsValue> {
        self.studio.ripple_delete(ClipId(clip)).map_err(js_error)
    }

    pub fn set_clip_gain(&mut self, clip: u64, gain: f32) -> Result<(), JsValue> {
        self.studio.set_clip_gain(ClipId(clip), gain).map_err(js_error)
    }

    /// `effects` is an `EffectState` object (camelCase fields).
    pub fn set_clip_effects(&mut self, clip: u64, effects: JsValue) -> Result<(), JsValue> {
        let effects: EffectState = serde_wasm_bindgen::from_value(effects).map_err(js_error)?;
        self.studio.set_clip_effects(ClipId(clip), effects).map_err(js_error)
    }

    // ---- rows ----

    pub fn duplicate_row(&mut self, row: u32) -> Result<u32, JsValue> {
        Ok(self.studio.duplicate_row(RowId(row)).map_err(js_error)?.0)
    }

    pub fn phase_shift_duplicate(&mut self, row: u32) -> Result<u32, JsValue> {
        Ok(self.studio.phase_shift_duplicate(RowId(row)).map_err(js_error)?.0)
    }

    pub fn delete_row(&mut self, row: u32) -> Result<(), JsValue> {
        self.studio.delete_row(RowId(row)).map_err(js_error)
    }

    pub fn set_row_gain(&mut self, row: u32, gain: f32) -> Result<(), JsValue> {
        self.studio.set_row_gain(RowId(row), gain).map_err(js_error)
    }

    pub fn set_row_mute(&mut self, row: u32, muted: bool) -> Result<(), JsValue> {
        self.studio.set_row_mute(RowId(row), muted).map_err(js_error)
    }

    pub fn set_row_solo(&mut self, row: u32, soloed: bool) -> Result<(), JsValue> {
        self.studio.set_row_solo(RowId(row), soloed).map_err(js_error)
    }

    pub fn undo(&mut self) -> bool {
        self.studio.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.studio.redo()
    }

    // ---- master bus ----

    pub fn set_preamp(&mut self, db: f64) {
        self.studio.set_preamp(db);
    }

    pub fn set_eq_band(&mut self, index: usize, db: f64) {
        self.studio.set_eq_band(index, db);
    }

    /// `preset` is a preset name such as `"telephone"` or `"deepVoice"`.
    pub fn set_eq_preset(&mut self, preset: JsValue, active: bool) -> Result<(), JsValue> {
        let preset: EqPreset = serde_wasm_bindgen::from_value(preset).map_err(js_error)?;
        self.studio.set_eq_preset(preset, active);
        Ok(())
    }

    pub fn set_eq_bypass(&mut self, bypass: bool) {
        self.studio.set_eq_bypass(bypass);
    }

    pub fn reset_equalizer(&mut self) {
        self.studio.reset_equalizer();
    }

    // ---- transport ----

    pub fn play(&mut self) -> Result<bool, JsValue> {
        self.studio.play().map_err(js_error)
    }

    pub fn stop(&mut self) -> Result<bool, JsValue> {
        self.studio.stop().map_err(js_error)
    }

    pub fn seek(&mut self, time: f64) -> Result<(), JsValue> {
        self.studio.seek(time).map_err(js_error)
    }

    pub fn nudge(&mut self, delta: f64) -> Result<(), JsValue> {
        self.studio.nudge(delta).map_err(js_error)
    }

    pub fn scrub(&mut self, time: f64) -> Result<(), JsValue> {
        self.studio.scrub(time).map_err(js_error)
    }

    /// Sample the engine clock; returns the playhead in seconds.
    pub fn tick(&mut self) -> f64 {
        self.studio.tick();
        self.studio.transport().playhead()
    }

    #[wasm_bindgen(getter)]
    pub fn playing(&self) -> bool {
        self.studio.transport().is_playing()
    }

    #[wasm_bindgen(getter)]
    pub fn duration(&self) -> f64 {
        self.studio.duration()
    }

    pub fn set_zoom(&mut self, pixels_per_second: f64) {
        self.studio.set_zoom(pixels_per_second);
    }

    /// Audio callback: fill `out` with interleaved samples.
    pub fn process(&mut self, out: &mut [f32]) {
        self.engine.process(out);
    }

    // ---- export & documents ----

    /// Render the whole project to WAV in one call.
    pub fn export_wav(&self) -> Result<Vec<u8>, JsValue> {
        self.studio.render_wav().map_err(js_error)
    }

    /// Render the project and return an encoder the page steps between
    /// animation frames.
    pub fn begin_export(&self) -> Result<WavExport, JsValue> {
        let config = self.studio.config();
        let buffer = renderer::render_offline(&self.studio.mix_snapshot(), config.render_block_frames, None)
            .map_err(js_error)?;
        Ok(WavExport {
            encoder: Some(WavEncoder::new(buffer, config.export_chunk_frames)),
        })
    }

    /// Project document as a JS object.
    pub fn document(&self, label: &str, namespace: &str) -> Result<JsValue, JsValue> {
        let document = self.studio.to_document(label, namespace);
        serde_wasm_bindgen::to_value(&document).map_err(js_error)
    }

    pub fn load_document(&mut self, document: JsValue) -> Result<(), JsValue> {
        let document: ProjectDocument = serde_wasm_bindgen::from_value(document).map_err(js_error)?;
        self.studio.load_document(&document).map_err(js_error)
    }

    /// Free retired graphs and unreferenced buffers.
    pub fn collect_garbage(&mut self) {
        self.studio.collect_garbage();
    }
}

impl Workstation {
    pub fn with_config(config: StudioConfig) -> Workstation {
        let (studio, engine) = Studio::new(config);
        Workstation { studio, engine }
    }

    pub fn studio(&self) -> &Studio {
        &self.studio
    }
}

/// WASM-exposed chunked WAV encoder.
#[wasm_bindgen]
pub struct WavExport {
    encoder: Option<WavEncoder>,
}

#[wasm_bindgen]
impl WavExport {
    /// Encode one chunk; returns progress in [0, 1].
    pub fn step(&mut self) -> f64 {
        match self.encoder.as_mut().map(WavEncoder::step) {
            Some(EncodeStep::Progress(p)) => p,
            Some(EncodeStep::Finished) | None => 1.0,
        }
    }

    #[wasm_bindgen(getter)]
    pub fn finished(&self) -> bool {
        self.encoder.as_ref().is_none_or(WavEncoder::is_finished)
    }

    /// Take the encoded file. Empty if called twice or before finishing.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        match self.encoder.take() {
            Some(encoder) if encoder.is_finished() => encoder.into_bytes(),
            Some(encoder) => {
                self.encoder = Some(encoder);
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}
