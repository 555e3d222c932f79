//! Per-clip effect chain.
//!
//! Four optional stages in a fixed order: band mask → resonant echo →
//! texture → room. [`EffectChain::build`] is the only way to turn an
//! [`EffectState`] into processing stages, and both the realtime engine and
//! the offline renderer go through it, so the two paths always run the same
//! topology.

use serde::{Deserialize, Serialize};

use super::delay::Delay;
use super::filter::{BiquadFilter, FilterType};

/// Band mask centre frequency range in Hz.
pub const MASK_FREQUENCY_MIN: f64 = 500.0;
pub const MASK_FREQUENCY_MAX: f64 = 4000.0;

const MASK_Q: f64 = 1.0;
const ECHO_TIME: f64 = 0.005;
const ECHO_FEEDBACK: f64 = 0.45;
const ECHO_MIX: f64 = 0.5;
const TEXTURE_HIGHPASS_HZ: f64 = 300.0;
const ROOM_TIME: f64 = 0.150;
const ROOM_FEEDBACK: f64 = 0.35;

/// Band mask centre frequency, always within 500–4000 Hz.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct MaskFrequency(f64);

impl MaskFrequency {
    pub fn hz(self) -> f64 {
        self.0
    }
}

impl Default for MaskFrequency {
    fn default() -> Self {
        MaskFrequency(1500.0)
    }
}

impl From<f64> for MaskFrequency {
    fn from(hz: f64) -> Self {
        if hz.is_nan() {
            return Self::default();
        }
        MaskFrequency(hz.clamp(MASK_FREQUENCY_MIN, MASK_FREQUENCY_MAX))
    }
}

impl From<MaskFrequency> for f64 {
    fn from(f: MaskFrequency) -> Self {
        f.0
    }
}

/// A continuous control in 0–1 (drive amount, wet mix).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct UnitParam(f64);

impl UnitParam {
    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for UnitParam {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            return UnitParam(0.0);
        }
        UnitParam(v.clamp(0.0, 1.0))
    }
}

impl From<UnitParam> for f64 {
    fn from(p: UnitParam) -> Self {
        p.0
    }
}

/// The four per-clip effects, each with an on/off switch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectState {
    /// Band-pass character filter.
    pub band_mask: bool,
    pub mask_frequency: MaskFrequency,
    /// ~5 ms metallic feedback doubling.
    pub resonant_echo: bool,
    /// High-passed drive shaping.
    pub texture: bool,
    pub texture_drive: UnitParam,
    /// ~150 ms feedback delay blended with dry.
    pub room: bool,
    pub room_mix: UnitParam,
}

impl Default for EffectState {
    fn default() -> Self {
        EffectState {
            band_mask: false,
            mask_frequency: MaskFrequency::default(),
            resonant_echo: false,
            texture: false,
            texture_drive: UnitParam(0.5),
            room: false,
            room_mix: UnitParam(0.3),
        }
    }
}

impl EffectState {
    /// True when no stage is enabled.
    pub fn is_dry(&self) -> bool {
        !(self.band_mask || self.resonant_echo || self.texture || self.room)
    }
}

/// Identifies a stage in a built chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    BandMask,
    ResonantEcho,
    Texture,
    Room,
}

#[derive(Debug, Clone)]
enum Stage {
    BandMask(Vec<BiquadFilter>),
    ResonantEcho(Delay),
    Texture {
        highpass: Vec<BiquadFilter>,
        drive: f32,
        norm: f32,
    },
    Room(Delay),
}

impl Stage {
    fn kind(&self) -> StageKind {
        match self {
            Stage::BandMask(_) => StageKind::BandMask,
            Stage::ResonantEcho(_) => StageKind::ResonantEcho,
            Stage::Texture { .. } => StageKind::Texture,
            Stage::Room(_) => StageKind::Room,
        }
    }

    #[inline]
    fn process_frame(&mut self, frame: &mut [f32]) {
        match self {
            Stage::BandMask(filters) => {
                for (sample, f) in frame.iter_mut().zip(filters.iter_mut()) {
                    *sample = f.process_f32(*sample);
                }
            }
            Stage::ResonantEcho(delay) | Stage::Room(delay) => delay.process_frame(frame),
            Stage::Texture { highpass, drive, norm } => {
                for (sample, f) in frame.iter_mut().zip(highpass.iter_mut()) {
                    let filtered = f.process_f32(*sample);
                    *sample = (filtered * *drive).tanh() * *norm;
                }
            }
        }
    }
}

/// A built, stateful chain of stages for one clip.
#[derive(Debug, Clone)]
pub struct EffectChain {
    stages: Vec<Stage>,
    tail_frames: usize,
}

/// Time for a feedback delay to decay below -60 dB.
fn feedback_tail(delay_time: f64, feedback: f64) -> f64 {
    let repeats = (0.001_f64).ln() / feedback.ln();
    delay_time * (repeats.ceil() + 1.0)
}

impl EffectChain {
    /// Map an effect state onto processing stages in the fixed order.
    pub fn build(state: &EffectState, sample_rate: f64, channels: usize) -> Self {
        let mut stages = Vec::with_capacity(4);
        let mut tail_seconds = 0.0;

        if state.band_mask {
            let filter = BiquadFilter::with_params(
                FilterType::Bandpass,
                sample_rate,
                state.mask_frequency.hz(),
                MASK_Q,
                0.0,
            );
            stages.push(Stage::BandMask(vec![filter; channels]));
        }

        if state.resonant_echo {
            stages.push(Stage::ResonantEcho(Delay::with_params(
                sample_rate,
                channels,
                ECHO_TIME,
                ECHO_FEEDBACK,
                ECHO_MIX,
            )));
            tail_seconds += feedback_tail(ECHO_TIME, ECHO_FEEDBACK);
        }

        if state.texture {
            let highpass = BiquadFilter::with_params(
                FilterType::Highpass,
                sample_rate,
                TEXTURE_HIGHPASS_HZ,
                0.707,
                0.0,
            );
            let drive = 1.0 + 9.0 * state.texture_drive.value() as f32;
            stages.push(Stage::Texture {
                highpass: vec![highpass; channels],
                drive,
                norm: 1.0 / drive.tanh(),
            });
        }

        if state.room {
            stages.push(Stage::Room(Delay::with_params(
                sample_rate,
                channels,
                ROOM_TIME,
                ROOM_FEEDBACK,
                state.room_mix.value(),
            )));
            tail_seconds += feedback_tail(ROOM_TIME, ROOM_FEEDBACK);
        }

        EffectChain {
            stages,
            tail_frames: (tail_seconds * sample_rate).ceil() as usize,
        }
    }

    /// The stage order of this chain.
    pub fn topology(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    /// True when the chain has no stages.
    pub fn is_passthrough(&self) -> bool {
        self.stages.is_empty()
    }

    /// Frames the chain keeps ringing after its input ends.
    pub fn tail_frames(&self) -> usize {
        self.tail_frames
    }

    /// Run one interleaved frame through every stage in order.
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        for stage in &mut self.stages {
            stage.process_frame(frame);
        }
    }
}
