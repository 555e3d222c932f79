//! Master equalizer: preamp, ten bands, additive presets, bypass.
//!
//! [`MasterEqualizer`] is the editable state; [`MasterChain`] is the
//! processing built from a frozen copy of it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::filter::{BiquadFilter, FilterType};

/// Band centre frequencies in Hz, ascending.
pub const EQ_BANDS: [f64; 10] = [
    32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Limit for preamp and band gains in dB.
pub const EQ_LIMIT_DB: f64 = 12.0;

const BAND_Q: f64 = 1.4;
const SHELF_Q: f64 = 0.707;

fn clamp_db(db: f64) -> f64 {
    if db.is_nan() {
        return 0.0;
    }
    db.clamp(-EQ_LIMIT_DB, EQ_LIMIT_DB)
}

/// Named equalizer presets. Active presets add their curve to the
/// manual bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EqPreset {
    /// Presence lift for intelligibility.
    Clarity,
    /// Heavy low end, rolled-off top.
    DeepVoice,
    /// Narrow mid band, no lows or highs.
    Radio,
    /// Extreme band-limiting.
    Telephone,
    /// Sub and bass lift.
    BassBoost,
    /// Air and sparkle.
    Bright,
}

impl EqPreset {
    pub const ALL: [EqPreset; 6] = [
        EqPreset::Clarity,
        EqPreset::DeepVoice,
        EqPreset::Radio,
        EqPreset::Telephone,
        EqPreset::BassBoost,
        EqPreset::Bright,
    ];

    /// Gain curve in dB, one value per band.
    pub fn gains(self) -> [f64; 10] {
        match self {
            EqPreset::Clarity => [-2.0, -2.0, -1.0, 0.0, 0.0, 1.0, 3.0, 4.0, 2.0, 1.0],
            EqPreset::DeepVoice => [4.0, 5.0, 4.0, 2.0, 0.0, -1.0, -2.0, -3.0, -4.0, -5.0],
            EqPreset::Radio => [-12.0, -10.0, -6.0, -2.0, 2.0, 4.0, 3.0, -2.0, -8.0, -12.0],
            EqPreset::Telephone => [-12.0, -12.0, -12.0, -6.0, 3.0, 6.0, 3.0, -6.0, -12.0, -12.0],
            EqPreset::BassBoost => [6.0, 5.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            EqPreset::Bright => [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 3.0, 5.0, 6.0],
        }
    }
}

/// Project-wide master equalizer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterEqualizer {
    preamp_db: f64,
    bands: [f64; 10],
    presets: BTreeSet<EqPreset>,
    bypass: bool,
}

impl Default for MasterEqualizer {
    fn default() -> Self {
        MasterEqualizer {
            preamp_db: 0.0,
            bands: [0.0; 10],
            presets: BTreeSet::new(),
            bypass: false,
        }
    }
}

impl MasterEqualizer {
    pub fn preamp_db(&self) -> f64 {
        self.preamp_db
    }

    pub fn bands(&self) -> &[f64; 10] {
        &self.bands
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn active_presets(&self) -> impl Iterator<Item = EqPreset> + '_ {
        self.presets.iter().copied()
    }

    /// Set the preamp. The change is applied to every manual band as well,
    /// then each band is clamped back into range.
    pub fn set_preamp(&mut self, db: f64) {
        let target = clamp_db(db);
        let delta = target - self.preamp_db;
        self.preamp_db = target;
        for band in &mut self.bands {
            *band = clamp_db(*band + delta);
        }
    }

    /// Set one manual band gain. Out-of-range indexes are ignored.
    pub fn set_band(&mut self, index: usize, db: f64) {
        if let Some(band) = self.bands.get_mut(index) {
            *band = clamp_db(db);
        }
    }

    pub fn set_preset(&mut self, preset: EqPreset, active: bool) {
        if active {
            self.presets.insert(preset);
        } else {
            self.presets.remove(&preset);
        }
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    /// Reset everything except bypass.
    pub fn reset(&mut self) {
        let bypass = self.bypass;
        *self = MasterEqualizer {
            bypass,
            ..MasterEqualizer::default()
        };
    }

    /// Manual gain plus every active preset, re-clamped to ±12 dB.
    pub fn effective_gain(&self, index: usize) -> f64 {
        let preset_sum: f64 = self.presets.iter().map(|p| p.gains()[index]).sum();
        clamp_db(self.bands[index] + preset_sum)
    }

    pub fn effective_gains(&self) -> [f64; 10] {
        std::array::from_fn(|i| self.effective_gain(i))
    }

    /// Repair values that bypassed the setters (e.g. a hand-edited document).
    pub(crate) fn sanitize(&mut self) {
        self.preamp_db = clamp_db(self.preamp_db);
        for band in &mut self.bands {
            *band = clamp_db(*band);
        }
    }
}

/// Post-sum processing built from a frozen equalizer state.
#[derive(Debug, Clone)]
pub enum MasterChain {
    /// Literal passthrough: samples are not touched.
    Bypass,
    Active {
        /// Linear preamp; `None` at 0 dB.
        preamp: Option<f32>,
        /// One filter set (per channel) for each non-zero band, ascending.
        stages: Vec<Vec<BiquadFilter>>,
    },
}

impl MasterChain {
    pub fn build(eq: &MasterEqualizer, sample_rate: f64, channels: usize) -> Self {
        if eq.is_bypassed() {
            return MasterChain::Bypass;
        }

        let preamp = (eq.preamp_db() != 0.0).then(|| 10.0_f64.powf(eq.preamp_db() / 20.0) as f32);

        let stages = eq
            .effective_gains()
            .iter()
            .enumerate()
            .filter(|(_, gain)| **gain != 0.0)
            .map(|(i, &gain)| {
                let (kind, q) = match i {
                    0 => (FilterType::LowShelf, SHELF_Q),
                    9 => (FilterType::HighShelf, SHELF_Q),
                    _ => (FilterType::Peaking, BAND_Q),
                };
                let filter = BiquadFilter::with_params(kind, sample_rate, EQ_BANDS[i], q, gain);
                vec![filter; channels]
            })
            .collect();

        MasterChain::Active { preamp, stages }
    }

    /// Number of filter stages (0 when bypassed).
    pub fn stage_count(&self) -> usize {
        match self {
            MasterChain::Bypass => 0,
            MasterChain::Active { stages, .. } => stages.len(),
        }
    }

    /// Process one interleaved frame in place.
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        let MasterChain::Active { preamp, stages } = self else {
            return;
        };
        if let Some(gain) = preamp {
            for sample in frame.iter_mut() {
                *sample *= *gain;
            }
        }
        for stage in stages.iter_mut() {
            for (sample, f) in frame.iter_mut().zip(stage.iter_mut()) {
                *sample = f.process_f32(*sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamp_shifts_bands_and_clamps() {
        let mut eq = MasterEqualizer::default();
        eq.set_band(0, 10.0);
        eq.set_band(1, -4.0);
        eq.set_preamp(5.0);
        assert_eq!(eq.preamp_db(), 5.0);
        assert_eq!(eq.bands()[0], 12.0);
        assert_eq!(eq.bands()[1], 1.0);
        assert_eq!(eq.bands()[2], 5.0);

        eq.set_preamp(-30.0);
        assert_eq!(eq.preamp_db(), -12.0);
        // delta = -17
        assert_eq!(eq.bands()[1], -12.0);
    }

    #[test]
    fn band_gain_clamped() {
        let mut eq = MasterEqualizer::default();
        eq.set_band(3, 40.0);
        eq.set_band(4, -40.0);
        eq.set_band(99, 3.0);
        assert_eq!(eq.bands()[3], EQ_LIMIT_DB);
        assert_eq!(eq.bands()[4], -EQ_LIMIT_DB);
    }

    #[test]
    fn presets_sum_additively_then_reclamp() {
        let mut eq = MasterEqualizer::default();
        eq.set_band(0, 3.0);
        eq.set_preset(EqPreset::BassBoost, true);
        assert_eq!(eq.effective_gain(0), 9.0);

        eq.set_preset(EqPreset::DeepVoice, true);
        // 3 + 6 + 4 = 13 → 12
        assert_eq!(eq.effective_gain(0), 12.0);

        eq.set_preset(EqPreset::BassBoost, false);
        assert_eq!(eq.effective_gain(0), 7.0);
    }

    #[test]
    fn bypass_builds_literal_passthrough() {
        let mut eq = MasterEqualizer::default();
        eq.set_preamp(6.0);
        eq.set_preset(EqPreset::Radio, true);
        eq.set_bypass(true);
        let mut chain = MasterChain::build(&eq, 44100.0, 2);
        assert!(matches!(chain, MasterChain::Bypass));
        let mut frame = [0.3, -0.7];
        chain.process_frame(&mut frame);
        assert_eq!(frame, [0.3, -0.7]);
    }

    #[test]
    fn only_nonzero_bands_become_stages() {
        let mut eq = MasterEqualizer::default();
        eq.set_band(2, 3.0);
        eq.set_band(7, -2.0);
        let chain = MasterChain::build(&eq, 44100.0, 2);
        assert_eq!(chain.stage_count(), 2);
        let flat = MasterChain::build(&MasterEqualizer::default(), 44100.0, 2);
        assert_eq!(flat.stage_count(), 0);
    }

    #[test]
    fn preamp_applies_linear_gain() {
        let mut eq = MasterEqualizer::default();
        eq.set_preamp(-6.0);
        // Preamp also pulled the bands down; zero them to isolate the preamp.
        for i in 0..10 {
            eq.set_band(i, 0.0);
        }
        let mut chain = MasterChain::build(&eq, 44100.0, 1);
        let mut frame = [1.0];
        chain.process_frame(&mut frame);
        assert!((frame[0] - 0.501).abs() < 0.001, "got {}", frame[0]);
    }

    #[test]
    fn serde_round_trip_keeps_presets() {
        let mut eq = MasterEqualizer::default();
        eq.set_preset(EqPreset::Clarity, true);
        eq.set_band(5, 2.5);
        let json = serde_json::to_string(&eq).unwrap();
        let back: MasterEqualizer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, eq);
    }
}
