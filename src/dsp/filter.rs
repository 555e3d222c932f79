//! Biquad filter: WebAudio-compatible coefficient formulas.

use std::f64::consts::PI;

/// Filter type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterType {
    Highpass,
    Bandpass,
    Peaking,
    LowShelf,
    HighShelf,
}

/// A biquad IIR filter (2nd order).
///
/// Implements the standard Direct Form II Transposed structure.
/// Coefficient formulas from the Audio EQ Cookbook (Robert Bristow-Johnson).
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    pub filter_type: FilterType,
    pub frequency: f64,
    pub q: f64,
    pub gain_db: f64, // peaking and shelves only

    // Coefficients
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    // State (Direct Form II Transposed)
    z1: f64,
    z2: f64,

    sample_rate: f64,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, sample_rate: f64) -> Self {
        Self::with_params(filter_type, sample_rate, 1000.0, 0.707, 0.0)
    }

    /// Create a filter with all parameters set and coefficients computed.
    pub fn with_params(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        q: f64,
        gain_db: f64,
    ) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            // Keep the centre below Nyquist so low project rates stay stable.
            frequency: frequency.min(sample_rate * 0.45),
            q,
            gain_db,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
        };
        f.update_coefficients();
        f
    }

    /// Recompute filter coefficients from current parameters.
    pub fn update_coefficients(&mut self) {
        let w0 = 2.0 * PI * self.frequency / self.sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * self.q);
        let a_lin = (10.0_f64).powf(self.gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            FilterType::Highpass => {
                let b0 = (1.0 + cos_w0) / 2.0;
                let b1 = -(1.0 + cos_w0);
                let b2 = b0;
                let a0 = 1.0 + alpha;
                let a1 = -2.0 * cos_w0;
                let a2 = 1.0 - alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Bandpass => {
                let b0 = alpha;
                let b1 = 0.0;
                let b2 = -alpha;
                let a0 = 1.0 + alpha;
                let a1 = -2.0 * cos_w0;
                let a2 = 1.0 - alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Peaking => {
                let b0 = 1.0 + alpha * a_lin;
                let b1 = -2.0 * cos_w0;
                let b2 = 1.0 - alpha * a_lin;
                let a0 = 1.0 + alpha / a_lin;
                let a1 = -2.0 * cos_w0;
                let a2 = 1.0 - alpha / a_lin;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::LowShelf => {
                let sqrt_a = 2.0 * a_lin.sqrt() * alpha;
                let b0 = a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_w0 + sqrt_a);
                let b1 = 2.0 * a_lin * ((a_lin - 1.0) - (a_lin + 1.0) * cos_w0);
                let b2 = a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_w0 - sqrt_a);
                let a0 = (a_lin + 1.0) + (a_lin - 1.0) * cos_w0 + sqrt_a;
                let a1 = -2.0 * ((a_lin - 1.0) + (a_lin + 1.0) * cos_w0);
                let a2 = (a_lin + 1.0) + (a_lin - 1.0) * cos_w0 - sqrt_a;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::HighShelf => {
                let sqrt_a = 2.0 * a_lin.sqrt() * alpha;
                let b0 = a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_w0 + sqrt_a);
                let b1 = -2.0 * a_lin * ((a_lin - 1.0) + (a_lin + 1.0) * cos_w0);
                let b2 = a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_w0 - sqrt_a);
                let a0 = (a_lin + 1.0) - (a_lin - 1.0) * cos_w0 + sqrt_a;
                let a1 = 2.0 * ((a_lin - 1.0) - (a_lin + 1.0) * cos_w0);
                let a2 = (a_lin + 1.0) - (a_lin - 1.0) * cos_w0 - sqrt_a;
                (b0, b1, b2, a0, a1, a2)
            }
        };

        // Normalize by a0
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Process a single sample through the filter.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    /// Process an f32 sample; state stays in f64.
    #[inline]
    pub fn process_f32(&mut self, input: f32) -> f32 {
        self.process(input as f64) as f32
    }

    /// Reset filter state.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_peak(f: &mut BiquadFilter, freq: f64, sample_rate: f64) -> f64 {
        let mut max_out = 0.0_f64;
        for i in 0..8820 {
            let t = i as f64 / sample_rate;
            let out = f.process((2.0 * PI * freq * t).sin());
            if i > 4000 {
                // skip transient
                max_out = max_out.max(out.abs());
            }
        }
        max_out
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut f = BiquadFilter::with_params(FilterType::Highpass, 44100.0, 300.0, 0.707, 0.0);

        // Feed DC, should converge to 0
        let mut output = 0.0;
        for _ in 0..5000 {
            output = f.process(1.0);
        }
        assert!(output.abs() < 0.001, "Highpass should block DC, got {output}");
    }

    #[test]
    fn bandpass_passes_centre_attenuates_far() {
        let mut centre = BiquadFilter::with_params(FilterType::Bandpass, 44100.0, 1000.0, 1.0, 0.0);
        let mut far = centre.clone();
        let at_centre = sine_peak(&mut centre, 1000.0, 44100.0);
        let at_far = sine_peak(&mut far, 12000.0, 44100.0);
        assert!((at_centre - 1.0).abs() < 0.05, "centre gain {at_centre}");
        assert!(at_far < 0.2, "far gain {at_far}");
    }

    #[test]
    fn peaking_boosts_by_gain() {
        let mut f = BiquadFilter::with_params(FilterType::Peaking, 44100.0, 1000.0, 1.4, 6.0);
        let peak = sine_peak(&mut f, 1000.0, 44100.0);
        let expected = 10.0_f64.powf(6.0 / 20.0);
        assert!((peak - expected).abs() < 0.05, "expected ~{expected}, got {peak}");
    }

    #[test]
    fn shelves_at_zero_gain_are_transparent() {
        for kind in [FilterType::LowShelf, FilterType::HighShelf, FilterType::Peaking] {
            let mut f = BiquadFilter::with_params(kind, 44100.0, 2000.0, 0.707, 0.0);
            for i in 0..200 {
                let x = ((i * 37) % 100) as f64 / 100.0 - 0.5;
                assert!((f.process(x) - x).abs() < 1e-9, "{kind:?} not transparent");
            }
        }
    }

    #[test]
    fn low_shelf_boosts_dc() {
        let mut f = BiquadFilter::with_params(FilterType::LowShelf, 44100.0, 32.0, 0.707, 12.0);
        let mut output = 0.0;
        for _ in 0..200_000 {
            output = f.process(1.0);
        }
        let expected = 10.0_f64.powf(12.0 / 20.0);
        assert!((output - expected).abs() < 0.01, "expected {expected}, got {output}");
    }

    #[test]
    fn frequency_clamped_below_nyquist() {
        let mut f = BiquadFilter::with_params(FilterType::HighShelf, 8000.0, 16000.0, 0.707, 6.0);
        assert!(f.frequency < 4000.0);
        for i in 0..10000 {
            let input = if i % 100 == 0 { 1.0 } else { 0.0 };
            assert!(f.process(input).is_finite(), "Filter output not finite at sample {i}");
        }
    }
}
