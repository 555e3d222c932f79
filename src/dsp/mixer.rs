//! Mixer: sums row outputs into one bus frame.

/// Whether a row reaches the master bus. When any row is soloed only
/// soloed rows contribute; muted rows never do.
pub fn row_is_audible(muted: bool, soloed: bool, any_solo: bool) -> bool {
    !muted && (!any_solo || soloed)
}

/// A summing accumulator for one interleaved frame.
#[derive(Debug, Clone)]
pub struct Mixer {
    buffer: Vec<f32>,
}

impl Mixer {
    pub fn new(channels: usize) -> Self {
        Mixer {
            buffer: vec![0.0; channels],
        }
    }

    /// Zero the accumulator.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
    }

    /// Add a frame scaled by `gain`.
    #[inline]
    pub fn add(&mut self, frame: &[f32], gain: f32) {
        for (acc, &s) in self.buffer.iter_mut().zip(frame) {
            *acc += s * gain;
        }
    }

    /// The mixed frame.
    pub fn output(&self) -> &[f32] {
        &self.buffer
    }

    pub fn output_mut(&mut self) -> &mut [f32] {
        &mut self.buffer
    }

    pub fn channels(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame() {
        let mut m = Mixer::new(2);
        m.clear();
        assert_eq!(m.output(), &[0.0, 0.0]);
    }

    #[test]
    fn accumulates_scaled_frames() {
        let mut m = Mixer::new(2);
        m.add(&[0.5, 0.25], 1.0);
        m.add(&[0.5, 0.25], 0.5);
        assert!((m.output()[0] - 0.75).abs() < 1e-7);
        assert!((m.output()[1] - 0.375).abs() < 1e-7);
        m.clear();
        assert_eq!(m.output(), &[0.0, 0.0]);
    }

    #[test]
    fn solo_and_mute_rules() {
        assert!(row_is_audible(false, false, false));
        assert!(!row_is_audible(true, false, false));
        assert!(!row_is_audible(false, false, true));
        assert!(row_is_audible(false, true, true));
        assert!(!row_is_audible(true, true, true));
    }
}
