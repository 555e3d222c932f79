//! Delay effect: multichannel delay line with feedback and mix control.

/// A feedback delay with configurable time, feedback, and dry/wet mix.
///
/// One circular buffer per channel, sized exactly for the delay time.
#[derive(Debug, Clone)]
pub struct Delay {
    buffers: Vec<Vec<f32>>,
    write_pos: usize,
    delay_samples: usize,

    /// Feedback amount (0.0 = no feedback, 0.99 = near-infinite).
    pub feedback: f32,
    /// Dry/wet mix (0.0 = fully dry, 1.0 = fully wet).
    pub mix: f32,
}

impl Delay {
    /// Create a delay with specific parameters.
    ///
    /// # Arguments
    /// - `sample_rate`: Audio sample rate in Hz.
    /// - `channels`: Number of independent delay lines.
    /// - `delay_time`: Delay in seconds.
    pub fn with_params(sample_rate: f64, channels: usize, delay_time: f64, feedback: f64, mix: f64) -> Self {
        let delay_samples = ((delay_time.max(0.0) * sample_rate) as usize).max(1);
        Self {
            buffers: vec![vec![0.0; delay_samples + 1]; channels],
            write_pos: 0,
            delay_samples,
            feedback: feedback.clamp(0.0, 0.99) as f32,
            mix: mix.clamp(0.0, 1.0) as f32,
        }
    }

    /// Delay length in samples.
    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    /// Process one interleaved frame in place.
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        let buffer_len = self.delay_samples + 1;
        let read_pos = (self.write_pos + buffer_len - self.delay_samples) % buffer_len;
        let wet = self.mix;
        let dry = 1.0 - wet;

        for (sample, line) in frame.iter_mut().zip(self.buffers.iter_mut()) {
            let delayed = line[read_pos];
            line[self.write_pos] = *sample + delayed * self.feedback;
            *sample = *sample * dry + delayed * wet;
        }

        self.write_pos = (self.write_pos + 1) % buffer_len;
    }

    /// Clear the delay buffers.
    pub fn clear(&mut self) {
        for line in &mut self.buffers {
            line.fill(0.0);
        }
        self.write_pos = 0;
    }
}
