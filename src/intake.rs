//! Upload intake: decode user audio into the project's canonical layout.
//!
//! WAV goes through hound (integer 8/16/24/32-bit and 32-bit float), anything
//! else is treated as MP3 and handed to minimp3. The decoded channels are
//! then mixed to the project channel count and resampled to the project rate.

use std::io::Cursor;

use crate::buffer::AudioBuffer;
use crate::config::StudioConfig;
use crate::error::DecodeError;

/// Decoded audio before layout conversion. Planar.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Decode an uploaded file and convert it to the project layout.
pub fn decode_audio(bytes: &[u8], config: &StudioConfig) -> Result<AudioBuffer, DecodeError> {
    let decoded = decode_container(bytes)?;
    log::info!(
        "decoded upload: {} ch, {} Hz, {} frames",
        decoded.channels.len(),
        decoded.sample_rate,
        decoded.frames()
    );
    conform(decoded, config)
}

/// Decode a file in its native layout.
pub fn decode_container(bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    if is_wav(bytes) {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

/// Mix and resample decoded audio to the project layout.
pub fn conform(decoded: DecodedAudio, config: &StudioConfig) -> Result<AudioBuffer, DecodeError> {
    if decoded.channels.is_empty() || decoded.sample_rate == 0 {
        return Err(DecodeError::InvalidLayout {
            channels: decoded.channels.len(),
            sample_rate: decoded.sample_rate,
        });
    }
    if decoded.frames() == 0 {
        return Err(DecodeError::Empty);
    }

    let mixed = remix(decoded.channels, config.channels);
    let resampled: Vec<Vec<f32>> = if decoded.sample_rate == config.sample_rate {
        mixed
    } else {
        mixed
            .iter()
            .map(|ch| resample_linear(ch, decoded.sample_rate, config.sample_rate))
            .collect()
    };

    AudioBuffer::from_planar(resampled, config.sample_rate).map_err(|_| DecodeError::InvalidLayout {
        channels: config.channels,
        sample_rate: config.sample_rate,
    })
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channel_count = spec.channels as usize;

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => {
            reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?
        }
        (hound::SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = 1.0 / (1_i64 << (bits - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| (v as f64 * scale) as f32))
                .collect::<Result<Vec<_>, _>>()?
        }
        (hound::SampleFormat::Float, bits) => {
            return Err(DecodeError::UnsupportedSampleFormat { bits, kind: "float" });
        }
        (hound::SampleFormat::Int, bits) => {
            return Err(DecodeError::UnsupportedSampleFormat { bits, kind: "integer" });
        }
    };

    Ok(DecodedAudio {
        channels: deinterleave(&samples, channel_count),
        sample_rate: spec.sample_rate,
    })
}

fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut interleaved: Vec<f32> = Vec::new();
    let mut layout: Option<(usize, u32)> = None;

    loop {
        let frame = match decoder.next_frame() {
            Ok(frame) => frame,
            Err(minimp3::Error::Eof | minimp3::Error::InsufficientData) => break,
            Err(minimp3::Error::SkippedData) => {
                log::warn!("skipping non-audio data in MP3 stream");
                continue;
            }
            Err(e) => return Err(DecodeError::Mp3(format!("{e:?}"))),
        };

        let frame_layout = (frame.channels, frame.sample_rate.max(0) as u32);
        match layout {
            None => layout = Some(frame_layout),
            Some(existing) if existing != frame_layout => {
                return Err(DecodeError::InvalidLayout {
                    channels: frame_layout.0,
                    sample_rate: frame_layout.1,
                });
            }
            Some(_) => {}
        }
        interleaved.extend(frame.data.iter().map(|&s| s as f32 / 32768.0));
    }

    // No MPEG frame at all means this was never an MP3.
    let (channel_count, sample_rate) = layout.ok_or(DecodeError::UnsupportedFormat)?;
    Ok(DecodedAudio {
        channels: deinterleave(&interleaved, channel_count),
        sample_rate,
    })
}

fn deinterleave(samples: &[f32], channel_count: usize) -> Vec<Vec<f32>> {
    if channel_count == 0 {
        return Vec::new();
    }
    let frames = samples.len() / channel_count;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in samples.chunks_exact(channel_count) {
        for (ch, &s) in frame.iter().enumerate() {
            channels[ch].push(s);
        }
    }
    channels
}

/// Mix `source` down or up to `target` channels.
///
/// Downmixing averages every source channel `s` into output `s % target`;
/// upmixing repeats the source channels cyclically.
fn remix(source: Vec<Vec<f32>>, target: usize) -> Vec<Vec<f32>> {
    let target = target.max(1);
    let count = source.len();
    if count == target {
        return source;
    }
    if count < target {
        return (0..target).map(|t| source[t % count].clone()).collect();
    }

    let frames = source.first().map_or(0, Vec::len);
    (0..target)
        .map(|t| {
            let members: Vec<&Vec<f32>> = source.iter().skip(t).step_by(target).collect();
            let norm = 1.0 / members.len() as f32;
            (0..frames)
                .map(|i| members.iter().map(|ch| ch[i]).sum::<f32>() * norm)
                .collect()
        })
        .collect()
}

/// Linear-interpolation resampler.
fn resample_linear(data: &[f32], from: u32, to: u32) -> Vec<f32> {
    if data.is_empty() || from == to {
        return data.to_vec();
    }
    let ratio = from as f64 / to as f64;
    let out_len = ((data.len() as f64 / ratio).round() as usize).max(1);
    let last = data.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let idx = position as usize;
            if idx >= last {
                return data[last];
            }
            let frac = (position - idx as f64) as f32;
            data[idx] * (1.0 - frac) + data[idx + 1] * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<Cursor<&mut Vec<u8>>>)) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        bytes
    }

    fn int_spec(channels: u16, sample_rate: u32, bits: u16) -> hound::WavSpec {
        hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        }
    }

    #[test]
    fn decodes_16_bit_stereo_at_project_rate() {
        let bytes = wav_bytes(int_spec(2, 44100, 16), |w| {
            for _ in 0..100 {
                w.write_sample(16384_i16).unwrap();
                w.write_sample(-16384_i16).unwrap();
            }
        });
        let buffer = decode_audio(&bytes, &StudioConfig::default()).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.sample_rate(), 44100);
        assert_eq!(buffer.frames(), 100);
        assert_eq!(buffer.sample(0, 10), 0.5);
        assert_eq!(buffer.sample(1, 10), -0.5);
    }

    #[test]
    fn mono_24_bit_is_upmixed() {
        let bytes = wav_bytes(int_spec(1, 48000, 24), |w| {
            for _ in 0..480 {
                w.write_sample(1_i32 << 22).unwrap();
            }
        });
        let buffer = decode_audio(&bytes, &StudioConfig::with_layout(48000, 2)).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 480);
        assert_eq!(buffer.channel(0), buffer.channel(1));
        assert_eq!(buffer.sample(1, 0), 0.5);
    }

    #[test]
    fn float_stereo_is_downmixed_and_resampled() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let bytes = wav_bytes(spec, |w| {
            for _ in 0..1000 {
                w.write_sample(0.25_f32).unwrap();
                w.write_sample(0.75_f32).unwrap();
            }
        });
        let buffer = decode_audio(&bytes, &StudioConfig::with_layout(44100, 1)).unwrap();
        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.frames(), 2000);
        assert!(buffer.channel(0).iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!((buffer.duration() - 1000.0 / 22050.0).abs() < 1e-9);
    }

    #[test]
    fn eight_bit_is_supported() {
        let bytes = wav_bytes(int_spec(1, 8000, 8), |w| {
            for _ in 0..10 {
                w.write_sample(-64_i8).unwrap();
            }
        });
        let buffer = decode_audio(&bytes, &StudioConfig::with_layout(8000, 1)).unwrap();
        assert_eq!(buffer.sample(0, 3), -0.5);
    }

    #[test]
    fn empty_wav_is_rejected() {
        let bytes = wav_bytes(int_spec(1, 8000, 16), |_| {});
        assert!(matches!(
            decode_audio(&bytes, &StudioConfig::default()),
            Err(DecodeError::Empty)
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let bytes = b"definitely not an audio file, just some text bytes".to_vec();
        assert!(matches!(
            decode_audio(&bytes, &StudioConfig::default()),
            Err(DecodeError::UnsupportedFormat)
        ));
    }

    #[test]
    fn truncated_wav_is_malformed() {
        let mut bytes = wav_bytes(int_spec(1, 8000, 16), |w| {
            for _ in 0..10 {
                w.write_sample(0_i16).unwrap();
            }
        });
        bytes.truncate(20);
        assert!(matches!(
            decode_audio(&bytes, &StudioConfig::default()),
            Err(DecodeError::Wav(_))
        ));
    }

    #[test]
    fn resampler_interpolates_linearly() {
        let up = resample_linear(&[0.0, 1.0, 0.0], 1, 2);
        assert_eq!(up, vec![0.0, 0.5, 1.0, 0.5, 0.0, 0.0]);
        let down = resample_linear(&[0.0, 1.0, 2.0, 3.0], 2, 1);
        assert_eq!(down, vec![0.0, 2.0]);
    }

    #[test]
    fn remix_folds_surround_channels() {
        let source = vec![vec![1.0], vec![0.0], vec![0.5], vec![0.5]];
        let stereo = remix(source, 2);
        assert_eq!(stereo, vec![vec![0.75], vec![0.25]]);
    }
}
