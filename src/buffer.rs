//! Immutable PCM buffers and the registry that owns them.
//!
//! Buffers are never mutated after creation. Clips and history snapshots
//! share them through `Arc`, so rewinding history only copies metadata.
//! A split produces two fresh buffers from disjoint frame ranges.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::InvalidOperation;

/// Identifier of a buffer inside a [`BufferStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

fn next_buffer_id() -> BufferId {
    BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
}

/// A block of planar f32 PCM at a fixed sample rate.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    id: BufferId,
    sample_rate: u32,
    /// One `Vec` per channel, all of equal length.
    channels: Vec<Vec<f32>>,
}

/// Shared handle used by clips, snapshots and the render graph.
pub type SharedBuffer = Arc<AudioBuffer>;

impl AudioBuffer {
    /// Build from planar channel data. All channels must have the same length.
    pub fn from_planar(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, InvalidOperation> {
        let frames = channels.first().map_or(0, Vec::len);
        if channels.is_empty() || sample_rate == 0 || channels.iter().any(|c| c.len() != frames) {
            return Err(InvalidOperation::LayoutMismatch {
                channels: channels.len(),
                sample_rate,
            });
        }
        Ok(AudioBuffer {
            id: next_buffer_id(),
            sample_rate,
            channels,
        })
    }

    /// Build from interleaved samples.
    pub fn from_interleaved(
        samples: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self, InvalidOperation> {
        if channel_count == 0 {
            return Err(InvalidOperation::LayoutMismatch {
                channels: 0,
                sample_rate,
            });
        }
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (ch, &s) in frame.iter().enumerate() {
                channels[ch].push(s);
            }
        }
        Self::from_planar(channels, sample_rate)
    }

    /// Silent buffer of `frames` frames.
    pub fn silence(frames: usize, channel_count: usize, sample_rate: u32) -> Result<Self, InvalidOperation> {
        Self::from_planar(vec![vec![0.0; frames]; channel_count], sample_rate)
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Read one sample, zero outside the buffer.
    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.channels
            .get(channel)
            .and_then(|c| c.get(frame))
            .copied()
            .unwrap_or(0.0)
    }

    /// Interleave all channels into one vector.
    pub fn to_interleaved(&self) -> Vec<f32> {
        let channel_count = self.channel_count();
        let mut out = Vec::with_capacity(self.frames() * channel_count);
        for frame in 0..self.frames() {
            for ch in 0..channel_count {
                out.push(self.channels[ch][frame]);
            }
        }
        out
    }

    /// Copy out two new buffers covering `[0, frame)` and `[frame, len)`.
    ///
    /// `frame` must lie strictly inside the buffer so neither half is empty.
    pub fn split_at(&self, frame: usize) -> Result<(AudioBuffer, AudioBuffer), InvalidOperation> {
        if frame == 0 || frame >= self.frames() {
            return Err(InvalidOperation::EmptyBuffer);
        }
        let head = self.channels.iter().map(|c| c[..frame].to_vec()).collect();
        let tail = self.channels.iter().map(|c| c[frame..].to_vec()).collect();
        Ok((
            Self::from_planar(head, self.sample_rate)?,
            Self::from_planar(tail, self.sample_rate)?,
        ))
    }

    /// True when both buffers hold identical samples and layout.
    pub fn same_samples(&self, other: &AudioBuffer) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }
}

/// Metadata about a stored buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferInfo {
    pub id: BufferId,
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
    pub duration: f64,
}

/// Registry of every buffer the project knows about.
///
/// The store holds one strong reference per buffer; clips and snapshots
/// hold the others. [`BufferStore::collect`] drops entries that only the
/// store still references.
#[derive(Debug, Default)]
pub struct BufferStore {
    buffers: HashMap<BufferId, SharedBuffer>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer and return the shared handle.
    pub fn insert(&mut self, buffer: AudioBuffer) -> SharedBuffer {
        let shared = Arc::new(buffer);
        self.buffers.insert(shared.id(), Arc::clone(&shared));
        shared
    }

    pub fn get(&self, id: BufferId) -> Option<SharedBuffer> {
        self.buffers.get(&id).cloned()
    }

    pub fn info(&self, id: BufferId) -> Option<BufferInfo> {
        self.buffers.get(&id).map(|b| BufferInfo {
            id,
            sample_rate: b.sample_rate(),
            channels: b.channel_count(),
            frames: b.frames(),
            duration: b.duration(),
        })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Free buffers that nothing but the store references. Returns the count.
    pub fn collect(&mut self) -> usize {
        let before = self.buffers.len();
        self.buffers.retain(|_, b| Arc::strong_count(b) > 1);
        let freed = before - self.buffers.len();
        if freed > 0 {
            log::debug!("buffer store freed {freed} unreferenced buffers");
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> AudioBuffer {
        let left: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        AudioBuffer::from_planar(vec![left, right], 1000).unwrap()
    }

    #[test]
    fn interleaved_layout_round_trips() {
        let buf = AudioBuffer::from_interleaved(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3], 2, 8000).unwrap();
        assert_eq!(buf.frames(), 3);
        assert_eq!(buf.channel(1), &[-0.1, -0.2, -0.3]);
        assert_eq!(buf.to_interleaved(), vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);
    }

    #[test]
    fn mismatched_channel_lengths_rejected() {
        let result = AudioBuffer::from_planar(vec![vec![0.0; 4], vec![0.0; 3]], 44100);
        assert!(result.is_err());
    }

    #[test]
    fn split_halves_concatenate_to_original() {
        let buf = ramp(1000);
        let (head, tail) = buf.split_at(377).unwrap();
        assert_eq!(head.frames() + tail.frames(), buf.frames());
        for ch in 0..buf.channel_count() {
            let mut joined = head.channel(ch).to_vec();
            joined.extend_from_slice(tail.channel(ch));
            assert_eq!(joined.as_slice(), buf.channel(ch));
        }
        assert_ne!(head.id(), buf.id());
        assert_ne!(tail.id(), head.id());
    }

    #[test]
    fn split_at_edges_rejected() {
        let buf = ramp(10);
        assert!(buf.split_at(0).is_err());
        assert!(buf.split_at(10).is_err());
    }

    #[test]
    fn store_collects_unreferenced_buffers() {
        let mut store = BufferStore::new();
        let kept = store.insert(ramp(10));
        let dropped = store.insert(ramp(10));
        let dropped_id = dropped.id();
        drop(dropped);

        assert_eq!(store.collect(), 1);
        assert!(store.get(dropped_id).is_none());
        assert!(store.get(kept.id()).is_some());
        assert_eq!(store.info(kept.id()).unwrap().frames, 10);
    }
}
