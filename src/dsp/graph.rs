//! Playback graph: scheduled clip sources → effect chains → rows → master.
//!
//! A graph is built from a frozen [`MixSnapshot`] and a start offset. It owns
//! everything it reads (shared buffers, copied parameters), so the audio
//! thread never touches the timeline. Rendering is strictly frame by frame,
//! which makes the output independent of how the host slices its blocks:
//! the realtime engine and the offline renderer produce the same samples.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::SharedBuffer;

use super::effects::{EffectChain, EffectState, StageKind};
use super::equalizer::{MasterChain, MasterEqualizer};
use super::mixer::{Mixer, row_is_audible};

/// Frozen clip parameters captured at graph-build time.
#[derive(Debug, Clone)]
pub struct ClipMix {
    pub buffer: SharedBuffer,
    pub start: f64,
    pub gain: f32,
    pub effects: EffectState,
}

impl ClipMix {
    pub fn end(&self) -> f64 {
        self.start + self.buffer.duration()
    }
}

/// Frozen row parameters.
#[derive(Debug, Clone)]
pub struct RowMix {
    pub gain: f32,
    pub muted: bool,
    pub soloed: bool,
    pub clips: Vec<ClipMix>,
}

/// Everything a render needs, detached from the editable model.
#[derive(Debug, Clone)]
pub struct MixSnapshot {
    pub sample_rate: u32,
    pub channels: usize,
    pub rows: Vec<RowMix>,
    pub equalizer: MasterEqualizer,
}

impl MixSnapshot {
    /// Latest clip end over every row, audible or not.
    pub fn duration(&self) -> f64 {
        self.rows
            .iter()
            .flat_map(|r| r.clips.iter())
            .map(ClipMix::end)
            .fold(0.0, f64::max)
    }

    /// Number of frames an offline render of this snapshot produces.
    ///
    /// Computed from scheduled frame positions rather than `duration()` so
    /// float error in clip starts never adds a stray frame.
    pub fn total_frames(&self) -> usize {
        let rate = self.sample_rate as f64;
        self.rows
            .iter()
            .flat_map(|r| r.clips.iter())
            .map(|c| (c.start * rate).round() as usize + c.buffer.frames())
            .max()
            .unwrap_or(0)
    }
}

/// Counts live graph nodes (row buses and scheduled sources).
///
/// Every node holds a guard that decrements the count when dropped, so a
/// value above zero after a session is torn down means something leaked.
#[derive(Debug, Clone, Default)]
pub struct NodeCounter(Arc<AtomicUsize>);

impl NodeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn guard(&self) -> NodeGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        NodeGuard(Arc::clone(&self.0))
    }
}

#[derive(Debug)]
struct NodeGuard(Arc<AtomicUsize>);

impl Drop for NodeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One clip buffer scheduled against the graph's frame counter.
#[derive(Debug)]
struct ScheduledSource {
    buffer: SharedBuffer,
    /// Graph frame at which the source starts sounding.
    begin: usize,
    /// Buffer frame played at `begin`.
    offset: usize,
    gain: f32,
    chain: EffectChain,
    finished: bool,
    _guard: NodeGuard,
}

impl ScheduledSource {
    /// Write this source's contribution for graph frame `position` into `frame`.
    /// Returns false when the source is silent at this position.
    #[inline]
    fn render_frame(&mut self, position: usize, frame: &mut [f32]) -> bool {
        if self.finished || position < self.begin {
            return false;
        }
        let read = self.offset + (position - self.begin);
        let frames = self.buffer.frames();
        if read >= frames + self.chain.tail_frames() {
            self.finished = true;
            return false;
        }
        let source_channels = self.buffer.channel_count();
        for (ch, sample) in frame.iter_mut().enumerate() {
            *sample = if read < frames {
                self.buffer.sample(ch % source_channels, read)
            } else {
                0.0
            };
        }
        self.chain.process_frame(frame);
        true
    }
}

#[derive(Debug)]
struct RowBus {
    gain: f32,
    sources: Vec<ScheduledSource>,
    mixer: Mixer,
    _guard: NodeGuard,
}

/// Summary of a built graph, for inspection and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphTopology {
    /// Per audible row, the effect stages of each scheduled source.
    pub rows: Vec<Vec<Vec<StageKind>>>,
    pub master_stages: usize,
    pub master_bypassed: bool,
}

/// A live signal graph for one playback session or offline render.
#[derive(Debug)]
pub struct PlaybackGraph {
    channels: usize,
    rows: Vec<RowBus>,
    master: MasterChain,
    bus: Mixer,
    scratch: Vec<f32>,
    position: usize,
    limit: Option<usize>,
}

impl PlaybackGraph {
    /// Build the graph for `snapshot` starting at `start` seconds.
    ///
    /// Every clip whose range reaches past `start` on an audible row is
    /// scheduled to begin `max(0, clip.start - start)` seconds after the
    /// session starts, entering its buffer `max(0, start - clip.start)`
    /// seconds in.
    pub fn build(snapshot: &MixSnapshot, start: f64, nodes: &NodeCounter) -> Self {
        let start = start.max(0.0);
        let rate = snapshot.sample_rate as f64;
        let channels = snapshot.channels;
        let any_solo = snapshot.rows.iter().any(|r| r.soloed);

        let rows = snapshot
            .rows
            .iter()
            .filter(|r| row_is_audible(r.muted, r.soloed, any_solo))
            .map(|row| {
                let sources = row
                    .clips
                    .iter()
                    .filter(|clip| clip.end() > start)
                    .map(|clip| ScheduledSource {
                        buffer: Arc::clone(&clip.buffer),
                        begin: ((clip.start - start).max(0.0) * rate).round() as usize,
                        offset: ((start - clip.start).max(0.0) * rate).round() as usize,
                        gain: clip.gain,
                        chain: EffectChain::build(&clip.effects, rate, channels),
                        finished: false,
                        _guard: nodes.guard(),
                    })
                    .collect();
                RowBus {
                    gain: row.gain,
                    sources,
                    mixer: Mixer::new(channels),
                    _guard: nodes.guard(),
                }
            })
            .collect();

        PlaybackGraph {
            channels,
            rows,
            master: MasterChain::build(&snapshot.equalizer, rate, channels),
            bus: Mixer::new(channels),
            scratch: vec![0.0; channels],
            position: 0,
            limit: None,
        }
    }

    /// Stop producing sound after `frames` frames (scrub previews).
    pub fn with_limit(mut self, frames: usize) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames rendered since the graph started.
    pub fn position(&self) -> usize {
        self.position
    }

    /// True once a limited graph has played its full length.
    pub fn is_finished(&self) -> bool {
        self.limit.is_some_and(|limit| self.position >= limit)
    }

    /// Number of scheduled sources that have not finished yet.
    pub fn active_sources(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|r| r.sources.iter())
            .filter(|s| !s.finished)
            .count()
    }

    pub fn topology(&self) -> GraphTopology {
        GraphTopology {
            rows: self
                .rows
                .iter()
                .map(|r| r.sources.iter().map(|s| s.chain.topology()).collect())
                .collect(),
            master_stages: self.master.stage_count(),
            master_bypassed: matches!(self.master, MasterChain::Bypass),
        }
    }

    /// Render interleaved frames into `out`, overwriting it.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = self.channels;
        for frame in out.chunks_exact_mut(channels) {
            if self.is_finished() {
                frame.fill(0.0);
                continue;
            }
            self.render_frame();
            frame.copy_from_slice(self.bus.output());
            self.position += 1;
        }
    }

    /// Mix into `out` instead of overwriting (used for scrub previews).
    pub fn render_add(&mut self, out: &mut [f32]) {
        let channels = self.channels;
        for frame in out.chunks_exact_mut(channels) {
            if self.is_finished() {
                return;
            }
            self.render_frame();
            for (o, &s) in frame.iter_mut().zip(self.bus.output()) {
                *o += s;
            }
            self.position += 1;
        }
    }

    #[inline]
    fn render_frame(&mut self) {
        let position = self.position;
        self.bus.clear();
        for row in &mut self.rows {
            row.mixer.clear();
            for source in &mut row.sources {
                if source.render_frame(position, &mut self.scratch) {
                    row.mixer.add(&self.scratch, source.gain);
                }
            }
            self.bus.add(row.mixer.output(), row.gain);
        }
        self.master.process_frame(self.bus.output_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;
    use crate::dsp::equalizer::EqPreset;

    const RATE: u32 = 1000;

    fn constant(value: f32, frames: usize) -> SharedBuffer {
        Arc::new(AudioBuffer::from_planar(vec![vec![value; frames]], RATE).unwrap())
    }

    fn clip(value: f32, frames: usize, start: f64) -> ClipMix {
        ClipMix {
            buffer: constant(value, frames),
            start,
            gain: 1.0,
            effects: EffectState::default(),
        }
    }

    fn row(clips: Vec<ClipMix>) -> RowMix {
        RowMix {
            gain: 1.0,
            muted: false,
            soloed: false,
            clips,
        }
    }

    fn snapshot(rows: Vec<RowMix>) -> MixSnapshot {
        MixSnapshot {
            sample_rate: RATE,
            channels: 1,
            rows,
            equalizer: MasterEqualizer::default(),
        }
    }

    fn render_all(snap: &MixSnapshot, start: f64) -> Vec<f32> {
        let nodes = NodeCounter::new();
        let mut graph = PlaybackGraph::build(snap, start, &nodes);
        let mut out = vec![0.0; snap.total_frames()];
        graph.render(&mut out);
        out
    }

    #[test]
    fn clips_start_at_scheduled_frames() {
        let snap = snapshot(vec![row(vec![clip(0.5, 100, 0.2)])]);
        let out = render_all(&snap, 0.0);
        assert_eq!(out.len(), 300);
        assert_eq!(out[199], 0.0);
        assert_eq!(out[200], 0.5);
        assert_eq!(out[299], 0.5);
    }

    #[test]
    fn start_offset_enters_buffer_midway() {
        let ramp: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let buffer = Arc::new(AudioBuffer::from_planar(vec![ramp], RATE).unwrap());
        let snap = snapshot(vec![row(vec![ClipMix {
            buffer,
            start: 0.0,
            gain: 1.0,
            effects: EffectState::default(),
        }])]);
        let nodes = NodeCounter::new();
        let mut graph = PlaybackGraph::build(&snap, 0.04, &nodes);
        let mut out = vec![0.0; 3];
        graph.render(&mut out);
        assert_eq!(out, vec![40.0, 41.0, 42.0]);
    }

    #[test]
    fn clips_before_offset_are_not_scheduled() {
        let snap = snapshot(vec![row(vec![clip(1.0, 100, 0.0), clip(1.0, 100, 0.5)])]);
        let nodes = NodeCounter::new();
        let graph = PlaybackGraph::build(&snap, 0.2, &nodes);
        assert_eq!(graph.topology().rows, vec![vec![Vec::<StageKind>::new()]]);
    }

    #[test]
    fn rows_sum_with_gains_and_mute_solo() {
        let mut a = row(vec![clip(0.25, 10, 0.0)]);
        a.gain = 2.0;
        let b = row(vec![clip(0.125, 10, 0.0)]);
        let mut muted = row(vec![clip(1.0, 10, 0.0)]);
        muted.muted = true;
        let out = render_all(&snapshot(vec![a.clone(), b.clone(), muted]), 0.0);
        assert_eq!(out[0], 0.625);

        let mut soloed = b;
        soloed.soloed = true;
        let out = render_all(&snapshot(vec![a, soloed]), 0.0);
        assert_eq!(out[0], 0.125);
    }

    #[test]
    fn block_size_does_not_change_output() {
        let mut c = clip(0.3, 400, 0.1);
        c.effects.room = true;
        c.effects.band_mask = true;
        let mut snap = snapshot(vec![row(vec![c])]);
        snap.equalizer.set_preset(EqPreset::Clarity, true);
        let whole = render_all(&snap, 0.0);

        let nodes = NodeCounter::new();
        let mut graph = PlaybackGraph::build(&snap, 0.0, &nodes);
        let mut pieces = Vec::new();
        for size in [1usize, 7, 64, 13, 1000].iter().cycle() {
            if pieces.len() >= whole.len() {
                break;
            }
            let n = (*size).min(whole.len() - pieces.len());
            let mut block = vec![0.0; n];
            graph.render(&mut block);
            pieces.extend(block);
        }
        assert_eq!(pieces, whole);
    }

    #[test]
    fn nodes_released_when_graph_dropped() {
        let nodes = NodeCounter::new();
        let snap = snapshot(vec![row(vec![clip(1.0, 10, 0.0), clip(1.0, 10, 0.02)]), row(vec![])]);
        let graph = PlaybackGraph::build(&snap, 0.0, &nodes);
        // two rows + two sources
        assert_eq!(nodes.live(), 4);
        drop(graph);
        assert_eq!(nodes.live(), 0);
    }

    #[test]
    fn limited_graph_finishes() {
        let snap = snapshot(vec![row(vec![clip(1.0, 100, 0.0)])]);
        let nodes = NodeCounter::new();
        let mut graph = PlaybackGraph::build(&snap, 0.0, &nodes).with_limit(10);
        let mut out = vec![0.0; 20];
        graph.render_add(&mut out);
        assert!(graph.is_finished());
        assert_eq!(&out[..10], &[1.0; 10]);
        assert_eq!(&out[10..], &[0.0; 10]);
    }

    #[test]
    fn dry_sources_finish_at_buffer_end() {
        let snap = snapshot(vec![row(vec![clip(1.0, 10, 0.0)])]);
        let nodes = NodeCounter::new();
        let mut graph = PlaybackGraph::build(&snap, 0.0, &nodes);
        let mut out = vec![0.0; 11];
        graph.render(&mut out);
        assert_eq!(graph.active_sources(), 0);
    }
}
