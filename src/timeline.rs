//! Timeline model: rows of non-overlapping clips and the editing
//! operations on them.
//!
//! Every operation validates first and mutates second, so a rejected
//! operation leaves the timeline exactly as it was. History is handled one
//! level up by [`crate::studio::Studio`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferStore, SharedBuffer};
use crate::dsp::effects::EffectState;
use crate::dsp::graph::{ClipMix, RowMix};
use crate::error::InvalidOperation;

/// Tolerance for interval comparisons, far below one sample at any rate.
const EPSILON: f64 = 1e-9;

pub const ROW_GAIN_MAX: f32 = 2.0;
pub const CLIP_GAIN_MAX: f32 = 4.0;

fn clamp_gain(gain: f32, max: f32) -> f32 {
    if gain.is_nan() { 1.0 } else { gain.clamp(0.0, max) }
}

/// Largest ids accepted from callers and documents. The space above is
/// left for ids allocated afterwards.
pub const MAX_ROW_ID: u32 = u32::MAX / 2;
pub const MAX_CLIP_ID: u64 = u64::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u32);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipId(pub u64);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip#{}", self.0)
    }
}

/// Where a clip came from. Display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClipSource {
    Synthesized { voice: String },
    Uploaded { name: String },
    Split,
    Duplicate,
    PhaseShift,
}

/// A timed placement of a buffer on a row.
#[derive(Debug, Clone)]
pub struct Clip {
    pub id: ClipId,
    pub buffer: SharedBuffer,
    pub start: f64,
    pub gain: f32,
    pub effects: EffectState,
    pub selected: bool,
    pub source: ClipSource,
}

impl PartialEq for Clip {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.buffer.id() == other.buffer.id()
            && self.start == other.start
            && self.gain == other.gain
            && self.effects == other.effects
            && self.selected == other.selected
            && self.source == other.source
    }
}

impl Clip {
    pub fn duration(&self) -> f64 {
        self.buffer.duration()
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration()
    }

    fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start < end - EPSILON && start < self.end() - EPSILON
    }
}

/// A bus: gain, mute, solo, and its clips sorted by start time.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub gain: f32,
    pub muted: bool,
    pub soloed: bool,
    clips: Vec<Clip>,
}

impl Row {
    fn new(id: RowId) -> Self {
        Row {
            id,
            gain: 1.0,
            muted: false,
            soloed: false,
            clips: Vec::new(),
        }
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    /// Rebuild a row from stored parts. Gains are clamped and clips are
    /// sorted by start.
    pub(crate) fn from_parts(id: RowId, gain: f32, muted: bool, soloed: bool, mut clips: Vec<Clip>) -> Self {
        for clip in &mut clips {
            clip.gain = clamp_gain(clip.gain, CLIP_GAIN_MAX);
        }
        let mut row = Row {
            id,
            gain: clamp_gain(gain, ROW_GAIN_MAX),
            muted,
            soloed,
            clips,
        };
        row.sort();
        row
    }

    fn sort(&mut self) {
        self.clips.sort_by(|a, b| a.start.total_cmp(&b.start));
    }

    /// Closest start to `desired` where `duration` fits without overlapping
    /// any clip on this row (other than `ignore`). The result always abuts
    /// a neighbour or equals `desired`.
    fn resolve_start(&self, ignore: Option<ClipId>, desired: f64, duration: f64) -> f64 {
        let desired = desired.max(0.0);
        let mut best = f64::INFINITY;
        let mut best_distance = f64::INFINITY;
        let mut consider = |candidate: f64| {
            let distance = (candidate - desired).abs();
            // Ties go to the later slot.
            if distance <= best_distance {
                best = candidate;
                best_distance = distance;
            }
        };

        let mut gap_start = 0.0_f64;
        for clip in self.clips.iter().filter(|c| Some(c.id) != ignore) {
            let gap_end = clip.start;
            if gap_end - gap_start >= duration - EPSILON {
                let latest = (gap_end - duration).max(gap_start);
                consider(desired.clamp(gap_start, latest));
            }
            gap_start = gap_start.max(clip.end());
        }
        consider(desired.max(gap_start));
        best
    }

    fn has_overlaps(&self) -> bool {
        self.clips
            .windows(2)
            .any(|pair| pair[0].overlaps(pair[1].start, pair[1].end()))
    }
}

/// The editable arrangement.
#[derive(Debug, Clone)]
pub struct Timeline {
    rows: Vec<Row>,
    next_row: u32,
    next_clip: u64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Timeline {
            rows: Vec::new(),
            next_row: 1,
            next_clip: 1,
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.locate(id).map(|(r, c)| &self.rows[r].clips[c])
    }

    /// Row that holds `clip`.
    pub fn row_of(&self, clip: ClipId) -> Option<RowId> {
        self.locate(clip).map(|(r, _)| self.rows[r].id)
    }

    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.rows.iter().flat_map(|r| r.clips.iter())
    }

    pub fn clip_count(&self) -> usize {
        self.rows.iter().map(|r| r.clips.len()).sum()
    }

    /// Project length: the latest clip end on any row.
    pub fn duration(&self) -> f64 {
        self.clips().map(Clip::end).fold(0.0, f64::max)
    }

    /// True when no row holds overlapping clips.
    pub fn is_consistent(&self) -> bool {
        !self.rows.iter().any(Row::has_overlaps)
    }

    /// Copy of the rows for history.
    pub fn snapshot(&self) -> Vec<Row> {
        self.rows.clone()
    }

    /// Replace the rows with a history snapshot. Id counters keep running
    /// so ids are never reused.
    pub fn restore(&mut self, rows: Vec<Row>) {
        self.rows = rows;
    }

    /// Replace the arrangement with loaded rows. Fails without touching
    /// the timeline when a row holds overlapping clips.
    pub fn load(&mut self, rows: Vec<Row>) -> Result<(), InvalidOperation> {
        if let Some(row) = rows.iter().find(|r| r.has_overlaps()) {
            return Err(InvalidOperation::OverlappingClips(row.id));
        }
        if let Some(row) = rows.iter().find(|r| r.id.0 > MAX_ROW_ID) {
            return Err(InvalidOperation::RowIdOutOfRange(row.id));
        }
        if let Some(clip) = rows.iter().flat_map(|r| r.clips.iter()).find(|c| c.id.0 > MAX_CLIP_ID) {
            return Err(InvalidOperation::ClipIdOutOfRange(clip.id));
        }
        let max_row = rows.iter().map(|r| r.id.0).max().unwrap_or(0);
        let max_clip = rows
            .iter()
            .flat_map(|r| r.clips.iter())
            .map(|c| c.id.0)
            .max()
            .unwrap_or(0);
        self.next_row = self.next_row.max(max_row + 1);
        self.next_clip = self.next_clip.max(max_clip + 1);
        self.rows = rows;
        Ok(())
    }

    /// Frozen parameters for the render graph.
    pub fn to_mix(&self) -> Vec<RowMix> {
        self.rows
            .iter()
            .map(|row| RowMix {
                gain: row.gain,
                muted: row.muted,
                soloed: row.soloed,
                clips: row
                    .clips
                    .iter()
                    .map(|c| ClipMix {
                        buffer: Arc::clone(&c.buffer),
                        start: c.start,
                        gain: c.gain,
                        effects: c.effects,
                    })
                    .collect(),
            })
            .collect()
    }

    fn locate(&self, id: ClipId) -> Option<(usize, usize)> {
        self.rows.iter().enumerate().find_map(|(r, row)| {
            row.clips.iter().position(|c| c.id == id).map(|c| (r, c))
        })
    }

    fn row_index(&self, id: RowId) -> Option<usize> {
        self.rows.iter().position(|r| r.id == id)
    }

    fn next_clip_id(&mut self) -> ClipId {
        let id = ClipId(self.next_clip);
        self.next_clip = self.next_clip.saturating_add(1);
        id
    }

    /// Append an empty row and return its id.
    pub fn add_row(&mut self) -> RowId {
        let id = RowId(self.next_row);
        self.next_row = self.next_row.saturating_add(1);
        self.rows.push(Row::new(id));
        id
    }

    /// Index of `id`, creating the row if it does not exist yet.
    fn ensure_row(&mut self, id: RowId) -> Result<usize, InvalidOperation> {
        if let Some(index) = self.row_index(id) {
            return Ok(index);
        }
        if id.0 > MAX_ROW_ID {
            return Err(InvalidOperation::RowIdOutOfRange(id));
        }
        self.next_row = self.next_row.max(id.0 + 1);
        self.rows.push(Row::new(id));
        Ok(self.rows.len() - 1)
    }

    /// Place a new clip. `row = None` creates a fresh row. The start is
    /// clamped to the nearest free slot.
    pub fn insert_clip(
        &mut self,
        row: Option<RowId>,
        buffer: SharedBuffer,
        start: f64,
        source: ClipSource,
    ) -> Result<(ClipId, RowId, f64), InvalidOperation> {
        if buffer.is_empty() {
            return Err(InvalidOperation::EmptyBuffer);
        }
        let row_id = match row {
            Some(id) => id,
            None => self.add_row(),
        };
        let index = self.ensure_row(row_id)?;
        let id = self.next_clip_id();
        let resolved = self.rows[index].resolve_start(None, start, buffer.duration());
        self.rows[index].clips.push(Clip {
            id,
            buffer,
            start: resolved,
            gain: 1.0,
            effects: EffectState::default(),
            selected: false,
            source,
        });
        self.rows[index].sort();
        log::debug!("inserted {id} on {row_id} at {resolved:.4}s");
        Ok((id, row_id, resolved))
    }

    /// Move a clip to `(row, start)`. Overlaps are clamped, never allowed.
    /// Returns the start actually used.
    pub fn move_clip(&mut self, clip: ClipId, row: RowId, start: f64) -> Result<f64, InvalidOperation> {
        let (from, index) = self.locate(clip).ok_or(InvalidOperation::ClipNotFound(clip))?;
        let to = self.ensure_row(row)?;
        let moving = self.rows[from].clips.remove(index);
        let resolved = self.rows[to].resolve_start(Some(clip), start, moving.duration());
        if resolved != start {
            log::debug!("{clip} clamped from {start:.4}s to {resolved:.4}s on {row}");
        }
        self.rows[to].clips.push(Clip {
            start: resolved,
            ..moving
        });
        self.rows[to].sort();
        Ok(resolved)
    }

    /// Split a clip at absolute time `at` into two clips backed by new
    /// buffers copied from disjoint frame ranges.
    pub fn split_clip(
        &mut self,
        clip: ClipId,
        at: f64,
        store: &mut BufferStore,
    ) -> Result<(ClipId, ClipId), InvalidOperation> {
        let (r, c) = self.locate(clip).ok_or(InvalidOperation::ClipNotFound(clip))?;
        let original = &self.rows[r].clips[c];
        let out_of_bounds = InvalidOperation::SplitOutOfBounds {
            clip,
            at,
            start: original.start,
            end: original.end(),
        };
        if !(original.start < at && at < original.end()) {
            return Err(out_of_bounds);
        }
        let rate = original.buffer.sample_rate() as f64;
        let frame = ((at - original.start) * rate).round() as usize;
        if frame == 0 || frame >= original.buffer.frames() {
            return Err(out_of_bounds);
        }
        let (head, tail) = original.buffer.split_at(frame)?;

        let original = self.rows[r].clips.remove(c);
        let head_id = self.next_clip_id();
        let tail_id = self.next_clip_id();
        let tail_start = original.start + frame as f64 / rate;
        let row = &mut self.rows[r];
        row.clips.push(Clip {
            id: head_id,
            buffer: store.insert(head),
            selected: false,
            source: ClipSource::Split,
            ..original.clone()
        });
        row.clips.push(Clip {
            id: tail_id,
            buffer: store.insert(tail),
            start: tail_start,
            selected: false,
            source: ClipSource::Split,
            ..original
        });
        row.sort();
        log::debug!("split {clip} at frame {frame} into {head_id} + {tail_id}");
        Ok((head_id, tail_id))
    }

    /// Remove every selected clip. Other clips keep their positions.
    pub fn delete_selected(&mut self) -> Vec<ClipId> {
        let mut removed = Vec::new();
        for row in &mut self.rows {
            row.clips.retain(|c| {
                if c.selected {
                    removed.push(c.id);
                }
                !c.selected
            });
        }
        removed
    }

    /// Remove a clip and pull every later clip on the same row left by its
    /// duration. Other rows are untouched.
    pub fn ripple_delete(&mut self, clip: ClipId) -> Result<(), InvalidOperation> {
        let (r, c) = self.locate(clip).ok_or(InvalidOperation::ClipNotFound(clip))?;
        let row = &mut self.rows[r];
        let removed = row.clips.remove(c);
        let shift = removed.duration();
        for later in row.clips.iter_mut().filter(|l| l.start > removed.start) {
            later.start = (later.start - shift).max(0.0);
        }
        log::debug!("ripple-deleted {clip}, shifted later clips by {shift:.4}s");
        Ok(())
    }

    /// Copy all clips of `row` into a new row, with the same relative starts.
    pub fn duplicate_row(&mut self, row: RowId) -> Result<RowId, InvalidOperation> {
        self.duplicate_with(row, 0.0, false, ClipSource::Duplicate)
    }

    /// Duplicate `row` with every clip delayed by `offset` seconds and its
    /// resonant echo forced on.
    pub fn phase_shift_duplicate(&mut self, row: RowId, offset: f64) -> Result<RowId, InvalidOperation> {
        self.duplicate_with(row, offset.max(0.0), true, ClipSource::PhaseShift)
    }

    fn duplicate_with(
        &mut self,
        row: RowId,
        offset: f64,
        force_echo: bool,
        source: ClipSource,
    ) -> Result<RowId, InvalidOperation> {
        let index = self.row_index(row).ok_or(InvalidOperation::RowNotFound(row))?;
        let template = self.rows[index].clone();
        let new_id = self.add_row();
        let mut clips = Vec::with_capacity(template.clips.len());
        for clip in template.clips {
            let mut effects = clip.effects;
            effects.resonant_echo |= force_echo;
            clips.push(Clip {
                id: self.next_clip_id(),
                start: clip.start + offset,
                effects,
                selected: false,
                source: source.clone(),
                ..clip
            });
        }
        let new_index = self.rows.len() - 1;
        let new_row = &mut self.rows[new_index];
        new_row.gain = template.gain;
        new_row.clips = clips;
        log::debug!("duplicated {row} into {new_id} (offset {offset:.3}s)");
        Ok(new_id)
    }

    /// Delete a row and all of its clips.
    pub fn delete_row(&mut self, row: RowId) -> Result<(), InvalidOperation> {
        let index = self.row_index(row).ok_or(InvalidOperation::RowNotFound(row))?;
        self.rows.remove(index);
        Ok(())
    }

    fn clip_mut(&mut self, id: ClipId) -> Result<&mut Clip, InvalidOperation> {
        let (r, c) = self.locate(id).ok_or(InvalidOperation::ClipNotFound(id))?;
        Ok(&mut self.rows[r].clips[c])
    }

    fn row_mut(&mut self, id: RowId) -> Result<&mut Row, InvalidOperation> {
        let index = self.row_index(id).ok_or(InvalidOperation::RowNotFound(id))?;
        Ok(&mut self.rows[index])
    }

    pub fn set_clip_gain(&mut self, clip: ClipId, gain: f32) -> Result<(), InvalidOperation> {
        self.clip_mut(clip)?.gain = clamp_gain(gain, CLIP_GAIN_MAX);
        Ok(())
    }

    pub fn set_clip_effects(&mut self, clip: ClipId, effects: EffectState) -> Result<(), InvalidOperation> {
        self.clip_mut(clip)?.effects = effects;
        Ok(())
    }

    pub fn set_row_gain(&mut self, row: RowId, gain: f32) -> Result<(), InvalidOperation> {
        self.row_mut(row)?.gain = clamp_gain(gain, ROW_GAIN_MAX);
        Ok(())
    }

    pub fn set_row_mute(&mut self, row: RowId, muted: bool) -> Result<(), InvalidOperation> {
        self.row_mut(row)?.muted = muted;
        Ok(())
    }

    pub fn set_row_solo(&mut self, row: RowId, soloed: bool) -> Result<(), InvalidOperation> {
        self.row_mut(row)?.soloed = soloed;
        Ok(())
    }

    pub fn select_clip(&mut self, clip: ClipId, selected: bool) -> Result<(), InvalidOperation> {
        self.clip_mut(clip)?.selected = selected;
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        for clip in self.rows.iter_mut().flat_map(|r| r.clips.iter_mut()) {
            clip.selected = false;
        }
    }
}
