//! Studio: the control-thread owner of a project.
//!
//! Holds the timeline, history, master equalizer, buffer store and
//! transport, and talks to the audio thread through an [`EngineHandle`].
//! Every timeline edit is validated before anything changes; only a
//! successful edit is recorded in history. While playing, a successful
//! edit restarts the session from the current position so the audio
//! thread never plays a stale graph.

use crate::buffer::{AudioBuffer, BufferStore};
use crate::config::StudioConfig;
use crate::dsp::effects::EffectState;
use crate::dsp::engine::{EngineCommand, EngineHandle, PlaybackEngine, engine_channel};
use crate::dsp::equalizer::{EqPreset, MasterEqualizer};
use crate::dsp::graph::{MixSnapshot, PlaybackGraph};
use crate::dsp::renderer::{self, RenderJob, RenderService};
use crate::error::{DecodeError, InvalidOperation, RenderError, StudioError};
use crate::history::History;
use crate::intake::{self, DecodedAudio};
use crate::project::{ProjectDocument, ProjectStore};
use crate::timeline::{ClipId, ClipSource, Row, RowId, Timeline};
use crate::transport::{Clock, Tick, Transport};
use crate::voice::{SynthesisRequest, Synthesizer};

pub struct Studio {
    config: StudioConfig,
    timeline: Timeline,
    history: History<Vec<Row>>,
    equalizer: MasterEqualizer,
    buffers: BufferStore,
    transport: Transport,
    engine: EngineHandle,
    renderer: RenderService,
    session: u64,
}

impl Studio {
    /// Create a studio and the engine that renders it. The engine goes to
    /// the audio thread.
    pub fn new(mut config: StudioConfig) -> (Studio, PlaybackEngine) {
        config.ensure_nonzero();
        let (engine, playback) = engine_channel(&config);
        let studio = Studio {
            history: History::new(config.history_depth),
            renderer: RenderService::new(&config),
            timeline: Timeline::new(),
            equalizer: MasterEqualizer::default(),
            buffers: BufferStore::new(),
            transport: Transport::new(),
            engine,
            session: 0,
            config,
        };
        (studio, playback)
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn equalizer(&self) -> &MasterEqualizer {
        &self.equalizer
    }

    pub fn buffers(&self) -> &BufferStore {
        &self.buffers
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn duration(&self) -> f64 {
        self.timeline.duration()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Graph nodes currently alive across every session and preview.
    pub fn live_nodes(&self) -> usize {
        self.engine.nodes().live()
    }

    fn now(&self) -> f64 {
        self.engine.clock().now()
    }

    // ---- timeline edits ----

    /// Run a timeline edit. History is pushed only if it succeeds.
    fn edit<R>(
        &mut self,
        op: impl FnOnce(&mut Timeline, &mut BufferStore) -> Result<R, InvalidOperation>,
    ) -> Result<R, InvalidOperation> {
        let before = self.timeline.snapshot();
        let result = op(&mut self.timeline, &mut self.buffers)?;
        self.history.push(before);
        self.refresh_session();
        Ok(result)
    }

    /// Convert a buffer to the project layout if it is not already in it.
    fn conform(&self, buffer: AudioBuffer) -> Result<AudioBuffer, DecodeError> {
        if buffer.sample_rate() == self.config.sample_rate
            && buffer.channel_count() == self.config.channels
        {
            return Ok(buffer);
        }
        intake::conform(
            DecodedAudio {
                channels: buffer.channels().to_vec(),
                sample_rate: buffer.sample_rate(),
            },
            &self.config,
        )
    }

    /// Place a new buffer as a clip on a fresh row at the playhead.
    pub fn add_external_buffer(&mut self, buffer: AudioBuffer, source: ClipSource) -> Result<ClipId, StudioError> {
        let buffer = self.conform(buffer)?;
        if buffer.is_empty() {
            return Err(InvalidOperation::EmptyBuffer.into());
        }
        let start = self.transport.position(self.now());
        let (clip, _, _) = self.edit(|timeline, store| {
            let shared = store.insert(buffer);
            timeline.insert_clip(None, shared, start, source)
        })?;
        Ok(clip)
    }

    /// Decode an uploaded file and place it at the playhead.
    pub fn import_audio(&mut self, bytes: &[u8], name: &str) -> Result<ClipId, StudioError> {
        let buffer = intake::decode_audio(bytes, &self.config)?;
        self.add_external_buffer(buffer, ClipSource::Uploaded { name: name.to_string() })
    }

    /// Ask `synth` for speech and place the result at the playhead. On
    /// failure the timeline is left untouched.
    pub async fn synthesize_clip<S: Synthesizer>(
        &mut self,
        synth: &S,
        request: &SynthesisRequest,
    ) -> Result<ClipId, StudioError> {
        let buffer = synth.synthesize(request).await?;
        self.add_external_buffer(
            buffer,
            ClipSource::Synthesized {
                voice: request.voice.clone(),
            },
        )
    }

    /// Move a clip. Returns the start actually used after overlap clamping.
    pub fn place_clip(&mut self, clip: ClipId, row: RowId, start: f64) -> Result<f64, InvalidOperation> {
        self.edit(|timeline, _| timeline.move_clip(clip, row, start))
    }

    pub fn split_clip(&mut self, clip: ClipId, at: f64) -> Result<(ClipId, ClipId), InvalidOperation> {
        self.edit(|timeline, store| timeline.split_clip(clip, at, store))
    }

    /// Delete every selected clip. Nothing selected is a no-op and leaves
    /// history alone.
    pub fn delete_selected(&mut self) -> Vec<ClipId> {
        if !self.timeline.clips().any(|c| c.selected) {
            return Vec::new();
        }
        self.edit(|timeline, _| Ok(timeline.delete_selected()))
            .unwrap_or_default()
    }

    pub fn ripple_delete(&mut self, clip: ClipId) -> Result<(), InvalidOperation> {
        self.edit(|timeline, _| timeline.ripple_delete(clip))
    }

    pub fn duplicate_row(&mut self, row: RowId) -> Result<RowId, InvalidOperation> {
        self.edit(|timeline, _| timeline.duplicate_row(row))
    }

    pub fn phase_shift_duplicate(&mut self, row: RowId) -> Result<RowId, InvalidOperation> {
        let offset = self.config.phase_offset_secs;
        self.edit(|timeline, _| timeline.phase_shift_duplicate(row, offset))
    }

    pub fn delete_row(&mut self, row: RowId) -> Result<(), InvalidOperation> {
        self.edit(|timeline, _| timeline.delete_row(row))
    }

    pub fn set_clip_gain(&mut self, clip: ClipId, gain: f32) -> Result<(), InvalidOperation> {
        self.edit(|timeline, _| timeline.set_clip_gain(clip, gain))
    }

    pub fn set_clip_effects(&mut self, clip: ClipId, effects: EffectState) -> Result<(), InvalidOperation> {
        self.edit(|timeline, _| timeline.set_clip_effects(clip, effects))
    }

    pub fn set_row_gain(&mut self, row: RowId, gain: f32) -> Result<(), InvalidOperation> {
        self.edit(|timeline, _| timeline.set_row_gain(row, gain))
    }

    pub fn set_row_mute(&mut self, row: RowId, muted: bool) -> Result<(), InvalidOperation> {
        self.edit(|timeline, _| timeline.set_row_mute(row, muted))
    }

    pub fn set_row_solo(&mut self, row: RowId, soloed: bool) -> Result<(), InvalidOperation> {
        self.edit(|timeline, _| timeline.set_row_solo(row, soloed))
    }

    // Selection is view state: no history.

    pub fn select_clip(&mut self, clip: ClipId, selected: bool) -> Result<(), InvalidOperation> {
        self.timeline.select_clip(clip, selected)
    }

    pub fn clear_selection(&mut self) {
        self.timeline.clear_selection();
    }

    pub fn undo(&mut self) -> bool {
        let mut rows = self.timeline.snapshot();
        if !self.history.undo(&mut rows) {
            return false;
        }
        self.timeline.restore(rows);
        self.refresh_session();
        true
    }

    pub fn redo(&mut self) -> bool {
        let mut rows = self.timeline.snapshot();
        if !self.history.redo(&mut rows) {
            return false;
        }
        self.timeline.restore(rows);
        self.refresh_session();
        true
    }

    // ---- master equalizer ----

    fn edit_equalizer(&mut self, op: impl FnOnce(&mut MasterEqualizer)) {
        op(&mut self.equalizer);
        self.refresh_session();
    }

    pub fn set_preamp(&mut self, db: f64) {
        self.edit_equalizer(|eq| eq.set_preamp(db));
    }

    pub fn set_eq_band(&mut self, index: usize, db: f64) {
        self.edit_equalizer(|eq| eq.set_band(index, db));
    }

    pub fn set_eq_preset(&mut self, preset: EqPreset, active: bool) {
        self.edit_equalizer(|eq| eq.set_preset(preset, active));
    }

    pub fn set_eq_bypass(&mut self, bypass: bool) {
        self.edit_equalizer(|eq| eq.set_bypass(bypass));
    }

    pub fn reset_equalizer(&mut self) {
        self.edit_equalizer(MasterEqualizer::reset);
    }

    /// Freeze the current arrangement for rendering.
    pub fn mix_snapshot(&self) -> MixSnapshot {
        MixSnapshot {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            rows: self.timeline.to_mix(),
            equalizer: self.equalizer.clone(),
        }
    }

    // ---- transport ----

    fn start_session(&mut self, position: f64) -> Result<(), InvalidOperation> {
        let graph = PlaybackGraph::build(&self.mix_snapshot(), position, self.engine.nodes());
        self.session += 1;
        self.engine.send(EngineCommand::Start {
            session: self.session,
            graph: Box::new(graph),
        })
    }

    /// Stop the running session and start a new one at the playhead.
    fn restart_session(&mut self, position: f64) -> Result<(), InvalidOperation> {
        self.engine.send(EngineCommand::Stop)?;
        self.start_session(position)
    }

    fn refresh_session(&mut self) {
        if !self.transport.is_playing() {
            return;
        }
        let position = self.transport.position(self.now());
        if let Err(e) = self.restart_session(position) {
            log::warn!("could not refresh playback after edit: {e}");
        }
    }

    /// Start playback from the playhead. Returns false if already playing.
    pub fn play(&mut self) -> Result<bool, InvalidOperation> {
        if self.transport.is_playing() {
            return Ok(false);
        }
        self.start_session(self.transport.playhead())?;
        let now = self.now();
        self.transport.play(now);
        log::debug!("play from {:.3}s", self.transport.playhead());
        Ok(true)
    }

    /// Stop playback, keeping the playhead where it is.
    pub fn stop(&mut self) -> Result<bool, InvalidOperation> {
        if !self.transport.is_playing() {
            return Ok(false);
        }
        self.engine.send(EngineCommand::Stop)?;
        let now = self.now();
        self.transport.stop(now);
        self.engine.collect_retired();
        Ok(true)
    }

    /// Move the playhead; a playing session is stopped and restarted there.
    pub fn seek(&mut self, time: f64) -> Result<(), InvalidOperation> {
        let time = time.max(0.0);
        if self.transport.is_playing() {
            self.restart_session(time)?;
        }
        let now = self.now();
        self.transport.seek(time, now);
        Ok(())
    }

    pub fn nudge(&mut self, delta: f64) -> Result<(), InvalidOperation> {
        let position = self.transport.position(self.now());
        self.seek(position + delta)
    }

    /// Play a short preview at `time`. Only while stopped; the transport
    /// itself does not change.
    pub fn scrub(&mut self, time: f64) -> Result<(), InvalidOperation> {
        if self.transport.is_playing() {
            return Err(InvalidOperation::ScrubWhilePlaying);
        }
        let frames = (self.config.scrub_preview_secs * self.config.sample_rate as f64).round() as usize;
        let graph = PlaybackGraph::build(&self.mix_snapshot(), time.max(0.0), self.engine.nodes())
            .with_limit(frames);
        self.engine.send(EngineCommand::Preview { graph: Box::new(graph) })
    }

    /// Sample the engine clock. Call periodically from the UI loop.
    pub fn tick(&mut self) -> Tick {
        let now = self.now();
        let tick = self.transport.tick(now, self.timeline.duration());
        if tick == Tick::AutoStopped {
            if let Err(e) = self.engine.send(EngineCommand::Stop) {
                log::warn!("auto-stop could not reach the engine: {e}");
            }
            log::debug!("auto-stopped at project end");
        }
        self.engine.collect_retired();
        tick
    }

    pub fn set_zoom(&mut self, pixels_per_second: f64) {
        self.transport.set_zoom(pixels_per_second);
    }

    // ---- export ----

    /// Render and encode the project in the background.
    pub fn start_export(&self) -> Result<RenderJob, RenderError> {
        self.renderer.start(self.mix_snapshot())
    }

    pub fn is_exporting(&self) -> bool {
        self.renderer.is_busy()
    }

    /// Render and encode on the calling thread.
    pub fn render_wav(&self) -> Result<Vec<u8>, RenderError> {
        let buffer = renderer::render_offline(&self.mix_snapshot(), self.config.render_block_frames, None)?;
        Ok(renderer::encode_wav(buffer))
    }

    // ---- documents ----

    pub fn to_document(&self, label: &str, namespace: &str) -> ProjectDocument {
        ProjectDocument::capture(
            label,
            namespace,
            &self.timeline,
            &self.equalizer,
            &self.buffers,
            self.config.sample_rate,
            self.config.channels,
        )
    }

    /// Replace the arrangement with a document. Buffers must already be in
    /// the store. Clears history.
    pub fn load_document(&mut self, document: &ProjectDocument) -> Result<(), InvalidOperation> {
        if document.sample_rate != self.config.sample_rate || document.channels != self.config.channels {
            return Err(InvalidOperation::LayoutMismatch {
                channels: document.channels,
                sample_rate: document.sample_rate,
            });
        }
        let rows = document.to_rows(&self.buffers)?;
        self.timeline.load(rows)?;
        self.equalizer = document.equalizer.clone();
        self.equalizer.sanitize();
        self.history.clear();
        self.refresh_session();
        log::info!("loaded project '{}' ({} clips)", document.label, self.timeline.clip_count());
        Ok(())
    }

    pub fn save<S: ProjectStore>(&self, store: &mut S, namespace: &str, label: &str) -> Result<(), StudioError> {
        store.save(&self.to_document(label, namespace))?;
        Ok(())
    }

    pub fn open<S: ProjectStore>(&mut self, store: &S, namespace: &str, label: &str) -> Result<(), StudioError> {
        let document = store.load(namespace, label)?;
        self.load_document(&document)?;
        Ok(())
    }

    /// Release retired graphs and unreferenced buffers.
    pub fn collect_garbage(&mut self) -> (usize, usize) {
        let graphs = self.engine.collect_retired();
        let buffers = self.buffers.collect();
        (graphs, buffers)
    }
}
