//! Offline renderer: renders a mix snapshot and encodes it as WAV.
//!
//! The render builds the same [`PlaybackGraph`] the realtime engine plays
//! and runs it to completion in one pass. Encoding is chunked: each
//! [`WavEncoder::step`] converts a fixed number of frames and returns, so a
//! single-threaded host (the browser main thread) stays responsive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::buffer::AudioBuffer;
use crate::config::StudioConfig;
use crate::error::RenderError;

use super::graph::{MixSnapshot, NodeCounter, PlaybackGraph};

const WAV_HEADER_LEN: usize = 44;

/// Render the whole project from time 0. Checks `cancel` between blocks;
/// on cancellation the partial output is dropped.
pub fn render_offline(
    snapshot: &MixSnapshot,
    block_frames: usize,
    cancel: Option<&AtomicBool>,
) -> Result<AudioBuffer, RenderError> {
    let frames = snapshot.total_frames();
    if frames == 0 {
        return Err(RenderError::EmptyProject);
    }
    let channels = snapshot.channels;
    if frames * channels * 2 > (u32::MAX as usize) - WAV_HEADER_LEN {
        return Err(RenderError::TooLarge { frames });
    }

    let nodes = NodeCounter::new();
    let mut graph = PlaybackGraph::build(snapshot, 0.0, &nodes);
    let mut output = vec![0.0_f32; frames * channels];

    // Render in blocks
    for block in output.chunks_mut(block_frames.max(1) * channels) {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(RenderError::Cancelled);
        }
        graph.render(block);
    }

    AudioBuffer::from_interleaved(&output, channels, snapshot.sample_rate)
        .map_err(|e| RenderError::Worker(e.to_string()))
}

/// Convert a float sample to 16-bit PCM: clamp to [-1, 1], scale negative
/// values by 32768 and positive values by 32767, truncate toward zero.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// RIFF/WAVE header for 16-bit PCM.
pub fn wav_header(frames: usize, channels: u16, sample_rate: u32) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (frames * channels as usize * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(WAV_HEADER_LEN);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());

    buf
}

/// Outcome of one encoder step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncodeStep {
    /// More chunks remain; the value is progress in [0, 1].
    Progress(f64),
    Finished,
}

/// Chunked WAV encoder over a rendered buffer.
#[derive(Debug)]
pub struct WavEncoder {
    buffer: AudioBuffer,
    bytes: Vec<u8>,
    cursor: usize,
    chunk_frames: usize,
}

impl WavEncoder {
    pub fn new(buffer: AudioBuffer, chunk_frames: usize) -> Self {
        let frames = buffer.frames();
        let channels = buffer.channel_count();
        let mut bytes = Vec::with_capacity(WAV_HEADER_LEN + frames * channels * 2);
        bytes.extend(wav_header(frames, channels as u16, buffer.sample_rate()));
        WavEncoder {
            buffer,
            bytes,
            cursor: 0,
            chunk_frames: chunk_frames.max(1),
        }
    }

    /// Fraction of frames encoded so far.
    pub fn progress(&self) -> f64 {
        let frames = self.buffer.frames();
        if frames == 0 {
            1.0
        } else {
            self.cursor as f64 / frames as f64
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.buffer.frames()
    }

    /// Encode the next chunk of frames.
    pub fn step(&mut self) -> EncodeStep {
        let end = self.cursor.saturating_add(self.chunk_frames).min(self.buffer.frames());
        let channels = self.buffer.channel_count();
        for frame in self.cursor..end {
            for ch in 0..channels {
                let sample = sample_to_i16(self.buffer.channel(ch)[frame]);
                self.bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
        self.cursor = end;
        if self.is_finished() {
            EncodeStep::Finished
        } else {
            EncodeStep::Progress(self.progress())
        }
    }

    /// The encoded file. Only complete once [`WavEncoder::is_finished`].
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Encode a buffer in one go.
pub fn encode_wav(buffer: AudioBuffer) -> Vec<u8> {
    let mut encoder = WavEncoder::new(buffer, usize::MAX);
    while encoder.step() != EncodeStep::Finished {}
    encoder.into_bytes()
}

/// Messages from a background render job.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    /// The mix is being rendered.
    Rendering,
    /// Encoding progress in [0, 1], monotonically increasing.
    Progress(f64),
    /// The finished WAV file.
    Complete(Vec<u8>),
    Failed(RenderError),
}

/// Runs offline renders on a background thread, one at a time.
#[derive(Debug, Clone)]
pub struct RenderService {
    busy: Arc<AtomicBool>,
    block_frames: usize,
    chunk_frames: usize,
}

/// Clears the busy flag however the worker exits.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RenderService {
    pub fn new(config: &StudioConfig) -> Self {
        RenderService {
            busy: Arc::new(AtomicBool::new(false)),
            block_frames: config.render_block_frames,
            chunk_frames: config.export_chunk_frames,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start rendering `snapshot`. Rejected with [`RenderError::Busy`] while
    /// another job is in flight.
    pub fn start(&self, snapshot: MixSnapshot) -> Result<RenderJob, RenderError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RenderError::Busy);
        }
        let guard = BusyGuard(Arc::clone(&self.busy));

        let (events_tx, events_rx) = channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let block_frames = self.block_frames;
        let chunk_frames = self.chunk_frames;

        let handle = thread::Builder::new()
            .name("offline-render".to_string())
            .spawn(move || {
                let _guard = guard;
                run_job(&snapshot, block_frames, chunk_frames, &worker_cancel, &events_tx);
            })
            .map_err(|e| RenderError::Worker(e.to_string()))?;

        Ok(RenderJob {
            events: events_rx,
            cancel,
            handle: Some(handle),
            progress: 0.0,
        })
    }
}

fn run_job(
    snapshot: &MixSnapshot,
    block_frames: usize,
    chunk_frames: usize,
    cancel: &AtomicBool,
    events: &Sender<RenderEvent>,
) {
    let started = Instant::now();
    let _ = events.send(RenderEvent::Rendering);

    let buffer = match render_offline(snapshot, block_frames, Some(cancel)) {
        Ok(buffer) => buffer,
        Err(e) => {
            log::warn!("offline render failed: {e}");
            let _ = events.send(RenderEvent::Failed(e));
            return;
        }
    };

    let frames = buffer.frames();
    let mut encoder = WavEncoder::new(buffer, chunk_frames);
    loop {
        if cancel.load(Ordering::Relaxed) {
            let _ = events.send(RenderEvent::Failed(RenderError::Cancelled));
            return;
        }
        match encoder.step() {
            EncodeStep::Progress(p) => {
                let _ = events.send(RenderEvent::Progress(p));
            }
            EncodeStep::Finished => break,
        }
    }

    log::info!(
        "offline render finished: {frames} frames in {:.1} ms",
        started.elapsed().as_secs_f64() * 1000.0
    );
    let _ = events.send(RenderEvent::Progress(1.0));
    let _ = events.send(RenderEvent::Complete(encoder.into_bytes()));
}

/// Handle to a running background render.
#[derive(Debug)]
pub struct RenderJob {
    events: Receiver<RenderEvent>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    progress: f64,
}

impl RenderJob {
    /// Ask the worker to stop; it reports [`RenderError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Last reported progress; reset to 0 when the job fails.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Next event if one is ready.
    pub fn try_next(&mut self) -> Option<RenderEvent> {
        let event = self.events.try_recv().ok()?;
        self.track(&event);
        Some(event)
    }

    /// Block until the job completes.
    pub fn wait(mut self) -> Result<Vec<u8>, RenderError> {
        let result = loop {
            match self.events.recv() {
                Ok(event) => {
                    self.track(&event);
                    match event {
                        RenderEvent::Complete(bytes) => break Ok(bytes),
                        RenderEvent::Failed(e) => break Err(e),
                        RenderEvent::Rendering | RenderEvent::Progress(_) => {}
                    }
                }
                Err(_) => break Err(RenderError::Worker("render worker exited".to_string())),
            }
        };
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        result
    }

    fn track(&mut self, event: &RenderEvent) {
        match event {
            RenderEvent::Progress(p) => self.progress = self.progress.max(*p),
            RenderEvent::Complete(_) => self.progress = 1.0,
            RenderEvent::Failed(_) => self.progress = 0.0,
            RenderEvent::Rendering => {}
        }
    }
}

impl Drop for RenderJob {
    /// An abandoned job stops at its next cancellation check and frees the
    /// service for the next export.
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SharedBuffer;
    use crate::dsp::effects::EffectState;
    use crate::dsp::equalizer::MasterEqualizer;
    use crate::dsp::graph::{ClipMix, RowMix};

    fn tone(frames: usize, rate: u32, channels: usize) -> SharedBuffer {
        let data: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        Arc::new(AudioBuffer::from_planar(vec![data; channels], rate).unwrap())
    }

    fn snapshot(rate: u32, channels: usize, frames: usize) -> MixSnapshot {
        MixSnapshot {
            sample_rate: rate,
            channels,
            rows: vec![RowMix {
                gain: 1.0,
                muted: false,
                soloed: false,
                clips: vec![ClipMix {
                    buffer: tone(frames, rate, channels),
                    start: 0.0,
                    gain: 1.0,
                    effects: EffectState::default(),
                }],
            }],
            equalizer: MasterEqualizer::default(),
        }
    }

    #[test]
    fn sample_conversion_scales_by_sign() {
        assert_eq!(sample_to_i16(1.0), 32767);
        assert_eq!(sample_to_i16(-1.0), -32768);
        assert_eq!(sample_to_i16(2.0), 32767);
        assert_eq!(sample_to_i16(-7.0), -32768);
        assert_eq!(sample_to_i16(0.0), 0);
        assert_eq!(sample_to_i16(0.5), 16383);
        assert_eq!(sample_to_i16(-0.5), -16384);
        assert_eq!(sample_to_i16(f32::NAN), 0);
    }

    #[test]
    fn wav_header_valid() {
        let wav = wav_header(1000, 2, 44100);
        assert_eq!(wav.len(), 44);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        let riff_size = u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]);
        let fmt_size = u32::from_le_bytes([wav[16], wav[17], wav[18], wav[19]]);
        let format = u16::from_le_bytes([wav[20], wav[21]]);
        let ch = u16::from_le_bytes([wav[22], wav[23]]);
        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        let byte_rate = u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]);
        let block_align = u16::from_le_bytes([wav[32], wav[33]]);
        let bits = u16::from_le_bytes([wav[34], wav[35]]);
        let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);

        assert_eq!(fmt_size, 16);
        assert_eq!(format, 1);
        assert_eq!(ch, 2);
        assert_eq!(sr, 44100);
        assert_eq!(byte_rate, 44100 * 2 * 2);
        assert_eq!(block_align, 4);
        assert_eq!(bits, 16);
        assert_eq!(data_size, 1000 * 2 * 2);
        assert_eq!(riff_size, 36 + data_size);
    }

    #[test]
    fn exported_file_loads_back() {
        let buffer = render_offline(&snapshot(22050, 2, 5000), 128, None).unwrap();
        let wav = encode_wav(buffer.clone());
        assert_eq!(wav.len(), 44 + 5000 * 2 * 2);

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration(), 5000);

        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        let expected: Vec<i16> = buffer.to_interleaved().into_iter().map(sample_to_i16).collect();
        assert_eq!(samples, expected);
    }

    #[test]
    fn chunked_progress_is_monotonic() {
        let buffer = AudioBuffer::silence(1000, 1, 8000).unwrap();
        let mut encoder = WavEncoder::new(buffer, 300);
        let mut seen = vec![encoder.progress()];
        loop {
            match encoder.step() {
                EncodeStep::Progress(p) => seen.push(p),
                EncodeStep::Finished => break,
            }
        }
        assert_eq!(seen, vec![0.0, 0.3, 0.6, 0.9]);
        assert_eq!(encoder.progress(), 1.0);
        assert_eq!(encoder.into_bytes().len(), 44 + 2000);
    }

    #[test]
    fn empty_project_is_rejected() {
        let mut snap = snapshot(8000, 1, 10);
        snap.rows.clear();
        assert_eq!(render_offline(&snap, 128, None).unwrap_err(), RenderError::EmptyProject);
    }

    #[test]
    fn cancelled_render_discards_output() {
        let cancel = AtomicBool::new(true);
        let result = render_offline(&snapshot(8000, 1, 1000), 128, Some(&cancel));
        assert_eq!(result.unwrap_err(), RenderError::Cancelled);
    }

    #[test]
    fn render_is_deterministic() {
        let mut snap = snapshot(16000, 2, 4000);
        snap.rows[0].clips[0].effects.room = true;
        snap.rows[0].clips[0].effects.texture = true;
        let a = render_offline(&snap, 128, None).unwrap();
        let b = render_offline(&snap, 1024, None).unwrap();
        assert!(a.same_samples(&b));
    }

    #[test]
    fn offline_matches_realtime_engine() {
        use crate::dsp::engine::{EngineCommand, engine_channel};

        let mut snap = snapshot(8000, 2, 3000);
        snap.rows[0].clips[0].start = 0.05;
        snap.rows[0].clips[0].effects.resonant_echo = true;
        snap.equalizer.set_band(3, 6.0);
        let offline = render_offline(&snap, 128, None).unwrap().to_interleaved();

        let config = StudioConfig::with_layout(8000, 2);
        let (mut handle, mut engine) = engine_channel(&config);
        let graph = PlaybackGraph::build(&snap, 0.0, handle.nodes());
        handle
            .send(EngineCommand::Start { session: 1, graph: Box::new(graph) })
            .unwrap();

        let mut online = Vec::new();
        let mut block = vec![0.0_f32; 100 * 2];
        while online.len() < offline.len() {
            engine.process(&mut block);
            online.extend_from_slice(&block);
        }
        online.truncate(offline.len());
        assert_eq!(online, offline);
    }

    #[test]
    fn bypassed_equalizer_is_transparent() {
        let flat = snapshot(8000, 1, 2000);
        let mut bypassed = flat.clone();
        bypassed.equalizer.set_preset(crate::dsp::equalizer::EqPreset::Telephone, true);
        bypassed.equalizer.set_bypass(true);

        let a = render_offline(&flat, 128, None).unwrap();
        let b = render_offline(&bypassed, 128, None).unwrap();
        assert!(a.same_samples(&b));
    }

    #[test]
    fn background_job_completes_with_wav() {
        let config = StudioConfig::with_layout(8000, 1);
        let service = RenderService::new(&StudioConfig {
            export_chunk_frames: 256,
            ..config
        });
        let job = service.start(snapshot(8000, 1, 2000)).unwrap();
        let wav = job.wait().unwrap();
        assert_eq!(wav.len(), 44 + 4000);
        assert!(!service.is_busy());
    }

    #[test]
    fn overlapping_jobs_are_rejected() {
        let service = RenderService::new(&StudioConfig::with_layout(8000, 1));
        service.busy.store(true, Ordering::SeqCst);
        assert_eq!(service.start(snapshot(8000, 1, 100)).unwrap_err(), RenderError::Busy);
        service.busy.store(false, Ordering::SeqCst);
        let job = service.start(snapshot(8000, 1, 100)).unwrap();
        job.wait().unwrap();
    }

    #[test]
    fn dropped_job_is_cancelled_and_frees_the_service() {
        let service = RenderService::new(&StudioConfig::with_layout(8000, 2));
        let job = service.start(snapshot(8000, 2, 8000 * 120)).unwrap();
        let flag = Arc::clone(&job.cancel);
        drop(job);
        assert!(flag.load(Ordering::Relaxed));

        let deadline = Instant::now() + std::time::Duration::from_secs(10);
        while service.is_busy() && Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!service.is_busy());
        service.start(snapshot(8000, 1, 100)).unwrap().wait().unwrap();
    }
}
