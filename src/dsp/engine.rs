//! Realtime engine: the audio-thread half of playback.
//!
//! The control thread never calls into the engine directly. It pushes
//! [`EngineCommand`]s through a wait-free SPSC queue; the engine applies
//! them at the start of each callback, before rendering. Graphs that stop
//! playing are pushed back through a second queue so their memory is
//! released on the control thread, not inside the audio callback.
//!
//! ```ignore
//! let (mut handle, mut engine) = engine_channel(&config);
//! // audio thread / AudioWorklet:
//! engine.process(&mut output_block);
//! // control thread:
//! handle.send(EngineCommand::Stop)?;
//! handle.collect_retired();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::config::StudioConfig;
use crate::error::InvalidOperation;

use super::graph::{NodeCounter, PlaybackGraph};

/// Commands sent from the control thread to the audio thread.
///
/// Graphs are boxed so the enum stays pointer-sized in the queue.
#[derive(Debug)]
pub enum EngineCommand {
    /// Replace the current session with a freshly built graph.
    Start { session: u64, graph: Box<PlaybackGraph> },
    /// Tear down the current session and any preview.
    Stop,
    /// Play a short preview burst on top of whatever is playing.
    Preview { graph: Box<PlaybackGraph> },
}

/// Sample-accurate engine clock, advanced by the audio thread.
#[derive(Debug)]
pub struct EngineClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl EngineClock {
    pub fn new(sample_rate: u32) -> Self {
        EngineClock {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Frames rendered since the engine started.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Engine time in seconds.
    pub fn seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

/// Control-thread side of the engine.
pub struct EngineHandle {
    commands: Producer<EngineCommand>,
    retired: Consumer<Box<PlaybackGraph>>,
    clock: Arc<EngineClock>,
    nodes: NodeCounter,
}

impl EngineHandle {
    /// Queue a command. Fails without blocking when the queue is full.
    pub fn send(&mut self, command: EngineCommand) -> Result<(), InvalidOperation> {
        self.commands
            .push(command)
            .map_err(|_| InvalidOperation::CommandQueueFull)
    }

    /// Drop graphs the engine has finished with. Returns how many.
    pub fn collect_retired(&mut self) -> usize {
        let mut count = 0;
        while let Ok(graph) = self.retired.pop() {
            drop(graph);
            count += 1;
        }
        count
    }

    pub fn clock(&self) -> &Arc<EngineClock> {
        &self.clock
    }

    /// Node counter shared with every graph built for this engine.
    pub fn nodes(&self) -> &NodeCounter {
        &self.nodes
    }
}

/// Audio-thread side: renders the active session into host buffers.
pub struct PlaybackEngine {
    commands: Consumer<EngineCommand>,
    retired: Producer<Box<PlaybackGraph>>,
    clock: Arc<EngineClock>,
    channels: usize,
    session: Option<(u64, Box<PlaybackGraph>)>,
    preview: Option<Box<PlaybackGraph>>,
}

/// Create a connected handle/engine pair.
pub fn engine_channel(config: &StudioConfig) -> (EngineHandle, PlaybackEngine) {
    let (command_tx, command_rx) = RingBuffer::new(config.command_capacity);
    // Each command retires at most two graphs.
    let (retired_tx, retired_rx) = RingBuffer::new(config.command_capacity * 2 + 2);
    let clock = Arc::new(EngineClock::new(config.sample_rate));

    let handle = EngineHandle {
        commands: command_tx,
        retired: retired_rx,
        clock: Arc::clone(&clock),
        nodes: NodeCounter::new(),
    };
    let engine = PlaybackEngine {
        commands: command_rx,
        retired: retired_tx,
        clock,
        channels: config.channels,
        session: None,
        preview: None,
    };
    (handle, engine)
}

impl PlaybackEngine {
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Id of the session currently playing.
    pub fn session(&self) -> Option<u64> {
        self.session.as_ref().map(|(id, _)| *id)
    }

    pub fn is_previewing(&self) -> bool {
        self.preview.is_some()
    }

    /// Render one host block of interleaved samples.
    pub fn process(&mut self, out: &mut [f32]) {
        self.process_commands();

        out.fill(0.0);
        if let Some((_, graph)) = self.session.as_mut() {
            graph.render(out);
        }
        if let Some(preview) = self.preview.as_mut() {
            preview.render_add(out);
            if preview.is_finished() {
                let done = self.preview.take();
                self.retire(done);
            }
        }

        self.clock.advance((out.len() / self.channels) as u64);
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                EngineCommand::Start { session, graph } => {
                    let old = self.session.replace((session, graph)).map(|(_, g)| g);
                    self.retire(old);
                    let preview = self.preview.take();
                    self.retire(preview);
                }
                EngineCommand::Stop => {
                    let old = self.session.take().map(|(_, g)| g);
                    self.retire(old);
                    let preview = self.preview.take();
                    self.retire(preview);
                }
                EngineCommand::Preview { graph } => {
                    let old = self.preview.replace(graph);
                    self.retire(old);
                }
            }
        }
    }

    fn retire(&mut self, graph: Option<Box<PlaybackGraph>>) {
        if let Some(graph) = graph {
            // A full queue means the control thread stopped collecting;
            // freeing here is the only option left.
            let _ = self.retired.push(graph);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;
    use crate::dsp::effects::EffectState;
    use crate::dsp::equalizer::MasterEqualizer;
    use crate::dsp::graph::{ClipMix, MixSnapshot, RowMix};

    fn config() -> StudioConfig {
        StudioConfig::with_layout(1000, 1)
    }

    fn snapshot() -> MixSnapshot {
        let buffer = Arc::new(AudioBuffer::from_planar(vec![vec![0.5; 500]], 1000).unwrap());
        MixSnapshot {
            sample_rate: 1000,
            channels: 1,
            rows: vec![RowMix {
                gain: 1.0,
                muted: false,
                soloed: false,
                clips: vec![ClipMix {
                    buffer,
                    start: 0.0,
                    gain: 1.0,
                    effects: EffectState::default(),
                }],
            }],
            equalizer: MasterEqualizer::default(),
        }
    }

    #[test]
    fn clock_advances_with_processed_frames() {
        let (handle, mut engine) = engine_channel(&config());
        let mut block = vec![0.0; 128];
        engine.process(&mut block);
        engine.process(&mut block);
        assert_eq!(handle.clock().frames(), 256);
        assert!((handle.clock().seconds() - 0.256).abs() < 1e-9);
    }

    #[test]
    fn start_and_stop_sessions() {
        let (mut handle, mut engine) = engine_channel(&config());
        let graph = PlaybackGraph::build(&snapshot(), 0.0, handle.nodes());
        handle
            .send(EngineCommand::Start { session: 7, graph: Box::new(graph) })
            .unwrap();

        let mut block = vec![0.0; 64];
        engine.process(&mut block);
        assert_eq!(engine.session(), Some(7));
        assert!(block.iter().all(|&s| s == 0.5));

        handle.send(EngineCommand::Stop).unwrap();
        engine.process(&mut block);
        assert_eq!(engine.session(), None);
        assert!(block.iter().all(|&s| s == 0.0));

        assert_eq!(handle.collect_retired(), 1);
        assert_eq!(handle.nodes().live(), 0);
    }

    #[test]
    fn repeated_cycles_leak_no_nodes() {
        let (mut handle, mut engine) = engine_channel(&config());
        let mut block = vec![0.0; 32];
        for session in 0..50 {
            let graph = PlaybackGraph::build(&snapshot(), 0.1, handle.nodes());
            handle
                .send(EngineCommand::Start { session, graph: Box::new(graph) })
                .unwrap();
            engine.process(&mut block);
            if session % 3 == 0 {
                handle.send(EngineCommand::Stop).unwrap();
                engine.process(&mut block);
            }
            handle.collect_retired();
        }
        handle.send(EngineCommand::Stop).unwrap();
        engine.process(&mut block);
        handle.collect_retired();
        assert_eq!(handle.nodes().live(), 0);
    }

    #[test]
    fn preview_retires_itself() {
        let (mut handle, mut engine) = engine_channel(&config());
        let graph = PlaybackGraph::build(&snapshot(), 0.2, handle.nodes()).with_limit(100);
        handle.send(EngineCommand::Preview { graph: Box::new(graph) }).unwrap();

        let mut block = vec![0.0; 64];
        engine.process(&mut block);
        assert!(engine.is_previewing());
        assert!(block.iter().all(|&s| s == 0.5));
        engine.process(&mut block);
        assert!(!engine.is_previewing());
        assert_eq!(&block[36..], &[0.0; 28]);
        assert_eq!(handle.collect_retired(), 1);
        assert_eq!(handle.nodes().live(), 0);
    }

    #[test]
    fn full_queue_is_reported() {
        let (mut handle, _engine) = engine_channel(&config());
        let mut failures = 0;
        for _ in 0..100 {
            if handle.send(EngineCommand::Stop).is_err() {
                failures += 1;
            }
        }
        assert_eq!(failures, 100 - config().command_capacity);
    }
}
