//! Transport: playhead clock and play/stop/seek state machine.
//!
//! The transport does not render anything. It samples a [`Clock`] (in
//! practice the engine's frame counter) and tells the studio when a
//! session has to be started, restarted or torn down.

use crate::dsp::engine::EngineClock;

pub const ZOOM_MIN: f64 = 10.0;
pub const ZOOM_MAX: f64 = 2000.0;

/// A monotonic time source in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

impl Clock for EngineClock {
    fn now(&self) -> f64 {
        self.seconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportState {
    Stopped,
    /// `reference` is the clock time at which the playhead was 0.
    Playing { reference: f64 },
}

/// Result of sampling the clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    Stopped,
    Playing(f64),
    /// The playhead hit the project end; the playhead is back at 0.
    AutoStopped,
}

#[derive(Debug, Clone)]
pub struct Transport {
    state: TransportState,
    playhead: f64,
    zoom: f64,
}

impl Default for Transport {
    fn default() -> Self {
        Transport {
            state: TransportState::Stopped,
            playhead: 0.0,
            zoom: 100.0,
        }
    }
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, TransportState::Playing { .. })
    }

    /// Playhead in seconds as of the last tick or transition.
    pub fn playhead(&self) -> f64 {
        self.playhead
    }

    /// Stopped → Playing. Returns false when already playing.
    pub fn play(&mut self, now: f64) -> bool {
        if self.is_playing() {
            return false;
        }
        self.state = TransportState::Playing {
            reference: now - self.playhead,
        };
        true
    }

    /// Playing → Stopped, freezing the playhead where it is.
    /// Returns false when already stopped.
    pub fn stop(&mut self, now: f64) -> bool {
        let TransportState::Playing { reference } = self.state else {
            return false;
        };
        self.playhead = (now - reference).max(0.0);
        self.state = TransportState::Stopped;
        true
    }

    /// Move the playhead. Returns true when playback must be restarted
    /// from the new position.
    pub fn seek(&mut self, time: f64, now: f64) -> bool {
        self.playhead = time.max(0.0);
        match self.state {
            TransportState::Playing { .. } => {
                self.state = TransportState::Playing {
                    reference: now - self.playhead,
                };
                true
            }
            TransportState::Stopped => false,
        }
    }

    /// Seek relative to the current playhead.
    pub fn nudge(&mut self, delta: f64, now: f64) -> bool {
        let current = self.position(now);
        self.seek(current + delta, now)
    }

    /// Current position without mutating state.
    pub fn position(&self, now: f64) -> f64 {
        match self.state {
            TransportState::Playing { reference } => (now - reference).max(0.0),
            TransportState::Stopped => self.playhead,
        }
    }

    /// Sample the clock. Stops and rewinds to 0 once `end` is reached.
    pub fn tick(&mut self, now: f64, end: f64) -> Tick {
        let TransportState::Playing { reference } = self.state else {
            return Tick::Stopped;
        };
        let position = (now - reference).max(0.0);
        if position >= end {
            self.state = TransportState::Stopped;
            self.playhead = 0.0;
            return Tick::AutoStopped;
        }
        self.playhead = position;
        Tick::Playing(position)
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Pixels per second, clamped.
    pub fn set_zoom(&mut self, pixels_per_second: f64) {
        if !pixels_per_second.is_nan() {
            self.zoom = pixels_per_second.clamp(ZOOM_MIN, ZOOM_MAX);
        }
    }

    pub fn time_to_pixels(&self, seconds: f64) -> f64 {
        seconds * self.zoom
    }

    pub fn pixels_to_time(&self, pixels: f64) -> f64 {
        (pixels / self.zoom).max(0.0)
    }
}
