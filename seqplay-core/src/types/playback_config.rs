//! Configuration for playback runs

use crate::error::PlaybackError;
use crate::types::midi_message::DEFAULT_MICROS_PER_QUARTER;
use std::time::Duration;

/// Parameters of a single playback run
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlaybackConfig {
    /// First beat to play
    pub start_beat: f32,
    /// Beat at which playback ends (or wraps, when looping)
    pub end_beat: f32,
    /// Rewind to `start_beat` on reaching `end_beat`
    pub looped: bool,
    /// Notify transport listeners about seek/tempo/stop
    pub broadcast: bool,
}

impl PlaybackConfig {
    /// A single, silent pass over `[start_beat, end_beat]`
    pub fn new(start_beat: f32, end_beat: f32) -> Self {
        Self {
            start_beat,
            end_beat,
            looped: false,
            broadcast: false,
        }
    }

    /// Enable looping
    pub fn with_looping(mut self) -> Self {
        self.looped = true;
        self
    }

    /// Enable transport notifications
    pub fn with_broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Reject ranges that would make pacing meaningless
    pub fn validate(&self) -> Result<(), PlaybackError> {
        if !self.start_beat.is_finite() || !self.end_beat.is_finite() {
            return Err(PlaybackError::NonFiniteBeat);
        }
        if self.end_beat < self.start_beat {
            return Err(PlaybackError::InvalidRange {
                start: self.start_beat,
                end: self.end_beat,
            });
        }
        // A zero-length loop would rewind forever without sleeping
        if self.looped && self.end_beat == self.start_beat {
            return Err(PlaybackError::EmptyLoop {
                beat: self.start_beat,
            });
        }
        Ok(())
    }
}

/// Timing knobs of the playback thread
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineTimings {
    /// Longest single sleep between two cancellation checks
    pub poll_slice: Duration,
    /// Pause after flushing held notes so instruments can drain their queues
    pub flush_grace: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            poll_slice: Duration::from_millis(1000),
            flush_grace: Duration::from_millis(50),
        }
    }
}

impl EngineTimings {
    pub fn with_poll_slice(mut self, poll_slice: Duration) -> Self {
        // Zero would turn every wait into a spin
        self.poll_slice = poll_slice.max(Duration::from_millis(1));
        self
    }

    pub fn with_flush_grace(mut self, flush_grace: Duration) -> Self {
        self.flush_grace = flush_grace;
        self
    }
}

/// Transport-wide settings
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransportSettings {
    /// Tempo used before the first tempo event
    pub default_bpm: f64,
    pub timings: EngineTimings,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            default_bpm: 120.0,
            timings: EngineTimings::default(),
        }
    }
}

impl TransportSettings {
    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.default_bpm = bpm;
        self
    }

    pub fn with_timings(mut self, timings: EngineTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Falls back to 120 BPM when `default_bpm` is not a positive finite number
    pub fn default_ms_per_quarter(&self) -> f64 {
        if self.default_bpm.is_finite() && self.default_bpm > 0.0 {
            60_000.0 / self.default_bpm.max(1.0)
        } else {
            DEFAULT_MICROS_PER_QUARTER as f64 / 1000.0
        }
    }
}
