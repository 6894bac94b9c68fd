//! # seqplay
//!
//! Real-time playback of pre-computed MIDI sequences. A [`Transport`] owns
//! the sequence (a time-ordered [`PlaybackCache`]) and a single [`Player`],
//! which runs on its own thread, paces events against the tempo map, and
//! guarantees that every note it switched on is switched off again, however
//! the run ends.
//!
//! ## Modules
//!
//! - `audio`: the player, the transport facade, and concrete destinations
//!   (an in-memory collector and a `midir` output port).
//!
//! The data model (messages, cache, tempo map, configuration) lives in the
//! `seqplay-core` crate and is re-exported here.

pub mod audio;

// Re-export commonly used types for convenience
pub use crate::audio::{
    MessageCollector, MidiPortQueue, Player, PlayerState, RunOutcome, StopHandle, Transport,
    TransportContext, TransportEvent,
};
pub use seqplay_core::types::{EngineTimings, TransportSettings};
pub use seqplay_core::{
    Clock, Destination, MidiMessage, MidiQueue, PlaybackCache, PlaybackConfig, PlaybackError,
    SystemClock, TempoMap, TimedMidiMessage, VirtualClock,
};
