//! # seqplay Core
//!
//! Threading-free building blocks for MIDI sequence playback: the message
//! model, instrument destinations, the time-ordered playback cache, the
//! tempo map and the held-note bookkeeping used to avoid stuck notes.
//!
//! ## Features
//!
//! - **serde**: Serialize/deserialize playback configuration types
//!
//! ## Example
//!
//! ```ignore
//! use seqplay_core::types::{Destination, MidiMessage, PlaybackCache, TempoMap};
//!
//! let cache = PlaybackCache::builder()
//!     .add_sequence(&piano, vec![(0.0, MidiMessage::note_on(1, 60, 100))])
//!     .build();
//! let tempo = TempoMap::from_cache(&cache, 500.0);
//! ```

pub mod clock;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, SystemClock, VirtualClock};
pub use error::PlaybackError;
pub use types::{
    Destination, MidiMessage, MidiQueue, PlaybackCache, PlaybackConfig, TempoMap,
    TimedMidiMessage,
};
