pub mod cache;
pub mod destination;
pub mod held_notes;
pub mod midi_message;
pub mod playback_config;
pub mod tempo_map;

pub use cache::{CachedMidiMessage, PlaybackCache, PlaybackCacheBuilder};
pub use destination::{Destination, MidiQueue};
pub use held_notes::{HeldNote, HeldNotes};
pub use midi_message::{MidiMessage, TimedMidiMessage};
pub use playback_config::{EngineTimings, PlaybackConfig, TransportSettings};
pub use tempo_map::{TempoMap, TimeAndTempo};
