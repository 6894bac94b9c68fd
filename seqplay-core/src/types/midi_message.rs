//! MIDI message model
//!
//! Only the messages the playback engine needs to reason about get their own
//! variants; everything else travels as raw bytes.

/// Default tempo: 120 BPM = 500ms per quarter note
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

/// Controller numbers for channel mode messages
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_RESET_ALL_CONTROLLERS: u8 = 121;
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// A single MIDI message
///
/// Channels are 1-based (1..=16).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MidiMessage {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// Tempo meta event (FF 51 03)
    Tempo { micros_per_quarter: u32 },
    /// System real-time start (0xFA)
    Start,
    /// System real-time stop (0xFC)
    Stop,
    Other(Vec<u8>),
}

impl MidiMessage {
    pub fn note_on(channel: u8, key: u8, velocity: u8) -> Self {
        MidiMessage::NoteOn {
            channel,
            key,
            velocity,
        }
    }

    pub fn note_off(channel: u8, key: u8) -> Self {
        MidiMessage::NoteOff {
            channel,
            key,
            velocity: 0,
        }
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        MidiMessage::ControlChange {
            channel,
            controller,
            value,
        }
    }

    /// Tempo meta event from a BPM value
    pub fn tempo_bpm(bpm: f64) -> Self {
        let micros = (60_000_000.0 / bpm.max(1.0)).round() as u32;
        MidiMessage::Tempo {
            micros_per_quarter: micros.max(1),
        }
    }

    /// A note-on with velocity 0 counts as a note-off
    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiMessage::NoteOn { velocity, .. } if *velocity > 0)
    }

    pub fn is_note_off(&self) -> bool {
        match self {
            MidiMessage::NoteOff { .. } => true,
            MidiMessage::NoteOn { velocity, .. } => *velocity == 0,
            _ => false,
        }
    }

    pub fn is_tempo_meta_event(&self) -> bool {
        matches!(self, MidiMessage::Tempo { .. })
    }

    /// Key number for note messages
    pub fn note_number(&self) -> Option<u8> {
        match self {
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => Some(*key),
            _ => None,
        }
    }

    /// Channel for channel voice messages
    pub fn channel(&self) -> Option<u8> {
        match self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ControlChange { channel, .. } => Some(*channel),
            _ => None,
        }
    }

    /// Tempo in milliseconds per quarter note, for tempo meta events
    pub fn tempo_ms_per_quarter(&self) -> Option<f64> {
        match self {
            MidiMessage::Tempo { micros_per_quarter } => Some(*micros_per_quarter as f64 / 1000.0),
            _ => None,
        }
    }

    /// Raw wire bytes. Meta events have no live wire form and yield `None`.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => Some(vec![0x90 | status_channel(*channel), key & 0x7F, velocity & 0x7F]),
            MidiMessage::NoteOff {
                channel,
                key,
                velocity,
            } => Some(vec![0x80 | status_channel(*channel), key & 0x7F, velocity & 0x7F]),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => Some(vec![
                0xB0 | status_channel(*channel),
                controller & 0x7F,
                value & 0x7F,
            ]),
            MidiMessage::Tempo { .. } => None,
            MidiMessage::Start => Some(vec![0xFA]),
            MidiMessage::Stop => Some(vec![0xFC]),
            MidiMessage::Other(bytes) => Some(bytes.clone()),
        }
    }
}

/// 1-based channel to the low nibble of a status byte
fn status_channel(channel: u8) -> u8 {
    channel.saturating_sub(1) & 0x0F
}

/// A message as it is enqueued to a destination
#[derive(Debug, Clone, PartialEq)]
pub struct TimedMidiMessage {
    /// Wall-clock time in seconds at which the message was dispatched
    pub timestamp_secs: f64,
    pub message: MidiMessage,
}

impl TimedMidiMessage {
    pub fn new(timestamp_secs: f64, message: MidiMessage) -> Self {
        Self {
            timestamp_secs,
            message,
        }
    }
}
