//! Instrument message queues
//!
//! A destination is an instrument's inbound queue. The engine only ever
//! appends to it; draining and synthesis happen elsewhere.

use crate::types::midi_message::TimedMidiMessage;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Something that accepts time-stamped MIDI messages
///
/// Implementations must tolerate concurrent producers.
pub trait MidiQueue: Send + Sync {
    fn add_message_to_queue(&self, message: TimedMidiMessage);

    /// Human-readable name, used in logs
    fn name(&self) -> &str {
        "queue"
    }
}

/// Shared handle to a [`MidiQueue`] with identity semantics
///
/// Two destinations are equal when they point at the same queue.
#[derive(Clone)]
pub struct Destination(Arc<dyn MidiQueue>);

impl Destination {
    pub fn new<Q: MidiQueue + 'static>(queue: Q) -> Self {
        Destination(Arc::new(queue))
    }

    pub fn from_arc(queue: Arc<dyn MidiQueue>) -> Self {
        Destination(queue)
    }

    pub fn send(&self, message: TimedMidiMessage) {
        self.0.add_message_to_queue(message);
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Destination {}

impl Hash for Destination {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Destination({} @ {:p})", self.name(), self.addr())
    }
}
