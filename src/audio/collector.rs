//! In-memory instrument queue
//!
//! Collects time-stamped messages for a consumer on another thread (a synth
//! render callback, a test, a MIDI monitor).

use crossbeam_channel::{unbounded, Receiver, Sender};
use seqplay_core::types::{MidiQueue, TimedMidiMessage};
use std::sync::Arc;

pub struct MessageCollector {
    name: String,
    tx: Sender<TimedMidiMessage>,
    rx: Receiver<TimedMidiMessage>,
}

impl MessageCollector {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            name: name.into(),
            tx,
            rx,
        }
    }

    /// Shared collector, ready to wrap in a `Destination`
    pub fn new_shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<TimedMidiMessage> {
        self.rx.try_iter().collect()
    }

    /// A receiver for blocking consumers
    pub fn receiver(&self) -> Receiver<TimedMidiMessage> {
        self.rx.clone()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl MidiQueue for MessageCollector {
    fn add_message_to_queue(&self, message: TimedMidiMessage) {
        // Cannot fail: the collector holds its own receiver
        let _ = self.tx.send(message);
    }

    fn name(&self) -> &str {
        &self.name
    }
}
