//! Notes that have been switched on but not yet off
//!
//! Kept so that an interrupted run can release everything it started. Some
//! instruments ignore the all-notes-off controller, so explicit note-offs
//! are the only reliable way out.

use crate::types::destination::Destination;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldNote {
    pub key: u8,
    pub channel: u8,
    pub destination: Destination,
}

/// Ordered list of held notes
///
/// Duplicate note-ons for the same (key, channel, destination) are kept as
/// separate entries; each note-off releases only the first match.
#[derive(Debug, Default)]
pub struct HeldNotes {
    notes: Vec<HeldNote>,
}

impl HeldNotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_on(&mut self, key: u8, channel: u8, destination: &Destination) {
        self.notes.push(HeldNote {
            key,
            channel,
            destination: destination.clone(),
        });
    }

    /// Release the first matching entry. Returns false if nothing matched.
    pub fn note_off(&mut self, key: u8, channel: u8, destination: &Destination) -> bool {
        let position = self
            .notes
            .iter()
            .position(|n| n.key == key && n.channel == channel && n.destination == *destination);

        match position {
            Some(index) => {
                self.notes.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove and return everything still held, in note-on order
    pub fn drain(&mut self) -> Vec<HeldNote> {
        std::mem::take(&mut self.notes)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
