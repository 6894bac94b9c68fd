//! Playback cache: every track's events merged into one time-ordered list
//!
//! The event storage is shared between clones; each clone carries its own
//! cursor, so a playback thread can seek and pull without touching anyone
//! else's position.

use crate::types::destination::Destination;
use crate::types::midi_message::MidiMessage;
use std::collections::HashSet;
use std::sync::Arc;

/// One cached event, tagged with the queue it is played into
#[derive(Debug, Clone)]
pub struct CachedMidiMessage {
    /// Position in beats
    pub beat: f32,
    pub message: MidiMessage,
    pub destination: Destination,
}

/// Pre-sorted, seekable view over all playback events
#[derive(Debug, Clone)]
pub struct PlaybackCache {
    events: Arc<[CachedMidiMessage]>,
    cursor: usize,
}

impl Default for PlaybackCache {
    fn default() -> Self {
        Self {
            events: Arc::from(Vec::new()),
            cursor: 0,
        }
    }
}

impl PlaybackCache {
    pub fn builder() -> PlaybackCacheBuilder {
        PlaybackCacheBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Move the cursor to the first event at or after `beat`
    pub fn seek_to_time(&mut self, beat: f32) {
        self.cursor = self.events.partition_point(|e| e.beat < beat);
    }

    /// Pull the event under the cursor and advance
    pub fn next_message(&mut self) -> Option<CachedMidiMessage> {
        let event = self.events.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(event)
    }

    /// Distinct destinations, in order of first appearance
    pub fn unique_destinations(&self) -> Vec<Destination> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .filter(|e| seen.insert(e.destination.clone()))
            .map(|e| e.destination.clone())
            .collect()
    }

    /// All events, independent of the cursor
    pub fn events(&self) -> &[CachedMidiMessage] {
        &self.events
    }

    /// Beat of the last event, or 0 for an empty cache
    pub fn last_beat(&self) -> f32 {
        self.events.last().map(|e| e.beat).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Collects per-track sequences and merges them into a [`PlaybackCache`]
#[derive(Default)]
pub struct PlaybackCacheBuilder {
    events: Vec<CachedMidiMessage>,
}

impl PlaybackCacheBuilder {
    /// Add one track's events, all routed to `destination`
    pub fn add_sequence<I>(mut self, destination: &Destination, events: I) -> Self
    where
        I: IntoIterator<Item = (f32, MidiMessage)>,
    {
        self.events.extend(events.into_iter().map(|(beat, message)| {
            CachedMidiMessage {
                beat,
                message,
                destination: destination.clone(),
            }
        }));
        self
    }

    /// Add a single event
    pub fn add_event(mut self, beat: f32, message: MidiMessage, destination: &Destination) -> Self {
        self.events.push(CachedMidiMessage {
            beat,
            message,
            destination: destination.clone(),
        });
        self
    }

    pub fn build(mut self) -> PlaybackCache {
        // Stable: events at the same beat keep insertion order, so a note-off
        // added before a note-on at the same beat is still sent first
        self.events.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        PlaybackCache {
            events: self.events.into(),
            cursor: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::destination::MidiQueue;
    use crate::types::midi_message::TimedMidiMessage;

    struct Null;

    impl MidiQueue for Null {
        fn add_message_to_queue(&self, _message: TimedMidiMessage) {}
    }

    fn beats(cache: &mut PlaybackCache) -> Vec<f32> {
        std::iter::from_fn(|| cache.next_message())
            .map(|e| e.beat)
            .collect()
    }

    #[test]
    fn test_merge_is_time_ordered() {
        let piano = Destination::new(Null);
        let drums = Destination::new(Null);

        let mut cache = PlaybackCache::builder()
            .add_sequence(
                &piano,
                vec![
                    (0.0, MidiMessage::note_on(1, 60, 100)),
                    (2.0, MidiMessage::note_off(1, 60)),
                ],
            )
            .add_sequence(
                &drums,
                vec![
                    (1.0, MidiMessage::note_on(10, 36, 100)),
                    (1.5, MidiMessage::note_off(10, 36)),
                ],
            )
            .build();

        assert_eq!(beats(&mut cache), vec![0.0, 1.0, 1.5, 2.0]);
        assert_eq!(cache.last_beat(), 2.0);
    }

    #[test]
    fn test_seek_lands_on_first_event_at_or_after_beat() {
        let dest = Destination::new(Null);
        let mut cache = PlaybackCache::builder()
            .add_sequence(
                &dest,
                (0..8).map(|i| (i as f32, MidiMessage::note_on(1, 60 + i as u8, 100))),
            )
            .build();

        cache.seek_to_time(2.5);
        assert_eq!(cache.next_message().map(|e| e.beat), Some(3.0));

        cache.seek_to_time(5.0);
        assert_eq!(cache.next_message().map(|e| e.beat), Some(5.0));

        cache.seek_to_time(100.0);
        assert!(cache.next_message().is_none());

        cache.seek_to_time(-1.0);
        assert_eq!(cache.next_message().map(|e| e.beat), Some(0.0));
    }

    #[test]
    fn test_clones_have_independent_cursors() {
        let dest = Destination::new(Null);
        let mut a = PlaybackCache::builder()
            .add_event(0.0, MidiMessage::Start, &dest)
            .add_event(1.0, MidiMessage::Stop, &dest)
            .build();

        a.next_message();
        let mut b = a.clone();
        b.seek_to_time(0.0);

        assert_eq!(a.next_message().map(|e| e.beat), Some(1.0));
        assert_eq!(b.next_message().map(|e| e.beat), Some(0.0));
    }

    #[test]
    fn test_unique_destinations() {
        let piano = Destination::new(Null);
        let drums = Destination::new(Null);

        let cache = PlaybackCache::builder()
            .add_event(0.0, MidiMessage::note_on(1, 60, 100), &piano)
            .add_event(0.5, MidiMessage::note_on(10, 36, 100), &drums)
            .add_event(1.0, MidiMessage::note_off(1, 60), &piano)
            .build();

        let unique = cache.unique_destinations();
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0], piano);
        assert_eq!(unique[1], drums);
    }

    #[test]
    fn test_same_beat_keeps_insertion_order() {
        let dest = Destination::new(Null);
        let mut cache = PlaybackCache::builder()
            .add_event(1.0, MidiMessage::note_off(1, 60), &dest)
            .add_event(1.0, MidiMessage::note_on(1, 60, 100), &dest)
            .build();

        assert!(cache.next_message().unwrap().message.is_note_off());
        assert!(cache.next_message().unwrap().message.is_note_on());
    }

    #[test]
    fn test_empty_cache() {
        let mut cache = PlaybackCache::empty();
        cache.seek_to_time(0.0);
        assert!(cache.next_message().is_none());
        assert!(cache.unique_destinations().is_empty());
        assert_eq!(cache.last_beat(), 0.0);
    }
}
