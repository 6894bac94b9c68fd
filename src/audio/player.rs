//! Real-time playback of a cached MIDI sequence
//!
//! A [`Player`] drives one run at a time on its own thread. The run walks the
//! playback cache, sleeps until each event is due, forwards it to the
//! event's destination and keeps track of held notes. Every exit path (end of
//! track or cancellation) goes through the same flush: note-offs for whatever
//! is still held, then a stop message to every destination.

use crate::audio::transport::TransportContext;
use crossbeam_channel::{bounded, Receiver};
use seqplay_core::clock::Clock;
use seqplay_core::types::{
    CachedMidiMessage, Destination, EngineTimings, HeldNotes, MidiMessage, PlaybackCache,
    PlaybackConfig, TimedMidiMessage,
};
use seqplay_core::PlaybackError;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle of the playback thread
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Running,
    /// Stop requested, thread still flushing
    Cancelling,
}

impl PlayerState {
    fn as_u8(self) -> u8 {
        match self {
            PlayerState::Stopped => 0,
            PlayerState::Running => 1,
            PlayerState::Cancelling => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerState::Running,
            2 => PlayerState::Cancelling,
            _ => PlayerState::Stopped,
        }
    }
}

/// How a run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reached the end beat in single-pass mode
    Finished,
    Cancelled,
}

/// Flags shared between the player, its stop handles and the worker thread
#[derive(Debug)]
pub(crate) struct Shared {
    cancel: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            state: AtomicU8::new(PlayerState::Stopped.as_u8()),
        }
    }

    fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PlayerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.cancel.store(true, Ordering::Release);
        let _ = self.state.compare_exchange(
            PlayerState::Running.as_u8(),
            PlayerState::Cancelling.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Requests cancellation of the current run without waiting for it
#[derive(Clone, Debug)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.is_cancelled()
    }
}

/// Owns the playback thread and its configuration
pub struct Player {
    transport: Arc<dyn TransportContext>,
    clock: Arc<dyn Clock>,
    timings: EngineTimings,
    config: Option<PlaybackConfig>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<RunOutcome>>,
    /// Disconnects once the current run's thread is done
    finished: Option<Receiver<()>>,
}

impl Player {
    pub fn new(
        transport: Arc<dyn TransportContext>,
        clock: Arc<dyn Clock>,
        timings: EngineTimings,
    ) -> Self {
        Self {
            transport,
            clock,
            timings,
            config: None,
            shared: Arc::new(Shared::new()),
            thread: None,
            finished: None,
        }
    }

    /// Set the parameters of the next run
    pub fn configure(&mut self, config: PlaybackConfig) -> Result<(), PlaybackError> {
        if self.is_running() {
            return Err(PlaybackError::AlreadyRunning);
        }
        config.validate()?;
        self.config = Some(config);
        Ok(())
    }

    pub fn config(&self) -> Option<&PlaybackConfig> {
        self.config.as_ref()
    }

    /// Spawn the playback thread for the configured run
    pub fn start(&mut self) -> Result<(), PlaybackError> {
        if self.is_running() {
            return Err(PlaybackError::AlreadyRunning);
        }
        let config = self.config.clone().ok_or(PlaybackError::NotConfigured)?;

        // A previous run may have ended on its own
        self.join();

        self.shared.cancel.store(false, Ordering::Release);
        self.shared.set_state(PlayerState::Running);

        let run = PlaybackRun::new(
            self.transport.clone(),
            self.clock.clone(),
            self.timings,
            config,
            self.shared.clone(),
        );

        let (finished_tx, finished_rx) = bounded::<()>(0);
        let spawned = thread::Builder::new()
            .name("seqplay-player".to_string())
            .spawn(move || {
                let _finished = finished_tx;
                run.run()
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                self.finished = Some(finished_rx);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(PlayerState::Stopped);
                Err(PlaybackError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Stop the current run and wait until it has flushed its notes
    ///
    /// Returns within one poll slice plus the flush grace period.
    pub fn cancel(&mut self) -> Option<RunOutcome> {
        if self.thread.is_none() {
            return None;
        }
        self.shared.request_stop();
        self.join()
    }

    /// Wait for the current run to end on its own
    pub fn join(&mut self) -> Option<RunOutcome> {
        self.finished = None;
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                log::error!(target: "playback", "playback thread panicked");
                self.shared.set_state(PlayerState::Stopped);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() != PlayerState::Stopped
    }

    pub fn state(&self) -> PlayerState {
        self.shared.state()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.shared.clone(),
        }
    }

    /// A receiver that disconnects when the current run has ended.
    /// Lets callers wait for the run without borrowing the player.
    pub fn finished(&self) -> Option<Receiver<()>> {
        self.finished.clone()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Why the main loop returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Exit {
    EndOfTrack,
    Cancelled,
}

/// State of one playback run, owned by the playback thread
pub(crate) struct PlaybackRun {
    transport: Arc<dyn TransportContext>,
    clock: Arc<dyn Clock>,
    timings: EngineTimings,
    config: PlaybackConfig,
    shared: Arc<Shared>,

    cache: PlaybackCache,
    destinations: Vec<Destination>,
    held_notes: HeldNotes,

    start_time_ms: f64,
    current_time_ms: f64,
    total_time_ms: f64,
    ms_per_quarter: f64,
    previous_beat: f32,
    /// Absolute clock time the next wait runs up to
    deadline_ms: f64,
}

impl PlaybackRun {
    pub(crate) fn new(
        transport: Arc<dyn TransportContext>,
        clock: Arc<dyn Clock>,
        timings: EngineTimings,
        config: PlaybackConfig,
        shared: Arc<Shared>,
    ) -> Self {
        let cache = transport.playback_cache();
        let destinations = cache.unique_destinations();
        Self {
            transport,
            clock,
            timings,
            previous_beat: config.start_beat,
            config,
            shared,
            cache,
            destinations,
            held_notes: HeldNotes::new(),
            start_time_ms: 0.0,
            current_time_ms: 0.0,
            total_time_ms: 0.0,
            ms_per_quarter: 0.0,
            deadline_ms: 0.0,
        }
    }

    pub(crate) fn run(mut self) -> RunOutcome {
        log::debug!(
            target: "playback",
            "starting run {}..{} (looped: {}, broadcast: {}, destinations: {})",
            self.config.start_beat,
            self.config.end_beat,
            self.config.looped,
            self.config.broadcast,
            self.destinations.len()
        );

        self.send_to_all(MidiMessage::Start);

        let exit = self.play();

        self.flush_held_notes_and_stop();

        let outcome = match exit {
            Exit::Cancelled => {
                log::debug!(target: "playback", "run cancelled");
                RunOutcome::Cancelled
            }
            Exit::EndOfTrack => {
                log::debug!(target: "playback", "run reached end beat {}", self.config.end_beat);
                self.transport.all_notes_controllers_and_sound_off();
                if self.config.broadcast {
                    self.transport.seek_to_beat(self.transport.seek_beat());
                    self.transport.broadcast_stop();
                }
                RunOutcome::Finished
            }
        };

        self.shared.set_state(PlayerState::Stopped);
        outcome
    }

    fn play(&mut self) -> Exit {
        let end_beat = self.config.end_beat;
        let looped = self.config.looped;

        self.total_time_ms = self
            .transport
            .find_time_and_tempo_at(self.transport.project_last_beat())
            .elapsed_ms;

        let start = self.transport.find_time_and_tempo_at(self.config.start_beat);
        self.start_time_ms = start.elapsed_ms;
        self.ms_per_quarter = start.ms_per_quarter;

        if self.config.broadcast {
            self.transport.broadcast_tempo_changed(self.ms_per_quarter);
        }

        self.rewind();
        self.deadline_ms = self.clock.now_ms();

        loop {
            let Some(event) = self.cache.next_message() else {
                // Nothing left: play out the rest of the range
                let delta_ms = self.ms_per_quarter * (end_beat - self.previous_beat) as f64;
                self.current_time_ms += delta_ms.max(0.0);
                self.previous_beat = self.previous_beat.max(end_beat);

                if !self.wait(delta_ms) {
                    return Exit::Cancelled;
                }

                if looped {
                    log::trace!(target: "playback", "end of cache, rewinding");
                    self.rewind();
                    continue;
                }
                return Exit::EndOfTrack;
            };

            let should_rewind = looped && event.beat > end_beat;
            let target_beat = if should_rewind { end_beat } else { event.beat };

            let delta_ms = self.ms_per_quarter * (target_beat - self.previous_beat) as f64;
            self.current_time_ms += delta_ms;
            self.previous_beat = target_beat;

            if delta_ms > 0.0 {
                if !self.wait(delta_ms) {
                    return Exit::Cancelled;
                }
                if self.config.broadcast {
                    self.transport.broadcast_seek(
                        self.previous_beat,
                        self.current_time_ms,
                        self.total_time_ms,
                    );
                }
            }

            if should_rewind {
                log::trace!(target: "playback", "event at {} past loop end, rewinding", event.beat);
                self.rewind();
                continue;
            }

            self.dispatch(event);
        }
    }

    /// Seek back to the start of the range
    fn rewind(&mut self) {
        self.cache.seek_to_time(self.config.start_beat);
        self.previous_beat = self.config.start_beat;
        self.current_time_ms = self.start_time_ms;
        if self.config.broadcast {
            self.transport.broadcast_seek(
                self.previous_beat,
                self.current_time_ms,
                self.total_time_ms,
            );
        }
    }

    fn dispatch(&mut self, event: CachedMidiMessage) {
        let CachedMidiMessage {
            beat,
            message,
            destination,
        } = event;
        let timestamp = self.clock.now_secs();

        log::trace!(target: "playback", "beat {}: {:?} -> {}", beat, message, destination.name());

        if let Some(ms_per_quarter) = message.tempo_ms_per_quarter() {
            if ms_per_quarter > 0.0 {
                self.ms_per_quarter = ms_per_quarter;
                if self.config.broadcast {
                    self.transport.broadcast_tempo_changed(ms_per_quarter);
                }
            } else {
                log::warn!(target: "playback", "ignoring zero tempo at beat {}", beat);
            }
            // Drum machines and arpeggiators on other tracks need the tempo too
            for dest in &self.destinations {
                dest.send(TimedMidiMessage::new(timestamp, message.clone()));
            }
        } else {
            destination.send(TimedMidiMessage::new(timestamp, message.clone()));
        }

        if let (Some(key), Some(channel)) = (message.note_number(), message.channel()) {
            if message.is_note_on() {
                self.held_notes.note_on(key, channel, &destination);
            } else if message.is_note_off() {
                self.held_notes.note_off(key, channel, &destination);
            }
        }
    }

    /// Sleep until the deadline moves `delta_ms` further, in bounded slices.
    /// Returns false if cancellation was requested.
    fn wait(&mut self, delta_ms: f64) -> bool {
        self.deadline_ms += delta_ms.max(0.0);
        let slice_ms = self.timings.poll_slice.as_secs_f64() * 1000.0;

        loop {
            let remaining_ms = self.deadline_ms - self.clock.now_ms();
            // Below a microsecond there is nothing left to sleep
            if remaining_ms < 0.001 {
                break;
            }
            self.clock
                .sleep(Duration::from_secs_f64(remaining_ms.min(slice_ms) / 1000.0));
            if self.shared.is_cancelled() {
                return false;
            }
        }

        !self.shared.is_cancelled()
    }

    fn send_to_all(&self, message: MidiMessage) {
        let timestamp = self.clock.now_secs();
        for dest in &self.destinations {
            dest.send(TimedMidiMessage::new(timestamp, message.clone()));
        }
    }

    /// Release every held note, stop every destination, give them time to drain
    fn flush_held_notes_and_stop(&mut self) {
        let held = self.held_notes.drain();
        log::debug!(target: "playback", "flushing {} held notes", held.len());

        let timestamp = self.clock.now_secs();
        for note in held {
            note.destination.send(TimedMidiMessage::new(
                timestamp,
                MidiMessage::note_off(note.channel, note.key),
            ));
        }

        self.send_to_all(MidiMessage::Stop);
        self.clock.sleep(self.timings.flush_grace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqplay_core::clock::VirtualClock;
    use seqplay_core::types::{MidiQueue, TempoMap, TimeAndTempo};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Seek(f32),
        Tempo(f64),
        Stop,
        SoundOff,
        SeekTo(f32),
    }

    struct FakeTransport {
        cache: PlaybackCache,
        tempo: TempoMap,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeTransport {
        fn new(cache: PlaybackCache, tempo: TempoMap) -> Arc<Self> {
            Arc::new(Self {
                cache,
                tempo,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &Call) -> usize {
            self.calls().iter().filter(|c| *c == call).count()
        }
    }

    impl TransportContext for FakeTransport {
        fn playback_cache(&self) -> PlaybackCache {
            self.cache.clone()
        }

        fn find_time_and_tempo_at(&self, beat: f32) -> TimeAndTempo {
            self.tempo.find_time_and_tempo_at(beat)
        }

        fn project_last_beat(&self) -> f32 {
            self.cache.last_beat()
        }

        fn seek_beat(&self) -> f32 {
            0.0
        }

        fn seek_to_beat(&self, beat: f32) {
            self.calls.lock().unwrap().push(Call::SeekTo(beat));
        }

        fn broadcast_seek(&self, beat: f32, _current_time_ms: f64, _total_time_ms: f64) {
            self.calls.lock().unwrap().push(Call::Seek(beat));
        }

        fn broadcast_tempo_changed(&self, ms_per_quarter: f64) {
            self.calls.lock().unwrap().push(Call::Tempo(ms_per_quarter));
        }

        fn broadcast_stop(&self) {
            self.calls.lock().unwrap().push(Call::Stop);
        }

        fn all_notes_controllers_and_sound_off(&self) {
            self.calls.lock().unwrap().push(Call::SoundOff);
        }
    }

    /// Records messages and requests a stop after `stop_after` note-ons
    struct Recorder {
        messages: Mutex<Vec<TimedMidiMessage>>,
        stop: Option<(StopHandle, usize)>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Vec::new()),
                stop: None,
            })
        }

        fn stopping_after(handle: StopHandle, note_ons: usize) -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Vec::new()),
                stop: Some((handle, note_ons)),
            })
        }

        fn messages(&self) -> Vec<TimedMidiMessage> {
            self.messages.lock().unwrap().clone()
        }

        fn kinds(&self) -> Vec<MidiMessage> {
            self.messages().into_iter().map(|m| m.message).collect()
        }

        fn times_of(&self, pred: impl Fn(&MidiMessage) -> bool) -> Vec<f64> {
            self.messages()
                .into_iter()
                .filter(|m| pred(&m.message))
                .map(|m| m.timestamp_secs)
                .collect()
        }
    }

    impl MidiQueue for Recorder {
        fn add_message_to_queue(&self, message: TimedMidiMessage) {
            let mut messages = self.messages.lock().unwrap();
            messages.push(message);
            if let Some((handle, limit)) = &self.stop {
                let note_ons = messages.iter().filter(|m| m.message.is_note_on()).count();
                if note_ons >= *limit {
                    handle.request_stop();
                }
            }
        }
    }

    fn run_with(
        transport: Arc<FakeTransport>,
        clock: Arc<VirtualClock>,
        config: PlaybackConfig,
        shared: Arc<Shared>,
    ) -> RunOutcome {
        shared.set_state(PlayerState::Running);
        PlaybackRun::new(transport, clock, EngineTimings::default(), config, shared).run()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_single_pass_plays_events_then_resets() {
        let recorder = Recorder::new();
        let dest = Destination::from_arc(recorder.clone());
        let cache = PlaybackCache::builder()
            .add_event(1.0, MidiMessage::note_on(1, 60, 100), &dest)
            .add_event(2.0, MidiMessage::note_off(1, 60), &dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::new(500.0));
        let clock = Arc::new(VirtualClock::new());
        let shared = Arc::new(Shared::new());

        let outcome = run_with(
            transport.clone(),
            clock.clone(),
            PlaybackConfig::new(0.0, 4.0).with_broadcast(),
            shared.clone(),
        );

        assert_eq!(outcome, RunOutcome::Finished);
        assert_eq!(shared.state(), PlayerState::Stopped);
        assert_eq!(
            recorder.kinds(),
            vec![
                MidiMessage::Start,
                MidiMessage::note_on(1, 60, 100),
                MidiMessage::note_off(1, 60),
                MidiMessage::Stop,
            ]
        );

        let times: Vec<f64> = recorder.messages().iter().map(|m| m.timestamp_secs).collect();
        assert!(approx(times[1], 0.5));
        assert!(approx(times[2], 1.0));
        // Played out to beat 4 before stopping
        assert!(approx(times[3], 2.0));

        assert_eq!(
            transport.calls(),
            vec![
                Call::Tempo(500.0),
                Call::Seek(0.0),
                Call::Seek(1.0),
                Call::Seek(2.0),
                Call::SoundOff,
                Call::SeekTo(0.0),
                Call::Stop,
            ]
        );
    }

    #[test]
    fn test_empty_cache_zero_range_ends_immediately() {
        let transport = FakeTransport::new(PlaybackCache::empty(), TempoMap::default());
        let clock = Arc::new(VirtualClock::new());

        let outcome = run_with(
            transport.clone(),
            clock.clone(),
            PlaybackConfig::new(0.0, 0.0).with_broadcast(),
            Arc::new(Shared::new()),
        );

        assert_eq!(outcome, RunOutcome::Finished);
        assert_eq!(transport.count(&Call::SoundOff), 1);
        assert_eq!(transport.count(&Call::Stop), 1);
        // Only the flush grace period was slept
        assert_eq!(clock.sleep_count(), 1);
        assert!(approx(clock.now_ms(), 50.0));
    }

    #[test]
    fn test_silent_run_does_not_broadcast() {
        let recorder = Recorder::new();
        let dest = Destination::from_arc(recorder.clone());
        let cache = PlaybackCache::builder()
            .add_event(0.5, MidiMessage::note_on(1, 60, 100), &dest)
            .add_event(1.0, MidiMessage::note_off(1, 60), &dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::default());

        run_with(
            transport.clone(),
            Arc::new(VirtualClock::new()),
            PlaybackConfig::new(0.0, 1.0),
            Arc::new(Shared::new()),
        );

        // The sound-off reset is not a broadcast and always happens
        assert_eq!(transport.calls(), vec![Call::SoundOff]);
        assert_eq!(recorder.kinds().len(), 4);
    }

    #[test]
    fn test_cancel_flushes_held_notes_and_stops_once() {
        let shared = Arc::new(Shared::new());
        let stop = StopHandle {
            shared: shared.clone(),
        };
        let recorder = Recorder::stopping_after(stop, 1);
        let other = Recorder::new();
        let dest = Destination::from_arc(recorder.clone());
        let other_dest = Destination::from_arc(other.clone());

        let cache = PlaybackCache::builder()
            .add_event(1.0, MidiMessage::note_on(2, 64, 90), &dest)
            .add_event(3.0, MidiMessage::note_off(2, 64), &dest)
            .add_event(3.0, MidiMessage::control_change(1, 7, 100), &other_dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::default());

        let outcome = run_with(
            transport.clone(),
            Arc::new(VirtualClock::new()),
            PlaybackConfig::new(0.0, 8.0).with_looping().with_broadcast(),
            shared,
        );

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(
            recorder.kinds(),
            vec![
                MidiMessage::Start,
                MidiMessage::note_on(2, 64, 90),
                MidiMessage::note_off(2, 64),
                MidiMessage::Stop,
            ]
        );
        // Destinations without events still get start and stop
        assert_eq!(other.kinds(), vec![MidiMessage::Start, MidiMessage::Stop]);

        // Cancellation is not a natural end: no reset, no stop broadcast
        assert_eq!(transport.count(&Call::SoundOff), 0);
        assert_eq!(transport.count(&Call::Stop), 0);
    }

    #[test]
    fn test_loop_is_periodic_and_notes_balance() {
        let shared = Arc::new(Shared::new());
        let stop = StopHandle {
            shared: shared.clone(),
        };
        let recorder = Recorder::stopping_after(stop, 3);
        let dest = Destination::from_arc(recorder.clone());
        let cache = PlaybackCache::builder()
            .add_event(1.0, MidiMessage::note_on(1, 60, 100), &dest)
            .add_event(2.0, MidiMessage::note_off(1, 60), &dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::new(500.0));

        run_with(
            transport.clone(),
            Arc::new(VirtualClock::new()),
            PlaybackConfig::new(0.0, 4.0).with_looping().with_broadcast(),
            shared,
        );

        let on_times = recorder.times_of(|m| m.is_note_on());
        assert_eq!(on_times.len(), 3);
        // Period = 4 beats * 500ms
        assert!(approx(on_times[1] - on_times[0], 2.0));
        assert!(approx(on_times[2] - on_times[1], 2.0));

        let offs = recorder.times_of(|m| m.is_note_off()).len();
        assert_eq!(offs, on_times.len());

        // Initial seek plus one rewind per completed pass
        assert_eq!(transport.count(&Call::Seek(0.0)), 3);
    }

    #[test]
    fn test_event_past_loop_end_forces_rewind() {
        let shared = Arc::new(Shared::new());
        let stop = StopHandle {
            shared: shared.clone(),
        };
        let recorder = Recorder::stopping_after(stop, 2);
        let dest = Destination::from_arc(recorder.clone());
        let cache = PlaybackCache::builder()
            .add_event(1.0, MidiMessage::note_on(1, 60, 100), &dest)
            .add_event(1.5, MidiMessage::note_off(1, 60), &dest)
            .add_event(3.0, MidiMessage::note_on(1, 72, 100), &dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::new(500.0));

        run_with(
            transport,
            Arc::new(VirtualClock::new()),
            PlaybackConfig::new(0.0, 2.0).with_looping(),
            shared,
        );

        let keys: Vec<u8> = recorder
            .kinds()
            .iter()
            .filter(|m| m.is_note_on())
            .filter_map(|m| m.note_number())
            .collect();
        assert_eq!(keys, vec![60, 60]);

        let on_times = recorder.times_of(|m| m.is_note_on());
        // Rewind happens at beat 2, not at the stray event's beat 3
        assert!(approx(on_times[1] - on_times[0], 1.0));
    }

    #[test]
    fn test_tempo_change_paces_later_events_and_reaches_everyone() {
        let keys = Recorder::new();
        let drums = Recorder::new();
        let keys_dest = Destination::from_arc(keys.clone());
        let drums_dest = Destination::from_arc(drums.clone());

        let cache = PlaybackCache::builder()
            .add_event(1.0, MidiMessage::tempo_bpm(60.0), &keys_dest)
            .add_event(2.0, MidiMessage::note_on(10, 36, 100), &drums_dest)
            .add_event(3.0, MidiMessage::note_off(10, 36), &drums_dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::new(500.0));

        run_with(
            transport.clone(),
            Arc::new(VirtualClock::new()),
            PlaybackConfig::new(0.0, 3.0).with_broadcast(),
            Arc::new(Shared::new()),
        );

        let tempo_on_drums = drums.times_of(|m| m.is_tempo_meta_event());
        assert_eq!(tempo_on_drums.len(), 1);
        assert!(approx(tempo_on_drums[0], 0.5));
        assert_eq!(keys.times_of(|m| m.is_tempo_meta_event()).len(), 1);

        // Beat 1 reached at 500ms; the next beats take 1000ms each
        let on = drums.times_of(|m| m.is_note_on());
        let off = drums.times_of(|m| m.is_note_off());
        assert!(approx(on[0], 1.5));
        assert!(approx(off[0], 2.5));

        assert_eq!(transport.count(&Call::Tempo(500.0)), 1);
        assert_eq!(transport.count(&Call::Tempo(1000.0)), 1);
    }

    #[test]
    fn test_long_waits_are_sliced_and_cancel_within_one_slice() {
        let recorder = Recorder::new();
        let dest = Destination::from_arc(recorder.clone());
        let cache = PlaybackCache::builder()
            .add_event(20.0, MidiMessage::note_on(1, 60, 100), &dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::new(500.0));
        let clock = Arc::new(VirtualClock::new());
        let shared = Arc::new(Shared::new());
        shared.request_stop();

        let outcome = run_with(
            transport,
            clock.clone(),
            PlaybackConfig::new(0.0, 20.0),
            shared,
        );

        assert_eq!(outcome, RunOutcome::Cancelled);
        // One 1s slice, then the 50ms flush grace
        assert!(approx(clock.now_ms(), 1050.0));
        assert_eq!(recorder.kinds(), vec![MidiMessage::Start, MidiMessage::Stop]);
    }

    #[test]
    fn test_cancel_during_end_of_cache_wait() {
        let shared = Arc::new(Shared::new());
        let stop = StopHandle {
            shared: shared.clone(),
        };
        let recorder = Recorder::stopping_after(stop, 1);
        let idle = Recorder::new();
        let dest = Destination::from_arc(recorder.clone());
        let idle_dest = Destination::from_arc(idle.clone());
        let cache = PlaybackCache::builder()
            .add_event(0.0, MidiMessage::control_change(1, 7, 100), &idle_dest)
            .add_event(1.0, MidiMessage::note_on(1, 60, 100), &dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::new(500.0));
        let clock = Arc::new(VirtualClock::new());

        let outcome = run_with(
            transport.clone(),
            clock.clone(),
            PlaybackConfig::new(0.0, 16.0).with_broadcast(),
            shared.clone(),
        );

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(shared.state(), PlayerState::Stopped);
        assert_eq!(
            recorder.kinds(),
            vec![
                MidiMessage::Start,
                MidiMessage::note_on(1, 60, 100),
                MidiMessage::note_off(1, 60),
                MidiMessage::Stop,
            ]
        );
        assert_eq!(
            idle.kinds().iter().filter(|m| **m == MidiMessage::Stop).count(),
            1
        );
        assert_eq!(transport.count(&Call::SoundOff), 0);
        assert_eq!(transport.count(&Call::Stop), 0);
        // Note-on at 500ms, one 1s slice of the 7.5s tail, then the flush grace
        assert!(approx(clock.now_ms(), 1550.0));
    }

    #[test]
    fn test_zero_tempo_event_keeps_loop_paced() {
        let shared = Arc::new(Shared::new());
        let stop = StopHandle {
            shared: shared.clone(),
        };
        let recorder = Recorder::stopping_after(stop, 3);
        let dest = Destination::from_arc(recorder.clone());
        let cache = PlaybackCache::builder()
            .add_event(0.0, MidiMessage::Tempo { micros_per_quarter: 0 }, &dest)
            .add_event(1.0, MidiMessage::note_on(1, 60, 100), &dest)
            .add_event(2.0, MidiMessage::note_off(1, 60), &dest)
            .build();
        let tempo = TempoMap::from_cache(&cache, 500.0);
        let transport = FakeTransport::new(cache, tempo);
        let clock = Arc::new(VirtualClock::new());

        run_with(
            transport.clone(),
            clock.clone(),
            PlaybackConfig::new(0.0, 4.0).with_looping().with_broadcast(),
            shared,
        );

        let on_times = recorder.times_of(|m| m.is_note_on());
        assert_eq!(on_times.len(), 3);
        assert!(approx(on_times[0], 0.5));
        assert!(approx(on_times[1] - on_times[0], 2.0));
        assert!(approx(on_times[2] - on_times[1], 2.0));
        // The zero tempo is forwarded but never becomes the pace
        assert_eq!(transport.count(&Call::Tempo(0.0)), 0);
        assert!(recorder.times_of(|m| m.is_tempo_meta_event()).len() >= 3);
    }

    #[test]
    fn test_finished_disconnects_when_run_ends() {
        let transport = FakeTransport::new(PlaybackCache::empty(), TempoMap::default());
        let mut player = Player::new(
            transport,
            Arc::new(VirtualClock::new()),
            EngineTimings::default(),
        );
        assert!(player.finished().is_none());

        player.configure(PlaybackConfig::new(0.0, 4.0)).unwrap();
        player.start().unwrap();
        let finished = player.finished().unwrap();

        assert!(finished.recv().is_err());
        assert!(!player.is_running());
        assert_eq!(player.join(), Some(RunOutcome::Finished));
        assert!(player.finished().is_none());
    }

    #[test]
    fn test_long_gap_sleeps_in_bounded_slices() {
        let recorder = Recorder::new();
        let dest = Destination::from_arc(recorder.clone());
        let cache = PlaybackCache::builder()
            .add_event(10.0, MidiMessage::note_on(1, 60, 100), &dest)
            .add_event(10.0, MidiMessage::note_off(1, 60), &dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::new(500.0));
        let clock = Arc::new(VirtualClock::new());

        run_with(
            transport,
            clock.clone(),
            PlaybackConfig::new(0.0, 10.0),
            Arc::new(Shared::new()),
        );

        // 5000ms gap in 1000ms slices, plus the flush grace
        assert_eq!(clock.sleep_count(), 6);
        let on = recorder.times_of(|m| m.is_note_on());
        assert!(approx(on[0], 5.0));
    }

    #[test]
    fn test_start_mid_sequence_skips_earlier_events() {
        let recorder = Recorder::new();
        let dest = Destination::from_arc(recorder.clone());
        let cache = PlaybackCache::builder()
            .add_event(0.0, MidiMessage::note_on(1, 48, 100), &dest)
            .add_event(2.0, MidiMessage::note_on(1, 60, 100), &dest)
            .add_event(3.0, MidiMessage::note_off(1, 60), &dest)
            .build();
        let transport = FakeTransport::new(cache, TempoMap::new(500.0));

        run_with(
            transport,
            Arc::new(VirtualClock::new()),
            PlaybackConfig::new(2.0, 3.0),
            Arc::new(Shared::new()),
        );

        let keys: Vec<u8> = recorder
            .kinds()
            .iter()
            .filter_map(|m| m.note_number())
            .collect();
        assert_eq!(keys, vec![60, 60]);
        // First event sits on the start beat: no wait before it
        assert!(approx(recorder.times_of(|m| m.is_note_on())[0], 0.0));
    }

    #[test]
    fn test_player_rejects_invalid_use() {
        let transport = FakeTransport::new(PlaybackCache::empty(), TempoMap::default());
        let mut player = Player::new(
            transport,
            Arc::new(VirtualClock::new()),
            EngineTimings::default(),
        );

        assert_eq!(player.start(), Err(PlaybackError::NotConfigured));
        assert!(player
            .configure(PlaybackConfig::new(4.0, 2.0))
            .is_err());
        assert!(player.cancel().is_none());
        assert_eq!(player.state(), PlayerState::Stopped);
    }
}
