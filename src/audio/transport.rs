//! Transport: owns the sequence, the seek position and the player
//!
//! Listeners subscribe to [`TransportEvent`]s; each subscriber gets its own
//! channel and disconnected subscribers are dropped on the next broadcast.

use crate::audio::player::{Player, StopHandle};
use crossbeam_channel::{unbounded, Receiver, Sender};
use seqplay_core::clock::{Clock, SystemClock};
use seqplay_core::types::midi_message::{
    CC_ALL_NOTES_OFF, CC_ALL_SOUND_OFF, CC_RESET_ALL_CONTROLLERS,
};
use seqplay_core::types::{
    MidiMessage, PlaybackCache, PlaybackConfig, TempoMap, TimeAndTempo, TimedMidiMessage,
    TransportSettings,
};
use seqplay_core::PlaybackError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// What the playback thread needs from the transport
pub trait TransportContext: Send + Sync {
    /// A fresh view of the playback cache; the caller owns its cursor
    fn playback_cache(&self) -> PlaybackCache;

    fn find_time_and_tempo_at(&self, beat: f32) -> TimeAndTempo;

    fn project_last_beat(&self) -> f32;

    /// Length of the whole project in milliseconds
    fn total_time(&self) -> f64 {
        self.find_time_and_tempo_at(self.project_last_beat())
            .elapsed_ms
    }

    /// Last position requested from outside the player
    fn seek_beat(&self) -> f32;

    fn seek_to_beat(&self, beat: f32);

    fn broadcast_seek(&self, beat: f32, current_time_ms: f64, total_time_ms: f64);

    fn broadcast_tempo_changed(&self, ms_per_quarter: f64);

    fn broadcast_stop(&self);

    /// Reset every instrument: sound off, controllers reset, notes off
    fn all_notes_controllers_and_sound_off(&self);
}

/// Notifications sent to transport listeners
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Seek {
        beat: f32,
        current_time_ms: f64,
        total_time_ms: f64,
    },
    TempoChanged {
        ms_per_quarter: f64,
    },
    Play,
    Stop,
}

/// The sequence being played and its tempo map
struct Sequence {
    cache: PlaybackCache,
    tempo_map: TempoMap,
}

/// State shared with the playback thread
struct TransportState {
    sequence: RwLock<Sequence>,
    /// Seek position stored as f32 bits
    seek_beat: AtomicU32,
    listeners: Mutex<Vec<Sender<TransportEvent>>>,
    clock: Arc<dyn Clock>,
}

impl TransportState {
    fn broadcast(&self, event: TransportEvent) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Broadcast to all subscribers, removing disconnected ones
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn with_sequence<T>(&self, f: impl FnOnce(&Sequence) -> T) -> T {
        let sequence = self.sequence.read().unwrap_or_else(PoisonError::into_inner);
        f(&sequence)
    }
}

impl TransportContext for TransportState {
    fn playback_cache(&self) -> PlaybackCache {
        self.with_sequence(|s| s.cache.clone())
    }

    fn find_time_and_tempo_at(&self, beat: f32) -> TimeAndTempo {
        self.with_sequence(|s| s.tempo_map.find_time_and_tempo_at(beat))
    }

    fn project_last_beat(&self) -> f32 {
        self.with_sequence(|s| s.cache.last_beat())
    }

    fn seek_beat(&self) -> f32 {
        f32::from_bits(self.seek_beat.load(Ordering::Relaxed))
    }

    fn seek_to_beat(&self, beat: f32) {
        self.seek_beat.store(beat.to_bits(), Ordering::Relaxed);
        let at = self.find_time_and_tempo_at(beat);
        self.broadcast_seek(beat, at.elapsed_ms, self.total_time());
    }

    fn broadcast_seek(&self, beat: f32, current_time_ms: f64, total_time_ms: f64) {
        self.broadcast(TransportEvent::Seek {
            beat,
            current_time_ms,
            total_time_ms,
        });
    }

    fn broadcast_tempo_changed(&self, ms_per_quarter: f64) {
        self.broadcast(TransportEvent::TempoChanged { ms_per_quarter });
    }

    fn broadcast_stop(&self) {
        self.broadcast(TransportEvent::Stop);
    }

    fn all_notes_controllers_and_sound_off(&self) {
        let destinations = self.with_sequence(|s| s.cache.unique_destinations());
        let timestamp = self.clock.now_secs();
        for dest in &destinations {
            for channel in 1..=16u8 {
                for controller in [CC_ALL_SOUND_OFF, CC_RESET_ALL_CONTROLLERS, CC_ALL_NOTES_OFF] {
                    dest.send(TimedMidiMessage::new(
                        timestamp,
                        MidiMessage::control_change(channel, controller, 0),
                    ));
                }
            }
        }
    }
}

/// Playback facade: configures and runs the single [`Player`]
pub struct Transport {
    state: Arc<TransportState>,
    player: Mutex<Player>,
    stop: StopHandle,
    settings: TransportSettings,
}

impl Transport {
    pub fn new(cache: PlaybackCache, settings: TransportSettings) -> Self {
        Self::with_clock(cache, settings, Arc::new(SystemClock::new()))
    }

    /// Use a custom time source (e.g. a virtual clock in tests)
    pub fn with_clock(
        cache: PlaybackCache,
        settings: TransportSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tempo_map = TempoMap::from_cache(&cache, settings.default_ms_per_quarter());
        let state = Arc::new(TransportState {
            sequence: RwLock::new(Sequence { cache, tempo_map }),
            seek_beat: AtomicU32::new(0.0f32.to_bits()),
            listeners: Mutex::new(Vec::new()),
            clock: clock.clone(),
        });
        let player = Player::new(state.clone(), clock, settings.timings);
        let stop = player.stop_handle();

        Self {
            state,
            player: Mutex::new(player),
            stop,
            settings,
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Register a listener; all subsequent events are delivered to it
    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        let (tx, rx) = unbounded();
        self.state
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Play from the seek position to the end of the project
    pub fn start_playback(&self) -> Result<(), PlaybackError> {
        let start = self.seek_beat();
        let end = self.project_last_beat().max(start);
        self.start_with(PlaybackConfig::new(start, end).with_broadcast())
    }

    /// Loop `[start, end]` until stopped
    pub fn start_playback_looped(&self, start: f32, end: f32) -> Result<(), PlaybackError> {
        self.start_with(
            PlaybackConfig::new(start, end)
                .with_looping()
                .with_broadcast(),
        )
    }

    /// Preview a fragment without notifying listeners
    pub fn start_playback_fragment(
        &self,
        start: f32,
        end: f32,
        looped: bool,
    ) -> Result<(), PlaybackError> {
        let mut config = PlaybackConfig::new(start, end);
        if looped {
            config = config.with_looping();
        }
        self.start_with(config)
    }

    fn start_with(&self, config: PlaybackConfig) -> Result<(), PlaybackError> {
        config.validate()?;
        let broadcast = config.broadcast;

        let mut player = self.player();
        if player.is_running() {
            player.cancel();
        }
        player.configure(config)?;
        player.start()?;

        if broadcast {
            self.state.broadcast(TransportEvent::Play);
        }
        Ok(())
    }

    /// Stop playback, releasing every held note
    pub fn stop_playback(&self) {
        let mut player = self.player();
        if player.is_running() {
            // Previews run without notifying listeners
            let broadcast = player.config().is_some_and(|c| c.broadcast);
            player.cancel();
            if broadcast {
                self.state.broadcast_stop();
            }
        } else {
            // Reap a run that already ended on its own
            player.join();
        }
    }

    pub fn toggle_start_stop_playback(&self) -> Result<(), PlaybackError> {
        if self.is_playing() {
            self.stop_playback();
            Ok(())
        } else {
            self.start_playback()
        }
    }

    pub fn is_playing(&self) -> bool {
        self.player().is_running()
    }

    /// Request a stop from contexts that must not block
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the current run to end, on its own or through a stop.
    /// Other transport calls stay available while this blocks.
    pub fn wait_until_stopped(&self) {
        let finished = self.player().finished();
        if let Some(finished) = finished {
            let _ = finished.recv();
        }
        // Reap the thread unless a new run was started meanwhile
        let mut player = self.player();
        if !player.is_running() {
            player.join();
        }
    }

    pub fn seek_to_beat(&self, beat: f32) {
        self.state.seek_to_beat(beat);
    }

    pub fn seek_beat(&self) -> f32 {
        self.state.seek_beat()
    }

    pub fn project_last_beat(&self) -> f32 {
        self.state.project_last_beat()
    }

    pub fn total_time(&self) -> f64 {
        self.state.total_time()
    }

    pub fn find_time_and_tempo_at(&self, beat: f32) -> TimeAndTempo {
        self.state.find_time_and_tempo_at(beat)
    }

    /// Replace the sequence; playback is stopped first
    pub fn set_playback_cache(&self, cache: PlaybackCache) {
        self.stop_playback();
        let tempo_map = TempoMap::from_cache(&cache, self.settings.default_ms_per_quarter());
        let mut sequence = self
            .state
            .sequence
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *sequence = Sequence { cache, tempo_map };
    }

    pub fn all_notes_controllers_and_sound_off(&self) {
        self.state.all_notes_controllers_and_sound_off();
    }

    fn player(&self) -> MutexGuard<'_, Player> {
        self.player.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
