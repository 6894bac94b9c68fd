//! Beat to wall-clock time mapping
//!
//! Beat 0 is the time origin. Between tempo changes time runs linearly at the
//! tempo of the last change at or before that point.

use crate::types::cache::PlaybackCache;
use crate::types::midi_message::DEFAULT_MICROS_PER_QUARTER;

/// Elapsed time and tempo at a beat position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAndTempo {
    pub elapsed_ms: f64,
    pub ms_per_quarter: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoChange {
    beat: f32,
    ms_per_quarter: f64,
}

/// Piecewise-constant tempo over the timeline
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    default_ms_per_quarter: f64,
    changes: Vec<TempoChange>,
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new(DEFAULT_MICROS_PER_QUARTER as f64 / 1000.0)
    }
}

impl TempoMap {
    /// A constant-tempo map; an unusable tempo falls back to 120 BPM
    pub fn new(default_ms_per_quarter: f64) -> Self {
        let default_ms_per_quarter = if is_usable(default_ms_per_quarter) {
            default_ms_per_quarter
        } else {
            DEFAULT_MICROS_PER_QUARTER as f64 / 1000.0
        };
        Self {
            default_ms_per_quarter,
            changes: Vec::new(),
        }
    }

    /// A constant-tempo map from BPM
    pub fn from_bpm(bpm: f64) -> Self {
        Self::new(60_000.0 / bpm)
    }

    /// Collect every usable tempo meta event in the cache
    pub fn from_cache(cache: &PlaybackCache, default_ms_per_quarter: f64) -> Self {
        let mut map = cache
            .events()
            .iter()
            .filter_map(|event| {
                let ms = event.message.tempo_ms_per_quarter()?;
                Some((event.beat, ms))
            })
            .fold(Self::new(default_ms_per_quarter), |map, (beat, ms)| {
                map.with_change(beat, ms)
            });
        // Cache events are already sorted; only duplicates at the same beat
        // from different tracks need deduplication (last one wins)
        map.changes.dedup_by(|later, earlier| {
            if later.beat == earlier.beat {
                earlier.ms_per_quarter = later.ms_per_quarter;
                true
            } else {
                false
            }
        });
        map
    }

    /// Add a tempo change, keeping changes sorted.
    /// Zero, negative and non-finite tempos are skipped, as the player skips them.
    pub fn with_change(mut self, beat: f32, ms_per_quarter: f64) -> Self {
        if !is_usable(ms_per_quarter) || !beat.is_finite() {
            return self;
        }
        let index = self.changes.partition_point(|c| c.beat <= beat);
        self.changes.insert(
            index,
            TempoChange {
                beat,
                ms_per_quarter,
            },
        );
        self
    }

    pub fn default_ms_per_quarter(&self) -> f64 {
        self.default_ms_per_quarter
    }

    /// Resolve elapsed milliseconds since beat 0 and the tempo in effect
    pub fn find_time_and_tempo_at(&self, beat: f32) -> TimeAndTempo {
        let mut elapsed_ms = 0.0;
        let mut tempo = self.default_ms_per_quarter;
        let mut previous_beat = 0.0f32;

        for change in self.changes.iter().take_while(|c| c.beat <= beat) {
            elapsed_ms += tempo * (change.beat - previous_beat) as f64;
            tempo = change.ms_per_quarter;
            previous_beat = change.beat;
        }

        elapsed_ms += tempo * (beat - previous_beat) as f64;

        TimeAndTempo {
            elapsed_ms,
            ms_per_quarter: tempo,
        }
    }
}

fn is_usable(ms_per_quarter: f64) -> bool {
    ms_per_quarter.is_finite() && ms_per_quarter > 0.0
}
