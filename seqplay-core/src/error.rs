use thiserror::Error;

/// Errors raised when configuring or starting playback
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("end beat {end} is before start beat {start}")]
    InvalidRange { start: f32, end: f32 },

    #[error("playback range must be finite")]
    NonFiniteBeat,

    #[error("looped playback needs a non-empty range (start = end = {beat})")]
    EmptyLoop { beat: f32 },

    #[error("playback is already running; stop it first")]
    AlreadyRunning,

    #[error("playback has not been configured")]
    NotConfigured,

    #[error("failed to spawn playback thread: {0}")]
    ThreadSpawn(String),
}
