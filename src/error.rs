use thiserror::Error;

/// Main error type for the caption server
#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Live stream is already running")]
    AlreadyRunning,

    #[error("Live stream is not running")]
    NotRunning,

    #[error("Fragment mode is already active")]
    FragmentActive,

    #[error("Fragment mode is not active")]
    FragmentInactive,

    #[error("Not enough subtitlers: {joined} joined, {required} required")]
    NotEnoughSubtitlers { joined: usize, required: usize },

    #[error("Delay {requested}s is below the minimum of {minimum}s")]
    DelayTooLow { requested: u64, minimum: u64 },

    #[error("Delay {requested}s is above the maximum of {maximum}s")]
    DelayTooHigh { requested: u64, maximum: u64 },

    #[error("Upstream playlist not found: {0}")]
    PlaylistMissing(String),

    #[error("Playlist parse error: {0}")]
    PlaylistParse(String),

    #[error("Not enough segments for the requested delay")]
    NotEnoughSegments,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CaptionError>;
