use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid streamer configuration: {0}")]
    InvalidConfig(String),
    #[error("playback sink unavailable: {0}")]
    SinkUnavailable(String),
    #[error("failed to submit block to playback sink: {0}")]
    Submit(String),
}
