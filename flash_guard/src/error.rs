// THEORY:
// Every failure the engine can report lives in one enum. Frame-level errors
// (`FrameShape`, `EmptyFrame`, `TimestampRegression`) are raised *before* any
// window or accumulator state is touched, so the caller is always free to drop
// the offending frame and keep streaming. Configuration errors surface at load
// time, never mid-stream.

use std::time::Duration;
use thiserror::Error;

use crate::core_modules::frame::FrameShape;

pub type Result<T, E = FlashError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("frame shape mismatch: expected {expected}, found {found}")]
    FrameShape { expected: FrameShape, found: FrameShape },
    #[error("empty or truncated frame: {0}")]
    EmptyFrame(String),
    #[error("timestamp went backwards: {current:?} is before {previous:?}")]
    TimestampRegression { previous: Duration, current: Duration },
    #[error("analysis pipeline is closed")]
    PipelineClosed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub fn configuration_error(message: impl Into<String>) -> FlashError {
    FlashError::Configuration(message.into())
}
