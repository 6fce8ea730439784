// THEORY:
// This file is the main entry point for the `flash_guard` library crate. It
// exports the `FlashPipeline` (synchronous, one stream session) and the
// `ParallelPipeline` (bounded capture/analysis split) together with the
// configuration, error and report types they speak.
//
// The layers underneath live in `core_modules`, leaves first:
// `pixel` (colorimetry) -> `smart_pixel` (per-pixel flash classifiers) ->
// `flash_window` (rolling one-second history and accumulators) ->
// `frequency_rule` (flash frequency and area verdict). They are public so that
// tools and tests can drive any single stage directly.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::FlashConfig;
pub use core_modules::frame::{Frame, FrameShape};
pub use error::{FlashError, Result};
pub use parallel_pipeline::{FrameFeeder, FrameOutcome, OutcomeStream, ParallelPipeline};
pub use pipeline::{FlashPipeline, PipelineStats, Report, Verdict};
