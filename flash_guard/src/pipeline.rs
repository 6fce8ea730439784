// THEORY:
// The `pipeline` module is the top-level API of the flash engine. It wires the
// layers together for one stream session:
//
//   Frame -> linear RGB + luminance (pixel) -> flags vs previous frame
//   (smart_pixel) -> FlashWindow (temporal) -> FrequencyRule (verdict)
//
// A `FlashPipeline` is synchronous and exclusively owns its window and
// accumulators; one frame is fully analyzed before the next is accepted. All
// per-frame buffers (linearized current and previous frame, flag scratch) are
// allocated once when the session's resolution is known and reused afterwards.

use std::mem;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::config::FlashConfig;
use crate::core_modules::flash_window::{FlashWindow, Transition};
use crate::core_modules::frame::{Frame, FrameShape, LinearFrame, LuminanceGrid};
use crate::core_modules::pixel::pixel::{linearize_into, luminance_into};
use crate::core_modules::smart_pixel::smart_pixel::{
    LuminanceFlashThresholds, RedFlashThresholds, luminance_flash_into, saturated_red_flash_into,
};
use crate::error::Result;

// Re-export key data structures for the public API.
pub use crate::core_modules::frequency_rule::{FrequencyRule, Verdict};

/// The outcome of pushing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// The window is still filling; no verdict yet.
    Priming {
        buffered_frames: usize,
        elapsed_seconds: f64,
    },
    /// The window was primed: a verdict was emitted and the oldest frame evicted.
    Analyzed(Verdict),
}

impl Report {
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Report::Analyzed(verdict) => Some(verdict),
            Report::Priming { .. } => None,
        }
    }

    pub fn is_flashing(&self) -> bool {
        self.verdict().is_some_and(|verdict| verdict.flashing)
    }
}

/// Running counters for a stream session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_seen: u64,
    pub frames_rejected: u64,
    pub verdicts: u64,
    pub flashing_verdicts: u64,
}

struct Linearized {
    color: LinearFrame,
    luminance: LuminanceGrid,
}

impl Linearized {
    fn new(shape: FrameShape) -> Self {
        Self {
            color: LinearFrame::zeros(shape),
            luminance: LuminanceGrid::zeros(shape),
        }
    }
}

/// Resolution-dependent state, created when the session's shape is known.
struct Session {
    window: FlashWindow,
    rule: FrequencyRule,
    current: Linearized,
    previous: Linearized,
    has_previous: bool,
    luminance_flags: Vec<u8>,
    red_flags: Vec<u8>,
}

impl Session {
    fn new(shape: FrameShape, config: &FlashConfig) -> Self {
        Self {
            window: FlashWindow::new(shape, config.ring_capacity()),
            rule: FrequencyRule::new(shape, config.flash_frequency_threshold, config.area_fraction),
            current: Linearized::new(shape),
            previous: Linearized::new(shape),
            has_previous: false,
            luminance_flags: vec![0; shape.area()],
            red_flags: vec![0; shape.area()],
        }
    }
}

/// The main, top-level struct for the flash engine.
pub struct FlashPipeline {
    config: FlashConfig,
    fixed_shape: Option<FrameShape>,
    luminance_thresholds: LuminanceFlashThresholds,
    red_thresholds: RedFlashThresholds,
    window_duration: Duration,
    session: Option<Session>,
    stats: PipelineStats,
}

impl FlashPipeline {
    /// Creates a pipeline whose working resolution is taken from the first frame.
    pub fn new(config: FlashConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            luminance_thresholds: config.luminance_thresholds(),
            red_thresholds: config.red_thresholds(),
            window_duration: config.window_duration(),
            config,
            fixed_shape: None,
            session: None,
            stats: PipelineStats::default(),
        })
    }

    /// Creates a pipeline that only accepts frames of `shape`.
    pub fn with_shape(config: FlashConfig, shape: FrameShape) -> Result<Self> {
        let mut pipeline = Self::new(config)?;
        pipeline.fixed_shape = Some(shape);
        pipeline.session = Some(Session::new(shape, &pipeline.config));
        Ok(pipeline)
    }

    /// Creates a pipeline for frames captured at the given resolution and
    /// downscaled by the configured factor before analysis.
    pub fn for_capture(
        config: FlashConfig,
        capture_width: u32,
        capture_height: u32,
    ) -> Result<Self> {
        let shape = config.working_shape(capture_width, capture_height);
        Self::with_shape(config, shape)
    }

    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    pub fn shape(&self) -> Option<FrameShape> {
        self.session.as_ref().map(|session| session.window.shape())
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn window(&self) -> Option<&FlashWindow> {
        self.session.as_ref().map(|session| &session.window)
    }

    pub fn flashing_detected(&mut self, frame: &Frame, timestamp: Duration) -> Result<bool> {
        Ok(self.push(frame, timestamp)?.is_flashing())
    }

    /// Analyzes one frame captured at `timestamp` (time since stream start).
    ///
    /// A frame with the wrong shape or a timestamp earlier than the previous one
    /// is rejected and leaves the session untouched.
    pub fn push(&mut self, frame: &Frame, timestamp: Duration) -> Result<Report> {
        let started = Instant::now();
        self.stats.frames_seen += 1;
        match self.analyze(frame, timestamp) {
            Ok(report) => {
                trace!(
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "Frame processed"
                );
                Ok(report)
            }
            Err(err) => {
                self.stats.frames_rejected += 1;
                warn!(error = %err, "Frame rejected");
                Err(err)
            }
        }
    }

    fn analyze(&mut self, frame: &Frame, timestamp: Duration) -> Result<Report> {
        let shape = self.fixed_shape.unwrap_or_else(|| frame.shape());
        let config = &self.config;
        let session = self.session.get_or_insert_with(|| Session::new(shape, config));
        session.window.validate(frame, timestamp)?;

        // Stage 1: Colorimetric transform
        linearize_into(frame, &mut session.current.color);
        luminance_into(&session.current.color, &mut session.current.luminance);

        // Stage 2: Per-pixel classification against the previous frame
        let transition = if session.has_previous {
            luminance_flash_into(
                session.current.luminance.data(),
                session.previous.luminance.data(),
                &self.luminance_thresholds,
                &mut session.luminance_flags,
            );
            saturated_red_flash_into(
                session.current.color.data(),
                session.previous.color.data(),
                &self.red_thresholds,
                &mut session.red_flags,
            );
            Some(Transition {
                luminance: &session.luminance_flags,
                red: &session.red_flags,
            })
        } else {
            None
        };

        // Stage 3: Temporal aggregation
        session.window.push(timestamp, frame, transition)?;
        mem::swap(&mut session.current, &mut session.previous);
        session.has_previous = true;

        if !session
            .window
            .is_primed(self.config.buffer_min_frames, self.window_duration)
        {
            return Ok(Report::Priming {
                buffered_frames: session.window.len(),
                elapsed_seconds: session.window.elapsed().as_secs_f64(),
            });
        }

        // Stage 4: Frequency/area decision, then slide the window by one frame
        let verdict = session.rule.decide(
            session.window.luminance_counts(),
            session.window.red_counts(),
            session.window.elapsed().as_secs_f64(),
        );
        session.window.evict_oldest();

        self.stats.verdicts += 1;
        debug!(
            flashing = verdict.flashing,
            luminance_pixels = verdict.luminance_pixels,
            red_pixels = verdict.red_pixels,
            area_threshold = verdict.area_threshold,
            elapsed_seconds = verdict.elapsed_seconds,
            "Verdict"
        );
        if verdict.flashing {
            self.stats.flashing_verdicts += 1;
            info!(
                luminance_pixels = verdict.luminance_pixels,
                red_pixels = verdict.red_pixels,
                "Flashing detected"
            );
        }
        Ok(Report::Analyzed(verdict))
    }

    /// Starts a new stream session with the same configuration. Statistics
    /// are kept.
    pub fn reset(&mut self) {
        self.session = self
            .fixed_shape
            .map(|shape| Session::new(shape, &self.config));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlashError;

    fn gray(value: u8) -> Frame {
        Frame::filled(4, 4, [value, value, value]).expect("valid frame")
    }

    fn at(frame_index: u64, fps: u64) -> Duration {
        Duration::from_nanos(frame_index * 1_000_000_000 / fps)
    }

    fn small_config() -> FlashConfig {
        FlashConfig {
            buffer_min_frames: 4,
            expected_fps: 10.0,
            ..Default::default()
        }
    }

    #[test]
    fn primes_after_minimum_frames_and_one_second() {
        let mut pipeline = FlashPipeline::new(small_config()).expect("valid config");
        for i in 0..10 {
            let report = pipeline.push(&gray(0), at(i, 10)).expect("push");
            assert!(matches!(report, Report::Priming { .. }), "frame {i}");
        }
        let report = pipeline.push(&gray(0), at(10, 10)).expect("push");
        let verdict = report.verdict().expect("primed at one second");
        assert!(!verdict.flashing);
        assert_eq!(pipeline.stats().verdicts, 1);
    }

    #[test]
    fn window_slides_by_one_frame_per_verdict() {
        let mut pipeline = FlashPipeline::new(small_config()).expect("valid config");
        for i in 0..11 {
            pipeline.push(&gray(0), at(i, 10)).expect("push");
        }
        let len_after_first = pipeline.window().expect("session").len();
        for i in 11..40 {
            let report = pipeline.push(&gray(0), at(i, 10)).expect("push");
            assert!(report.verdict().is_some());
            assert_eq!(pipeline.window().expect("session").len(), len_after_first);
        }
        assert_eq!(pipeline.stats().verdicts, 30);
    }

    #[test]
    fn alternating_black_and_white_is_flashing() {
        let mut pipeline = FlashPipeline::new(small_config()).expect("valid config");
        let mut flashing = false;
        for i in 0..30 {
            let frame = if i % 2 == 0 { gray(0) } else { gray(255) };
            flashing |= pipeline.flashing_detected(&frame, at(i, 10)).expect("push");
        }
        assert!(flashing);
        assert!(pipeline.stats().flashing_verdicts > 0);
    }

    #[test]
    fn rejected_frames_do_not_change_the_window() {
        let mut pipeline = FlashPipeline::new(small_config()).expect("valid config");
        pipeline.push(&gray(0), at(0, 10)).expect("push");
        pipeline.push(&gray(255), at(1, 10)).expect("push");
        let counts_before = pipeline.window().expect("session").luminance_counts().clone();

        let wrong = Frame::filled(2, 2, [0, 0, 0]).expect("valid frame");
        let result = pipeline.push(&wrong, at(2, 10));
        assert!(matches!(result, Err(FlashError::FrameShape { .. })));

        let result = pipeline.push(&gray(0), at(0, 10));
        assert!(matches!(result, Err(FlashError::TimestampRegression { .. })));

        let window = pipeline.window().expect("session");
        assert_eq!(window.len(), 2);
        assert_eq!(window.luminance_counts(), &counts_before);
        assert_eq!(pipeline.stats().frames_rejected, 2);
        assert_eq!(pipeline.stats().frames_seen, 4);
    }

    #[test]
    fn fixed_shape_rejects_the_first_mismatched_frame() {
        let mut pipeline =
            FlashPipeline::with_shape(small_config(), FrameShape::new(2, 2)).expect("valid config");
        let result = pipeline.push(&gray(0), at(0, 10));
        assert!(matches!(result, Err(FlashError::FrameShape { .. })));
    }

    #[test]
    fn capture_resolution_is_downscaled() {
        let pipeline = FlashPipeline::for_capture(FlashConfig::default(), 640, 480).expect("valid");
        assert_eq!(pipeline.shape(), Some(FrameShape::new(160, 120)));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = FlashConfig {
            area_fraction: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            FlashPipeline::new(config),
            Err(FlashError::Configuration(_))
        ));
    }

    #[test]
    fn reset_starts_a_fresh_session() {
        let mut pipeline = FlashPipeline::new(small_config()).expect("valid config");
        for i in 0..5 {
            pipeline.push(&gray(0), at(i, 10)).expect("push");
        }
        pipeline.reset();
        assert!(pipeline.window().is_none());
        let small = Frame::filled(2, 2, [0, 0, 0]).expect("valid frame");
        pipeline.push(&small, at(0, 10)).expect("new resolution accepted");
        assert_eq!(pipeline.shape(), Some(FrameShape::new(2, 2)));
    }
}
