use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core_modules::frame::FrameShape;
use crate::core_modules::frequency_rule::{DEFAULT_AREA_FRACTION, DEFAULT_FLASH_FREQUENCY_HZ};
use crate::core_modules::smart_pixel::smart_pixel::{LuminanceFlashThresholds, RedFlashThresholds};
use crate::error::{FlashError, Result, configuration_error};

pub const DEFAULT_BUFFER_MIN_FRAMES: usize = 16;
pub const DEFAULT_WINDOW_SECONDS: f64 = 1.0;
pub const DEFAULT_DOWNSCALE_FACTOR: f64 = 0.25;
pub const DEFAULT_EXPECTED_FPS: f64 = 30.0;
/// Upper bound on preallocated window slots.
pub const MAX_RING_FRAMES: usize = 16_384;

/// Tunable behavior of the flash engine. Every field has a default, so a TOML
/// file only needs the options it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Minimum buffered frames before a verdict can be emitted.
    pub buffer_min_frames: usize,
    /// Duration of the rolling analysis window, in seconds.
    pub window_seconds: f64,
    pub luminance_delta_threshold: f64,
    pub luminance_dark_ceiling: f64,
    /// Red ratio at or above which a state counts as saturated red.
    pub red_saturation_threshold: f64,
    /// Minimum swing of the pure-red score for a red transition.
    pub red_delta_threshold: f64,
    /// Flash cycles per second at which a pixel qualifies.
    pub flash_frequency_threshold: f64,
    /// Fraction of the working frame that must qualify to raise a verdict.
    pub area_fraction: f64,
    /// Resolution reduction applied by preprocessing before analysis.
    pub downscale_factor: f64,
    /// Expected capture rate; only sizes the window's preallocated ring.
    pub expected_fps: f64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            buffer_min_frames: DEFAULT_BUFFER_MIN_FRAMES,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            luminance_delta_threshold: 0.1,
            luminance_dark_ceiling: 0.8,
            red_saturation_threshold: 0.8,
            red_delta_threshold: 20.0,
            flash_frequency_threshold: DEFAULT_FLASH_FREQUENCY_HZ,
            area_fraction: DEFAULT_AREA_FRACTION,
            downscale_factor: DEFAULT_DOWNSCALE_FACTOR,
            expected_fps: DEFAULT_EXPECTED_FPS,
        }
    }
}

impl FlashConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: FlashConfig = toml::from_str(contents).map_err(FlashError::ConfigParse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_min_frames < 2 || self.buffer_min_frames >= MAX_RING_FRAMES {
            return Err(configuration_error(format!(
                "buffer_min_frames must be in [2, {MAX_RING_FRAMES}) (got {})",
                self.buffer_min_frames
            )));
        }
        positive("window_seconds", self.window_seconds)?;
        if Duration::try_from_secs_f64(self.window_seconds).is_err() {
            return Err(configuration_error(format!(
                "window_seconds is too large (got {})",
                self.window_seconds
            )));
        }
        non_negative("luminance_delta_threshold", self.luminance_delta_threshold)?;
        unit_interval("luminance_dark_ceiling", self.luminance_dark_ceiling)?;
        unit_interval("red_saturation_threshold", self.red_saturation_threshold)?;
        non_negative("red_delta_threshold", self.red_delta_threshold)?;
        positive("flash_frequency_threshold", self.flash_frequency_threshold)?;
        unit_interval("area_fraction", self.area_fraction)?;
        unit_interval("downscale_factor", self.downscale_factor)?;
        positive("expected_fps", self.expected_fps)?;
        let frames_per_window = (self.expected_fps * self.window_seconds).ceil();
        if frames_per_window >= MAX_RING_FRAMES as f64 {
            return Err(configuration_error(format!(
                "expected_fps * window_seconds must stay below {MAX_RING_FRAMES} frames \
                 (got {frames_per_window})"
            )));
        }
        Ok(())
    }

    /// Analysis resolution for a capture resolution, after downscaling.
    pub fn working_shape(&self, capture_width: u32, capture_height: u32) -> FrameShape {
        let scale = |side: u32| ((side as f64 * self.downscale_factor).round() as usize).max(1);
        FrameShape::new(scale(capture_width), scale(capture_height))
    }

    /// Window length. Saturates instead of panicking on an unvalidated config.
    pub fn window_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.window_seconds).unwrap_or(Duration::MAX)
    }

    /// Slots to preallocate for the window ring: one window of frames at the
    /// expected rate, plus the frame that closes it.
    pub fn ring_capacity(&self) -> usize {
        let per_window = (self.expected_fps * self.window_seconds).ceil() as usize;
        per_window
            .saturating_add(1)
            .max(self.buffer_min_frames.saturating_add(1))
            .min(MAX_RING_FRAMES)
    }

    pub fn luminance_thresholds(&self) -> LuminanceFlashThresholds {
        LuminanceFlashThresholds {
            delta: self.luminance_delta_threshold as f32,
            dark_ceiling: self.luminance_dark_ceiling as f32,
        }
    }

    pub fn red_thresholds(&self) -> RedFlashThresholds {
        RedFlashThresholds {
            saturation: self.red_saturation_threshold as f32,
            delta: self.red_delta_threshold as f32,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(configuration_error(format!(
            "{name} must be a finite value greater than zero (got {value})"
        )));
    }
    Ok(())
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(configuration_error(format!(
            "{name} must be a finite, non-negative value (got {value})"
        )));
    }
    Ok(())
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(configuration_error(format!(
            "{name} must be in (0, 1] (got {value})"
        )));
    }
    Ok(())
}
