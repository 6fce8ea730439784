// THEORY:
// The frequency rule is the final, stateless step of the engine. It reads the
// per-pixel flash counts accumulated over the window and turns them into a
// single stream-level verdict.
//
// Each full flash cycle (dim -> bright -> dim) is seen by the classifiers as two
// flagged transitions, so a pixel's cycle frequency is `(count / 2) / elapsed`.
// A pixel qualifies when that frequency reaches the threshold (3 Hz by default).
// The stream is flashing when the qualifying pixels of either channel cover the
// area threshold (a quarter of the working frame by default).

use crate::core_modules::frame::{Accumulator, FrameShape};

pub const DEFAULT_FLASH_FREQUENCY_HZ: f64 = 3.0;
pub const DEFAULT_AREA_FRACTION: f64 = 0.25;

/// The outcome of one decision, with the coverage that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub flashing: bool,
    /// Pixels whose luminance flash frequency reached the threshold.
    pub luminance_pixels: usize,
    /// Pixels whose saturated-red flash frequency reached the threshold.
    pub red_pixels: usize,
    pub elapsed_seconds: f64,
    pub area_threshold: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyRule {
    pub frequency_threshold: f64,
    pub area_threshold: usize,
}

impl FrequencyRule {
    /// Builds the rule for a working resolution. The area threshold is
    /// `floor(area * area_fraction)`, never less than one pixel.
    pub fn new(shape: FrameShape, frequency_threshold: f64, area_fraction: f64) -> Self {
        Self {
            frequency_threshold,
            area_threshold: area_threshold(shape, area_fraction),
        }
    }

    pub fn decide(
        &self,
        luminance: &Accumulator,
        red: &Accumulator,
        elapsed_seconds: f64,
    ) -> Verdict {
        let luminance_pixels =
            count_qualifying(luminance, elapsed_seconds, self.frequency_threshold);
        let red_pixels = count_qualifying(red, elapsed_seconds, self.frequency_threshold);
        Verdict {
            flashing: luminance_pixels >= self.area_threshold || red_pixels >= self.area_threshold,
            luminance_pixels,
            red_pixels,
            elapsed_seconds,
            area_threshold: self.area_threshold,
        }
    }
}

pub fn area_threshold(shape: FrameShape, area_fraction: f64) -> usize {
    ((shape.area() as f64 * area_fraction).floor() as usize).max(1)
}

#[inline]
pub fn flash_frequency(count: u32, elapsed_seconds: f64) -> f64 {
    (count as f64 / 2.0) / elapsed_seconds
}

/// Pixels whose flash frequency is at least `frequency_threshold`. A
/// non-positive window qualifies nothing.
pub fn count_qualifying(
    accumulator: &Accumulator,
    elapsed_seconds: f64,
    frequency_threshold: f64,
) -> usize {
    if elapsed_seconds <= 0.0 {
        return 0;
    }
    accumulator
        .counts()
        .iter()
        .filter(|&&count| flash_frequency(count, elapsed_seconds) >= frequency_threshold)
        .count()
}
