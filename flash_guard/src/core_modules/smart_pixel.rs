// THEORY:
// The `smart_pixel` module holds the per-pixel flash classifiers. Where `pixel`
// answers "what is this sample?", `smart_pixel` answers "did this location
// flash between the previous frame and this one?". Every classifier takes the
// same location in two frames and reduces the pair to a single 0/1 flag.
//
// Two lenses, one pattern:
// 1.  **General luminance flash**: the swing between the brighter and darker
//     of the two relative luminances must reach a minimum delta, and the darker
//     state must sit below a ceiling (bright-to-bright changes are not flashes).
// 2.  **Saturated red flash**: at least one of the two states must be a
//     saturated red (red ratio at or above a cutoff), and the pure-red score
//     must swing by at least a minimum delta between the two states.
//
// Both predicates only look at max/min or absolute differences of the pair, so
// they are symmetric: swapping current and previous never changes a flag.

pub mod smart_pixel {
    use crate::core_modules::frame::{FlagGrid, Frame, LinearFrame, LuminanceGrid};
    use crate::core_modules::pixel::pixel::{self, LinearRgb, Luminance, PureRed, RedRatio};
    use crate::error::{FlashError, Result};

    pub const DEFAULT_LUMINANCE_DELTA: f32 = 0.1;
    pub const DEFAULT_DARK_CEILING: f32 = 0.8;
    pub const DEFAULT_RED_SATURATION: f32 = 0.8;
    pub const DEFAULT_RED_DELTA: f32 = 20.0;

    /// Thresholds for the general luminance flash test.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct LuminanceFlashThresholds {
        /// Minimum `brighter - darker` swing, inclusive.
        pub delta: f32,
        /// The darker state must be strictly below this.
        pub dark_ceiling: f32,
    }

    impl Default for LuminanceFlashThresholds {
        fn default() -> Self {
            Self {
                delta: DEFAULT_LUMINANCE_DELTA,
                dark_ceiling: DEFAULT_DARK_CEILING,
            }
        }
    }

    /// Thresholds for the saturated red flash test.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct RedFlashThresholds {
        /// Minimum red ratio for a state to count as saturated red, inclusive.
        pub saturation: f32,
        /// Minimum pure-red swing between the two states, inclusive.
        pub delta: f32,
    }

    impl Default for RedFlashThresholds {
        fn default() -> Self {
            Self {
                saturation: DEFAULT_RED_SATURATION,
                delta: DEFAULT_RED_DELTA,
            }
        }
    }

    /// A linear RGB sample with its red features cached for pairwise comparison.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct SmartPixel {
        pub linear: LinearRgb,
        red_ratio: RedRatio,
        pure_red: PureRed,
    }

    impl SmartPixel {
        pub fn new(linear: LinearRgb) -> Self {
            Self {
                red_ratio: pixel::red_ratio(linear),
                pure_red: pixel::pure_red(linear),
                linear,
            }
        }

        pub fn red_ratio(&self) -> RedRatio {
            self.red_ratio
        }

        pub fn pure_red(&self) -> PureRed {
            self.pure_red
        }

        pub fn is_saturated_red_flash(
            &self,
            other: &SmartPixel,
            thresholds: &RedFlashThresholds,
        ) -> bool {
            let saturated = self.red_ratio.max(other.red_ratio) >= thresholds.saturation;
            let swing = (self.pure_red - other.pure_red).abs();
            saturated && swing >= thresholds.delta
        }
    }

    #[inline]
    pub fn is_luminance_transition(
        ls: Luminance,
        prev_ls: Luminance,
        thresholds: &LuminanceFlashThresholds,
    ) -> bool {
        let brighter = ls.max(prev_ls);
        let darker = ls.min(prev_ls);
        brighter - darker >= thresholds.delta && darker < thresholds.dark_ceiling
    }

    /// Flags every pixel whose luminance swing between the two grids is a flash.
    pub fn is_luminance_flash(
        ls: &LuminanceGrid,
        prev_ls: &LuminanceGrid,
        thresholds: &LuminanceFlashThresholds,
    ) -> Result<FlagGrid> {
        if ls.shape() != prev_ls.shape() {
            return Err(FlashError::FrameShape {
                expected: prev_ls.shape(),
                found: ls.shape(),
            });
        }
        let mut flags = FlagGrid::zeros(ls.shape());
        luminance_flash_into(ls.data(), prev_ls.data(), thresholds, flags.data_mut());
        Ok(flags)
    }

    pub fn luminance_flash_into(
        ls: &[f32],
        prev_ls: &[f32],
        thresholds: &LuminanceFlashThresholds,
        out: &mut [u8],
    ) {
        for ((flag, &l), &prev) in out.iter_mut().zip(ls).zip(prev_ls) {
            *flag = is_luminance_transition(l, prev, thresholds) as u8;
        }
    }

    /// Flags every pixel that swings into or out of a saturated red.
    pub fn is_saturated_red_flash(
        color: &LinearFrame,
        prev_color: &LinearFrame,
        thresholds: &RedFlashThresholds,
    ) -> Result<FlagGrid> {
        if color.shape() != prev_color.shape() {
            return Err(FlashError::FrameShape {
                expected: prev_color.shape(),
                found: color.shape(),
            });
        }
        let mut flags = FlagGrid::zeros(color.shape());
        saturated_red_flash_into(color.data(), prev_color.data(), thresholds, flags.data_mut());
        Ok(flags)
    }

    pub fn saturated_red_flash_into(
        color: &[f32],
        prev_color: &[f32],
        thresholds: &RedFlashThresholds,
        out: &mut [u8],
    ) {
        let current = color.chunks_exact(Frame::CHANNELS);
        let previous = prev_color.chunks_exact(Frame::CHANNELS);
        for ((flag, cur), prev) in out.iter_mut().zip(current).zip(previous) {
            let cur = SmartPixel::new([cur[0], cur[1], cur[2]]);
            let prev = SmartPixel::new([prev[0], prev[1], prev[2]]);
            *flag = cur.is_saturated_red_flash(&prev, thresholds) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::smart_pixel::*;
    use crate::core_modules::frame::{Frame, LuminanceGrid};
    use crate::core_modules::pixel::pixel::{linearize_frame, to_linear};
    use crate::error::FlashError;

    fn grid(values: &[f32]) -> LuminanceGrid {
        LuminanceGrid::from_values(values.len(), 1, values.to_vec()).expect("valid grid")
    }

    #[test]
    fn large_swing_from_dark_is_a_flash() {
        let th = LuminanceFlashThresholds::default();
        assert!(is_luminance_transition(0.3, 0.0, &th));
        assert!(!is_luminance_transition(0.05, 0.0, &th));
    }

    #[test]
    fn delta_threshold_is_inclusive() {
        let th = LuminanceFlashThresholds { delta: 0.25, dark_ceiling: 0.8 };
        assert!(is_luminance_transition(0.5, 0.25, &th));
        assert!(is_luminance_transition(0.1, 0.0, &LuminanceFlashThresholds::default()));
    }

    #[test]
    fn bright_to_bright_is_not_a_flash() {
        let th = LuminanceFlashThresholds::default();
        assert!(!is_luminance_transition(0.95, 0.8, &th));
        assert!(is_luminance_transition(0.95, 0.79, &th));
    }

    #[test]
    fn luminance_flash_is_symmetric() {
        let th = LuminanceFlashThresholds::default();
        let a = grid(&[0.0, 0.3, 0.85, 0.5, 0.12, 0.7]);
        let b = grid(&[0.3, 0.0, 0.95, 0.55, 0.0, 0.9]);
        let forward = is_luminance_flash(&a, &b, &th).expect("same shape");
        let backward = is_luminance_flash(&b, &a, &th).expect("same shape");
        assert_eq!(forward, backward);
        assert_eq!(forward.data(), &[1, 1, 0, 0, 1, 1]);
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let th = LuminanceFlashThresholds::default();
        let result = is_luminance_flash(&grid(&[0.0, 0.1]), &grid(&[0.0]), &th);
        assert!(matches!(result, Err(FlashError::FrameShape { .. })));
    }

    #[test]
    fn red_to_black_is_a_saturated_red_flash() {
        let th = RedFlashThresholds::default();
        let red = SmartPixel::new(to_linear([255, 0, 0]));
        let black = SmartPixel::new(to_linear([0, 0, 0]));
        assert!(red.is_saturated_red_flash(&black, &th));
        assert!(black.is_saturated_red_flash(&red, &th));
    }

    #[test]
    fn desaturated_red_is_not_a_red_flash() {
        let th = RedFlashThresholds::default();
        let pinkish = SmartPixel::new(to_linear([255, 150, 150]));
        let black = SmartPixel::new(to_linear([0, 0, 0]));
        assert!(pinkish.red_ratio() < th.saturation);
        assert!(!pinkish.is_saturated_red_flash(&black, &th));
    }

    #[test]
    fn small_pure_red_swing_is_ignored() {
        let th = RedFlashThresholds::default();
        let a = SmartPixel::new(to_linear([255, 0, 0]));
        let b = SmartPixel::new(to_linear([250, 0, 0]));
        assert!((a.pure_red() - b.pure_red()).abs() < th.delta);
        assert!(!a.is_saturated_red_flash(&b, &th));
    }

    #[test]
    fn red_grid_flags_only_red_pixels() {
        let th = RedFlashThresholds::default();
        let current =
            Frame::from_rgb(3, 1, vec![255, 0, 0, 255, 255, 255, 0, 0, 0]).expect("frame");
        let previous = Frame::from_rgb(3, 1, vec![0; 9]).expect("frame");
        let flags =
            is_saturated_red_flash(&linearize_frame(&current), &linearize_frame(&previous), &th)
                .expect("same shape");
        assert_eq!(flags.data(), &[1, 0, 0]);
        assert_eq!(flags.count(), 1);
    }
}
