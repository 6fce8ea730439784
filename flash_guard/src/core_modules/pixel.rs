// THEORY (Colorimetric Transform):
// The `pixel` module is the lowest layer of the flash engine. It turns an
// 8-bit, gamma-encoded RGB sample into the linear-light quantities every
// higher layer reasons about. Nothing here looks at a neighbor or at a
// previous frame; pairwise comparisons live in `smart_pixel`.
//
// Single-pixel quantities:
// - linear RGB:          sRGB inverse gamma per channel, in [0,1]
// - relative luminance:  Rec. 709 weights over linear RGB, in [0,1]
// - red ratio:           share of total channel energy carried by red
// - pure red:            320 * max(0, R - G - B), a "how saturated red" score
//
// The inverse gamma uses the 0.03928 breakpoint of the photosensitivity
// guidelines rather than the 0.04045 of IEC 61966-2-1. For 8-bit input both
// breakpoints select the same segment for every byte value.
//
// Internally the sRGB -> linear conversion is a 256-entry `OnceLock` LUT, so the
// per-pixel cost is one table lookup per channel and no `powf`.
//
// Frame-level helpers come in two shapes: an allocating version that returns a
// new grid, and an `_into` version that writes into a caller-owned grid. The
// pipeline only uses the `_into` versions on its hot path.

pub mod pixel {
    use std::sync::OnceLock;

    use crate::core_modules::frame::{Frame, LinearFrame, LuminanceGrid};

    pub type Channel = u8;
    pub type LinearChannel = f32;
    pub type LinearRgb = [LinearChannel; 3];
    pub type Luminance = f32;
    pub type RedRatio = f32;
    pub type PureRed = f32;

    /// Normalized sRGB value at or below which the curve is linear.
    pub const SRGB_LINEAR_BREAKPOINT: f64 = 0.03928;
    /// Rec. 709 luminance weights for linear R, G, B.
    pub const LUMINANCE_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];
    pub const RED_RATIO_EPSILON: f32 = 1e-10;
    pub const PURE_RED_SCALE: f32 = 320.0;

    static SRGB_TO_LINEAR_LUT: OnceLock<[LinearChannel; 256]> = OnceLock::new();

    /// Inverse sRGB gamma for a normalized channel value in [0,1].
    pub fn inverse_gamma(normalized: f64) -> f64 {
        if normalized <= SRGB_LINEAR_BREAKPOINT {
            normalized / 12.92
        } else {
            ((normalized + 0.055) / 1.055).powf(2.4)
        }
    }

    #[inline]
    pub fn srgb_to_linear(value: Channel) -> LinearChannel {
        let table = SRGB_TO_LINEAR_LUT.get_or_init(|| {
            let mut table = [0.0f32; 256];
            for (byte, entry) in table.iter_mut().enumerate() {
                *entry = inverse_gamma(byte as f64 / 255.0) as f32;
            }
            table
        });
        table[value as usize]
    }

    /// Linearizes one RGB sample, channel by channel.
    #[inline]
    pub fn to_linear(sample: [Channel; 3]) -> LinearRgb {
        [
            srgb_to_linear(sample[0]),
            srgb_to_linear(sample[1]),
            srgb_to_linear(sample[2]),
        ]
    }

    #[inline]
    pub fn relative_luminance(linear: LinearRgb) -> Luminance {
        LUMINANCE_WEIGHTS[0] * linear[0]
            + LUMINANCE_WEIGHTS[1] * linear[1]
            + LUMINANCE_WEIGHTS[2] * linear[2]
    }

    /// Fraction of the channel sum carried by red. Black yields 0.
    #[inline]
    pub fn red_ratio(linear: LinearRgb) -> RedRatio {
        linear[0] / (linear[0] + linear[1] + linear[2] + RED_RATIO_EPSILON)
    }

    /// Saturated-red intensity; zero unless red outweighs green and blue combined.
    #[inline]
    pub fn pure_red(linear: LinearRgb) -> PureRed {
        let excess = linear[0] - linear[1] - linear[2];
        if excess > 0.0 {
            PURE_RED_SCALE * excess
        } else {
            0.0
        }
    }

    pub fn linearize_frame(frame: &Frame) -> LinearFrame {
        let mut linear = LinearFrame::zeros(frame.shape());
        linearize_into(frame, &mut linear);
        linear
    }

    /// Writes the linearized frame into `out`, which must have the same shape.
    pub fn linearize_into(frame: &Frame, out: &mut LinearFrame) {
        debug_assert_eq!(frame.shape(), out.shape());
        for (dst, &src) in out.data_mut().iter_mut().zip(frame.data()) {
            *dst = srgb_to_linear(src);
        }
    }

    pub fn luminance_grid(linear: &LinearFrame) -> LuminanceGrid {
        let mut ls = LuminanceGrid::zeros(linear.shape());
        luminance_into(linear, &mut ls);
        ls
    }

    pub fn luminance_into(linear: &LinearFrame, out: &mut LuminanceGrid) {
        debug_assert_eq!(linear.shape(), out.shape());
        for (dst, rgb) in out
            .data_mut()
            .iter_mut()
            .zip(linear.data().chunks_exact(Frame::CHANNELS))
        {
            *dst = relative_luminance([rgb[0], rgb[1], rgb[2]]);
        }
    }
}
