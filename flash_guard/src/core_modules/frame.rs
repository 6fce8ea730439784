// THEORY:
// The `frame` module holds the "dumb" data containers that flow through the
// flash engine. Every grid is a flat, row-major buffer with an explicit
// stride so that the per-pixel hot loops in the classifiers and the window
// can walk plain slices without nested indexing or per-frame allocation.
//
// Containers, in pipeline order:
// - `Frame`:         interleaved RGB bytes (stride 3), as handed over by capture
// - `LinearFrame`:   interleaved linear-light RGB in [0,1] (stride 3)
// - `LuminanceGrid`: one relative luminance value per pixel
// - `FlagGrid`:      one 0/1 flash flag per pixel
// - `Accumulator`:   one running flash count per pixel
//
// None of these types know how to compare themselves to each other; that is
// the job of `smart_pixel` (pairwise) and `flash_window` (temporal).

use std::fmt;
use std::path::Path;

use image::RgbImage;

use crate::error::{FlashError, Result};

/// Width and height of a grid, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub width: usize,
    pub height: usize,
}

impl FrameShape {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A gamma-encoded RGB frame, 3 bytes per pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    shape: FrameShape,
    data: Vec<u8>,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    /// Wraps an interleaved RGB buffer. The buffer length must match the shape exactly.
    pub fn from_rgb(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        let shape = FrameShape::new(width, height);
        if shape.is_empty() {
            return Err(FlashError::EmptyFrame(format!("frame has no pixels ({shape})")));
        }
        let expected = shape.area() * Self::CHANNELS;
        if data.len() != expected {
            return Err(FlashError::EmptyFrame(format!(
                "{shape} RGB frame needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Builds a frame from an RGBA buffer, discarding alpha.
    pub fn from_rgba(width: usize, height: usize, rgba: &[u8]) -> Result<Self> {
        let shape = FrameShape::new(width, height);
        if rgba.len() != shape.area() * 4 {
            return Err(FlashError::EmptyFrame(format!(
                "{shape} RGBA frame needs {} bytes, got {}",
                shape.area() * 4,
                rgba.len()
            )));
        }
        let mut data = Vec::with_capacity(shape.area() * Self::CHANNELS);
        for pixel in rgba.chunks_exact(4) {
            data.extend_from_slice(&pixel[..3]);
        }
        Self::from_rgb(width, height, data)
    }

    /// A frame where every pixel has the same color.
    pub fn filled(width: usize, height: usize, rgb: [u8; 3]) -> Result<Self> {
        let data = rgb.repeat(width * height);
        Self::from_rgb(width, height, data)
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.shape.width + x) * Self::CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn to_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(
            self.shape.width as u32,
            self.shape.height as u32,
            self.data.clone(),
        )
    }

    /// Writes the frame to disk; the format follows the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let image = self.to_image().ok_or_else(|| {
            FlashError::EmptyFrame(format!("{} buffer does not fit its shape", self.shape))
        })?;
        image.save(path.as_ref())?;
        Ok(())
    }
}

impl TryFrom<&RgbImage> for Frame {
    type Error = FlashError;

    fn try_from(image: &RgbImage) -> Result<Self> {
        Frame::from_rgb(
            image.width() as usize,
            image.height() as usize,
            image.as_raw().clone(),
        )
    }
}

impl TryFrom<RgbImage> for Frame {
    type Error = FlashError;

    fn try_from(image: RgbImage) -> Result<Self> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        Frame::from_rgb(width, height, image.into_raw())
    }
}

/// Linear-light RGB, 3 floats per pixel in [0,1].
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFrame {
    shape: FrameShape,
    data: Vec<f32>,
}

impl LinearFrame {
    pub fn zeros(shape: FrameShape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.area() * Frame::CHANNELS],
        }
    }

    pub fn from_values(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        let shape = FrameShape::new(width, height);
        if shape.is_empty() || data.len() != shape.area() * Frame::CHANNELS {
            return Err(FlashError::EmptyFrame(format!(
                "{shape} linear frame needs {} values, got {}",
                shape.area() * Frame::CHANNELS,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn pixel(&self, x: usize, y: usize) -> [f32; 3] {
        let i = (y * self.shape.width + x) * Frame::CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Relative luminance, one value per pixel in [0,1].
#[derive(Debug, Clone, PartialEq)]
pub struct LuminanceGrid {
    shape: FrameShape,
    data: Vec<f32>,
}

impl LuminanceGrid {
    pub fn zeros(shape: FrameShape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.area()],
        }
    }

    pub fn from_values(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        let shape = FrameShape::new(width, height);
        if shape.is_empty() || data.len() != shape.area() {
            return Err(FlashError::EmptyFrame(format!(
                "{shape} luminance grid needs {} values, got {}",
                shape.area(),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Per-pixel flash flags between two consecutive frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagGrid {
    shape: FrameShape,
    data: Vec<u8>,
}

impl FlagGrid {
    pub fn zeros(shape: FrameShape) -> Self {
        Self {
            shape,
            data: vec![0; shape.area()],
        }
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.shape.width + x]
    }

    /// Number of flagged pixels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&flag| flag != 0).count()
    }
}

/// Running per-pixel flash counts over the temporal window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulator {
    shape: FrameShape,
    counts: Vec<u32>,
}

impl Accumulator {
    pub fn zeros(shape: FrameShape) -> Self {
        Self {
            shape,
            counts: vec![0; shape.area()],
        }
    }

    pub fn from_counts(width: usize, height: usize, counts: Vec<u32>) -> Result<Self> {
        let shape = FrameShape::new(width, height);
        if shape.is_empty() || counts.len() != shape.area() {
            return Err(FlashError::EmptyFrame(format!(
                "{shape} accumulator needs {} counts, got {}",
                shape.area(),
                counts.len()
            )));
        }
        Ok(Self { shape, counts })
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn add(&mut self, flags: &[u8]) {
        for (count, &flag) in self.counts.iter_mut().zip(flags) {
            *count += flag as u32;
        }
    }

    pub fn subtract(&mut self, flags: &[u8]) {
        for (count, &flag) in self.counts.iter_mut().zip(flags) {
            debug_assert!(*count >= flag as u32, "accumulator underflow");
            *count -= flag as u32;
        }
    }

    pub fn clear(&mut self) {
        self.counts.fill(0);
    }
}
