// THEORY:
// The `FlashWindow` is the temporal memory of the flash engine. It owns the
// rolling ~1 second of history the decision rule reads: one slot per frame,
// each slot holding the frame's timestamp, its RGB bytes, and the luminance and
// red flags of the transition *into* that frame from the one before it.
//
// Key architectural principles:
// 1.  **Ring buffer over flat arenas**: all slots live in preallocated, flat
//     buffers addressed by `head` and `len`. Pushing and evicting only move
//     indices and copy one frame's worth of bytes, so steady-state streaming
//     never allocates.
// 2.  **Incremental accumulators**: the per-pixel luminance and red counts are
//     updated as flags enter and leave. The invariant is that each accumulator
//     equals the sum of the flags of every slot except the oldest one, because
//     the oldest frame's incoming transition points at a frame already gone.
// 3.  **Validation before mutation**: a frame with the wrong shape or an
//     out-of-order timestamp is rejected before any slot or count changes.
// 4.  **Growth instead of loss**: capacity is sized from the expected frame
//     rate. A faster stream that fills the ring before the window is primed
//     doubles the arenas rather than dropping history.

use std::time::Duration;

use tracing::warn;

use crate::core_modules::frame::{Accumulator, Frame, FrameShape};
use crate::error::{FlashError, Result};

/// Flags describing the transition from the previous frame into a new one.
#[derive(Debug, Clone, Copy)]
pub struct Transition<'a> {
    pub luminance: &'a [u8],
    pub red: &'a [u8],
}

pub struct FlashWindow {
    shape: FrameShape,
    capacity: usize,
    head: usize,
    len: usize,
    timestamps: Vec<Duration>,
    frames: Vec<u8>,
    luminance_flags: Vec<u8>,
    red_flags: Vec<u8>,
    luminance_counts: Accumulator,
    red_counts: Accumulator,
}

impl FlashWindow {
    pub const MIN_CAPACITY: usize = 2;

    pub fn new(shape: FrameShape, capacity: usize) -> Self {
        let capacity = capacity.max(Self::MIN_CAPACITY);
        let area = shape.area();
        Self {
            shape,
            capacity,
            head: 0,
            len: 0,
            timestamps: vec![Duration::ZERO; capacity],
            frames: vec![0; capacity * area * Frame::CHANNELS],
            luminance_flags: vec![0; capacity * area],
            red_flags: vec![0; capacity * area],
            luminance_counts: Accumulator::zeros(shape),
            red_counts: Accumulator::zeros(shape),
        }
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, index: usize) -> usize {
        (self.head + index) % self.capacity
    }

    pub fn oldest_timestamp(&self) -> Option<Duration> {
        (self.len > 0).then(|| self.timestamps[self.head])
    }

    pub fn newest_timestamp(&self) -> Option<Duration> {
        (self.len > 0).then(|| self.timestamps[self.slot(self.len - 1)])
    }

    /// Time spanned by the buffered frames, oldest to newest.
    pub fn elapsed(&self) -> Duration {
        match (self.oldest_timestamp(), self.newest_timestamp()) {
            (Some(oldest), Some(newest)) => newest - oldest,
            _ => Duration::ZERO,
        }
    }

    /// Whether enough frames and enough time are buffered to emit a verdict.
    pub fn is_primed(&self, min_frames: usize, window: Duration) -> bool {
        self.len >= min_frames && self.elapsed() >= window
    }

    pub fn luminance_counts(&self) -> &Accumulator {
        &self.luminance_counts
    }

    pub fn red_counts(&self) -> &Accumulator {
        &self.red_counts
    }

    /// Checks that a frame may be pushed, without touching any state.
    pub fn validate(&self, frame: &Frame, timestamp: Duration) -> Result<()> {
        if frame.shape() != self.shape {
            return Err(FlashError::FrameShape {
                expected: self.shape,
                found: frame.shape(),
            });
        }
        match self.newest_timestamp() {
            Some(previous) if timestamp < previous => Err(FlashError::TimestampRegression {
                previous,
                current: timestamp,
            }),
            _ => Ok(()),
        }
    }

    /// Appends a frame and the flags of the transition into it. The first frame
    /// of an empty window has no transition; any flags given for it are ignored.
    pub fn push(
        &mut self,
        timestamp: Duration,
        frame: &Frame,
        transition: Option<Transition<'_>>,
    ) -> Result<()> {
        self.validate(frame, timestamp)?;
        let area = self.shape.area();
        if let Some(transition) = &transition {
            if transition.luminance.len() != area || transition.red.len() != area {
                return Err(FlashError::EmptyFrame(format!(
                    "transition flags do not cover {} pixels",
                    area
                )));
            }
        }

        if self.len == self.capacity {
            self.grow();
        }

        let slot = self.slot(self.len);
        self.timestamps[slot] = timestamp;
        let stride = area * Frame::CHANNELS;
        self.frames[slot * stride..(slot + 1) * stride].copy_from_slice(frame.data());

        let luminance_slot = &mut self.luminance_flags[slot * area..(slot + 1) * area];
        let red_slot = &mut self.red_flags[slot * area..(slot + 1) * area];
        match transition {
            Some(transition) if self.len > 0 => {
                luminance_slot.copy_from_slice(transition.luminance);
                red_slot.copy_from_slice(transition.red);
                self.luminance_counts.add(transition.luminance);
                self.red_counts.add(transition.red);
            }
            _ => {
                luminance_slot.fill(0);
                red_slot.fill(0);
            }
        }

        self.len += 1;
        Ok(())
    }

    /// Drops the oldest frame, and with it the transition out of that frame.
    /// Returns the evicted frame's timestamp.
    pub fn evict_oldest(&mut self) -> Option<Duration> {
        if self.len == 0 {
            return None;
        }
        let evicted = self.timestamps[self.head];
        self.head = (self.head + 1) % self.capacity;
        self.len -= 1;

        if self.len > 0 {
            let area = self.shape.area();
            let slot = self.head;
            self.luminance_counts
                .subtract(&self.luminance_flags[slot * area..(slot + 1) * area]);
            self.red_counts
                .subtract(&self.red_flags[slot * area..(slot + 1) * area]);
        }
        Some(evicted)
    }

    /// Raw RGB bytes of a buffered frame, `0` being the oldest.
    pub fn frame_data(&self, index: usize) -> Option<&[u8]> {
        if index >= self.len {
            return None;
        }
        let stride = self.shape.area() * Frame::CHANNELS;
        let slot = self.slot(index);
        Some(&self.frames[slot * stride..(slot + 1) * stride])
    }

    pub fn newest_frame(&self) -> Option<Frame> {
        let data = self.frame_data(self.len.checked_sub(1)?)?;
        Frame::from_rgb(self.shape.width, self.shape.height, data.to_vec()).ok()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.len).map(move |i| self.timestamps[self.slot(i)])
    }

    /// Recomputes both accumulators from the buffered flags.
    pub fn recount(&self) -> (Accumulator, Accumulator) {
        let area = self.shape.area();
        let mut luminance = Accumulator::zeros(self.shape);
        let mut red = Accumulator::zeros(self.shape);
        for index in 1..self.len {
            let slot = self.slot(index);
            luminance.add(&self.luminance_flags[slot * area..(slot + 1) * area]);
            red.add(&self.red_flags[slot * area..(slot + 1) * area]);
        }
        (luminance, red)
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
        self.luminance_counts.clear();
        self.red_counts.clear();
    }

    fn grow(&mut self) {
        let new_capacity = self.capacity * 2;
        warn!(
            old_capacity = self.capacity,
            new_capacity,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Flash window ring is full before priming; growing"
        );
        let area = self.shape.area();
        let stride = area * Frame::CHANNELS;

        let mut timestamps = vec![Duration::ZERO; new_capacity];
        let mut frames = vec![0; new_capacity * stride];
        let mut luminance_flags = vec![0; new_capacity * area];
        let mut red_flags = vec![0; new_capacity * area];
        for index in 0..self.len {
            let slot = self.slot(index);
            timestamps[index] = self.timestamps[slot];
            frames[index * stride..(index + 1) * stride]
                .copy_from_slice(&self.frames[slot * stride..(slot + 1) * stride]);
            luminance_flags[index * area..(index + 1) * area]
                .copy_from_slice(&self.luminance_flags[slot * area..(slot + 1) * area]);
            red_flags[index * area..(index + 1) * area]
                .copy_from_slice(&self.red_flags[slot * area..(slot + 1) * area]);
        }

        self.timestamps = timestamps;
        self.frames = frames;
        self.luminance_flags = luminance_flags;
        self.red_flags = red_flags;
        self.capacity = new_capacity;
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn shape() -> FrameShape {
        FrameShape::new(4, 2)
    }

    fn gray(value: u8) -> Frame {
        Frame::filled(4, 2, [value, value, value]).expect("valid frame")
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn first_frame_contributes_no_flags() {
        let mut window = FlashWindow::new(shape(), 4);
        let ones = [1u8; 8];
        window
            .push(secs(0.0), &gray(0), Some(Transition { luminance: &ones, red: &ones }))
            .expect("push");
        assert_eq!(window.luminance_counts().counts(), &[0; 8]);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn eviction_removes_the_transition_out_of_the_oldest_frame() {
        let mut window = FlashWindow::new(shape(), 4);
        let ones = [1u8; 8];
        let zeros = [0u8; 8];
        window.push(secs(0.0), &gray(0), None).expect("push");
        window
            .push(secs(0.1), &gray(255), Some(Transition { luminance: &ones, red: &zeros }))
            .expect("push");
        window
            .push(secs(0.2), &gray(0), Some(Transition { luminance: &ones, red: &ones }))
            .expect("push");
        assert_eq!(window.luminance_counts().counts(), &[2; 8]);
        assert_eq!(window.red_counts().counts(), &[1; 8]);

        assert_eq!(window.evict_oldest(), Some(secs(0.0)));
        assert_eq!(window.luminance_counts().counts(), &[1; 8]);
        assert_eq!(window.red_counts().counts(), &[1; 8]);
        assert_eq!(window.elapsed(), secs(0.2) - secs(0.1));
    }

    #[test]
    fn priming_needs_both_frames_and_time() {
        let mut window = FlashWindow::new(shape(), 8);
        for i in 0..4 {
            window.push(secs(i as f64 * 0.5), &gray(0), None).expect("push");
        }
        assert!(window.is_primed(4, secs(1.0)));
        assert!(!window.is_primed(5, secs(1.0)));
        assert!(!window.is_primed(4, secs(2.0)));
    }

    #[test]
    fn mismatched_shape_leaves_state_untouched() {
        let mut window = FlashWindow::new(shape(), 4);
        window.push(secs(0.0), &gray(0), None).expect("push");
        let wrong = Frame::filled(2, 2, [0, 0, 0]).expect("valid frame");
        let result = window.push(secs(0.1), &wrong, None);
        assert!(matches!(result, Err(FlashError::FrameShape { .. })));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn timestamp_regression_is_rejected() {
        let mut window = FlashWindow::new(shape(), 4);
        window.push(secs(1.0), &gray(0), None).expect("push");
        let result = window.push(secs(0.5), &gray(0), None);
        assert!(matches!(result, Err(FlashError::TimestampRegression { .. })));
        window.push(secs(1.0), &gray(0), None).expect("equal timestamps are allowed");
    }

    #[test]
    fn ring_grows_and_keeps_order() {
        let mut window = FlashWindow::new(shape(), 2);
        for i in 0..5u8 {
            window.push(secs(i as f64), &gray(i * 10), None).expect("push");
        }
        assert!(window.capacity() >= 5);
        let stamps: Vec<_> = window.timestamps().collect();
        assert_eq!(stamps, (0..5).map(|i| secs(i as f64)).collect::<Vec<_>>());
        assert_eq!(window.frame_data(0).expect("oldest")[0], 0);
        assert_eq!(window.newest_frame().expect("newest"), gray(40));
    }

    #[test]
    fn accumulators_match_a_full_recount_under_random_traffic() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut window = FlashWindow::new(shape(), 6);
        let mut now = 0.0;
        for _ in 0..500 {
            if window.len() > 0 && rng.gen_bool(0.4) {
                window.evict_oldest();
            } else {
                let luminance: Vec<u8> = (0..8).map(|_| rng.gen_range(0..=1)).collect();
                let red: Vec<u8> = (0..8).map(|_| rng.gen_range(0..=1)).collect();
                now += rng.gen_range(0.0..0.2);
                window
                    .push(
                        secs(now),
                        &gray(rng.r#gen()),
                        Some(Transition { luminance: &luminance, red: &red }),
                    )
                    .expect("push");
            }
            let (luminance, red) = window.recount();
            assert_eq!(&luminance, window.luminance_counts());
            assert_eq!(&red, window.red_counts());
        }
    }
}
