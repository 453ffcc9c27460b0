use line_stitch_common::frame::RawFrame;
use tracing::debug;

use super::traits::FrameFilter;

/// Rejects black frames.
///
/// Line-scan sensors emit a handful of all-zero lines after AcquisitionStart while they
/// stabilize. A frame is accepted once at least `min_nonzero_pixels` pixels carry a
/// non-zero sample; with the default of 1 only completely black frames are dropped.
pub struct BlankFrameFilter {
    min_nonzero_pixels: usize,
    /// Frames rejected so far.
    rejected: u64,
}

impl BlankFrameFilter {
    pub fn new(min_nonzero_pixels: usize) -> Self {
        Self {
            min_nonzero_pixels: min_nonzero_pixels.max(1),
            rejected: 0,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl Default for BlankFrameFilter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FrameFilter for BlankFrameFilter {
    fn should_accept(&mut self, frame: &RawFrame) -> bool {
        // Fast path for the common threshold: stop at the first lit sample.
        let accepted = if self.min_nonzero_pixels == 1 {
            !frame.is_all_zero()
        } else {
            frame.count_nonzero() >= self.min_nonzero_pixels
        };

        if !accepted {
            self.rejected += 1;
            debug!(
                block_id = frame.block_id,
                rejected = self.rejected,
                threshold = self.min_nonzero_pixels,
                "blank frame dropped"
            );
        }
        accepted
    }

    fn name(&self) -> &str {
        "blank"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use line_stitch_common::frame::PixelFormat;

    fn with_lit_pixels(width: u32, lit: usize) -> RawFrame {
        let mut data = vec![0u8; width as usize];
        for px in data.iter_mut().take(lit) {
            *px = 200;
        }
        RawFrame::new(width, 1, PixelFormat::Mono8, data).unwrap()
    }

    #[test]
    fn drops_black_frames() {
        let mut filter = BlankFrameFilter::default();
        assert!(!filter.should_accept(&RawFrame::blank(64, 1, PixelFormat::Mono8)));
        assert!(!filter.should_accept(&RawFrame::blank(64, 1, PixelFormat::Rgb8)));
        assert_eq!(filter.rejected(), 2);
    }

    #[test]
    fn accepts_single_lit_pixel_by_default() {
        let mut filter = BlankFrameFilter::default();
        assert!(filter.should_accept(&with_lit_pixels(64, 1)));
        assert_eq!(filter.rejected(), 0);
    }

    #[test]
    fn threshold_counts_pixels() {
        let mut filter = BlankFrameFilter::new(4);
        assert!(!filter.should_accept(&with_lit_pixels(64, 3)));
        assert!(filter.should_accept(&with_lit_pixels(64, 4)));
    }

    #[test]
    fn zero_threshold_behaves_like_one() {
        let mut filter = BlankFrameFilter::new(0);
        assert!(!filter.should_accept(&RawFrame::blank(8, 1, PixelFormat::Mono8)));
    }
}
