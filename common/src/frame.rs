use serde::Deserialize;

/// Pixel layout of a frame buffer. All layouts are 8 bits per sample, tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Mono8,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "mono8",
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Bgr8 => "bgr8",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded image buffer retrieved from the camera.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    /// Stream block id assigned by the device, monotonically increasing.
    pub block_id: u64,
    /// Wall-clock capture time, Unix millis.
    pub timestamp_ms: i64,
}

impl RawFrame {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = expected_len(width, height, format);
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
            block_id: 0,
            timestamp_ms: 0,
        })
    }

    /// An all-zero frame, the shape a sensor emits before it warms up.
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0; expected_len(width, height, format)],
            block_id: 0,
            timestamp_ms: 0,
        }
    }

    pub fn with_block_id(mut self, block_id: u64) -> Self {
        self.block_id = block_id;
        self
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    // -- Accessors ---------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel access for backends that fill a pre-allocated buffer in place.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    // -- Pixel statistics --------------------------------------------------------

    /// Number of pixels with at least one non-zero channel.
    pub fn count_nonzero(&self) -> usize {
        count_nonzero_pixels(&self.data, self.format)
    }

    /// Returns true if no sample in the frame is non-zero.
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

/// A vertical stack of frames awaiting flush.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeImage {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    frames: u32,
}

impl CompositeImage {
    /// Start a composite from a single frame. The frame's pixels are copied.
    pub fn from_frame(frame: &RawFrame) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            format: frame.format,
            data: frame.data.clone(),
            frames: 1,
        }
    }

    /// Stack `frame` below the current rows.
    ///
    /// The frame must have the same width and pixel format as the composite; on mismatch
    /// the composite is left untouched.
    pub fn append(&mut self, frame: &RawFrame) -> Result<(), AppendError> {
        if frame.width != self.width {
            return Err(AppendError::WidthMismatch {
                composite: self.width,
                frame: frame.width,
            });
        }
        if frame.format != self.format {
            return Err(AppendError::FormatMismatch {
                composite: self.format,
                frame: frame.format,
            });
        }
        self.data.extend_from_slice(&frame.data);
        self.height += frame.height;
        self.frames += 1;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of frames stacked so far.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Row `y` as a byte slice, or None past the bottom edge.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.width as usize * self.format.bytes_per_pixel();
        let start = y as usize * stride;
        Some(&self.data[start..start + stride])
    }
}

fn expected_len(width: u32, height: u32, format: PixelFormat) -> usize {
    width as usize * height as usize * format.bytes_per_pixel()
}

fn count_nonzero_pixels(data: &[u8], format: PixelFormat) -> usize {
    data.chunks_exact(format.bytes_per_pixel())
        .filter(|px| px.iter().any(|&b| b != 0))
        .count()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame buffer has {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
}

/// Why a frame could not be stacked onto a composite.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AppendError {
    #[error("frame width {frame} does not match composite width {composite}")]
    WidthMismatch { composite: u32, frame: u32 },
    #[error("frame format {frame} does not match composite format {composite}")]
    FormatMismatch {
        composite: PixelFormat,
        frame: PixelFormat,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(width: u32, height: u32, value: u8) -> RawFrame {
        RawFrame::new(
            width,
            height,
            PixelFormat::Mono8,
            vec![value; (width * height) as usize],
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_wrong_buffer_size() {
        let err = RawFrame::new(4, 2, PixelFormat::Rgb8, vec![0; 8]).unwrap_err();
        assert_eq!(err, FrameError::BufferSize { got: 8, expected: 24 });
    }

    #[test]
    fn blank_frame_is_all_zero() {
        let frame = RawFrame::blank(16, 1, PixelFormat::Bgr8);
        assert!(frame.is_all_zero());
        assert_eq!(frame.count_nonzero(), 0);
        assert_eq!(frame.data().len(), 48);
    }

    #[test]
    fn single_lit_pixel_counts() {
        let mut data = vec![0u8; 10];
        data[7] = 1;
        let frame = RawFrame::new(10, 1, PixelFormat::Mono8, data).unwrap();
        assert!(!frame.is_all_zero());
        assert_eq!(frame.count_nonzero(), 1);
    }

    #[test]
    fn multichannel_pixel_counted_once() {
        // Two pixels: first has red+blue set, second is black.
        let frame =
            RawFrame::new(2, 1, PixelFormat::Rgb8, vec![10, 0, 10, 0, 0, 0]).unwrap();
        assert_eq!(frame.count_nonzero(), 1);
    }

    #[test]
    fn append_stacks_rows_in_order() {
        let mut composite = CompositeImage::from_frame(&filled(4, 2, 1));
        composite.append(&filled(4, 3, 2)).unwrap();

        assert_eq!(composite.width(), 4);
        assert_eq!(composite.height(), 5);
        assert_eq!(composite.frames(), 2);
        assert_eq!(composite.row(1).unwrap(), &[1, 1, 1, 1]);
        assert_eq!(composite.row(2).unwrap(), &[2, 2, 2, 2]);
        assert!(composite.row(5).is_none());
    }

    #[test]
    fn append_rejects_width_mismatch() {
        let mut composite = CompositeImage::from_frame(&filled(4, 1, 1));
        let err = composite.append(&filled(5, 1, 1)).unwrap_err();
        assert_eq!(err, AppendError::WidthMismatch { composite: 4, frame: 5 });
        assert_eq!(composite.height(), 1);
        assert_eq!(composite.frames(), 1);
    }

    #[test]
    fn append_rejects_format_mismatch() {
        let mut composite = CompositeImage::from_frame(&filled(2, 1, 1));
        let rgb = RawFrame::new(2, 1, PixelFormat::Rgb8, vec![1; 6]).unwrap();
        assert!(matches!(
            composite.append(&rgb),
            Err(AppendError::FormatMismatch { .. })
        ));
    }
}
