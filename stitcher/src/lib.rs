//! Frame accumulation for line-scan captures.
//!
//! Accepted frames are stacked top to bottom into a composite; once the composite holds the
//! configured number of frames it is handed to a [`CompositeSink`] and accumulation restarts.

pub mod accumulator;
pub mod filter;

pub use accumulator::{
    AccumulatorState, Action, CompositeSink, EncodeError, FlushReport, FrameAccumulator,
    MemorySink, PngWriter,
};
pub use filter::{BlankFrameFilter, FrameFilter};

use line_stitch_common::frame::{AppendError, PixelFormat};

#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    #[error("frame width {got} does not match composite width {expected}")]
    WidthMismatch { expected: u32, got: u32 },
    #[error("frame format {got} does not match composite format {expected}")]
    FormatMismatch {
        expected: PixelFormat,
        got: PixelFormat,
    },
    #[error("failed to write composite: {0}")]
    Encode(#[from] EncodeError),
}

impl From<AppendError> for StitchError {
    fn from(e: AppendError) -> Self {
        match e {
            AppendError::WidthMismatch { composite, frame } => StitchError::WidthMismatch {
                expected: composite,
                got: frame,
            },
            AppendError::FormatMismatch { composite, frame } => StitchError::FormatMismatch {
                expected: composite,
                got: frame,
            },
        }
    }
}

impl StitchError {
    /// True for errors caused by a frame that does not fit the composite being built.
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            StitchError::WidthMismatch { .. } | StitchError::FormatMismatch { .. }
        )
    }
}
