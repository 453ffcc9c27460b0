use std::path::PathBuf;

use line_stitch_common::config::{StitchConfig, TriggerFrame};
use line_stitch_common::frame::{CompositeImage, RawFrame};
use tracing::{debug, error, info, warn};

use crate::filter::{BlankFrameFilter, FrameFilter};
use crate::StitchError;

use super::encoder::CompositeSink;

/// What `ingest` did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Rejected by the frame filter; state unchanged.
    Dropped,
    /// First frame of a new composite.
    Started,
    /// Stacked below the current composite.
    Appended,
    /// The composite reached its target and was written out.
    Flushed(FlushReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
}

/// Accumulation progress. `frame_count` stays within `0..=total_frames_target`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorState {
    pub frame_count: u32,
    pub total_frames_target: u32,
    pub composite: Option<CompositeImage>,
}

impl AccumulatorState {
    pub fn new(total_frames_target: u32) -> Self {
        Self {
            frame_count: 0,
            total_frames_target,
            composite: None,
        }
    }
}

/// Stacks accepted frames into composites of `total_frames_target` frames each.
///
/// A flush fires on the accepted frame that arrives once the composite is full, so every
/// composite holds exactly the target number of frames. The frame that triggers the flush is
/// either discarded or used to seed the next composite, depending on [`TriggerFrame`].
pub struct FrameAccumulator {
    state: AccumulatorState,
    filter: Box<dyn FrameFilter>,
    trigger: TriggerFrame,
}

impl FrameAccumulator {
    pub fn new(
        total_frames_target: u32,
        filter: Box<dyn FrameFilter>,
        trigger: TriggerFrame,
    ) -> Self {
        debug!(
            target_frames = total_frames_target,
            filter = filter.name(),
            trigger = ?trigger,
            "accumulator ready"
        );
        Self {
            state: AccumulatorState::new(total_frames_target.max(1)),
            filter,
            trigger,
        }
    }

    pub fn from_config(config: &StitchConfig) -> Self {
        Self::new(
            config.frames_per_composite,
            Box::new(BlankFrameFilter::new(config.min_nonzero_pixels)),
            config.trigger_frame,
        )
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    pub fn frame_count(&self) -> u32 {
        self.state.frame_count
    }

    pub fn target(&self) -> u32 {
        self.state.total_frames_target
    }

    /// Throw away any partial composite. Returns how many frames were discarded.
    pub fn reset(&mut self) -> u32 {
        let discarded = self.state.frame_count;
        if discarded > 0 {
            warn!(discarded, target = self.target(), "discarding partial composite");
        }
        self.state.frame_count = 0;
        self.state.composite = None;
        discarded
    }

    /// Decide the fate of one frame. This is the main entry point.
    ///
    /// The frame is only borrowed; the caller keeps ownership of the buffer behind it.
    pub fn ingest(
        &mut self,
        frame: &RawFrame,
        sink: &mut dyn CompositeSink,
    ) -> Result<Action, StitchError> {
        if !self.filter.should_accept(frame) {
            return Ok(Action::Dropped);
        }

        let target = self.state.total_frames_target;

        if self.state.frame_count == 0 {
            return Ok(self.start(frame));
        }

        if self.state.frame_count < target {
            let composite = match self.state.composite.as_mut() {
                Some(c) => c,
                None => return Ok(self.restart(frame)),
            };
            composite.append(frame)?;
            self.state.frame_count += 1;
            info!(
                frame = self.state.frame_count,
                target,
                height = composite.height(),
                "frame accumulated"
            );
            return Ok(Action::Appended);
        }

        self.flush(frame, sink)
    }

    fn start(&mut self, frame: &RawFrame) -> Action {
        self.state.composite = Some(CompositeImage::from_frame(frame));
        self.state.frame_count = 1;
        info!(
            frame = 1,
            target = self.state.total_frames_target,
            block_id = frame.block_id,
            "composite started"
        );
        Action::Started
    }

    /// A non-zero `frame_count` without a composite; start over from `frame`.
    fn restart(&mut self, frame: &RawFrame) -> Action {
        error!(
            frame_count = self.state.frame_count,
            "composite missing, restarting"
        );
        self.start(frame)
    }

    fn flush(
        &mut self,
        trigger_frame: &RawFrame,
        sink: &mut dyn CompositeSink,
    ) -> Result<Action, StitchError> {
        let Some(composite) = self.state.composite.take() else {
            return Ok(self.restart(trigger_frame));
        };
        self.state.frame_count = 0;

        let path = match sink.write(&composite) {
            Ok(p) => p,
            Err(e) => {
                error!(
                    error = %e,
                    frames = composite.frames(),
                    "failed to write composite, frames lost"
                );
                return Err(StitchError::Encode(e));
            }
        };

        info!(
            path = %path.display(),
            frames = composite.frames(),
            height = composite.height(),
            "composite flushed"
        );

        // Seed only once the composite is written.
        if self.trigger == TriggerFrame::SeedNext {
            self.state.composite = Some(CompositeImage::from_frame(trigger_frame));
            self.state.frame_count = 1;
        }

        Ok(Action::Flushed(FlushReport {
            path,
            width: composite.width(),
            height: composite.height(),
            frames: composite.frames(),
        }))
    }
}
