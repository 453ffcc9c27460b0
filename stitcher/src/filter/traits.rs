use line_stitch_common::frame::RawFrame;

/// Gate deciding whether a retrieved frame may enter the composite.
///
/// Implementations see every frame the accumulator is handed, in acquisition order.
pub trait FrameFilter: Send {
    /// Returns `true` if the frame should be stacked.
    /// Returns `false` to drop it without touching accumulator state.
    fn should_accept(&mut self, frame: &RawFrame) -> bool;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
