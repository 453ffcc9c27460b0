pub mod encoder;
pub mod naming;
pub mod state;

pub use encoder::{CompositeSink, EncodeError, MemorySink, PngWriter};
pub use state::{AccumulatorState, Action, FlushReport, FrameAccumulator};
