pub mod blank;
pub mod traits;

pub use blank::BlankFrameFilter;
pub use traits::FrameFilter;
