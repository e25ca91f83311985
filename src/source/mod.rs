mod interface;
mod mock;
mod replay;

pub use interface::{
    CaptureSession, CloseReport, FrameConsumer, FrameSink, FrameSource, SourceHandle,
};
pub use mock::MockFrameSource;
pub use replay::ReplayFrameSource;
