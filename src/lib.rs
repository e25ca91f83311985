pub mod admission;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod frame;
pub mod permission;
pub mod session;
pub mod source;

pub use admission::{Admission, AdmissionStatsSnapshot, DetectionRequest, DropReason, FrameAdmission};
pub use config::{DetectorKind, LensFacing, TurbocamConfig};
pub use detector::{
    BarcodeHit, BarcodeScanner, BoundingBox, DetectionEngine, DetectionResult, RecognizedText,
    Symbology, TextBlock, TextRecognizer,
};
#[cfg(feature = "qr")]
pub use detector::QrScanner;
pub use error::{CameraError, DetectorError, ErrorKind, FrameError, Result, TurbocamError};
pub use events::{EventBus, ResultSink, ScanEvent};
pub use frame::{Frame, PixelFormat, Rotation};
pub use permission::{PermissionOracle, StaticPermission};
pub use session::{
    SessionController, SessionControllerBuilder, SessionState, SessionStatsSnapshot,
    StartOutcome, StopOutcome,
};
pub use source::{FrameSink, FrameSource, MockFrameSource, ReplayFrameSource, SourceHandle};
