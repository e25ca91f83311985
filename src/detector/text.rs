use super::types::RecognizedText;
use crate::error::DetectorError;
use crate::frame::Frame;

/// Printed-text recognizer run against one frame at a time.
///
/// Block bounds must be in frame pixel coordinates, ordered as the model
/// reports them.
pub trait TextRecognizer: Send + Sync + 'static {
    fn recognize(&self, frame: &Frame) -> Result<RecognizedText, DetectorError>;
}
