mod barcode;
mod engine;
mod text;
mod types;
mod worker;

#[cfg(feature = "qr")]
pub use barcode::QrScanner;
pub use barcode::{BarcodeHit, BarcodeScanner, Symbology};
pub use engine::DetectionEngine;
pub use text::TextRecognizer;
pub use types::{
    BoundingBox, DetectionCompletion, DetectionOutcome, DetectionResult, RecognizedText,
    TextBlock,
};
pub use worker::{spawn_detection_worker, CompletionHandler, DISPATCH_CAPACITY};
