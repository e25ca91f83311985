use super::barcode::BarcodeScanner;
use super::text::TextRecognizer;
use super::types::{DetectionCompletion, DetectionOutcome, DetectionResult};
use crate::admission::DetectionRequest;
use crate::config::{DetectorConfig, DetectorKind};
use crate::error::{DetectorError, Result, TurbocamError};
use crate::frame::Frame;
use std::sync::Arc;
use tracing::{debug, warn};

/// Detector selected at configuration time
#[derive(Clone)]
pub enum DetectionEngine {
    Barcode(Arc<dyn BarcodeScanner>),
    Text(Arc<dyn TextRecognizer>),
}

impl std::fmt::Debug for DetectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DetectionEngine::{}", self.kind())
    }
}

impl DetectionEngine {
    pub fn barcode<S: BarcodeScanner>(scanner: S) -> Self {
        Self::Barcode(Arc::new(scanner))
    }

    pub fn text<R: TextRecognizer>(recognizer: R) -> Self {
        Self::Text(Arc::new(recognizer))
    }

    /// Build the built-in engine for `config`
    ///
    /// Only barcode scanning ships with the crate; text recognition needs a
    /// platform model passed through [`DetectionEngine::text`].
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        match config.kind {
            #[cfg(feature = "qr")]
            DetectorKind::Barcode => Ok(Self::barcode(super::barcode::QrScanner::with_max_dimension(
                config.max_dimension,
            ))),
            #[cfg(not(feature = "qr"))]
            DetectorKind::Barcode => Err(TurbocamError::component(
                "detection_engine",
                "barcode scanning requires the `qr` feature",
            )),
            DetectorKind::Text => Err(TurbocamError::component(
                "detection_engine",
                "no built-in text recognizer; supply one with DetectionEngine::text",
            )),
        }
    }

    pub fn kind(&self) -> DetectorKind {
        match self {
            DetectionEngine::Barcode(_) => DetectorKind::Barcode,
            DetectionEngine::Text(_) => DetectorKind::Text,
        }
    }

    /// Run the detector against one frame on the calling thread
    pub fn detect(&self, frame: &Frame) -> DetectionOutcome {
        match self {
            DetectionEngine::Barcode(scanner) => match scanner.scan(frame) {
                // First decoded payload in device order wins; the rest are ignored.
                Ok(hits) => match hits.into_iter().find_map(|hit| hit.payload) {
                    Some(payload) => {
                        DetectionOutcome::Detected(DetectionResult::Barcode { payload })
                    }
                    None => DetectionOutcome::Empty,
                },
                Err(e) => DetectionOutcome::Failed(e),
            },
            DetectionEngine::Text(recognizer) => match recognizer.recognize(frame) {
                Ok(recognized) if recognized.text.is_empty() => DetectionOutcome::Empty,
                Ok(recognized) => DetectionOutcome::Detected(DetectionResult::Text(recognized)),
                Err(e) => DetectionOutcome::Failed(e),
            },
        }
    }

    /// Analyze an admitted frame off the async runtime.
    ///
    /// The request, and with it the frame and its admission slot, is dropped
    /// on the blocking thread as soon as the detector returns.
    pub async fn analyze(&self, request: DetectionRequest) -> DetectionCompletion {
        let generation = request.generation();
        let sequence = request.sequence();
        let frame_id = request.frame().id();
        let engine = self.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let outcome = engine.detect(request.frame());
            drop(request);
            outcome
        })
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Detection task panicked");
            DetectionOutcome::Failed(DetectorError::Panicked {
                details: e.to_string(),
            })
        });

        debug!(
            frame_id,
            sequence,
            generation,
            outcome = outcome_label(&outcome),
            "Detection finished"
        );

        DetectionCompletion {
            generation,
            sequence,
            frame_id,
            outcome,
        }
    }
}

fn outcome_label(outcome: &DetectionOutcome) -> &'static str {
    match outcome {
        DetectionOutcome::Detected(DetectionResult::Barcode { .. }) => "barcode",
        DetectionOutcome::Detected(DetectionResult::Text(_)) => "text",
        DetectionOutcome::Empty => "empty",
        DetectionOutcome::Failed(_) => "failed",
    }
}
