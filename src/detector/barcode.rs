//! Barcode scanning
//!
//! Scanners report every symbol they find in device order. Choosing which one
//! to surface is left to the engine.

use super::types::BoundingBox;
use crate::error::DetectorError;
use crate::frame::Frame;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Symbology {
    QrCode,
    DataMatrix,
    Ean13,
    Code128,
    Other,
}

/// One symbol located by a scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeHit {
    pub symbology: Symbology,
    /// Decoded contents, `None` when the symbol was located but not decoded
    pub payload: Option<String>,
    pub bounds: Option<BoundingBox>,
}

impl BarcodeHit {
    pub fn decoded<S: Into<String>>(symbology: Symbology, payload: S) -> Self {
        Self {
            symbology,
            payload: Some(payload.into()),
            bounds: None,
        }
    }

    pub fn undecoded(symbology: Symbology) -> Self {
        Self {
            symbology,
            payload: None,
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// Symbol decoder run against one frame at a time
pub trait BarcodeScanner: Send + Sync + 'static {
    fn scan(&self, frame: &Frame) -> Result<Vec<BarcodeHit>, DetectorError>;
}

#[cfg(feature = "qr")]
pub use self::qr::QrScanner;

#[cfg(feature = "qr")]
mod qr {
    use super::{BarcodeHit, BarcodeScanner, Symbology};
    use crate::detector::types::BoundingBox;
    use crate::error::DetectorError;
    use crate::frame::Frame;
    use tracing::{debug, trace};

    /// QR decoder backed by `rqrr`
    ///
    /// Frames are converted to greyscale and downscaled before grid detection;
    /// reported bounds are mapped back to frame pixels.
    #[derive(Debug, Clone)]
    pub struct QrScanner {
        max_dimension: u32,
    }

    impl Default for QrScanner {
        fn default() -> Self {
            Self::new()
        }
    }

    impl QrScanner {
        pub fn new() -> Self {
            Self { max_dimension: 640 }
        }

        pub fn with_max_dimension(max_dimension: u32) -> Self {
            Self { max_dimension }
        }
    }

    impl BarcodeScanner for QrScanner {
        fn scan(&self, frame: &Frame) -> Result<Vec<BarcodeHit>, DetectorError> {
            let start = std::time::Instant::now();
            let luma = frame.to_luma(self.max_dimension)?;
            let scale = luma.scale;

            let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
                luma.width() as usize,
                luma.height() as usize,
                |x, y| luma.image.get_pixel(x as u32, y as u32).0[0],
            );
            let grids = prepared.detect_grids();

            trace!(
                frame_id = frame.id(),
                grids = grids.len(),
                "QR grid detection complete"
            );

            let hits = grids
                .into_iter()
                .map(|grid| {
                    let bounds = BoundingBox::enclosing(grid.bounds.iter().map(|p| {
                        (
                            (p.x as f32 * scale).round() as i32,
                            (p.y as f32 * scale).round() as i32,
                        )
                    }));

                    let hit = match grid.decode() {
                        Ok((_meta, content)) => BarcodeHit::decoded(Symbology::QrCode, content),
                        Err(e) => {
                            debug!(error = %e, "Failed to decode QR grid");
                            BarcodeHit::undecoded(Symbology::QrCode)
                        }
                    };

                    match bounds {
                        Some(bounds) => hit.with_bounds(bounds),
                        None => hit,
                    }
                })
                .collect::<Vec<_>>();

            if !hits.is_empty() {
                debug!(
                    frame_id = frame.id(),
                    count = hits.len(),
                    total_ms = start.elapsed().as_millis() as u64,
                    "QR scan found symbols"
                );
            }

            Ok(hits)
        }
    }
}
