use crate::error::DetectorError;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Smallest box enclosing all `points`
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (i32, i32)>,
    {
        points.into_iter().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => Self::new(x, y, x, y),
                Some(b) => Self::new(b.left.min(x), b.top.min(y), b.right.max(x), b.bottom.max(y)),
            })
        })
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// One recognized block of text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub bounds: BoundingBox,
}

impl TextBlock {
    pub fn new<S: Into<String>>(text: S, bounds: BoundingBox) -> Self {
        Self {
            text: text.into(),
            bounds,
        }
    }
}

/// Full recognizer output for one frame
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    pub blocks: Vec<TextBlock>,
}

/// What a detector found in a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionResult {
    Barcode { payload: String },
    Text(RecognizedText),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    Detected(DetectionResult),
    /// Analysis finished without finding anything
    Empty,
    Failed(DetectorError),
}

/// Outcome of one request, tagged with the request's session generation and sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionCompletion {
    pub generation: u64,
    pub sequence: u64,
    pub frame_id: u64,
    pub outcome: DetectionOutcome,
}
