use crate::detector::TextBlock;
use crate::error::ErrorKind;
use crate::session::SessionState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Receiver of everything a scanning session reports to the host
pub trait ResultSink: Send + Sync + 'static {
    fn on_barcode_detected(&self, payload: &str);

    fn on_text_detected(&self, text: &str, blocks: &[TextBlock]);

    fn on_error(&self, kind: ErrorKind, detail: &str);

    fn on_state_changed(&self, _previous: SessionState, _next: SessionState) {}
}

/// Events a scanning session emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanEvent {
    BarcodeDetected {
        payload: String,
    },
    TextDetected {
        text: String,
        blocks: Vec<TextBlock>,
    },
    Error {
        kind: ErrorKind,
        detail: String,
    },
    StateChanged {
        previous: SessionState,
        next: SessionState,
    },
}

impl ScanEvent {
    /// Name the host registers listeners under
    pub fn event_name(&self) -> &'static str {
        match self {
            ScanEvent::BarcodeDetected { .. } => "onQRCodeDetected",
            ScanEvent::TextDetected { .. } => "onTextDetected",
            ScanEvent::Error { .. } => "onError",
            ScanEvent::StateChanged { .. } => "onStateChanged",
        }
    }

    /// Body delivered with the event
    pub fn payload(&self) -> Value {
        match self {
            ScanEvent::BarcodeDetected { payload } => json!({
                "success": true,
                "code": payload,
            }),
            ScanEvent::TextDetected { text, blocks } => json!({
                "text": text,
                "blocks": blocks
                    .iter()
                    .map(|block| json!({
                        "text": block.text,
                        "left": block.bounds.left,
                        "top": block.bounds.top,
                        "right": block.bounds.right,
                        "bottom": block.bounds.bottom,
                    }))
                    .collect::<Vec<_>>(),
            }),
            ScanEvent::Error { kind, detail } => json!({
                "code": kind.code(),
                "message": detail,
            }),
            ScanEvent::StateChanged { previous, next } => json!({
                "previous": previous.to_string(),
                "next": next.to_string(),
            }),
        }
    }

    pub fn description(&self) -> String {
        match self {
            ScanEvent::BarcodeDetected { payload } => format!("Barcode detected: {}", payload),
            ScanEvent::TextDetected { text, blocks } => {
                format!("Text detected ({} blocks): {}", blocks.len(), text)
            }
            ScanEvent::Error { kind, detail } => format!("Error {}: {}", kind, detail),
            ScanEvent::StateChanged { previous, next } => {
                format!("Session {} -> {}", previous, next)
            }
        }
    }
}

/// Broadcast fan-out of scan events to any number of host subscribers
pub struct EventBus {
    sender: broadcast::Sender<ScanEvent>,
    debug_logging: bool,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers, returning how many received it
    pub fn publish(&self, event: ScanEvent) -> usize {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        match &event {
            ScanEvent::BarcodeDetected { payload } => info!("Barcode detected: {}", payload),
            ScanEvent::TextDetected { blocks, .. } => {
                info!("Text detected in {} block(s)", blocks.len())
            }
            ScanEvent::Error { kind, detail } => match kind {
                ErrorKind::DetectorFailure => warn!("Detector failure: {}", detail),
                _ => error!("Session error {}: {}", kind, detail),
            },
            ScanEvent::StateChanged { .. } => {}
        }

        // No subscribers is not an error for a scanner with nobody listening yet.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ResultSink for EventBus {
    fn on_barcode_detected(&self, payload: &str) {
        self.publish(ScanEvent::BarcodeDetected {
            payload: payload.to_string(),
        });
    }

    fn on_text_detected(&self, text: &str, blocks: &[TextBlock]) {
        self.publish(ScanEvent::TextDetected {
            text: text.to_string(),
            blocks: blocks.to_vec(),
        });
    }

    fn on_error(&self, kind: ErrorKind, detail: &str) {
        self.publish(ScanEvent::Error {
            kind,
            detail: detail.to_string(),
        });
    }

    fn on_state_changed(&self, previous: SessionState, next: SessionState) {
        self.publish(ScanEvent::StateChanged { previous, next });
    }
}
