use super::actor::ControlMessage;
use crate::admission::{Admission, DetectionRequest, FrameAdmission};
use crate::frame::Frame;
use crate::source::FrameConsumer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Frame path for one session generation: gate, then hand off to the worker.
///
/// Runs on the source's producer context and never blocks it.
pub(crate) struct ScanPipeline {
    generation: u64,
    admission: Arc<FrameAdmission>,
    dispatch: mpsc::Sender<DetectionRequest>,
    control: mpsc::UnboundedSender<ControlMessage>,
}

impl ScanPipeline {
    pub(crate) fn new(
        generation: u64,
        admission: Arc<FrameAdmission>,
        dispatch: mpsc::Sender<DetectionRequest>,
        control: mpsc::UnboundedSender<ControlMessage>,
    ) -> Self {
        Self {
            generation,
            admission,
            dispatch,
            control,
        }
    }
}

impl FrameConsumer for ScanPipeline {
    fn on_frame(&self, frame: Frame) {
        if let Admission::Admitted(request) = self.admission.offer(frame) {
            // The gate holds at most one request, so the queue only rejects once the worker is gone.
            if let Err(e) = self.dispatch.try_send(request) {
                trace!(
                    generation = self.generation,
                    "Worker unavailable, releasing request: {}",
                    e
                );
            }
        }
    }

    fn on_disconnect(&self, details: String) {
        debug!(
            generation = self.generation,
            "Capture device lost: {}", details
        );
        let _ = self.control.send(ControlMessage::HardwareFault {
            generation: self.generation,
            details,
        });
    }
}
