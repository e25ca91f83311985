use super::engine::DetectionEngine;
use super::types::DetectionCompletion;
use crate::admission::DetectionRequest;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type CompletionHandler = Box<dyn Fn(DetectionCompletion) + Send + Sync + 'static>;

/// Queue depth between the gate and the worker. The gate never has more than
/// one request outstanding, so this never fills.
pub const DISPATCH_CAPACITY: usize = 1;

/// Spawn the single detection worker for one session.
///
/// Cancelling the token stops the worker without waiting for the detector;
/// an analysis already running finishes on the blocking pool and its
/// completion is discarded.
pub fn spawn_detection_worker(
    engine: DetectionEngine,
    mut requests: mpsc::Receiver<DetectionRequest>,
    on_complete: CompletionHandler,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Detection worker started ({})", engine.kind());

        loop {
            let request = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Detection worker cancelled mid-analysis");
                    break;
                }
                completion = engine.analyze(request) => {
                    if cancel.is_cancelled() {
                        debug!(
                            sequence = completion.sequence,
                            "Discarding completion after cancellation"
                        );
                        break;
                    }
                    on_complete(completion);
                }
            }
        }

        info!("Detection worker stopped");
    })
}
