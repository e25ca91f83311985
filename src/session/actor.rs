use super::pipeline::ScanPipeline;
use super::state::{SessionState, SessionStats, StartOutcome, StopOutcome};
use crate::admission::{AdmissionStats, FrameAdmission};
use crate::config::TurbocamConfig;
use crate::detector::{
    spawn_detection_worker, DetectionCompletion, DetectionEngine, DetectionOutcome,
    DetectionResult, DISPATCH_CAPACITY,
};
use crate::error::{CameraError, ErrorKind};
use crate::events::ResultSink;
use crate::permission::PermissionOracle;
use crate::source::{CloseReport, FrameSource, SourceHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type OpenResult = Result<SourceHandle, CameraError>;

/// Everything that can change session state, applied one at a time by the actor
pub(crate) enum ControlMessage {
    Start(oneshot::Sender<StartOutcome>),
    Stop(oneshot::Sender<StopOutcome>),
    Shutdown(oneshot::Sender<()>),
    PermissionResolved { request_id: Uuid, granted: bool },
    DetectionCompleted(DetectionCompletion),
    HardwareFault { generation: u64, details: String },
}

/// Collaborators the actor is built from
pub(crate) struct ActorContext {
    pub config: TurbocamConfig,
    pub source: Arc<dyn FrameSource>,
    pub engine: DetectionEngine,
    pub oracle: Arc<dyn PermissionOracle>,
    pub sink: Arc<dyn ResultSink>,
    pub admission_stats: Arc<AdmissionStats>,
    pub stats: Arc<SessionStats>,
}

/// Resources acquired ahead of the hardware: the gate and the detection worker
struct SessionParts {
    admission: Arc<FrameAdmission>,
    worker: JoinHandle<()>,
    cancel: CancellationToken,
}

impl SessionParts {
    async fn stop_worker(mut self, timeout: Duration) {
        self.cancel.cancel();
        if tokio::time::timeout(timeout, &mut self.worker).await.is_err() {
            warn!("Detection worker did not stop within {:?}; aborting", timeout);
            self.worker.abort();
        }
    }
}

struct PendingOpen {
    generation: u64,
    task: JoinHandle<OpenResult>,
    parts: SessionParts,
}

struct ActiveSession {
    generation: u64,
    handle: SourceHandle,
    parts: SessionParts,
}

/// Single writer of [`SessionState`]
pub(crate) struct SessionActor {
    context: ActorContext,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    state_tx: watch::Sender<SessionState>,
    shutdown: CancellationToken,
    generation: u64,
    pending_permission: Option<Uuid>,
    pending_open: Option<PendingOpen>,
    active: Option<ActiveSession>,
    last_sequence: u64,
    detector_failing: bool,
}

impl SessionActor {
    pub(crate) fn new(
        context: ActorContext,
        control_tx: mpsc::UnboundedSender<ControlMessage>,
        control_rx: mpsc::UnboundedReceiver<ControlMessage>,
        state_tx: watch::Sender<SessionState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context,
            control_tx,
            control_rx,
            state_tx,
            shutdown,
            generation: 0,
            pending_permission: None,
            pending_open: None,
            active: None,
            last_sequence: 0,
            detector_failing: false,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            "Session controller started ({} detector)",
            self.context.engine.kind()
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!("Session controller cancelled");
                    break;
                }
                message = self.control_rx.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    if !self.handle_message(message).await {
                        break;
                    }
                }
                (generation, result) = join_pending(&mut self.pending_open) => {
                    self.on_open_resolved(generation, result).await;
                }
            }
        }

        self.release_all().await;
        info!("Session controller stopped");
    }

    /// Returns `false` once the actor should exit
    async fn handle_message(&mut self, message: ControlMessage) -> bool {
        match message {
            ControlMessage::Start(reply) => {
                let outcome = self.start();
                let _ = reply.send(outcome);
            }
            ControlMessage::Stop(reply) => {
                let outcome = self.stop().await;
                let _ = reply.send(outcome);
            }
            ControlMessage::Shutdown(reply) => {
                self.stop().await;
                let _ = reply.send(());
                return false;
            }
            ControlMessage::PermissionResolved {
                request_id,
                granted,
            } => self.on_permission_resolved(request_id, granted),
            ControlMessage::DetectionCompleted(completion) => {
                self.on_detection_completed(completion).await
            }
            ControlMessage::HardwareFault {
                generation,
                details,
            } => self.on_hardware_fault(generation, &details).await,
        }
        true
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn teardown_timeout(&self) -> Duration {
        self.context.config.session.teardown_timeout()
    }

    fn transition(&mut self, next: SessionState) {
        let previous = self.state();
        if previous == next {
            return;
        }

        info!("Session state {} -> {}", previous, next);
        self.state_tx.send_replace(next);
        self.context.sink.on_state_changed(previous, next);
    }

    fn start(&mut self) -> StartOutcome {
        match self.state() {
            state if state.is_active() => {
                debug!("Start ignored, session already {}", state);
                return StartOutcome::AlreadyActive;
            }
            SessionState::Faulted => self.transition(SessionState::Idle),
            _ => {}
        }

        if self.context.oracle.has_permission() {
            self.begin_open();
        } else {
            self.request_permission();
        }
        StartOutcome::Started
    }

    fn request_permission(&mut self) {
        let request_id = Uuid::new_v4();
        self.pending_permission = Some(request_id);
        self.transition(SessionState::AwaitingPermission);
        info!(%request_id, "Requesting camera permission");

        let oracle = Arc::clone(&self.context.oracle);
        let control = self.control_tx.clone();
        tokio::spawn(async move {
            let granted = oracle.request_permission().await;
            let _ = control.send(ControlMessage::PermissionResolved {
                request_id,
                granted,
            });
        });
    }

    fn on_permission_resolved(&mut self, request_id: Uuid, granted: bool) {
        if self.pending_permission != Some(request_id)
            || self.state() != SessionState::AwaitingPermission
        {
            debug!(%request_id, "Ignoring stale permission response");
            return;
        }
        self.pending_permission = None;

        if granted {
            info!(%request_id, "Camera permission granted");
            self.begin_open();
        } else {
            warn!(%request_id, "Camera permission denied");
            self.transition(SessionState::Faulted);
            self.context.sink.on_error(
                ErrorKind::PermissionDenied,
                &CameraError::PermissionDenied.to_string(),
            );
        }
    }

    /// Acquire worker, gate and frame sink, then open the hardware on its own task
    fn begin_open(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.last_sequence = 0;
        self.detector_failing = false;
        SessionStats::bump(&self.context.stats.sessions_started);
        self.transition(SessionState::Starting);

        let admission = Arc::new(FrameAdmission::new(
            self.context.engine.kind(),
            generation,
            Arc::clone(&self.context.admission_stats),
        ));
        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_CAPACITY);
        let cancel = CancellationToken::new();

        let completions = self.control_tx.clone();
        let worker = spawn_detection_worker(
            self.context.engine.clone(),
            dispatch_rx,
            Box::new(move |completion| {
                let _ = completions.send(ControlMessage::DetectionCompleted(completion));
            }),
            cancel.clone(),
        );

        let pipeline = Arc::new(ScanPipeline::new(
            generation,
            Arc::clone(&admission),
            dispatch_tx,
            self.control_tx.clone(),
        ));

        let source = Arc::clone(&self.context.source);
        let camera = self.context.config.camera.clone();
        let teardown_timeout = self.teardown_timeout();
        debug!(generation, "Opening {:?} camera", camera.lens);
        let task = tokio::spawn(async move {
            SourceHandle::open(
                source.as_ref(),
                camera.lens,
                camera.resolution,
                pipeline,
                teardown_timeout,
            )
            .await
        });

        self.pending_open = Some(PendingOpen {
            generation,
            task,
            parts: SessionParts {
                admission,
                worker,
                cancel,
            },
        });
    }

    async fn on_open_resolved(&mut self, generation: u64, result: Result<OpenResult, JoinError>) {
        let Some(pending) = self.pending_open.take() else {
            return;
        };
        let parts = pending.parts;

        match result {
            Ok(Ok(handle))
                if generation == self.generation && self.state() == SessionState::Starting =>
            {
                info!(generation, handle = handle.id(), "Capture session running");
                self.active = Some(ActiveSession {
                    generation,
                    handle,
                    parts,
                });
                self.transition(SessionState::Running);
            }
            Ok(Ok(handle)) => {
                warn!(generation, "Camera opened for an abandoned session; closing");
                parts.admission.close();
                handle.close().await;
                parts.stop_worker(self.teardown_timeout()).await;
            }
            Ok(Err(e)) => self.fail_start(parts, e).await,
            Err(e) => {
                self.fail_start(parts, CameraError::unavailable(format!("open task failed: {}", e)))
                    .await
            }
        }
    }

    async fn fail_start(&mut self, parts: SessionParts, error: CameraError) {
        error!(generation = self.generation, "Failed to open camera: {}", error);
        parts.admission.close();
        parts.stop_worker(self.teardown_timeout()).await;
        self.transition(SessionState::Faulted);
        self.context.sink.on_error(error.kind(), &error.to_string());
    }

    async fn stop(&mut self) -> StopOutcome {
        match self.state() {
            SessionState::Idle | SessionState::Faulted | SessionState::Stopping => {
                debug!("Stop ignored, session is {}", self.state());
                StopOutcome::AlreadyIdle
            }
            SessionState::AwaitingPermission => {
                info!("Discarding pending permission request");
                self.pending_permission = None;
                self.transition(SessionState::Idle);
                StopOutcome::Stopped
            }
            SessionState::Starting => {
                self.transition(SessionState::Stopping);
                self.abandon_pending_open().await;
                self.transition(SessionState::Idle);
                StopOutcome::Stopped
            }
            SessionState::Running => {
                self.transition(SessionState::Stopping);
                self.teardown_active().await;
                self.transition(SessionState::Idle);
                StopOutcome::Stopped
            }
        }
    }

    /// Wait out an in-flight open and release whatever it produced
    async fn abandon_pending_open(&mut self) {
        let Some(mut pending) = self.pending_open.take() else {
            return;
        };
        let timeout = self.teardown_timeout();
        pending.parts.admission.close();

        let joined = tokio::time::timeout(timeout, &mut pending.task).await;
        match joined {
            Ok(Ok(Ok(handle))) => {
                handle.close().await;
            }
            Ok(Ok(Err(e))) => debug!("Pending camera open failed during teardown: {}", e),
            Ok(Err(e)) => error!("Camera open task failed: {}", e),
            Err(_) => {
                warn!(
                    "Camera open still pending after {:?}; closing it in the background",
                    timeout
                );
                let task = pending.task;
                tokio::spawn(async move {
                    if let Ok(Ok(handle)) = task.await {
                        handle.close().await;
                    }
                });
            }
        }

        pending.parts.stop_worker(timeout).await;
    }

    /// Release the live session in reverse order of acquisition
    async fn teardown_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let timeout = self.teardown_timeout();

        active.parts.admission.close();
        if let CloseReport::Closed { frames } = active.handle.close().await {
            debug!(generation = active.generation, ?frames, "Capture session closed");
        }
        active.parts.stop_worker(timeout).await;
    }

    async fn on_hardware_fault(&mut self, generation: u64, details: &str) {
        if generation != self.generation {
            debug!(generation, "Ignoring fault from a previous session");
            return;
        }

        match self.state() {
            SessionState::Running => self.teardown_active().await,
            SessionState::Starting => self.abandon_pending_open().await,
            state => {
                debug!("Ignoring hardware fault while {}", state);
                return;
            }
        }

        error!(generation, "Camera hardware lost: {}", details);
        self.transition(SessionState::Faulted);
        self.context
            .sink
            .on_error(ErrorKind::HardwareUnavailable, details);
    }

    async fn on_detection_completed(&mut self, completion: DetectionCompletion) {
        let current = self.active.as_ref().map(|active| active.generation);
        if self.state() != SessionState::Running
            || current != Some(completion.generation)
            || completion.sequence <= self.last_sequence
        {
            SessionStats::bump(&self.context.stats.detections_discarded);
            debug!(
                generation = completion.generation,
                sequence = completion.sequence,
                "Discarding stale detection"
            );
            return;
        }
        self.last_sequence = completion.sequence;

        let forwarded = match completion.outcome {
            DetectionOutcome::Detected(DetectionResult::Barcode { payload }) => {
                self.detector_failing = false;
                self.context.sink.on_barcode_detected(&payload);
                true
            }
            DetectionOutcome::Detected(DetectionResult::Text(recognized)) => {
                self.detector_failing = false;
                self.context
                    .sink
                    .on_text_detected(&recognized.text, &recognized.blocks);
                true
            }
            DetectionOutcome::Empty => {
                self.detector_failing = false;
                SessionStats::bump(&self.context.stats.detections_empty);
                false
            }
            DetectionOutcome::Failed(e) => {
                SessionStats::bump(&self.context.stats.detector_failures);
                if self.detector_failing {
                    debug!(frame_id = completion.frame_id, "Detector still failing: {}", e);
                } else {
                    self.detector_failing = true;
                    warn!(frame_id = completion.frame_id, "Detector failed: {}", e);
                    self.context
                        .sink
                        .on_error(ErrorKind::DetectorFailure, &e.to_string());
                }
                false
            }
        };

        if forwarded {
            SessionStats::bump(&self.context.stats.detections_forwarded);
            if self.context.config.detector.one_shot() {
                info!("Match found in one-shot mode, stopping session");
                self.stop().await;
            }
        }
    }

    async fn release_all(&mut self) {
        self.pending_permission = None;
        self.abandon_pending_open().await;
        self.teardown_active().await;
        if self.state().is_active() {
            self.transition(SessionState::Idle);
        }
    }
}

async fn join_pending(pending: &mut Option<PendingOpen>) -> (u64, Result<OpenResult, JoinError>) {
    match pending {
        Some(open) => (open.generation, (&mut open.task).await),
        None => std::future::pending().await,
    }
}
