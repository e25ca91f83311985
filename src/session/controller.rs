use super::actor::{ActorContext, ControlMessage, SessionActor};
use super::state::{SessionState, SessionStats, SessionStatsSnapshot, StartOutcome, StopOutcome};
use crate::admission::AdmissionStats;
use crate::config::TurbocamConfig;
use crate::detector::DetectionEngine;
use crate::error::{Result, SessionError, TurbocamError};
use crate::events::ResultSink;
use crate::permission::{PermissionOracle, StaticPermission};
use crate::source::FrameSource;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Owner of the scanning lifecycle.
///
/// Every call is forwarded to a single actor task, so `start` and `stop` may
/// be called concurrently from any task. Must be created inside a tokio
/// runtime.
pub struct SessionController {
    control: mpsc::UnboundedSender<ControlMessage>,
    state: watch::Receiver<SessionState>,
    source: Arc<dyn FrameSource>,
    oracle: Arc<dyn PermissionOracle>,
    admission_stats: Arc<AdmissionStats>,
    stats: Arc<SessionStats>,
    shutdown: CancellationToken,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        config: TurbocamConfig,
        source: Arc<dyn FrameSource>,
        engine: DetectionEngine,
        oracle: Arc<dyn PermissionOracle>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        config.validate()?;

        if engine.kind() != config.detector.kind {
            return Err(TurbocamError::component(
                "session_controller".to_string(),
                format!(
                    "configured for {} detection but given a {} engine",
                    config.detector.kind,
                    engine.kind()
                ),
            ));
        }

        info!(
            "Creating session controller ({} detector, one-shot: {})",
            config.detector.kind,
            config.detector.one_shot()
        );

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let shutdown = CancellationToken::new();
        let admission_stats = Arc::new(AdmissionStats::default());
        let stats = Arc::new(SessionStats::default());

        let actor = SessionActor::new(
            ActorContext {
                config,
                source: Arc::clone(&source),
                engine,
                oracle: Arc::clone(&oracle),
                sink,
                admission_stats: Arc::clone(&admission_stats),
                stats: Arc::clone(&stats),
            },
            control_tx.clone(),
            control_rx,
            state_tx,
            shutdown.clone(),
        );
        let actor = tokio::spawn(actor.run());

        Ok(Self {
            control: control_tx,
            state: state_rx,
            source,
            oracle,
            admission_stats,
            stats,
            shutdown,
            actor: Mutex::new(Some(actor)),
        })
    }

    pub fn builder() -> SessionControllerBuilder {
        SessionControllerBuilder::new()
    }

    /// Begin scanning. Returns once the request is accepted, not once the camera is bound.
    pub async fn start(&self) -> Result<StartOutcome> {
        self.request(ControlMessage::Start).await
    }

    /// Stop scanning. Returns after the hardware is released and no further
    /// results can be delivered for the stopped session.
    pub async fn stop(&self) -> Result<StopOutcome> {
        self.request(ControlMessage::Stop).await
    }

    async fn request<T>(&self, message: impl FnOnce(oneshot::Sender<T>) -> ControlMessage) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(message(reply_tx))
            .map_err(|_| SessionError::ControllerClosed)?;
        Ok(reply_rx.await.map_err(|_| SessionError::ControllerClosed)?)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the session reaches `target`
    pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> Result<()> {
        let mut state = self.state.clone();
        let waited = tokio::time::timeout(timeout, state.wait_for(|current| *current == target))
            .await
            .map(|reached| reached.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SessionError::ControllerClosed.into()),
            Err(_) => Err(SessionError::StateTimeout {
                expected: target.to_string(),
            }
            .into()),
        }
    }

    /// Whether the frame source can run on this device at all
    pub fn is_supported(&self) -> bool {
        self.source.is_supported()
    }

    pub fn check_permission(&self) -> bool {
        self.oracle.has_permission()
    }

    /// Prompt for camera access ahead of `start`
    pub async fn request_permission(&self) -> bool {
        self.oracle.request_permission().await
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot::capture(&self.stats, self.admission_stats.snapshot())
    }

    /// Stop any live session and end the controller
    pub async fn shutdown(&self) {
        info!("Shutting down session controller");
        if let Err(e) = self.request(ControlMessage::Shutdown).await {
            debug!("Session controller already gone: {}", e);
        }

        let actor = self.actor.lock().take();
        if let Some(actor) = actor {
            let _ = actor.await;
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builder for [`SessionController`]
pub struct SessionControllerBuilder {
    config: Option<TurbocamConfig>,
    source: Option<Arc<dyn FrameSource>>,
    engine: Option<DetectionEngine>,
    oracle: Option<Arc<dyn PermissionOracle>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl SessionControllerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            source: None,
            engine: None,
            oracle: None,
            sink: None,
        }
    }

    pub fn config(mut self, config: TurbocamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Detector to run; defaults to the built-in engine for the configured kind
    pub fn engine(mut self, engine: DetectionEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Permission oracle; defaults to permission already granted
    pub fn permission(mut self, oracle: Arc<dyn PermissionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<SessionController> {
        let config = self.config.unwrap_or_default();
        let source = self
            .source
            .ok_or_else(|| TurbocamError::system("Frame source must be specified"))?;
        let sink = self
            .sink
            .ok_or_else(|| TurbocamError::system("Result sink must be specified"))?;

        let engine = match self.engine {
            Some(engine) => engine,
            None => DetectionEngine::from_config(&config.detector)?,
        };
        let oracle = self
            .oracle
            .unwrap_or_else(|| Arc::new(StaticPermission::granted()));

        SessionController::new(config, source, engine, oracle, sink)
    }
}

impl Default for SessionControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
