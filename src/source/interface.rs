use crate::config::LensFacing;
use crate::error::CameraError;
use crate::frame::{DrainOutcome, Frame, FrameTracker};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Camera hardware that can be bound to a lens and stream frames
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    /// Acquire the device and start streaming into `sink`.
    ///
    /// On error the implementation must already have released anything it
    /// partially acquired.
    async fn open(
        &self,
        lens: LensFacing,
        resolution: (u32, u32),
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureSession>, CameraError>;

    /// Whether this device can capture at all. Checked before any start.
    fn is_supported(&self) -> bool {
        true
    }
}

/// A bound hardware session. Delivery stops once `close` returns.
#[async_trait]
pub trait CaptureSession: Send + Sync {
    async fn close(&mut self) -> Result<(), CameraError>;
}

/// Receives frames and device faults from the producer context
pub trait FrameConsumer: Send + Sync + 'static {
    fn on_frame(&self, frame: Frame);

    fn on_disconnect(&self, details: String);
}

/// Delivery endpoint a source pushes frames into
#[derive(Clone)]
pub struct FrameSink {
    tracker: Arc<FrameTracker>,
    consumer: Arc<dyn FrameConsumer>,
}

impl FrameSink {
    pub fn new(tracker: Arc<FrameTracker>, consumer: Arc<dyn FrameConsumer>) -> Self {
        Self { tracker, consumer }
    }

    /// Hand a frame to the pipeline. Returns `false`, releasing the frame, once the sink is sealed.
    pub fn deliver(&self, mut frame: Frame) -> bool {
        match self.tracker.lease() {
            Some(lease) => {
                frame.attach_lease(lease);
                self.consumer.on_frame(frame);
                true
            }
            None => {
                trace!("Sink sealed, releasing frame {}", frame.id());
                false
            }
        }
    }

    /// Report that the device went away
    pub fn disconnected<S: Into<String>>(&self, details: S) {
        if self.tracker.is_sealed() {
            debug!("Ignoring disconnect on a sealed sink");
            return;
        }
        self.consumer.on_disconnect(details.into());
    }

    pub fn is_open(&self) -> bool {
        !self.tracker.is_sealed()
    }
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Result of closing a [`SourceHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReport {
    Closed { frames: DrainOutcome },
    AlreadyClosed,
}

/// Exclusive owner of one open capture session
pub struct SourceHandle {
    id: u64,
    session: tokio::sync::Mutex<Option<Box<dyn CaptureSession>>>,
    tracker: Arc<FrameTracker>,
    teardown_timeout: Duration,
}

impl SourceHandle {
    /// Open `source` with a fresh frame tracker feeding `consumer`
    pub async fn open(
        source: &dyn FrameSource,
        lens: LensFacing,
        resolution: (u32, u32),
        consumer: Arc<dyn FrameConsumer>,
        teardown_timeout: Duration,
    ) -> Result<Self, CameraError> {
        let tracker = FrameTracker::new();
        let sink = FrameSink::new(Arc::clone(&tracker), consumer);

        let session = match source.open(lens, resolution, sink).await {
            Ok(session) => session,
            Err(e) => {
                tracker.seal();
                return Err(e);
            }
        };

        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            "Capture session {} bound ({:?} lens, {}x{})",
            id, lens, resolution.0, resolution.1
        );

        Ok(Self {
            id,
            session: tokio::sync::Mutex::new(Some(session)),
            tracker,
            teardown_timeout,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Frames delivered through this handle and not yet released
    pub fn outstanding_frames(&self) -> usize {
        self.tracker.outstanding()
    }

    pub async fn is_closed(&self) -> bool {
        self.session.lock().await.is_none()
    }

    /// Stop delivery, recover outstanding frames, then release the hardware.
    ///
    /// Frames still held when the teardown timeout passes are invalidated so
    /// that nothing reads them after the device is gone. Safe to call more
    /// than once.
    pub async fn close(&self) -> CloseReport {
        let mut guard = self.session.lock().await;
        let Some(mut session) = guard.take() else {
            debug!("Capture session {} already closed", self.id);
            return CloseReport::AlreadyClosed;
        };

        let frames = self.tracker.drain(self.teardown_timeout).await;
        if let DrainOutcome::Invalidated { outstanding } = frames {
            warn!(
                "Capture session {} closing with {} invalidated frame(s)",
                self.id, outstanding
            );
        }

        if let Err(e) = session.close().await {
            error!("Error closing capture session {}: {}", self.id, e);
        }

        info!("Capture session {} released", self.id);
        CloseReport::Closed { frames }
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        let session = self.session.get_mut().take();
        let Some(mut session) = session else {
            return;
        };

        warn!("Capture session {} dropped without close", self.id);
        self.tracker.seal();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let id = self.id;
                runtime.spawn(async move {
                    if let Err(e) = session.close().await {
                        error!("Error closing dropped capture session {}: {}", id, e);
                    }
                });
            }
            Err(_) => error!(
                "No runtime to close capture session {}; hardware may leak",
                self.id
            ),
        }
    }
}
