use super::interface::{CaptureSession, FrameSink, FrameSource};
use crate::config::LensFacing;
use crate::error::CameraError;
use crate::frame::{Frame, PixelFormat};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
struct MockState {
    unsupported: AtomicBool,
    open_attempts: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    frames_pushed: AtomicUsize,
    frames_released: AtomicUsize,
    next_frame_id: AtomicU64,
    fail_next_open: Mutex<Option<CameraError>>,
    open_delay: Mutex<Duration>,
    sink: Mutex<Option<FrameSink>>,
    last_request: Mutex<Option<(LensFacing, (u32, u32))>>,
}

/// Test double for camera hardware with open/close and frame release counters
#[derive(Clone, Default)]
pub struct MockFrameSource {
    state: Arc<MockState>,
}

impl MockFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the device has no usable camera; `open` then fails as unavailable
    pub fn set_supported(&self, supported: bool) {
        self.state.unsupported.store(!supported, Ordering::SeqCst);
    }

    /// Make the next `open` fail with `error`
    pub fn fail_next_open(&self, error: CameraError) {
        *self.state.fail_next_open.lock() = Some(error);
    }

    /// Delay every `open` by `delay`
    pub fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock() = delay;
    }

    pub fn open_attempts(&self) -> usize {
        self.state.open_attempts.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.state.sink.lock().is_some()
    }

    pub fn frames_pushed(&self) -> usize {
        self.state.frames_pushed.load(Ordering::SeqCst)
    }

    pub fn frames_released(&self) -> usize {
        self.state.frames_released.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<(LensFacing, (u32, u32))> {
        *self.state.last_request.lock()
    }

    /// Build a flat greyscale frame whose release is counted
    pub fn frame(&self, width: u32, height: u32) -> Frame {
        let id = self.state.next_frame_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        Frame::new(
            id,
            Instant::now(),
            vec![0u8; (width * height) as usize],
            width,
            height,
            PixelFormat::Luma8,
        )
        .on_release(move |_| {
            state.frames_released.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Deliver a frame the way the hardware callback would. Returns `false` when not open.
    pub fn push_frame(&self, frame: Frame) -> bool {
        let sink = self.state.sink.lock().clone();
        match sink {
            Some(sink) => {
                self.state.frames_pushed.fetch_add(1, Ordering::SeqCst);
                sink.deliver(frame)
            }
            None => false,
        }
    }

    /// Deliver a fresh 64x48 frame
    pub fn push(&self) -> bool {
        let frame = self.frame(64, 48);
        self.push_frame(frame)
    }

    /// Simulate the device disappearing
    pub fn disconnect(&self, details: &str) {
        let sink = self.state.sink.lock().clone();
        if let Some(sink) = sink {
            sink.disconnected(details);
        }
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    async fn open(
        &self,
        lens: LensFacing,
        resolution: (u32, u32),
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureSession>, CameraError> {
        self.state.open_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.is_supported() {
            return Err(CameraError::unavailable("no camera on this device"));
        }

        if let Some(error) = self.state.fail_next_open.lock().take() {
            debug!("Mock camera open failing: {}", error);
            return Err(error);
        }

        self.state.opens.fetch_add(1, Ordering::SeqCst);
        *self.state.last_request.lock() = Some((lens, resolution));
        *self.state.sink.lock() = Some(sink);

        Ok(Box::new(MockCaptureSession {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }

    fn is_supported(&self) -> bool {
        !self.state.unsupported.load(Ordering::SeqCst)
    }
}

struct MockCaptureSession {
    state: Arc<MockState>,
    closed: bool,
}

#[async_trait]
impl CaptureSession for MockCaptureSession {
    async fn close(&mut self) -> Result<(), CameraError> {
        if !self.closed {
            self.closed = true;
            self.state.sink.lock().take();
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
