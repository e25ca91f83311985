use super::interface::{CaptureSession, FrameSink, FrameSource};
use crate::config::LensFacing;
use crate::error::{CameraError, Result, TurbocamError};
use crate::frame::{Frame, PixelFormat};
use async_trait::async_trait;
use image::GrayImage;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

/// Stand-in camera that replays still images at a fixed frame rate
pub struct ReplayFrameSource {
    images: Arc<Vec<GrayImage>>,
    fps: u32,
    looping: bool,
    frame_counter: Arc<AtomicU64>,
}

impl ReplayFrameSource {
    pub fn from_images(images: Vec<GrayImage>, fps: u32) -> Self {
        Self {
            images: Arc::new(images),
            fps: fps.max(1),
            looping: true,
            frame_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Decode every file in `paths`
    pub fn from_paths<P: AsRef<Path>>(paths: &[P], fps: u32) -> Result<Self> {
        let images = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                image::open(path)
                    .map(|img| img.to_luma8())
                    .map_err(|e| {
                        TurbocamError::component(
                            "replay_source".to_string(),
                            format!("Failed to load {}: {}", path.display(), e),
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        info!("Loaded {} replay frame(s)", images.len());
        Ok(Self::from_images(images, fps))
    }

    /// Stop after one pass instead of cycling
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FrameSource for ReplayFrameSource {
    async fn open(
        &self,
        lens: LensFacing,
        resolution: (u32, u32),
        sink: FrameSink,
    ) -> std::result::Result<Box<dyn CaptureSession>, CameraError> {
        if self.images.is_empty() {
            return Err(CameraError::unavailable("no frames to replay"));
        }

        info!(
            "Starting replay capture ({:?} lens, requested {}x{} @ {}fps)",
            lens, resolution.0, resolution.1, self.fps
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_replay_loop(
            Arc::clone(&self.images),
            self.fps,
            self.looping,
            Arc::clone(&self.frame_counter),
            sink,
            cancel.clone(),
        ));

        Ok(Box::new(ReplaySession {
            cancel,
            task: Some(task),
        }))
    }

    fn is_supported(&self) -> bool {
        !self.images.is_empty()
    }
}

async fn run_replay_loop(
    images: Arc<Vec<GrayImage>>,
    fps: u32,
    looping: bool,
    frame_counter: Arc<AtomicU64>,
    sink: FrameSink,
    cancel: CancellationToken,
) {
    let frame_interval = Duration::from_millis(1000 / fps as u64);
    let mut interval_timer = tokio::time::interval(frame_interval);
    let mut cursor = 0usize;

    info!("Replay capture loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval_timer.tick() => {}
        }

        if cursor >= images.len() {
            if !looping {
                info!("Replay finished after {} frame(s)", images.len());
                break;
            }
            cursor = 0;
        }

        let image = &images[cursor];
        cursor += 1;

        let frame_id = frame_counter.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::new(
            frame_id,
            Instant::now(),
            image.as_raw().clone(),
            image.width(),
            image.height(),
            PixelFormat::Luma8,
        );

        trace!(
            "Replaying frame {} ({}x{})",
            frame_id,
            image.width(),
            image.height()
        );
        if !sink.deliver(frame) {
            break;
        }
    }

    info!("Replay capture loop stopped");
}

struct ReplaySession {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl CaptureSession for ReplaySession {
    async fn close(&mut self) -> std::result::Result<(), CameraError> {
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            match tokio::time::timeout(Duration::from_secs(3), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Error waiting for replay task: {}", e),
                Err(_) => warn!("Replay task did not complete within timeout"),
            }
        }

        Ok(())
    }
}
