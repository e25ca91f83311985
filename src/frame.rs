use crate::error::FrameError;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit greyscale
    Luma8,
    /// Packed 8-bit RGB
    Rgb8,
    /// Packed 8-bit RGBA
    Rgba8,
    /// Planar YUV 4:2:0 with the full-resolution Y plane first
    Yuv420,
    /// Compressed JPEG
    Jpeg,
}

impl PixelFormat {
    /// Minimum number of bytes an uncompressed frame of this format occupies
    pub fn min_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Luma8 => Some(pixels),
            PixelFormat::Rgb8 => Some(pixels * 3),
            PixelFormat::Rgba8 => Some(pixels * 4),
            PixelFormat::Yuv420 => Some(pixels + pixels / 2),
            PixelFormat::Jpeg => None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Jpeg)
    }
}

/// Orientation hint reported by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Rotate0,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::Rotate0 => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }

    /// Nearest quarter turn for an arbitrary degree value
    pub fn from_degrees(degrees: i32) -> Self {
        match ((degrees % 360 + 360) % 360 + 45) / 90 % 4 {
            1 => Rotation::Rotate90,
            2 => Rotation::Rotate180,
            3 => Rotation::Rotate270,
            _ => Rotation::Rotate0,
        }
    }
}

type ReleaseHook = Box<dyn FnOnce(u64) + Send + 'static>;

/// One captured image, exclusively owned by whichever stage holds it.
///
/// A frame is released exactly once, when it is dropped: the source's
/// release hook runs first, then the session lease (if any) is returned.
/// Once the session has invalidated the frame the hook is skipped, since
/// the hardware it would return the buffer to may already be closed.
pub struct Frame {
    id: u64,
    timestamp: Instant,
    width: u32,
    height: u32,
    format: PixelFormat,
    rotation: Rotation,
    data: Vec<u8>,
    release: Option<ReleaseHook>,
    lease: Option<FrameLease>,
}

impl Frame {
    pub fn new(
        id: u64,
        timestamp: Instant,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            width,
            height,
            format,
            rotation: Rotation::Rotate0,
            data,
            release: None,
            lease: None,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Register a hook run when the frame is released (e.g. returning the buffer to the device)
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.release = Some(Box::new(hook));
        self
    }

    pub(crate) fn attach_lease(&mut self, lease: FrameLease) {
        self.lease = Some(lease);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// Whether the owning session has forcibly invalidated this frame
    pub fn is_invalidated(&self) -> bool {
        self.lease
            .as_ref()
            .map(|lease| lease.is_invalidated())
            .unwrap_or(false)
    }

    /// Raw pixel bytes, unless teardown has invalidated the frame
    pub fn data(&self) -> Result<&[u8], FrameError> {
        if self.is_invalidated() {
            return Err(FrameError::Invalidated { id: self.id });
        }
        Ok(&self.data)
    }

    /// Greyscale copy of the frame, downscaled so its longer side is at most `max_dimension`
    pub fn to_luma(&self, max_dimension: u32) -> Result<LumaImage, FrameError> {
        let data = self.data()?;

        if let Some(expected) = self.format.min_size(self.width, self.height) {
            if data.len() < expected {
                return Err(FrameError::Truncated {
                    id: self.id,
                    expected,
                    actual: data.len(),
                });
            }
        }

        let pixels = self.width as usize * self.height as usize;
        let decode_error = |details: String| FrameError::Decode {
            id: self.id,
            details,
        };

        let gray = match self.format {
            PixelFormat::Luma8 | PixelFormat::Yuv420 => {
                GrayImage::from_raw(self.width, self.height, data[..pixels].to_vec())
                    .ok_or_else(|| decode_error("luma plane does not match dimensions".into()))?
            }
            PixelFormat::Rgb8 => {
                let rgb = RgbImage::from_raw(self.width, self.height, data[..pixels * 3].to_vec())
                    .ok_or_else(|| decode_error("RGB data does not match dimensions".into()))?;
                DynamicImage::ImageRgb8(rgb).to_luma8()
            }
            PixelFormat::Rgba8 => {
                let rgba =
                    RgbaImage::from_raw(self.width, self.height, data[..pixels * 4].to_vec())
                        .ok_or_else(|| decode_error("RGBA data does not match dimensions".into()))?;
                DynamicImage::ImageRgba8(rgba).to_luma8()
            }
            PixelFormat::Jpeg => image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map_err(|e| decode_error(e.to_string()))?
                .to_luma8(),
        };

        Ok(LumaImage::downscaled(gray, max_dimension))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("rotation", &self.rotation)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let id = self.id;
        let hook = self.release.take();
        match self.lease.take() {
            Some(lease) => lease.settle(move || {
                if let Some(hook) = hook {
                    hook(id);
                }
            }),
            None => {
                if let Some(hook) = hook {
                    hook(id);
                }
            }
        }
    }
}

/// Greyscale image prepared for a detector
#[derive(Debug, Clone)]
pub struct LumaImage {
    pub image: GrayImage,
    /// Multiply processed coordinates by this to get frame pixel coordinates
    pub scale: f32,
}

impl LumaImage {
    fn downscaled(gray: GrayImage, max_dimension: u32) -> Self {
        let (width, height) = gray.dimensions();
        let longest = width.max(height);

        if max_dimension == 0 || longest <= max_dimension {
            return Self {
                image: gray,
                scale: 1.0,
            };
        }

        let scale = longest as f32 / max_dimension as f32;
        let new_width = ((width as f32 / scale) as u32).max(1);
        let new_height = ((height as f32 / scale) as u32).max(1);

        Self {
            image: image::imageops::resize(&gray, new_width, new_height, FilterType::Triangle),
            scale,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    sealed: bool,
    outstanding: usize,
}

/// Result of waiting for a session's frames to come back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every frame was released
    Drained,
    /// The timeout passed; remaining frames were invalidated
    Invalidated { outstanding: usize },
}

/// Counts the frames a capture session has handed out and not yet got back
#[derive(Debug, Default)]
pub struct FrameTracker {
    state: Mutex<TrackerState>,
    invalidated: AtomicBool,
    released: Notify,
}

impl FrameTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take a lease for a new frame, or `None` once the tracker is sealed
    pub fn lease(self: &Arc<Self>) -> Option<FrameLease> {
        let mut state = self.state.lock();
        if state.sealed {
            return None;
        }
        state.outstanding += 1;
        Some(FrameLease {
            tracker: Arc::clone(self),
            settled: false,
        })
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Refuse further leases
    pub fn seal(&self) {
        self.state.lock().sealed = true;
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Seal, then wait up to `timeout` for outstanding frames; invalidate them if they don't return
    pub async fn drain(&self, timeout: Duration) -> DrainOutcome {
        self.seal();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.released.notified();

            let outstanding = self.outstanding();
            if outstanding == 0 {
                return DrainOutcome::Drained;
            }

            debug!("Waiting for {} outstanding frame(s)", outstanding);
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return match self.invalidate() {
                    Some(outstanding) => {
                        warn!(
                            "{} frame(s) still held after {:?}; invalidating",
                            outstanding, timeout
                        );
                        DrainOutcome::Invalidated { outstanding }
                    }
                    None => DrainOutcome::Drained,
                };
            }
        }
    }

    /// Mark held frames invalidated, under the same lock that release hooks run under
    fn invalidate(&self) -> Option<usize> {
        let state = self.state.lock();
        if state.outstanding == 0 {
            return None;
        }
        self.invalidated.store(true, Ordering::Release);
        Some(state.outstanding)
    }

    /// Return one lease, running `hook` first unless the tracker was invalidated.
    ///
    /// The hook runs with the tracker locked, so it either finishes before
    /// `drain` gives up or never runs at all. Hooks must not block.
    fn release(&self, hook: impl FnOnce()) {
        let mut state = self.state.lock();
        if !self.invalidated.load(Ordering::Acquire) {
            hook();
        }
        state.outstanding = state.outstanding.saturating_sub(1);
        drop(state);
        self.released.notify_waiters();
    }
}

/// Proof that a frame is accounted for by a session's tracker
#[derive(Debug)]
pub struct FrameLease {
    tracker: Arc<FrameTracker>,
    settled: bool,
}

impl FrameLease {
    pub fn is_invalidated(&self) -> bool {
        self.tracker.is_invalidated()
    }

    fn settle(mut self, hook: impl FnOnce()) {
        self.settled = true;
        self.tracker.release(hook);
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if !self.settled {
            self.tracker.release(|| {});
        }
    }
}
