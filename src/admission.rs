//! One-slot backpressure gate between frame delivery and detection.
//!
//! The gate admits a frame only when no other frame is under analysis. Busy
//! frames are dropped, never queued, so a slow detector costs dropped frames
//! rather than memory or latency.

use crate::config::DetectorKind;
use crate::frame::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Why a frame was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Another frame is still under analysis
    Busy,
    /// The gate is closed for teardown
    Closed,
    /// Captured before the last admitted frame
    Stale,
}

#[derive(Debug)]
pub enum Admission {
    Admitted(DetectionRequest),
    Dropped(DropReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Counters shared by every gate a controller creates
#[derive(Debug, Default)]
pub struct AdmissionStats {
    pub frames_offered: AtomicU64,
    pub frames_admitted: AtomicU64,
    pub frames_dropped_busy: AtomicU64,
    pub frames_dropped_closed: AtomicU64,
    pub frames_dropped_stale: AtomicU64,
}

impl AdmissionStats {
    pub fn snapshot(&self) -> AdmissionStatsSnapshot {
        AdmissionStatsSnapshot {
            frames_offered: self.frames_offered.load(Ordering::Relaxed),
            frames_admitted: self.frames_admitted.load(Ordering::Relaxed),
            frames_dropped_busy: self.frames_dropped_busy.load(Ordering::Relaxed),
            frames_dropped_closed: self.frames_dropped_closed.load(Ordering::Relaxed),
            frames_dropped_stale: self.frames_dropped_stale.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdmissionStatsSnapshot {
    pub frames_offered: u64,
    pub frames_admitted: u64,
    pub frames_dropped_busy: u64,
    pub frames_dropped_closed: u64,
    pub frames_dropped_stale: u64,
}

impl AdmissionStatsSnapshot {
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped_busy + self.frames_dropped_closed + self.frames_dropped_stale
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Busy { sequence: u64 },
    Closed,
}

#[derive(Debug)]
struct GateState {
    slot: Slot,
    last_admitted_at: Option<Instant>,
}

#[derive(Debug)]
struct Gate {
    state: Mutex<GateState>,
}

impl Gate {
    /// Free the slot held by `sequence`; a closed gate stays closed
    fn vacate(&self, sequence: u64) {
        let mut state = self.state.lock();
        if state.slot == (Slot::Busy { sequence }) {
            state.slot = Slot::Free;
        }
    }
}

/// One-slot gate for a single session generation
#[derive(Debug)]
pub struct FrameAdmission {
    kind: DetectorKind,
    generation: u64,
    gate: Arc<Gate>,
    next_sequence: AtomicU64,
    stats: Arc<AdmissionStats>,
}

impl FrameAdmission {
    pub fn new(kind: DetectorKind, generation: u64, stats: Arc<AdmissionStats>) -> Self {
        Self {
            kind,
            generation,
            gate: Arc::new(Gate {
                state: Mutex::new(GateState {
                    slot: Slot::Free,
                    last_admitted_at: None,
                }),
            }),
            next_sequence: AtomicU64::new(1),
            stats,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Admit `frame` if the slot is free; otherwise release it before returning
    pub fn offer(&self, frame: Frame) -> Admission {
        self.stats.frames_offered.fetch_add(1, Ordering::Relaxed);

        let verdict = {
            let mut state = self.gate.state.lock();
            match state.slot {
                Slot::Closed => Err(DropReason::Closed),
                Slot::Busy { .. } => Err(DropReason::Busy),
                Slot::Free => match state.last_admitted_at {
                    Some(last) if frame.timestamp() < last => Err(DropReason::Stale),
                    _ => {
                        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
                        state.slot = Slot::Busy { sequence };
                        state.last_admitted_at = Some(frame.timestamp());
                        Ok(sequence)
                    }
                },
            }
        };

        match verdict {
            Ok(sequence) => {
                self.stats.frames_admitted.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Admitted frame {} as request {} (generation {})",
                    frame.id(),
                    sequence,
                    self.generation
                );
                Admission::Admitted(DetectionRequest {
                    frame,
                    kind: self.kind,
                    sequence,
                    generation: self.generation,
                    _permit: AdmissionPermit {
                        gate: Arc::clone(&self.gate),
                        sequence,
                    },
                })
            }
            Err(reason) => {
                let counter = match reason {
                    DropReason::Busy => &self.stats.frames_dropped_busy,
                    DropReason::Closed => &self.stats.frames_dropped_closed,
                    DropReason::Stale => &self.stats.frames_dropped_stale,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                trace!("Dropped frame {} ({:?})", frame.id(), reason);
                drop(frame);
                Admission::Dropped(reason)
            }
        }
    }

    /// Whether a frame is currently under analysis
    pub fn is_busy(&self) -> bool {
        matches!(self.gate.state.lock().slot, Slot::Busy { .. })
    }

    pub fn is_closed(&self) -> bool {
        self.gate.state.lock().slot == Slot::Closed
    }

    /// Drop every later offer unconditionally
    pub fn close(&self) {
        self.gate.state.lock().slot = Slot::Closed;
    }
}

/// Holds the gate's slot until dropped
#[derive(Debug)]
struct AdmissionPermit {
    gate: Arc<Gate>,
    sequence: u64,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.vacate(self.sequence);
    }
}

/// An admitted frame on its way to the detector.
///
/// Dropping the request releases the frame and then frees the admission
/// slot, so the next frame can never be admitted while this one is held.
#[derive(Debug)]
pub struct DetectionRequest {
    // Field order is drop order: frame before permit.
    frame: Frame,
    kind: DetectorKind,
    sequence: u64,
    generation: u64,
    _permit: AdmissionPermit,
}

impl DetectionRequest {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
