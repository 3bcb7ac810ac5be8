//! In-flight frame queue.
//!
//! The runtime's wait-for-frame call will not return a second time until the
//! previous frame has been begun, but nothing forces the frame to be *ended*
//! from the same call site. The pacer queues one [`FrameRecord`] per begun
//! frame so pose sampling and composition submission can live on different
//! threads while frames still retire strictly in creation order.

use crate::vr::{
    CompositionLayerView, Eye, EyeView, FrameTiming, Posef, VrError, VrResult, EYE_COUNT,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LimbPoses {
    pub left_grip: Option<Posef>,
    pub right_grip: Option<Posef>,
    pub left_aim: Option<Posef>,
    pub right_aim: Option<Posef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub sequence: u64,
    pub timing: FrameTiming,
    pub views: [EyeView; EYE_COUNT],
    pub head: Option<Posef>,
    pub limbs: LimbPoses,
    pub layer_views: [Option<CompositionLayerView>; EYE_COUNT],
}

impl FrameRecord {
    pub fn missing_eye(&self) -> Option<Eye> {
        Eye::both()
            .into_iter()
            .find(|eye| self.layer_views[eye.index()].is_none())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTicket {
    pub sequence: u64,
    pub timing: FrameTiming,
    pub views: [EyeView; EYE_COUNT],
}

/// The narrow view of the pacer that eye swapchains get.
pub trait FrameSlots: Send + Sync {
    /// Hands out eye indices in construction order since the last reset.
    fn claim_eye(&self) -> VrResult<Eye>;

    /// Hands back an eye whose swapchain never got built.
    fn release_eye(&self, eye: Eye);

    /// Writes the composition view for `eye` into the most recently begun,
    /// not yet retired frame. Returns that frame's sequence number.
    fn fill_current(
        &self,
        eye: Eye,
        build: &mut dyn FnMut(&EyeView) -> CompositionLayerView,
    ) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacerStats {
    pub frames_begun: u64,
    pub frames_ended: u64,
    pub frames_discarded: u64,
    pub incomplete_frames: u64,
    pub depth: usize,
    pub last_retired: Option<u64>,
}

#[derive(Default)]
struct PacerQueue {
    records: VecDeque<FrameRecord>,
    next_sequence: u64,
    eye_cursor: usize,
    stats: PacerStats,
}

pub struct FramePacer {
    queue: Mutex<PacerQueue>,
    drained: Condvar,
}

impl FramePacer {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(PacerQueue {
                next_sequence: 1,
                ..PacerQueue::default()
            }),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PacerQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(
        &self,
        timing: FrameTiming,
        views: [EyeView; EYE_COUNT],
        head: Option<Posef>,
        limbs: LimbPoses,
    ) -> FrameTicket {
        let mut queue = self.lock();
        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.records.push_back(FrameRecord {
            sequence,
            timing,
            views,
            head,
            limbs,
            layer_views: [None; EYE_COUNT],
        });
        queue.stats.frames_begun += 1;
        log::trace!(
            "[pacer] frame {sequence} queued (depth {}, display {})",
            queue.records.len(),
            timing.predicted_display_time
        );

        FrameTicket {
            sequence,
            timing,
            views,
        }
    }

    pub fn retire_oldest(&self) -> Option<FrameRecord> {
        let mut queue = self.lock();
        let record = queue.records.pop_front()?;
        if let Some(last) = queue.stats.last_retired {
            assert!(
                record.sequence > last,
                "frame {} retired after frame {last}",
                record.sequence
            );
        }
        queue.stats.last_retired = Some(record.sequence);
        queue.stats.frames_ended += 1;
        if queue.records.is_empty() {
            self.drained.notify_all();
        }
        Some(record)
    }

    pub fn note_incomplete(&self) {
        self.lock().stats.incomplete_frames += 1;
    }

    pub fn depth(&self) -> usize {
        self.lock().records.len()
    }

    pub fn current_sequence(&self) -> Option<u64> {
        self.lock().records.back().map(|record| record.sequence)
    }

    pub fn oldest_sequence(&self) -> Option<u64> {
        self.lock().records.front().map(|record| record.sequence)
    }

    pub fn eye_cursor(&self) -> usize {
        self.lock().eye_cursor
    }

    /// Drops every queued record and rewinds the eye cursor.
    ///
    /// Sequence numbers keep counting so retirement order stays checkable
    /// across resets.
    pub fn reset(&self) -> usize {
        let mut queue = self.lock();
        let discarded = queue.records.len();
        queue.records.clear();
        queue.eye_cursor = 0;
        queue.stats.frames_discarded += discarded as u64;
        self.drained.notify_all();
        if discarded > 0 {
            log::debug!("[pacer] reset discarded {discarded} in-flight frame(s)");
        }
        discarded
    }

    pub fn drain(&self) {
        let queue = self.lock();
        let _queue = self
            .drained
            .wait_while(queue, |queue| !queue.records.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`drain`](Self::drain) but gives up after `timeout`. Returns
    /// whether the queue emptied.
    pub fn drain_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock();
        while !queue.records.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .drained
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
        }
        true
    }

    pub fn stats(&self) -> PacerStats {
        let queue = self.lock();
        PacerStats {
            depth: queue.records.len(),
            ..queue.stats
        }
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlots for FramePacer {
    fn claim_eye(&self) -> VrResult<Eye> {
        let mut queue = self.lock();
        let eye = Eye::from_index(queue.eye_cursor).ok_or(VrError::EyeLimit(queue.eye_cursor))?;
        queue.eye_cursor += 1;
        Ok(eye)
    }

    fn release_eye(&self, eye: Eye) {
        let mut queue = self.lock();
        // Only the most recent claim can be rewound; a later eye may
        // already be built on top of it.
        if queue.eye_cursor == eye.index() + 1 {
            queue.eye_cursor = eye.index();
        } else {
            log::warn!(
                "[pacer] cannot release {} eye, cursor already at {}",
                eye.label(),
                queue.eye_cursor
            );
        }
    }

    fn fill_current(
        &self,
        eye: Eye,
        build: &mut dyn FnMut(&EyeView) -> CompositionLayerView,
    ) -> Option<u64> {
        let mut queue = self.lock();
        let record = queue.records.back_mut()?;
        let view = record.views[eye.index()];
        record.layer_views[eye.index()] = Some(build(&view));
        Some(record.sequence)
    }
}
