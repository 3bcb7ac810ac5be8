//! Host-side frame driver.
//!
//! [`StereoRenderer`] walks a session through begin, per-eye acquire /
//! render / present and end. It can run the whole frame in one call or be
//! split across two pipeline stages that call [`StereoRenderer::prepare_frame`]
//! and [`StereoRenderer::submit_frame`] independently.

use crate::vr::{Extent2D, Eye, EyeView, FrameTicket, SwapchainDesc, VrError, XrSession, EYE_COUNT};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("vr session error: {0}")]
    Vr(#[from] VrError),
    #[error("{eye:?} eye renderer failed: {reason}")]
    Eye { eye: Eye, reason: String },
    #[error("renderer expected frame {expected} but the {eye:?} eye landed in frame {got}")]
    FrameOutOfOrder { eye: Eye, expected: u64, got: u64 },
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Everything an eye renderer needs to draw into one acquired image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeFrame {
    pub sequence: u64,
    pub eye: Eye,
    pub image_index: u32,
    pub extent: Extent2D,
    pub view: EyeView,
    pub display_time: i64,
}

/// Records GPU work for one eye. Both eyes may be rendered at once.
pub trait EyeRenderer: Send + Sync {
    fn label(&self) -> &'static str;
    fn render_eye(&self, frame: &EyeFrame) -> RenderResult<()>;
}

#[derive(Default)]
pub struct NullEyeRenderer {
    rendered: [AtomicU64; EYE_COUNT],
}

impl NullEyeRenderer {
    pub fn rendered(&self, eye: Eye) -> u64 {
        self.rendered[eye.index()].load(Ordering::Relaxed)
    }
}

impl EyeRenderer for NullEyeRenderer {
    fn label(&self) -> &'static str {
        "Null Eye Renderer"
    }

    fn render_eye(&self, frame: &EyeFrame) -> RenderResult<()> {
        self.rendered[frame.eye.index()].fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub sequence: u64,
    pub rendered: bool,
}

pub struct StereoRenderer {
    session: Arc<XrSession>,
    renderer: Arc<dyn EyeRenderer>,
    frames_submitted: AtomicU64,
}

impl StereoRenderer {
    pub fn new(session: Arc<XrSession>, renderer: Arc<dyn EyeRenderer>) -> Self {
        Self {
            session,
            renderer,
            frames_submitted: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &Arc<XrSession> {
        &self.session
    }

    pub fn renderer_label(&self) -> &'static str {
        self.renderer.label()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted.load(Ordering::Relaxed)
    }

    /// Begin, render both eyes in parallel, end.
    pub fn render_frame(&self) -> RenderResult<FrameOutcome> {
        let ticket = self.session.begin_frame()?;
        let eyes = self.render_eyes(&ticket);
        // The frame is ended even when an eye failed so the queue keeps moving.
        let ended = self.session.end_frame();
        eyes?;
        let sequence = ended?;
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(FrameOutcome {
            sequence,
            rendered: ticket.timing.should_render,
        })
    }

    /// First pipeline stage: begin the frame and render both eyes. The frame
    /// stays queued until [`submit_frame`](Self::submit_frame).
    pub fn prepare_frame(&self) -> RenderResult<FrameTicket> {
        let ticket = self.session.begin_frame()?;
        self.render_eyes(&ticket)?;
        Ok(ticket)
    }

    /// Second pipeline stage: submit the oldest prepared frame.
    pub fn submit_frame(&self) -> RenderResult<u64> {
        let sequence = self.session.end_frame()?;
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(sequence)
    }

    // Eyes are assigned by creation order since the last Ready, so filling a
    // missing right slot after a reset means rebuilding the left one first.
    fn ensure_swapchains(&self) -> RenderResult<()> {
        for eye in Eye::both() {
            while self.session.swapchain(eye).is_none() {
                let created = self.session.create_eye_swapchain(SwapchainDesc::default())?;
                log::debug!("[render] lazily created {} eye swapchain", created.label());
            }
        }
        Ok(())
    }

    fn render_eyes(&self, ticket: &FrameTicket) -> RenderResult<()> {
        if !ticket.timing.should_render {
            log::trace!("[render] frame {} not displayed, skipping eyes", ticket.sequence);
            return Ok(());
        }
        self.ensure_swapchains()?;
        let (left, right) = rayon::join(
            || self.render_eye(Eye::Left, ticket),
            || self.render_eye(Eye::Right, ticket),
        );
        left.and(right)
    }

    fn render_eye(&self, eye: Eye, ticket: &FrameTicket) -> RenderResult<()> {
        let image_index = self.session.acquire(eye)?;
        let newest = self.session.latest_poses().map(|sample| sample.sequence);

        let frame = EyeFrame {
            sequence: ticket.sequence,
            eye,
            image_index,
            extent: self.session.eye_extent(eye).unwrap_or_default(),
            view: ticket.views[eye.index()],
            display_time: ticket.timing.predicted_display_time,
        };
        let rendered = match newest {
            Some(got) if got != ticket.sequence => Err(RenderError::FrameOutOfOrder {
                eye,
                expected: ticket.sequence,
                got,
            }),
            _ => self.renderer.render_eye(&frame),
        };

        self.session.present(eye)?;
        if let Err(err) = &rendered {
            log::error!("[render] frame {} {} eye: {err}", ticket.sequence, eye.label());
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::vr::simulated::{SimCall, SimFailure};
    use crate::vr::{SessionState, SimulatedRuntime, XrPlatform};

    fn focused_session() -> (Arc<SimulatedRuntime>, XrPlatform, Arc<XrSession>) {
        let runtime = Arc::new(SimulatedRuntime::new());
        let platform =
            XrPlatform::initialize(runtime.clone(), SessionConfig::default()).expect("platform");
        let session = platform.create_session().expect("session");
        session
            .handle_state_change(SessionState::Ready)
            .expect("ready");
        session
            .handle_state_change(SessionState::Focused)
            .expect("focused");
        (runtime, platform, session)
    }

    struct FailingRight;

    impl EyeRenderer for FailingRight {
        fn label(&self) -> &'static str {
            "failing right"
        }

        fn render_eye(&self, frame: &EyeFrame) -> RenderResult<()> {
            match frame.eye {
                Eye::Left => Ok(()),
                Eye::Right => Err(RenderError::Eye {
                    eye: Eye::Right,
                    reason: "device lost".into(),
                }),
            }
        }
    }

    #[test]
    fn synchronous_frames_render_both_eyes() {
        let (runtime, _platform, session) = focused_session();
        let eyes = Arc::new(NullEyeRenderer::default());
        let renderer = StereoRenderer::new(session.clone(), eyes.clone());

        for _ in 0..3 {
            let outcome = renderer.render_frame().expect("frame");
            assert!(outcome.rendered);
        }
        assert_eq!(eyes.rendered(Eye::Left), 3);
        assert_eq!(eyes.rendered(Eye::Right), 3);
        assert_eq!(renderer.frames_submitted(), 3);
        assert_eq!(session.depth(), 0);
        assert!(runtime.submissions().iter().all(|s| s.views.len() == 2));
    }

    #[test]
    fn split_stages_retire_in_order() {
        let (_runtime, _platform, session) = focused_session();
        let renderer = StereoRenderer::new(session.clone(), Arc::new(NullEyeRenderer::default()));

        let ticket = renderer.prepare_frame().expect("prepare");
        assert_eq!(session.depth(), 1);
        assert_eq!(renderer.submit_frame().expect("submit"), ticket.sequence);
        assert!(matches!(
            renderer.submit_frame(),
            Err(RenderError::Vr(VrError::QueueEmpty))
        ));
    }

    #[test]
    fn failing_eye_still_ends_frame() {
        let (runtime, _platform, session) = focused_session();
        let renderer = StereoRenderer::new(session.clone(), Arc::new(FailingRight));

        assert!(matches!(
            renderer.render_frame(),
            Err(RenderError::Eye { eye: Eye::Right, .. })
        ));
        assert_eq!(session.depth(), 0);
        assert_eq!(runtime.submissions().len(), 1);
        let swapchain = session.swapchain(Eye::Right).expect("right swapchain");
        assert_eq!(runtime.held_images(swapchain.id()), 0);
    }

    #[test]
    fn missing_right_eye_is_rebuilt_after_a_cursor_reset() {
        let (runtime, _platform, session) = focused_session();
        session
            .create_eye_swapchain(SwapchainDesc::default())
            .expect("left");
        for state in [SessionState::Stopping, SessionState::Ready, SessionState::Focused] {
            session.handle_state_change(state).expect("transition");
        }

        let renderer = StereoRenderer::new(session.clone(), Arc::new(NullEyeRenderer::default()));
        let outcome = renderer.render_frame().expect("frame");
        assert!(outcome.rendered);
        assert!(session.swapchain(Eye::Right).is_some());
        assert_eq!(runtime.live_swapchains(), 2);
        let submissions = runtime.submissions();
        assert_eq!(submissions.last().expect("submitted").views.len(), 2);
    }

    #[test]
    fn failed_lazy_creation_recovers_on_the_next_frame() {
        let (runtime, _platform, session) = focused_session();
        runtime.fail_next(
            SimCall::CreateSwapchain,
            SimFailure::Runtime("XR_ERROR_OUT_OF_MEMORY"),
        );
        let renderer = StereoRenderer::new(session.clone(), Arc::new(NullEyeRenderer::default()));
        assert!(renderer.render_frame().is_err());
        assert_eq!(session.depth(), 0);

        renderer.render_frame().expect("second frame");
        assert_eq!(session.swapchain(Eye::Left).expect("left").eye(), Eye::Left);
        assert_eq!(session.swapchain(Eye::Right).expect("right").eye(), Eye::Right);
    }
}
