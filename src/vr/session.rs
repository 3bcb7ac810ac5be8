use crate::config::SessionConfig;
use crate::vr::input::{ActionBinding, ActionKind, ActionValue, InputSnapshot};
use crate::vr::pacer::{FramePacer, FrameTicket, LimbPoses, PacerStats};
use crate::vr::runtime::{PoseSpace, ReferenceSpace, ViewConfigurationView};
use crate::vr::swapchain::{EyeSwapchain, SwapchainCoordinator, SwapchainDesc, SwapchainSettings};
use crate::vr::{
    CompositionSubmission, Extent2D, Eye, EyeView, FrameTiming, Posef, RuntimeEvent,
    SessionState, SessionStateMachine, SpaceId, VrError, VrResult, XrRuntime, EYE_COUNT,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const TEARDOWN_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSpaces {
    pub base: SpaceId,
    pub view: SpaceId,
    pub local: SpaceId,
    pub stage: SpaceId,
    pub left_grip: SpaceId,
    pub right_grip: SpaceId,
    pub left_aim: SpaceId,
    pub right_aim: SpaceId,
}

impl SessionSpaces {
    fn all(&self) -> [SpaceId; 7] {
        [
            self.view,
            self.local,
            self.stage,
            self.left_grip,
            self.right_grip,
            self.left_aim,
            self.right_aim,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub sequence: u64,
    pub display_time: i64,
    pub head: Option<Posef>,
    pub views: [EyeView; EYE_COUNT],
    pub limbs: LimbPoses,
}

/// One live session: lifecycle state, the in-flight frame queue, both eye
/// swapchains and the spaces poses are located in.
pub struct XrSession {
    id: u64,
    runtime: Arc<dyn XrRuntime>,
    config: SessionConfig,
    state: SessionStateMachine,
    pacer: Arc<FramePacer>,
    swapchains: SwapchainCoordinator,
    spaces: SessionSpaces,
    bindings: Vec<ActionBinding>,
    latest_poses: Mutex<Option<PoseSample>>,
    latest_input: Mutex<InputSnapshot>,
    // A frame the runtime handed out whose begin call failed. It must be
    // begun before the runtime will hand out another one.
    waited: Mutex<Option<FrameTiming>>,
    torn_down: AtomicBool,
}

impl XrSession {
    pub(crate) fn new(
        id: u64,
        runtime: Arc<dyn XrRuntime>,
        config: SessionConfig,
        recommended: Vec<ViewConfigurationView>,
    ) -> VrResult<Self> {
        let spaces = create_spaces(runtime.as_ref(), config.base_space)?;

        // Attached even when empty: runtimes may bind limb pose spaces here.
        let bindings = config.bindings();
        if let Err(err) = runtime.attach_actions(&config.interaction_profile, &bindings) {
            log::error!("[input] failed to attach {} actions: {err}", bindings.len());
            destroy_spaces(runtime.as_ref(), &spaces);
            return Err(err);
        }
        log::debug!(
            "[input] attached {} actions for {}",
            bindings.len(),
            config.interaction_profile
        );

        let pacer = Arc::new(FramePacer::new());
        let swapchains = SwapchainCoordinator::new(
            Arc::clone(&runtime),
            pacer.clone(),
            SwapchainSettings {
                preferred_formats: config.swapchain_formats.clone(),
                recommended,
                wait_timeout: config.image_wait_timeout(),
            },
        );

        Ok(Self {
            id,
            runtime,
            config,
            state: SessionStateMachine::new(),
            pacer,
            swapchains,
            spaces,
            bindings,
            latest_poses: Mutex::new(None),
            latest_input: Mutex::new(InputSnapshot::default()),
            waited: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn spaces(&self) -> SessionSpaces {
        self.spaces
    }

    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn should_close(&self) -> bool {
        self.state.should_close()
    }

    pub fn handle_state_change(&self, new_state: SessionState) -> VrResult<()> {
        if self.state.is_shut_down() {
            return Err(VrError::SessionDestroyed);
        }
        let (old, result) = self.state.transition(new_state, |_, new| match new {
            SessionState::Ready => {
                let result = self.runtime.begin_session();
                self.reset_frames();
                result
            }
            SessionState::Stopping => {
                let result = self.runtime.end_session();
                self.reset_frames();
                result
            }
            _ => Ok(()),
        });

        log::info!(
            "[session] {} state {} -> {}",
            self.id,
            old.as_str(),
            new_state.as_str()
        );
        if let Err(err) = &result {
            log::error!(
                "[session] {} side effect of entering {} failed: {err}",
                self.id,
                new_state.as_str()
            );
        }
        result
    }

    pub fn handle_event(&self, event: RuntimeEvent) -> VrResult<()> {
        match event {
            RuntimeEvent::SessionStateChanged(state) => self.handle_state_change(state),
            RuntimeEvent::InstanceLossPending => {
                log::warn!("[session] {} instance loss pending", self.id);
                self.handle_state_change(SessionState::LossPending)
            }
            RuntimeEvent::EventsLost(count) => {
                log::warn!("[session] {} runtime dropped {count} event(s)", self.id);
                Ok(())
            }
            RuntimeEvent::InteractionProfileChanged => {
                log::info!("[input] interaction profile changed");
                Ok(())
            }
            RuntimeEvent::ReferenceSpaceChangePending(space) => {
                log::info!("[session] {} reference space {space:?} change pending", self.id);
                Ok(())
            }
        }
    }

    /// Asks the runtime to wind the session down. The state itself only
    /// changes once the runtime delivers Stopping / Exiting.
    pub fn request_close(&self) -> VrResult<()> {
        log::info!("[session] {} close requested", self.id);
        self.runtime.request_exit().inspect_err(|err| {
            log::error!("[session] {} exit request failed: {err}", self.id);
        })
    }

    pub fn begin_frame(&self) -> VrResult<FrameTicket> {
        let result = self.state.gated(|_| {
            let pending = lock(&self.waited).take();
            let timing = match pending {
                Some(timing) => timing,
                None => self.runtime.wait_frame()?,
            };
            if let Err(err) = self.runtime.begin_frame() {
                *lock(&self.waited) = Some(timing);
                return Err(err);
            }

            let display_time = timing.predicted_display_time;
            let (timing, views) = match self.runtime.locate_views(display_time, self.spaces.base) {
                Ok(views) => (timing, views),
                Err(VrError::LossPending) => return Err(VrError::LossPending),
                Err(err) => {
                    log::error!("[session] {} view location failed, skipping frame: {err}", self.id);
                    let skipped = FrameTiming {
                        should_render: false,
                        ..timing
                    };
                    (skipped, [EyeView::default(); EYE_COUNT])
                }
            };
            let head = self.locate(self.spaces.view, display_time);
            let limbs = LimbPoses {
                left_grip: self.locate(self.spaces.left_grip, display_time),
                right_grip: self.locate(self.spaces.right_grip, display_time),
                left_aim: self.locate(self.spaces.left_aim, display_time),
                right_aim: self.locate(self.spaces.right_aim, display_time),
            };

            let ticket = self.pacer.enqueue(timing, views, head, limbs);
            *lock(&self.latest_poses) = Some(PoseSample {
                sequence: ticket.sequence,
                display_time,
                head,
                views,
                limbs,
            });
            Ok(ticket)
        });
        self.escalate("begin frame", result)
    }

    /// Retires the oldest queued frame and submits its composition.
    ///
    /// Returns the retired sequence number. A rendering frame with an
    /// unfilled eye is still ended (with no layers) before
    /// [`VrError::IncompleteFrame`] is returned.
    pub fn end_frame(&self) -> VrResult<u64> {
        let result = self.state.gated(|_| {
            let record = self.pacer.retire_oldest().ok_or(VrError::QueueEmpty)?;
            let missing = record
                .timing
                .should_render
                .then(|| record.missing_eye())
                .flatten();
            let views = if record.timing.should_render && missing.is_none() {
                record.layer_views.iter().flatten().copied().collect()
            } else {
                Vec::new()
            };

            self.runtime.end_frame(&CompositionSubmission {
                display_time: record.timing.predicted_display_time,
                blend_mode: self.config.blend_mode,
                space: self.spaces.base,
                views,
            })?;

            if let Some(eye) = missing {
                self.pacer.note_incomplete();
                return Err(VrError::IncompleteFrame {
                    sequence: record.sequence,
                    eye,
                });
            }
            log::trace!("[session] {} frame {} submitted", self.id, record.sequence);
            Ok(record.sequence)
        });
        self.escalate("end frame", result)
    }

    pub fn create_eye_swapchain(&self, desc: SwapchainDesc) -> VrResult<Eye> {
        let result = self.state.with_state(|state| {
            if state.should_close() {
                return Err(VrError::NotRunning(state));
            }
            self.swapchains.create(SwapchainDesc {
                extent: desc.extent.or(self.config.eye_extent),
                sample_count: desc.sample_count.or(Some(self.config.sample_count)),
            })
        });
        self.escalate("create swapchain", result)
    }

    pub fn acquire(&self, eye: Eye) -> VrResult<u32> {
        let result = self.state.gated(|_| self.swapchains.acquire(eye));
        self.escalate("acquire", result)
    }

    /// Releases an acquired image. Allowed outside the running states so an
    /// eye caught mid-frame by Stopping can still hand its image back.
    pub fn present(&self, eye: Eye) -> VrResult<()> {
        let result = self.state.with_state(|state| {
            if state.should_close() {
                return Err(VrError::NotRunning(state));
            }
            self.swapchains.present(eye)
        });
        self.escalate("present", result)
    }

    pub fn swapchain(&self, eye: Eye) -> Option<EyeSwapchain> {
        self.swapchains.swapchain(eye)
    }

    pub fn eye_extent(&self, eye: Eye) -> Option<Extent2D> {
        self.swapchains.extent(eye)
    }

    pub fn latest_poses(&self) -> Option<PoseSample> {
        *lock(&self.latest_poses)
    }

    pub fn latest_input(&self) -> InputSnapshot {
        lock(&self.latest_input).clone()
    }

    /// Syncs and reads every attached action. Input only flows while the
    /// session is Focused; in other states the last snapshot is returned.
    pub fn poll_actions(&self) -> VrResult<InputSnapshot> {
        let result = self.state.with_state(|state| {
            if state != SessionState::Focused || self.bindings.is_empty() {
                return Ok(lock(&self.latest_input).clone());
            }
            self.runtime.sync_actions()?;

            let display_time = self
                .latest_poses()
                .map_or(0, |sample| sample.display_time);
            let mut snapshot = InputSnapshot::new(display_time);
            for binding in &self.bindings {
                match self
                    .runtime
                    .action_value(binding, self.spaces.base, display_time)
                {
                    Ok(value) => snapshot.insert(binding.name, value),
                    Err(VrError::LossPending) => return Err(VrError::LossPending),
                    Err(err) => {
                        log::debug!("[input] {} unavailable: {err}", binding.name);
                        if binding.kind == ActionKind::Pose {
                            snapshot.insert(binding.name, ActionValue::Pose(None));
                        }
                    }
                }
            }
            *lock(&self.latest_input) = snapshot.clone();
            Ok(snapshot)
        });
        self.escalate("poll actions", result)
    }

    pub fn depth(&self) -> usize {
        self.pacer.depth()
    }

    pub fn stats(&self) -> PacerStats {
        self.pacer.stats()
    }

    pub fn drain(&self) {
        self.pacer.drain();
    }

    /// Waits for the frame queue to empty, then releases swapchains and
    /// spaces. Records that can never be ended (the session is closing or
    /// stopped) are discarded instead of waited on.
    pub(crate) fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        loop {
            let state = self.state.state();
            if state.should_close() || !state.is_running() {
                let discarded = self.reset_frames();
                if discarded > 0 {
                    log::warn!(
                        "[session] {} discarded {discarded} frame(s) that can no longer be ended ({})",
                        self.id,
                        state.as_str()
                    );
                }
                break;
            }
            if self.pacer.drain_timeout(TEARDOWN_POLL) {
                break;
            }
        }
        self.state.shut_down();
        // A frame begun between the drain and the shutdown can never be ended.
        let stragglers = self.reset_frames();
        if stragglers > 0 {
            log::warn!("[session] {} dropped {stragglers} late frame(s)", self.id);
        }

        self.swapchains.destroy_all();
        destroy_spaces(self.runtime.as_ref(), &self.spaces);
        log::info!("[session] {} destroyed ({})", self.id, self.runtime.label());
    }

    fn reset_frames(&self) -> usize {
        lock(&self.waited).take();
        self.pacer.reset()
    }

    fn locate(&self, space: SpaceId, display_time: i64) -> Option<Posef> {
        match self
            .runtime
            .locate_space(space, self.spaces.base, display_time)
        {
            Ok(pose) => pose,
            Err(err) => {
                log::debug!("[session] {} failed to locate space {space:?}: {err}", self.id);
                None
            }
        }
    }

    // Must run after the state lock is released.
    fn escalate<T>(&self, operation: &str, result: VrResult<T>) -> VrResult<T> {
        if let Err(err) = &result {
            match err {
                VrError::LossPending => {
                    log::error!("[session] {} lost during {operation}", self.id);
                    if self.state.state() != SessionState::LossPending {
                        // LossPending has no side effects; only a destroyed session refuses it.
                        let _ = self.handle_state_change(SessionState::LossPending);
                    }
                }
                VrError::NotRunning(_) | VrError::QueueEmpty | VrError::SessionDestroyed => {
                    log::debug!("[session] {} {operation} skipped: {err}", self.id);
                }
                _ => log::warn!("[session] {} {operation} failed: {err}", self.id),
            }
        }
        result
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn create_spaces(runtime: &dyn XrRuntime, base: ReferenceSpace) -> VrResult<SessionSpaces> {
    let mut created = Vec::with_capacity(7);
    let kinds = [
        PoseSpace::Reference(ReferenceSpace::View),
        PoseSpace::Reference(ReferenceSpace::Local),
        PoseSpace::Reference(ReferenceSpace::Stage),
        PoseSpace::LeftGrip,
        PoseSpace::RightGrip,
        PoseSpace::LeftAim,
        PoseSpace::RightAim,
    ];
    for kind in kinds {
        match runtime.create_space(kind) {
            Ok(space) => created.push(space),
            Err(err) => {
                log::error!("[session] failed to create {kind:?} space: {err}");
                for space in created {
                    let _ = runtime.destroy_space(space);
                }
                return Err(err);
            }
        }
    }

    let [view, local, stage, left_grip, right_grip, left_aim, right_aim] = created[..] else {
        return Err(VrError::CallOrder("space creation returned a partial set"));
    };
    let base = match base {
        ReferenceSpace::View => view,
        ReferenceSpace::Local => local,
        ReferenceSpace::Stage => stage,
    };
    Ok(SessionSpaces {
        base,
        view,
        local,
        stage,
        left_grip,
        right_grip,
        left_aim,
        right_aim,
    })
}

fn destroy_spaces(runtime: &dyn XrRuntime, spaces: &SessionSpaces) {
    for space in spaces.all() {
        if let Err(err) = runtime.destroy_space(space) {
            log::warn!("[session] failed to destroy space {space:?}: {err}");
        }
    }
}
