//! An in-process runtime that honors the same ordering contracts as a real
//! one: `wait_frame` blocks until the previously waited frame is begun,
//! frame calls fail outside a running session, and exit requests surface as
//! later state-change events rather than immediate transitions.

use crate::vr::input::{ActionBinding, ActionKind, ActionValue};
use crate::vr::runtime::{
    parse_extension_list, DeviceId, GraphicsRequirements, PoseSpace, ReferenceSpace,
    SwapchainCreateInfo, SystemProperties, ViewConfigurationView,
};
use crate::vr::{
    CompositionSubmission, Extent2D, EyeView, Fovf, FrameTiming, Posef, RuntimeEvent,
    SessionState, SpaceId, SwapchainId, VrError, VrResult, XrRuntime, EYE_COUNT,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

const DISPLAY_EPOCH_NS: i64 = 1_000_000_000;
const DISPLAY_PERIOD_NS: i64 = 11_111_111;
const EYE_EXTENT: Extent2D = Extent2D {
    width: 1440,
    height: 1600,
};
const IPD_HALF: f32 = 0.032;
const HEAD_HEIGHT: f32 = 1.6;
const DEVICE_EXTENSIONS: &str = "VK_KHR_external_memory VK_KHR_external_memory_fd VK_KHR_dedicated_allocation";
const INSTANCE_EXTENSIONS: &str =
    "VK_KHR_external_memory_capabilities VK_KHR_get_physical_device_properties2";

/// Runtime calls that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimCall {
    BeginSession,
    EndSession,
    WaitFrame,
    BeginFrame,
    EndFrame,
    LocateViews,
    CreateSwapchain,
    AcquireImage,
    WaitImage,
    ReleaseImage,
    SyncActions,
}

impl SimCall {
    fn name(self) -> &'static str {
        match self {
            SimCall::BeginSession => "xrBeginSession",
            SimCall::EndSession => "xrEndSession",
            SimCall::WaitFrame => "xrWaitFrame",
            SimCall::BeginFrame => "xrBeginFrame",
            SimCall::EndFrame => "xrEndFrame",
            SimCall::LocateViews => "xrLocateViews",
            SimCall::CreateSwapchain => "xrCreateSwapchain",
            SimCall::AcquireImage => "xrAcquireSwapchainImage",
            SimCall::WaitImage => "xrWaitSwapchainImage",
            SimCall::ReleaseImage => "xrReleaseSwapchainImage",
            SimCall::SyncActions => "xrSyncActions",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimFailure {
    Runtime(&'static str),
    Loss,
    Timeout,
}

impl SimFailure {
    fn into_error(self, call: SimCall) -> VrError {
        match self {
            SimFailure::Runtime(message) => VrError::runtime(call.name(), message),
            SimFailure::Loss => VrError::LossPending,
            SimFailure::Timeout => VrError::Timeout("swapchain image"),
        }
    }
}

#[derive(Debug, Default)]
struct SimSwapchain {
    image_count: u32,
    next_image: u32,
    held: u32,
}

struct SimState {
    session_running: bool,
    exit_requested: bool,
    events: VecDeque<RuntimeEvent>,
    awaiting_begin: bool,
    frame_index: i64,
    frames_begun: u64,
    should_render: bool,
    wait_delay: Duration,
    submissions: Vec<CompositionSubmission>,
    failures: HashMap<SimCall, SimFailure>,
    next_handle: u64,
    spaces: HashMap<SpaceId, PoseSpace>,
    limbs_tracked: bool,
    swapchains: HashMap<SwapchainId, SimSwapchain>,
    formats: Vec<i64>,
    device: DeviceId,
    attached: Option<Vec<ActionBinding>>,
    action_values: HashMap<String, ActionValue>,
    action_syncs: u64,
}

impl SimState {
    fn take_failure(&mut self, call: SimCall) -> VrResult<()> {
        match self.failures.remove(&call) {
            Some(failure) => Err(failure.into_error(call)),
            None => Ok(()),
        }
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn require_running(&self, call: SimCall) -> VrResult<()> {
        if self.session_running {
            Ok(())
        } else {
            Err(VrError::runtime(call.name(), "XR_ERROR_SESSION_NOT_RUNNING"))
        }
    }
}

pub struct SimulatedRuntime {
    state: Mutex<SimState>,
    frame_begun: Condvar,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                session_running: false,
                exit_requested: false,
                events: VecDeque::new(),
                awaiting_begin: false,
                frame_index: 0,
                frames_begun: 0,
                should_render: true,
                wait_delay: Duration::ZERO,
                submissions: Vec::new(),
                failures: HashMap::new(),
                next_handle: 0,
                spaces: HashMap::new(),
                limbs_tracked: true,
                swapchains: HashMap::new(),
                // VK_FORMAT_R8G8B8A8_SRGB, VK_FORMAT_B8G8R8A8_SRGB, VK_FORMAT_R8G8B8A8_UNORM
                formats: vec![43, 50, 37],
                device: DeviceId(0x10de_0001),
                attached: None,
                action_values: HashMap::new(),
                action_syncs: 0,
            }),
            frame_begun: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a state change as if the runtime had delivered it.
    pub fn push_state(&self, state: SessionState) {
        self.push_event(RuntimeEvent::SessionStateChanged(state));
    }

    pub fn push_event(&self, event: RuntimeEvent) {
        self.lock().events.push_back(event);
    }

    pub fn pending_events(&self) -> usize {
        self.lock().events.len()
    }

    /// Makes the next call of `call` fail with `failure`.
    pub fn fail_next(&self, call: SimCall, failure: SimFailure) {
        self.lock().failures.insert(call, failure);
    }

    pub fn fail_next_image_wait(&self) {
        self.fail_next(SimCall::WaitImage, SimFailure::Timeout);
    }

    pub fn set_should_render(&self, should_render: bool) {
        self.lock().should_render = should_render;
    }

    /// Extra time `wait_frame` spends blocked before returning.
    pub fn set_wait_delay(&self, delay: Duration) {
        self.lock().wait_delay = delay;
    }

    pub fn set_formats(&self, formats: Vec<i64>) {
        self.lock().formats = formats;
    }

    pub fn set_device(&self, device: DeviceId) {
        self.lock().device = device;
    }

    pub fn set_limbs_tracked(&self, tracked: bool) {
        self.lock().limbs_tracked = tracked;
    }

    pub fn set_action_value(&self, name: &str, value: ActionValue) {
        self.lock().action_values.insert(name.to_string(), value);
    }

    pub fn is_session_running(&self) -> bool {
        self.lock().session_running
    }

    pub fn exit_requested(&self) -> bool {
        self.lock().exit_requested
    }

    pub fn frames_begun(&self) -> u64 {
        self.lock().frames_begun
    }

    pub fn submissions(&self) -> Vec<CompositionSubmission> {
        self.lock().submissions.clone()
    }

    pub fn action_syncs(&self) -> u64 {
        self.lock().action_syncs
    }

    pub fn live_spaces(&self) -> usize {
        self.lock().spaces.len()
    }

    pub fn has_swapchain(&self, swapchain: SwapchainId) -> bool {
        self.lock().swapchains.contains_key(&swapchain)
    }

    pub fn live_swapchains(&self) -> usize {
        self.lock().swapchains.len()
    }

    /// Images acquired from `swapchain` and not yet released.
    pub fn held_images(&self, swapchain: SwapchainId) -> u32 {
        self.lock()
            .swapchains
            .get(&swapchain)
            .map_or(0, |swapchain| swapchain.held)
    }

    fn head_pose() -> Posef {
        Posef::from_position([0.0, HEAD_HEIGHT, 0.0])
    }

    fn limb_pose(space: PoseSpace) -> Option<Posef> {
        let position = match space {
            PoseSpace::Reference(ReferenceSpace::View) => return Some(Self::head_pose()),
            PoseSpace::Reference(_) => return Some(Posef::IDENTITY),
            PoseSpace::LeftGrip => [-0.2, 1.2, -0.3],
            PoseSpace::RightGrip => [0.2, 1.2, -0.3],
            PoseSpace::LeftAim => [-0.2, 1.25, -0.35],
            PoseSpace::RightAim => [0.2, 1.25, -0.35],
        };
        Some(Posef::from_position(position))
    }

    fn swapchain_mut<'a>(
        state: &'a mut SimState,
        swapchain: SwapchainId,
        call: SimCall,
    ) -> VrResult<&'a mut SimSwapchain> {
        state
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| VrError::runtime(call.name(), "XR_ERROR_HANDLE_INVALID"))
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl XrRuntime for SimulatedRuntime {
    fn label(&self) -> &'static str {
        "Simulated XR Runtime"
    }

    fn system_properties(&self) -> VrResult<SystemProperties> {
        Ok(SystemProperties {
            system_name: "Simulated HMD".to_string(),
            vendor_id: 0,
            max_swapchain_extent: Extent2D::new(4096, 4096),
            max_layer_count: 16,
            orientation_tracking: true,
            position_tracking: true,
        })
    }

    fn view_configuration_views(&self) -> VrResult<Vec<ViewConfigurationView>> {
        Ok(vec![
            ViewConfigurationView {
                recommended_extent: EYE_EXTENT,
                max_extent: Extent2D::new(4096, 4096),
                recommended_sample_count: 1,
            };
            EYE_COUNT
        ])
    }

    fn graphics_requirements(&self) -> VrResult<GraphicsRequirements> {
        Ok(GraphicsRequirements {
            min_api_version: (1, 0),
            max_api_version: (1, 3),
            instance_extensions: parse_extension_list(INSTANCE_EXTENSIONS),
            device_extensions: parse_extension_list(DEVICE_EXTENSIONS),
        })
    }

    fn graphics_device(&self) -> VrResult<DeviceId> {
        Ok(self.lock().device)
    }

    fn begin_session(&self) -> VrResult<()> {
        let mut state = self.lock();
        state.take_failure(SimCall::BeginSession)?;
        if state.session_running {
            return Err(VrError::runtime(
                SimCall::BeginSession.name(),
                "XR_ERROR_SESSION_RUNNING",
            ));
        }
        state.session_running = true;
        Ok(())
    }

    fn end_session(&self) -> VrResult<()> {
        let mut state = self.lock();
        state.take_failure(SimCall::EndSession)?;
        state.require_running(SimCall::EndSession)?;
        state.session_running = false;
        state.awaiting_begin = false;
        state
            .events
            .push_back(RuntimeEvent::SessionStateChanged(SessionState::Idle));
        if state.exit_requested {
            state
                .events
                .push_back(RuntimeEvent::SessionStateChanged(SessionState::Exiting));
        }
        self.frame_begun.notify_all();
        Ok(())
    }

    fn request_exit(&self) -> VrResult<()> {
        let mut state = self.lock();
        state.exit_requested = true;
        let next = if state.session_running {
            SessionState::Stopping
        } else {
            SessionState::Exiting
        };
        state
            .events
            .push_back(RuntimeEvent::SessionStateChanged(next));
        Ok(())
    }

    fn poll_event(&self) -> VrResult<Option<RuntimeEvent>> {
        Ok(self.lock().events.pop_front())
    }

    fn wait_frame(&self) -> VrResult<FrameTiming> {
        let mut state = self.lock();
        while state.awaiting_begin && state.session_running {
            state = self
                .frame_begun
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.take_failure(SimCall::WaitFrame)?;
        state.require_running(SimCall::WaitFrame)?;

        let delay = state.wait_delay;
        if !delay.is_zero() {
            drop(state);
            thread::sleep(delay);
            state = self.lock();
        }

        state.frame_index += 1;
        state.awaiting_begin = true;
        Ok(FrameTiming {
            predicted_display_time: DISPLAY_EPOCH_NS + state.frame_index * DISPLAY_PERIOD_NS,
            predicted_display_period: DISPLAY_PERIOD_NS,
            should_render: state.should_render,
        })
    }

    fn begin_frame(&self) -> VrResult<()> {
        let mut state = self.lock();
        state.take_failure(SimCall::BeginFrame)?;
        state.require_running(SimCall::BeginFrame)?;
        if !state.awaiting_begin {
            return Err(VrError::runtime(
                SimCall::BeginFrame.name(),
                "XR_ERROR_CALL_ORDER_INVALID",
            ));
        }
        state.awaiting_begin = false;
        state.frames_begun += 1;
        self.frame_begun.notify_all();
        Ok(())
    }

    fn end_frame(&self, submission: &CompositionSubmission) -> VrResult<()> {
        let mut state = self.lock();
        state.take_failure(SimCall::EndFrame)?;
        state.require_running(SimCall::EndFrame)?;
        if state.submissions.len() as u64 >= state.frames_begun {
            return Err(VrError::runtime(
                SimCall::EndFrame.name(),
                "XR_ERROR_CALL_ORDER_INVALID",
            ));
        }
        state.submissions.push(submission.clone());
        Ok(())
    }

    fn create_space(&self, space: PoseSpace) -> VrResult<SpaceId> {
        let mut state = self.lock();
        let id = SpaceId(state.next_handle());
        state.spaces.insert(id, space);
        Ok(id)
    }

    fn destroy_space(&self, space: SpaceId) -> VrResult<()> {
        self.lock()
            .spaces
            .remove(&space)
            .map(|_| ())
            .ok_or_else(|| VrError::runtime("xrDestroySpace", "XR_ERROR_HANDLE_INVALID"))
    }

    fn locate_views(&self, display_time: i64, base: SpaceId) -> VrResult<[EyeView; EYE_COUNT]> {
        let mut state = self.lock();
        state.take_failure(SimCall::LocateViews)?;
        if !state.spaces.contains_key(&base) || display_time <= 0 {
            return Err(VrError::runtime(
                SimCall::LocateViews.name(),
                "XR_ERROR_VALIDATION_FAILURE",
            ));
        }
        let fov = Fovf::symmetric(0.8, 0.85);
        Ok([
            EyeView {
                pose: Posef::from_position([-IPD_HALF, HEAD_HEIGHT, 0.0]),
                fov,
            },
            EyeView {
                pose: Posef::from_position([IPD_HALF, HEAD_HEIGHT, 0.0]),
                fov,
            },
        ])
    }

    fn locate_space(
        &self,
        space: SpaceId,
        base: SpaceId,
        _display_time: i64,
    ) -> VrResult<Option<Posef>> {
        let state = self.lock();
        let kind = *state
            .spaces
            .get(&space)
            .ok_or_else(|| VrError::runtime("xrLocateSpace", "XR_ERROR_HANDLE_INVALID"))?;
        if !state.spaces.contains_key(&base) {
            return Err(VrError::runtime("xrLocateSpace", "XR_ERROR_HANDLE_INVALID"));
        }
        if matches!(kind, PoseSpace::Reference(_)) || state.limbs_tracked {
            Ok(Self::limb_pose(kind))
        } else {
            Ok(None)
        }
    }

    fn enumerate_swapchain_formats(&self) -> VrResult<Vec<i64>> {
        Ok(self.lock().formats.clone())
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> VrResult<(SwapchainId, u32)> {
        let mut state = self.lock();
        state.take_failure(SimCall::CreateSwapchain)?;
        if !state.formats.contains(&info.format) {
            return Err(VrError::runtime(
                SimCall::CreateSwapchain.name(),
                "XR_ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED",
            ));
        }
        let id = SwapchainId(state.next_handle());
        state.swapchains.insert(
            id,
            SimSwapchain {
                image_count: 3,
                ..SimSwapchain::default()
            },
        );
        Ok((id, 3))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainId) -> VrResult<()> {
        self.lock()
            .swapchains
            .remove(&swapchain)
            .map(|_| ())
            .ok_or_else(|| VrError::runtime("xrDestroySwapchain", "XR_ERROR_HANDLE_INVALID"))
    }

    fn acquire_image(&self, swapchain: SwapchainId) -> VrResult<u32> {
        let mut state = self.lock();
        state.take_failure(SimCall::AcquireImage)?;
        let chain = Self::swapchain_mut(&mut state, swapchain, SimCall::AcquireImage)?;
        if chain.held >= chain.image_count {
            return Err(VrError::runtime(
                SimCall::AcquireImage.name(),
                "XR_ERROR_CALL_ORDER_INVALID",
            ));
        }
        let index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.image_count;
        chain.held += 1;
        Ok(index)
    }

    fn wait_image(&self, swapchain: SwapchainId, _timeout: Duration) -> VrResult<()> {
        let mut state = self.lock();
        state.take_failure(SimCall::WaitImage)?;
        let chain = Self::swapchain_mut(&mut state, swapchain, SimCall::WaitImage)?;
        if chain.held == 0 {
            return Err(VrError::runtime(
                SimCall::WaitImage.name(),
                "XR_ERROR_CALL_ORDER_INVALID",
            ));
        }
        Ok(())
    }

    fn release_image(&self, swapchain: SwapchainId) -> VrResult<()> {
        let mut state = self.lock();
        state.take_failure(SimCall::ReleaseImage)?;
        let chain = Self::swapchain_mut(&mut state, swapchain, SimCall::ReleaseImage)?;
        if chain.held == 0 {
            return Err(VrError::runtime(
                SimCall::ReleaseImage.name(),
                "XR_ERROR_CALL_ORDER_INVALID",
            ));
        }
        chain.held -= 1;
        Ok(())
    }

    fn attach_actions(&self, _interaction_profile: &str, bindings: &[ActionBinding]) -> VrResult<()> {
        let mut state = self.lock();
        if state.attached.is_some() {
            return Err(VrError::runtime(
                "xrAttachSessionActionSets",
                "XR_ERROR_ACTIONSETS_ALREADY_ATTACHED",
            ));
        }
        state.attached = Some(bindings.to_vec());
        Ok(())
    }

    fn sync_actions(&self) -> VrResult<()> {
        let mut state = self.lock();
        state.take_failure(SimCall::SyncActions)?;
        if state.attached.is_none() {
            return Err(VrError::runtime(
                SimCall::SyncActions.name(),
                "XR_ERROR_ACTIONSET_NOT_ATTACHED",
            ));
        }
        state.action_syncs += 1;
        Ok(())
    }

    fn action_value(
        &self,
        binding: &ActionBinding,
        _base: SpaceId,
        _display_time: i64,
    ) -> VrResult<ActionValue> {
        let state = self.lock();
        if let Some(value) = state.action_values.get(binding.name) {
            return Ok(value.clone());
        }
        Ok(match binding.kind {
            ActionKind::Boolean => ActionValue::Bool(false),
            ActionKind::Float => ActionValue::Float(0.0),
            ActionKind::Pose => ActionValue::Pose(None),
        })
    }
}
