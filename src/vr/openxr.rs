//! [`XrRuntime`] over a Vulkan-backed OpenXR session.
//!
//! The host owns the Vulkan objects. It loads an instance with
//! [`OpenXrRuntime::load_instance`], creates its Vulkan instance and device
//! with the extensions the runtime asks for, then hands the handles to
//! [`OpenXrRuntime::new`].

use crate::config::SessionConfig;
use crate::vr::input::{ActionBinding, ActionKind, ActionValue};
use crate::vr::runtime::{
    parse_extension_list, DeviceId, GraphicsRequirements, PoseSpace, ReferenceSpace,
    SwapchainCreateInfo, SystemProperties, ViewConfigurationView,
};
use crate::vr::{
    BlendMode, CompositionSubmission, Extent2D, EyeView, Fovf, FrameTiming, Posef, RuntimeEvent,
    SessionState, SpaceId, SwapchainId, VrError, VrResult, XrRuntime, EYE_COUNT,
};
use openxr as xr;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// Raw Vulkan handles the session is created against.
pub struct VulkanBinding {
    pub instance: *const c_void,
    pub physical_device: *const c_void,
    pub device: *const c_void,
    pub queue_family_index: u32,
    pub queue_index: u32,
}

fn map_err(call: &'static str) -> impl Fn(xr::sys::Result) -> VrError {
    move |result| match result {
        xr::sys::Result::ERROR_SESSION_LOST => VrError::LossPending,
        other => VrError::runtime(call, format!("{other:?}")),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum BoundAction {
    Boolean(xr::Action<bool>),
    Float(xr::Action<f32>),
    Pose(xr::Action<xr::Posef>, xr::Space),
}

/// Grip and aim pose actions backing the per-limb spaces.
struct LimbActions {
    set: xr::ActionSet,
    grip: xr::Action<xr::Posef>,
    aim: xr::Action<xr::Posef>,
    left: xr::Path,
    right: xr::Path,
}

pub struct OpenXrRuntime {
    instance: xr::Instance,
    system: xr::SystemId,
    vk_instance: usize,
    session: xr::Session<xr::Vulkan>,
    frame_waiter: Mutex<xr::FrameWaiter>,
    frame_stream: Mutex<xr::FrameStream<xr::Vulkan>>,
    limbs: LimbActions,
    actions: Mutex<Option<(xr::ActionSet, HashMap<&'static str, BoundAction>)>>,
    spaces: Mutex<HashMap<SpaceId, xr::Space>>,
    swapchains: Mutex<HashMap<SwapchainId, xr::Swapchain<xr::Vulkan>>>,
    next_handle: AtomicU64,
}

impl OpenXrRuntime {
    pub fn load_instance(config: &SessionConfig) -> VrResult<(xr::Instance, xr::SystemId)> {
        let entry = xr::Entry::load()
            .map_err(|err| VrError::runtime("xrGetInstanceProcAddr", err.to_string()))?;
        let app_info = xr::ApplicationInfo {
            application_name: &config.application_name,
            application_version: 1,
            engine_name: &config.engine_name,
            engine_version: 1,
        };

        let mut extensions = xr::ExtensionSet::default();
        extensions.khr_vulkan_enable = true;
        let instance = entry
            .create_instance(&app_info, &extensions, &[])
            .map_err(map_err("xrCreateInstance"))?;
        let system = instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(map_err("xrGetSystem"))?;
        Ok((instance, system))
    }

    /// # Safety
    ///
    /// Every handle in `vulkan` must be a live Vulkan object created with the
    /// extensions from [`XrRuntime::graphics_requirements`], and
    /// `physical_device` must be the device the runtime reports.
    pub unsafe fn new(
        instance: xr::Instance,
        system: xr::SystemId,
        vulkan: &VulkanBinding,
    ) -> VrResult<Self> {
        // The runtime refuses session creation until requirements were queried.
        instance
            .graphics_requirements::<xr::Vulkan>(system)
            .map_err(map_err("xrGetVulkanGraphicsRequirementsKHR"))?;

        let (session, frame_waiter, frame_stream) = unsafe {
            instance.create_session::<xr::Vulkan>(
                system,
                &xr::vulkan::SessionCreateInfo {
                    instance: vulkan.instance,
                    physical_device: vulkan.physical_device,
                    device: vulkan.device,
                    queue_family_index: vulkan.queue_family_index,
                    queue_index: vulkan.queue_index,
                },
            )
        }
        .map_err(map_err("xrCreateSession"))?;

        let limbs = Self::create_limb_actions(&instance)?;
        log::info!("[platform] OpenXR session created");

        Ok(Self {
            instance,
            system,
            vk_instance: vulkan.instance as usize,
            session,
            frame_waiter: Mutex::new(frame_waiter),
            frame_stream: Mutex::new(frame_stream),
            limbs,
            actions: Mutex::new(None),
            spaces: Mutex::new(HashMap::new()),
            swapchains: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    fn create_limb_actions(instance: &xr::Instance) -> VrResult<LimbActions> {
        let path = |name: &str| {
            instance
                .string_to_path(name)
                .map_err(map_err("xrStringToPath"))
        };
        let left = path("/user/hand/left")?;
        let right = path("/user/hand/right")?;
        let set = instance
            .create_action_set("limbs", "Limb poses", 0)
            .map_err(map_err("xrCreateActionSet"))?;
        let grip = set
            .create_action::<xr::Posef>("grip", "Grip pose", &[left, right])
            .map_err(map_err("xrCreateAction"))?;
        let aim = set
            .create_action::<xr::Posef>("aim", "Aim pose", &[left, right])
            .map_err(map_err("xrCreateAction"))?;
        Ok(LimbActions {
            set,
            grip,
            aim,
            left,
            right,
        })
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn insert_space(&self, space: xr::Space) -> SpaceId {
        let id = SpaceId(self.next_handle());
        lock(&self.spaces).insert(id, space);
        id
    }

    fn with_swapchain<R>(
        &self,
        swapchain: SwapchainId,
        call: &'static str,
        f: impl FnOnce(&mut xr::Swapchain<xr::Vulkan>) -> Result<R, xr::sys::Result>,
    ) -> VrResult<R> {
        let mut swapchains = lock(&self.swapchains);
        let handle = swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| VrError::runtime(call, "unknown swapchain"))?;
        f(handle).map_err(map_err(call))
    }
}

fn to_pose(pose: xr::Posef) -> Posef {
    Posef {
        orientation: [
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ],
        position: [pose.position.x, pose.position.y, pose.position.z],
    }
}

fn from_pose(pose: Posef) -> xr::Posef {
    let [x, y, z, w] = pose.orientation;
    let [px, py, pz] = pose.position;
    xr::Posef {
        orientation: xr::Quaternionf { x, y, z, w },
        position: xr::Vector3f {
            x: px,
            y: py,
            z: pz,
        },
    }
}

fn to_fov(fov: xr::Fovf) -> Fovf {
    Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn from_fov(fov: Fovf) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn to_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

fn to_reference_space(space: xr::ReferenceSpaceType) -> ReferenceSpace {
    match space {
        xr::ReferenceSpaceType::VIEW => ReferenceSpace::View,
        xr::ReferenceSpaceType::STAGE => ReferenceSpace::Stage,
        _ => ReferenceSpace::Local,
    }
}

fn tracked(location: xr::SpaceLocation) -> Option<Posef> {
    location
        .location_flags
        .contains(xr::SpaceLocationFlags::ORIENTATION_VALID | xr::SpaceLocationFlags::POSITION_VALID)
        .then(|| to_pose(location.pose))
}

impl XrRuntime for OpenXrRuntime {
    fn label(&self) -> &'static str {
        "OpenXR"
    }

    fn system_properties(&self) -> VrResult<SystemProperties> {
        let properties = self
            .instance
            .system_properties(self.system)
            .map_err(map_err("xrGetSystemProperties"))?;
        Ok(SystemProperties {
            system_name: properties.system_name,
            vendor_id: properties.vendor_id,
            max_swapchain_extent: Extent2D::new(
                properties.graphics_properties.max_swapchain_image_width,
                properties.graphics_properties.max_swapchain_image_height,
            ),
            max_layer_count: properties.graphics_properties.max_layer_count,
            orientation_tracking: properties.tracking_properties.orientation_tracking,
            position_tracking: properties.tracking_properties.position_tracking,
        })
    }

    fn view_configuration_views(&self) -> VrResult<Vec<ViewConfigurationView>> {
        let views = self
            .instance
            .enumerate_view_configuration_views(self.system, VIEW_TYPE)
            .map_err(map_err("xrEnumerateViewConfigurationViews"))?;
        Ok(views
            .into_iter()
            .map(|view| ViewConfigurationView {
                recommended_extent: Extent2D::new(
                    view.recommended_image_rect_width,
                    view.recommended_image_rect_height,
                ),
                max_extent: Extent2D::new(view.max_image_rect_width, view.max_image_rect_height),
                recommended_sample_count: view.recommended_swapchain_sample_count,
            })
            .collect())
    }

    fn graphics_requirements(&self) -> VrResult<GraphicsRequirements> {
        let requirements = self
            .instance
            .graphics_requirements::<xr::Vulkan>(self.system)
            .map_err(map_err("xrGetVulkanGraphicsRequirementsKHR"))?;
        let instance_extensions = self
            .instance
            .vulkan_legacy_instance_extensions(self.system)
            .map_err(map_err("xrGetVulkanInstanceExtensionsKHR"))?;
        let device_extensions = self
            .instance
            .vulkan_legacy_device_extensions(self.system)
            .map_err(map_err("xrGetVulkanDeviceExtensionsKHR"))?;
        let min = requirements.min_api_version_supported;
        let max = requirements.max_api_version_supported;
        Ok(GraphicsRequirements {
            min_api_version: (min.major(), min.minor()),
            max_api_version: (max.major(), max.minor()),
            instance_extensions: parse_extension_list(&instance_extensions),
            device_extensions: parse_extension_list(&device_extensions),
        })
    }

    fn graphics_device(&self) -> VrResult<DeviceId> {
        // Safety: the instance handle was valid when the session was created
        // from it and the host keeps it alive for the session's lifetime.
        let device = unsafe {
            self.instance
                .vulkan_graphics_device(self.system, self.vk_instance as *const c_void)
        }
        .map_err(map_err("xrGetVulkanGraphicsDeviceKHR"))?;
        Ok(DeviceId(device as usize as u64))
    }

    fn begin_session(&self) -> VrResult<()> {
        self.session
            .begin(VIEW_TYPE)
            .map(|_| ())
            .map_err(map_err("xrBeginSession"))
    }

    fn end_session(&self) -> VrResult<()> {
        self.session
            .end()
            .map(|_| ())
            .map_err(map_err("xrEndSession"))
    }

    fn request_exit(&self) -> VrResult<()> {
        self.session
            .request_exit()
            .map_err(map_err("xrRequestExitSession"))
    }

    fn poll_event(&self) -> VrResult<Option<RuntimeEvent>> {
        let mut buffer = xr::EventDataBuffer::new();
        loop {
            let Some(event) = self
                .instance
                .poll_event(&mut buffer)
                .map_err(map_err("xrPollEvent"))?
            else {
                return Ok(None);
            };
            let mapped = match event {
                xr::Event::SessionStateChanged(changed) => {
                    RuntimeEvent::SessionStateChanged(to_state(changed.state()))
                }
                xr::Event::InstanceLossPending(_) => RuntimeEvent::InstanceLossPending,
                xr::Event::EventsLost(lost) => RuntimeEvent::EventsLost(lost.lost_event_count()),
                xr::Event::InteractionProfileChanged(_) => RuntimeEvent::InteractionProfileChanged,
                xr::Event::ReferenceSpaceChangePending(pending) => {
                    RuntimeEvent::ReferenceSpaceChangePending(to_reference_space(
                        pending.reference_space_type(),
                    ))
                }
                _ => continue,
            };
            return Ok(Some(mapped));
        }
    }

    fn wait_frame(&self) -> VrResult<FrameTiming> {
        let state = lock(&self.frame_waiter)
            .wait()
            .map_err(map_err("xrWaitFrame"))?;
        Ok(FrameTiming {
            predicted_display_time: state.predicted_display_time.as_nanos(),
            predicted_display_period: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&self) -> VrResult<()> {
        lock(&self.frame_stream)
            .begin()
            .map_err(map_err("xrBeginFrame"))
    }

    fn end_frame(&self, submission: &CompositionSubmission) -> VrResult<()> {
        let blend_mode = match submission.blend_mode {
            BlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
            BlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
            BlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
        };
        let display_time = xr::Time::from_nanos(submission.display_time);
        let mut stream = lock(&self.frame_stream);
        if submission.is_empty() {
            return stream
                .end(display_time, blend_mode, &[])
                .map_err(map_err("xrEndFrame"));
        }

        let spaces = lock(&self.spaces);
        let swapchains = lock(&self.swapchains);
        let space = spaces
            .get(&submission.space)
            .ok_or_else(|| VrError::runtime("xrEndFrame", "unknown base space"))?;

        let mut views = Vec::with_capacity(submission.views.len());
        for view in &submission.views {
            let swapchain = swapchains
                .get(&view.sub_image.swapchain)
                .ok_or_else(|| VrError::runtime("xrEndFrame", "unknown swapchain"))?;
            let rect = view.sub_image.image_rect;
            views.push(
                xr::CompositionLayerProjectionView::new()
                    .pose(from_pose(view.pose))
                    .fov(from_fov(view.fov))
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(swapchain)
                            .image_array_index(view.sub_image.image_array_index)
                            .image_rect(xr::Rect2Di {
                                offset: xr::Offset2Di {
                                    x: rect.offset[0],
                                    y: rect.offset[1],
                                },
                                extent: xr::Extent2Di {
                                    width: rect.extent[0],
                                    height: rect.extent[1],
                                },
                            }),
                    ),
            );
        }
        let layer = xr::CompositionLayerProjection::new()
            .space(space)
            .views(&views);
        stream
            .end(display_time, blend_mode, &[&layer])
            .map_err(map_err("xrEndFrame"))
    }

    fn create_space(&self, space: PoseSpace) -> VrResult<SpaceId> {
        let reference = |ty: xr::ReferenceSpaceType| {
            self.session
                .create_reference_space(ty, xr::Posef::IDENTITY)
                .map_err(map_err("xrCreateReferenceSpace"))
        };
        let limb = |action: &xr::Action<xr::Posef>, hand: xr::Path| {
            action
                .create_space(self.session.clone(), hand, xr::Posef::IDENTITY)
                .map_err(map_err("xrCreateActionSpace"))
        };
        let created = match space {
            PoseSpace::Reference(ReferenceSpace::View) => reference(xr::ReferenceSpaceType::VIEW)?,
            PoseSpace::Reference(ReferenceSpace::Local) => {
                reference(xr::ReferenceSpaceType::LOCAL)?
            }
            PoseSpace::Reference(ReferenceSpace::Stage) => {
                reference(xr::ReferenceSpaceType::STAGE)?
            }
            PoseSpace::LeftGrip => limb(&self.limbs.grip, self.limbs.left)?,
            PoseSpace::RightGrip => limb(&self.limbs.grip, self.limbs.right)?,
            PoseSpace::LeftAim => limb(&self.limbs.aim, self.limbs.left)?,
            PoseSpace::RightAim => limb(&self.limbs.aim, self.limbs.right)?,
        };
        Ok(self.insert_space(created))
    }

    fn destroy_space(&self, space: SpaceId) -> VrResult<()> {
        lock(&self.spaces)
            .remove(&space)
            .map(drop)
            .ok_or_else(|| VrError::runtime("xrDestroySpace", "unknown space"))
    }

    fn locate_views(&self, display_time: i64, base: SpaceId) -> VrResult<[EyeView; EYE_COUNT]> {
        let spaces = lock(&self.spaces);
        let base = spaces
            .get(&base)
            .ok_or_else(|| VrError::runtime("xrLocateViews", "unknown base space"))?;
        let (_, views) = self
            .session
            .locate_views(VIEW_TYPE, xr::Time::from_nanos(display_time), base)
            .map_err(map_err("xrLocateViews"))?;
        match views.as_slice() {
            [left, right, ..] => Ok([
                EyeView {
                    pose: to_pose(left.pose),
                    fov: to_fov(left.fov),
                },
                EyeView {
                    pose: to_pose(right.pose),
                    fov: to_fov(right.fov),
                },
            ]),
            _ => Err(VrError::runtime(
                "xrLocateViews",
                format!("expected {EYE_COUNT} views, runtime returned {}", views.len()),
            )),
        }
    }

    fn locate_space(
        &self,
        space: SpaceId,
        base: SpaceId,
        display_time: i64,
    ) -> VrResult<Option<Posef>> {
        let spaces = lock(&self.spaces);
        let (Some(space), Some(base)) = (spaces.get(&space), spaces.get(&base)) else {
            return Err(VrError::runtime("xrLocateSpace", "unknown space"));
        };
        let location = space
            .locate(base, xr::Time::from_nanos(display_time))
            .map_err(map_err("xrLocateSpace"))?;
        Ok(tracked(location))
    }

    fn enumerate_swapchain_formats(&self) -> VrResult<Vec<i64>> {
        let formats = self
            .session
            .enumerate_swapchain_formats()
            .map_err(map_err("xrEnumerateSwapchainFormats"))?;
        Ok(formats.into_iter().map(i64::from).collect())
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> VrResult<(SwapchainId, u32)> {
        let format = u32::try_from(info.format).map_err(|_| VrError::UnsupportedFormat {
            preferred: vec![info.format],
        })?;
        let swapchain = self
            .session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                    | xr::SwapchainUsageFlags::SAMPLED,
                format,
                sample_count: info.sample_count,
                width: info.extent.width,
                height: info.extent.height,
                face_count: 1,
                array_size: info.array_size,
                mip_count: 1,
            })
            .map_err(map_err("xrCreateSwapchain"))?;
        let image_count = swapchain
            .enumerate_images()
            .map_err(map_err("xrEnumerateSwapchainImages"))?
            .len() as u32;

        let id = SwapchainId(self.next_handle());
        lock(&self.swapchains).insert(id, swapchain);
        Ok((id, image_count))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainId) -> VrResult<()> {
        lock(&self.swapchains)
            .remove(&swapchain)
            .map(drop)
            .ok_or_else(|| VrError::runtime("xrDestroySwapchain", "unknown swapchain"))
    }

    fn acquire_image(&self, swapchain: SwapchainId) -> VrResult<u32> {
        self.with_swapchain(swapchain, "xrAcquireSwapchainImage", |handle| {
            handle.acquire_image()
        })
    }

    // The safe wrapper folds XR_TIMEOUT_EXPIRED into success, so a timed out
    // wait is indistinguishable from a ready image here.
    fn wait_image(&self, swapchain: SwapchainId, timeout: Duration) -> VrResult<()> {
        let timeout = xr::Duration::from_nanos(timeout.as_nanos().min(i64::MAX as u128) as i64);
        self.with_swapchain(swapchain, "xrWaitSwapchainImage", |handle| {
            handle.wait_image(timeout)
        })
    }

    fn release_image(&self, swapchain: SwapchainId) -> VrResult<()> {
        self.with_swapchain(swapchain, "xrReleaseSwapchainImage", |handle| {
            handle.release_image()
        })
    }

    fn attach_actions(
        &self,
        interaction_profile: &str,
        bindings: &[ActionBinding],
    ) -> VrResult<()> {
        let path = |name: &str| {
            self.instance
                .string_to_path(name)
                .map_err(map_err("xrStringToPath"))
        };
        let set = self
            .instance
            .create_action_set("gameplay", "Gameplay", 0)
            .map_err(map_err("xrCreateActionSet"))?;

        let mut actions = HashMap::with_capacity(bindings.len());
        for binding in bindings {
            let action = match binding.kind {
                ActionKind::Boolean => BoundAction::Boolean(
                    set.create_action(binding.name, binding.name, &[])
                        .map_err(map_err("xrCreateAction"))?,
                ),
                ActionKind::Float => BoundAction::Float(
                    set.create_action(binding.name, binding.name, &[])
                        .map_err(map_err("xrCreateAction"))?,
                ),
                ActionKind::Pose => {
                    let action = set
                        .create_action::<xr::Posef>(binding.name, binding.name, &[])
                        .map_err(map_err("xrCreateAction"))?;
                    let space = action
                        .create_space(self.session.clone(), xr::Path::NULL, xr::Posef::IDENTITY)
                        .map_err(map_err("xrCreateActionSpace"))?;
                    BoundAction::Pose(action, space)
                }
            };
            actions.insert(binding.name, action);
        }

        let mut suggested = Vec::with_capacity(bindings.len() + 4);
        for binding in bindings {
            let input = path(binding.path)?;
            suggested.push(match &actions[binding.name] {
                BoundAction::Boolean(action) => xr::Binding::new(action, input),
                BoundAction::Float(action) => xr::Binding::new(action, input),
                BoundAction::Pose(action, _) => xr::Binding::new(action, input),
            });
        }
        let limb_paths = [
            (&self.limbs.grip, "/user/hand/left/input/grip/pose"),
            (&self.limbs.grip, "/user/hand/right/input/grip/pose"),
            (&self.limbs.aim, "/user/hand/left/input/aim/pose"),
            (&self.limbs.aim, "/user/hand/right/input/aim/pose"),
        ];
        for (action, input) in limb_paths {
            suggested.push(xr::Binding::new(action, path(input)?));
        }
        self.instance
            .suggest_interaction_profile_bindings(path(interaction_profile)?, &suggested)
            .map_err(map_err("xrSuggestInteractionProfileBindings"))?;

        self.session
            .attach_action_sets(&[&self.limbs.set, &set])
            .map_err(map_err("xrAttachSessionActionSets"))?;
        *lock(&self.actions) = Some((set, actions));
        Ok(())
    }

    fn sync_actions(&self) -> VrResult<()> {
        let actions = lock(&self.actions);
        let Some((set, _)) = actions.as_ref() else {
            return Err(VrError::CallOrder("sync before actions were attached"));
        };
        self.session
            .sync_actions(&[
                xr::ActiveActionSet::new(&self.limbs.set),
                xr::ActiveActionSet::new(set),
            ])
            .map_err(map_err("xrSyncActions"))
    }

    fn action_value(
        &self,
        binding: &ActionBinding,
        base: SpaceId,
        display_time: i64,
    ) -> VrResult<ActionValue> {
        let actions = lock(&self.actions);
        let action = actions
            .as_ref()
            .and_then(|(_, actions)| actions.get(binding.name))
            .ok_or_else(|| VrError::runtime("xrGetActionState", "action not attached"))?;
        match action {
            BoundAction::Boolean(action) => action
                .state(&self.session, xr::Path::NULL)
                .map(|state| ActionValue::Bool(state.current_state))
                .map_err(map_err("xrGetActionStateBoolean")),
            BoundAction::Float(action) => action
                .state(&self.session, xr::Path::NULL)
                .map(|state| ActionValue::Float(state.current_state))
                .map_err(map_err("xrGetActionStateFloat")),
            BoundAction::Pose(_, space) => {
                let spaces = lock(&self.spaces);
                let base = spaces
                    .get(&base)
                    .ok_or_else(|| VrError::runtime("xrLocateSpace", "unknown base space"))?;
                let location = space
                    .locate(base, xr::Time::from_nanos(display_time))
                    .map_err(map_err("xrLocateSpace"))?;
                Ok(ActionValue::Pose(tracked(location)))
            }
        }
    }
}
