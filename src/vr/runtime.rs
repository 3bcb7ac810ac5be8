//! The seam between the frame loop and an XR runtime.
//!
//! Everything the session core needs from the runtime goes through
//! [`XrRuntime`]. Implementations own their handles and do their own
//! internal locking: the trait is called from the event thread, the frame
//! thread(s) and both eye pipelines at once.

use crate::vr::input::{ActionBinding, ActionValue};
use crate::vr::{
    CompositionSubmission, EyeView, Extent2D, Posef, SessionState, VrResult, EYE_COUNT,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwapchainId(pub u64);

/// Identifier of a physical rendering device (e.g. a Vulkan physical device handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSpace {
    View,
    Local,
    Stage,
}

/// Every space a session locates poses in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoseSpace {
    Reference(ReferenceSpace),
    LeftGrip,
    RightGrip,
    LeftAim,
    RightAim,
}

impl PoseSpace {
    pub const fn limbs() -> [PoseSpace; 4] {
        [
            PoseSpace::LeftGrip,
            PoseSpace::RightGrip,
            PoseSpace::LeftAim,
            PoseSpace::RightAim,
        ]
    }
}

/// Result of the blocking wait-for-frame call. Times are monotonic nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameTiming {
    pub predicted_display_time: i64,
    pub predicted_display_period: i64,
    pub should_render: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    SessionStateChanged(SessionState),
    InstanceLossPending,
    EventsLost(u32),
    InteractionProfileChanged,
    ReferenceSpaceChangePending(ReferenceSpace),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemProperties {
    pub system_name: String,
    pub vendor_id: u32,
    pub max_swapchain_extent: Extent2D,
    pub max_layer_count: u32,
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

/// Recommended per-view render target parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewConfigurationView {
    pub recommended_extent: Extent2D,
    pub max_extent: Extent2D,
    pub recommended_sample_count: u32,
}

/// Capabilities the host renderer must enable for the runtime to use its device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphicsRequirements {
    pub min_api_version: (u16, u16),
    pub max_api_version: (u16, u16),
    pub instance_extensions: Vec<String>,
    pub device_extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapchainCreateInfo {
    pub format: i64,
    pub extent: Extent2D,
    pub sample_count: u32,
    pub array_size: u32,
}

pub trait XrRuntime: Send + Sync {
    fn label(&self) -> &'static str;

    fn system_properties(&self) -> VrResult<SystemProperties>;
    fn view_configuration_views(&self) -> VrResult<Vec<ViewConfigurationView>>;
    fn graphics_requirements(&self) -> VrResult<GraphicsRequirements>;
    /// The physical device the runtime needs the host to render with.
    fn graphics_device(&self) -> VrResult<DeviceId>;

    fn begin_session(&self) -> VrResult<()>;
    fn end_session(&self) -> VrResult<()>;
    fn request_exit(&self) -> VrResult<()>;
    fn poll_event(&self) -> VrResult<Option<RuntimeEvent>>;

    /// Blocks until the runtime wants the next frame. A second call blocks
    /// until the frame returned by the previous one has been begun.
    fn wait_frame(&self) -> VrResult<FrameTiming>;
    fn begin_frame(&self) -> VrResult<()>;
    fn end_frame(&self, submission: &CompositionSubmission) -> VrResult<()>;

    fn create_space(&self, space: PoseSpace) -> VrResult<SpaceId>;
    fn destroy_space(&self, space: SpaceId) -> VrResult<()>;
    fn locate_views(&self, display_time: i64, base: SpaceId) -> VrResult<[EyeView; EYE_COUNT]>;
    /// `None` when the runtime cannot currently track the space.
    fn locate_space(&self, space: SpaceId, base: SpaceId, display_time: i64)
    -> VrResult<Option<Posef>>;

    fn enumerate_swapchain_formats(&self) -> VrResult<Vec<i64>>;
    /// Returns the swapchain and its image count.
    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> VrResult<(SwapchainId, u32)>;
    fn destroy_swapchain(&self, swapchain: SwapchainId) -> VrResult<()>;
    fn acquire_image(&self, swapchain: SwapchainId) -> VrResult<u32>;
    fn wait_image(&self, swapchain: SwapchainId, timeout: Duration) -> VrResult<()>;
    fn release_image(&self, swapchain: SwapchainId) -> VrResult<()>;

    fn attach_actions(&self, interaction_profile: &str, bindings: &[ActionBinding])
    -> VrResult<()>;
    fn sync_actions(&self) -> VrResult<()>;
    fn action_value(&self, binding: &ActionBinding, base: SpaceId, display_time: i64)
    -> VrResult<ActionValue>;
}

/// Splits a runtime-provided space separated extension list.
pub fn parse_extension_list(names: &str) -> Vec<String> {
    names
        .split(|c: char| c.is_whitespace() || c == '\0')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}
