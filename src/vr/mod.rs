pub mod input;
#[cfg(feature = "vr-openxr")]
pub mod openxr;
pub mod pacer;
pub mod platform;
pub mod runtime;
pub mod session;
pub mod simulated;
pub mod state;
pub mod swapchain;

pub use input::{ActionBinding, ActionKind, ActionValue, InputSnapshot};
pub use pacer::{FramePacer, FrameRecord, FrameSlots, FrameTicket, LimbPoses, PacerStats};
pub use platform::XrPlatform;
pub use runtime::{FrameTiming, RuntimeEvent, SpaceId, SwapchainId, XrRuntime};
pub use session::{PoseSample, SessionSpaces, XrSession};
pub use simulated::SimulatedRuntime;
pub use state::{SessionState, SessionStateMachine};
pub use swapchain::{EyeSwapchain, SwapchainCoordinator, SwapchainDesc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of views in a primary stereo configuration.
pub const EYE_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const fn both() -> [Eye; EYE_COUNT] {
        [Eye::Left, Eye::Right]
    }

    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Eye> {
        match index {
            0 => Some(Eye::Left),
            1 => Some(Eye::Right),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posef {
    /// Quaternion as `[x, y, z, w]`.
    pub orientation: [f32; 4],
    pub position: [f32; 3],
}

impl Posef {
    pub const IDENTITY: Posef = Posef {
        orientation: [0.0, 0.0, 0.0, 1.0],
        position: [0.0, 0.0, 0.0],
    };

    pub fn from_position(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }
}

impl Default for Posef {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Field of view as four half-angles in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fovf {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fovf {
    pub fn symmetric(horizontal: f32, vertical: f32) -> Self {
        Self {
            angle_left: -horizontal,
            angle_right: horizontal,
            angle_up: vertical,
            angle_down: -vertical,
        }
    }
}

impl Default for Fovf {
    fn default() -> Self {
        Self::symmetric(std::f32::consts::FRAC_PI_4, std::f32::consts::FRAC_PI_4)
    }
}

/// Located pose and field of view for one eye at a predicted display time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EyeView {
    pub pose: Posef,
    pub fov: Fovf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect2D {
    pub offset: [i32; 2],
    pub extent: [i32; 2],
}

impl Rect2D {
    pub fn covering(extent: Extent2D) -> Self {
        Self {
            offset: [0, 0],
            extent: [extent.width as i32, extent.height as i32],
        }
    }
}

/// Region of a swapchain image a composition view samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubImage {
    pub swapchain: SwapchainId,
    pub image_rect: Rect2D,
    pub image_array_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositionLayerView {
    pub pose: Posef,
    pub fov: Fovf,
    pub sub_image: SubImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Opaque,
    Additive,
    AlphaBlend,
}

/// Everything handed to the runtime's end-of-frame call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionSubmission {
    pub display_time: i64,
    pub blend_mode: BlendMode,
    pub space: SpaceId,
    /// Either empty (nothing rendered) or one view per eye.
    pub views: Vec<CompositionLayerView>,
}

impl CompositionSubmission {
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum VrError {
    #[error("{call} failed: {message}")]
    Runtime { call: &'static str, message: String },
    #[error("session loss pending")]
    LossPending,
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),
    #[error("session is not running (state {0:?})")]
    NotRunning(SessionState),
    #[error("frame queue is empty")]
    QueueEmpty,
    #[error("no frame in flight to receive eye {0:?}")]
    NoFrameInFlight(Eye),
    #[error("frame {sequence} is missing the composition view for the {eye:?} eye")]
    IncompleteFrame { sequence: u64, eye: Eye },
    #[error("eye swapchain limit reached ({0} already created)")]
    EyeLimit(usize),
    #[error("no swapchain created for the {0:?} eye")]
    MissingSwapchain(Eye),
    #[error("none of the preferred swapchain formats {preferred:?} are supported")]
    UnsupportedFormat { preferred: Vec<i64> },
    #[error("out of order call: {0}")]
    CallOrder(&'static str),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("a session is already active on this platform")]
    SessionActive,
    #[error("session has been destroyed")]
    SessionDestroyed,
    #[error("session {0} is not owned by this platform")]
    UnknownSession(u64),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl VrError {
    pub fn runtime(call: &'static str, message: impl Into<String>) -> Self {
        VrError::Runtime {
            call,
            message: message.into(),
        }
    }

    pub fn is_loss(&self) -> bool {
        matches!(self, VrError::LossPending)
    }
}

pub type VrResult<T> = Result<T, VrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_index_round_trips_for_both_eyes() {
        for eye in Eye::both() {
            assert_eq!(Eye::from_index(eye.index()), Some(eye));
        }
        assert_eq!(Eye::from_index(2), None);
    }

    #[test]
    fn covering_rect_matches_extent() {
        let rect = Rect2D::covering(Extent2D::new(1440, 1600));
        assert_eq!(rect.offset, [0, 0]);
        assert_eq!(rect.extent, [1440, 1600]);
    }

    #[test]
    fn runtime_error_carries_diagnostic() {
        let err = VrError::runtime("xrWaitFrame", "XR_ERROR_RUNTIME_FAILURE");
        assert!(err.to_string().contains("xrWaitFrame"));
        assert!(err.to_string().contains("XR_ERROR_RUNTIME_FAILURE"));
        assert!(!err.is_loss());
        assert!(VrError::LossPending.is_loss());
    }
}
