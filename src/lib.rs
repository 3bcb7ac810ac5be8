pub mod config;
pub mod render;
pub mod vr;

pub use config::{ConfigError, SessionConfig};
pub use render::{EyeRenderer, NullEyeRenderer, RenderError, StereoRenderer};
pub use vr::{VrError, VrResult, XrPlatform, XrSession};
