use crate::vr::input::{self, ActionBinding, OCULUS_TOUCH_PROFILE};
use crate::vr::runtime::ReferenceSpace;
use crate::vr::{BlendMode, Extent2D};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// VK_FORMAT_B8G8R8A8_SRGB
pub const FORMAT_B8G8R8A8_SRGB: i64 = 50;
/// VK_FORMAT_R8G8B8A8_SRGB
pub const FORMAT_R8G8B8A8_SRGB: i64 = 43;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewConfiguration {
    #[default]
    PrimaryStereo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub application_name: String,
    pub engine_name: String,
    pub view_configuration: ViewConfiguration,
    pub blend_mode: BlendMode,
    pub base_space: ReferenceSpace,
    /// Color formats in order of preference.
    pub swapchain_formats: Vec<i64>,
    pub sample_count: u32,
    pub eye_extent: Option<Extent2D>,
    pub image_wait_timeout_ms: u64,
    pub interaction_profile: String,
    /// Names from the default binding table to attach. Empty attaches all of them.
    pub actions: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            application_name: "xr_frame_pacer".to_string(),
            engine_name: "xr_frame_pacer".to_string(),
            view_configuration: ViewConfiguration::PrimaryStereo,
            blend_mode: BlendMode::Opaque,
            base_space: ReferenceSpace::Local,
            swapchain_formats: vec![FORMAT_B8G8R8A8_SRGB, FORMAT_R8G8B8A8_SRGB],
            sample_count: 1,
            eye_extent: None,
            image_wait_timeout_ms: 5,
            interaction_profile: OCULUS_TOUCH_PROFILE.to_string(),
            actions: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.swapchain_formats.is_empty() {
            return Err(ConfigError::Invalid(
                "swapchain_formats must list at least one format".into(),
            ));
        }
        if self.sample_count == 0 {
            return Err(ConfigError::Invalid("sample_count must be at least 1".into()));
        }
        if self.image_wait_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "image_wait_timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some(extent) = self.eye_extent {
            if extent.width == 0 || extent.height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "eye_extent {}x{} has a zero dimension",
                    extent.width, extent.height
                )));
            }
        }
        if let Some(unknown) = self.actions.iter().find(|name| input::binding(name).is_none()) {
            return Err(ConfigError::Invalid(format!("unknown action '{unknown}'")));
        }
        Ok(())
    }

    pub fn image_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.image_wait_timeout_ms)
    }

    /// The binding rows this config attaches, in table order.
    pub fn bindings(&self) -> Vec<ActionBinding> {
        input::DEFAULT_BINDINGS
            .iter()
            .filter(|binding| {
                self.actions.is_empty() || self.actions.iter().any(|name| name == binding.name)
            })
            .copied()
            .collect()
    }
}
