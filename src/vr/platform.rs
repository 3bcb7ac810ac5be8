//! Per-platform session ownership.
//!
//! An [`XrPlatform`] wraps one runtime connection and hands out at most one
//! live [`XrSession`] at a time. The active session lives in the platform,
//! not in process-wide state, so independent platforms never interfere.

use crate::config::SessionConfig;
use crate::vr::runtime::{DeviceId, GraphicsRequirements, SystemProperties, ViewConfigurationView};
use crate::vr::{VrError, VrResult, XrRuntime, XrSession, EYE_COUNT};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct XrPlatform {
    runtime: Arc<dyn XrRuntime>,
    config: SessionConfig,
    system: SystemProperties,
    views: Vec<ViewConfigurationView>,
    requirements: GraphicsRequirements,
    active: Mutex<Option<Arc<XrSession>>>,
    next_session_id: AtomicU64,
}

impl XrPlatform {
    /// Validates `config` and reads what the runtime reports about the
    /// system: properties, per-view recommendations and graphics requirements.
    pub fn initialize(runtime: Arc<dyn XrRuntime>, config: SessionConfig) -> VrResult<Self> {
        config.validate()?;

        let system = runtime.system_properties()?;
        log::info!(
            "[platform] {} on {} (vendor {:#x}, max {}x{}, {} layers)",
            runtime.label(),
            system.system_name,
            system.vendor_id,
            system.max_swapchain_extent.width,
            system.max_swapchain_extent.height,
            system.max_layer_count
        );
        if !system.position_tracking {
            log::warn!("[platform] system reports no position tracking");
        }

        let views = runtime.view_configuration_views()?;
        if views.len() < EYE_COUNT {
            log::warn!(
                "[platform] primary stereo view configuration unsupported ({} view(s) reported)",
                views.len()
            );
        }
        for (index, view) in views.iter().enumerate() {
            log::debug!(
                "[platform] view {index}: recommended {}x{} x{} samples, max {}x{}",
                view.recommended_extent.width,
                view.recommended_extent.height,
                view.recommended_sample_count,
                view.max_extent.width,
                view.max_extent.height
            );
        }

        let requirements = runtime.graphics_requirements()?;
        log::debug!(
            "[platform] graphics api {}.{}..={}.{}, {} instance / {} device extension(s)",
            requirements.min_api_version.0,
            requirements.min_api_version.1,
            requirements.max_api_version.0,
            requirements.max_api_version.1,
            requirements.instance_extensions.len(),
            requirements.device_extensions.len()
        );

        Ok(Self {
            runtime,
            config,
            system,
            views,
            requirements,
            active: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
        })
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<Arc<XrSession>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn runtime(&self) -> &Arc<dyn XrRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn system(&self) -> &SystemProperties {
        &self.system
    }

    pub fn recommended_views(&self) -> &[ViewConfigurationView] {
        &self.views
    }

    pub fn required_instance_extensions(&self) -> &[String] {
        &self.requirements.instance_extensions
    }

    pub fn required_device_extensions(&self) -> &[String] {
        &self.requirements.device_extensions
    }

    /// Checks that the host renderer picked the device the runtime drives.
    pub fn verify_device(&self, host_device: DeviceId) -> VrResult<()> {
        let runtime_device = self.runtime.graphics_device()?;
        if runtime_device != host_device {
            log::error!(
                "[platform] runtime device {:#x} differs from host device {:#x}",
                runtime_device.0,
                host_device.0
            );
            return Err(VrError::ConfigurationMismatch(format!(
                "runtime requires device {:#x}, host selected {:#x}",
                runtime_device.0, host_device.0
            )));
        }
        Ok(())
    }

    pub fn create_session(&self) -> VrResult<Arc<XrSession>> {
        let mut active = self.active_slot();
        if let Some(existing) = active.as_ref() {
            log::warn!("[platform] session {} is still active", existing.id());
            return Err(VrError::SessionActive);
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(XrSession::new(
            id,
            Arc::clone(&self.runtime),
            self.config.clone(),
            self.views.clone(),
        )?);
        *active = Some(Arc::clone(&session));
        log::info!("[platform] session {id} created");
        Ok(session)
    }

    /// Blocks until the session's frame queue is empty, then releases it.
    ///
    /// The session stays reachable from [`poll_events`](Self::poll_events)
    /// while it drains so late state changes still arrive.
    pub fn destroy_session(&self, session: Arc<XrSession>) -> VrResult<()> {
        let owned = self
            .active_slot()
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, &session));
        if !owned {
            return Err(VrError::UnknownSession(session.id()));
        }

        session.teardown();

        let mut active = self.active_slot();
        if active
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, &session))
        {
            *active = None;
        }
        Ok(())
    }

    pub fn active_session(&self) -> Option<Arc<XrSession>> {
        self.active_slot().clone()
    }

    /// Delivers every queued runtime event. Returns how many were handled.
    ///
    /// Side-effect failures are logged by the session and do not stop the
    /// pump; only a failure to read the event queue is returned.
    pub fn poll_events(&self) -> VrResult<usize> {
        let mut handled = 0;
        while let Some(event) = self.runtime.poll_event()? {
            handled += 1;
            match self.active_session() {
                Some(session) => {
                    // The session already logged the failure at the right level.
                    if let Err(err) = session.handle_event(event) {
                        log::debug!("[platform] event pump continuing after: {err}");
                    }
                }
                None => log::debug!("[platform] dropping {event:?}: no active session"),
            }
        }
        Ok(handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::simulated::SimulatedRuntime;
    use crate::vr::SessionState;

    fn platform() -> (Arc<SimulatedRuntime>, XrPlatform) {
        let runtime = Arc::new(SimulatedRuntime::new());
        let platform =
            XrPlatform::initialize(runtime.clone(), SessionConfig::default()).expect("platform");
        (runtime, platform)
    }

    #[test]
    fn initialize_rejects_invalid_config() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let config = SessionConfig {
            swapchain_formats: Vec::new(),
            ..SessionConfig::default()
        };
        assert!(matches!(
            XrPlatform::initialize(runtime, config),
            Err(VrError::Config(_))
        ));
    }

    #[test]
    fn device_mismatch_is_fatal() {
        let (runtime, platform) = platform();
        runtime.set_device(DeviceId(7));
        platform.verify_device(DeviceId(7)).expect("same device");
        assert!(matches!(
            platform.verify_device(DeviceId(8)),
            Err(VrError::ConfigurationMismatch(_))
        ));
    }

    #[test]
    fn extension_requirements_are_exposed() {
        let (_runtime, platform) = platform();
        assert!(
            platform
                .required_device_extensions()
                .iter()
                .any(|ext| ext == "VK_KHR_external_memory")
        );
        assert!(!platform.required_instance_extensions().is_empty());
    }

    #[test]
    fn one_session_per_platform() {
        let (_runtime, platform) = platform();
        let session = platform.create_session().expect("first session");
        assert!(matches!(platform.create_session(), Err(VrError::SessionActive)));

        platform.destroy_session(session).expect("destroy");
        assert!(platform.active_session().is_none());
        platform.create_session().expect("second session");
    }

    #[test]
    fn platforms_do_not_share_sessions() {
        let (_first_runtime, first) = platform();
        let (_second_runtime, second) = platform();
        let session = first.create_session().expect("first");
        second.create_session().expect("second platform is independent");
        assert!(matches!(
            second.destroy_session(session),
            Err(VrError::UnknownSession(_))
        ));
    }

    #[test]
    fn poll_events_drives_session_state() {
        let (runtime, platform) = platform();
        let session = platform.create_session().expect("session");
        runtime.push_state(SessionState::Idle);
        runtime.push_state(SessionState::Ready);
        runtime.push_state(SessionState::Focused);

        assert_eq!(platform.poll_events().expect("poll"), 3);
        assert_eq!(session.state(), SessionState::Focused);
        assert!(runtime.is_session_running());
        assert_eq!(platform.poll_events().expect("empty poll"), 0);
    }
}
