use crate::vr::pacer::FrameSlots;
use crate::vr::runtime::{SwapchainCreateInfo, ViewConfigurationView};
use crate::vr::{
    CompositionLayerView, Eye, Extent2D, Rect2D, SubImage, SwapchainId, VrError, VrResult,
    XrRuntime, EYE_COUNT,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Overrides for a single eye swapchain. Unset fields fall back to the
/// runtime's recommendation for the claimed eye.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub extent: Option<Extent2D>,
    pub sample_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeldImage {
    index: u32,
    ready: bool,
}

#[derive(Debug, Clone)]
pub struct EyeSwapchain {
    eye: Eye,
    id: SwapchainId,
    format: i64,
    extent: Extent2D,
    sample_count: u32,
    image_count: u32,
    held: Option<HeldImage>,
}

impl EyeSwapchain {
    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn id(&self) -> SwapchainId {
        self.id
    }

    pub fn format(&self) -> i64 {
        self.format
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Index of the image currently acquired and ready for rendering.
    pub fn held_image(&self) -> Option<u32> {
        self.held.filter(|held| held.ready).map(|held| held.index)
    }
}

pub struct SwapchainSettings {
    pub preferred_formats: Vec<i64>,
    pub recommended: Vec<ViewConfigurationView>,
    pub wait_timeout: Duration,
}

/// Owns up to two eye swapchains and ties acquired images to the frame
/// currently being rendered.
pub struct SwapchainCoordinator {
    runtime: Arc<dyn XrRuntime>,
    frames: Arc<dyn FrameSlots>,
    eyes: [Mutex<Option<EyeSwapchain>>; EYE_COUNT],
    settings: SwapchainSettings,
}

impl SwapchainCoordinator {
    pub fn new(
        runtime: Arc<dyn XrRuntime>,
        frames: Arc<dyn FrameSlots>,
        settings: SwapchainSettings,
    ) -> Self {
        Self {
            runtime,
            frames,
            eyes: [Mutex::new(None), Mutex::new(None)],
            settings,
        }
    }

    fn slot(&self, eye: Eye) -> MutexGuard<'_, Option<EyeSwapchain>> {
        self.eyes[eye.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the next eye's swapchain. The eye is taken from the pacer's
    /// cursor, so the first creation after a reset is always the left eye.
    pub fn create(&self, desc: SwapchainDesc) -> VrResult<Eye> {
        let available = self.runtime.enumerate_swapchain_formats()?;
        let format = select_format(&self.settings.preferred_formats, &available)?;
        let eye = self.frames.claim_eye()?;

        let recommended = self.settings.recommended.get(eye.index()).copied();
        let extent = desc
            .extent
            .or(recommended.map(|view| view.recommended_extent))
            .unwrap_or_else(|| Extent2D::new(1, 1));
        let sample_count = desc
            .sample_count
            .or(recommended.map(|view| view.recommended_sample_count))
            .unwrap_or(1)
            .max(1);

        let created = self.runtime.create_swapchain(&SwapchainCreateInfo {
            format,
            extent,
            sample_count,
            array_size: 1,
        });
        let (id, image_count) = match created {
            Ok(created) => created,
            Err(err) => {
                self.frames.release_eye(eye);
                log::error!("[swapchain] {} eye swapchain creation failed: {err}", eye.label());
                return Err(err);
            }
        };

        let mut slot = self.slot(eye);
        if let Some(previous) = slot.take() {
            if let Err(err) = self.runtime.destroy_swapchain(previous.id) {
                log::warn!(
                    "[swapchain] failed to destroy replaced {} eye swapchain: {err}",
                    eye.label()
                );
            }
        }
        *slot = Some(EyeSwapchain {
            eye,
            id,
            format,
            extent,
            sample_count,
            image_count,
            held: None,
        });

        log::info!(
            "[swapchain] {} eye swapchain created ({}x{}, format {format}, {sample_count}x msaa, {image_count} images)",
            eye.label(),
            extent.width,
            extent.height
        );
        Ok(eye)
    }

    /// Acquires and waits for the next image of `eye`, then records the
    /// eye's composition view in the newest in-flight frame.
    pub fn acquire(&self, eye: Eye) -> VrResult<u32> {
        let mut slot = self.slot(eye);
        let swapchain = slot.as_mut().ok_or(VrError::MissingSwapchain(eye))?;

        let index = match swapchain.held {
            Some(HeldImage { ready: true, .. }) => {
                return Err(VrError::CallOrder("acquire while an image is still held"));
            }
            // A previous wait timed out: the image is ours, only the wait is retried.
            Some(HeldImage { index, ready: false }) => index,
            None => {
                let index = self.runtime.acquire_image(swapchain.id)?;
                swapchain.held = Some(HeldImage {
                    index,
                    ready: false,
                });
                index
            }
        };

        self.runtime
            .wait_image(swapchain.id, self.settings.wait_timeout)?;
        swapchain.held = Some(HeldImage { index, ready: true });

        let id = swapchain.id;
        let extent = swapchain.extent;
        let filled = self.frames.fill_current(eye, &mut |view| CompositionLayerView {
            pose: view.pose,
            fov: view.fov,
            sub_image: SubImage {
                swapchain: id,
                image_rect: Rect2D::covering(extent),
                image_array_index: 0,
            },
        });

        match filled {
            Some(sequence) => {
                log::trace!(
                    "[swapchain] {} eye image {index} bound to frame {sequence}",
                    eye.label()
                );
                Ok(index)
            }
            None => {
                self.runtime.release_image(id)?;
                swapchain.held = None;
                Err(VrError::NoFrameInFlight(eye))
            }
        }
    }

    /// Hands the acquired image back to the runtime.
    pub fn present(&self, eye: Eye) -> VrResult<()> {
        let mut slot = self.slot(eye);
        let swapchain = slot.as_mut().ok_or(VrError::MissingSwapchain(eye))?;
        if swapchain.held_image().is_none() {
            return Err(VrError::CallOrder("present without an acquired image"));
        }

        self.runtime.release_image(swapchain.id)?;
        swapchain.held = None;
        Ok(())
    }

    pub fn swapchain(&self, eye: Eye) -> Option<EyeSwapchain> {
        self.slot(eye).clone()
    }

    pub fn extent(&self, eye: Eye) -> Option<Extent2D> {
        self.slot(eye).as_ref().map(EyeSwapchain::extent)
    }

    pub fn created_count(&self) -> usize {
        Eye::both()
            .into_iter()
            .filter(|eye| self.slot(*eye).is_some())
            .count()
    }

    pub fn destroy_all(&self) {
        for eye in Eye::both() {
            if let Some(swapchain) = self.slot(eye).take() {
                if let Err(err) = self.runtime.destroy_swapchain(swapchain.id) {
                    log::warn!(
                        "[swapchain] failed to destroy {} eye swapchain: {err}",
                        eye.label()
                    );
                }
            }
        }
    }
}

fn select_format(preferred: &[i64], available: &[i64]) -> VrResult<i64> {
    preferred
        .iter()
        .copied()
        .find(|format| available.contains(format))
        .ok_or_else(|| VrError::UnsupportedFormat {
            preferred: preferred.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::pacer::{FramePacer, LimbPoses};
    use crate::vr::simulated::{SimCall, SimFailure, SimulatedRuntime};
    use crate::vr::{EyeView, FrameTiming};

    const SRGB: i64 = 50;

    fn coordinator() -> (Arc<SimulatedRuntime>, Arc<FramePacer>, SwapchainCoordinator) {
        let runtime = Arc::new(SimulatedRuntime::new());
        let pacer = Arc::new(FramePacer::new());
        let recommended = runtime.view_configuration_views().expect("views");
        let coordinator = SwapchainCoordinator::new(
            runtime.clone(),
            pacer.clone(),
            SwapchainSettings {
                preferred_formats: vec![SRGB],
                recommended,
                wait_timeout: Duration::from_millis(5),
            },
        );
        (runtime, pacer, coordinator)
    }

    fn begin(pacer: &FramePacer) -> u64 {
        pacer
            .enqueue(
                FrameTiming {
                    predicted_display_time: 1,
                    predicted_display_period: 1,
                    should_render: true,
                },
                [EyeView::default(); EYE_COUNT],
                None,
                LimbPoses::default(),
            )
            .sequence
    }

    #[test]
    fn format_selection_follows_preference_order() {
        assert_eq!(select_format(&[43, 50], &[50, 43]).expect("format"), 43);
        assert!(matches!(
            select_format(&[7], &[50]),
            Err(VrError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn creation_assigns_left_then_right_then_fails() {
        let (_runtime, _pacer, coordinator) = coordinator();
        assert_eq!(coordinator.create(SwapchainDesc::default()).expect("left"), Eye::Left);
        assert_eq!(coordinator.create(SwapchainDesc::default()).expect("right"), Eye::Right);
        assert!(matches!(
            coordinator.create(SwapchainDesc::default()),
            Err(VrError::EyeLimit(2))
        ));
        assert_eq!(coordinator.created_count(), 2);
    }

    #[test]
    fn desc_overrides_recommended_extent() {
        let (_runtime, _pacer, coordinator) = coordinator();
        let eye = coordinator
            .create(SwapchainDesc {
                extent: Some(Extent2D::new(640, 480)),
                sample_count: Some(4),
            })
            .expect("swapchain");
        let swapchain = coordinator.swapchain(eye).expect("created");
        assert_eq!(swapchain.extent(), Extent2D::new(640, 480));
        assert_eq!(swapchain.sample_count(), 4);
        assert_eq!(swapchain.format(), SRGB);
    }

    #[test]
    fn acquire_writes_into_newest_frame() {
        let (_runtime, pacer, coordinator) = coordinator();
        coordinator.create(SwapchainDesc::default()).expect("left");
        let older = begin(&pacer);
        let newer = begin(&pacer);

        coordinator.acquire(Eye::Left).expect("acquire");
        coordinator.present(Eye::Left).expect("present");

        let first = pacer.retire_oldest().expect("older");
        assert_eq!(first.sequence, older);
        assert!(first.layer_views[0].is_none());
        let second = pacer.retire_oldest().expect("newer");
        assert_eq!(second.sequence, newer);
        let view = second.layer_views[0].expect("left view written");
        assert_eq!(view.sub_image.image_rect.extent, [1440, 1600]);
    }

    #[test]
    fn acquire_without_frame_releases_image() {
        let (runtime, _pacer, coordinator) = coordinator();
        coordinator.create(SwapchainDesc::default()).expect("left");
        assert!(matches!(
            coordinator.acquire(Eye::Left),
            Err(VrError::NoFrameInFlight(Eye::Left))
        ));
        let swapchain = coordinator.swapchain(Eye::Left).expect("created");
        assert_eq!(swapchain.held_image(), None);
        assert_eq!(runtime.held_images(swapchain.id()), 0);
    }

    #[test]
    fn present_requires_acquired_image() {
        let (_runtime, pacer, coordinator) = coordinator();
        coordinator.create(SwapchainDesc::default()).expect("left");
        assert!(matches!(
            coordinator.present(Eye::Left),
            Err(VrError::CallOrder(_))
        ));
        assert!(matches!(
            coordinator.present(Eye::Right),
            Err(VrError::MissingSwapchain(Eye::Right))
        ));

        begin(&pacer);
        coordinator.acquire(Eye::Left).expect("acquire");
        assert!(matches!(
            coordinator.acquire(Eye::Left),
            Err(VrError::CallOrder(_))
        ));
        coordinator.present(Eye::Left).expect("present");
    }

    #[test]
    fn timed_out_wait_is_retried_on_next_acquire() {
        let (runtime, pacer, coordinator) = coordinator();
        coordinator.create(SwapchainDesc::default()).expect("left");
        begin(&pacer);

        runtime.fail_next_image_wait();
        assert!(matches!(
            coordinator.acquire(Eye::Left),
            Err(VrError::Timeout(_))
        ));
        let id = coordinator.swapchain(Eye::Left).expect("created").id();
        assert_eq!(runtime.held_images(id), 1);

        coordinator.acquire(Eye::Left).expect("retry wait");
        assert_eq!(runtime.held_images(id), 1);
        coordinator.present(Eye::Left).expect("present");
        assert_eq!(runtime.held_images(id), 0);
    }

    #[test]
    fn recreating_after_reset_replaces_left_swapchain() {
        let (runtime, pacer, coordinator) = coordinator();
        coordinator.create(SwapchainDesc::default()).expect("left");
        let first = coordinator.swapchain(Eye::Left).expect("created").id();

        pacer.reset();
        assert_eq!(coordinator.create(SwapchainDesc::default()).expect("left again"), Eye::Left);
        let second = coordinator.swapchain(Eye::Left).expect("recreated").id();
        assert_ne!(first, second);
        assert!(!runtime.has_swapchain(first));
    }

    #[test]
    fn failed_creation_keeps_the_eye_for_the_next_attempt() {
        let (runtime, pacer, coordinator) = coordinator();
        runtime.fail_next(
            SimCall::CreateSwapchain,
            SimFailure::Runtime("XR_ERROR_OUT_OF_MEMORY"),
        );
        assert!(coordinator.create(SwapchainDesc::default()).is_err());
        assert_eq!(pacer.eye_cursor(), 0);
        assert!(coordinator.swapchain(Eye::Left).is_none());

        assert_eq!(coordinator.create(SwapchainDesc::default()).expect("left"), Eye::Left);
        assert_eq!(coordinator.create(SwapchainDesc::default()).expect("right"), Eye::Right);
        assert_eq!(runtime.live_swapchains(), 2);
    }
}
