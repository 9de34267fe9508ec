//! Display targets.
//!
//! A [`DisplayTarget`] hands out the image a frame is presented to. It is
//! the swapchain's seat in the frame loop: the window-backed implementation
//! lives with the windowing layer, [`OffscreenTarget`] is used headless.

use std::sync::Arc;

use crate::backend::{GpuBackend, GpuImage};
use crate::error::{DenoiserError, DenoiserResult};
use crate::sync::{Semaphore, SemaphoreReference};
use crate::types::{Extent2d, ImageHandle, PipelineStages};

/// Source of display images.
pub trait DisplayTarget {
    fn extent(&self) -> Extent2d;

    /// Acquire the next image. The target must arrange for `image_ready`
    /// to be signaled once the image may be written.
    fn acquire_next_image(&mut self, image_ready: &Arc<Semaphore>) -> DenoiserResult<ImageHandle>;

    /// Present `image` once `render_finished` is signaled. The target must
    /// consume the signal.
    fn present(&mut self, image: &ImageHandle, render_finished: &Arc<Semaphore>) -> DenoiserResult<()>;

    /// Recreate images for a new extent. The device is idle when this is called.
    fn resize(&mut self, extent: Extent2d) -> DenoiserResult<()>;
}

/// Headless display target cycling through a fixed set of images.
///
/// Acquisition and presentation are empty queue submissions, so the
/// semaphore protocol is identical to a swapchain's.
pub struct OffscreenTarget {
    backend: Arc<dyn GpuBackend>,
    images: Vec<ImageHandle>,
    next: usize,
    extent: Extent2d,
    presented: u64,
}

impl OffscreenTarget {
    /// Use caller-owned images. They must all have the same extent.
    pub fn new(backend: Arc<dyn GpuBackend>, images: Vec<ImageHandle>) -> DenoiserResult<Self> {
        let extent = images
            .first()
            .map(ImageHandle::extent)
            .ok_or_else(|| DenoiserError::InvalidConfiguration("offscreen target needs images".into()))?;

        if images.iter().any(|image| image.extent() != extent) {
            return Err(DenoiserError::InvalidConfiguration(
                "offscreen images differ in extent".into(),
            ));
        }

        Ok(Self {
            backend,
            images,
            next: 0,
            extent,
            presented: 0,
        })
    }

    /// Create `count` dummy images named `display[i]`.
    pub fn dummy(backend: Arc<dyn GpuBackend>, count: usize, extent: Extent2d) -> DenoiserResult<Self> {
        Self::new(backend, dummy_images(count, extent))
    }

    /// Number of frames presented so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn images(&self) -> &[ImageHandle] {
        &self.images
    }
}

fn dummy_images(count: usize, extent: Extent2d) -> Vec<ImageHandle> {
    (0..count)
        .map(|i| ImageHandle::dummy(format!("display[{i}]"), extent))
        .collect()
}

impl DisplayTarget for OffscreenTarget {
    fn extent(&self) -> Extent2d {
        self.extent
    }

    fn acquire_next_image(&mut self, image_ready: &Arc<Semaphore>) -> DenoiserResult<ImageHandle> {
        let image = self.images[self.next].clone();
        self.next = (self.next + 1) % self.images.len();
        self.backend.signal_semaphores(&[SemaphoreReference::binary(
            Arc::clone(image_ready),
            PipelineStages::ALL_COMMANDS,
        )])?;
        Ok(image)
    }

    fn present(&mut self, image: &ImageHandle, render_finished: &Arc<Semaphore>) -> DenoiserResult<()> {
        self.backend.wait_semaphores(&[SemaphoreReference::binary(
            Arc::clone(render_finished),
            PipelineStages::BOTTOM_OF_PIPE,
        )])?;
        self.presented += 1;
        log::trace!("Presented '{}' ({} total)", image.name(), self.presented);
        Ok(())
    }

    fn resize(&mut self, extent: Extent2d) -> DenoiserResult<()> {
        if !self
            .images
            .iter()
            .all(|image| matches!(image.raw(), GpuImage::Dummy))
        {
            return Err(DenoiserError::InvalidConfiguration(
                "offscreen target with external images cannot resize itself".into(),
            ));
        }
        self.images = dummy_images(self.images.len(), extent);
        self.next = 0;
        self.extent = extent;
        Ok(())
    }
}

impl std::fmt::Debug for OffscreenTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffscreenTarget")
            .field("images", &self.images.len())
            .field("extent", &self.extent)
            .field("presented", &self.presented)
            .finish_non_exhaustive()
    }
}
