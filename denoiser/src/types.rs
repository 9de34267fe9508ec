//! Plain data types shared by stages, slots and the orchestrator.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::backend::GpuImage;

/// Size of an image or of the display area in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero (e.g. a minimized window).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Extent2d {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl fmt::Display for Extent2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

bitflags! {
    /// Pipeline stages at which a semaphore wait blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const VERTEX_SHADER = 1 << 1;
        const FRAGMENT_SHADER = 1 << 2;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 3;
        const COMPUTE_SHADER = 1 << 4;
        const TRANSFER = 1 << 5;
        const RAY_TRACING_SHADER = 1 << 6;
        const BOTTOM_OF_PIPE = 1 << 7;
        const ALL_COMMANDS = 1 << 8;
    }
}

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// An image produced by a stage or by the display target.
pub struct Image {
    id: u64,
    name: String,
    extent: Extent2d,
    raw: GpuImage,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

/// Shared reference to an [`Image`].
///
/// Cloning is cheap. Holders of a handle never destroy the image: the
/// producing stage owns its lifetime. Equality is identity.
#[derive(Debug, Clone)]
pub struct ImageHandle(Arc<Image>);

impl ImageHandle {
    pub fn new(name: impl Into<String>, extent: Extent2d, raw: GpuImage) -> Self {
        Self(Arc::new(Image {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            extent,
            raw,
        }))
    }

    /// Create an image without backing memory, for the dummy backend.
    pub fn dummy(name: impl Into<String>, extent: Extent2d) -> Self {
        Self::new(name, extent, GpuImage::Dummy)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn extent(&self) -> Extent2d {
        self.0.extent
    }

    pub fn raw(&self) -> &GpuImage {
        &self.0.raw
    }
}

impl PartialEq for ImageHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ImageHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_handle_identity() {
        let a = ImageHandle::dummy("Denoised Image", Extent2d::new(4, 4));
        let b = ImageHandle::dummy("Denoised Image", Extent2d::new(4, 4));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_extent_empty() {
        assert!(Extent2d::new(0, 720).is_empty());
        assert!(!Extent2d::default().is_empty());
        assert_eq!(Extent2d::new(640, 480).to_string(), "640x480");
    }
}
