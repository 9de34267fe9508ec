//! GPU backend abstraction.
//!
//! The orchestrator only needs a narrow slice of a device: command buffers,
//! binary and timeline semaphores, fences, queue submission and a device-wide
//! wait. [`GpuBackend`] is that slice. Raw handles are enums with one variant
//! per backend, so the core never downcasts.
//!
//! Available backends:
//! - [`DummyBackend`]: no GPU. Executes every submission instantly, records a
//!   [`DeviceEvent`] log and validates the semaphore protocol. Used by tests
//!   and the headless demo.
//! - `VulkanBackend` (feature `vulkan-backend`): `vkQueueSubmit2` with
//!   timeline semaphores on a device created by the windowing layer.

mod dummy;
mod error;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};

use parking_lot::Mutex;

#[cfg(feature = "vulkan-backend")]
use ash::vk;

use crate::sync::{Semaphore, SemaphoreKind, SemaphoreReference};
use crate::types::ImageHandle;

pub use dummy::{DeviceEvent, DummyBackend, SemaphoreUse};
pub use error::{BackendError, BackendResult};

#[cfg(feature = "vulkan-backend")]
pub use vulkan::{VulkanBackend, VulkanDeviceInfo};

// ============================================================================
// Raw handles
// ============================================================================

/// GPU command buffer handle.
pub enum GpuCommandBuffer {
    /// Dummy command buffer that appends recorded commands to the device log.
    Dummy {
        label: String,
        recording: AtomicBool,
        log: Arc<Mutex<Vec<DeviceEvent>>>,
    },
    /// Vulkan command buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        pool: Arc<vulkan::CommandPool>,
        command_buffer: vk::CommandBuffer,
    },
}

impl std::fmt::Debug for GpuCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { label, .. } => f.debug_struct("Dummy").field("label", label).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { command_buffer, .. } => f
                .debug_struct("Vulkan")
                .field("command_buffer", command_buffer)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuCommandBuffer {
    fn drop(&mut self) {
        if let Self::Vulkan {
            pool,
            command_buffer,
        } = self
        {
            pool.free(*command_buffer);
        }
    }
}

impl GpuCommandBuffer {
    /// Record a debug label. Stages use this to mark their work.
    pub fn insert_label(&self, label: &str) -> BackendResult<()> {
        match self {
            Self::Dummy { .. } => self.push_dummy_command(label.to_string()),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => {
                log::trace!("VulkanBackend: label {}", label);
                Ok(())
            }
        }
    }

    /// Record a copy of `src` into `dst`, optionally flipping vertically.
    pub fn copy_image(
        &self,
        src: &ImageHandle,
        dst: &ImageHandle,
        flip_y: bool,
    ) -> BackendResult<()> {
        match self {
            Self::Dummy { .. } => {
                let flip = if flip_y { " (flip y)" } else { "" };
                self.push_dummy_command(format!("copy {} -> {}{}", src.name(), dst.name(), flip))
            }
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                pool,
                command_buffer,
            } => vulkan::record_copy_image(pool.device(), *command_buffer, src, dst, flip_y),
        }
    }

    /// Record the transition of a display image into its presentable state.
    pub fn prepare_present(&self, image: &ImageHandle) -> BackendResult<()> {
        match self {
            Self::Dummy { .. } => self.push_dummy_command(format!("prepare_present {}", image.name())),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                pool,
                command_buffer,
            } => vulkan::record_prepare_present(pool.device(), *command_buffer, image),
        }
    }

    fn push_dummy_command(&self, command: String) -> BackendResult<()> {
        match self {
            Self::Dummy {
                label,
                recording,
                log,
            } => {
                if !recording.load(std::sync::atomic::Ordering::Acquire) {
                    return Err(BackendError::Validation(format!(
                        "command '{command}' recorded into '{label}' outside begin/submit"
                    )));
                }
                log.lock().push(DeviceEvent::Command {
                    command_buffer: label.clone(),
                    command,
                });
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => Ok(()),
        }
    }
}

/// GPU semaphore handle.
pub enum GpuSemaphore {
    /// Dummy semaphore. Binary semaphores hold 0 or 1, timeline semaphores
    /// hold their counter.
    Dummy { value: AtomicU64 },
    /// Vulkan semaphore.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
    },
}

impl std::fmt::Debug for GpuSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { value } => f.debug_struct("Dummy").field("value", value).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => f
                .debug_struct("Vulkan")
                .field("semaphore", semaphore)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSemaphore {
    fn drop(&mut self) {
        if let Self::Vulkan { device, semaphore } = self {
            unsafe {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

/// GPU fence handle for CPU-GPU synchronization.
pub enum GpuFence {
    /// Dummy fence.
    Dummy { signaled: AtomicBool },
    /// Vulkan fence.
    #[cfg(feature = "vulkan-backend")]
    Vulkan { device: ash::Device, fence: vk::Fence },
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { signaled } => f.debug_struct("Dummy").field("signaled", signaled).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => f
                .debug_struct("Vulkan")
                .field("fence", fence)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let Self::Vulkan { device, fence } = self {
            unsafe {
                device.destroy_fence(*fence, None);
            }
        }
    }
}

/// GPU image handle. Not owned: the producer destroys the image.
#[derive(Clone)]
pub enum GpuImage {
    /// Dummy image.
    Dummy,
    /// Vulkan image.
    #[cfg(feature = "vulkan-backend")]
    Vulkan { image: vk::Image, format: vk::Format },
}

impl std::fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy => write!(f, "Dummy"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { image, format } => f
                .debug_struct("Vulkan")
                .field("image", image)
                .field("format", format)
                .finish(),
        }
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// One queue submission.
#[derive(Debug)]
pub struct SubmitBatch<'a> {
    pub command_buffer: &'a GpuCommandBuffer,
    /// Waited in order before the buffer executes.
    pub waits: &'a [SemaphoreReference],
    /// Signaled in order when the buffer completes.
    pub signals: &'a [SemaphoreReference],
    /// Signaled when the buffer completes.
    pub fence: Option<&'a GpuFence>,
}

/// Device operations used by the orchestrator.
///
/// Implementations must be usable from the render thread while an external
/// execution domain holds another reference (e.g. to host-signal the
/// timeline semaphore).
pub trait GpuBackend: Send + Sync + 'static {
    /// Human readable backend name.
    fn name(&self) -> &'static str;

    /// Allocate a command buffer.
    fn create_command_buffer(&self, label: &str) -> BackendResult<GpuCommandBuffer>;

    /// Create a semaphore. Timeline semaphores start at 0.
    fn create_semaphore(&self, label: &str, kind: SemaphoreKind) -> BackendResult<GpuSemaphore>;

    /// Create a fence, optionally in the signaled state.
    fn create_fence(&self, signaled: bool) -> BackendResult<GpuFence>;

    /// Reset `command_buffer` and start recording.
    fn begin_command_buffer(&self, command_buffer: &GpuCommandBuffer) -> BackendResult<()>;

    /// Discard whatever `command_buffer` recorded without submitting it.
    fn reset_command_buffer(&self, command_buffer: &GpuCommandBuffer) -> BackendResult<()>;

    /// Finish recording and submit to the queue.
    fn submit(&self, batch: &SubmitBatch<'_>) -> BackendResult<()>;

    /// Queue a signal operation with no command buffer.
    fn signal_semaphores(&self, signals: &[SemaphoreReference]) -> BackendResult<()>;

    /// Queue a wait operation with no command buffer.
    fn wait_semaphores(&self, waits: &[SemaphoreReference]) -> BackendResult<()>;

    /// Block until `fence` is signaled.
    fn wait_fence(&self, fence: &GpuFence) -> BackendResult<()>;

    /// Return `fence` to the unsignaled state.
    fn reset_fence(&self, fence: &GpuFence) -> BackendResult<()>;

    /// Check if `fence` is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: &GpuFence) -> bool;

    /// Block until the device has finished all submitted work.
    fn wait_idle(&self) -> BackendResult<()>;

    /// Current counter value of a timeline semaphore.
    fn timeline_value(&self, semaphore: &Semaphore) -> BackendResult<u64>;

    /// Signal a timeline semaphore from the host.
    fn signal_timeline(&self, semaphore: &Semaphore, value: u64) -> BackendResult<()>;

    /// Block the host until a timeline semaphore reaches `value`.
    fn wait_timeline(&self, semaphore: &Semaphore, value: u64) -> BackendResult<()>;
}
