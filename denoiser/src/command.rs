//! Command buffers of an in-flight frame.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{BackendResult, GpuBackend, GpuCommandBuffer, GpuFence, SubmitBatch};
use crate::sync::SemaphoreReference;
use crate::types::ImageHandle;

/// Which buffer of a frame a [`CommandBuffer`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferRole {
    /// Submitted last every frame, presents the display image.
    Primary,
    /// Submitted before the primary buffer when an external stage is active.
    Auxiliary(usize),
}

/// A command buffer together with the semaphores its submission waits on
/// and signals.
///
/// The wait and signal lists are wired once per processing stage swap and
/// only their timeline values change per frame.
pub struct CommandBuffer {
    label: String,
    role: CommandBufferRole,
    raw: GpuCommandBuffer,
    wait_semaphores: Vec<SemaphoreReference>,
    signal_semaphores: Vec<SemaphoreReference>,
    recording: AtomicBool,
}

impl CommandBuffer {
    /// Allocate a command buffer on `backend`.
    pub fn new(
        backend: &dyn GpuBackend,
        label: impl Into<String>,
        role: CommandBufferRole,
    ) -> BackendResult<Self> {
        let label = label.into();
        let raw = backend.create_command_buffer(&label)?;
        Ok(Self {
            label,
            role,
            raw,
            wait_semaphores: Vec::new(),
            signal_semaphores: Vec::new(),
            recording: AtomicBool::new(false),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> CommandBufferRole {
        self.role
    }

    pub fn raw(&self) -> &GpuCommandBuffer {
        &self.raw
    }

    pub fn wait_semaphores(&self) -> &[SemaphoreReference] {
        &self.wait_semaphores
    }

    pub fn signal_semaphores(&self) -> &[SemaphoreReference] {
        &self.signal_semaphores
    }

    pub fn wait_semaphores_mut(&mut self) -> &mut Vec<SemaphoreReference> {
        &mut self.wait_semaphores
    }

    pub fn signal_semaphores_mut(&mut self) -> &mut Vec<SemaphoreReference> {
        &mut self.signal_semaphores
    }

    pub fn set_wait_semaphores(&mut self, waits: Vec<SemaphoreReference>) {
        self.wait_semaphores = waits;
    }

    pub fn set_signal_semaphores(&mut self, signals: Vec<SemaphoreReference>) {
        self.signal_semaphores = signals;
    }

    /// Whether the buffer was begun and not yet submitted or reset.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Start recording.
    pub fn begin(&self, backend: &dyn GpuBackend) -> BackendResult<()> {
        backend.begin_command_buffer(&self.raw)?;
        self.recording.store(true, Ordering::Release);
        Ok(())
    }

    /// Finish recording and submit with the wired semaphores.
    pub fn submit(&self, backend: &dyn GpuBackend, fence: Option<&GpuFence>) -> BackendResult<()> {
        backend.submit(&SubmitBatch {
            command_buffer: &self.raw,
            waits: &self.wait_semaphores,
            signals: &self.signal_semaphores,
            fence,
        })?;
        self.recording.store(false, Ordering::Release);
        Ok(())
    }

    /// Drop the commands recorded since [`Self::begin`].
    ///
    /// A buffer that is not recording may still be executing and is left alone.
    pub fn reset(&self, backend: &dyn GpuBackend) -> BackendResult<()> {
        if self.recording.swap(false, Ordering::AcqRel) {
            backend.reset_command_buffer(&self.raw)?;
        }
        Ok(())
    }

    /// Record a debug label.
    pub fn insert_label(&self, label: &str) -> BackendResult<()> {
        self.raw.insert_label(label)
    }

    /// Record an image copy.
    pub fn copy_image(&self, src: &ImageHandle, dst: &ImageHandle, flip_y: bool) -> BackendResult<()> {
        self.raw.copy_image(src, dst, flip_y)
    }

    /// Record the transition of `image` for presentation.
    pub fn prepare_present(&self, image: &ImageHandle) -> BackendResult<()> {
        self.raw.prepare_present(image)
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("label", &self.label)
            .field("role", &self.role)
            .field("waits", &self.wait_semaphores.len())
            .field("signals", &self.signal_semaphores.len())
            .field("recording", &self.is_recording())
            .finish_non_exhaustive()
    }
}
