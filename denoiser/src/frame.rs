//! Pool of in-flight frames.
//!
//! [`FramePool`] owns N [`InFlightFrame`]s and hands them out round-robin,
//! so the CPU can record frame N+1 while the GPU still executes frame N.
//!
//! ```text
//! frames_in_flight = 2
//!
//! Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
//! Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! ```
//!
//! Each slot holds a primary command buffer, a fixed number of auxiliary
//! command buffers, its binary semaphores and a fence. A slot is only
//! reused after its fence has signaled, which is also the moment the
//! previous occupant's frame number is reported as complete.
//!
//! # Synchronization Model
//!
//! | Level | Primitive | Purpose |
//! |-------|-----------|---------|
//! | Aux → external domain → primary | Timeline semaphore | Cross-domain handoff within a frame |
//! | Acquire → primary → present | Binary semaphores | Display image ownership |
//! | Frame → Frame | Fences | CPU-GPU sync across frames |
//!
//! # Choosing Frames in Flight
//!
//! | Count | Behavior |
//! |-------|----------|
//! | 1 | CPU waits for GPU every frame. Simple but slow. |
//! | 2 | Good balance. CPU can work on N+1 while GPU renders N. |
//! | 3 | More overlap, higher latency. |

use std::sync::Arc;

use crate::backend::{BackendResult, GpuBackend, GpuFence};
use crate::command::{CommandBuffer, CommandBufferRole};
use crate::sync::{Semaphore, SemaphoreKind};

/// Per-slot resources of one frame in flight.
#[derive(Debug)]
pub struct InFlightFrame {
    index: usize,
    primary: CommandBuffer,
    auxiliary: Vec<CommandBuffer>,
    image_ready: Arc<Semaphore>,
    render_finished: Arc<Semaphore>,
    fence: GpuFence,
    frame_number: Option<u64>,
    /// True while a submission signaling `fence` is outstanding.
    /// When false the fence is unsignaled.
    submitted: bool,
}

impl InFlightFrame {
    fn new(backend: &dyn GpuBackend, index: usize, auxiliary_count: usize) -> BackendResult<Self> {
        let primary = CommandBuffer::new(backend, format!("primary[{index}]"), CommandBufferRole::Primary)?;
        let auxiliary = (0..auxiliary_count)
            .map(|k| {
                CommandBuffer::new(
                    backend,
                    format!("aux{k}[{index}]"),
                    CommandBufferRole::Auxiliary(k),
                )
            })
            .collect::<BackendResult<Vec<_>>>()?;

        Ok(Self {
            index,
            primary,
            auxiliary,
            image_ready: Semaphore::new(backend, format!("image_ready[{index}]"), SemaphoreKind::Binary)?,
            render_finished: Semaphore::new(
                backend,
                format!("render_finished[{index}]"),
                SemaphoreKind::Binary,
            )?,
            fence: backend.create_fence(false)?,
            frame_number: None,
            submitted: false,
        })
    }

    /// Slot index within the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Frame number currently (or last) occupying this slot.
    pub fn frame_number(&self) -> Option<u64> {
        self.frame_number
    }

    pub fn primary(&self) -> &CommandBuffer {
        &self.primary
    }

    pub fn primary_mut(&mut self) -> &mut CommandBuffer {
        &mut self.primary
    }

    pub fn auxiliary(&self) -> &[CommandBuffer] {
        &self.auxiliary
    }

    pub fn auxiliary_mut(&mut self) -> &mut [CommandBuffer] {
        &mut self.auxiliary
    }

    /// Borrow the primary and first auxiliary buffer at the same time.
    pub fn primary_and_auxiliary_mut(&mut self) -> (&mut CommandBuffer, &mut CommandBuffer) {
        (&mut self.primary, &mut self.auxiliary[0])
    }

    /// Binary semaphore signaled when the display image is acquired.
    pub fn image_ready(&self) -> &Arc<Semaphore> {
        &self.image_ready
    }

    /// Binary semaphore signaled when the primary buffer completes.
    pub fn render_finished(&self) -> &Arc<Semaphore> {
        &self.render_finished
    }

    /// Fence signaled by the primary submission.
    pub fn fence(&self) -> &GpuFence {
        &self.fence
    }

    /// Record that a submission signaling [`fence`](Self::fence) was made.
    pub fn mark_submitted(&mut self) {
        self.submitted = true;
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Wait for the outstanding submission and return the frame number it
    /// completed.
    fn retire(&mut self, backend: &dyn GpuBackend) -> BackendResult<Option<u64>> {
        if !self.submitted {
            return Ok(None);
        }
        backend.wait_fence(&self.fence)?;
        backend.reset_fence(&self.fence)?;
        self.submitted = false;
        Ok(self.frame_number)
    }
}

/// Round-robin pool of [`InFlightFrame`]s.
///
/// # Thread Safety
///
/// `FramePool` is **not thread-safe**. It should be owned by the render thread.
#[derive(Debug)]
pub struct FramePool {
    frames: Vec<InFlightFrame>,
    current_slot: usize,
    frame_count: u64,
}

impl FramePool {
    /// Create a pool.
    ///
    /// # Arguments
    ///
    /// * `frames_in_flight` - Number of slots. Typically 2 or 3. Must be at least 1.
    /// * `auxiliary_count` - Auxiliary command buffers per slot. Must be at least 1.
    ///
    /// # Panics
    ///
    /// Panics if either count is 0.
    pub fn new(
        backend: &dyn GpuBackend,
        frames_in_flight: usize,
        auxiliary_count: usize,
    ) -> BackendResult<Self> {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");
        assert!(auxiliary_count > 0, "auxiliary_count must be at least 1");

        let frames = (0..frames_in_flight)
            .map(|index| InFlightFrame::new(backend, index, auxiliary_count))
            .collect::<BackendResult<Vec<_>>>()?;

        log::debug!(
            "Created frame pool: {} frames in flight, {} auxiliary buffers each",
            frames_in_flight,
            auxiliary_count
        );

        Ok(Self {
            frames,
            current_slot: 0,
            frame_count: 0,
        })
    }

    /// Claim the current slot for `frame_number`.
    ///
    /// Blocks until the slot's previous occupant has finished on the GPU and
    /// returns that occupant's frame number.
    pub fn begin_frame(
        &mut self,
        backend: &dyn GpuBackend,
        frame_number: u64,
    ) -> BackendResult<Option<u64>> {
        let frame = &mut self.frames[self.current_slot];
        let completed = frame.retire(backend)?;
        frame.frame_number = Some(frame_number);
        self.frame_count += 1;

        log::trace!(
            "Begin frame {} (slot {})",
            frame_number,
            self.current_slot
        );

        Ok(completed)
    }

    /// Advance to the next slot.
    pub fn end_frame(&mut self) {
        log::trace!(
            "End frame {:?} (slot {})",
            self.frames[self.current_slot].frame_number,
            self.current_slot
        );
        self.current_slot = (self.current_slot + 1) % self.frames.len();
    }

    /// Wait for every outstanding submission of the pool.
    ///
    /// Returns the frame numbers that completed, ascending.
    pub fn wait_idle(&mut self, backend: &dyn GpuBackend) -> BackendResult<Vec<u64>> {
        let mut completed = Vec::new();
        for frame in &mut self.frames {
            if let Some(number) = frame.retire(backend)? {
                completed.push(number);
            }
        }
        completed.sort_unstable();
        Ok(completed)
    }

    pub fn current(&self) -> &InFlightFrame {
        &self.frames[self.current_slot]
    }

    pub fn current_mut(&mut self) -> &mut InFlightFrame {
        &mut self.frames[self.current_slot]
    }

    pub fn frames(&self) -> &[InFlightFrame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [InFlightFrame] {
        &mut self.frames
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Current slot index, from 0 to `frames_in_flight - 1`.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Total number of frames started.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Check if every slot is free of outstanding work (non-blocking).
    pub fn is_idle(&self, backend: &dyn GpuBackend) -> bool {
        self.frames
            .iter()
            .all(|frame| !frame.submitted || backend.is_fence_signaled(&frame.fence))
    }
}
