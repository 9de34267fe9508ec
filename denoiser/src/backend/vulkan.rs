//! Native Vulkan backend implementation using ash.
//!
//! The backend wraps a device created by the windowing layer; it never
//! creates or destroys the `VkDevice` itself. The device must have Vulkan 1.3
//! `synchronization2` and Vulkan 1.2 `timelineSemaphore` enabled.
//!
//! Image layout contract for [`record_copy_image`] and
//! [`record_prepare_present`]:
//! - source images are kept in `GENERAL` between stages;
//! - display images are left in `TRANSFER_DST_OPTIMAL` after the copy, and
//!   stages recorded after the copy (overlays) must leave them there;
//! - `prepare_present` moves the display image to `PRESENT_SRC_KHR`.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::profiling::profile_scope;
use crate::sync::{Semaphore, SemaphoreKind, SemaphoreReference};
use crate::types::{ImageHandle, PipelineStages};

use super::{
    BackendError, BackendResult, GpuBackend, GpuCommandBuffer, GpuFence, GpuImage, GpuSemaphore,
    SubmitBatch,
};

/// Device handles supplied by the windowing layer.
#[derive(Clone)]
pub struct VulkanDeviceInfo {
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
}

/// Command pool shared by every command buffer of the backend.
///
/// Command buffers keep the pool alive, so they can be dropped after the
/// backend.
pub struct CommandPool {
    device: ash::Device,
    pool: vk::CommandPool,
    lock: Mutex<()>,
}

impl CommandPool {
    pub(crate) fn device(&self) -> &ash::Device {
        &self.device
    }

    pub(crate) fn free(&self, command_buffer: vk::CommandBuffer) {
        let _guard = self.lock.lock();
        unsafe {
            self.device
                .free_command_buffers(self.pool, &[command_buffer]);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Vulkan backend.
pub struct VulkanBackend {
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    pool: Arc<CommandPool>,
}

impl VulkanBackend {
    /// Create the backend on an existing device.
    pub fn new(info: VulkanDeviceInfo) -> BackendResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(info.queue_family_index);

        let pool = unsafe { info.device.create_command_pool(&pool_info, None) }.map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to create command pool: {e:?}"))
        })?;

        log::info!(
            "VulkanBackend: initialized on queue family {}",
            info.queue_family_index
        );

        Ok(Self {
            device: info.device.clone(),
            queue: Mutex::new(info.queue),
            pool: Arc::new(CommandPool {
                device: info.device,
                pool,
                lock: Mutex::new(()),
            }),
        })
    }

    /// Get the wrapped device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    fn queue_submit(&self, submit: vk::SubmitInfo2<'_>, fence: vk::Fence) -> BackendResult<()> {
        profile_scope!("queue_submit");
        let queue = self.queue.lock();
        unsafe { self.device.queue_submit2(*queue, &[submit], fence) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            e => BackendError::SubmissionFailed(format!("{e:?}")),
        })
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed during backend drop: {:?}", e);
            }
        }
    }
}

fn map_result(e: vk::Result, what: &str) -> BackendError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        e => BackendError::Internal(format!("{what}: {e:?}")),
    }
}

fn raw_command_buffer(command_buffer: &GpuCommandBuffer) -> BackendResult<vk::CommandBuffer> {
    match command_buffer {
        GpuCommandBuffer::Vulkan { command_buffer, .. } => Ok(*command_buffer),
        _ => Err(BackendError::Validation(
            "command buffer was not created by the Vulkan backend".into(),
        )),
    }
}

fn raw_semaphore(semaphore: &Semaphore) -> BackendResult<vk::Semaphore> {
    match semaphore.raw() {
        GpuSemaphore::Vulkan { semaphore, .. } => Ok(*semaphore),
        _ => Err(BackendError::Validation(format!(
            "semaphore '{}' was not created by the Vulkan backend",
            semaphore.label()
        ))),
    }
}

fn raw_fence(fence: &GpuFence) -> BackendResult<vk::Fence> {
    match fence {
        GpuFence::Vulkan { fence, .. } => Ok(*fence),
        _ => Err(BackendError::Validation(
            "fence was not created by the Vulkan backend".into(),
        )),
    }
}

fn raw_image(image: &ImageHandle) -> BackendResult<vk::Image> {
    match image.raw() {
        GpuImage::Vulkan { image, .. } => Ok(*image),
        _ => Err(BackendError::Validation(format!(
            "image '{}' is not a Vulkan image",
            image.name()
        ))),
    }
}

/// Convert a stage mask to its synchronization2 equivalent.
pub(crate) fn convert_stages(stages: PipelineStages) -> vk::PipelineStageFlags2 {
    let mut flags = vk::PipelineStageFlags2::NONE;
    let table = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags2::TOP_OF_PIPE),
        (PipelineStages::VERTEX_SHADER, vk::PipelineStageFlags2::VERTEX_SHADER),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        (
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStages::COMPUTE_SHADER, vk::PipelineStageFlags2::COMPUTE_SHADER),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags2::ALL_TRANSFER),
        (
            PipelineStages::RAY_TRACING_SHADER,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        ),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags2::BOTTOM_OF_PIPE),
        (PipelineStages::ALL_COMMANDS, vk::PipelineStageFlags2::ALL_COMMANDS),
    ];
    for (stage, flag) in table {
        if stages.contains(stage) {
            flags |= flag;
        }
    }
    flags
}

fn semaphore_infos(
    references: &[SemaphoreReference],
) -> BackendResult<Vec<vk::SemaphoreSubmitInfo<'static>>> {
    references
        .iter()
        .map(|reference| {
            let mut info = vk::SemaphoreSubmitInfo::default()
                .semaphore(raw_semaphore(reference.semaphore())?)
                .stage_mask(convert_stages(reference.stages()));
            if let Some(value) = reference.value() {
                info = info.value(value);
            }
            Ok(info)
        })
        .collect()
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend"
    }

    fn create_command_buffer(&self, label: &str) -> BackendResult<GpuCommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = {
            let _guard = self.pool.lock.lock();
            unsafe { self.device.allocate_command_buffers(&alloc_info) }
        }
        .map_err(|e| {
            BackendError::ResourceCreationFailed(format!(
                "Failed to allocate command buffer {label}: {e:?}"
            ))
        })?;

        let command_buffer = buffers.first().copied().ok_or_else(|| {
            BackendError::ResourceCreationFailed(format!("No command buffer returned for {label}"))
        })?;

        log::trace!("VulkanBackend: allocated command buffer {:?}", label);
        Ok(GpuCommandBuffer::Vulkan {
            pool: Arc::clone(&self.pool),
            command_buffer,
        })
    }

    fn create_semaphore(&self, label: &str, kind: SemaphoreKind) -> BackendResult<GpuSemaphore> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(match kind {
                SemaphoreKind::Binary => vk::SemaphoreType::BINARY,
                SemaphoreKind::Timeline => vk::SemaphoreType::TIMELINE,
            })
            .initial_value(0);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { self.device.create_semaphore(&info, None) }.map_err(|e| {
            BackendError::ResourceCreationFailed(format!(
                "Failed to create semaphore {label}: {e:?}"
            ))
        })?;

        Ok(GpuSemaphore::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<GpuFence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(|e| BackendError::ResourceCreationFailed(format!("Failed to create fence: {e:?}")))?;

        Ok(GpuFence::Vulkan {
            device: self.device.clone(),
            fence,
        })
    }

    fn begin_command_buffer(&self, command_buffer: &GpuCommandBuffer) -> BackendResult<()> {
        let cb = raw_command_buffer(command_buffer)?;
        unsafe {
            self.device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(|e| map_result(e, "reset_command_buffer"))?;
            self.device
                .begin_command_buffer(
                    cb,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .map_err(|e| map_result(e, "begin_command_buffer"))
        }
    }

    fn reset_command_buffer(&self, command_buffer: &GpuCommandBuffer) -> BackendResult<()> {
        let cb = raw_command_buffer(command_buffer)?;
        unsafe {
            self.device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(|e| map_result(e, "reset_command_buffer"))
        }
    }

    fn submit(&self, batch: &SubmitBatch<'_>) -> BackendResult<()> {
        let cb = raw_command_buffer(batch.command_buffer)?;
        unsafe { self.device.end_command_buffer(cb) }
            .map_err(|e| map_result(e, "end_command_buffer"))?;

        let waits = semaphore_infos(batch.waits)?;
        let signals = semaphore_infos(batch.signals)?;
        let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cb)];
        let fence = match batch.fence {
            Some(fence) => raw_fence(fence)?,
            None => vk::Fence::null(),
        };

        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signals);

        self.queue_submit(submit, fence)
    }

    fn signal_semaphores(&self, signals: &[SemaphoreReference]) -> BackendResult<()> {
        let signals = semaphore_infos(signals)?;
        let submit = vk::SubmitInfo2::default().signal_semaphore_infos(&signals);
        self.queue_submit(submit, vk::Fence::null())
    }

    fn wait_semaphores(&self, waits: &[SemaphoreReference]) -> BackendResult<()> {
        let waits = semaphore_infos(waits)?;
        let submit = vk::SubmitInfo2::default().wait_semaphore_infos(&waits);
        self.queue_submit(submit, vk::Fence::null())
    }

    fn wait_fence(&self, fence: &GpuFence) -> BackendResult<()> {
        profile_scope!("wait_fence");
        let fence = raw_fence(fence)?;
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(|e| map_result(e, "wait_for_fences"))
    }

    fn reset_fence(&self, fence: &GpuFence) -> BackendResult<()> {
        let fence = raw_fence(fence)?;
        unsafe { self.device.reset_fences(&[fence]) }.map_err(|e| map_result(e, "reset_fences"))
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        match raw_fence(fence) {
            Ok(fence) => unsafe { self.device.get_fence_status(fence) }.unwrap_or(false),
            Err(_) => false,
        }
    }

    fn wait_idle(&self) -> BackendResult<()> {
        profile_scope!("device_wait_idle");
        unsafe { self.device.device_wait_idle() }.map_err(|e| map_result(e, "device_wait_idle"))
    }

    fn timeline_value(&self, semaphore: &Semaphore) -> BackendResult<u64> {
        let raw = raw_semaphore(semaphore)?;
        unsafe { self.device.get_semaphore_counter_value(raw) }
            .map_err(|e| map_result(e, "get_semaphore_counter_value"))
    }

    fn signal_timeline(&self, semaphore: &Semaphore, value: u64) -> BackendResult<()> {
        let raw = raw_semaphore(semaphore)?;
        let info = vk::SemaphoreSignalInfo::default().semaphore(raw).value(value);
        unsafe { self.device.signal_semaphore(&info) }.map_err(|e| map_result(e, "signal_semaphore"))
    }

    fn wait_timeline(&self, semaphore: &Semaphore, value: u64) -> BackendResult<()> {
        profile_scope!("wait_timeline");
        let semaphores = [raw_semaphore(semaphore)?];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&info, u64::MAX) }
            .map_err(|e| map_result(e, "wait_semaphores"))
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
}

fn corner(extent: crate::types::Extent2d) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

pub(crate) fn record_copy_image(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    src: &ImageHandle,
    dst: &ImageHandle,
    flip_y: bool,
) -> BackendResult<()> {
    let src_image = raw_image(src)?;
    let dst_image = raw_image(dst)?;

    let to_transfer = [
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::BLIT)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
            .old_layout(vk::ImageLayout::GENERAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .image(src_image)
            .subresource_range(color_range()),
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::NONE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(vk::PipelineStageFlags2::BLIT)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .image(dst_image)
            .subresource_range(color_range()),
    ];

    let src_extent = src.extent();
    let dst_extent = dst.extent();
    let dst_offsets = if flip_y {
        [
            vk::Offset3D {
                x: 0,
                y: dst_extent.height as i32,
                z: 0,
            },
            vk::Offset3D {
                x: dst_extent.width as i32,
                y: 0,
                z: 1,
            },
        ]
    } else {
        [vk::Offset3D::default(), corner(dst_extent)]
    };

    let region = vk::ImageBlit::default()
        .src_subresource(color_layers())
        .src_offsets([vk::Offset3D::default(), corner(src_extent)])
        .dst_subresource(color_layers())
        .dst_offsets(dst_offsets);

    let back_to_general = [vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::BLIT)
        .src_access_mask(vk::AccessFlags2::TRANSFER_READ)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
        .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .new_layout(vk::ImageLayout::GENERAL)
        .image(src_image)
        .subresource_range(color_range())];

    unsafe {
        device.cmd_pipeline_barrier2(
            command_buffer,
            &vk::DependencyInfo::default().image_memory_barriers(&to_transfer),
        );
        device.cmd_blit_image(
            command_buffer,
            src_image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
            vk::Filter::LINEAR,
        );
        device.cmd_pipeline_barrier2(
            command_buffer,
            &vk::DependencyInfo::default().image_memory_barriers(&back_to_general),
        );
    }
    Ok(())
}

pub(crate) fn record_prepare_present(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: &ImageHandle,
) -> BackendResult<()> {
    let barrier = [vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE)
        .dst_access_mask(vk::AccessFlags2::NONE)
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .image(raw_image(image)?)
        .subresource_range(color_range())];

    unsafe {
        device.cmd_pipeline_barrier2(
            command_buffer,
            &vk::DependencyInfo::default().image_memory_barriers(&barrier),
        );
    }
    Ok(())
}
