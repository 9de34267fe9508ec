//! # RedLilium Denoiser
//!
//! Frame orchestration for renderers whose denoising stage can be swapped
//! at runtime, including for stages that run in a separate execution domain.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameOrchestrator`] - Runs one frame at a time through the registered stages
//! - [`FramePool`] - N frames in flight with per-slot command buffers, semaphores and fences
//! - [`ProcessingSlot`] / [`OutputSlot`] - Hot-swappable processing stage and displayed image
//! - [`StageRegistry`] - Fixed stage order: upstream, display copy, overlays
//! - [`GpuBackend`] - Trait for GPU backends: Dummy (for testing) and Vulkan
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_denoiser::{FrameOrchestrator, StageRegistry, ImageToDisplayStage};
//!
//! let registry = StageRegistry::builder()
//!     .upstream(gbuffer)
//!     .display(ImageToDisplayStage::new())
//!     .build()?;
//!
//! let mut orchestrator = FrameOrchestrator::builder()
//!     .registry(registry)
//!     .processing(vec![ProcessingStage::internal(accumulation)])
//!     .processing_target(denoised.clone())
//!     .output(OutputSource::Image(denoised))
//!     .display_target(target)
//!     .build(backend)?;
//!
//! loop {
//!     orchestrator.render_frame()?;
//! }
//! ```

pub mod backend;
pub mod benchmark;
pub mod command;
pub mod display;
pub mod error;
pub mod frame;
pub mod orchestrator;
pub mod profiling;
pub mod registry;
pub mod slots;
pub mod stage;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendError, DeviceEvent, DummyBackend, GpuBackend};
pub use benchmark::{BenchmarkObserver, DeviceBenchmark, FrameObserver, FrameTimer, SharedBenchmark};
pub use command::{CommandBuffer, CommandBufferRole};
pub use display::{DisplayTarget, OffscreenTarget};
pub use error::{DenoiserError, DenoiserResult};
pub use frame::{FramePool, InFlightFrame};
pub use orchestrator::{
    FrameOrchestrator, FrameOrchestratorBuilder, FrameReport, OrchestratorSettings, OutputSource,
    SubmissionStats,
};
pub use registry::{StageRegistry, StageRegistryBuilder};
pub use slots::{OutputSlot, ProcessingSlot, SlotState, SwapOutcome};
pub use stage::{
    DisplayStage, ExternalStage, FrameRenderInfo, ImageToDisplayStage, ProcessingConfig,
    ProcessingStage, Scene, Stage, StageContext,
};
pub use sync::{Semaphore, SemaphoreKind, SemaphoreReference, TimelinePair};
pub use types::{Extent2d, ImageHandle, PipelineStages};

/// Denoiser library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the denoiser subsystem.
pub fn init() {
    log::info!("RedLilium Denoiser v{} initialized", VERSION);
}
