//! Stage contract.
//!
//! A stage is a unit of GPU work recorded once per frame. Stages come in
//! three shapes:
//!
//! - [`Stage`]: records into whatever command buffer it is given.
//! - [`ExternalStage`]: a processing stage whose work runs in a separate
//!   execution domain. It records setup into the auxiliary buffer, runs its
//!   own work between the auxiliary and primary submissions, and records
//!   consumption into the primary buffer.
//! - [`DisplayStage`]: the display-copy stage whose source image can be
//!   redirected by the output slot.
//!
//! Whether a processing stage is internal or external is fixed when the
//! [`ProcessingStage`] is constructed.

use std::fmt;
use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::benchmark::SharedBenchmark;
use crate::command::CommandBuffer;
use crate::error::{DenoiserError, DenoiserResult};
use crate::sync::{Semaphore, TimelinePair};
use crate::types::{Extent2d, ImageHandle};

/// Per-frame data handed to every stage.
#[derive(Debug, Clone)]
pub struct FrameRenderInfo {
    /// Monotonic frame number, starting at 0.
    pub frame_number: u64,
    /// Slot of the in-flight frame pool.
    pub slot: usize,
    pub extent: Extent2d,
    /// Display image acquired for this frame.
    pub display_image: ImageHandle,
    /// Timeline values reserved for this frame.
    pub timeline: TimelinePair,
}

/// Everything a processing stage needs to initialize.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Named upstream images the stage reads (e.g. albedo, normals, noisy color).
    pub inputs: Vec<(String, ImageHandle)>,
    /// Image the stage writes.
    pub target: ImageHandle,
    /// Shared processing-complete timeline semaphore.
    pub timeline: Arc<Semaphore>,
    /// Timing collector.
    pub benchmark: Option<SharedBenchmark>,
}

impl ProcessingConfig {
    /// Look up an input by binding name.
    pub fn input(&self, name: &str) -> Option<&ImageHandle> {
        self.inputs
            .iter()
            .find(|(binding, _)| binding == name)
            .map(|(_, image)| image)
    }

    /// Look up an input, reporting a missing binding for `stage`.
    pub fn require_input(&self, stage: &str, name: &str) -> DenoiserResult<&ImageHandle> {
        self.input(name).ok_or_else(|| DenoiserError::MissingImage {
            stage: stage.to_string(),
            output: name.to_string(),
        })
    }
}

/// Initialization context.
pub struct StageContext<'a> {
    pub backend: &'a Arc<dyn GpuBackend>,
    pub extent: Extent2d,
    /// Present only when initializing a processing stage.
    pub processing: Option<&'a ProcessingConfig>,
}

impl<'a> StageContext<'a> {
    pub fn new(backend: &'a Arc<dyn GpuBackend>, extent: Extent2d) -> Self {
        Self {
            backend,
            extent,
            processing: None,
        }
    }

    pub fn with_processing(mut self, config: &'a ProcessingConfig) -> Self {
        self.processing = Some(config);
        self
    }

    /// The processing configuration, or an error if this is not a processing
    /// stage initialization.
    pub fn processing_config(&self) -> DenoiserResult<&'a ProcessingConfig> {
        self.processing.ok_or_else(|| {
            DenoiserError::MissingConfiguration("stage requires a processing configuration".into())
        })
    }
}

impl fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("backend", &self.backend.name())
            .field("extent", &self.extent)
            .field("processing", &self.processing.is_some())
            .finish()
    }
}

/// A unit of GPU work recorded once per frame.
pub trait Stage {
    /// Display name (also used in UI lists and logs).
    fn name(&self) -> &str;

    /// Create GPU resources. Called once before the first `record_frame`
    /// and again after every `destroy` that is followed by reactivation.
    fn init(&mut self, ctx: &StageContext<'_>) -> DenoiserResult<()>;

    /// Release GPU resources. The device is idle when this is called.
    fn destroy(&mut self);

    /// Record this frame's commands into `cmd`.
    fn record_frame(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()>;

    /// Look up a named image this stage produces.
    fn image_output(&self, _name: &str) -> Option<ImageHandle> {
        None
    }

    /// The display was resized. The device is idle when this is called.
    fn on_resized(&mut self, _extent: Extent2d) {}

    /// Discard temporal history on the next frame (e.g. after a camera cut).
    fn ignore_history_next_frame(&mut self) {}
}

/// A processing stage whose main work runs outside the primary queue.
///
/// Per frame, with `pair = TimelinePair::for_frame(f)`:
///
/// ```text
/// before_dispatch(aux) ─► submit aux (signals pair.signal)
///     ─► dispatch(pair): wait pair.signal, work, signal pair.wait
///     ─► after_dispatch(primary) ─► submit primary (waits pair.wait)
/// ```
pub trait ExternalStage: Stage {
    /// Record setup work (e.g. copies into shared memory) into the auxiliary buffer.
    fn before_dispatch(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()>;

    /// Run the external work. Must wait for `timeline.signal` and signal
    /// `timeline.wait` on the processing-complete timeline semaphore.
    fn dispatch(&mut self, timeline: TimelinePair) -> DenoiserResult<()>;

    /// Record consumption of the results into the primary buffer.
    fn after_dispatch(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()>;
}

/// A processing-slot candidate with its routing capability.
pub enum ProcessingStage {
    Internal(Box<dyn Stage>),
    External(Box<dyn ExternalStage>),
}

impl ProcessingStage {
    pub fn internal(stage: impl Stage + 'static) -> Self {
        Self::Internal(Box::new(stage))
    }

    pub fn external(stage: impl ExternalStage + 'static) -> Self {
        Self::External(Box::new(stage))
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Internal(stage) => stage.name(),
            Self::External(stage) => stage.name(),
        }
    }

    pub fn init(&mut self, ctx: &StageContext<'_>) -> DenoiserResult<()> {
        match self {
            Self::Internal(stage) => stage.init(ctx),
            Self::External(stage) => stage.init(ctx),
        }
    }

    pub fn destroy(&mut self) {
        match self {
            Self::Internal(stage) => stage.destroy(),
            Self::External(stage) => stage.destroy(),
        }
    }

    pub fn record_frame(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        match self {
            Self::Internal(stage) => stage.record_frame(cmd, info),
            Self::External(stage) => stage.record_frame(cmd, info),
        }
    }

    pub fn image_output(&self, name: &str) -> Option<ImageHandle> {
        match self {
            Self::Internal(stage) => stage.image_output(name),
            Self::External(stage) => stage.image_output(name),
        }
    }

    pub fn on_resized(&mut self, extent: Extent2d) {
        match self {
            Self::Internal(stage) => stage.on_resized(extent),
            Self::External(stage) => stage.on_resized(extent),
        }
    }

    pub fn ignore_history_next_frame(&mut self) {
        match self {
            Self::Internal(stage) => stage.ignore_history_next_frame(),
            Self::External(stage) => stage.ignore_history_next_frame(),
        }
    }

    /// The external hooks, if this is an external stage.
    pub fn as_external_mut(&mut self) -> Option<&mut dyn ExternalStage> {
        match self {
            Self::Internal(_) => None,
            Self::External(stage) => Some(stage.as_mut()),
        }
    }
}

impl fmt::Debug for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(stage) => f.debug_tuple("Internal").field(&stage.name()).finish(),
            Self::External(stage) => f.debug_tuple("External").field(&stage.name()).finish(),
        }
    }
}

/// The stage that copies the selected output into the display image.
pub trait DisplayStage: Stage {
    /// Redirect the copy source. Takes effect on the next recorded frame.
    fn set_source(&mut self, image: ImageHandle);

    fn source(&self) -> Option<&ImageHandle>;
}

/// Per-frame scene update, run first in the leading command buffer.
pub trait Scene {
    fn update(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()>;

    fn on_resized(&mut self, _extent: Extent2d) {}
}

/// Copies an image into the display image.
#[derive(Debug)]
pub struct ImageToDisplayStage {
    name: String,
    source: Option<ImageHandle>,
    flip_y: bool,
    initialized: bool,
}

impl ImageToDisplayStage {
    pub fn new() -> Self {
        Self {
            name: "Image To Display".into(),
            source: None,
            flip_y: false,
            initialized: false,
        }
    }

    /// Flip vertically while copying (for sources rendered with a Y-down convention).
    pub fn with_flip_y(mut self, flip_y: bool) -> Self {
        self.flip_y = flip_y;
        self
    }

    pub fn flip_y(&self) -> bool {
        self.flip_y
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl Default for ImageToDisplayStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ImageToDisplayStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, _ctx: &StageContext<'_>) -> DenoiserResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn destroy(&mut self) {
        self.initialized = false;
    }

    fn record_frame(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        let source = self.source.as_ref().ok_or_else(|| DenoiserError::Record {
            stage: self.name.clone(),
            reason: "no source image selected".into(),
        })?;
        cmd.copy_image(source, &info.display_image, self.flip_y)?;
        Ok(())
    }
}

impl DisplayStage for ImageToDisplayStage {
    fn set_source(&mut self, image: ImageHandle) {
        log::debug!("{}: source set to '{}'", self.name, image.name());
        self.source = Some(image);
    }

    fn source(&self) -> Option<&ImageHandle> {
        self.source.as_ref()
    }
}
