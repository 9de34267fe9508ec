//! Demo stages.
//!
//! None of these render anything: they record labels and copies on the
//! dummy backend so the frame structure is visible in the device log, and
//! they time themselves into the shared benchmark.

use std::sync::Arc;
use std::time::{Duration, Instant};

use redlilium_denoiser::{
    CommandBuffer, DenoiserError, DenoiserResult, ExternalStage, Extent2d, FrameRenderInfo,
    GpuBackend, ImageHandle, Semaphore, SharedBenchmark, Stage, StageContext, TimelinePair,
};

pub const ALBEDO: &str = "Albedo";
pub const POSITION: &str = "Position";
pub const NORMAL: &str = "Normal";
pub const RT_OUTPUT: &str = "Rt Output";
pub const DENOISED: &str = "Denoised Image";

/// Named output images of a stage.
///
/// Handles are shared with the orchestrator at build time, so they keep
/// their identity for the stage's lifetime.
#[derive(Debug, Default)]
struct Images(Vec<ImageHandle>);

impl Images {
    fn create(names: &[&str], extent: Extent2d) -> Self {
        Self(names.iter().map(|name| ImageHandle::dummy(*name, extent)).collect())
    }

    fn get(&self, name: &str) -> Option<ImageHandle> {
        self.0.iter().find(|image| image.name() == name).cloned()
    }
}

// ============================================================================
// Upstream
// ============================================================================

/// Rasterizes albedo, position and normals.
#[derive(Debug)]
pub struct GBufferStage {
    images: Images,
}

impl GBufferStage {
    pub fn new(extent: Extent2d) -> Self {
        Self {
            images: Images::create(&[ALBEDO, POSITION, NORMAL], extent),
        }
    }
}

impl Stage for GBufferStage {
    fn name(&self) -> &str {
        "GBuffer"
    }

    fn init(&mut self, ctx: &StageContext<'_>) -> DenoiserResult<()> {
        log::debug!("GBuffer: {} targets at {}", self.images.0.len(), ctx.extent);
        Ok(())
    }

    fn destroy(&mut self) {}

    fn record_frame(&mut self, cmd: &mut CommandBuffer, _info: &FrameRenderInfo) -> DenoiserResult<()> {
        cmd.insert_label("gbuffer")?;
        Ok(())
    }

    fn image_output(&self, name: &str) -> Option<ImageHandle> {
        self.images.get(name)
    }

    fn on_resized(&mut self, extent: Extent2d) {
        log::debug!("GBuffer: resized to {}", extent);
    }
}

/// Traces one noisy sample per pixel.
#[derive(Debug)]
pub struct RaytracingStage {
    images: Images,
}

impl RaytracingStage {
    pub fn new(extent: Extent2d) -> Self {
        Self {
            images: Images::create(&[RT_OUTPUT], extent),
        }
    }
}

impl Stage for RaytracingStage {
    fn name(&self) -> &str {
        "Raytracing"
    }

    fn init(&mut self, _ctx: &StageContext<'_>) -> DenoiserResult<()> {
        Ok(())
    }

    fn destroy(&mut self) {}

    fn record_frame(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        cmd.insert_label(&format!("trace rays {}", info.extent))?;
        Ok(())
    }

    fn image_output(&self, name: &str) -> Option<ImageHandle> {
        self.images.get(name)
    }
}

/// Overlay drawing the statistics window.
#[derive(Debug, Default)]
pub struct UiOverlay;

impl Stage for UiOverlay {
    fn name(&self) -> &str {
        "UI"
    }

    fn init(&mut self, _ctx: &StageContext<'_>) -> DenoiserResult<()> {
        Ok(())
    }

    fn destroy(&mut self) {}

    fn record_frame(&mut self, cmd: &mut CommandBuffer, _info: &FrameRenderInfo) -> DenoiserResult<()> {
        cmd.insert_label("ui")?;
        Ok(())
    }
}

// ============================================================================
// Denoisers
// ============================================================================

/// Resources a denoiser takes from its processing configuration.
#[derive(Debug)]
struct Bindings {
    noisy: ImageHandle,
    target: ImageHandle,
    benchmark: Option<SharedBenchmark>,
}

impl Bindings {
    fn from_context(stage: &str, ctx: &StageContext<'_>) -> DenoiserResult<Self> {
        let config = ctx.processing_config()?;
        // Guided denoisers also read the G-buffer.
        config.require_input(stage, "albedo")?;
        config.require_input(stage, "normal")?;
        Ok(Self {
            noisy: config.require_input(stage, "noisy")?.clone(),
            target: config.target.clone(),
            benchmark: config.benchmark.clone(),
        })
    }

    fn record_timing(&self, frame_number: u64, label: &str, duration: Duration) {
        if let Some(benchmark) = &self.benchmark {
            benchmark.lock().record(frame_number, label, duration);
        }
    }
}

/// Temporal accumulation on the primary queue.
#[derive(Debug, Default)]
pub struct AccumulationDenoiser {
    bindings: Option<Bindings>,
    history: u32,
    ignore_history: bool,
}

impl AccumulationDenoiser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for AccumulationDenoiser {
    fn name(&self) -> &str {
        "Accumulation Denoiser"
    }

    fn init(&mut self, ctx: &StageContext<'_>) -> DenoiserResult<()> {
        self.bindings = Some(Bindings::from_context(self.name(), ctx)?);
        self.history = 0;
        Ok(())
    }

    fn destroy(&mut self) {
        self.bindings = None;
    }

    fn record_frame(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        let start = Instant::now();
        let bindings = self.bindings.as_ref().ok_or_else(|| DenoiserError::Record {
            stage: "Accumulation Denoiser".into(),
            reason: "not initialized".into(),
        })?;

        if std::mem::take(&mut self.ignore_history) {
            self.history = 0;
        }
        self.history = self.history.saturating_add(1);

        cmd.insert_label(&format!("accumulate {} frames", self.history))?;
        cmd.copy_image(&bindings.noisy, &bindings.target, false)?;
        bindings.record_timing(info.frame_number, "accumulate", start.elapsed());
        Ok(())
    }

    fn on_resized(&mut self, _extent: Extent2d) {
        self.history = 0;
    }

    fn ignore_history_next_frame(&mut self) {
        self.ignore_history = true;
    }
}

/// Denoiser running in a second execution domain.
///
/// The domain is simulated on the host: `dispatch` waits for the auxiliary
/// submission on the timeline semaphore, "denoises" and signals the value
/// the primary submission waits for.
#[derive(Default)]
pub struct ExternalDenoiser {
    bindings: Option<Bindings>,
    backend: Option<Arc<dyn GpuBackend>>,
    timeline: Option<Arc<Semaphore>>,
    shared: Option<ImageHandle>,
    frame_number: u64,
}

impl ExternalDenoiser {
    pub fn new() -> Self {
        Self::default()
    }

    fn dispatch_error(reason: &str) -> DenoiserError {
        DenoiserError::Dispatch {
            stage: "External Denoiser".into(),
            reason: reason.into(),
        }
    }
}

impl Stage for ExternalDenoiser {
    fn name(&self) -> &str {
        "External Denoiser"
    }

    fn init(&mut self, ctx: &StageContext<'_>) -> DenoiserResult<()> {
        let bindings = Bindings::from_context(self.name(), ctx)?;
        self.timeline = Some(Arc::clone(&ctx.processing_config()?.timeline));
        self.shared = Some(ImageHandle::dummy("External Shared", bindings.target.extent()));
        self.backend = Some(Arc::clone(ctx.backend));
        self.bindings = Some(bindings);
        Ok(())
    }

    fn destroy(&mut self) {
        self.bindings = None;
        self.backend = None;
        self.timeline = None;
        self.shared = None;
    }

    fn record_frame(&mut self, _cmd: &mut CommandBuffer, _info: &FrameRenderInfo) -> DenoiserResult<()> {
        Err(DenoiserError::Record {
            stage: "External Denoiser".into(),
            reason: "recorded through before_dispatch/after_dispatch".into(),
        })
    }

    fn on_resized(&mut self, extent: Extent2d) {
        if self.shared.is_some() {
            self.shared = Some(ImageHandle::dummy("External Shared", extent));
        }
    }
}

impl ExternalStage for ExternalDenoiser {
    fn before_dispatch(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        let (Some(bindings), Some(shared)) = (&self.bindings, &self.shared) else {
            return Err(Self::dispatch_error("not initialized"));
        };
        cmd.copy_image(&bindings.noisy, shared, false)?;
        self.frame_number = info.frame_number;
        Ok(())
    }

    fn dispatch(&mut self, timeline: TimelinePair) -> DenoiserResult<()> {
        let (Some(backend), Some(semaphore), Some(bindings)) =
            (&self.backend, &self.timeline, &self.bindings)
        else {
            return Err(Self::dispatch_error("not initialized"));
        };

        let start = Instant::now();
        backend.wait_timeline(semaphore, timeline.signal)?;
        log::trace!("External Denoiser: denoising frame {}", self.frame_number);
        backend.signal_timeline(semaphore, timeline.wait)?;
        bindings.record_timing(self.frame_number, "external dispatch", start.elapsed());
        Ok(())
    }

    fn after_dispatch(&mut self, cmd: &mut CommandBuffer, _info: &FrameRenderInfo) -> DenoiserResult<()> {
        let (Some(bindings), Some(shared)) = (&self.bindings, &self.shared) else {
            return Err(Self::dispatch_error("not initialized"));
        };
        cmd.copy_image(shared, &bindings.target, false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redlilium_denoiser::{DummyBackend, ProcessingConfig, SemaphoreKind};

    #[test]
    fn test_denoiser_requires_inputs() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let extent = Extent2d::new(4, 4);
        let config = ProcessingConfig {
            inputs: vec![("noisy".into(), ImageHandle::dummy(RT_OUTPUT, extent))],
            target: ImageHandle::dummy(DENOISED, extent),
            timeline: Semaphore::new(backend.as_ref(), "processing_complete", SemaphoreKind::Timeline)
                .unwrap(),
            benchmark: None,
        };
        let ctx = StageContext::new(&backend, extent).with_processing(&config);

        let mut denoiser = AccumulationDenoiser::new();
        assert!(matches!(
            denoiser.init(&ctx),
            Err(DenoiserError::MissingImage { .. })
        ));
    }

    #[test]
    fn test_stage_outputs() {
        let gbuffer = GBufferStage::new(Extent2d::new(4, 4));
        assert!(gbuffer.image_output(NORMAL).is_some());
        assert!(gbuffer.image_output(RT_OUTPUT).is_none());
        assert!(RaytracingStage::new(Extent2d::new(4, 4)).image_output(RT_OUTPUT).is_some());
    }
}
