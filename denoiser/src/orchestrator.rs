//! Frame orchestration.
//!
//! [`FrameOrchestrator`] drives one frame at a time through the fixed stage
//! order and routes the work between command buffers:
//!
//! ```text
//! Internal processing stage:
//!   primary:  scene ─► upstream ─► processing ─► display copy ─► overlays ─► submit
//!
//! External processing stage:
//!   aux0:     scene ─► upstream ─► before_dispatch ─► submit (signal 2f+1)
//!   external:                      dispatch: wait 2f+1 ─► work ─► signal 2f+2
//!   primary:  after_dispatch ─► display copy ─► overlays ─► submit (wait 2f+2)
//! ```
//!
//! Processing and output swaps requested between frames are applied at the
//! start of the next frame, after a device-wide wait. A processing swap
//! re-wires the semaphore lists of every pooled frame.

use std::fmt;
use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::benchmark::{BenchmarkObserver, FrameObserver, SharedBenchmark};
use crate::command::CommandBuffer;
use crate::display::DisplayTarget;
use crate::error::{DenoiserError, DenoiserResult};
use crate::frame::FramePool;
use crate::profiling::{frame_mark, profile_function, profile_plot, profile_scope};
use crate::registry::StageRegistry;
use crate::slots::{OutputSlot, ProcessingSlot, SwapOutcome};
use crate::stage::{FrameRenderInfo, ProcessingConfig, ProcessingStage, Scene, StageContext};
use crate::sync::{Semaphore, SemaphoreKind, SemaphoreReference, TimelinePair};
use crate::types::{Extent2d, ImageHandle, PipelineStages};

/// Static orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub frames_in_flight: usize,
    /// Auxiliary command buffers per in-flight frame.
    pub auxiliary_command_buffers: usize,
    /// Processing candidate activated at build time.
    pub initial_processing: usize,
    /// Output candidate displayed at build time.
    pub initial_output: usize,
    pub extent: Extent2d,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            auxiliary_command_buffers: 1,
            initial_processing: 0,
            initial_output: 0,
            extent: Extent2d::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_auxiliary_command_buffers(mut self, count: usize) -> Self {
        self.auxiliary_command_buffers = count;
        self
    }

    pub fn with_initial_processing(mut self, index: usize) -> Self {
        self.initial_processing = index;
        self
    }

    pub fn with_initial_output(mut self, index: usize) -> Self {
        self.initial_output = index;
        self
    }

    pub fn with_extent(mut self, extent: Extent2d) -> Self {
        self.extent = extent;
        self
    }

    /// Check the settings before any GPU object is created.
    pub fn validate(&self) -> DenoiserResult<()> {
        if self.frames_in_flight == 0 {
            return Err(DenoiserError::InvalidConfiguration(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if self.auxiliary_command_buffers == 0 {
            return Err(DenoiserError::InvalidConfiguration(
                "auxiliary_command_buffers must be at least 1".into(),
            ));
        }
        if self.extent.is_empty() {
            return Err(DenoiserError::InvalidConfiguration(format!(
                "extent {} is empty",
                self.extent
            )));
        }
        Ok(())
    }
}

/// An output-slot candidate before stage outputs are resolved.
#[derive(Debug, Clone)]
pub enum OutputSource {
    Image(ImageHandle),
    /// A named image output of a registered stage.
    StageOutput { stage: String, output: String },
}

/// Submission counters since the orchestrator was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionStats {
    pub primary: u64,
    pub auxiliary: u64,
    /// Device-wide waits (swaps, resizes, shutdown).
    pub device_waits: u64,
}

/// What happened during one [`FrameOrchestrator::render_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_number: u64,
    pub slot: usize,
    /// The frame was routed through the auxiliary buffer.
    pub external: bool,
    pub timeline: TimelinePair,
    pub swapped_processing: SwapOutcome,
    pub swapped_output: bool,
    /// Frames confirmed complete by the device during this call, ascending.
    pub completed_frames: Vec<u64>,
}

/// Builder for [`FrameOrchestrator`].
#[derive(Default)]
pub struct FrameOrchestratorBuilder {
    settings: OrchestratorSettings,
    scene: Option<Box<dyn Scene>>,
    registry: Option<StageRegistry>,
    processing: Vec<ProcessingStage>,
    processing_inputs: Vec<(String, String, String)>,
    processing_target: Option<ImageHandle>,
    outputs: Vec<OutputSource>,
    display_target: Option<Box<dyn DisplayTarget>>,
    observers: Vec<Box<dyn FrameObserver>>,
    benchmark: Option<SharedBenchmark>,
}

impl FrameOrchestratorBuilder {
    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn scene(mut self, scene: impl Scene + 'static) -> Self {
        self.scene = Some(Box::new(scene));
        self
    }

    pub fn registry(mut self, registry: StageRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Processing-slot candidates, in index order.
    pub fn processing(mut self, candidates: Vec<ProcessingStage>) -> Self {
        self.processing = candidates;
        self
    }

    /// Bind the image output `output` of registered stage `stage` as the
    /// processing input `binding`.
    pub fn processing_input(
        mut self,
        binding: impl Into<String>,
        stage: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.processing_inputs
            .push((binding.into(), stage.into(), output.into()));
        self
    }

    /// Image every processing stage writes.
    pub fn processing_target(mut self, image: ImageHandle) -> Self {
        self.processing_target = Some(image);
        self
    }

    /// Add an output-slot candidate.
    pub fn output(mut self, source: OutputSource) -> Self {
        self.outputs.push(source);
        self
    }

    pub fn display_target(mut self, target: impl DisplayTarget + 'static) -> Self {
        self.display_target = Some(Box::new(target));
        self
    }

    pub fn observer(mut self, observer: impl FrameObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Share a benchmark with the processing stages. Completed frames are
    /// forwarded to it.
    pub fn benchmark(mut self, benchmark: SharedBenchmark) -> Self {
        self.benchmark = Some(benchmark);
        self
    }

    /// Create the frame pool, initialize every stage and activate the
    /// initial processing stage and output.
    pub fn build(self, backend: Arc<dyn GpuBackend>) -> DenoiserResult<FrameOrchestrator> {
        profile_scope!("FrameOrchestrator::build");

        let settings = self.settings;
        settings.validate()?;

        let mut registry = self.registry.ok_or_else(|| {
            DenoiserError::MissingConfiguration("orchestrator needs a stage registry".into())
        })?;
        let mut display_target = self.display_target.ok_or_else(|| {
            DenoiserError::MissingConfiguration("orchestrator needs a display target".into())
        })?;
        let target = self.processing_target.ok_or_else(|| {
            DenoiserError::MissingConfiguration("orchestrator needs a processing target".into())
        })?;
        if self.outputs.is_empty() {
            return Err(DenoiserError::MissingConfiguration(
                "orchestrator needs at least one output".into(),
            ));
        }

        if display_target.extent() != settings.extent {
            display_target.resize(settings.extent)?;
        }

        let mut pool = FramePool::new(
            backend.as_ref(),
            settings.frames_in_flight,
            settings.auxiliary_command_buffers,
        )?;
        let timeline = Semaphore::new(backend.as_ref(), "processing_complete", SemaphoreKind::Timeline)?;

        registry.init_all(&StageContext::new(&backend, settings.extent))?;

        let resolved = resolve_inputs(&registry, &self.processing_inputs).and_then(|inputs| {
            let outputs = self
                .outputs
                .iter()
                .map(|source| match source {
                    OutputSource::Image(image) => Ok(image.clone()),
                    OutputSource::StageOutput { stage, output } => registry.output(stage, output),
                })
                .collect::<DenoiserResult<Vec<_>>>()?;
            Ok((inputs, outputs))
        });

        let (inputs, output_images) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                registry.destroy_all();
                return Err(err);
            }
        };

        let processing_config = ProcessingConfig {
            inputs,
            target,
            timeline: Arc::clone(&timeline),
            benchmark: self.benchmark.clone(),
        };

        let activated = ProcessingSlot::new(self.processing, settings.initial_processing)
            .and_then(|mut slot| {
                let ctx = StageContext::new(&backend, settings.extent).with_processing(&processing_config);
                // Nothing is in flight yet.
                slot.apply_pending(&ctx, || Ok(()))?;

                let outputs = OutputSlot::new(output_images, settings.initial_output).and_then(
                    |mut outputs| {
                        outputs.apply_pending(registry.display_mut(), || Ok(()))?;
                        Ok(outputs)
                    },
                );
                match outputs {
                    Ok(outputs) => Ok((slot, outputs)),
                    Err(err) => {
                        slot.destroy_active();
                        Err(err)
                    }
                }
            });

        let (processing, outputs) = match activated {
            Ok(activated) => activated,
            Err(err) => {
                registry.destroy_all();
                return Err(err);
            }
        };

        wire_frame_semaphores(&mut pool, &timeline, processing.is_external());

        let mut observers = self.observers;
        if let Some(benchmark) = self.benchmark {
            observers.push(Box::new(BenchmarkObserver(benchmark)));
        }

        log::info!(
            "Frame orchestrator ready on {}: {} frames in flight, {}, processing '{}'",
            backend.name(),
            settings.frames_in_flight,
            settings.extent,
            processing.active().map_or("<none>", ProcessingStage::name)
        );

        Ok(FrameOrchestrator {
            backend,
            extent: settings.extent,
            settings,
            pool,
            timeline,
            scene: self.scene,
            registry,
            processing,
            processing_config,
            outputs,
            display_target,
            observers,
            frame_number: 0,
            stats: SubmissionStats::default(),
            shut_down: false,
        })
    }
}

fn resolve_inputs(
    registry: &StageRegistry,
    bindings: &[(String, String, String)],
) -> DenoiserResult<Vec<(String, ImageHandle)>> {
    bindings
        .iter()
        .map(|(binding, stage, output)| Ok((binding.clone(), registry.output(stage, output)?)))
        .collect()
}

/// Reset the semaphore lists of every pooled frame for the current routing.
///
/// Timeline values are placeholders here and are patched every external
/// frame by [`patch_timeline_values`].
fn wire_frame_semaphores(pool: &mut FramePool, timeline: &Arc<Semaphore>, external: bool) {
    for frame in pool.frames_mut() {
        let image_ready = Arc::clone(frame.image_ready());
        let render_finished = Arc::clone(frame.render_finished());

        let mut waits = vec![SemaphoreReference::binary(
            image_ready,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        )];
        if external {
            waits.push(SemaphoreReference::timeline(Arc::clone(timeline), 0));
        }

        let primary = frame.primary_mut();
        primary.set_wait_semaphores(waits);
        primary.set_signal_semaphores(vec![SemaphoreReference::binary(
            render_finished,
            PipelineStages::ALL_COMMANDS,
        )]);

        frame.auxiliary_mut()[0]
            .set_signal_semaphores(vec![SemaphoreReference::timeline(Arc::clone(timeline), 0)]);
    }
    log::debug!(
        "Wired {} frames for {} processing",
        pool.frames_in_flight(),
        if external { "external" } else { "internal" }
    );
}

fn patch_timeline_values(
    primary: &mut CommandBuffer,
    auxiliary: &mut CommandBuffer,
    timeline: &Semaphore,
    pair: TimelinePair,
) {
    for signal in auxiliary.signal_semaphores_mut() {
        if signal.refers_to(timeline) {
            signal.set_value(pair.signal);
        }
    }
    for wait in primary.wait_semaphores_mut() {
        if wait.refers_to(timeline) {
            wait.set_value(pair.wait);
        }
    }
}

/// Device-wide wait followed by retiring every pooled frame.
fn fence_in_flight(
    backend: &dyn GpuBackend,
    pool: &mut FramePool,
    observers: &mut [Box<dyn FrameObserver>],
    stats: &mut SubmissionStats,
) -> DenoiserResult<Vec<u64>> {
    profile_scope!("fence_all_in_flight_work");

    backend.wait_idle()?;
    stats.device_waits += 1;
    let completed = pool.wait_idle(backend)?;
    notify(observers, &completed);
    Ok(completed)
}

fn notify(observers: &mut [Box<dyn FrameObserver>], completed: &[u64]) {
    for &frame_number in completed {
        for observer in observers.iter_mut() {
            observer.frame_finished(frame_number);
        }
    }
}

/// Drives frames through the registered stages and the processing slot.
///
/// # Thread Safety
///
/// `FrameOrchestrator` is **not thread-safe**. It should be owned by the
/// render thread; input handling talks to it through
/// [`request_processing`](Self::request_processing) and
/// [`request_output`](Self::request_output) on that thread.
pub struct FrameOrchestrator {
    backend: Arc<dyn GpuBackend>,
    settings: OrchestratorSettings,
    extent: Extent2d,
    pool: FramePool,
    timeline: Arc<Semaphore>,
    scene: Option<Box<dyn Scene>>,
    registry: StageRegistry,
    processing: ProcessingSlot,
    processing_config: ProcessingConfig,
    outputs: OutputSlot,
    display_target: Box<dyn DisplayTarget>,
    observers: Vec<Box<dyn FrameObserver>>,
    frame_number: u64,
    stats: SubmissionStats,
    shut_down: bool,
}

impl FrameOrchestrator {
    pub fn builder() -> FrameOrchestratorBuilder {
        FrameOrchestratorBuilder::default()
    }

    /// Record, submit and present exactly one frame.
    pub fn render_frame(&mut self) -> DenoiserResult<FrameReport> {
        profile_scope!("render_frame");

        if self.shut_down {
            return Err(DenoiserError::ShutDown);
        }

        let backend = Arc::clone(&self.backend);
        let backend = backend.as_ref();
        let frame_number = self.frame_number;

        let mut completed_frames = Vec::new();
        if let Some(done) = self.pool.begin_frame(backend, frame_number)? {
            notify(&mut self.observers, &[done]);
            completed_frames.push(done);
        }

        // Swaps requested since the previous frame.
        let swapped_processing = {
            let ctx =
                StageContext::new(&self.backend, self.extent).with_processing(&self.processing_config);
            let pool = &mut self.pool;
            let observers = &mut self.observers;
            let stats = &mut self.stats;
            let completed = &mut completed_frames;
            self.processing.apply_pending(&ctx, || {
                completed.extend(fence_in_flight(backend, pool, observers, stats)?);
                Ok(())
            })?
        };
        if swapped_processing.changed_stage() {
            wire_frame_semaphores(&mut self.pool, &self.timeline, self.processing.is_external());
        }

        let swapped_output = {
            let pool = &mut self.pool;
            let observers = &mut self.observers;
            let stats = &mut self.stats;
            let completed = &mut completed_frames;
            self.outputs.apply_pending(self.registry.display_mut(), || {
                completed.extend(fence_in_flight(backend, pool, observers, stats)?);
                Ok(())
            })?
        };

        let external = self.processing.is_external();
        let slot = self.pool.current_slot();
        let timeline = TimelinePair::for_frame(frame_number);

        let image_ready = Arc::clone(self.pool.current().image_ready());
        let display_image = self.display_target.acquire_next_image(&image_ready)?;

        let info = FrameRenderInfo {
            frame_number,
            slot,
            extent: self.extent,
            display_image,
            timeline,
        };

        log::trace!(
            "Frame {} (slot {}): {} routing",
            frame_number,
            slot,
            if external { "external" } else { "internal" }
        );

        let mut auxiliary_submitted = false;
        if let Err(e) = self.record_and_submit(&info, external, &mut auxiliary_submitted) {
            self.abandon_frame(&info, auxiliary_submitted);
            return Err(e);
        }
        profile_plot!("processing_complete", timeline.wait);

        let render_finished = Arc::clone(self.pool.current().render_finished());
        let presented = self.display_target.present(&info.display_image, &render_finished);

        // The frame is on the device either way; its fence retires it.
        self.pool.end_frame();
        self.frame_number += 1;
        frame_mark!();
        presented?;

        Ok(FrameReport {
            frame_number,
            slot,
            external,
            timeline,
            swapped_processing,
            swapped_output,
            completed_frames,
        })
    }

    /// Record the current frame and submit its command buffers.
    ///
    /// Sets `auxiliary_submitted` as soon as the auxiliary buffer is on the
    /// queue so a failure afterwards knows what is still executing.
    fn record_and_submit(
        &mut self,
        info: &FrameRenderInfo,
        external: bool,
        auxiliary_submitted: &mut bool,
    ) -> DenoiserResult<()> {
        let backend = Arc::clone(&self.backend);
        let backend = backend.as_ref();
        let timeline = info.timeline;

        let frame = self.pool.current_mut();
        let (primary, auxiliary) = frame.primary_and_auxiliary_mut();

        if external {
            patch_timeline_values(primary, auxiliary, &self.timeline, timeline);

            auxiliary.begin(backend)?;
            if let Some(scene) = self.scene.as_mut() {
                scene.update(auxiliary, info)?;
            }
            self.registry.record_upstream(auxiliary, info)?;

            let Some(stage) = self
                .processing
                .active_mut()
                .and_then(ProcessingStage::as_external_mut)
            else {
                return Err(DenoiserError::MissingConfiguration(
                    "external routing without an active external stage".into(),
                ));
            };

            {
                profile_scope!("before_dispatch");
                stage.before_dispatch(auxiliary, info)?;
            }
            auxiliary.submit(backend, None)?;
            *auxiliary_submitted = true;
            self.stats.auxiliary += 1;

            {
                profile_scope!("dispatch");
                stage.dispatch(timeline)?;
            }

            primary.begin(backend)?;
            stage.after_dispatch(primary, info)?;
        } else {
            primary.begin(backend)?;
            if let Some(scene) = self.scene.as_mut() {
                scene.update(primary, info)?;
            }
            self.registry.record_upstream(primary, info)?;
            if let Some(stage) = self.processing.active_mut() {
                profile_scope!("processing");
                stage.record_frame(primary, info)?;
            }
        }

        self.registry.record_downstream(primary, info)?;
        primary.prepare_present(&info.display_image)?;

        let frame = self.pool.current_mut();
        frame.primary().submit(backend, Some(frame.fence()))?;
        frame.mark_submitted();
        self.stats.primary += 1;
        Ok(())
    }

    /// Undo a frame that failed before its primary submission.
    ///
    /// Recording buffers are reset and the `image_ready` signal from the
    /// acquire is consumed. The frame number is used up either way: the
    /// timeline may already hold `2f + 1`, and frame `f` must stay on slot
    /// `f % frames_in_flight`.
    fn abandon_frame(&mut self, info: &FrameRenderInfo, auxiliary_submitted: bool) {
        log::warn!(
            "Frame {} (slot {}) failed, discarding its recorded work",
            info.frame_number,
            info.slot
        );

        if let Err(e) = self.discard_frame_work(info, auxiliary_submitted) {
            log::error!("Frame {}: failed to discard recorded work: {}", info.frame_number, e);
        }
        for observer in self.observers.iter_mut() {
            observer.frame_abandoned(info.frame_number);
        }

        self.pool.end_frame();
        self.frame_number += 1;
    }

    fn discard_frame_work(&self, info: &FrameRenderInfo, auxiliary_submitted: bool) -> DenoiserResult<()> {
        let backend = self.backend.as_ref();
        let frame = self.pool.current();

        frame.primary().reset(backend)?;
        for auxiliary in frame.auxiliary() {
            auxiliary.reset(backend)?;
        }

        // Only the primary submission waits on the acquire.
        backend.wait_semaphores(&[SemaphoreReference::binary(
            Arc::clone(frame.image_ready()),
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        )])?;

        // Nothing fences the auxiliary buffer without the primary submission.
        if auxiliary_submitted {
            profile_scope!("wait_abandoned_auxiliary");
            backend.wait_timeline(&self.timeline, info.timeline.signal)?;
        }
        Ok(())
    }

    /// Latch a processing-stage change for the next frame.
    pub fn request_processing(&mut self, index: usize) -> DenoiserResult<()> {
        self.processing.request(index)
    }

    /// Latch an output change for the next frame.
    pub fn request_output(&mut self, index: usize) -> DenoiserResult<()> {
        self.outputs.request(index)
    }

    /// Wait until the device has finished every submitted frame.
    ///
    /// Returns the frames that completed, which are also reported to the
    /// observers.
    pub fn fence_all_in_flight_work(&mut self) -> DenoiserResult<Vec<u64>> {
        fence_in_flight(
            self.backend.as_ref(),
            &mut self.pool,
            &mut self.observers,
            &mut self.stats,
        )
    }

    /// React to a new display size. Zero-sized extents (minimized windows)
    /// are ignored.
    pub fn resize(&mut self, extent: Extent2d) -> DenoiserResult<()> {
        profile_function!();

        if self.shut_down {
            return Err(DenoiserError::ShutDown);
        }
        if extent.is_empty() || extent == self.extent {
            log::debug!("Ignoring resize to {}", extent);
            return Ok(());
        }

        self.fence_all_in_flight_work()?;
        self.display_target.resize(extent)?;
        self.extent = extent;

        if let Some(scene) = self.scene.as_mut() {
            scene.on_resized(extent);
        }
        self.registry.resize_all(extent);
        if let Some(stage) = self.processing.active_mut() {
            stage.on_resized(extent);
        }

        log::info!("Resized to {}", extent);
        Ok(())
    }

    /// Make the active processing stage discard its temporal history next
    /// frame (camera switch).
    pub fn reset_processing_history(&mut self) {
        if let Some(stage) = self.processing.active_mut() {
            log::debug!("Resetting history of '{}'", stage.name());
            stage.ignore_history_next_frame();
        }
    }

    /// Wait for the device and destroy every stage. Safe to call repeatedly.
    ///
    /// Stages are destroyed even if the wait fails; the wait error is
    /// returned afterwards.
    pub fn shutdown(&mut self) -> DenoiserResult<()> {
        profile_function!();

        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let waited = self.fence_all_in_flight_work();
        self.processing.destroy_active();
        self.registry.destroy_all();

        log::info!("Frame orchestrator shut down after {} frames", self.frame_number);
        waited.map(|_| ())
    }

    /// Number of the next frame to render.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn stats(&self) -> SubmissionStats {
        self.stats
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn processing_slot(&self) -> &ProcessingSlot {
        &self.processing
    }

    pub fn output_slot(&self) -> &OutputSlot {
        &self.outputs
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn frame_pool(&self) -> &FramePool {
        &self.pool
    }

    /// Image the display stage currently copies from.
    pub fn display_source(&self) -> Option<&ImageHandle> {
        self.registry.display().source()
    }

    /// True if the active processing stage is external.
    pub fn is_external(&self) -> bool {
        self.processing.is_external()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("Frame orchestrator shutdown failed: {}", err);
        }
    }
}

impl fmt::Debug for FrameOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameOrchestrator")
            .field("backend", &self.backend.name())
            .field("frame_number", &self.frame_number)
            .field("extent", &self.extent)
            .field("processing", &self.processing)
            .field("outputs", &self.outputs)
            .field("stats", &self.stats)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceEvent, DummyBackend};
    use crate::display::OffscreenTarget;
    use crate::stage::{ImageToDisplayStage, Stage};

    struct Passthrough;

    impl Stage for Passthrough {
        fn name(&self) -> &str {
            "Passthrough"
        }
        fn init(&mut self, _ctx: &StageContext<'_>) -> DenoiserResult<()> {
            Ok(())
        }
        fn destroy(&mut self) {}
        fn record_frame(&mut self, cmd: &mut CommandBuffer, _info: &FrameRenderInfo) -> DenoiserResult<()> {
            cmd.insert_label("passthrough")?;
            Ok(())
        }
    }

    fn build(backend: &Arc<DummyBackend>, frames_in_flight: usize) -> FrameOrchestrator {
        let extent = Extent2d::new(8, 8);
        let noisy = ImageHandle::dummy("Rt Output", extent);
        let dyn_backend: Arc<dyn GpuBackend> = backend.clone();
        FrameOrchestrator::builder()
            .settings(
                OrchestratorSettings::default()
                    .with_frames_in_flight(frames_in_flight)
                    .with_extent(extent),
            )
            .registry(
                StageRegistry::builder()
                    .display(ImageToDisplayStage::new())
                    .build()
                    .unwrap(),
            )
            .processing(vec![ProcessingStage::internal(Passthrough)])
            .processing_target(ImageHandle::dummy("Denoised Image", extent))
            .output(OutputSource::Image(noisy))
            .display_target(OffscreenTarget::dummy(dyn_backend.clone(), 2, extent).unwrap())
            .build(dyn_backend)
            .unwrap()
    }

    #[test]
    fn test_settings_validation() {
        assert!(OrchestratorSettings::default().validate().is_ok());
        assert!(OrchestratorSettings::default().with_frames_in_flight(0).validate().is_err());
        assert!(OrchestratorSettings::default()
            .with_auxiliary_command_buffers(0)
            .validate()
            .is_err());
        assert!(OrchestratorSettings::default()
            .with_extent(Extent2d::new(0, 4))
            .validate()
            .is_err());
    }

    #[test]
    fn test_builder_requires_registry() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let result = FrameOrchestrator::builder().build(backend);
        assert!(matches!(result, Err(DenoiserError::MissingConfiguration(_))));
    }

    #[test]
    fn test_internal_frame_wiring() {
        let backend = Arc::new(DummyBackend::new());
        let mut orchestrator = build(&backend, 2);
        assert!(!orchestrator.is_external());

        let report = orchestrator.render_frame().unwrap();
        assert_eq!(report.frame_number, 0);
        assert!(!report.external);
        assert_eq!(orchestrator.frame_number(), 1);

        let submit = backend
            .events()
            .into_iter()
            .find_map(|event| match event {
                DeviceEvent::Submit {
                    command_buffer,
                    waits,
                    signals,
                } => Some((command_buffer, waits, signals)),
                _ => None,
            })
            .unwrap();
        assert_eq!(submit.0, "primary[0]");
        assert_eq!(submit.1.len(), 1);
        assert_eq!(submit.1[0].semaphore, "image_ready[0]");
        assert_eq!(submit.2[0].semaphore, "render_finished[0]");
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let backend = Arc::new(DummyBackend::new());
        let mut orchestrator = build(&backend, 2);
        orchestrator.render_frame().unwrap();
        orchestrator.shutdown().unwrap();
        orchestrator.shutdown().unwrap();
        assert_eq!(orchestrator.stats().device_waits, 1);
        assert_eq!(orchestrator.render_frame(), Err(DenoiserError::ShutDown));
    }

    #[test]
    fn test_resize_ignores_empty_extent() {
        let backend = Arc::new(DummyBackend::new());
        let mut orchestrator = build(&backend, 2);
        orchestrator.resize(Extent2d::new(0, 0)).unwrap();
        assert_eq!(orchestrator.stats().device_waits, 0);

        orchestrator.resize(Extent2d::new(16, 16)).unwrap();
        assert_eq!(orchestrator.extent(), Extent2d::new(16, 16));
        assert_eq!(orchestrator.stats().device_waits, 1);
    }
}
