//! Common utilities for orchestrator integration tests.
//!
//! Mock stages append their lifecycle calls to a shared [`CallLog`]; the
//! dummy backend's event log records what reached the device. Tests compare
//! the two orderings.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use redlilium_denoiser::{
    CommandBuffer, DenoiserError, DenoiserResult, DeviceEvent, DummyBackend, ExternalStage,
    Extent2d, FrameObserver, FrameOrchestrator, FrameRenderInfo, GpuBackend, ImageHandle,
    ImageToDisplayStage, OffscreenTarget, OrchestratorSettings, OutputSource, ProcessingStage,
    Scene, Semaphore, SharedBenchmark, Stage, StageContext, StageRegistry, TimelinePair,
};

pub const EXTENT: Extent2d = Extent2d::new(64, 32);

pub type CallLog = Rc<RefCell<Vec<String>>>;

/// Only the `init`/`destroy` entries of a call log.
pub fn lifecycle(log: &CallLog) -> Vec<String> {
    log.borrow()
        .iter()
        .filter(|entry| entry.starts_with("init ") || entry.starts_with("destroy "))
        .cloned()
        .collect()
}

/// Number of times `entry` appears in the log.
pub fn count(log: &CallLog, entry: &str) -> usize {
    log.borrow().iter().filter(|e| *e == entry).count()
}

// ============================================================================
// Mock Stages
// ============================================================================

/// Stage that logs every call and records a label into the command buffer.
pub struct MockStage {
    name: String,
    log: CallLog,
    outputs: Vec<ImageHandle>,
    fail_init: bool,
    fail_record_on: Option<u64>,
}

impl MockStage {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: Rc::clone(log),
            outputs: Vec::new(),
            fail_init: false,
            fail_record_on: None,
        }
    }

    /// Expose an image output named like the image.
    pub fn with_output(mut self, name: &str) -> Self {
        self.outputs.push(ImageHandle::dummy(name, EXTENT));
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Return a record error for frame `frame_number` only.
    pub fn failing_record_on(mut self, frame_number: u64) -> Self {
        self.fail_record_on = Some(frame_number);
        self
    }

    fn push(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

impl Stage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, _ctx: &StageContext<'_>) -> DenoiserResult<()> {
        self.push(format!("init {}", self.name));
        if self.fail_init {
            return Err(DenoiserError::StageInit {
                stage: self.name.clone(),
                reason: "mock failure".into(),
            });
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.push(format!("destroy {}", self.name));
    }

    fn record_frame(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        cmd.insert_label(&self.name)?;
        if self.fail_record_on == Some(info.frame_number) {
            self.push(format!("fail {} {}", self.name, info.frame_number));
            return Err(DenoiserError::Record {
                stage: self.name.clone(),
                reason: "mock failure".into(),
            });
        }
        self.push(format!("record {} {}", self.name, info.frame_number));
        Ok(())
    }

    fn image_output(&self, name: &str) -> Option<ImageHandle> {
        self.outputs.iter().find(|image| image.name() == name).cloned()
    }

    fn on_resized(&mut self, extent: Extent2d) {
        self.push(format!("resize {} {}", self.name, extent));
    }

    fn ignore_history_next_frame(&mut self) {
        self.push(format!("reset {}", self.name));
    }
}

/// External stage that plays the second execution domain on the host:
/// it waits for the auxiliary signal and then signals the primary wait.
pub struct MockExternalStage {
    name: String,
    log: CallLog,
    backend: Option<Arc<dyn GpuBackend>>,
    timeline: Option<Arc<Semaphore>>,
    benchmark: Option<SharedBenchmark>,
    skip_signal: bool,
    fail_dispatch_on: Option<u64>,
}

impl MockExternalStage {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: Rc::clone(log),
            backend: None,
            timeline: None,
            benchmark: None,
            skip_signal: false,
            fail_dispatch_on: None,
        }
    }

    /// Never signal the primary wait value.
    pub fn skipping_signal(mut self) -> Self {
        self.skip_signal = true;
        self
    }

    /// Fail the dispatch of frame `frame_number` after consuming the
    /// auxiliary signal, without signaling the primary wait value.
    pub fn failing_dispatch_on(mut self, frame_number: u64) -> Self {
        self.fail_dispatch_on = Some(frame_number);
        self
    }

    fn push(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

impl Stage for MockExternalStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &StageContext<'_>) -> DenoiserResult<()> {
        self.push(format!("init {}", self.name));
        let config = ctx.processing_config()?;
        config.require_input(&self.name, "noisy")?;
        self.backend = Some(Arc::clone(ctx.backend));
        self.timeline = Some(Arc::clone(&config.timeline));
        self.benchmark = config.benchmark.clone();
        Ok(())
    }

    fn destroy(&mut self) {
        self.push(format!("destroy {}", self.name));
        self.backend = None;
        self.timeline = None;
    }

    fn record_frame(&mut self, _cmd: &mut CommandBuffer, _info: &FrameRenderInfo) -> DenoiserResult<()> {
        Err(DenoiserError::Record {
            stage: self.name.clone(),
            reason: "external stages are not recorded directly".into(),
        })
    }

    fn on_resized(&mut self, extent: Extent2d) {
        self.push(format!("resize {} {}", self.name, extent));
    }

    fn ignore_history_next_frame(&mut self) {
        self.push(format!("reset {}", self.name));
    }
}

impl ExternalStage for MockExternalStage {
    fn before_dispatch(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        cmd.insert_label("before_dispatch")?;
        self.push(format!("before_dispatch {}", info.frame_number));
        Ok(())
    }

    fn dispatch(&mut self, timeline: TimelinePair) -> DenoiserResult<()> {
        let (Some(backend), Some(semaphore)) = (&self.backend, &self.timeline) else {
            return Err(DenoiserError::Dispatch {
                stage: self.name.clone(),
                reason: "not initialized".into(),
            });
        };
        backend.wait_timeline(semaphore, timeline.signal)?;
        let frame_number = (timeline.signal - 1) / 2;
        if self.fail_dispatch_on == Some(frame_number) {
            self.push(format!("fail dispatch {}", frame_number));
            return Err(DenoiserError::Dispatch {
                stage: self.name.clone(),
                reason: "mock failure".into(),
            });
        }
        if !self.skip_signal {
            backend.signal_timeline(semaphore, timeline.wait)?;
        }
        if let Some(benchmark) = &self.benchmark {
            benchmark.lock().record(
                frame_number,
                format!("{} dispatch", self.name),
                Duration::from_micros(250),
            );
        }
        self.push(format!("dispatch {}->{}", timeline.signal, timeline.wait));
        Ok(())
    }

    fn after_dispatch(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        cmd.insert_label("after_dispatch")?;
        self.push(format!("after_dispatch {}", info.frame_number));
        Ok(())
    }
}

/// Scene that records a label every frame.
pub struct MockScene {
    log: CallLog,
}

impl MockScene {
    pub fn new(log: &CallLog) -> Self {
        Self { log: Rc::clone(log) }
    }
}

impl Scene for MockScene {
    fn update(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        cmd.insert_label("scene")?;
        self.log.borrow_mut().push(format!("scene {}", info.frame_number));
        Ok(())
    }

    fn on_resized(&mut self, extent: Extent2d) {
        self.log.borrow_mut().push(format!("resize scene {}", extent));
    }
}

/// Observer collecting completed and abandoned frame numbers.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    pub finished: Rc<RefCell<Vec<u64>>>,
    pub abandoned: Rc<RefCell<Vec<u64>>>,
}

impl FrameObserver for RecordingObserver {
    fn frame_finished(&mut self, frame_number: u64) {
        self.finished.borrow_mut().push(frame_number);
    }

    fn frame_abandoned(&mut self, frame_number: u64) {
        self.abandoned.borrow_mut().push(frame_number);
    }
}

pub fn internal(name: &str, log: &CallLog) -> ProcessingStage {
    ProcessingStage::internal(MockStage::new(name, log))
}

pub fn external(name: &str, log: &CallLog) -> ProcessingStage {
    ProcessingStage::external(MockExternalStage::new(name, log))
}

// ============================================================================
// Harness
// ============================================================================

/// An orchestrator on the dummy backend with the demo stage layout:
/// GBuffer and Raytracing upstream, the display copy, and a UI overlay.
///
/// Outputs: 0 = "Denoised Image" (processing target), 1 = "Rt Output".
pub struct Harness {
    pub backend: Arc<DummyBackend>,
    pub log: CallLog,
    pub orchestrator: FrameOrchestrator,
}

pub struct HarnessBuilder {
    frames_in_flight: usize,
    log: CallLog,
    processing: Vec<ProcessingStage>,
    observer: Option<RecordingObserver>,
    benchmark: Option<SharedBenchmark>,
    raytracing_fails_on: Option<u64>,
}

impl HarnessBuilder {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight,
            log: CallLog::default(),
            processing: Vec::new(),
            observer: None,
            benchmark: None,
            raytracing_fails_on: None,
        }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn internal(mut self, name: &str) -> Self {
        self.processing.push(internal(name, &self.log));
        self
    }

    pub fn external(mut self, name: &str) -> Self {
        self.processing.push(external(name, &self.log));
        self
    }

    pub fn processing(mut self, stage: ProcessingStage) -> Self {
        self.processing.push(stage);
        self
    }

    pub fn observer(mut self, observer: RecordingObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn benchmark(mut self, benchmark: SharedBenchmark) -> Self {
        self.benchmark = Some(benchmark);
        self
    }

    /// Make the "Raytracing" upstream stage fail to record `frame_number`.
    pub fn raytracing_fails_on(mut self, frame_number: u64) -> Self {
        self.raytracing_fails_on = Some(frame_number);
        self
    }

    pub fn try_build(self) -> DenoiserResult<Harness> {
        let backend = Arc::new(DummyBackend::new());
        let dyn_backend: Arc<dyn GpuBackend> = backend.clone();

        let mut raytracing = MockStage::new("Raytracing", &self.log).with_output("Rt Output");
        if let Some(frame_number) = self.raytracing_fails_on {
            raytracing = raytracing.failing_record_on(frame_number);
        }

        let registry = StageRegistry::builder()
            .upstream(
                MockStage::new("GBuffer", &self.log)
                    .with_output("albedo")
                    .with_output("normal"),
            )
            .upstream(raytracing)
            .display(ImageToDisplayStage::new())
            .overlay(MockStage::new("UI", &self.log))
            .build()?;

        let denoised = ImageHandle::dummy("Denoised Image", EXTENT);
        let mut builder = FrameOrchestrator::builder()
            .settings(
                OrchestratorSettings::default()
                    .with_frames_in_flight(self.frames_in_flight)
                    .with_extent(EXTENT),
            )
            .scene(MockScene::new(&self.log))
            .registry(registry)
            .processing(self.processing)
            .processing_input("albedo", "GBuffer", "albedo")
            .processing_input("normal", "GBuffer", "normal")
            .processing_input("noisy", "Raytracing", "Rt Output")
            .processing_target(denoised.clone())
            .output(OutputSource::Image(denoised))
            .output(OutputSource::StageOutput {
                stage: "Raytracing".into(),
                output: "Rt Output".into(),
            })
            .display_target(OffscreenTarget::dummy(
                Arc::clone(&dyn_backend),
                self.frames_in_flight + 1,
                EXTENT,
            )?);

        if let Some(observer) = self.observer {
            builder = builder.observer(observer);
        }
        if let Some(benchmark) = self.benchmark {
            builder = builder.benchmark(benchmark);
        }

        let orchestrator = builder.build(dyn_backend)?;
        Ok(Harness {
            backend,
            log: self.log,
            orchestrator,
        })
    }

    pub fn build(self) -> Harness {
        self.try_build().expect("harness should build")
    }
}

impl Harness {
    /// Render `count` frames, panicking on the first error.
    pub fn render(&mut self, count: usize) {
        for _ in 0..count {
            self.orchestrator.render_frame().expect("frame should render");
        }
    }

    /// Forget device events and stage calls recorded so far.
    pub fn clear(&self) {
        self.backend.clear_events();
        self.log.borrow_mut().clear();
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.backend.events()
    }
}

// ============================================================================
// Event Queries
// ============================================================================

/// Position of the first `Submit` of `command_buffer`.
pub fn submit_position(events: &[DeviceEvent], command_buffer: &str) -> Option<usize> {
    events.iter().position(|event| {
        matches!(event, DeviceEvent::Submit { command_buffer: cb, .. } if cb == command_buffer)
    })
}

/// Position of the first `Begin` at or after `from`.
pub fn begin_position_after(events: &[DeviceEvent], from: usize) -> Option<usize> {
    events
        .iter()
        .skip(from)
        .position(|event| matches!(event, DeviceEvent::Begin { .. }))
        .map(|offset| from + offset)
}

pub fn wait_idles_between(events: &[DeviceEvent], start: usize, end: usize) -> usize {
    events[start..end]
        .iter()
        .filter(|event| matches!(event, DeviceEvent::WaitIdle))
        .count()
}
