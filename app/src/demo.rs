//! Demo setup and frame loop.

use std::sync::Arc;
use std::time::Instant;

use redlilium_denoiser::{
    DenoiserResult, DeviceBenchmark, Extent2d, FrameOrchestrator, FrameReport, FrameTimer,
    GpuBackend, ImageHandle, ImageToDisplayStage, OffscreenTarget, OrchestratorSettings,
    OutputSource, ProcessingStage, SharedBenchmark, StageRegistry, SwapOutcome,
};

use crate::config::DemoConfig;
use crate::input::{self, ScriptedInput};
use crate::scene::DemoScene;
use crate::stages::{
    ALBEDO, AccumulationDenoiser, DENOISED, ExternalDenoiser, GBufferStage, NORMAL, POSITION,
    RT_OUTPUT, RaytracingStage, UiOverlay,
};

const PROCESSING_NAMES: [&str; 2] = ["Accumulation Denoiser", "External Denoiser"];
const OUTPUT_NAMES: [&str; 5] = [DENOISED, RT_OUTPUT, ALBEDO, NORMAL, POSITION];

/// Build the demo pipeline on `backend`.
pub fn build_orchestrator(
    config: &DemoConfig,
    backend: Arc<dyn GpuBackend>,
    benchmark: SharedBenchmark,
) -> DenoiserResult<FrameOrchestrator> {
    let render = &config.render;
    let extent = Extent2d::new(render.width, render.height);

    let initial_processing = match &config.processing.initial {
        Some(name) => input::index_of(&PROCESSING_NAMES, name)?,
        None => 0,
    };
    let initial_output = match &config.output.initial {
        Some(name) => input::index_of(&OUTPUT_NAMES, name)?,
        None => 0,
    };

    let registry = StageRegistry::builder()
        .upstream(GBufferStage::new(extent))
        .upstream(RaytracingStage::new(extent))
        .display(ImageToDisplayStage::new().with_flip_y(render.flip_y))
        .overlay(UiOverlay)
        .build()?;

    let denoised = ImageHandle::dummy(DENOISED, extent);
    let mut builder = FrameOrchestrator::builder()
        .settings(
            OrchestratorSettings::default()
                .with_frames_in_flight(render.frames_in_flight)
                .with_initial_processing(initial_processing)
                .with_initial_output(initial_output)
                .with_extent(extent),
        )
        .scene(DemoScene::new(extent))
        .registry(registry)
        .processing(vec![
            ProcessingStage::internal(AccumulationDenoiser::new()),
            ProcessingStage::external(ExternalDenoiser::new()),
        ])
        .processing_input("albedo", "GBuffer", ALBEDO)
        .processing_input("normal", "GBuffer", NORMAL)
        .processing_input("noisy", "Raytracing", RT_OUTPUT)
        .processing_target(denoised.clone())
        .output(OutputSource::Image(denoised))
        .output(OutputSource::StageOutput {
            stage: "Raytracing".into(),
            output: RT_OUTPUT.into(),
        });
    for name in [ALBEDO, NORMAL, POSITION] {
        builder = builder.output(OutputSource::StageOutput {
            stage: "GBuffer".into(),
            output: name.into(),
        });
    }

    let display = OffscreenTarget::dummy(
        Arc::clone(&backend),
        render.frames_in_flight + 1,
        extent,
    )?;
    builder.display_target(display).benchmark(benchmark).build(backend)
}

fn log_report(report: &FrameReport, orchestrator: &FrameOrchestrator) {
    match &report.swapped_processing {
        SwapOutcome::Unchanged => {}
        SwapOutcome::Swapped { to, external, .. } => log::info!(
            "Frame {}: processing is now '{}' ({})",
            report.frame_number,
            orchestrator.processing_slot().labels()[*to],
            if *external { "external" } else { "internal" }
        ),
        SwapOutcome::RolledBack {
            attempted, reason, ..
        } => log::warn!(
            "Frame {}: stage {} failed to initialize, kept previous stage: {}",
            report.frame_number,
            attempted,
            reason
        ),
    }
    if report.swapped_output
        && let Some(image) = orchestrator.display_source()
    {
        log::info!("Frame {}: displaying '{}'", report.frame_number, image.name());
    }
}

/// Render `config.render.max_frames` frames, applying scripted input.
pub fn run(config: &DemoConfig, backend: Arc<dyn GpuBackend>, switch_every: Option<u64>) -> DenoiserResult<()> {
    let benchmark = DeviceBenchmark::shared();
    let mut orchestrator = build_orchestrator(config, backend, Arc::clone(&benchmark))?;
    let script = ScriptedInput::new(&config.switches(), switch_every);
    let mut timer = FrameTimer::default();

    for frame in 0..config.render.max_frames {
        for event in script.events_for(frame) {
            if let Err(e) = input::apply(&mut orchestrator, &event) {
                log::error!("Frame {}: {:?} failed: {}", frame, event, e);
            }
        }

        let report = orchestrator.render_frame()?;
        timer.tick(Instant::now());
        log_report(&report, &orchestrator);
    }

    orchestrator.shutdown()?;

    let stats = orchestrator.stats();
    log::info!(
        "Submitted {} primary and {} auxiliary command buffers, {} device waits",
        stats.primary,
        stats.auxiliary,
        stats.device_waits
    );
    if let Some(analysis) = timer.analysis() {
        log::info!(
            "Frame time: avg {:.3?} min {:.3?} max {:.3?} ({:.1} FPS over {} frames)",
            analysis.avg,
            analysis.min,
            analysis.max,
            analysis.fps(),
            analysis.count
        );
    }
    log::info!("Benchmark: {}", benchmark.lock().summary());
    Ok(())
}
