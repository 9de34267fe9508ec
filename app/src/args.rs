//! Command line arguments.
//!
//! Every flag overrides the matching value of the config file.

use std::path::PathBuf;

use clap::Parser;

/// RedLilium denoiser demo arguments.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "RedLilium Denoiser Demo",
    about = "Headless demo of hot-swappable denoising stages",
    long_about = "Renders frames on the dummy GPU backend through the frame orchestrator.\n\n\
        Processing stages and outputs can be switched at scripted frames, either\n\
        from a config file ([[switch]] entries) or with --switch-at.\n\
        \n\
        EXAMPLES:\n\
          # Render 8 frames with the default setup\n\
          ./redlilium-denoiser-demo\n\
        \n\
          # Start with the external denoiser, 3 frames in flight\n\
          ./redlilium-denoiser-demo --processing \"External Denoiser\" --frames-in-flight 3\n\
        \n\
          # Load a scripted session\n\
          ./redlilium-denoiser-demo --config demo.toml --max-frames 100",
    version
)]
pub struct DemoArgs {
    /// TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Exit after rendering N frames.
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Number of frames the CPU may record ahead of the GPU.
    #[arg(long)]
    pub frames_in_flight: Option<usize>,

    /// Display width in pixels.
    #[arg(long)]
    pub width: Option<u32>,

    /// Display height in pixels.
    #[arg(long)]
    pub height: Option<u32>,

    /// Flip the displayed image vertically.
    #[arg(long)]
    pub flip_y: bool,

    /// Initial processing stage, by name.
    #[arg(long)]
    pub processing: Option<String>,

    /// Initial output image, by name.
    #[arg(long)]
    pub output: Option<String>,

    /// Switch to the next processing stage every N frames.
    #[arg(long)]
    pub switch_every: Option<u64>,

    /// Log filter (e.g. `debug`, `redlilium_denoiser=trace`). Overrides RUST_LOG.
    #[arg(long)]
    pub log_level: Option<String>,
}
