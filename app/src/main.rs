//! RedLilium denoiser demo.
//!
//! Renders a scripted session on the dummy backend and logs the frame
//! structure, swaps and timings.

mod args;
mod config;
mod demo;
mod input;
mod scene;
mod stages;

use std::sync::Arc;

use clap::Parser;
use redlilium_denoiser::{DummyBackend, GpuBackend};

use args::DemoArgs;
use config::{DemoConfig, load_config};

fn init_logging(filter: Option<&str>) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = filter {
        builder.parse_filters(filter);
    }
    builder.init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = DemoArgs::parse();
    init_logging(args.log_level.as_deref());

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => DemoConfig::default(),
    };
    config.apply_args(&args);

    redlilium_denoiser::init();

    let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
    log::info!("Using {}", backend.name());

    demo::run(&config, backend, args.switch_every)?;
    Ok(())
}
