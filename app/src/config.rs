//! Demo configuration loaded from TOML.
//!
//! ```toml
//! [render]
//! frames_in_flight = 2
//! width = 1280
//! height = 720
//! flip_y = false
//! max_frames = 8
//!
//! [processing]
//! initial = "Accumulation Denoiser"
//!
//! [output]
//! initial = "Denoised Image"
//!
//! [[switch]]
//! frame = 3
//! processing = "External Denoiser"
//!
//! [[switch]]
//! frame = 5
//! output = "Rt Output"
//! reset_history = true
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::args::DemoArgs;

/// Top-level demo configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemoConfig {
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub processing: SelectionConfig,
    #[serde(default)]
    pub output: SelectionConfig,
    #[serde(default)]
    pub switch: Vec<SwitchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub flip_y: bool,
    #[serde(default = "default_max_frames")]
    pub max_frames: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: default_frames_in_flight(),
            width: default_width(),
            height: default_height(),
            flip_y: false,
            max_frames: default_max_frames(),
        }
    }
}

fn default_frames_in_flight() -> usize {
    2
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_max_frames() -> u64 {
    8
}

/// Initial selection of a slot, by name. The first candidate when unset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionConfig {
    pub initial: Option<String>,
}

/// A scripted input event, applied before rendering `frame`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchConfig {
    pub frame: u64,
    pub processing: Option<String>,
    pub output: Option<String>,
    /// Camera cut: the active denoiser drops its history.
    #[serde(default)]
    pub reset_history: bool,
    /// New display size as `[width, height]`.
    pub resize: Option<[u32; 2]>,
}

impl SwitchConfig {
    pub fn is_empty(&self) -> bool {
        self.processing.is_none() && self.output.is_none() && !self.reset_history && self.resize.is_none()
    }
}

impl DemoConfig {
    /// Apply command line overrides.
    pub fn apply_args(&mut self, args: &DemoArgs) {
        if let Some(frames_in_flight) = args.frames_in_flight {
            self.render.frames_in_flight = frames_in_flight;
        }
        if let Some(width) = args.width {
            self.render.width = width;
        }
        if let Some(height) = args.height {
            self.render.height = height;
        }
        if let Some(max_frames) = args.max_frames {
            self.render.max_frames = max_frames;
        }
        if args.flip_y {
            self.render.flip_y = true;
        }
        if let Some(processing) = &args.processing {
            self.processing.initial = Some(processing.clone());
        }
        if let Some(output) = &args.output {
            self.output.initial = Some(output.clone());
        }
    }

    /// Scripted switches sorted by frame, without empty entries.
    pub fn switches(&self) -> Vec<SwitchConfig> {
        let mut switches: Vec<_> = self
            .switch
            .iter()
            .filter(|switch| {
                if switch.is_empty() {
                    log::warn!("Ignoring switch at frame {} without any action", switch.frame);
                }
                !switch.is_empty()
            })
            .cloned()
            .collect();
        switches.sort_by_key(|switch| switch.frame);
        switches
    }
}

/// Load a demo config from a TOML file.
///
/// Returns `Err` with a human-readable message if the file cannot be read
/// or parsed.
pub fn load_config(path: &Path) -> Result<DemoConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    parse_config(&content).map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

pub fn parse_config(content: &str) -> Result<DemoConfig, toml::de::Error> {
    toml::from_str(content)
}
