//! Scripted input.
//!
//! Maps named switches from the config file and `--switch-every` onto
//! orchestrator requests. Names are resolved against the slot labels, so
//! a typo fails loudly instead of selecting the wrong stage.

use std::collections::BTreeMap;

use redlilium_denoiser::{DenoiserError, DenoiserResult, Extent2d, FrameOrchestrator};

use crate::config::SwitchConfig;

/// An input action applied between frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    SelectProcessing(String),
    SelectOutput(String),
    /// Cycle to the next processing stage.
    NextProcessing,
    /// Camera switch: the active denoiser drops its history.
    CameraCut,
    Resize(Extent2d),
}

/// Position of `name` among `labels`.
pub fn index_of(labels: &[&str], name: &str) -> DenoiserResult<usize> {
    labels.iter().position(|label| *label == name).ok_or_else(|| {
        DenoiserError::InvalidConfiguration(format!(
            "unknown name '{}', expected one of: {}",
            name,
            labels.join(", ")
        ))
    })
}

/// Apply one event to the orchestrator.
pub fn apply(orchestrator: &mut FrameOrchestrator, event: &InputEvent) -> DenoiserResult<()> {
    match event {
        InputEvent::SelectProcessing(name) => {
            let index = index_of(&orchestrator.processing_slot().labels(), name)?;
            log::info!("Requesting processing stage '{}'", name);
            orchestrator.request_processing(index)
        }
        InputEvent::SelectOutput(name) => {
            let index = index_of(&orchestrator.output_slot().labels(), name)?;
            log::info!("Requesting output '{}'", name);
            orchestrator.request_output(index)
        }
        InputEvent::NextProcessing => {
            let slot = orchestrator.processing_slot();
            let next = (slot.requested_index() + 1) % slot.len();
            orchestrator.request_processing(next)
        }
        InputEvent::CameraCut => {
            orchestrator.reset_processing_history();
            Ok(())
        }
        InputEvent::Resize(extent) => orchestrator.resize(*extent),
    }
}

/// Events keyed by the frame they are applied before.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    events: BTreeMap<u64, Vec<InputEvent>>,
    switch_every: Option<u64>,
}

impl ScriptedInput {
    pub fn new(switches: &[SwitchConfig], switch_every: Option<u64>) -> Self {
        let mut events: BTreeMap<u64, Vec<InputEvent>> = BTreeMap::new();
        for switch in switches {
            let frame_events = events.entry(switch.frame).or_default();
            if let Some([width, height]) = switch.resize {
                frame_events.push(InputEvent::Resize(Extent2d::new(width, height)));
            }
            if let Some(processing) = &switch.processing {
                frame_events.push(InputEvent::SelectProcessing(processing.clone()));
            }
            if let Some(output) = &switch.output {
                frame_events.push(InputEvent::SelectOutput(output.clone()));
            }
            if switch.reset_history {
                frame_events.push(InputEvent::CameraCut);
            }
        }

        Self {
            events,
            switch_every: switch_every.filter(|every| *every > 0),
        }
    }

    /// Events to apply before rendering `frame`.
    pub fn events_for(&self, frame: u64) -> Vec<InputEvent> {
        let mut events = self.events.get(&frame).cloned().unwrap_or_default();
        if let Some(every) = self.switch_every
            && frame > 0
            && frame % every == 0
        {
            events.push(InputEvent::NextProcessing);
        }
        events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.switch_every.is_none()
    }
}
