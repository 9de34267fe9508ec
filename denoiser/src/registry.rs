//! Fixed set of non-switchable stages.
//!
//! The registry is assembled once with [`StageRegistryBuilder`] and has no
//! way to add or remove stages afterwards. Recording order is:
//!
//! ```text
//! upstream[0] .. upstream[n]  ──►  (processing slot)  ──►  display copy  ──►  overlay[0] .. overlay[m]
//! ```

use std::collections::HashSet;

use crate::command::CommandBuffer;
use crate::error::{DenoiserError, DenoiserResult};
use crate::stage::{DisplayStage, FrameRenderInfo, Stage, StageContext};
use crate::types::{Extent2d, ImageHandle};

/// Builder for [`StageRegistry`].
#[derive(Default)]
pub struct StageRegistryBuilder {
    upstream: Vec<Box<dyn Stage>>,
    display: Option<Box<dyn DisplayStage>>,
    overlays: Vec<Box<dyn Stage>>,
}

impl StageRegistryBuilder {
    /// Add a stage recorded before the processing slot (e.g. G-buffer, ray tracing).
    pub fn upstream(mut self, stage: impl Stage + 'static) -> Self {
        self.upstream.push(Box::new(stage));
        self
    }

    /// Set the display-copy stage.
    pub fn display(mut self, stage: impl DisplayStage + 'static) -> Self {
        self.display = Some(Box::new(stage));
        self
    }

    /// Add a stage recorded after the display copy (e.g. UI).
    pub fn overlay(mut self, stage: impl Stage + 'static) -> Self {
        self.overlays.push(Box::new(stage));
        self
    }

    pub fn build(self) -> DenoiserResult<StageRegistry> {
        let display = self.display.ok_or_else(|| {
            DenoiserError::InvalidConfiguration("stage registry needs a display stage".into())
        })?;

        let mut names = HashSet::new();
        let all_names = self
            .upstream
            .iter()
            .map(|stage| stage.name())
            .chain(std::iter::once(display.name()))
            .chain(self.overlays.iter().map(|stage| stage.name()));
        for name in all_names {
            if !names.insert(name.to_string()) {
                return Err(DenoiserError::InvalidConfiguration(format!(
                    "duplicate stage name '{name}'"
                )));
            }
        }

        Ok(StageRegistry {
            upstream: self.upstream,
            display,
            overlays: self.overlays,
            initialized: 0,
        })
    }
}

/// Ordered stages that are initialized and destroyed together.
pub struct StageRegistry {
    upstream: Vec<Box<dyn Stage>>,
    display: Box<dyn DisplayStage>,
    overlays: Vec<Box<dyn Stage>>,
    /// Number of stages (in order) currently initialized.
    initialized: usize,
}

impl StageRegistry {
    pub fn builder() -> StageRegistryBuilder {
        StageRegistryBuilder::default()
    }

    /// Total number of stages.
    pub fn len(&self) -> usize {
        self.upstream.len() + 1 + self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized == self.len()
    }

    /// Stage names in recording order.
    pub fn names(&self) -> Vec<&str> {
        self.upstream
            .iter()
            .map(|stage| stage.name())
            .chain(std::iter::once(self.display.name()))
            .chain(self.overlays.iter().map(|stage| stage.name()))
            .collect()
    }

    fn entry_mut(&mut self, index: usize) -> EntryMut<'_> {
        let upstream = self.upstream.len();
        if index < upstream {
            EntryMut::Stage(self.upstream[index].as_mut())
        } else if index == upstream {
            EntryMut::Display(self.display.as_mut())
        } else {
            EntryMut::Stage(self.overlays[index - upstream - 1].as_mut())
        }
    }

    /// Initialize every stage in order.
    ///
    /// On failure the stages initialized so far are destroyed in reverse
    /// order and the error is returned.
    pub fn init_all(&mut self, ctx: &StageContext<'_>) -> DenoiserResult<()> {
        while self.initialized < self.len() {
            let index = self.initialized;
            let mut stage = self.entry_mut(index);
            log::debug!("Initializing stage '{}'", stage.name());
            if let Err(err) = stage.init(ctx) {
                log::warn!("Stage '{}' failed to initialize: {}", stage.name(), err);
                // The failing stage may hold partial resources.
                stage.destroy();
                self.destroy_all();
                return Err(err);
            }
            self.initialized += 1;
        }
        Ok(())
    }

    /// Destroy every initialized stage in reverse order.
    pub fn destroy_all(&mut self) {
        while self.initialized > 0 {
            self.initialized -= 1;
            let mut stage = self.entry_mut(self.initialized);
            log::debug!("Destroying stage '{}'", stage.name());
            stage.destroy();
        }
    }

    /// Forward a resize to every stage.
    pub fn resize_all(&mut self, extent: Extent2d) {
        for index in 0..self.len() {
            self.entry_mut(index).on_resized(extent);
        }
    }

    /// Resolve a named image output of a named stage.
    pub fn output(&self, stage: &str, output: &str) -> DenoiserResult<ImageHandle> {
        let image = if self.display.name() == stage {
            self.display.image_output(output)
        } else {
            self.upstream
                .iter()
                .chain(self.overlays.iter())
                .find(|candidate| candidate.name() == stage)
                .ok_or_else(|| {
                    DenoiserError::InvalidConfiguration(format!("no stage named '{stage}'"))
                })?
                .image_output(output)
        };

        image.ok_or_else(|| DenoiserError::MissingImage {
            stage: stage.to_string(),
            output: output.to_string(),
        })
    }

    /// Record the upstream stages in registration order.
    pub fn record_upstream(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        for stage in &mut self.upstream {
            stage.record_frame(cmd, info)?;
        }
        Ok(())
    }

    /// Record the display copy followed by the overlays.
    pub fn record_downstream(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        self.display.record_frame(cmd, info)?;
        for stage in &mut self.overlays {
            stage.record_frame(cmd, info)?;
        }
        Ok(())
    }

    pub fn display(&self) -> &dyn DisplayStage {
        self.display.as_ref()
    }

    pub fn display_mut(&mut self) -> &mut dyn DisplayStage {
        self.display.as_mut()
    }
}

/// Mutable access to a registered stage without trait object upcasting.
enum EntryMut<'a> {
    Stage(&'a mut dyn Stage),
    Display(&'a mut dyn DisplayStage),
}

impl EntryMut<'_> {
    fn name(&self) -> &str {
        match self {
            Self::Stage(stage) => stage.name(),
            Self::Display(stage) => stage.name(),
        }
    }

    fn init(&mut self, ctx: &StageContext<'_>) -> DenoiserResult<()> {
        match self {
            Self::Stage(stage) => stage.init(ctx),
            Self::Display(stage) => stage.init(ctx),
        }
    }

    fn destroy(&mut self) {
        match self {
            Self::Stage(stage) => stage.destroy(),
            Self::Display(stage) => stage.destroy(),
        }
    }

    fn on_resized(&mut self, extent: Extent2d) {
        match self {
            Self::Stage(stage) => stage.on_resized(extent),
            Self::Display(stage) => stage.on_resized(extent),
        }
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.names())
            .field("initialized", &self.initialized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::stage::ImageToDisplayStage;

    type CallLog = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: CallLog,
        fail_init: bool,
        output: Option<ImageHandle>,
    }

    impl Recorder {
        fn new(name: &'static str, log: &CallLog) -> Self {
            Self {
                name,
                log: Rc::clone(log),
                fail_init: false,
                output: None,
            }
        }
    }

    impl Stage for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn init(&mut self, _ctx: &StageContext<'_>) -> DenoiserResult<()> {
            self.log.borrow_mut().push(format!("init {}", self.name));
            if self.fail_init {
                return Err(DenoiserError::StageInit {
                    stage: self.name.into(),
                    reason: "boom".into(),
                });
            }
            Ok(())
        }
        fn destroy(&mut self) {
            self.log.borrow_mut().push(format!("destroy {}", self.name));
        }
        fn record_frame(&mut self, _cmd: &mut CommandBuffer, _info: &FrameRenderInfo) -> DenoiserResult<()> {
            Ok(())
        }
        fn image_output(&self, name: &str) -> Option<ImageHandle> {
            self.output.clone().filter(|image| image.name() == name)
        }
        fn on_resized(&mut self, extent: Extent2d) {
            self.log.borrow_mut().push(format!("resize {} {}", self.name, extent));
        }
    }

    fn ctx_backend() -> Arc<dyn GpuBackend> {
        Arc::new(DummyBackend::new())
    }

    #[test]
    fn test_build_requires_display() {
        let log = CallLog::default();
        let result = StageRegistry::builder()
            .upstream(Recorder::new("gbuffer", &log))
            .build();
        assert!(matches!(result, Err(DenoiserError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_build_rejects_duplicate_names() {
        let log = CallLog::default();
        let result = StageRegistry::builder()
            .upstream(Recorder::new("gbuffer", &log))
            .upstream(Recorder::new("gbuffer", &log))
            .display(ImageToDisplayStage::new())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_init_and_destroy_order() {
        let log = CallLog::default();
        let mut registry = StageRegistry::builder()
            .upstream(Recorder::new("gbuffer", &log))
            .upstream(Recorder::new("raytracing", &log))
            .display(ImageToDisplayStage::new())
            .overlay(Recorder::new("imgui", &log))
            .build()
            .unwrap();

        assert_eq!(
            registry.names(),
            vec!["gbuffer", "raytracing", "Image To Display", "imgui"]
        );

        let backend = ctx_backend();
        registry.init_all(&StageContext::new(&backend, Extent2d::default())).unwrap();
        assert!(registry.is_initialized());
        registry.destroy_all();
        registry.destroy_all();

        assert_eq!(
            *log.borrow(),
            vec![
                "init gbuffer",
                "init raytracing",
                "init imgui",
                "destroy imgui",
                "destroy raytracing",
                "destroy gbuffer",
            ]
        );
    }

    #[test]
    fn test_failed_init_unwinds() {
        let log = CallLog::default();
        let mut failing = Recorder::new("raytracing", &log);
        failing.fail_init = true;
        let mut registry = StageRegistry::builder()
            .upstream(Recorder::new("gbuffer", &log))
            .upstream(failing)
            .display(ImageToDisplayStage::new())
            .build()
            .unwrap();

        let backend = ctx_backend();
        let result = registry.init_all(&StageContext::new(&backend, Extent2d::default()));
        assert!(result.is_err());
        assert!(!registry.is_initialized());
        assert_eq!(
            *log.borrow(),
            vec![
                "init gbuffer",
                "init raytracing",
                "destroy raytracing",
                "destroy gbuffer"
            ]
        );
    }

    #[test]
    fn test_output_lookup() {
        let log = CallLog::default();
        let mut rt = Recorder::new("raytracing", &log);
        rt.output = Some(ImageHandle::dummy("Rt Output", Extent2d::new(4, 4)));
        let registry = StageRegistry::builder()
            .upstream(rt)
            .display(ImageToDisplayStage::new())
            .build()
            .unwrap();

        assert_eq!(
            registry.output("raytracing", "Rt Output").unwrap().name(),
            "Rt Output"
        );
        assert!(matches!(
            registry.output("raytracing", "Albedo"),
            Err(DenoiserError::MissingImage { .. })
        ));
        assert!(registry.output("gbuffer", "Albedo").is_err());
    }

    #[test]
    fn test_resize_all() {
        let log = CallLog::default();
        let mut registry = StageRegistry::builder()
            .upstream(Recorder::new("gbuffer", &log))
            .display(ImageToDisplayStage::new())
            .build()
            .unwrap();
        registry.resize_all(Extent2d::new(640, 480));
        assert_eq!(*log.borrow(), vec!["resize gbuffer 640x480"]);
    }
}
