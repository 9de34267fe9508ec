//! Runtime-switchable slots.
//!
//! Both slots keep two indices: `requested`, written by input handling at
//! any time, and `active`, changed only by `apply_pending` at the start of
//! a frame. A slot whose indices differ is in [`SlotState::SwapRequested`].
//!
//! ```text
//!            request(i != active)
//!   Stable ───────────────────────► SwapRequested
//!     ▲                                   │
//!     └──────── apply_pending ────────────┘
//!        wait idle, destroy old, init new
//! ```
//!
//! Swaps are device-synchronous: the caller-provided fence closure waits for
//! all in-flight work before anything is destroyed or redirected.

use crate::error::{DenoiserError, DenoiserResult};
use crate::stage::{DisplayStage, ProcessingStage, StageContext};
use crate::types::ImageHandle;

/// Whether a slot has a pending swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Stable,
    SwapRequested,
}

/// Result of [`ProcessingSlot::apply_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Nothing was pending. No wait, no destroy, no init.
    Unchanged,
    /// The requested stage is now active.
    Swapped {
        from: Option<usize>,
        to: usize,
        external: bool,
    },
    /// The requested stage failed to initialize and the previous stage was
    /// restored.
    RolledBack {
        from: usize,
        attempted: usize,
        reason: String,
    },
}

impl SwapOutcome {
    /// True if the active stage changed or was re-initialized.
    pub fn changed_stage(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

fn check_index(index: usize, len: usize) -> DenoiserResult<()> {
    if index >= len {
        return Err(DenoiserError::InvalidIndex { index, len });
    }
    Ok(())
}

/// Holds the processing-stage candidates and which one is active.
#[derive(Debug)]
pub struct ProcessingSlot {
    candidates: Vec<ProcessingStage>,
    requested: usize,
    active: Option<usize>,
}

impl ProcessingSlot {
    /// Create a slot. Nothing is active until the first
    /// [`apply_pending`](Self::apply_pending).
    pub fn new(candidates: Vec<ProcessingStage>, initial: usize) -> DenoiserResult<Self> {
        if candidates.is_empty() {
            return Err(DenoiserError::InvalidConfiguration(
                "processing slot needs at least one candidate".into(),
            ));
        }
        check_index(initial, candidates.len())?;
        Ok(Self {
            candidates,
            requested: initial,
            active: None,
        })
    }

    /// Latch a swap request. Takes effect at the start of the next frame.
    pub fn request(&mut self, index: usize) -> DenoiserResult<()> {
        check_index(index, self.candidates.len())?;
        if self.requested != index {
            log::debug!(
                "Processing stage '{}' requested",
                self.candidates[index].name()
            );
        }
        self.requested = index;
        Ok(())
    }

    pub fn requested_index(&self) -> usize {
        self.requested
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn state(&self) -> SlotState {
        if self.active == Some(self.requested) {
            SlotState::Stable
        } else {
            SlotState::SwapRequested
        }
    }

    pub fn active(&self) -> Option<&ProcessingStage> {
        self.active.map(|index| &self.candidates[index])
    }

    pub fn active_mut(&mut self) -> Option<&mut ProcessingStage> {
        self.active.map(|index| &mut self.candidates[index])
    }

    /// True if the active stage is external. False when nothing is active.
    pub fn is_external(&self) -> bool {
        self.active().is_some_and(ProcessingStage::is_external)
    }

    /// Candidate names, in index order (for UI lists).
    pub fn labels(&self) -> Vec<&str> {
        self.candidates.iter().map(ProcessingStage::name).collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Resolve a pending swap.
    ///
    /// `fence_all_in_flight_work` is called exactly once, before the outgoing
    /// stage is destroyed, and only if a swap is pending.
    ///
    /// If the requested stage fails to initialize it is destroyed again, the
    /// previous stage is re-initialized and both indices revert to it. When
    /// there is no previous stage, or it cannot be re-initialized either, the
    /// error is returned.
    pub fn apply_pending<F>(
        &mut self,
        ctx: &StageContext<'_>,
        fence_all_in_flight_work: F,
    ) -> DenoiserResult<SwapOutcome>
    where
        F: FnOnce() -> DenoiserResult<()>,
    {
        if self.state() == SlotState::Stable {
            return Ok(SwapOutcome::Unchanged);
        }

        fence_all_in_flight_work()?;

        let previous = self.active;
        let requested = self.requested;

        if let Some(previous) = previous {
            log::debug!("Destroying processing stage '{}'", self.candidates[previous].name());
            self.candidates[previous].destroy();
        }
        self.active = Some(requested);

        let err = match self.candidates[requested].init(ctx) {
            Ok(()) => {
                let incoming = &self.candidates[requested];
                log::info!(
                    "Processing stage switched to '{}' ({})",
                    incoming.name(),
                    if incoming.is_external() { "external" } else { "internal" }
                );
                return Ok(SwapOutcome::Swapped {
                    from: previous,
                    to: requested,
                    external: incoming.is_external(),
                });
            }
            Err(err) => err,
        };

        self.candidates[requested].destroy();

        let Some(previous) = previous else {
            self.active = None;
            return Err(err);
        };

        log::warn!(
            "Processing stage '{}' failed to initialize ({}); restoring '{}'",
            self.candidates[requested].name(),
            err,
            self.candidates[previous].name()
        );

        self.requested = previous;
        self.active = Some(previous);
        if let Err(restore_err) = self.candidates[previous].init(ctx) {
            self.active = None;
            return Err(restore_err);
        }

        Ok(SwapOutcome::RolledBack {
            from: previous,
            attempted: requested,
            reason: err.to_string(),
        })
    }

    /// Destroy the active stage, if any. Used at shutdown.
    pub fn destroy_active(&mut self) {
        if let Some(index) = self.active.take() {
            log::debug!("Destroying processing stage '{}'", self.candidates[index].name());
            self.candidates[index].destroy();
        }
    }
}

/// Holds the images that can be shown and which one is displayed.
#[derive(Debug)]
pub struct OutputSlot {
    candidates: Vec<ImageHandle>,
    requested: usize,
    active: Option<usize>,
}

impl OutputSlot {
    pub fn new(candidates: Vec<ImageHandle>, initial: usize) -> DenoiserResult<Self> {
        if candidates.is_empty() {
            return Err(DenoiserError::InvalidConfiguration(
                "output slot needs at least one image".into(),
            ));
        }
        check_index(initial, candidates.len())?;
        Ok(Self {
            candidates,
            requested: initial,
            active: None,
        })
    }

    /// Latch an output change. Takes effect at the start of the next frame.
    pub fn request(&mut self, index: usize) -> DenoiserResult<()> {
        check_index(index, self.candidates.len())?;
        self.requested = index;
        Ok(())
    }

    pub fn requested_index(&self) -> usize {
        self.requested
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn state(&self) -> SlotState {
        if self.active == Some(self.requested) {
            SlotState::Stable
        } else {
            SlotState::SwapRequested
        }
    }

    pub fn active_image(&self) -> Option<&ImageHandle> {
        self.active.map(|index| &self.candidates[index])
    }

    /// Image names, in index order (for UI lists).
    pub fn labels(&self) -> Vec<&str> {
        self.candidates.iter().map(ImageHandle::name).collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Resolve a pending output change by redirecting `display`.
    ///
    /// Returns `true` if the source changed. Never destroys anything.
    pub fn apply_pending<F>(
        &mut self,
        display: &mut dyn DisplayStage,
        fence_all_in_flight_work: F,
    ) -> DenoiserResult<bool>
    where
        F: FnOnce() -> DenoiserResult<()>,
    {
        if self.state() == SlotState::Stable {
            return Ok(false);
        }

        fence_all_in_flight_work()?;

        let image = self.candidates[self.requested].clone();
        log::info!("Output switched to '{}'", image.name());
        display.set_source(image);
        self.active = Some(self.requested);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::command::CommandBuffer;
    use crate::stage::{FrameRenderInfo, ImageToDisplayStage, Stage};
    use crate::types::Extent2d;

    type CallLog = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: CallLog,
        fail_init: bool,
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
                    reason: "missing shader".into(),
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
    }

    fn slot(log: &CallLog, fail: &[bool]) -> ProcessingSlot {
        let names = ["A", "B", "C"];
        let candidates = fail
            .iter()
            .enumerate()
            .map(|(i, &fail_init)| {
                ProcessingStage::internal(Recorder {
                    name: names[i],
                    log: Rc::clone(log),
                    fail_init,
                })
            })
            .collect();
        ProcessingSlot::new(candidates, 0).unwrap()
    }

    fn with_ctx<R>(f: impl FnOnce(&StageContext<'_>) -> R) -> R {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        f(&StageContext::new(&backend, Extent2d::default()))
    }

    #[test]
    fn test_first_activation() {
        let log = CallLog::default();
        let mut slot = slot(&log, &[false, false]);
        assert_eq!(slot.state(), SlotState::SwapRequested);

        let waits = RefCell::new(0);
        let outcome = with_ctx(|ctx| {
            slot.apply_pending(ctx, || {
                *waits.borrow_mut() += 1;
                Ok(())
            })
        })
        .unwrap();

        assert_eq!(
            outcome,
            SwapOutcome::Swapped {
                from: None,
                to: 0,
                external: false
            }
        );
        assert_eq!(*waits.borrow(), 1);
        assert_eq!(*log.borrow(), vec!["init A"]);
        assert_eq!(slot.state(), SlotState::Stable);
    }

    #[test]
    fn test_request_active_is_noop() {
        let log = CallLog::default();
        let mut slot = slot(&log, &[false, false]);
        with_ctx(|ctx| slot.apply_pending(ctx, || Ok(()))).unwrap();
        log.borrow_mut().clear();

        slot.request(0).unwrap();
        let outcome = with_ctx(|ctx| {
            slot.apply_pending(ctx, || panic!("no wait expected"))
        })
        .unwrap();

        assert_eq!(outcome, SwapOutcome::Unchanged);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_swap_destroys_then_inits() {
        let log = CallLog::default();
        let mut slot = slot(&log, &[false, false]);
        with_ctx(|ctx| slot.apply_pending(ctx, || Ok(()))).unwrap();
        log.borrow_mut().clear();

        slot.request(1).unwrap();
        assert_eq!(slot.state(), SlotState::SwapRequested);
        // Still the old stage until the next frame boundary.
        assert_eq!(slot.active_index(), Some(0));

        let outcome = with_ctx(|ctx| slot.apply_pending(ctx, || Ok(()))).unwrap();
        assert!(matches!(outcome, SwapOutcome::Swapped { from: Some(0), to: 1, .. }));
        assert_eq!(*log.borrow(), vec!["destroy A", "init B"]);
    }

    #[test]
    fn test_request_and_revert_before_frame() {
        let log = CallLog::default();
        let mut slot = slot(&log, &[false, false]);
        with_ctx(|ctx| slot.apply_pending(ctx, || Ok(()))).unwrap();
        log.borrow_mut().clear();

        slot.request(1).unwrap();
        slot.request(0).unwrap();
        let outcome = with_ctx(|ctx| slot.apply_pending(ctx, || Ok(()))).unwrap();
        assert_eq!(outcome, SwapOutcome::Unchanged);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_failed_init_rolls_back() {
        let log = CallLog::default();
        let mut slot = slot(&log, &[false, true]);
        with_ctx(|ctx| slot.apply_pending(ctx, || Ok(()))).unwrap();
        log.borrow_mut().clear();

        slot.request(1).unwrap();
        let outcome = with_ctx(|ctx| slot.apply_pending(ctx, || Ok(()))).unwrap();

        assert!(matches!(
            outcome,
            SwapOutcome::RolledBack { from: 0, attempted: 1, .. }
        ));
        assert_eq!(
            *log.borrow(),
            vec!["destroy A", "init B", "destroy B", "init A"]
        );
        assert_eq!(slot.active_index(), Some(0));
        assert_eq!(slot.requested_index(), 0);
        assert_eq!(slot.state(), SlotState::Stable);
    }

    #[test]
    fn test_failed_first_activation_is_fatal() {
        let log = CallLog::default();
        let mut slot = slot(&log, &[true]);
        let result = with_ctx(|ctx| slot.apply_pending(ctx, || Ok(())));
        assert!(matches!(result, Err(DenoiserError::StageInit { .. })));
        assert_eq!(slot.active_index(), None);
    }

    #[test]
    fn test_fence_error_aborts_swap() {
        let log = CallLog::default();
        let mut slot = slot(&log, &[false]);
        let result = with_ctx(|ctx| {
            slot.apply_pending(ctx, || Err(crate::backend::BackendError::DeviceLost.into()))
        });
        assert!(result.is_err());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_invalid_request() {
        let log = CallLog::default();
        let mut slot = slot(&log, &[false, false]);
        assert_eq!(
            slot.request(2),
            Err(DenoiserError::InvalidIndex { index: 2, len: 2 })
        );
        assert!(ProcessingSlot::new(Vec::new(), 0).is_err());
        assert_eq!(slot.labels(), vec!["A", "B"]);
    }

    #[test]
    fn test_destroy_active() {
        let log = CallLog::default();
        let mut slot = slot(&log, &[false]);
        with_ctx(|ctx| slot.apply_pending(ctx, || Ok(()))).unwrap();
        slot.destroy_active();
        slot.destroy_active();
        assert_eq!(*log.borrow(), vec!["init A", "destroy A"]);
    }

    #[test]
    fn test_output_swap_redirects_source() {
        let denoised = ImageHandle::dummy("Denoised Image", Extent2d::new(4, 4));
        let noisy = ImageHandle::dummy("Rt Output", Extent2d::new(4, 4));
        let mut outputs = OutputSlot::new(vec![denoised.clone(), noisy.clone()], 0).unwrap();
        let mut display = ImageToDisplayStage::new();

        assert!(outputs.apply_pending(&mut display, || Ok(())).unwrap());
        assert_eq!(display.source(), Some(&denoised));

        // Idempotent
        assert!(!outputs.apply_pending(&mut display, || panic!("no wait expected")).unwrap());

        outputs.request(1).unwrap();
        let mut waits = 0;
        assert!(outputs
            .apply_pending(&mut display, || {
                waits += 1;
                Ok(())
            })
            .unwrap());
        assert_eq!(waits, 1);
        assert_eq!(display.source(), Some(&noisy));
        assert_eq!(outputs.labels(), vec!["Denoised Image", "Rt Output"]);
    }
}
