//! Synchronization primitives shared between the primary queue and an
//! external execution domain.
//!
//! Two kinds of semaphore are used per frame:
//!
//! | Kind | Signaled by | Waited by |
//! |------|-------------|-----------|
//! | Binary `image_ready` | display target acquire | primary buffer (color output) |
//! | Binary `render_finished` | primary buffer | present |
//! | Timeline `processing_complete` | auxiliary buffer / external domain | external domain / primary buffer |
//!
//! The timeline counter is driven by [`TimelinePair::for_frame`]:
//!
//! ```text
//! frame f:  aux submit ──signal 2f+1──► external dispatch ──signal 2f+2──► primary waits 2f+2
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{BackendResult, GpuBackend, GpuSemaphore};
use crate::types::PipelineStages;

static NEXT_SEMAPHORE_ID: AtomicU64 = AtomicU64::new(1);

/// Binary or timeline semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemaphoreKind {
    /// Signaled once, consumed by one wait.
    Binary,
    /// Monotonically increasing 64-bit counter.
    Timeline,
}

/// A GPU semaphore owned by the orchestrator.
///
/// Shared as `Arc<Semaphore>` between the frame pool, the processing stage
/// configuration and [`SemaphoreReference`]s.
pub struct Semaphore {
    id: u64,
    label: String,
    kind: SemaphoreKind,
    raw: GpuSemaphore,
}

impl Semaphore {
    /// Create a semaphore on `backend`. Timeline semaphores start at 0.
    pub fn new(
        backend: &dyn GpuBackend,
        label: impl Into<String>,
        kind: SemaphoreKind,
    ) -> BackendResult<Arc<Self>> {
        let label = label.into();
        let raw = backend.create_semaphore(&label, kind)?;
        Ok(Arc::new(Self {
            id: NEXT_SEMAPHORE_ID.fetch_add(1, Ordering::Relaxed),
            label,
            kind,
            raw,
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    pub fn raw(&self) -> &GpuSemaphore {
        &self.raw
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// One entry of a command buffer's wait or signal list.
#[derive(Debug, Clone)]
pub enum SemaphoreReference {
    /// A binary semaphore waited at `stages` (ignored when signaling).
    Binary {
        semaphore: Arc<Semaphore>,
        stages: PipelineStages,
    },
    /// A timeline semaphore at a specific counter value.
    Timeline {
        semaphore: Arc<Semaphore>,
        value: u64,
    },
}

impl SemaphoreReference {
    pub fn binary(semaphore: Arc<Semaphore>, stages: PipelineStages) -> Self {
        debug_assert_eq!(semaphore.kind(), SemaphoreKind::Binary);
        Self::Binary { semaphore, stages }
    }

    pub fn timeline(semaphore: Arc<Semaphore>, value: u64) -> Self {
        debug_assert_eq!(semaphore.kind(), SemaphoreKind::Timeline);
        Self::Timeline { semaphore, value }
    }

    pub fn semaphore(&self) -> &Arc<Semaphore> {
        match self {
            Self::Binary { semaphore, .. } | Self::Timeline { semaphore, .. } => semaphore,
        }
    }

    /// Counter value for timeline references, `None` for binary ones.
    pub fn value(&self) -> Option<u64> {
        match self {
            Self::Binary { .. } => None,
            Self::Timeline { value, .. } => Some(*value),
        }
    }

    /// Stages blocked by a wait on this reference.
    ///
    /// Timeline waits block all commands of the submission.
    pub fn stages(&self) -> PipelineStages {
        match self {
            Self::Binary { stages, .. } => *stages,
            Self::Timeline { .. } => PipelineStages::ALL_COMMANDS,
        }
    }

    pub fn is_timeline(&self) -> bool {
        matches!(self, Self::Timeline { .. })
    }

    /// True if this reference points at `semaphore`.
    pub fn refers_to(&self, semaphore: &Semaphore) -> bool {
        self.semaphore().id() == semaphore.id()
    }

    /// Update the counter value of a timeline reference.
    ///
    /// Returns `false` (and changes nothing) for binary references.
    pub fn set_value(&mut self, new_value: u64) -> bool {
        match self {
            Self::Binary { .. } => false,
            Self::Timeline { value, .. } => {
                *value = new_value;
                true
            }
        }
    }
}

/// Timeline counter values used by one frame.
///
/// The auxiliary buffer signals `signal`; the external domain waits for
/// `signal` and then signals `wait`; the primary buffer waits for `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimelinePair {
    pub signal: u64,
    pub wait: u64,
}

impl TimelinePair {
    /// Values for frame number `frame`: `(2f + 1, 2f + 2)`.
    ///
    /// Pairs of different frames never overlap and increase with the frame
    /// number, so the counter stays monotonic across frames and across
    /// processing stage swaps.
    pub const fn for_frame(frame: u64) -> Self {
        Self {
            signal: 2 * frame + 1,
            wait: 2 * frame + 2,
        }
    }
}
