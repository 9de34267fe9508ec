//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. Every submission
//! "executes" at the moment it is submitted, so the backend can check the
//! synchronization protocol eagerly: a wait that is not already satisfied at
//! submission time could never be satisfied, and is reported as
//! [`BackendError::Validation`].
//!
//! All operations are appended to an event log that tests inspect to verify
//! ordering (e.g. that the auxiliary buffer is submitted before the primary
//! one, or that a swap performs exactly one device-wide wait).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::sync::{Semaphore, SemaphoreKind, SemaphoreReference};

use super::{BackendError, BackendResult, GpuBackend, GpuCommandBuffer, GpuFence, GpuSemaphore, SubmitBatch};

/// A semaphore operation as recorded in the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreUse {
    pub semaphore: String,
    /// Counter value for timeline semaphores.
    pub value: Option<u64>,
}

impl SemaphoreUse {
    fn from_reference(reference: &SemaphoreReference) -> Self {
        Self {
            semaphore: reference.semaphore().label().to_string(),
            value: reference.value(),
        }
    }
}

/// One device operation, in the order the dummy device executed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A command buffer started recording.
    Begin { command_buffer: String },
    /// A command buffer was discarded while recording.
    Reset { command_buffer: String },
    /// A command was recorded.
    Command {
        command_buffer: String,
        command: String,
    },
    /// A command buffer was submitted and executed.
    Submit {
        command_buffer: String,
        waits: Vec<SemaphoreUse>,
        signals: Vec<SemaphoreUse>,
    },
    /// Queue signal with no command buffer.
    QueueSignal { signals: Vec<SemaphoreUse> },
    /// Queue wait with no command buffer.
    QueueWait { waits: Vec<SemaphoreUse> },
    /// Timeline semaphore signaled from the host.
    HostSignal { semaphore: String, value: u64 },
    /// Host waited on a timeline semaphore.
    HostWait { semaphore: String, value: u64 },
    /// Host waited on a fence.
    FenceWait,
    /// Device-wide wait.
    WaitIdle,
}

/// Dummy GPU backend.
#[derive(Debug, Default)]
pub struct DummyBackend {
    log: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event recorded so far.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.log.lock().clone()
    }

    /// Drop all recorded events.
    pub fn clear_events(&self) {
        self.log.lock().clear();
    }

    /// Labels of submitted command buffers, in submission order.
    pub fn submissions(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|event| match event {
                DeviceEvent::Submit { command_buffer, .. } => Some(command_buffer.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of device-wide waits performed.
    pub fn wait_idle_count(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|event| matches!(event, DeviceEvent::WaitIdle))
            .count()
    }

    /// Commands recorded into the command buffer named `command_buffer`.
    pub fn command_labels(&self, command_buffer: &str) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|event| match event {
                DeviceEvent::Command {
                    command_buffer: cb,
                    command,
                } if cb == command_buffer => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: DeviceEvent) {
        self.log.lock().push(event);
    }

    /// Check a batch against the current semaphore state without changing it.
    ///
    /// A rejected batch must leave every counter untouched so the caller can
    /// recover (e.g. consume a binary signal through a separate queue wait).
    fn validate_batch(&self, waits: &[SemaphoreReference], signals: &[SemaphoreReference]) -> BackendResult<()> {
        for wait in waits {
            let semaphore = wait.semaphore();
            let current = counter(semaphore)?.load(Ordering::Acquire);
            match wait {
                SemaphoreReference::Binary { .. } => {
                    if current != 1 {
                        return Err(BackendError::Validation(format!(
                            "wait on unsignaled binary semaphore '{}'",
                            semaphore.label()
                        )));
                    }
                }
                SemaphoreReference::Timeline { value: target, .. } => {
                    if current < *target {
                        return Err(BackendError::Validation(format!(
                            "timeline '{}' waited for {} but counter is {}; the wait can never be satisfied",
                            semaphore.label(),
                            target,
                            current
                        )));
                    }
                }
            }
        }

        for signal in signals {
            let semaphore = signal.semaphore();
            let current = counter(semaphore)?.load(Ordering::Acquire);
            // Waits in the same batch execute first and unsignal their semaphores.
            let consumed = waits.iter().any(|wait| {
                matches!(wait, SemaphoreReference::Binary { .. }) && Arc::ptr_eq(wait.semaphore(), semaphore)
            });
            match signal {
                SemaphoreReference::Binary { .. } => {
                    if current != 0 && !consumed {
                        return Err(BackendError::Validation(format!(
                            "binary semaphore '{}' signaled twice without a wait",
                            semaphore.label()
                        )));
                    }
                }
                SemaphoreReference::Timeline { value, .. } => {
                    if *value <= current {
                        return Err(BackendError::Validation(format!(
                            "timeline '{}' signaled with {} but counter is already {}",
                            semaphore.label(),
                            value,
                            current
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Execute a batch that already passed [`Self::validate_batch`].
    fn execute_batch(&self, waits: &[SemaphoreReference], signals: &[SemaphoreReference]) -> BackendResult<()> {
        for wait in waits {
            if let SemaphoreReference::Binary { .. } = wait {
                counter(wait.semaphore())?.store(0, Ordering::Release);
            }
        }
        for signal in signals {
            let value = match signal {
                SemaphoreReference::Binary { .. } => 1,
                SemaphoreReference::Timeline { value, .. } => *value,
            };
            counter(signal.semaphore())?.store(value, Ordering::Release);
        }
        Ok(())
    }

    fn advance_timeline(&self, semaphore: &Semaphore, value: u64) -> BackendResult<()> {
        let counter = counter(semaphore)?;
        let current = counter.load(Ordering::Acquire);
        if value <= current {
            return Err(BackendError::Validation(format!(
                "timeline '{}' signaled with {} but counter is already {}",
                semaphore.label(),
                value,
                current
            )));
        }
        counter.store(value, Ordering::Release);
        Ok(())
    }
}

fn counter(semaphore: &Semaphore) -> BackendResult<&AtomicU64> {
    match semaphore.raw() {
        GpuSemaphore::Dummy { value } => Ok(value),
        #[allow(unreachable_patterns)]
        _ => Err(BackendError::Validation(format!(
            "semaphore '{}' was not created by the dummy backend",
            semaphore.label()
        ))),
    }
}

fn timeline_only(semaphore: &Semaphore) -> BackendResult<()> {
    if semaphore.kind() != SemaphoreKind::Timeline {
        return Err(BackendError::Validation(format!(
            "semaphore '{}' is not a timeline semaphore",
            semaphore.label()
        )));
    }
    Ok(())
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_command_buffer(&self, label: &str) -> BackendResult<GpuCommandBuffer> {
        log::trace!("DummyBackend: creating command buffer {:?}", label);
        Ok(GpuCommandBuffer::Dummy {
            label: label.to_string(),
            recording: AtomicBool::new(false),
            log: Arc::clone(&self.log),
        })
    }

    fn create_semaphore(&self, label: &str, kind: SemaphoreKind) -> BackendResult<GpuSemaphore> {
        log::trace!("DummyBackend: creating {:?} semaphore {:?}", kind, label);
        Ok(GpuSemaphore::Dummy {
            value: AtomicU64::new(0),
        })
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<GpuFence> {
        Ok(GpuFence::Dummy {
            signaled: AtomicBool::new(signaled),
        })
    }

    fn begin_command_buffer(&self, command_buffer: &GpuCommandBuffer) -> BackendResult<()> {
        #[allow(irrefutable_let_patterns)]
        let GpuCommandBuffer::Dummy {
            label, recording, ..
        } = command_buffer
        else {
            return Err(BackendError::Validation(
                "command buffer was not created by the dummy backend".into(),
            ));
        };

        if recording.swap(true, Ordering::AcqRel) {
            return Err(BackendError::Validation(format!(
                "command buffer '{label}' is already recording"
            )));
        }

        log::trace!("DummyBackend: begin {}", label);
        self.push(DeviceEvent::Begin {
            command_buffer: label.clone(),
        });
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: &GpuCommandBuffer) -> BackendResult<()> {
        #[allow(irrefutable_let_patterns)]
        let GpuCommandBuffer::Dummy {
            label, recording, ..
        } = command_buffer
        else {
            return Err(BackendError::Validation(
                "command buffer was not created by the dummy backend".into(),
            ));
        };

        if recording.swap(false, Ordering::AcqRel) {
            log::trace!("DummyBackend: reset {}", label);
            self.push(DeviceEvent::Reset {
                command_buffer: label.clone(),
            });
        }
        Ok(())
    }

    fn submit(&self, batch: &SubmitBatch<'_>) -> BackendResult<()> {
        #[allow(irrefutable_let_patterns)]
        let GpuCommandBuffer::Dummy {
            label, recording, ..
        } = batch.command_buffer
        else {
            return Err(BackendError::Validation(
                "command buffer was not created by the dummy backend".into(),
            ));
        };

        if !recording.load(Ordering::Acquire) {
            return Err(BackendError::Validation(format!(
                "command buffer '{label}' submitted without being recorded"
            )));
        }

        let fence = match batch.fence {
            Some(GpuFence::Dummy { signaled }) => {
                if signaled.load(Ordering::Acquire) {
                    return Err(BackendError::Validation(format!(
                        "submission of '{label}' uses a fence that is still signaled"
                    )));
                }
                Some(signaled)
            }
            #[allow(unreachable_patterns)]
            Some(_) => {
                return Err(BackendError::Validation(
                    "fence was not created by the dummy backend".into(),
                ));
            }
            None => None,
        };
        self.validate_batch(batch.waits, batch.signals)?;

        recording.store(false, Ordering::Release);
        self.execute_batch(batch.waits, batch.signals)?;
        if let Some(signaled) = fence {
            signaled.store(true, Ordering::Release);
        }

        log::trace!(
            "DummyBackend: submit {} ({} waits, {} signals)",
            label,
            batch.waits.len(),
            batch.signals.len()
        );
        self.push(DeviceEvent::Submit {
            command_buffer: label.clone(),
            waits: batch.waits.iter().map(SemaphoreUse::from_reference).collect(),
            signals: batch.signals.iter().map(SemaphoreUse::from_reference).collect(),
        });
        Ok(())
    }

    fn signal_semaphores(&self, signals: &[SemaphoreReference]) -> BackendResult<()> {
        self.validate_batch(&[], signals)?;
        self.execute_batch(&[], signals)?;
        self.push(DeviceEvent::QueueSignal {
            signals: signals.iter().map(SemaphoreUse::from_reference).collect(),
        });
        Ok(())
    }

    fn wait_semaphores(&self, waits: &[SemaphoreReference]) -> BackendResult<()> {
        self.validate_batch(waits, &[])?;
        self.execute_batch(waits, &[])?;
        self.push(DeviceEvent::QueueWait {
            waits: waits.iter().map(SemaphoreUse::from_reference).collect(),
        });
        Ok(())
    }

    fn wait_fence(&self, fence: &GpuFence) -> BackendResult<()> {
        match fence {
            GpuFence::Dummy { signaled } => {
                // Work executes at submission, so an unsignaled fence was never submitted.
                if !signaled.load(Ordering::Acquire) {
                    return Err(BackendError::Validation(
                        "waiting on a fence that was never submitted".into(),
                    ));
                }
                self.push(DeviceEvent::FenceWait);
                Ok(())
            }
            #[allow(unreachable_patterns)]
            _ => Err(BackendError::Validation(
                "fence was not created by the dummy backend".into(),
            )),
        }
    }

    fn reset_fence(&self, fence: &GpuFence) -> BackendResult<()> {
        match fence {
            GpuFence::Dummy { signaled } => {
                signaled.store(false, Ordering::Release);
                Ok(())
            }
            #[allow(unreachable_patterns)]
            _ => Err(BackendError::Validation(
                "fence was not created by the dummy backend".into(),
            )),
        }
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        match fence {
            GpuFence::Dummy { signaled } => signaled.load(Ordering::Acquire),
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }

    fn wait_idle(&self) -> BackendResult<()> {
        log::trace!("DummyBackend: wait idle");
        self.push(DeviceEvent::WaitIdle);
        Ok(())
    }

    fn timeline_value(&self, semaphore: &Semaphore) -> BackendResult<u64> {
        timeline_only(semaphore)?;
        Ok(counter(semaphore)?.load(Ordering::Acquire))
    }

    fn signal_timeline(&self, semaphore: &Semaphore, value: u64) -> BackendResult<()> {
        timeline_only(semaphore)?;
        self.advance_timeline(semaphore, value)?;
        self.push(DeviceEvent::HostSignal {
            semaphore: semaphore.label().to_string(),
            value,
        });
        Ok(())
    }

    fn wait_timeline(&self, semaphore: &Semaphore, value: u64) -> BackendResult<()> {
        timeline_only(semaphore)?;
        let current = counter(semaphore)?.load(Ordering::Acquire);
        if current < value {
            return Err(BackendError::Validation(format!(
                "host wait on timeline '{}' for {} but counter is {} and no work is pending",
                semaphore.label(),
                value,
                current
            )));
        }
        self.push(DeviceEvent::HostWait {
            semaphore: semaphore.label().to_string(),
            value,
        });
        Ok(())
    }
}
