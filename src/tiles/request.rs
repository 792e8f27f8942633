//! Asynchronous render requests and their results

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, TryRecvError};

use super::types::Clip;

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Cooperative cancellation flag shared between a caller and a request.
///
/// Clones observe the same flag. Cancelling never interrupts a producer call
/// already running; the request notices at its next checkpoint.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// How an asynchronous render ended
#[derive(Clone, Debug)]
pub enum RenderOutcome {
    Ready(Clip),
    Cancelled,
}

impl RenderOutcome {
    #[must_use]
    pub fn clip(&self) -> Option<&Clip> {
        match self {
            Self::Ready(clip) => Some(clip),
            Self::Cancelled => None,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors from finishing an asynchronous render
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("render {id:?}: {reason}")]
    InvalidState { id: RequestId, reason: &'static str },

    #[error("render {0:?} was cancelled")]
    Cancelled(RequestId),
}

#[derive(Debug)]
enum Slot {
    Waiting,
    Arrived(RenderOutcome),
    Finished,
}

/// Handle on an in-flight asynchronous render.
///
/// The outcome is delivered over a one-shot channel and taken exactly once by
/// [`TilePool::render_finish`](super::TilePool::render_finish).
#[derive(Debug)]
pub struct PendingRender {
    id: RequestId,
    rx: Receiver<RenderOutcome>,
    slot: Slot,
}

impl PendingRender {
    pub(crate) fn new(id: RequestId, rx: Receiver<RenderOutcome>) -> Self {
        Self {
            id,
            rx,
            slot: Slot::Waiting,
        }
    }

    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// True once the outcome has arrived (or was already taken)
    pub fn is_complete(&mut self) -> bool {
        self.poll();
        !matches!(self.slot, Slot::Waiting)
    }

    /// Block until the outcome arrives
    pub fn wait(&mut self) {
        if let Slot::Waiting = self.slot {
            // A dropped sender means the job never ran
            let outcome = self.rx.recv().unwrap_or(RenderOutcome::Cancelled);
            self.slot = Slot::Arrived(outcome);
        }
    }

    /// Block until the outcome arrives or `timeout` passes. Returns whether
    /// the render is complete.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        if let Slot::Waiting = self.slot {
            match self.rx.recv_timeout(timeout) {
                Ok(outcome) => self.slot = Slot::Arrived(outcome),
                Err(RecvTimeoutError::Disconnected) => {
                    self.slot = Slot::Arrived(RenderOutcome::Cancelled);
                }
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
        true
    }

    /// Take the outcome, leaving the handle spent
    pub(crate) fn finish(&mut self) -> Result<Clip, RenderError> {
        self.poll();
        match std::mem::replace(&mut self.slot, Slot::Finished) {
            Slot::Waiting => {
                self.slot = Slot::Waiting;
                Err(RenderError::InvalidState {
                    id: self.id,
                    reason: "render has not completed",
                })
            }
            Slot::Finished => Err(RenderError::InvalidState {
                id: self.id,
                reason: "render result was already taken",
            }),
            Slot::Arrived(RenderOutcome::Ready(clip)) => Ok(clip),
            Slot::Arrived(RenderOutcome::Cancelled) => Err(RenderError::Cancelled(self.id)),
        }
    }

    fn poll(&mut self) {
        if let Slot::Waiting = self.slot {
            match self.rx.try_recv() {
                Ok(outcome) => self.slot = Slot::Arrived(outcome),
                Err(TryRecvError::Disconnected) => {
                    self.slot = Slot::Arrived(RenderOutcome::Cancelled);
                }
                Err(TryRecvError::Empty) => {}
            }
        }
    }
}
