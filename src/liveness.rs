//! Process liveness flag shared by `/healthz` and the lifecycle controller.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Liveness phases, ordered by how far the process has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LivenessPhase {
    Starting = 0,
    Ready = 1,
    ShuttingDown = 2,
}

impl LivenessPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Ready,
            _ => Self::ShuttingDown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
        }
    }
}

impl fmt::Display for LivenessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable handle to the process liveness cell.
///
/// Phases only move forward: once shutting down, `set(Ready)` is ignored.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    phase: Arc<AtomicU8>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to `phase`. Returns the phase in effect afterwards.
    pub fn set(&self, phase: LivenessPhase) -> LivenessPhase {
        let previous = self.phase.fetch_max(phase as u8, Ordering::SeqCst);
        LivenessPhase::from_u8(previous.max(phase as u8))
    }

    pub fn get(&self) -> LivenessPhase {
        LivenessPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_ready(&self) -> bool {
        self.get() == LivenessPhase::Ready
    }
}
