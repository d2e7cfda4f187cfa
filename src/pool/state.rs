//! Backend lifecycle bookkeeping

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Launching,
    Ready,
    /// Consecutive backend faults crossed the threshold; relaunch on next acquisition
    Degraded,
    Relaunching,
    /// The instance died out of band or a relaunch failed
    Disconnected,
    ShutDown,
}

impl BackendState {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendState::Uninitialized => "uninitialized",
            BackendState::Launching => "launching",
            BackendState::Ready => "ready",
            BackendState::Degraded => "degraded",
            BackendState::Relaunching => "relaunching",
            BackendState::Disconnected => "disconnected",
            BackendState::ShutDown => "shut-down",
        }
    }

    /// State to enter while bringing up a replacement instance
    pub fn launching_from(self) -> BackendState {
        match self {
            BackendState::Uninitialized => BackendState::Launching,
            _ => BackendState::Relaunching,
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consecutive-fault tracking behind the pool's state lock
#[derive(Debug)]
pub(crate) struct Health {
    pub state: BackendState,
    pub consecutive_failures: u32,
    pub launches: u64,
}

impl Health {
    pub fn new() -> Self {
        Self {
            state: BackendState::Uninitialized,
            consecutive_failures: 0,
            launches: 0,
        }
    }

    /// Returns true when this fault moved the backend into `Degraded`
    pub fn record_fault(&mut self, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.state == BackendState::Ready && self.consecutive_failures >= threshold {
            self.state = BackendState::Degraded;
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn launched(&mut self) {
        self.state = BackendState::Ready;
        self.consecutive_failures = 0;
        self.launches += 1;
    }
}
