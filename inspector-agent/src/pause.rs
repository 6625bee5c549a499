//! State machine behind "run message loop on pause".

use std::cell::Cell;

/// Execution state seen by the control thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    Running,
    Paused,
}

/// Tracks whether the control thread is parked in the nested message loop
/// and whether a resume has been requested.
///
/// Lives on the control thread only; the IO thread influences it solely by
/// posting tasks that end up calling `quit`.
#[derive(Debug)]
pub struct PauseController {
    state: Cell<PauseState>,
    quit_requested: Cell<bool>,
}

impl PauseController {
    pub fn new() -> Self {
        PauseController {
            state: Cell::new(PauseState::Running),
            quit_requested: Cell::new(false),
        }
    }

    pub fn state(&self) -> PauseState {
        self.state.get()
    }

    pub fn is_paused(&self) -> bool {
        self.state.get() == PauseState::Paused
    }

    /// Running -> Paused. False (and no change) if already paused.
    pub fn enter(&self) -> bool {
        if self.is_paused() {
            return false;
        }
        self.quit_requested.set(false);
        self.state.set(PauseState::Paused);
        true
    }

    /// Ask the nested loop to return. Ignored while running.
    pub fn quit(&self) {
        if self.is_paused() {
            self.quit_requested.set(true);
        }
    }

    /// Observe and clear a pending quit
    pub fn take_quit(&self) -> bool {
        self.quit_requested.replace(false)
    }

    /// Paused -> Running
    pub fn leave(&self) {
        self.quit_requested.set(false);
        self.state.set(PauseState::Running);
    }
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}
