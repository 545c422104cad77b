//! Per-request state machine: `received -> routed -> planned ->
//! executing -> reviewing -> done`, forward-only; `failed` is reachable from any
//! non-terminal state and carries a structured failure reason.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Received,
    Routed,
    Planned,
    Executing,
    Reviewing,
    Done,
    Failed,
}

impl RequestState {
    fn ordinal(self) -> u8 {
        match self {
            RequestState::Received => 0,
            RequestState::Routed => 1,
            RequestState::Planned => 2,
            RequestState::Executing => 3,
            RequestState::Reviewing => 4,
            RequestState::Done => 5,
            RequestState::Failed => 6,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RequestState,
    pub to: RequestState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot transition from {:?} to {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Tracks one request's progress through the pipeline, rejecting any attempt to
/// move backward or past a terminal state.
pub struct RequestLifecycle {
    current: RequestState,
    pub failure_reason: Option<String>,
}

impl Default for RequestLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLifecycle {
    pub fn new() -> Self {
        Self { current: RequestState::Received, failure_reason: None }
    }

    pub fn current(&self) -> RequestState {
        self.current
    }

    pub fn advance(&mut self, to: RequestState) -> Result<(), InvalidTransition> {
        if self.current.is_terminal() {
            return Err(InvalidTransition { from: self.current, to });
        }
        if to == RequestState::Failed || to.ordinal() == self.current.ordinal() + 1 {
            self.current = to;
            Ok(())
        } else {
            Err(InvalidTransition { from: self.current, to })
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.current = RequestState::Failed;
    }
}
