use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::generation::Generation;

/// Pipeline stages in dependency order.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StageKind {
    Session,
    Application,
    Model,
    Layout,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Session => "session",
            StageKind::Application => "application",
            StageKind::Model => "model",
            StageKind::Layout => "layout",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-local failure. Captured as data and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} stage failed: {message}")]
pub struct StageError {
    pub kind: StageKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: StageKind, cause: impl fmt::Display) -> Self {
        Self {
            kind,
            message: cause.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StagePhase {
    Idle,
    Pending,
    Ready,
    Failed,
}

impl Default for StagePhase {
    fn default() -> Self {
        StagePhase::Idle
    }
}

#[derive(Debug)]
enum StageState<T> {
    Idle,
    Pending,
    Ready { generation: Generation, value: T },
    Failed(StageError),
}

/// One pipeline stage: the input generation it was started for, its
/// current state, and the cancellation scope of its in-flight work.
#[derive(Debug)]
pub(crate) struct Stage<T> {
    kind: StageKind,
    input: Option<Generation>,
    state: StageState<T>,
    cancel: Option<CancellationToken>,
    invalidations: u64,
}

impl<T: Clone> Stage<T> {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            input: None,
            state: StageState::Idle,
            cancel: None,
            invalidations: 0,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn input(&self) -> Option<Generation> {
        self.input
    }

    /// True when the stage has not yet been started for `upstream`.
    pub fn needs_start(&self, upstream: Generation) -> bool {
        self.input != Some(upstream)
    }

    /// Marks the stage pending for `upstream` and returns the token that
    /// scopes the work started for it.
    pub fn start(&mut self, upstream: Generation) -> CancellationToken {
        let token = CancellationToken::new();
        self.input = Some(upstream);
        self.state = StageState::Pending;
        self.cancel = Some(token.clone());
        token
    }

    /// True when a one-shot result tagged `tag` still belongs to this stage.
    pub fn awaits(&self, tag: Generation) -> bool {
        self.input == Some(tag) && matches!(self.state, StageState::Pending)
    }

    /// Like [`Stage::awaits`] but also accepts follow-up values once ready.
    pub fn accepts_update(&self, tag: Generation) -> bool {
        self.input == Some(tag) && matches!(self.state, StageState::Pending | StageState::Ready { .. })
    }

    pub fn complete(&mut self, generation: Generation, value: T) {
        self.state = StageState::Ready { generation, value };
    }

    pub fn fail(&mut self, error: StageError) {
        self.state = StageState::Failed(error);
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }

    /// Drops state and cancels in-flight work. Returns whether anything was
    /// invalidated.
    pub fn reset(&mut self) -> bool {
        let active = self.input.is_some() || !matches!(self.state, StageState::Idle);
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.input = None;
        self.state = StageState::Idle;
        if active {
            self.invalidations += 1;
        }
        active
    }

    pub fn ready(&self) -> Option<(Generation, T)> {
        match &self.state {
            StageState::Ready { generation, value } => Some((*generation, value.clone())),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match &self.state {
            StageState::Ready { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match &self.state {
            StageState::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn phase(&self) -> StagePhase {
        match self.state {
            StageState::Idle => StagePhase::Idle,
            StageState::Pending => StagePhase::Pending,
            StageState::Ready { .. } => StagePhase::Ready,
            StageState::Failed(_) => StagePhase::Failed,
        }
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::generation::GenerationClock;

    #[test]
    fn stage_only_accepts_results_for_its_current_input() {
        let mut clock = GenerationClock::new();
        let first = clock.next();
        let second = clock.next();
        let mut stage: Stage<&str> = Stage::new(StageKind::Session);

        assert!(stage.needs_start(first));
        let token = stage.start(first);
        assert!(!stage.needs_start(first));
        assert!(stage.awaits(first));

        assert!(stage.reset());
        assert!(token.is_cancelled());
        stage.start(second);
        assert!(!stage.awaits(first));
        assert!(stage.awaits(second));

        stage.complete(clock.next(), "ready");
        assert!(!stage.awaits(second));
        assert!(stage.accepts_update(second));
        assert_eq!(stage.value(), Some(&"ready"));
        assert_eq!(stage.invalidations(), 1);
    }

    #[test]
    fn failure_is_kept_until_reset() {
        let mut clock = GenerationClock::new();
        let input = clock.next();
        let mut stage: Stage<u8> = Stage::new(StageKind::Model);
        let token = stage.start(input);

        stage.fail(StageError::new(StageKind::Model, "boom"));
        assert!(token.is_cancelled());
        assert_eq!(stage.phase(), StagePhase::Failed);
        assert!(!stage.needs_start(input));
        assert_eq!(
            stage.error().map(ToString::to_string),
            Some("model stage failed: boom".to_string())
        );

        assert!(stage.reset());
        assert!(!stage.reset());
        assert_eq!(stage.invalidations(), 1);
    }
}
