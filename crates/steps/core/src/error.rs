//!
//! # Error Types
//!
//! Error taxonomy shared by every step: the cancellation sentinel, the
//! user-facing [`EmittableError`], the [`AggregateError`] produced by
//! fan-out composites and the fatal process-exit timeout.
//!

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error returned by collaborator ports (container runtime, artifact
/// transfer). Surfaced to callers verbatim through [`StepError::Other`].
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Result of performing a step.
pub type StepResult = Result<(), StepError>;

/// Error returned by [`Step::perform`](crate::Step::perform).
#[derive(Debug, Error)]
pub enum StepError {
    /// Cooperative cancellation completed. Not a fault.
    #[error("cancelled")]
    Cancelled,

    /// A process ignored both terminate and kill.
    #[error("process did not exit")]
    ExitTimeout,

    /// Failure carrying a sanitized, user-facing message.
    #[error(transparent)]
    Emittable(#[from] EmittableError),

    /// Independent failures collected from concurrently executed substeps.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// A member of a codependent group finished while its siblings were running.
    #[error("Codependent step exited")]
    CodependentExited,

    /// Invalid parameters supplied by the constructing caller.
    #[error("invalid step configuration: {0}")]
    Configuration(String),

    /// Raw error from a collaborator.
    #[error(transparent)]
    Other(#[from] BoxError),
}

impl StepError {
    /// Wrap any error (or message) as a raw collaborator failure.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error reports a completed cancellation.
    ///
    /// Opaque errors are inspected along their causal chain, so a
    /// cancellation wrapped by an intermediate layer is still recognized.
    /// User-facing errors are never treated as cancellations.
    pub fn is_cancelled(&self) -> bool {
        match self {
            StepError::Cancelled => true,
            StepError::Other(source) => {
                let mut current: Option<&(dyn StdError + 'static)> = Some(source.as_ref());
                while let Some(err) = current {
                    if let Some(step_err) = err.downcast_ref::<StepError>() {
                        if step_err.is_cancelled() {
                            return true;
                        }
                    }
                    current = err.source();
                }
                false
            }
            _ => false,
        }
    }

    /// The user-facing part of this error, if it carries one.
    pub fn as_emittable(&self) -> Option<&EmittableError> {
        match self {
            StepError::Emittable(err) => Some(err),
            _ => None,
        }
    }
}

/// An error with a sanitized message for users and a separate cause for operators.
///
/// `Display` renders only the message. The message must be chosen by the
/// caller to be safe to show (never a signed URL or similar secret).
#[derive(Debug)]
pub struct EmittableError {
    message: String,
    wrapped: Option<BoxError>,
}

impl EmittableError {
    /// Create a new emittable error with an optional internal cause.
    pub fn new(wrapped: Option<BoxError>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            wrapped,
        }
    }

    /// Create an emittable error with a cause.
    pub fn wrap(wrapped: impl Into<BoxError>, message: impl Into<String>) -> Self {
        Self::new(Some(wrapped.into()), message)
    }

    /// Create an emittable error without a cause.
    pub fn message_only(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// Sanitized message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The internal diagnostic error, for logging.
    pub fn wrapped_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.wrapped.as_deref()
    }
}

impl fmt::Display for EmittableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for EmittableError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.wrapped
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

/// Failures collected from concurrently executed substeps.
///
/// Never contains a cancellation. Renders as the member messages joined
/// with `"; "`.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<StepError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a failure. Cancellations are dropped.
    pub fn push(&mut self, err: StepError) {
        if err.is_cancelled() {
            return;
        }
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[StepError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate as an error.
    pub fn into_result(self) -> StepResult {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(StepError::Aggregate(self))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl StdError for AggregateError {}
