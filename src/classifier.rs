//! Failure classification.
//!
//! The engine never inspects operation errors itself. A
//! [`FailureClassifier`] supplied by the caller tags each failure as
//! transient or permanent, and that single tag drives both the retry
//! decision and whether the failure counts against the circuit breaker.

use crate::outcome::FailureKind;

/// Classifies a typed operation error.
///
/// Any `Fn(&E) -> FailureKind` closure implements this trait, so most
/// callers pass a closure:
///
/// ```rust,ignore
/// let classify = |e: &ApiError| match e {
///     ApiError::RateLimited | ApiError::Io(_) => FailureKind::Transient,
///     _ => FailureKind::Permanent,
/// };
/// composer.execute_with("payments", &classify, || client.charge(&order)).await?;
/// ```
pub trait FailureClassifier<E>: Send + Sync {
    /// Classify one error observed from the protected operation.
    fn classify(&self, error: &E) -> FailureKind;
}

impl<E, F> FailureClassifier<E> for F
where
    F: Fn(&E) -> FailureKind + Send + Sync,
{
    fn classify(&self, error: &E) -> FailureKind {
        self(error)
    }
}

/// Treats every failure as transient. The default when no classifier is
/// supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientByDefault;

impl<E> FailureClassifier<E> for TransientByDefault {
    fn classify(&self, _error: &E) -> FailureKind {
        FailureKind::Transient
    }
}

/// Treats every failure as permanent, disabling retries and breaker
/// accounting for the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermanentByDefault;

impl<E> FailureClassifier<E> for PermanentByDefault {
    fn classify(&self, _error: &E) -> FailureKind {
        FailureKind::Permanent
    }
}
