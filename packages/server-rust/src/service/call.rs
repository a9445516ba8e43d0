//! The unit of work flowing through the pipeline and its error type.

use std::future::Future;
use std::pin::Pin;

use ringfence_core::{
    CallContext, CallInfo, Code, Outcome, Rejection, Status, ValidationError,
};
use tower::util::BoxCloneService;

/// Boxed future returned by every pipeline service.
pub type CallFuture<Resp> = Pin<Box<dyn Future<Output = Result<Resp, CallError>> + Send>>;

/// Type-erased, cloneable pipeline service.
pub type BoxCallService<Req, Resp> = BoxCloneService<UnaryCall<Req>, Resp, CallError>;

/// A single unary call: context, static call info and the request payload.
#[derive(Debug, Clone)]
pub struct UnaryCall<Req> {
    pub ctx: CallContext,
    pub info: CallInfo,
    pub request: Req,
}

impl<Req> UnaryCall<Req> {
    #[must_use]
    pub fn new(ctx: CallContext, request: Req, info: CallInfo) -> Self {
        Self { ctx, info, request }
    }
}

// ---------------------------------------------------------------------------
// CallError
// ---------------------------------------------------------------------------

/// Errors a call can finish with.
///
/// Short-circuiting units return their own variant; observing units pass
/// whatever they receive through untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
    #[error("too many requests")]
    RateLimited,
    #[error("service unavailable: {0}")]
    CircuitOpen(#[from] Rejection),
    #[error(transparent)]
    Handler(#[from] Status),
    #[error("unknown method: {method}")]
    Unimplemented { method: String },
}

/// What a caller may reasonably do after a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAdvice {
    /// Transient rejection; the same request may succeed later.
    RetryLater,
    /// The request itself is wrong; retrying unchanged is pointless.
    FixRequest,
    /// The handler failed; only the handler's own code can tell.
    Opaque,
}

impl CallError {
    /// Wire-level status code for this error.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::ValidationFailed(_) => Code::InvalidArgument,
            Self::RateLimited => Code::ResourceExhausted,
            Self::CircuitOpen(_) => Code::Unavailable,
            Self::Handler(status) => status.code,
            Self::Unimplemented { .. } => Code::Unimplemented,
        }
    }

    /// Short machine-readable kind, used in span tags and log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "validation_failed",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Handler(_) => "handler",
            Self::Unimplemented { .. } => "unimplemented",
        }
    }

    /// Converts to the status sent to a remote caller.
    #[must_use]
    pub fn to_status(&self) -> Status {
        match self {
            Self::Handler(status) => status.clone(),
            Self::RateLimited => Status::resource_exhausted("too many requests"),
            Self::CircuitOpen(_) => Status::unavailable("service unavailable"),
            Self::ValidationFailed(err) => Status::invalid_argument(err.to_string()),
            Self::Unimplemented { method } => {
                Status::unimplemented(format!("unknown method {method}"))
            }
        }
    }

    #[must_use]
    pub fn retry_advice(&self) -> RetryAdvice {
        match self {
            Self::RateLimited | Self::CircuitOpen(_) => RetryAdvice::RetryLater,
            Self::ValidationFailed(_) | Self::Unimplemented { .. } => RetryAdvice::FixRequest,
            Self::Handler(_) => RetryAdvice::Opaque,
        }
    }

    /// Whether the error reflects the health of the protected dependency.
    ///
    /// Only handler failures do; rejections produced by the pipeline itself
    /// say nothing about the handler.
    #[must_use]
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::Handler(_))
    }
}

/// Default breaker classification of a failed call.
///
/// The breaker guards everything downstream of it, so any error coming back
/// through it counts as a failure, including inner rejections.
#[must_use]
pub fn classify_error(_err: &CallError) -> Outcome {
    Outcome::Failure
}

/// Classification that only holds handler failures against the breaker.
///
/// Pipeline rejections (rate limiting, validation, unknown methods) are
/// ignored and release their probe slot. Opt in with
/// `CircuitBreakerLayer::with_classifier(dependency_failures_only)`.
#[must_use]
pub fn dependency_failures_only(err: &CallError) -> Outcome {
    if err.is_dependency_failure() {
        Outcome::Failure
    } else {
        Outcome::Ignored
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn codes_follow_error_kind() {
        assert_eq!(CallError::RateLimited.code(), Code::ResourceExhausted);
        assert_eq!(
            CallError::CircuitOpen(Rejection::ProbeBudgetExhausted {
                name: "ledger".into()
            })
            .code(),
            Code::Unavailable
        );
        assert_eq!(
            CallError::ValidationFailed(ValidationError::new("bad")).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            CallError::Handler(Status::not_found("no such account")).code(),
            Code::NotFound
        );
    }

    #[test]
    fn handler_status_passes_through_verbatim() {
        let status = Status::new(Code::FailedPrecondition, "account frozen");
        let err = CallError::from(status.clone());
        assert_eq!(err.to_status(), status);
        assert_eq!(err.to_string(), "FAILED_PRECONDITION: account frozen");
    }

    #[test]
    fn rejections_map_to_fixed_statuses() {
        assert_eq!(
            CallError::RateLimited.to_status(),
            Status::resource_exhausted("too many requests")
        );
        let open = CallError::CircuitOpen(Rejection::Open {
            name: "ledger".into(),
            retry_after: Duration::from_secs(1),
        });
        assert_eq!(open.to_status(), Status::unavailable("service unavailable"));
    }

    #[test]
    fn retry_advice_distinguishes_transient_rejections() {
        assert_eq!(CallError::RateLimited.retry_advice(), RetryAdvice::RetryLater);
        assert_eq!(
            CallError::Unimplemented {
                method: "/x.Y/Z".into()
            }
            .retry_advice(),
            RetryAdvice::FixRequest
        );
        assert_eq!(
            CallError::Handler(Status::internal("boom")).retry_advice(),
            RetryAdvice::Opaque
        );
    }

    #[test]
    fn every_error_counts_against_the_breaker_by_default() {
        assert_eq!(
            classify_error(&CallError::Handler(Status::unavailable("db"))),
            Outcome::Failure
        );
        assert_eq!(classify_error(&CallError::RateLimited), Outcome::Failure);
        assert_eq!(
            classify_error(&CallError::ValidationFailed(ValidationError::new("x"))),
            Outcome::Failure
        );
    }

    #[test]
    fn dependency_only_classification_ignores_pipeline_rejections() {
        assert_eq!(
            dependency_failures_only(&CallError::Handler(Status::unavailable("db"))),
            Outcome::Failure
        );
        assert_eq!(
            dependency_failures_only(&CallError::RateLimited),
            Outcome::Ignored
        );
        assert_eq!(
            dependency_failures_only(&CallError::ValidationFailed(ValidationError::new("x"))),
            Outcome::Ignored
        );
        assert_eq!(
            dependency_failures_only(&CallError::Unimplemented {
                method: "/x.Y/Z".into()
            }),
            Outcome::Ignored
        );
    }
}
