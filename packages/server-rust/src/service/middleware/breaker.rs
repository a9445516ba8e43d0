//! Circuit breaker middleware.
//!
//! Gates each call through [`CircuitBreaker::admit`] and reports the outcome
//! through the returned permit once the downstream future completes. A
//! rejection short-circuits with `CallError::CircuitOpen`.
//!
//! Errors are classified before being recorded. By default every error that
//! comes back through the breaker counts as a failure, inner rejections
//! included. `with_classifier(dependency_failures_only)` narrows this to
//! handler failures, ignoring rate limiting and validation rejections.

use std::sync::Arc;
use std::task::{Context, Poll};

use ringfence_core::{CircuitBreaker, Outcome};
use tower::{Layer, Service};

use crate::service::call::{classify_error, CallError, CallFuture, UnaryCall};

type Classifier = Arc<dyn Fn(&CallError) -> Outcome + Send + Sync>;

// ---------------------------------------------------------------------------
// CircuitBreakerLayer
// ---------------------------------------------------------------------------

/// Tower layer protecting the inner service with a shared [`CircuitBreaker`].
#[derive(Clone)]
pub struct CircuitBreakerLayer {
    breaker: CircuitBreaker,
    classifier: Classifier,
}

impl CircuitBreakerLayer {
    #[must_use]
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self {
            breaker,
            classifier: Arc::new(classify_error),
        }
    }

    /// Replaces the default error classification.
    #[must_use]
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&CallError) -> Outcome + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: self.breaker.clone(),
            classifier: Arc::clone(&self.classifier),
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: CircuitBreaker,
    classifier: Classifier,
}

impl<S, Req> Service<UnaryCall<Req>> for CircuitBreakerService<S>
where
    S: Service<UnaryCall<Req>, Error = CallError> + Send,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = CallFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: UnaryCall<Req>) -> Self::Future {
        let permit = match self.breaker.admit() {
            Ok(permit) => permit,
            Err(rejection) => {
                tracing::debug!(
                    method = call.info.full_method(),
                    breaker = rejection.breaker_name(),
                    "call rejected by circuit breaker"
                );
                return Box::pin(async move { Err(CallError::CircuitOpen(rejection)) });
            }
        };

        let classifier = Arc::clone(&self.classifier);
        let fut = self.inner.call(call);
        Box::pin(async move {
            // A panic or cancellation drops the permit unsettled, which the
            // breaker records as a failure.
            let result = fut.await;
            let outcome = match &result {
                Ok(_) => Outcome::Success,
                Err(err) => classifier(err),
            };
            permit.record(outcome);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
