//! Validation middleware.
//!
//! Requests that expose the `Validate` capability through
//! [`Message::validator`] are checked before delegating; a failure returns
//! `CallError::ValidationFailed` carrying the validation error untouched.
//! Other requests pass straight through.

use std::task::{Context, Poll};

use ringfence_core::Message;
use tower::{Layer, Service};

use crate::service::call::{CallError, CallFuture, UnaryCall};

/// Tower layer running request self-validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationLayer;

impl<S> Layer<S> for ValidationLayer {
    type Service = ValidationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidationService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationService<S> {
    inner: S,
}

impl<S, Req> Service<UnaryCall<Req>> for ValidationService<S>
where
    Req: Message,
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
        if let Some(validator) = call.request.validator() {
            if let Err(err) = validator.validate() {
                return Box::pin(async move { Err(CallError::ValidationFailed(err)) });
            }
        }
        Box::pin(self.inner.call(call))
    }
}
