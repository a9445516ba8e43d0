//! Adapter turning an async closure into a terminal pipeline service.

use std::future::Future;
use std::task::{Context, Poll};

use ringfence_core::{CallContext, CallInfo, Status};
use tower::Service;

use super::call::{CallError, CallFuture, UnaryCall};

/// Terminal service built from an async function by [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps `f(ctx, request, info)` as a pipeline handler.
///
/// A `Status` returned by `f` reaches the caller as `CallError::Handler`,
/// unchanged.
#[must_use]
pub fn handler_fn<F, Fut, Req, Resp>(f: F) -> HandlerFn<F>
where
    F: Fn(CallContext, Req, CallInfo) -> Fut,
    Fut: Future<Output = Result<Resp, Status>>,
{
    HandlerFn { f }
}

impl<F, Fut, Req, Resp> Service<UnaryCall<Req>> for HandlerFn<F>
where
    F: Fn(CallContext, Req, CallInfo) -> Fut,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    type Response = Resp;
    type Error = CallError;
    type Future = CallFuture<Resp>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: UnaryCall<Req>) -> Self::Future {
        let fut = (self.f)(call.ctx, call.request, call.info);
        Box::pin(async move { fut.await.map_err(CallError::Handler) })
    }
}
