//! Method routing: dispatches a `UnaryCall` to the handler registered for its
//! full method name.

use std::collections::HashMap;
use std::task::{Context, Poll};

use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};

use super::call::{BoxCallService, CallError, CallFuture, UnaryCall};

// ---------------------------------------------------------------------------
// MethodRouter
// ---------------------------------------------------------------------------

/// Routes calls to handlers keyed by full method name
/// (e.g. `"/billing.Ledger/Post"`).
///
/// Calls for an unregistered method return `CallError::Unimplemented`. The
/// router is itself a cloneable service, so it can terminate a pipeline.
pub struct MethodRouter<Req, Resp> {
    handlers: HashMap<String, BoxCallService<Req, Resp>>,
}

impl<Req, Resp> MethodRouter<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `full_method`, replacing any previous handler.
    pub fn register<S>(&mut self, full_method: impl Into<String>, handler: S)
    where
        S: Service<UnaryCall<Req>, Response = Resp, Error = CallError> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        self.handlers
            .insert(full_method.into(), BoxCloneService::new(handler));
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn route<S>(mut self, full_method: impl Into<String>, handler: S) -> Self
    where
        S: Service<UnaryCall<Req>, Response = Resp, Error = CallError> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        self.register(full_method, handler);
        self
    }

    #[must_use]
    pub fn contains(&self, full_method: &str) -> bool {
        self.handlers.contains_key(full_method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl<Req, Resp> Default for MethodRouter<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> Clone for MethodRouter<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<Req, Resp> Service<UnaryCall<Req>> for MethodRouter<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Response = Resp;
    type Error = CallError;
    type Future = CallFuture<Resp>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is awaited per handler on dispatch.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: UnaryCall<Req>) -> Self::Future {
        match self.handlers.get(call.info.full_method()) {
            Some(handler) => Box::pin(handler.clone().oneshot(call)),
            None => {
                let method = call.info.full_method().to_owned();
                Box::pin(async move { Err(CallError::Unimplemented { method }) })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use ringfence_core::{CallContext, CallInfo, Status};

    use super::*;
    use crate::service::handler::handler_fn;

    fn call(method: &str) -> UnaryCall<u32> {
        UnaryCall::new(CallContext::new(), 21, CallInfo::new(method))
    }

    fn router() -> MethodRouter<u32, u32> {
        MethodRouter::new()
            .route(
                "/math.Calc/Double",
                handler_fn(|_ctx, n: u32, _info| async move { Ok::<_, Status>(n * 2) }),
            )
            .route(
                "/math.Calc/Inc",
                handler_fn(|_ctx, n: u32, _info| async move { Ok::<_, Status>(n + 1) }),
            )
    }

    #[tokio::test]
    async fn routes_to_registered_handler() {
        let router = router();
        assert_eq!(router.clone().oneshot(call("/math.Calc/Double")).await.unwrap(), 42);
        assert_eq!(router.oneshot(call("/math.Calc/Inc")).await.unwrap(), 22);
    }

    #[tokio::test]
    async fn unknown_method_is_unimplemented() {
        let err = router().oneshot(call("/math.Calc/Sqrt")).await.unwrap_err();
        assert_eq!(
            err,
            CallError::Unimplemented {
                method: "/math.Calc/Sqrt".to_string()
            }
        );
    }

    #[test]
    fn lists_registered_methods() {
        let router = router();
        assert!(router.contains("/math.Calc/Inc"));
        let mut methods: Vec<_> = router.methods().collect();
        methods.sort_unstable();
        assert_eq!(methods, vec!["/math.Calc/Double", "/math.Calc/Inc"]);
    }
}
