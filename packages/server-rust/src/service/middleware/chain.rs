//! Interceptor chain composer.
//!
//! An [`InterceptorChain`] is an ordered list of tower layers. Composing it
//! around a terminal handler produces a [`Pipeline`] in which the first pushed
//! layer is the outermost wrapper and the last runs immediately before the
//! handler. Composition is pure: nothing runs until the pipeline is invoked.

use std::fmt;

use ringfence_core::{CallContext, CallInfo};
use tower::util::{BoxCloneService, Oneshot};
use tower::{Layer, Service, ServiceExt};

use crate::service::call::{BoxCallService, CallError, UnaryCall};

type Unit<Req, Resp> =
    Box<dyn Fn(BoxCallService<Req, Resp>) -> BoxCallService<Req, Resp> + Send + Sync>;

// ---------------------------------------------------------------------------
// InterceptorChain
// ---------------------------------------------------------------------------

/// Ordered sequence of interceptor units, outermost first.
pub struct InterceptorChain<Req, Resp> {
    units: Vec<Unit<Req, Resp>>,
}

impl<Req, Resp> InterceptorChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self { units: Vec::new() }
    }

    /// Appends a unit. It wraps every unit pushed after it.
    #[must_use]
    pub fn push<L>(mut self, layer: L) -> Self
    where
        L: Layer<BoxCallService<Req, Resp>> + Send + Sync + 'static,
        L::Service: Service<UnaryCall<Req>, Response = Resp, Error = CallError>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<UnaryCall<Req>>>::Future: Send + 'static,
    {
        self.units
            .push(Box::new(move |inner| BoxCloneService::new(layer.layer(inner))));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Wraps `terminal` in every unit and returns the runnable pipeline.
    #[must_use]
    pub fn compose<H>(self, terminal: H) -> Pipeline<Req, Resp>
    where
        H: Service<UnaryCall<Req>, Response = Resp, Error = CallError> + Clone + Send + 'static,
        H::Future: Send + 'static,
    {
        let service = self
            .units
            .iter()
            .rev()
            .fold(BoxCloneService::new(terminal), |inner, unit| unit(inner));
        Pipeline { service }
    }
}

impl<Req, Resp> Default for InterceptorChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> fmt::Debug for InterceptorChain<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("units", &self.units.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A composed chain around its terminal handler. Cheap to clone; each
/// invocation runs on its own clone of the composed service.
pub struct Pipeline<Req, Resp> {
    service: BoxCallService<Req, Resp>,
}

impl<Req, Resp> Pipeline<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Runs the chain once for a single call.
    ///
    /// The returned future owns its clone of the service and is `Send`, so it
    /// can be spawned. It resolves to the error of the first unit that rejects
    /// the call, or the handler's result, unchanged.
    pub fn invoke(
        &self,
        ctx: CallContext,
        request: Req,
        info: CallInfo,
    ) -> Oneshot<BoxCallService<Req, Resp>, UnaryCall<Req>> {
        self.service
            .clone()
            .oneshot(UnaryCall::new(ctx, request, info))
    }

    /// The composed chain as a plain tower service.
    #[must_use]
    pub fn into_service(self) -> BoxCallService<Req, Resp> {
        self.service
    }
}

impl<Req, Resp> Clone for Pipeline<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<Req, Resp> fmt::Debug for Pipeline<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
