//! Unary call pipeline.
//!
//! 1. **Calls** (`call`): `UnaryCall<Req>` and the `CallError` it can end with
//! 2. **Middleware** (`middleware`): Tower layers and their composition
//! 3. **Handlers** (`handler`, `router`): Terminal services and method dispatch
//! 4. **Rate limiter** (`limiter`): Token bucket with its replenisher task
//! 5. **Configuration** (`config`): JSON settings for both stateful engines

pub mod call;
pub mod config;
pub mod handler;
pub mod limiter;
pub mod middleware;
pub mod router;

// Re-export key types for convenient access.
pub use call::{
    classify_error, dependency_failures_only, BoxCallService, CallError, CallFuture, RetryAdvice,
    UnaryCall,
};
pub use config::PipelineConfig;
pub use handler::{handler_fn, HandlerFn};
pub use limiter::RateLimiter;
pub use middleware::{build_unary_pipeline, InterceptorChain, Pipeline, PipelineComponents};
pub use router::MethodRouter;
