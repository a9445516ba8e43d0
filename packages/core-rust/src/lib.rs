//! Ringfence Core: call context, status codes, and the token bucket and
//! circuit breaker state machines shared by the call pipeline.

pub mod breaker;
pub mod bucket;
pub mod clock;
pub mod context;
pub mod error;
pub mod status;
pub mod traits;

pub use breaker::{
    BreakerError, BreakerSettings, BreakerSnapshot, CallPermit, CircuitBreaker, CircuitState,
    ConsecutiveFailures, Counts, FailureRatio, Outcome, ReadyToTrip, Rejection,
};
pub use bucket::{RateLimitSettings, TokenBucket};
pub use clock::{ClockSource, ManualClock, MonotonicClock};
pub use context::{CallContext, CallInfo, Metadata, ResponseHeaders, TRACE_ID_HEADER};
pub use error::{ConfigError, ValidationError};
pub use status::{Code, Status};
pub use traits::{Message, Validate};
