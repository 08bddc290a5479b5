//! Request pipeline decorators.
//!
//! Applied outermost first:
//! 1. request id assignment and echo (`tower-http`)
//! 2. [`trace::trace_request`]: request context and root span
//! 3. [`access_log::log_request`]
//! 4. [`metrics::record_metrics`]
//! 5. [`trace::enforce_deadline`]
//!
//! Every decorator sees every request, including unmatched routes.

pub mod access_log;
pub mod metrics;
pub mod request_id;
pub mod trace;

pub use request_id::TimestampRequestId;
pub use trace::TraceState;
