//! Distributed tracing for visit-counter
//!
//! Spans are plain [`SpanContext`] values linked by `request_id` and
//! `parent_span_id`. Finished spans are turned into [`SpanRecord`]s and
//! handed to a [`SpanReporter`]; the default [`LogReporter`] emits them as
//! structured log events tagged with the configured service name.
//!
//! The span of the request being served is installed as a task-local trace
//! parent (see [`span::with_parent`]) so that backing-store command events,
//! which arrive without any request context, can still be attached to it.

pub mod reporter;
pub mod span;

pub use reporter::{LogReporter, SpanReporter};
pub use span::{SpanContext, SpanKind, SpanRecord};
