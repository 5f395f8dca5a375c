//! Run traces: records, the shared store, and persistence

pub mod database;
pub mod processor;
pub mod recorder;
pub mod store;
pub mod types;

pub use database::{DatabaseTraceProcessor, DEFAULT_BATCH_SIZE};
pub use processor::{LogTraceProcessor, TraceEvent, TraceProcessor};
pub use recorder::RunTrace;
pub use store::{StreamingStep, TraceChange, TraceStore, TraceSubscription, TraceUpdate};
pub use types::{NewTrace, Span, SpanKind, SpanStatus, Trace, TraceStatus};
