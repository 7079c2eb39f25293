//! Observability setup for relflow hosts: structured logging through
//! `tracing`, with optional OpenTelemetry span export.

pub mod tracing_setup;
