//! Observability for ccp: tracing subscriber setup.

pub mod tracing_setup;
