//! REST API handlers, one module per resource.

pub mod decision;
pub mod package;
