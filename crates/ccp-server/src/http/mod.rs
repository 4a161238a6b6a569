//! Admin HTTP API for ccp.
//!
//! Axum-based REST API at `/api/v1/` with an envelope response format.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
