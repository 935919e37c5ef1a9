//! HTTP request handlers.
//!
//! - [`relay`]: the relay endpoint
//! - [`fallback`]: JSON replies for unmatched paths and methods
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to the JSON failure shape with an
//! appropriate HTTP status code.

pub mod fallback;
pub mod relay;
