//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Relay** (`/api/v1/relay`): the single relay endpoint
//! - **Health** (`/healthz`): liveness check
//! - **Docs** (`/api/openapi.json`, `/docs`): OpenAPI document and Scalar UI
//! - **Metrics** (`/internal/metrics`): Prometheus text format, when enabled
//!
//! Every response under the relay API is JSON, including errors and unmatched routes.

pub mod handlers;
pub mod models;
