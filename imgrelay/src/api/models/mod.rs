//! API request and response models.
//!
//! These types define the JSON shapes exchanged with relay callers. They are documented for
//! OpenAPI via `utoipa` and kept separate from the wire types used with the image-editing API
//! ([`crate::relay::models`]).

pub mod relay;
