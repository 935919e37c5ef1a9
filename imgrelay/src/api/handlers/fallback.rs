//! Fallback handlers so unmatched requests still get a JSON body.

use axum::http::{Method, Uri};

use crate::errors::Error;

pub async fn not_found(uri: Uri) -> Error {
    Error::NotFound {
        path: uri.path().to_string(),
    }
}

pub async fn method_not_allowed(method: Method) -> Error {
    Error::MethodNotAllowed {
        method: method.to_string(),
    }
}
