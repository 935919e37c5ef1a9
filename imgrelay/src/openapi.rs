//! OpenAPI documentation for the relay API, served at `/api/openapi.json` and rendered at `/docs`.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    paths(api::handlers::relay::relay),
    components(schemas(
        api::models::relay::RelayRequestBody,
        api::models::relay::RelaySuccessResponse,
        api::models::relay::RelayFailureResponse,
    )),
    tags(
        (name = "relay", description = "Run an image through a tool on the image-editing API"),
    ),
    info(
        title = "imgrelay",
        description = "Relays images to a remote image-editing API and waits for the result.

Every response is JSON. Failures share one shape: `success` is `false`, `error` describes the problem and, when the upstream was involved, `data` carries its raw reply.",
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_relay_endpoint() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/relay"));

        let components = doc.components.expect("components");
        for schema in ["RelayRequestBody", "RelaySuccessResponse", "RelayFailureResponse"] {
            assert!(components.schemas.contains_key(schema), "missing {schema}");
        }
    }
}
