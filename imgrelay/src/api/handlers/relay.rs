//! HTTP handler for the relay endpoint.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use metrics::counter;

use crate::{
    AppState,
    api::models::relay::{RelayFailureResponse, RelayRequestBody, RelaySuccessResponse},
    errors::{Error, Result},
    relay::RelayOutcome,
};

#[utoipa::path(
    post,
    path = "/api/v1/relay",
    tag = "relay",
    summary = "Relay an image to a remote tool",
    description = "Stages the source image with the image-editing API, invokes the named tool and waits for the job to finish.

The source is probed and downloaded by the relay, then uploaded to a slot issued by the upstream. The upstream job is polled until it reaches a terminal status or its poll budget runs out.",
    request_body = RelayRequestBody,
    responses(
        (status = 200, description = "The remote job succeeded.", body = RelaySuccessResponse),
        (status = 400, description = "The request body is malformed or names an unavailable tool.", body = RelayFailureResponse),
        (status = 502, description = "The source, the upstream, or the remote job failed. `data` holds the raw upstream diagnostics.", body = RelayFailureResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn relay(
    State(state): State<AppState>,
    body: std::result::Result<Json<RelayRequestBody>, JsonRejection>,
) -> Result<Json<RelaySuccessResponse>> {
    let Json(body) = body.map_err(|rejection| Error::BadRequest {
        message: rejection.body_text(),
    })?;
    let request = body.validate(&state.config.tools)?;

    match state.relay.run(request).await {
        Ok(RelayOutcome::Succeeded { output, job_id, polls }) => {
            counter!("imgrelay_relays_total", "outcome" => "success").increment(1);
            Ok(Json(RelaySuccessResponse {
                success: true,
                output,
                job_id,
                polls,
            }))
        }
        Ok(RelayOutcome::Failed { message, data }) => {
            counter!("imgrelay_relays_total", "outcome" => "job_failed").increment(1);
            Err(Error::JobFailed { message, data })
        }
        Err(e) => {
            counter!("imgrelay_relays_total", "outcome" => "error").increment(1);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{create_test_app, mount_source, mount_upstream, test_config};
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, axum_test::TestServer) {
        let server = MockServer::start().await;
        let app = create_test_app(test_config(&format!("{}/v1", server.uri()))).await;
        (server, app)
    }

    fn relay_body(server: &MockServer, tool: &str) -> Value {
        json!({
            "image_url": format!("{}/img/cat.png", server.uri()),
            "tool": tool,
            "params": {"format": "png"}
        })
    }

    #[test_log::test(tokio::test)]
    async fn test_relay_success() {
        let (server, app) = setup().await;
        mount_source(&server, "/img/cat.png", "image/png", b"\x89PNG").await;
        mount_upstream(
            &server,
            "remove-background",
            vec![
                json!({"status": "queued"}),
                json!({"status": "processing"}),
                json!({"status": "completed", "output": {"url": "https://cdn.example.com/out.png"}}),
            ],
        )
        .await;

        let response = app.post("/api/v1/relay").json(&relay_body(&server, "remove-background")).await;

        response.assert_status(StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["output"], json!({"url": "https://cdn.example.com/out.png"}));
        assert_eq!(body["job_id"], "job-1");
        assert_eq!(body["polls"], 3);

        // One of each pipeline call, then exactly as many polls as it took
        let received = server.received_requests().await.unwrap();
        let count = |m: &str, p: &str| {
            received
                .iter()
                .filter(|r| r.method.as_str() == m && r.url.path() == p)
                .count()
        };
        assert_eq!(count("HEAD", "/img/cat.png"), 1);
        assert_eq!(count("POST", "/v1/uploads"), 1);
        assert_eq!(count("GET", "/img/cat.png"), 1);
        assert_eq!(count("PUT", "/bucket/put/1"), 1);
        assert_eq!(count("POST", "/v1/tools/remove-background"), 1);
        assert_eq!(count("GET", "/v1/jobs/job-1"), 3);
    }

    #[test_log::test(tokio::test)]
    async fn test_relay_remote_job_failure() {
        let (server, app) = setup().await;
        mount_source(&server, "/img/cat.png", "image/png", b"\x89PNG").await;
        mount_upstream(
            &server,
            "upscale",
            vec![json!({"status": "failed", "error": {"message": "image too small"}})],
        )
        .await;

        let response = app.post("/api/v1/relay").json(&relay_body(&server, "upscale")).await;

        response.assert_status(StatusCode::BAD_GATEWAY);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "job job-1 failed: image too small");
        assert_eq!(body["data"]["error"]["message"], "image too small");
    }

    #[test_log::test(tokio::test)]
    async fn test_relay_gives_up_after_poll_budget() {
        let (server, app) = setup().await;
        mount_source(&server, "/img/cat.png", "image/png", b"\x89PNG").await;
        mount_upstream(&server, "upscale", vec![json!({"status": "running"})]).await;

        let response = app.post("/api/v1/relay").json(&relay_body(&server, "upscale")).await;

        response.assert_status(StatusCode::BAD_GATEWAY);
        let body: Value = response.json();
        assert_eq!(body["error"], "job job-1 did not finish after 5 polls");
        assert_eq!(body["data"], json!({"status": "running"}));

        let polls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/v1/jobs/job-1")
            .count();
        assert_eq!(polls, 5);
    }

    #[test_log::test(tokio::test)]
    async fn test_relay_source_unreachable() {
        let (server, app) = setup().await;
        Mock::given(method("HEAD"))
            .and(path("/img/cat.png"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let response = app.post("/api/v1/relay").json(&relay_body(&server, "upscale")).await;

        response.assert_status(StatusCode::BAD_GATEWAY);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("probe source image"));
        assert!(body.as_object().unwrap().contains_key("data"));
    }

    #[tokio::test]
    async fn test_relay_rejects_invalid_json() {
        let (_server, app) = setup().await;

        let response = app
            .post("/api/v1/relay")
            .bytes("{not json".into())
            .content_type("application/json")
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_relay_rejects_missing_tool() {
        let (server, app) = setup().await;

        let response = app
            .post("/api/v1/relay")
            .json(&json!({"image_url": format!("{}/img/cat.png", server.uri())}))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert!(body["error"].as_str().unwrap().contains("tool"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_routes_are_json() {
        let (_server, app) = setup().await;

        let response = app.get("/api/v1/nope").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["success"], false);

        let response = app.get("/api/v1/relay").await;
        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
    }
}
