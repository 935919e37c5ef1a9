use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use utoipa::ToSchema;

use crate::config::ToolsConfig;
use crate::errors::Error;
use crate::relay::{RelayRequest, ToolName};

/// Request payload for relaying an image through a remote tool.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RelayRequestBody {
    /// Publicly reachable HTTP(S) URL of the source image
    #[serde(alias = "imageUrl")]
    #[schema(example = "https://cdn.example.com/photos/cat.png")]
    pub image_url: String,
    /// Name of the remote tool to run
    #[serde(alias = "toolName")]
    #[schema(example = "remove-background")]
    pub tool: String,
    /// Tool-specific parameters, passed through untouched
    #[serde(default, alias = "parameters")]
    #[schema(value_type = Option<Object>)]
    pub params: Option<Value>,
}

impl RelayRequestBody {
    /// Check the body and turn it into a [`RelayRequest`].
    pub fn validate(self, tools: &ToolsConfig) -> Result<RelayRequest, Error> {
        let image_url = Url::parse(self.image_url.trim()).map_err(|e| Error::BadRequest {
            message: format!("image_url is not a valid URL: {e}"),
        })?;
        if !matches!(image_url.scheme(), "http" | "https") {
            return Err(Error::BadRequest {
                message: format!("image_url must use http or https, got {}", image_url.scheme()),
            });
        }

        let tool = ToolName::parse(self.tool.trim()).map_err(|e| Error::BadRequest { message: e.to_string() })?;
        if !tools.permits(&tool) {
            return Err(Error::BadRequest {
                message: format!("tool {tool} is not available"),
            });
        }

        let params = match self.params {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(params @ Value::Object(_)) => params,
            Some(_) => {
                return Err(Error::BadRequest {
                    message: "params must be a JSON object".to_string(),
                });
            }
        };

        Ok(RelayRequest { image_url, tool, params })
    }
}

/// Returned when the remote job finished successfully.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RelaySuccessResponse {
    /// Always `true`
    pub success: bool,
    /// The tool's output, or the whole job document if it had no output field
    #[schema(value_type = Object)]
    pub output: Value,
    /// Remote job identifier
    pub job_id: String,
    /// Number of status checks made; `0` when the tool answered synchronously
    pub polls: u32,
}

/// Returned for every failure, whatever its cause.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RelayFailureResponse {
    /// Always `false`
    pub success: bool,
    /// What went wrong
    pub error: String,
    /// Raw diagnostic data from the upstream, present for upstream failures
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> RelayRequestBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_validate_defaults_params() {
        let request = body(json!({"image_url": "https://cdn.example.com/a.png", "tool": "upscale"}))
            .validate(&ToolsConfig::default())
            .unwrap();
        assert_eq!(request.tool.as_str(), "upscale");
        assert_eq!(request.params, json!({}));
    }

    #[test]
    fn test_validate_accepts_camel_case_aliases() {
        let request = body(json!({
            "imageUrl": "https://cdn.example.com/a.png",
            "toolName": "upscale",
            "parameters": {"scale": 2}
        }))
        .validate(&ToolsConfig::default())
        .unwrap();
        assert_eq!(request.params, json!({"scale": 2}));
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let tools = ToolsConfig::default();

        let err = body(json!({"image_url": "not a url", "tool": "upscale"})).validate(&tools).unwrap_err();
        assert!(err.to_string().contains("image_url"));

        let err = body(json!({"image_url": "file:///etc/passwd", "tool": "upscale"}))
            .validate(&tools)
            .unwrap_err();
        assert!(err.to_string().contains("http or https"));

        let err = body(json!({"image_url": "https://a.example/x.png", "tool": "../jobs"}))
            .validate(&tools)
            .unwrap_err();
        assert!(err.to_string().contains("invalid tool name"));

        let err = body(json!({"image_url": "https://a.example/x.png", "tool": "upscale", "params": [1, 2]}))
            .validate(&tools)
            .unwrap_err();
        assert!(err.to_string().contains("params"));
    }

    #[test]
    fn test_validate_enforces_allow_list() {
        let tools = ToolsConfig {
            allowed: vec!["remove-background".to_string()],
        };
        let err = body(json!({"image_url": "https://a.example/x.png", "tool": "upscale"}))
            .validate(&tools)
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}
