//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `IMGRELAY_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `IMGRELAY_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `IMGRELAY_UPSTREAM__API_KEY=sk-...` sets the `upstream.api_key` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use imgrelay::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Relay will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Upstream**: `upstream.base_url`, `upstream.api_key` - The image-editing API being relayed to
//! - **Polling**: `polling.interval`, `polling.max_interval`, `polling.default_max_polls`,
//!   `polling.max_polls_cap` - Job polling
//! - **Limits**: `limits.max_image_bytes`, `limits.max_request_body_bytes` - Size limits
//! - **Tools**: `tools.allowed` - Optional allow-list of tool names
//! - **CORS**: `cors.allowed_origins` - Browser origins allowed to call the relay
//! - **Features**: `enable_metrics`, `enable_otel_export` - Optional feature toggles
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! IMGRELAY_PORT=8080
//! IMGRELAY_UPSTREAM__BASE_URL="https://api.example.com/v1"
//! IMGRELAY_UPSTREAM__API_KEY="sk-live-..."
//! IMGRELAY_POLLING__INTERVAL=500ms
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;
use crate::relay::ToolName;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "IMGRELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// The image-editing API requests are relayed to
    pub upstream: UpstreamConfig,
    /// Job polling behaviour
    pub polling: PollingConfig,
    /// Size limits for inbound bodies and source images
    pub limits: LimitsConfig,
    /// Which tools callers may invoke
    pub tools: ToolsConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Connection settings for the image-editing API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL; `uploads`, `tools/{tool}` and `jobs/{id}` are resolved beneath it
    pub base_url: Url,
    /// API key sent with every call except the presigned upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Header carrying the API key
    pub auth_header_name: String,
    /// Prefix prepended to the API key in the auth header
    pub auth_header_prefix: String,
    /// Timeout for every outbound request, including source downloads
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://localhost:8080/v1").expect("default upstream URL is valid"),
            api_key: None,
            auth_header_name: "Authorization".to_string(),
            auth_header_prefix: "Bearer ".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Job polling configuration.
///
/// The remote API may choose its own poll budget and interval per job; these values fill in
/// when it doesn't, and `max_polls_cap` and `max_interval` bound whatever it picks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    /// Delay before each status check
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Poll budget when the remote does not supply one
    pub default_max_polls: u32,
    /// Upper bound on any poll budget
    pub max_polls_cap: u32,
    /// Upper bound on a remote-supplied poll interval
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            default_max_polls: 30,
            max_polls_cap: 300,
            max_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest source image that will be relayed
    pub max_image_bytes: u64,
    /// Largest inbound JSON body
    pub max_request_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 25 * 1024 * 1024,
            max_request_body_bytes: 64 * 1024,
        }
    }
}

/// Tool allow-list. Empty means any well-formed tool name is relayed.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub allowed: Vec<String>,
}

impl ToolsConfig {
    pub fn permits(&self, tool: &ToolName) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|t| t == tool.as_str())
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests; empty disables cross-origin access
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
            upstream: UpstreamConfig::default(),
            polling: PollingConfig::default(),
            limits: LimitsConfig::default(),
            tools: ToolsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: String| Error::Internal {
            operation: format!("validate config: {message}"),
        };

        if !matches!(self.upstream.base_url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "upstream.base_url must be an http(s) URL, got {}",
                self.upstream.base_url
            )));
        }

        if self.upstream.request_timeout.is_zero() {
            return Err(invalid("upstream.request_timeout must be greater than zero".to_string()));
        }

        if self.polling.interval.is_zero() {
            return Err(invalid("polling.interval must be greater than zero".to_string()));
        }

        if self.polling.max_interval < self.polling.interval {
            return Err(invalid(format!(
                "polling.max_interval ({:?}) cannot be less than polling.interval ({:?})",
                self.polling.max_interval, self.polling.interval
            )));
        }

        if self.polling.default_max_polls == 0 {
            return Err(invalid("polling.default_max_polls must be at least 1".to_string()));
        }

        if self.polling.default_max_polls > self.polling.max_polls_cap {
            return Err(invalid(format!(
                "polling.default_max_polls ({}) cannot be greater than polling.max_polls_cap ({})",
                self.polling.default_max_polls, self.polling.max_polls_cap
            )));
        }

        if self.limits.max_image_bytes == 0 {
            return Err(invalid("limits.max_image_bytes must be greater than zero".to_string()));
        }

        if self.limits.max_request_body_bytes == 0 {
            return Err(invalid("limits.max_request_body_bytes must be greater than zero".to_string()));
        }

        for tool in &self.tools.allowed {
            ToolName::parse(tool).map_err(|e| invalid(format!("tools.allowed: {e}")))?;
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values. IMGRELAY_CONFIG names the
            // file itself and is not a config key.
            .merge(Env::prefixed("IMGRELAY_").split("__").ignore(&["config"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
