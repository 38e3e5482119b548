use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// Some speed-test servers rate-limit or reject unknown clients, so present
// the same surface a browser would.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Validated run configuration. Loaded once, read-only for the whole run.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedTestConfig {
    /// Host name (or full URL) probed by the latency test.
    pub ping_server: String,
    /// Base URL for downloads; `testServerUrl` is accepted as a legacy
    /// alias.
    #[serde(alias = "testServerUrl")]
    pub server_url: String,
    /// Optional separate base URL for uploads.
    #[serde(default)]
    pub upload_server_url: Option<String>,
    pub download_endpoint: String,
    pub upload_endpoint: String,
    pub threads: u32,
    pub download_duration: u64,
    pub upload_duration: u64,
    pub ping_samples: u32,
    pub ping_timeout: u64,
    #[serde(rename = "uploadDataSizeMB")]
    pub upload_data_size_mb: u64,
    #[serde(default)]
    pub allow_insecure_certs: bool,
}

impl SpeedTestConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = fs::read_to_string(path)?;
        let mut config: SpeedTestConfig = serde_json::from_str(&raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        self.server_url = self.server_url.trim_end_matches('/').to_string();
        self.upload_server_url = self
            .upload_server_url
            .take()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let download_base = validate_server_url(&self.server_url, "server URL")?;
        let upload_base = match &self.upload_server_url {
            Some(url) => validate_server_url(url, "upload server URL")?,
            None => download_base.clone(),
        };
        validate_endpoint(&self.download_endpoint, &download_base, "download endpoint")?;
        validate_endpoint(&self.upload_endpoint, &upload_base, "upload endpoint")?;

        if self.ping_server.trim().is_empty() {
            return Err(ConfigError::Invalid("ping server cannot be empty".into()));
        }

        check_range("threads", self.threads as u64, 1, 32)?;
        check_range("download duration", self.download_duration, 5, 300)?;
        check_range("upload duration", self.upload_duration, 5, 300)?;
        check_range("ping samples", self.ping_samples as u64, 1, 100)?;
        check_range("ping timeout", self.ping_timeout, 1000, 30_000)?;
        check_range("upload data size", self.upload_data_size_mb, 1, 100)?;
        Ok(())
    }

    pub fn download_url(&self) -> String {
        join_url(&self.server_url, &self.download_endpoint)
    }

    pub fn upload_url(&self) -> String {
        let base = self.upload_server_url.as_deref().unwrap_or(&self.server_url);
        join_url(base, &self.upload_endpoint)
    }
}

/// Builds the transport client: no overall request timeout (phase
/// cancellation governs request lifetime), a bounded connect timeout, and
/// browser-like headers.
pub fn build_client(config: &SpeedTestConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(USER_AGENT)
        .default_headers(headers);

    if config.allow_insecure_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build()
}

fn join_url(base: &str, endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        format!("{base}{endpoint}")
    } else {
        format!("{base}/{endpoint}")
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be between {min} and {max}, got: {value}"
        )))
    }
}

fn validate_server_url(url: &str, name: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(url)
        .map_err(|_| ConfigError::Invalid(format!("invalid {name}: {url}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(ConfigError::Invalid(format!(
            "{name} must use HTTP or HTTPS: {url}"
        ))),
    }
}

/// Endpoints must be relative paths that stay on their base URL's host, so
/// a config file cannot redirect transfers elsewhere.
fn validate_endpoint(endpoint: &str, base: &Url, name: &str) -> Result<(), ConfigError> {
    if endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{name} cannot be empty")));
    }
    if endpoint.starts_with("//") {
        return Err(ConfigError::Invalid(format!(
            "{name} cannot start with '//' because it would override the host"
        )));
    }
    if Url::parse(endpoint).is_ok() {
        return Err(ConfigError::Invalid(format!(
            "{name} must be a relative path, got: {endpoint}"
        )));
    }
    let joined = base.join(endpoint).map_err(|_| {
        ConfigError::Invalid(format!("invalid {name} for base URL {base}: {endpoint}"))
    })?;
    if joined.host_str() != base.host_str() {
        return Err(ConfigError::Invalid(format!(
            "{name} must stay on host {}, got {}",
            base.host_str().unwrap_or(""),
            joined.host_str().unwrap_or("")
        )));
    }
    Ok(())
}
