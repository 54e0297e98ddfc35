use serde::Deserialize;
use std::path::Path;

use confab_foundation::AppError;

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";
pub const DEFAULT_TARGET_LATENCY_MS: f64 = 200.0;

/// Optional TOML config file; CLI flags take precedence over everything in
/// here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub target_latency_ms: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("invalid config {}: {e}", path.display())))
    }
}

/// Attach the API key as a query parameter on the session endpoint.
pub fn endpoint_url(base: &str, api_key: &str) -> Result<String, AppError> {
    let mut url = url::Url::parse(base)
        .map_err(|e| AppError::Config(format!("invalid endpoint '{base}': {e}")))?;
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url.into())
}
