use std::path::PathBuf;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";

/// Where and how models are fetched from the hub.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the model hub
    pub endpoint: String,
    /// Branch, tag or commit to download
    pub revision: String,
    /// Directory holding downloaded repositories; the platform cache dir when unset
    pub cache_dir: Option<PathBuf>,
    /// Bearer token for gated or private repositories
    pub token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `HF_ENDPOINT`: hub base URL (default `https://huggingface.co`)
    /// - `HF_TOKEN`: access token sent as a bearer token
    /// - `MODEL_EXPORT_CACHE_DIR`: download cache (supports ~ for home directory)
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = non_empty_var("HF_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let token = non_empty_var("HF_TOKEN");

        let cache_dir = non_empty_var("MODEL_EXPORT_CACHE_DIR").map(|dir| expand_tilde(&dir));

        let config = Self {
            endpoint,
            revision: DEFAULT_REVISION.to_string(),
            cache_dir,
            token,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        if self.revision.trim().is_empty() {
            return Err(ConfigError::EmptyRevision);
        }
        Ok(())
    }
}

/// `<platform cache dir>/model-export`.
pub fn default_cache_dir() -> Result<PathBuf, ConfigError> {
    dirs::cache_dir()
        .map(|dir| dir.join("model-export"))
        .ok_or(ConfigError::NoCacheDir)
}

/// Check a model identifier before any work is done.
///
/// The name ends up as a single `key=value` line, so it must be non-empty and single-line.
pub fn validate_model_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::EmptyModelName);
    }
    if name.contains(['\n', '\r']) {
        return Err(ConfigError::InvalidModelName(name.to_string()));
    }
    Ok(())
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("model name must not be empty")]
    EmptyModelName,
    #[error("model name must be a single line: {0:?}")]
    InvalidModelName(String),
    #[error("hub endpoint must be an http(s) URL: {0}")]
    InvalidEndpoint(String),
    #[error("revision must not be empty")]
    EmptyRevision,
    #[error("no platform cache directory; set MODEL_EXPORT_CACHE_DIR")]
    NoCacheDir,
}
