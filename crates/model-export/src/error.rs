use crate::config::ConfigError;

/// Everything that can abort an export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("model '{0}' was not found locally or on the model hub (gated models need HF_TOKEN)")]
    ModelNotFound(String),

    #[error("model '{repo}' has no {file}")]
    MissingFile { repo: String, file: String },

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} downloading {url}")]
    Http {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load model: {0:#}")]
    Model(anyhow::Error),

    #[error("model reports dimension {reported} but produced {produced}-dimensional embeddings")]
    DimensionMismatch { reported: usize, produced: usize },

    #[error("invalid model info: {0}")]
    InvalidInfo(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExportError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
