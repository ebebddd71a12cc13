//! Model downloading from the Hugging Face Hub.

use futures_util::StreamExt;
use reqwest::StatusCode;
use semantic_embeddings::pipeline::{self, Artifact, ModuleEntry};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::config::{default_cache_dir, Config};
use crate::error::ExportError;

/// Outcome of fetching a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fetched {
    Cached,
    Downloaded,
    /// The hub answered 401/404; for repositories that do not exist the hub
    /// answers 401 rather than 404.
    Missing,
}

/// Downloads model repositories into a local cache directory.
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl HubClient {
    pub fn new(config: &Config) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("model-export/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ExportError::Client)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            cache_dir: config.cache_dir.clone(),
        })
    }

    /// Local directory a repository revision is cached in.
    ///
    /// The platform cache dir is only looked up here, so exporting a local model
    /// works without one.
    pub fn model_dir(&self, repo_id: &str, revision: &str) -> Result<PathBuf, ExportError> {
        let cache_dir = self.cache_dir.clone().map_or_else(default_cache_dir, Ok)?;
        Ok(cache_dir.join(cache_key(repo_id)).join(cache_key(revision)))
    }

    /// Download every file the model needs and return the local directory.
    ///
    /// Files already in the cache are reused, so a second call makes no
    /// requests for them.
    pub async fn download_model(&self, repo_id: &str, revision: &str) -> Result<PathBuf, ExportError> {
        let model_dir = self.model_dir(repo_id, revision)?;
        if !model_dir.exists() {
            fs::create_dir_all(&model_dir)
                .await
                .map_err(|e| ExportError::io(format!("Failed to create {}", model_dir.display()), e))?;
            tracing::info!("Created model directory: {}", model_dir.display());
        }

        tracing::info!("Fetching {} ({}) from {}", repo_id, revision, self.endpoint);

        for artifact in pipeline::root_artifacts() {
            self.fetch_artifact(repo_id, revision, &model_dir, &artifact).await?;
        }

        let modules = pipeline::read_modules(&model_dir).map_err(ExportError::Model)?;
        let modules = match modules {
            Some(modules) => modules,
            None => {
                tracing::debug!("{} has no modules.json, treating it as a plain checkpoint", repo_id);
                vec![ModuleEntry::new(0, pipeline::ModuleKind::Transformer, "")]
            }
        };

        for module in &modules {
            let artifacts = module.artifacts().map_err(ExportError::Model)?;
            for artifact in &artifacts {
                let found = self.fetch_artifact(repo_id, revision, &model_dir, artifact).await?;
                if found.is_none() && artifact.required {
                    // The transformer config doubles as the existence check for the repo
                    if artifact.candidates[0] == module.file(pipeline::CONFIG_FILE)
                        && matches!(module.kind(), Ok(pipeline::ModuleKind::Transformer))
                    {
                        return Err(ExportError::ModelNotFound(repo_id.to_string()));
                    }
                    return Err(ExportError::MissingFile {
                        repo: repo_id.to_string(),
                        file: artifact.candidates.join(" or "),
                    });
                }
            }
        }

        tracing::info!("Model files ready in {}", model_dir.display());
        Ok(model_dir)
    }

    /// Fetch the first available candidate of `artifact`, returning its relative path.
    async fn fetch_artifact(
        &self,
        repo_id: &str,
        revision: &str,
        model_dir: &Path,
        artifact: &Artifact,
    ) -> Result<Option<String>, ExportError> {
        // Prefer any candidate already cached over downloading the first one
        for candidate in &artifact.candidates {
            if is_cached(&model_dir.join(candidate)).await {
                tracing::debug!("{} already exists, skipping", candidate);
                return Ok(Some(candidate.clone()));
            }
        }

        for candidate in &artifact.candidates {
            match self.fetch_file(repo_id, revision, candidate, model_dir).await? {
                Fetched::Cached | Fetched::Downloaded => return Ok(Some(candidate.clone())),
                Fetched::Missing => {
                    tracing::debug!("{} not present in {}", candidate, repo_id);
                }
            }
        }

        Ok(None)
    }

    async fn fetch_file(
        &self,
        repo_id: &str,
        revision: &str,
        file: &str,
        model_dir: &Path,
    ) -> Result<Fetched, ExportError> {
        let dest_path = model_dir.join(file);
        if is_cached(&dest_path).await {
            return Ok(Fetched::Cached);
        }

        let url = self.file_url(repo_id, revision, file);
        tracing::info!("Downloading {}...", file);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| ExportError::Download {
            url: url.clone(),
            source,
        })?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => return Ok(Fetched::Missing),
            status if !status.is_success() => return Err(ExportError::Http { status, url }),
            _ => {}
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ExportError::io(format!("Failed to create {}", parent.display()), e))?;
        }

        let total_size = response.content_length();
        let mut stream = response.bytes_stream();

        // Stream into a side file so an interrupted download never looks complete
        let part_path = part_path(&dest_path);
        let mut out = File::create(&part_path)
            .await
            .map_err(|e| ExportError::io(format!("Failed to create {}", part_path.display()), e))?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| ExportError::Download {
                url: url.clone(),
                source,
            })?;
            out.write_all(&chunk)
                .await
                .map_err(|e| ExportError::io(format!("Failed to write {}", part_path.display()), e))?;
            downloaded += chunk.len() as u64;

            // Log progress for large files
            if let Some(total) = total_size {
                if total > 1_000_000 && downloaded % 10_000_000 < chunk.len() as u64 {
                    let percent = (downloaded as f64 / total as f64) * 100.0;
                    tracing::info!("  Progress: {:.1}%", percent);
                }
            }
        }

        out.flush()
            .await
            .map_err(|e| ExportError::io(format!("Failed to write {}", part_path.display()), e))?;
        drop(out);

        fs::rename(&part_path, &dest_path)
            .await
            .map_err(|e| ExportError::io(format!("Failed to move {} into place", dest_path.display()), e))?;

        tracing::debug!("Downloaded {} ({} bytes)", file, downloaded);
        Ok(Fetched::Downloaded)
    }

    fn file_url(&self, repo_id: &str, revision: &str, file: &str) -> String {
        format!("{}/{}/resolve/{}/{}", self.endpoint, repo_id, revision, file)
    }
}

/// Directory name for a repo id or revision: `org/name` becomes `org--name`.
pub fn cache_key(id: &str) -> String {
    id.replace('/', "--")
}

/// A file counts as cached once it exists with content.
async fn is_cached(path: &Path) -> bool {
    matches!(fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
