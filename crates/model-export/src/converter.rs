//! Load a sentence-embedding model, save it to a directory and record its properties.

use semantic_embeddings::SemanticEmbeddings;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::{validate_model_name, Config};
use crate::error::ExportError;
use crate::hub::HubClient;
use crate::model_info::ModelInfo;

/// Encoded once after loading to confirm the reported dimension.
const SAMPLE_TEXT: &str = "This is a test sentence.";

/// Where a model identifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// An existing directory on disk
    Local(PathBuf),
    /// A repository on the model hub
    Hub { repo_id: String, revision: String },
}

impl ModelSource {
    /// An identifier naming an existing directory is local; anything else is a hub repo id.
    pub fn parse(model_name: &str, revision: &str) -> Self {
        let path = Path::new(model_name);
        if path.is_dir() {
            Self::Local(path.to_path_buf())
        } else {
            Self::Hub {
                repo_id: model_name.to_string(),
                revision: revision.to_string(),
            }
        }
    }
}

/// Runs exports against one hub configuration.
pub struct Converter {
    hub: HubClient,
    revision: String,
}

impl Converter {
    pub fn new(config: &Config) -> Result<Self, ExportError> {
        config.validate()?;
        Ok(Self {
            hub: HubClient::new(config)?,
            revision: config.revision.clone(),
        })
    }

    /// Load `model_name`, save it into `output_dir` and write `model_info.txt` there.
    ///
    /// Nothing is written to `output_dir` unless the model loads. A failure after
    /// that point leaves whatever was already written in place.
    pub async fn convert(&self, model_name: &str, output_dir: &Path) -> Result<ModelInfo, ExportError> {
        validate_model_name(model_name)?;

        println!("Loading model: {}", model_name);
        let model = self.load(model_name).await?;

        fs::create_dir_all(output_dir)
            .await
            .map_err(|e| ExportError::io(format!("Failed to create {}", output_dir.display()), e))?;

        println!("Exporting model...");
        model.save(output_dir).map_err(ExportError::Model)?;

        let info = ModelInfo::new(
            model_name,
            model.sentence_embedding_dimension(),
            model.max_seq_length(),
        );
        let info_path = info.write_to(output_dir).await?;
        tracing::debug!("Wrote {}", info_path.display());

        println!("Model saved to: {}", output_dir.display());
        println!("Model info: {}", info);

        Ok(info)
    }

    /// Resolve the identifier to a local directory and load the model from it.
    async fn load(&self, model_name: &str) -> Result<SemanticEmbeddings, ExportError> {
        let model_dir = match ModelSource::parse(model_name, &self.revision) {
            ModelSource::Local(dir) => {
                tracing::info!("Loading model from local directory {}", dir.display());
                dir
            }
            ModelSource::Hub { repo_id, revision } => {
                self.hub.download_model(&repo_id, &revision).await?
            }
        };

        let model = SemanticEmbeddings::load_from_dir(&model_dir).map_err(ExportError::Model)?;
        check_dimension(&model)?;

        tracing::info!(
            "Loaded model (dimension {}, max_seq_length {})",
            model.sentence_embedding_dimension(),
            model.max_seq_length()
        );
        Ok(model)
    }
}

/// Encode `SAMPLE_TEXT` and check the vector has the reported dimension.
fn check_dimension(model: &SemanticEmbeddings) -> Result<(), ExportError> {
    let embedding = model.encode(SAMPLE_TEXT).map_err(ExportError::Model)?;
    let reported = model.sentence_embedding_dimension();
    if embedding.len() != reported {
        return Err(ExportError::DimensionMismatch {
            reported,
            produced: embedding.len(),
        });
    }
    Ok(())
}

/// Export `model_name` into `output_dir` using hub settings from the environment.
pub async fn convert(model_name: &str, output_dir: &Path) -> Result<ModelInfo, ExportError> {
    let config = Config::from_env()?;
    Converter::new(&config)?.convert(model_name, output_dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_existing_directory_is_local() {
        let temp_dir = TempDir::new().unwrap();
        let name = temp_dir.path().to_str().unwrap();
        assert_eq!(
            ModelSource::parse(name, "main"),
            ModelSource::Local(temp_dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_repo_id_is_hub() {
        assert_eq!(
            ModelSource::parse("sentence-transformers/all-MiniLM-L6-v2", "main"),
            ModelSource::Hub {
                repo_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
                revision: "main".to_string(),
            }
        );
    }
}
