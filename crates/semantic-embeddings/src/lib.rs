#![deny(clippy::all)]

mod dense;
#[cfg(feature = "test-fixtures")]
pub mod fixtures;
mod model;
pub mod pipeline;
mod pooling;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub use dense::DenseConfig;
pub use model::TransformerConfig;
pub use pipeline::{Artifact, ModuleEntry, ModuleKind, SentenceConfig};
pub use pooling::PoolingConfig;

use dense::DenseLayer;
use model::{Head, ModelManager, Weights};

/// Type alias for an embedding vector.
pub type Embedding = Vec<f32>;

/// A loaded sentence-transformers model.
///
/// Wraps ModelManager with the module stack read from the model directory, and
/// remembers which files it was loaded from so it can save itself elsewhere.
///
/// # Example
/// ```ignore
/// use semantic_embeddings::SemanticEmbeddings;
/// use std::path::Path;
///
/// let model = SemanticEmbeddings::load_from_dir(Path::new("models/all-MiniLM-L6-v2"))?;
/// println!("Embedding dimension: {}", model.sentence_embedding_dimension());
///
/// let embedding = model.encode("Hello world")?;
/// ```
pub struct SemanticEmbeddings {
    model: ModelManager,
    modules: Vec<ModuleEntry>,
    sentence_config: SentenceConfig,
    pooling: PoolingConfig,
    dimension: usize,
    max_seq_length: usize,
    source_dir: PathBuf,
    /// Files (relative to `source_dir`) the model was loaded from
    artifacts: Vec<String>,
}

impl SemanticEmbeddings {
    /// Load a model from a sentence-transformers directory or a plain BERT checkpoint.
    ///
    /// # Expected files
    /// - `config.json` - Model configuration
    /// - `tokenizer.json` - Tokenizer configuration
    /// - `model.safetensors` (or `pytorch_model.bin`) - Model weights
    /// - `modules.json` and per-module configs, when saved by sentence-transformers
    pub fn load_from_dir(model_dir: &Path) -> Result<Self> {
        if !model_dir.is_dir() {
            anyhow::bail!("Model directory not found: {}", model_dir.display());
        }

        let from_modules_file = pipeline::read_modules(model_dir)?;
        let has_modules_file = from_modules_file.is_some();
        let modules = from_modules_file.unwrap_or_else(pipeline::default_modules);

        let mut artifacts = Vec::new();
        if has_modules_file {
            for artifact in pipeline::root_artifacts() {
                collect_artifact(model_dir, &artifact, &mut artifacts)?;
            }
        }

        let transformer = modules
            .iter()
            .find(|m| matches!(m.kind(), Ok(ModuleKind::Transformer)))
            .context("Model has no Transformer module")?;
        for artifact in pipeline::transformer_artifacts(&transformer.path) {
            collect_artifact(model_dir, &artifact, &mut artifacts)?;
        }

        let config_json = read_text(model_dir, &transformer.file(pipeline::CONFIG_FILE))?;
        let tokenizer_json = read_text(model_dir, &transformer.file(pipeline::TOKENIZER_FILE))?;
        let transformer_config = TransformerConfig::from_json(&config_json)?;

        let sentence_config_file = transformer.file(pipeline::SENTENCE_CONFIG_FILE);
        let sentence_config = match read_optional(model_dir, &sentence_config_file)? {
            Some(json) => serde_json::from_str::<SentenceConfig>(&json)
                .context("Failed to parse sentence_bert_config.json")?,
            None => SentenceConfig::default(),
        };

        let tokenizer_max_length =
            read_optional(model_dir, &transformer.file(pipeline::TOKENIZER_CONFIG_FILE))?
                .map(|json| tokenizer_model_max_length(&json))
                .transpose()?
                .flatten();

        let max_seq_length =
            resolve_max_seq_length(&sentence_config, &transformer_config, tokenizer_max_length);
        if max_seq_length == 0 {
            anyhow::bail!("Model reports a max_seq_length of 0");
        }

        let mut pooling = None;
        let mut dense = Vec::new();
        let mut normalize = false;
        let mut dimension = None;

        for module in &modules {
            match module.kind()? {
                ModuleKind::Transformer => {}
                ModuleKind::Pooling => {
                    let config = if has_modules_file {
                        for artifact in module.artifacts()? {
                            collect_artifact(model_dir, &artifact, &mut artifacts)?;
                        }
                        let json = read_text(model_dir, &module.file(pipeline::CONFIG_FILE))?;
                        PoolingConfig::from_json(&json)?
                    } else {
                        PoolingConfig::mean(transformer_config.hidden_size)
                    };
                    if config.word_embedding_dimension != transformer_config.hidden_size {
                        anyhow::bail!(
                            "Pooling expects {}-dimensional token embeddings but the transformer produces {}",
                            config.word_embedding_dimension,
                            transformer_config.hidden_size
                        );
                    }
                    dimension = Some(config.output_dimension());
                    pooling = Some(config);
                }
                ModuleKind::Dense => {
                    let json = read_text(model_dir, &module.file(pipeline::CONFIG_FILE))?;
                    let config: DenseConfig =
                        serde_json::from_str(&json).context("Failed to parse dense config")?;
                    let weights =
                        find_existing(model_dir, &pipeline::weights_artifact(&module.path))
                            .context("Dense module has no weights")?;
                    for artifact in module.artifacts()? {
                        collect_artifact(model_dir, &artifact, &mut artifacts)?;
                    }

                    let layer =
                        DenseLayer::load(&config, &model_dir.join(&weights), &model::device())?;
                    dimension = Some(layer.out_features());
                    dense.push(layer);
                }
                ModuleKind::Normalize => normalize = true,
            }
        }

        let pooling = pooling.context("Model has no Pooling module")?;
        let dimension = dimension.unwrap_or(transformer_config.hidden_size);

        let weights_file =
            find_existing(model_dir, &pipeline::weights_artifact(&transformer.path))
                .context("Model weights not found")?;
        let weights_path = model_dir.join(&weights_file);
        let weights = if weights_file.ends_with(".bin") {
            Weights::Pytorch(&weights_path)
        } else {
            Weights::Safetensors(
                fs::read(&weights_path)
                    .with_context(|| format!("Failed to read {}", weights_path.display()))?,
            )
        };

        let model = ModelManager::load(
            &config_json,
            &tokenizer_json,
            weights,
            max_seq_length,
            sentence_config.do_lower_case,
            Head {
                pooling: pooling.clone(),
                dense,
                normalize,
            },
        )?;

        tracing::debug!(
            "Loaded model from {} ({} modules, dimension {}, max_seq_length {})",
            model_dir.display(),
            modules.len(),
            dimension,
            max_seq_length
        );

        Ok(Self {
            model,
            modules,
            sentence_config,
            pooling,
            dimension,
            max_seq_length,
            source_dir: model_dir.to_path_buf(),
            artifacts,
        })
    }

    /// Size of the vectors returned by `encode()`.
    pub fn sentence_embedding_dimension(&self) -> usize {
        self.dimension
    }

    /// Maximum number of tokens per input; longer inputs are truncated.
    pub fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    /// Encode a single text into an embedding vector.
    pub fn encode(&self, text: &str) -> Result<Embedding> {
        self.model.encode_single(text)
    }

    /// Encode multiple texts in batch (more efficient than multiple encode() calls).
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.model.encode_batch(texts)
    }

    /// Save the model as a sentence-transformers directory.
    ///
    /// Copies every file the model was loaded from, then writes `modules.json`,
    /// `sentence_bert_config.json` and the pooling config when the source lacked them.
    /// Existing files in `output_dir` are overwritten.
    pub fn save(&self, output_dir: &Path) -> Result<()> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        if !same_dir(&self.source_dir, output_dir) {
            for relative in &self.artifacts {
                let from = self.source_dir.join(relative);
                let to = output_dir.join(relative);
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&from, &to).with_context(|| {
                    format!("Failed to copy {} to {}", from.display(), to.display())
                })?;
                tracing::debug!("Saved {}", relative);
            }
        }

        let has = |relative: &str| self.artifacts.iter().any(|a| a == relative);

        if !has(pipeline::MODULES_FILE) {
            write_json(&output_dir.join(pipeline::MODULES_FILE), &self.modules)?;
        }

        let transformer = self
            .modules
            .iter()
            .find(|m| matches!(m.kind(), Ok(ModuleKind::Transformer)))
            .context("Model has no Transformer module")?;
        let sentence_config_file = transformer.file(pipeline::SENTENCE_CONFIG_FILE);
        if !has(&sentence_config_file) {
            let config = SentenceConfig {
                max_seq_length: Some(self.max_seq_length),
                do_lower_case: self.sentence_config.do_lower_case,
            };
            write_json(&output_dir.join(&sentence_config_file), &config)?;
        }

        for module in &self.modules {
            if matches!(module.kind(), Ok(ModuleKind::Pooling)) {
                let pooling_file = module.file(pipeline::CONFIG_FILE);
                if !has(&pooling_file) {
                    write_json(&output_dir.join(&pooling_file), &self.pooling)?;
                }
            }
        }

        Ok(())
    }
}

/// Resolve the maximum sequence length the way sentence-transformers does.
///
/// The explicit `sentence_bert_config.json` value wins; otherwise the smaller of the
/// position-embedding limit and the tokenizer's `model_max_length`.
pub fn resolve_max_seq_length(
    sentence_config: &SentenceConfig,
    transformer_config: &TransformerConfig,
    tokenizer_max_length: Option<usize>,
) -> usize {
    if let Some(length) = sentence_config.max_seq_length {
        return length;
    }
    let positions = transformer_config.max_position_embeddings;
    tokenizer_max_length.map_or(positions, |length| length.min(positions))
}

/// `model_max_length` from `tokenizer_config.json`.
///
/// Tokenizers without a limit store a huge float (1e30) here, which is treated as absent.
fn tokenizer_model_max_length(json: &str) -> Result<Option<usize>> {
    let value: serde_json::Value =
        serde_json::from_str(json).context("Failed to parse tokenizer_config.json")?;
    let length = value
        .get("model_max_length")
        .and_then(|v| v.as_f64())
        .filter(|&v| v >= 1.0 && v < u32::MAX as f64)
        .map(|v| v as usize);
    Ok(length)
}

/// First candidate of `artifact` present in `model_dir`.
fn find_existing(model_dir: &Path, artifact: &Artifact) -> Option<String> {
    artifact
        .candidates
        .iter()
        .find(|candidate| model_dir.join(candidate).is_file())
        .cloned()
}

/// Record the file `artifact` resolves to, failing if a required one is absent.
fn collect_artifact(
    model_dir: &Path,
    artifact: &Artifact,
    artifacts: &mut Vec<String>,
) -> Result<()> {
    match find_existing(model_dir, artifact) {
        Some(found) => {
            if !artifacts.contains(&found) {
                artifacts.push(found);
            }
            Ok(())
        }
        None if artifact.required => anyhow::bail!(
            "Missing {} in {}",
            artifact.candidates.join(" or "),
            model_dir.display()
        ),
        None => Ok(()),
    }
}

fn read_text(model_dir: &Path, relative: &str) -> Result<String> {
    let path = model_dir.join(relative);
    fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_optional(model_dir: &Path, relative: &str) -> Result<Option<String>> {
    let path = model_dir.join(relative);
    if path.is_file() {
        read_text(model_dir, relative).map(Some)
    } else {
        Ok(None)
    }
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
