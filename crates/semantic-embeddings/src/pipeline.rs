//! Sentence-transformers directory layout.
//!
//! A saved sentence-transformers model is a directory with a `modules.json`
//! listing the module stack (transformer, pooling, dense, normalize) and one
//! sub-directory of configuration/weights per module.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
pub const MODULES_FILE: &str = "modules.json";
pub const SENTENCE_CONFIG_FILE: &str = "sentence_bert_config.json";
pub const SENTENCE_TRANSFORMERS_CONFIG_FILE: &str = "config_sentence_transformers.json";

/// Weight file names in order of preference.
pub const WEIGHT_FILES: &[&str] = &["model.safetensors", "pytorch_model.bin"];

/// Directory used for the pooling module when the source model has no `modules.json`.
pub const DEFAULT_POOLING_PATH: &str = "1_Pooling";

/// One line of `modules.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub idx: usize,
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Transformer,
    Pooling,
    Dense,
    Normalize,
}

impl ModuleKind {
    /// Map a python class path such as `sentence_transformers.models.Pooling`.
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        match type_name.rsplit('.').next()? {
            "Transformer" => Some(Self::Transformer),
            "Pooling" => Some(Self::Pooling),
            "Dense" => Some(Self::Dense),
            "Normalize" => Some(Self::Normalize),
            _ => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Self::Transformer => "sentence_transformers.models.Transformer",
            Self::Pooling => "sentence_transformers.models.Pooling",
            Self::Dense => "sentence_transformers.models.Dense",
            Self::Normalize => "sentence_transformers.models.Normalize",
        }
    }
}

/// A file belonging to a module. `candidates` are alternative names tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub candidates: Vec<String>,
    pub required: bool,
}

impl Artifact {
    fn required(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            required: true,
        }
    }

    fn optional(name: String) -> Self {
        Self {
            candidates: vec![name],
            required: false,
        }
    }
}

impl ModuleEntry {
    pub fn new(idx: usize, kind: ModuleKind, path: &str) -> Self {
        Self {
            idx,
            name: idx.to_string(),
            path: path.to_string(),
            type_name: kind.type_name().to_string(),
        }
    }

    pub fn kind(&self) -> Result<ModuleKind> {
        ModuleKind::from_type_name(&self.type_name)
            .with_context(|| format!("Unsupported module type: {}", self.type_name))
    }

    /// Relative path of `file` inside this module's directory.
    pub fn file(&self, file: &str) -> String {
        join_relative(&self.path, file)
    }

    /// Files this module reads when loading.
    pub fn artifacts(&self) -> Result<Vec<Artifact>> {
        let artifacts = match self.kind()? {
            ModuleKind::Transformer => transformer_artifacts(&self.path),
            ModuleKind::Pooling => vec![Artifact::required(vec![self.file(CONFIG_FILE)])],
            ModuleKind::Dense => vec![
                Artifact::required(vec![self.file(CONFIG_FILE)]),
                weights_artifact(&self.path),
            ],
            ModuleKind::Normalize => Vec::new(),
        };
        Ok(artifacts)
    }
}

/// Files of a Hugging Face transformer checkpoint rooted at `prefix`.
pub fn transformer_artifacts(prefix: &str) -> Vec<Artifact> {
    let file = |name: &str| join_relative(prefix, name);
    vec![
        Artifact::required(vec![file(CONFIG_FILE)]),
        Artifact::required(vec![file(TOKENIZER_FILE)]),
        weights_artifact(prefix),
        Artifact::optional(file(SENTENCE_CONFIG_FILE)),
        Artifact::optional(file(TOKENIZER_CONFIG_FILE)),
        Artifact::optional(file("special_tokens_map.json")),
        Artifact::optional(file("vocab.txt")),
    ]
}

/// Weight file of the module rooted at `prefix`, safetensors preferred.
pub fn weights_artifact(prefix: &str) -> Artifact {
    Artifact::required(WEIGHT_FILES.iter().map(|f| join_relative(prefix, f)).collect())
}

/// Files that live at the model root regardless of the module stack.
pub fn root_artifacts() -> Vec<Artifact> {
    vec![
        Artifact::optional(MODULES_FILE.to_string()),
        Artifact::optional(SENTENCE_TRANSFORMERS_CONFIG_FILE.to_string()),
    ]
}

/// Parse `modules.json` text, ordered by `idx`.
pub fn parse_modules(json: &str) -> Result<Vec<ModuleEntry>> {
    let mut entries: Vec<ModuleEntry> =
        serde_json::from_str(json).context("Failed to parse modules.json")?;
    entries.sort_by_key(|e| e.idx);

    for entry in &entries {
        check_module_path(&entry.path)?;
    }

    let transformers = entries
        .iter()
        .filter(|e| matches!(e.kind(), Ok(ModuleKind::Transformer)))
        .count();
    if transformers != 1 {
        anyhow::bail!(
            "modules.json must list exactly one Transformer module, found {}",
            transformers
        );
    }

    Ok(entries)
}

/// Read `modules.json` from `model_dir`, or `None` when the directory is a plain checkpoint.
pub fn read_modules(model_dir: &Path) -> Result<Option<Vec<ModuleEntry>>> {
    let path = model_dir.join(MODULES_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_modules(&json).map(Some)
}

/// The stack sentence-transformers builds for a plain checkpoint: transformer + mean pooling.
pub fn default_modules() -> Vec<ModuleEntry> {
    vec![
        ModuleEntry::new(0, ModuleKind::Transformer, ""),
        ModuleEntry::new(1, ModuleKind::Pooling, DEFAULT_POOLING_PATH),
    ]
}

/// `sentence_bert_config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceConfig {
    #[serde(default)]
    pub max_seq_length: Option<usize>,
    #[serde(default)]
    pub do_lower_case: bool,
}

/// Module directories are joined onto the model, cache and output directories,
/// so they must stay inside them.
fn check_module_path(path: &str) -> Result<()> {
    let inside = !path.contains('\\')
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !inside {
        anyhow::bail!("Module path must be relative to the model directory: {:?}", path);
    }
    Ok(())
}

fn join_relative(prefix: &str, file: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file.to_string()
    } else {
        format!("{}/{}", prefix, file)
    }
}
