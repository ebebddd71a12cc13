//! A tiny randomly initialised BERT sentence model for tests.
//!
//! The weights are random, so embeddings carry no meaning, but every file has the
//! same layout as a real sentence-transformers export.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::pipeline::{self, ModuleEntry, ModuleKind, SentenceConfig};
use crate::{DenseConfig, PoolingConfig};

pub const HIDDEN_SIZE: usize = 8;
pub const MAX_POSITION_EMBEDDINGS: usize = 32;
pub const MAX_SEQ_LENGTH: usize = 16;

const INTERMEDIATE_SIZE: usize = 16;
const NUM_LAYERS: usize = 1;
const TYPE_VOCAB_SIZE: usize = 2;

const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "quick", "brown", "fox", "jumps", "over",
    "lazy", "dog", "this", "is", "a", "test", "sentence", "hello", "world", "cat",
];

/// Which parts of a sentence-transformers export to write.
#[derive(Debug, Clone)]
pub struct TinyModel {
    /// Write `modules.json`, `sentence_bert_config.json` and the pooling config.
    /// Without them the directory looks like a plain Hugging Face checkpoint.
    pub sentence_files: bool,
    /// Add a Dense projection to this many features after pooling.
    pub dense_out_features: Option<usize>,
    pub normalize: bool,
}

impl Default for TinyModel {
    fn default() -> Self {
        Self {
            sentence_files: true,
            dense_out_features: None,
            normalize: true,
        }
    }
}

impl TinyModel {
    /// Write the model files into `dir`, creating it if needed.
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        fs::write(dir.join(pipeline::CONFIG_FILE), config_json())?;
        fs::write(dir.join(pipeline::TOKENIZER_FILE), tokenizer_json())?;
        fs::write(
            dir.join(pipeline::TOKENIZER_CONFIG_FILE),
            r#"{"do_lower_case": true, "model_max_length": 24}"#,
        )?;
        candle_core::safetensors::save(&bert_weights()?, dir.join("model.safetensors"))
            .context("Failed to write fixture weights")?;

        if !self.sentence_files {
            return Ok(());
        }

        let mut modules = vec![
            ModuleEntry::new(0, ModuleKind::Transformer, ""),
            ModuleEntry::new(1, ModuleKind::Pooling, pipeline::DEFAULT_POOLING_PATH),
        ];

        let pooling_dir = dir.join(pipeline::DEFAULT_POOLING_PATH);
        fs::create_dir_all(&pooling_dir)?;
        fs::write(
            pooling_dir.join(pipeline::CONFIG_FILE),
            serde_json::to_string_pretty(&PoolingConfig::mean(HIDDEN_SIZE))?,
        )?;

        if let Some(out_features) = self.dense_out_features {
            let path = format!("{}_Dense", modules.len());
            let dense_dir = dir.join(&path);
            fs::create_dir_all(&dense_dir)?;
            let config = DenseConfig {
                in_features: HIDDEN_SIZE,
                out_features,
                bias: true,
                activation_function: "torch.nn.modules.activation.Tanh".to_string(),
            };
            fs::write(dense_dir.join(pipeline::CONFIG_FILE), serde_json::to_string_pretty(&config)?)?;

            let mut tensors = HashMap::new();
            tensors.insert("linear.weight".to_string(), random(&[out_features, HIDDEN_SIZE])?);
            tensors.insert("linear.bias".to_string(), random(&[out_features])?);
            candle_core::safetensors::save(&tensors, dense_dir.join("model.safetensors"))?;

            modules.push(ModuleEntry::new(modules.len(), ModuleKind::Dense, &path));
        }

        if self.normalize {
            let path = format!("{}_Normalize", modules.len());
            modules.push(ModuleEntry::new(modules.len(), ModuleKind::Normalize, &path));
        }

        fs::write(
            dir.join(pipeline::MODULES_FILE),
            serde_json::to_string_pretty(&modules)?,
        )?;
        fs::write(
            dir.join(pipeline::SENTENCE_CONFIG_FILE),
            serde_json::to_string_pretty(&SentenceConfig {
                max_seq_length: Some(MAX_SEQ_LENGTH),
                do_lower_case: false,
            })?,
        )?;

        Ok(())
    }
}

fn config_json() -> String {
    serde_json::json!({
        "architectures": ["BertModel"],
        "model_type": "bert",
        "vocab_size": VOCAB.len(),
        "hidden_size": HIDDEN_SIZE,
        "num_hidden_layers": NUM_LAYERS,
        "num_attention_heads": 2,
        "intermediate_size": INTERMEDIATE_SIZE,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "attention_probs_dropout_prob": 0.1,
        "max_position_embeddings": MAX_POSITION_EMBEDDINGS,
        "type_vocab_size": TYPE_VOCAB_SIZE,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": true,
        "classifier_dropout": null
    })
    .to_string()
}

fn tokenizer_json() -> String {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), serde_json::Value::from(id)))
        .collect();

    serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    })
    .to_string()
}

fn random(shape: &[usize]) -> Result<Tensor> {
    Ok(Tensor::randn(0f32, 0.5, shape, &Device::Cpu)?)
}

fn ones(size: usize) -> Result<Tensor> {
    Ok(Tensor::ones(size, DType::F32, &Device::Cpu)?)
}

fn zeros(size: usize) -> Result<Tensor> {
    Ok(Tensor::zeros(size, DType::F32, &Device::Cpu)?)
}

/// Tensors named the way candle's `BertModel::load` looks them up.
fn bert_weights() -> Result<HashMap<String, Tensor>> {
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    let h = HIDDEN_SIZE;

    let layer_norm = |tensors: &mut HashMap<String, Tensor>, prefix: &str| -> Result<()> {
        tensors.insert(format!("{prefix}.LayerNorm.weight"), ones(h)?);
        tensors.insert(format!("{prefix}.LayerNorm.bias"), zeros(h)?);
        Ok(())
    };
    let linear = |tensors: &mut HashMap<String, Tensor>, prefix: &str, out: usize, inp: usize| -> Result<()> {
        tensors.insert(format!("{prefix}.weight"), random(&[out, inp])?);
        tensors.insert(format!("{prefix}.bias"), zeros(out)?);
        Ok(())
    };

    tensors.insert("embeddings.word_embeddings.weight".into(), random(&[VOCAB.len(), h])?);
    tensors.insert(
        "embeddings.position_embeddings.weight".into(),
        random(&[MAX_POSITION_EMBEDDINGS, h])?,
    );
    tensors.insert(
        "embeddings.token_type_embeddings.weight".into(),
        random(&[TYPE_VOCAB_SIZE, h])?,
    );
    layer_norm(&mut tensors, "embeddings")?;

    for i in 0..NUM_LAYERS {
        let layer = format!("encoder.layer.{i}");
        for name in ["query", "key", "value"] {
            linear(&mut tensors, &format!("{layer}.attention.self.{name}"), h, h)?;
        }
        linear(&mut tensors, &format!("{layer}.attention.output.dense"), h, h)?;
        layer_norm(&mut tensors, &format!("{layer}.attention.output"))?;
        linear(&mut tensors, &format!("{layer}.intermediate.dense"), INTERMEDIATE_SIZE, h)?;
        linear(&mut tensors, &format!("{layer}.output.dense"), h, INTERMEDIATE_SIZE)?;
        layer_norm(&mut tensors, &format!("{layer}.output"))?;
    }

    Ok(tensors)
}
