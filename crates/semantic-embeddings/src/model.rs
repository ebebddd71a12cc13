use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use serde::Deserialize;
use tokenizers::{Tokenizer, TruncationParams};

use crate::dense::DenseLayer;
use crate::pooling::PoolingConfig;

/// The subset of a Hugging Face `config.json` needed outside of candle's own config.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformerConfig {
    pub hidden_size: usize,
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub model_type: Option<String>,
}

impl TransformerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse config.json")?;
        if let Some(model_type) = &config.model_type {
            if model_type != "bert" {
                anyhow::bail!("Unsupported model architecture: {} (only BERT is supported)", model_type);
            }
        }
        Ok(config)
    }
}

/// Device used for inference and for loading dense layers.
// Use CPU for now (Metal/CUDA support can be added later)
pub fn device() -> Device {
    Device::Cpu
}

/// Weights of the transformer, in whichever format the checkpoint ships.
pub enum Weights<'a> {
    Safetensors(Vec<u8>),
    Pytorch(&'a std::path::Path),
}

/// Everything after the transformer: pooling, dense projections, normalization.
pub struct Head {
    pub pooling: PoolingConfig,
    pub dense: Vec<DenseLayer>,
    pub normalize: bool,
}

/// Model manager handles inference with the sentence transformer stack
pub struct ModelManager {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    head: Head,
    lowercase: bool,
}

impl ModelManager {
    /// Build the transformer from its config, tokenizer and weights.
    ///
    /// # Arguments
    /// * `config_json` - JSON string containing model config
    /// * `tokenizer_json` - JSON string containing tokenizer config
    /// * `weights` - Transformer weights
    /// * `max_seq_length` - Inputs are truncated to this many tokens
    pub fn load(
        config_json: &str,
        tokenizer_json: &str,
        weights: Weights<'_>,
        max_seq_length: usize,
        lowercase: bool,
        head: Head,
    ) -> Result<Self> {
        let device = device();

        let mut tokenizer = Tokenizer::from_bytes(tokenizer_json.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        // Hub tokenizer.json files often carry fixed padding (e.g. 128), which changes
        // candle's BERT output. Sequences are padded per batch below instead.
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_seq_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;

        let config: Config =
            serde_json::from_str(config_json).context("Failed to parse config.json")?;

        let vb = match weights {
            Weights::Safetensors(bytes) => {
                VarBuilder::from_buffered_safetensors(bytes, DType::F32, &device)?
            }
            Weights::Pytorch(path) => VarBuilder::from_pth(path, DType::F32, &device)?,
        };

        let model = BertModel::load(vb, &config).context("Failed to load BERT weights")?;

        Ok(Self {
            model,
            tokenizer,
            device,
            head,
            lowercase,
        })
    }

    /// Encode a single text into embedding vector
    pub fn encode_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.encode_batch(&[text.to_string()])?;
        embeddings.pop().context("Model produced no embedding")
    }

    /// Encode multiple texts in batch
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings: Vec<_> = texts
            .iter()
            .map(|text| {
                let text = if self.lowercase {
                    text.to_lowercase()
                } else {
                    text.clone()
                };
                self.tokenizer
                    .encode(text, true)
                    .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        // Find max length for padding
        let max_len = encodings.iter().map(|e| e.len()).max().unwrap_or(0);
        if max_len == 0 {
            anyhow::bail!("Tokenizer produced no tokens for the given input");
        }

        let mut all_token_ids = Vec::with_capacity(encodings.len());
        let mut all_masks = Vec::with_capacity(encodings.len());

        for encoding in &encodings {
            let mut padded_tokens = encoding.get_ids().to_vec();
            let mut mask = vec![1u32; padded_tokens.len()];

            padded_tokens.resize(max_len, 0); // PAD token
            mask.resize(max_len, 0);

            all_token_ids.push(padded_tokens);
            all_masks.push(mask);
        }

        let token_ids = Tensor::new(all_token_ids, &self.device)?;
        let token_type_ids = token_ids.zeros_like()?;
        let attention_mask = Tensor::new(all_masks, &self.device)?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;

        let mut features = self.head.pooling.pool(&output, &attention_mask)?;
        for layer in &self.head.dense {
            features = layer.forward(&features)?;
        }
        if self.head.normalize {
            features = normalize(&features)?;
        }

        features
            .to_vec2::<f32>()
            .context("Failed to convert tensor to vec")
    }
}

/// Normalize embeddings to unit length (L2 normalization)
///
/// Projects embeddings onto the unit hypersphere so cosine similarity becomes
/// equivalent to dot product.
fn normalize(embeddings: &Tensor) -> Result<Tensor> {
    let norm = embeddings
        .sqr()?
        .sum_keepdim(embeddings.dims().len() - 1)?
        .sqrt()?
        .clamp(1e-12, f64::MAX)?;

    embeddings
        .broadcast_div(&norm)
        .context("Normalization failed")
}
