use anyhow::{Context, Result};
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

/// Pooling module configuration (`1_Pooling/config.json`).
///
/// Enabled modes are concatenated in the order cls, max, mean, mean-sqrt-len,
/// matching sentence-transformers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolingConfig {
    pub word_embedding_dimension: usize,
    #[serde(default)]
    pub pooling_mode_cls_token: bool,
    #[serde(default)]
    pub pooling_mode_mean_tokens: bool,
    #[serde(default)]
    pub pooling_mode_max_tokens: bool,
    #[serde(default)]
    pub pooling_mode_mean_sqrt_len_tokens: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pooling_mode_weightedmean_tokens: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pooling_mode_lasttoken: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PoolingConfig {
    /// Mean pooling over `word_embedding_dimension`, the sentence-transformers default.
    pub fn mean(word_embedding_dimension: usize) -> Self {
        Self {
            word_embedding_dimension,
            pooling_mode_cls_token: false,
            pooling_mode_mean_tokens: true,
            pooling_mode_max_tokens: false,
            pooling_mode_mean_sqrt_len_tokens: false,
            pooling_mode_weightedmean_tokens: false,
            pooling_mode_lasttoken: false,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse pooling config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pooling_mode_weightedmean_tokens || self.pooling_mode_lasttoken {
            anyhow::bail!("Unsupported pooling mode (weighted-mean and last-token are not implemented)");
        }
        if self.mode_count() == 0 {
            anyhow::bail!("Pooling config enables no pooling mode");
        }
        Ok(())
    }

    fn mode_count(&self) -> usize {
        [
            self.pooling_mode_cls_token,
            self.pooling_mode_max_tokens,
            self.pooling_mode_mean_tokens,
            self.pooling_mode_mean_sqrt_len_tokens,
        ]
        .iter()
        .filter(|&&enabled| enabled)
        .count()
    }

    /// Size of the pooled sentence vector.
    pub fn output_dimension(&self) -> usize {
        self.word_embedding_dimension * self.mode_count()
    }

    /// Pool token embeddings `[batch, seq_len, hidden]` into `[batch, output_dimension]`.
    ///
    /// `attention_mask` is `[batch, seq_len]` with 1 for real tokens and 0 for padding.
    pub fn pool(&self, token_embeddings: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let dims = token_embeddings.dims();
        let mask_expanded = attention_mask
            .unsqueeze(2)?
            .broadcast_as((dims[0], dims[1], dims[2]))?
            .to_dtype(DType::F32)?;

        let mut parts = Vec::with_capacity(self.mode_count());

        if self.pooling_mode_cls_token {
            parts.push(token_embeddings.narrow(1, 0, 1)?.squeeze(1)?);
        }

        if self.pooling_mode_max_tokens {
            // Push padding positions far below any real activation before taking the max
            let penalty = mask_expanded.affine(1e9, -1e9)?;
            parts.push(token_embeddings.add(&penalty)?.max(1)?);
        }

        if self.pooling_mode_mean_tokens || self.pooling_mode_mean_sqrt_len_tokens {
            let sum_embeddings = token_embeddings.mul(&mask_expanded)?.sum(1)?;
            // Clamp to avoid division by zero, as sentence-transformers does
            let sum_mask = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;

            if self.pooling_mode_mean_tokens {
                parts.push(sum_embeddings.broadcast_div(&sum_mask)?);
            }
            if self.pooling_mode_mean_sqrt_len_tokens {
                parts.push(sum_embeddings.broadcast_div(&sum_mask.sqrt()?)?);
            }
        }

        Tensor::cat(&parts, 1).context("Failed to concatenate pooled embeddings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    // batch=1, seq=3 (last token is padding), hidden=2
    fn sample() -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let embeddings =
            Tensor::new(&[[[1f32, 4.], [3., 2.], [100., 100.]]], &device).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 0]], &device).unwrap();
        (embeddings, mask)
    }

    fn pooled(config: &PoolingConfig) -> Vec<f32> {
        let (embeddings, mask) = sample();
        config
            .pool(&embeddings, &mask)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec1()
            .unwrap()
    }

    #[test]
    fn test_mean_pooling_ignores_padding() {
        assert_eq!(pooled(&PoolingConfig::mean(2)), vec![2.0, 3.0]);
    }

    #[test]
    fn test_cls_and_max_concatenate() {
        let config = PoolingConfig {
            pooling_mode_cls_token: true,
            pooling_mode_mean_tokens: false,
            pooling_mode_max_tokens: true,
            ..PoolingConfig::mean(2)
        };
        assert_eq!(config.output_dimension(), 4);
        assert_eq!(pooled(&config), vec![1.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn test_mean_sqrt_len() {
        let config = PoolingConfig {
            pooling_mode_mean_tokens: false,
            pooling_mode_mean_sqrt_len_tokens: true,
            ..PoolingConfig::mean(2)
        };
        let values = pooled(&config);
        let sqrt2 = 2f32.sqrt();
        assert!((values[0] - 4.0 / sqrt2).abs() < 1e-5);
        assert!((values[1] - 6.0 / sqrt2).abs() < 1e-5);
    }

    #[test]
    fn test_from_json_ignores_unknown_keys() {
        let json = r#"{
            "word_embedding_dimension": 384,
            "pooling_mode_cls_token": false,
            "pooling_mode_mean_tokens": true,
            "pooling_mode_max_tokens": false,
            "pooling_mode_mean_sqrt_len_tokens": false,
            "include_prompt": true
        }"#;
        let config = PoolingConfig::from_json(json).unwrap();
        assert_eq!(config, PoolingConfig::mean(384));
        assert_eq!(config.output_dimension(), 384);
    }

    #[test]
    fn test_from_json_rejects_unsupported_modes() {
        let json = r#"{"word_embedding_dimension": 8, "pooling_mode_lasttoken": true}"#;
        assert!(PoolingConfig::from_json(json).is_err());

        let none = r#"{"word_embedding_dimension": 8}"#;
        assert!(PoolingConfig::from_json(none).is_err());
    }
}
