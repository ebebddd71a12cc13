use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

const IDENTITY: &str = "torch.nn.modules.linear.Identity";
const TANH: &str = "torch.nn.modules.activation.Tanh";

/// Dense module configuration (`2_Dense/config.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseConfig {
    pub in_features: usize,
    pub out_features: usize,
    #[serde(default = "default_bias")]
    pub bias: bool,
    #[serde(default = "default_activation")]
    pub activation_function: String,
}

fn default_bias() -> bool {
    true
}

fn default_activation() -> String {
    TANH.to_string()
}

#[derive(Debug, Clone, Copy)]
enum Activation {
    Identity,
    Tanh,
}

impl Activation {
    fn parse(name: &str) -> Result<Self> {
        match name {
            IDENTITY => Ok(Self::Identity),
            TANH => Ok(Self::Tanh),
            other => anyhow::bail!("Unsupported dense activation: {}", other),
        }
    }
}

/// A projection layer applied after pooling.
pub struct DenseLayer {
    linear: Linear,
    activation: Activation,
    out_features: usize,
}

impl DenseLayer {
    /// Load from the module directory's config and weight file.
    pub fn load(config: &DenseConfig, weights_path: &Path, device: &Device) -> Result<Self> {
        let activation = Activation::parse(&config.activation_function)?;

        let vb = if weights_path.extension().is_some_and(|ext| ext == "bin") {
            VarBuilder::from_pth(weights_path, DType::F32, device)?
        } else {
            let bytes = std::fs::read(weights_path)
                .with_context(|| format!("Failed to read {}", weights_path.display()))?;
            VarBuilder::from_buffered_safetensors(bytes, DType::F32, device)?
        };
        let vb = vb.pp("linear");

        let weight = vb
            .get((config.out_features, config.in_features), "weight")
            .context("Dense weight does not match its config")?;
        let bias = if config.bias {
            Some(vb.get(config.out_features, "bias")?)
        } else {
            None
        };

        Ok(Self {
            linear: Linear::new(weight, bias),
            activation,
            out_features: config.out_features,
        })
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        let projected = self.linear.forward(features)?;
        let activated = match self.activation {
            Activation::Identity => projected,
            Activation::Tanh => projected.tanh()?,
        };
        Ok(activated)
    }
}
