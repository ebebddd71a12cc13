//! model-export: save a pretrained sentence-embedding model to a local directory.
//!
//! The model is resolved from a local directory or downloaded from the Hugging Face
//! Hub, loaded to check it is usable, saved as a sentence-transformers directory,
//! and summarised in a `model_info.txt` file.

pub mod config;
pub mod converter;
pub mod error;
pub mod hub;
pub mod model_info;

pub use config::{Config, ConfigError};
pub use converter::{convert, Converter, ModelSource};
pub use error::ExportError;
pub use hub::HubClient;
pub use model_info::{ModelInfo, MODEL_INFO_FILE, MODEL_INFO_VERSION};
