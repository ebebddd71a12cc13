//! The `model_info.txt` summary written next to an exported model.

use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::ExportError;

pub const MODEL_INFO_FILE: &str = "model_info.txt";

/// Version recorded for every export.
pub const MODEL_INFO_VERSION: &str = "1.0.0";

const KEYS: [&str; 4] = ["name", "version", "dimension", "max_seq_length"];

/// Summary of an exported model, one `key=value` line per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub dimension: usize,
    pub max_seq_length: usize,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>, dimension: usize, max_seq_length: usize) -> Self {
        Self {
            name: name.into(),
            version: MODEL_INFO_VERSION.to_string(),
            dimension,
            max_seq_length,
        }
    }

    /// Fields in file order.
    pub fn entries(&self) -> [(&'static str, String); 4] {
        [
            (KEYS[0], self.name.clone()),
            (KEYS[1], self.version.clone()),
            (KEYS[2], self.dimension.to_string()),
            (KEYS[3], self.max_seq_length.to_string()),
        ]
    }

    /// Render as the contents of `model_info.txt`.
    pub fn render(&self) -> String {
        self.entries()
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }

    /// Parse `model_info.txt` contents. Keys must appear exactly once, in file order.
    pub fn parse(text: &str) -> Result<Self, ExportError> {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() != KEYS.len() {
            return Err(ExportError::InvalidInfo(format!(
                "expected {} lines, found {}",
                KEYS.len(),
                lines.len()
            )));
        }

        let mut values = Vec::with_capacity(KEYS.len());
        for (line, expected) in lines.iter().zip(KEYS) {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| ExportError::InvalidInfo(format!("not a key=value line: {:?}", line)))?;
            if key != expected {
                return Err(ExportError::InvalidInfo(format!(
                    "expected key {:?}, found {:?}",
                    expected, key
                )));
            }
            if value.is_empty() {
                return Err(ExportError::InvalidInfo(format!("empty value for {}", key)));
            }
            values.push(value);
        }

        let number = |key: &str, value: &str| {
            value
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| ExportError::InvalidInfo(format!("{} must be a positive integer, got {:?}", key, value)))
        };

        Ok(Self {
            name: values[0].to_string(),
            version: values[1].to_string(),
            dimension: number(KEYS[2], values[2])?,
            max_seq_length: number(KEYS[3], values[3])?,
        })
    }

    /// Write `model_info.txt` into `dir`, replacing any previous file.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        let path = dir.join(MODEL_INFO_FILE);
        fs::write(&path, self.render())
            .await
            .map_err(|e| ExportError::io(format!("Failed to write {}", path.display()), e))?;
        Ok(path)
    }

    /// Read `model_info.txt` back from `dir`.
    pub async fn read_from(dir: &Path) -> Result<Self, ExportError> {
        let path = dir.join(MODEL_INFO_FILE);
        let text = fs::read_to_string(&path)
            .await
            .map_err(|e| ExportError::io(format!("Failed to read {}", path.display()), e))?;
        Self::parse(&text)
    }
}

impl fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name={}, version={}, dimension={}, max_seq_length={}",
            self.name, self.version, self.dimension, self.max_seq_length
        )
    }
}
