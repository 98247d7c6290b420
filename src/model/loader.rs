//! Resolution of model assets from a local directory or the Hugging Face hub.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::Device;

/// Paths to the three files every pipeline needs.
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Look for the files in `local_dir` first; fall back to downloading
    /// `model_id` from the hub (cached under `~/.cache/huggingface`).
    pub fn locate(model_id: &str, local_dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = local_dir {
            let candidate = Self {
                config: dir.join("config.json"),
                tokenizer: dir.join("tokenizer.json"),
                weights: dir.join("model.safetensors"),
            };
            if candidate.config.exists()
                && candidate.tokenizer.exists()
                && candidate.weights.exists()
            {
                tracing::info!(model = model_id, dir = %dir.display(), "loading model from local directory");
                return Ok(candidate);
            }
        }

        tracing::info!(model = model_id, "fetching model files from the Hugging Face hub");
        let api = hf_hub::api::sync::Api::new()?;
        let repo = api.model(model_id.to_string());
        Ok(Self {
            config: repo
                .get("config.json")
                .with_context(|| format!("{model_id}: config.json"))?,
            tokenizer: repo
                .get("tokenizer.json")
                .with_context(|| format!("{model_id}: tokenizer.json"))?,
            weights: repo
                .get("model.safetensors")
                .with_context(|| format!("{model_id}: model.safetensors"))?,
        })
    }
}

/// Best available device. GPU backends need the matching candle build
/// feature, otherwise construction fails and we land on the CPU.
pub fn select_device() -> Device {
    if let Ok(device) = Device::new_cuda(0) {
        tracing::info!("using CUDA device");
        device
    } else if let Ok(device) = Device::new_metal(0) {
        tracing::info!("using Metal device");
        device
    } else {
        tracing::info!("using CPU device");
        Device::Cpu
    }
}
