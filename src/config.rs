use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "PipelineConfig::summarization_defaults")]
    pub summarization: PipelineConfig,
    #[serde(default = "PipelineConfig::translation_defaults")]
    pub translation: PipelineConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// One model pipeline: where the weights come from and how decoding runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub model_id: String,
    /// Directory with config.json, tokenizer.json and model.safetensors,
    /// checked before the hub.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
    pub max_input_tokens: usize,
    /// Pad every input up to `max_input_tokens`.
    #[serde(default)]
    pub pad_to_max: bool,
    pub max_output_tokens: usize,
    #[serde(default)]
    pub min_output_tokens: usize,
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,
    #[serde(default)]
    pub no_repeat_ngram_size: usize,
    #[serde(default = "default_length_penalty")]
    pub length_penalty: f32,
    #[serde(default)]
    pub early_stopping: bool,
    /// Language code token forced as the first generated token. Only
    /// meaningful for multilingual translation decoders.
    #[serde(default)]
    pub target_language: String,
}

fn default_num_beams() -> usize {
    4
}

fn default_length_penalty() -> f32 {
    1.0
}

impl PipelineConfig {
    pub fn summarization_defaults() -> Self {
        Self {
            model_id: "csebuetnlp/mT5_multilingual_XLSum".to_string(),
            local_dir: None,
            max_input_tokens: 512,
            pad_to_max: false,
            max_output_tokens: 84,
            min_output_tokens: 0,
            num_beams: 4,
            no_repeat_ngram_size: 2,
            length_penalty: 1.0,
            early_stopping: false,
            target_language: String::new(),
        }
    }

    pub fn translation_defaults() -> Self {
        Self {
            model_id: "Mdkaif2782/banglish-to-bangla".to_string(),
            local_dir: None,
            max_input_tokens: 128,
            pad_to_max: false,
            max_output_tokens: 128,
            min_output_tokens: 0,
            num_beams: 4,
            no_repeat_ngram_size: 0,
            length_penalty: 1.0,
            early_stopping: true,
            target_language: "bn_IN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_training_output_dir")]
    pub output_dir: PathBuf,
}

fn default_training_output_dir() -> PathBuf {
    PathBuf::from("./trained_model")
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_training_output_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            summarization: PipelineConfig::summarization_defaults(),
            translation: PipelineConfig::translation_defaults(),
            training: TrainingConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `CONFIG_PATH` if set and present, else built-in defaults.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        if std::path::Path::new(&path).exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.summarization.max_input_tokens, 512);
        assert_eq!(config.summarization.max_output_tokens, 84);
        assert_eq!(config.summarization.no_repeat_ngram_size, 2);
        assert_eq!(config.translation.max_input_tokens, 128);
        assert_eq!(config.translation.target_language, "bn_IN");
        assert!(config.translation.early_stopping);
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let yaml = r#"
server:
  port: 8080
summarization:
  model_id: "csebuetnlp/mT5_multilingual_XLSum"
  max_input_tokens: 256
  max_output_tokens: 64
  no_repeat_ngram_size: 3
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.summarization.max_input_tokens, 256);
        assert_eq!(config.summarization.num_beams, 4);
        // untouched sections keep their defaults
        assert_eq!(config.translation.target_language, "bn_IN");
    }

    #[test]
    fn test_neither_pipeline_pads_by_default() {
        // The encoders attend to every position: there is no pad masking in
        // the inference path, so padded slots would perturb real-token
        // hidden states. Truncation at the ceiling is the only bound.
        let config = Config::default();
        assert!(!config.summarization.pad_to_max);
        assert!(!config.translation.pad_to_max);
    }

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.summarization.model_id, "csebuetnlp/mT5_multilingual_XLSum");
        assert_eq!(config.translation.model_id, "Mdkaif2782/banglish-to-bangla");
    }
}
