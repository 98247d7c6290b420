//! Text generation pipelines: clean, tokenize, beam-search, decode.

use std::sync::Arc;

use crate::config::{Config, PipelineConfig};
use crate::error::{ServerError, ServerResult};
use crate::generation::{beam_search, GenerationConfig};
use crate::model::loader::{select_device, ModelFiles};
use crate::model::mbart::MBartSeq2Seq;
use crate::model::mt5::T5Seq2Seq;
use crate::model::Seq2SeqModel;
use crate::text::normalize_whitespace;
use crate::tokenizer::TextTokenizer;

/// One generation result, plus whether the input had to be cut to fit the
/// model's input window.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub truncated: bool,
}

/// A loaded pipeline: tokenizer, model and decoding parameters.
pub struct Seq2SeqService {
    name: &'static str,
    tokenizer: TextTokenizer,
    model: Arc<dyn Seq2SeqModel>,
    generation: GenerationConfig,
    max_input_tokens: usize,
    pad_to_max: bool,
}

impl Seq2SeqService {
    pub fn new(
        name: &'static str,
        tokenizer: TextTokenizer,
        model: Arc<dyn Seq2SeqModel>,
        generation: GenerationConfig,
        max_input_tokens: usize,
        pad_to_max: bool,
    ) -> Self {
        Self {
            name,
            tokenizer,
            model,
            generation,
            max_input_tokens,
            pad_to_max,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the full pipeline synchronously. Rejects inputs that are empty
    /// after whitespace normalization before touching the model.
    pub fn generate(&self, text: &str) -> ServerResult<GenerationOutput> {
        let cleaned = normalize_whitespace(text);
        if cleaned.is_empty() {
            return Err(ServerError::EmptyInput);
        }

        let encoded = self
            .tokenizer
            .encode_bounded(&cleaned, self.max_input_tokens, self.pad_to_max)
            .map_err(|e| ServerError::Tokenize(e.to_string()))?;
        if encoded.truncated {
            tracing::warn!(
                pipeline = self.name,
                max_input_tokens = self.max_input_tokens,
                "input exceeded the model window and was truncated"
            );
        }

        let output_ids = beam_search(self.model.as_ref(), &encoded.ids, &self.generation)
            .map_err(|e| ServerError::Generation(e.to_string()))?;

        let text = self
            .tokenizer
            .decode(&output_ids)
            .map_err(|e| ServerError::Generation(e.to_string()))?;

        Ok(GenerationOutput {
            text: text.trim().to_string(),
            truncated: encoded.truncated,
        })
    }

    /// Run the pipeline on a blocking worker thread.
    pub async fn generate_async(self: &Arc<Self>, text: String) -> ServerResult<GenerationOutput> {
        let service = Arc::clone(self);
        tokio::task::spawn_blocking(move || service.generate(&text))
            .await
            .map_err(|e| ServerError::Internal(format!("generation task panicked: {e}")))?
    }
}

fn generation_config(cfg: &PipelineConfig) -> GenerationConfig {
    GenerationConfig {
        max_length: cfg.max_output_tokens,
        min_length: cfg.min_output_tokens,
        num_beams: cfg.num_beams,
        no_repeat_ngram_size: cfg.no_repeat_ngram_size,
        length_penalty: cfg.length_penalty,
        early_stopping: cfg.early_stopping,
    }
}

/// Load the summarization pipeline described by the config.
pub fn build_summarizer(cfg: &Config) -> ServerResult<Seq2SeqService> {
    let pipeline = &cfg.summarization;
    let files = ModelFiles::locate(&pipeline.model_id, pipeline.local_dir.as_deref())
        .map_err(|e| ServerError::ModelLoad(e.to_string()))?;
    let tokenizer = TextTokenizer::from_file(&files.tokenizer)
        .map_err(|e| ServerError::ModelLoad(e.to_string()))?;

    let device = select_device();
    let model = T5Seq2Seq::load(&files.config, &files.weights, &device)
        .map_err(|e| ServerError::ModelLoad(e.to_string()))?;
    tracing::info!(model = %pipeline.model_id, "summarization model loaded");

    Ok(Seq2SeqService::new(
        "summarization",
        tokenizer,
        Arc::new(model),
        generation_config(pipeline),
        pipeline.max_input_tokens,
        pipeline.pad_to_max,
    ))
}

/// Load the translation pipeline. Fails if the tokenizer has no token for
/// the configured target language marker.
pub fn build_translator(cfg: &Config) -> ServerResult<Seq2SeqService> {
    let pipeline = &cfg.translation;
    let files = ModelFiles::locate(&pipeline.model_id, pipeline.local_dir.as_deref())
        .map_err(|e| ServerError::ModelLoad(e.to_string()))?;
    let tokenizer = TextTokenizer::from_file(&files.tokenizer)
        .map_err(|e| ServerError::ModelLoad(e.to_string()))?;

    let target = cfg.translation.target_language.as_str();
    let forced_bos = tokenizer.token_id(target).ok_or_else(|| {
        ServerError::ModelLoad(format!("tokenizer has no token for target language {target}"))
    })?;

    let device = select_device();
    let model = MBartSeq2Seq::load(&files.config, &files.weights, &device, forced_bos)
        .map_err(|e| ServerError::ModelLoad(e.to_string()))?;
    tracing::info!(model = %pipeline.model_id, target, "translation model loaded");

    Ok(Seq2SeqService::new(
        "translation",
        tokenizer,
        Arc::new(model),
        generation_config(pipeline),
        pipeline.max_input_tokens,
        pipeline.pad_to_max,
    ))
}
