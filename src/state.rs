use std::sync::Arc;

use crate::config::Config;
use crate::error::{ServerError, ServerResult};
use crate::service::{build_summarizer, build_translator, Seq2SeqService};
use crate::training::{DisabledTrainer, Trainer};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub summarizer: Arc<Seq2SeqService>,
    pub translator: Arc<Seq2SeqService>,
    pub trainer: Arc<dyn Trainer>,
}

impl AppState {
    /// Load both pipelines eagerly. Model loading is blocking file and
    /// tensor work, so it runs off the async runtime. Any failure here
    /// aborts startup; the server never runs with a missing model.
    pub async fn new(config: Config) -> ServerResult<Self> {
        let summarizer_cfg = config.clone();
        let summarizer = tokio::task::spawn_blocking(move || build_summarizer(&summarizer_cfg))
            .await
            .map_err(|e| ServerError::Internal(format!("model load task panicked: {e}")))??;

        let translator_cfg = config.clone();
        let translator = tokio::task::spawn_blocking(move || build_translator(&translator_cfg))
            .await
            .map_err(|e| ServerError::Internal(format!("model load task panicked: {e}")))??;

        Ok(Self {
            config,
            summarizer: Arc::new(summarizer),
            translator: Arc::new(translator),
            trainer: Arc::new(DisabledTrainer),
        })
    }

    /// Assemble a state from already-built parts. Lets tests swap in mock
    /// pipelines without touching model files.
    pub fn from_parts(
        config: Config,
        summarizer: Arc<Seq2SeqService>,
        translator: Arc<Seq2SeqService>,
        trainer: Arc<dyn Trainer>,
    ) -> Self {
        Self {
            config,
            summarizer,
            translator,
            trainer,
        }
    }
}
