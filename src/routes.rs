use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;
use crate::training::{self, TrainingJob};

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/generate-summary", post(generate_summary))
        .route("/translate", post(translate))
        .route("/train", post(train))
}

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    pub article_text: String,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
    /// True when the article exceeded the model's input window and was cut.
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TranslationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub data_file: PathBuf,
    #[serde(default = "default_train_model")]
    pub model_name: String,
    /// Overrides the configured training output directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_train_model() -> String {
    "Mdkaif2782/banglish-to-bangla".to_string()
}

/// Pipelines load eagerly at startup, so a responding server implies
/// loaded models.
async fn health_check(State(_state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "model_loaded": true,
        "tokenizer_loaded": true,
    }))
}

async fn generate_summary(
    State(state): State<AppState>,
    Json(request): Json<SummaryRequest>,
) -> ServerResult<Json<SummaryResponse>> {
    let output = state
        .summarizer
        .generate_async(request.article_text)
        .await?;
    Ok(Json(SummaryResponse {
        summary: output.text,
        truncated: output.truncated,
    }))
}

/// Translation reports failure inside the body instead of a non-2xx status.
async fn translate(
    State(state): State<AppState>,
    Json(request): Json<TranslationRequest>,
) -> Json<TranslationResponse> {
    match state.translator.generate_async(request.text).await {
        Ok(output) => Json(TranslationResponse {
            success: true,
            translation: Some(output.text),
            error: None,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "translation request failed");
            Json(TranslationResponse {
                success: false,
                translation: None,
                error: Some(e.to_string()),
            })
        }
    }
}

async fn train(
    State(state): State<AppState>,
    Json(request): Json<TrainRequest>,
) -> ServerResult<Json<Value>> {
    if !request.data_file.exists() {
        return Err(ServerError::InvalidRequest(format!(
            "dataset file not found: {}",
            request.data_file.display()
        )));
    }

    let output_dir = request
        .output_dir
        .unwrap_or_else(|| state.config.training.output_dir.clone());
    std::fs::create_dir_all(&output_dir)?;

    let job = TrainingJob::new(request.data_file, request.model_name, output_dir.clone());
    let job_id = job.id;
    training::spawn(state.trainer.clone(), job);

    Ok(Json(json!({
        "message": "Training started. Check the output directory for results.",
        "job_id": job_id,
        "output_dir": output_dir,
    })))
}
