//! Fine-tuning jobs triggered over HTTP.
//!
//! A job loads a CSV of banglish/bangla pairs, splits it into train and eval
//! sets, hands it to the configured [`Trainer`] backend, and records a
//! manifest of the run in the output directory. Jobs run detached from the
//! request that started them; progress goes to the log.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub id: Uuid,
    pub data_file: PathBuf,
    pub model_name: String,
    pub output_dir: PathBuf,
}

impl TrainingJob {
    pub fn new(data_file: PathBuf, model_name: String, output_dir: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            data_file,
            model_name,
            output_dir,
        }
    }
}

/// One supervised example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPair {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct PairDataset {
    pub train: Vec<TextPair>,
    pub eval: Vec<TextPair>,
}

/// Hyperparameters recorded with every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub job_id: Uuid,
    pub model_name: String,
    pub data_file: PathBuf,
    pub train_examples: usize,
    pub eval_examples: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub weight_decay: f64,
    pub started_at: DateTime<Utc>,
}

impl TrainingManifest {
    pub fn new(job: &TrainingJob, dataset: &PairDataset) -> Self {
        Self {
            job_id: job.id,
            model_name: job.model_name.clone(),
            data_file: job.data_file.clone(),
            train_examples: dataset.train.len(),
            eval_examples: dataset.eval.len(),
            learning_rate: 3e-5,
            batch_size: 8,
            epochs: 3,
            weight_decay: 0.01,
            started_at: Utc::now(),
        }
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join("training_manifest.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// Load banglish/bangla pairs from a CSV file with a header row. Rows with
/// a missing side are skipped.
pub fn load_pair_dataset(path: &Path) -> Result<PairDataset> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut lines = content.lines();

    let header = lines.next().context("dataset file is empty")?;
    let columns: Vec<String> = parse_csv_row(header)
        .into_iter()
        .map(|c| c.trim().to_lowercase())
        .collect();
    let source_idx = columns
        .iter()
        .position(|c| c == "banglish")
        .context("dataset has no 'banglish' column")?;
    let target_idx = columns
        .iter()
        .position(|c| c == "bangla")
        .context("dataset has no 'bangla' column")?;

    let mut pairs = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_row(line);
        let source = fields.get(source_idx).map(|s| s.trim()).unwrap_or("");
        let target = fields.get(target_idx).map(|s| s.trim()).unwrap_or("");
        if source.is_empty() || target.is_empty() {
            continue;
        }
        pairs.push(TextPair {
            source: source.to_string(),
            target: target.to_string(),
        });
    }

    if pairs.is_empty() {
        bail!("dataset {} contains no usable pairs", path.display());
    }
    Ok(split_dataset(pairs))
}

/// Deterministic 80/20 split: every fifth row goes to the eval set.
fn split_dataset(pairs: Vec<TextPair>) -> PairDataset {
    let mut train = Vec::with_capacity(pairs.len() * 4 / 5 + 1);
    let mut eval = Vec::with_capacity(pairs.len() / 5 + 1);
    for (i, pair) in pairs.into_iter().enumerate() {
        if (i + 1) % 5 == 0 {
            eval.push(pair);
        } else {
            train.push(pair);
        }
    }
    PairDataset { train, eval }
}

/// Minimal CSV field splitter with double-quote handling.
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Backend that actually fine-tunes a model on a dataset.
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, job: &TrainingJob, dataset: &PairDataset) -> Result<()>;
}

/// Default backend: accepts jobs, writes the manifest, does no optimization.
pub struct DisabledTrainer;

#[async_trait]
impl Trainer for DisabledTrainer {
    async fn train(&self, _job: &TrainingJob, _dataset: &PairDataset) -> Result<()> {
        bail!("no trainer backend is configured for this build")
    }
}

/// Run a job to completion in a detached task. The spawning request only
/// observes the acknowledgement; failures are logged under the job id.
pub fn spawn(trainer: std::sync::Arc<dyn Trainer>, job: TrainingJob) {
    tokio::spawn(async move {
        let job_id = job.id;
        tracing::info!(%job_id, data_file = %job.data_file.display(), "training job started");
        match run_job(trainer.as_ref(), &job).await {
            Ok(()) => tracing::info!(%job_id, "training job finished"),
            Err(e) => tracing::error!(%job_id, error = %e, "training job failed"),
        }
    });
}

async fn run_job(trainer: &dyn Trainer, job: &TrainingJob) -> Result<()> {
    let dataset = load_pair_dataset(&job.data_file)?;
    tracing::info!(
        job_id = %job.id,
        train = dataset.train.len(),
        eval = dataset.eval.len(),
        "dataset loaded"
    );

    std::fs::create_dir_all(&job.output_dir)
        .with_context(|| format!("creating {}", job.output_dir.display()))?;
    TrainingManifest::new(job, &dataset).write(&job.output_dir)?;

    trainer.train(job, &dataset).await
}
