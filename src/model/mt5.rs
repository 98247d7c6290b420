//! mT5 backend for summarization, wrapping candle's T5 implementation.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_transformers::models::t5::{Config as T5Config, T5ForConditionalGeneration};
use parking_lot::Mutex;

use super::{EncoderOutput, Seq2SeqModel};

pub struct T5Seq2Seq {
    // candle's T5 forward passes take &mut self for the kv cache, which we
    // disable. The lock serializes access from blocking worker threads.
    model: Mutex<T5ForConditionalGeneration>,
    device: Device,
    vocab_size: usize,
    decoder_start_token_id: u32,
    eos_token_id: u32,
}

impl T5Seq2Seq {
    pub fn load(config_path: &Path, weights_path: &Path, device: &Device) -> Result<Self> {
        let raw = std::fs::read_to_string(config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let mut config: T5Config = serde_json::from_str(&raw).context("parsing t5 config")?;
        // Full-prefix decoding per step; cached state would be stale across
        // beam reorderings.
        config.use_cache = false;

        let vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(
                &[weights_path.to_path_buf()],
                candle_core::DType::F32,
                device,
            )?
        };
        let model = T5ForConditionalGeneration::load(vb, &config)?;

        Ok(Self {
            model: Mutex::new(model),
            device: device.clone(),
            vocab_size: config.vocab_size,
            decoder_start_token_id: config.decoder_start_token_id.unwrap_or(0) as u32,
            eos_token_id: config.eos_token_id as u32,
        })
    }
}

impl Seq2SeqModel for T5Seq2Seq {
    fn encode(&self, input_ids: &[u32]) -> Result<EncoderOutput> {
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        let mut model = self.model.lock();
        model.clear_kv_cache();
        let hidden = model.encode(&input)?;
        Ok(EncoderOutput::from_tensor(hidden))
    }

    fn decoder_logits(&self, decoder_ids: &[u32], encoder: &EncoderOutput) -> Result<Vec<f32>> {
        let decoder_input = Tensor::new(decoder_ids, &self.device)?.unsqueeze(0)?;
        let mut model = self.model.lock();
        model.clear_kv_cache();
        let logits = model.decode(&decoder_input, encoder.tensor())?;
        last_position_logits(logits)
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn decoder_start_token_id(&self) -> u32 {
        self.decoder_start_token_id
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}

/// Reduce decoder output to the logit row for the final position.
pub(crate) fn last_position_logits(logits: Tensor) -> Result<Vec<f32>> {
    let logits = match logits.rank() {
        3 => logits.squeeze(0)?,
        _ => logits,
    };
    let logits = match logits.rank() {
        2 => {
            let rows = logits.dim(0)?;
            logits.i(rows - 1)?
        }
        _ => logits,
    };
    Ok(logits.to_dtype(candle_core::DType::F32)?.to_vec1::<f32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_last_position_logits_from_batched_sequence() {
        let device = Device::Cpu;
        let data: Vec<f32> = (0..12).map(|x| x as f32).collect();
        // shape (1, 3, 4): last row is [8, 9, 10, 11]
        let t = Tensor::from_vec(data, (1, 3, 4), &device).unwrap();
        let row = last_position_logits(t).unwrap();
        assert_eq!(row, vec![8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_last_position_logits_from_single_row() {
        let device = Device::Cpu;
        let t = Tensor::zeros((1, 5), DType::F32, &device).unwrap();
        let row = last_position_logits(t).unwrap();
        assert_eq!(row.len(), 5);
    }
}
