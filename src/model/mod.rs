//! Model backends behind a common encoder-decoder interface.
//!
//! The generation layer only ever sees [`Seq2SeqModel`]: encode the input
//! once, then ask for next-token logits given a growing decoder prefix.
//! Decoding is stateless per call, so beam reordering never has to shuffle
//! any cached attention state.

pub mod loader;
pub mod mbart;
pub mod mt5;

use anyhow::Result;
use candle_core::Tensor;

/// Encoder hidden states for one input sequence, shape `(1, seq, hidden)`.
pub struct EncoderOutput {
    hidden: Tensor,
}

impl EncoderOutput {
    pub fn from_tensor(hidden: Tensor) -> Self {
        Self { hidden }
    }

    pub fn tensor(&self) -> &Tensor {
        &self.hidden
    }
}

pub trait Seq2SeqModel: Send + Sync {
    /// Run the encoder over the full input sequence.
    fn encode(&self, input_ids: &[u32]) -> Result<EncoderOutput>;

    /// Logits for the token following `decoder_ids`, one row of
    /// `vocab_size()` values.
    fn decoder_logits(&self, decoder_ids: &[u32], encoder: &EncoderOutput) -> Result<Vec<f32>>;

    fn vocab_size(&self) -> usize;

    fn decoder_start_token_id(&self) -> u32;

    fn eos_token_id(&self) -> u32;

    /// Token forced at the first decoding step, used to pin the target
    /// language on multilingual decoders.
    fn forced_bos_token_id(&self) -> Option<u32> {
        None
    }
}
