//! Generation policy: deterministic beam search with output constraints.

pub mod beam;
pub mod penalties;

pub use beam::beam_search;

use serde::{Deserialize, Serialize};

/// Beam search parameters for one pipeline.
///
/// Decoding is deterministic for identical input and model weights: there is
/// no sampling anywhere in this configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Hard bound on the decoder sequence length, counting the decoder
    /// start token.
    pub max_length: usize,
    #[serde(default)]
    pub min_length: usize,
    pub num_beams: usize,
    /// Forbid repeating any contiguous n-token subsequence of the output.
    /// Zero disables the constraint.
    #[serde(default)]
    pub no_repeat_ngram_size: usize,
    #[serde(default = "default_length_penalty")]
    pub length_penalty: f32,
    #[serde(default)]
    pub early_stopping: bool,
}

fn default_length_penalty() -> f32 {
    1.0
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: 128,
            min_length: 0,
            num_beams: 4,
            no_repeat_ngram_size: 0,
            length_penalty: 1.0,
            early_stopping: false,
        }
    }
}
