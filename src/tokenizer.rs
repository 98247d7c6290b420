//! Tokenizer wrapper around HuggingFace's fast tokenizers.
//!
//! Encoding is bounded by a hard ceiling on input length: longer inputs are
//! truncated at the token boundary (the `truncated` flag reports this to the
//! caller instead of dropping content silently), shorter inputs are padded to
//! the ceiling when the pipeline asks for fixed-length input.

use std::path::Path;

use anyhow::{anyhow, Result};
use tokenizers::Tokenizer as HfTokenizer;

/// A bounded encoding of one input text.
#[derive(Debug, Clone)]
pub struct EncodedInput {
    pub ids: Vec<u32>,
    /// True when the input exceeded the ceiling and content was dropped.
    pub truncated: bool,
}

pub struct TextTokenizer {
    inner: HfTokenizer,
}

impl TextTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = HfTokenizer::from_file(path)
            .map_err(|e| anyhow!("failed to load tokenizer: {e}"))?;
        Ok(Self { inner })
    }

    pub fn new(inner: HfTokenizer) -> Self {
        Self { inner }
    }

    /// Encode `text` into at most `max_len` token ids.
    ///
    /// If the encoding ends with the eos token and truncation cuts it off,
    /// the last kept position is rewritten to eos so the encoder still sees
    /// a terminated sequence. With `pad_to_max`, short inputs are padded up
    /// to exactly `max_len`.
    pub fn encode_bounded(&self, text: &str, max_len: usize, pad_to_max: bool) -> Result<EncodedInput> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow!("encode failed: {e}"))?;
        let all = encoding.get_ids();

        let truncated = all.len() > max_len;
        let mut ids: Vec<u32> = all[..all.len().min(max_len)].to_vec();

        if truncated {
            if let (Some(eos), Some(&last_full)) = (self.eos_token_id(), all.last()) {
                if last_full == eos {
                    if let Some(last) = ids.last_mut() {
                        *last = eos;
                    }
                }
            }
        }

        if pad_to_max {
            let pad = self.pad_token_id().unwrap_or(0);
            ids.resize(max_len, pad);
        }

        Ok(EncodedInput { ids, truncated })
    }

    /// Decode token ids to text, stripping special control tokens. No extra
    /// cleanup pass runs, so spacing around punctuation is left untouched.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| anyhow!("decode failed: {e}"))
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.inner
            .token_to_id("</s>")
            .or_else(|| self.inner.token_to_id("<eos>"))
    }

    pub fn pad_token_id(&self) -> Option<u32> {
        self.inner
            .token_to_id("<pad>")
            .or_else(|| self.inner.token_to_id("[PAD]"))
    }
}
