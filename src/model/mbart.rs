//! mBART backend for translation, built on candle-nn primitives.
//!
//! The architecture is a pre-norm transformer encoder-decoder with learned
//! positional embeddings (stored with a two-slot offset), scaled token
//! embeddings shared between encoder, decoder and the output projection,
//! and a trailing `final_logits_bias` added to the lm head output. Decoding
//! runs over the full prefix each step, so there is no attention cache.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{embedding, layer_norm, linear, Embedding, LayerNorm, Linear, Module, VarBuilder};
use serde::Deserialize;

use super::{EncoderOutput, Seq2SeqModel};

#[derive(Debug, Clone, Deserialize)]
pub struct MBartConfig {
    pub vocab_size: usize,
    #[serde(default = "default_d_model")]
    pub d_model: usize,
    #[serde(default = "default_layers")]
    pub encoder_layers: usize,
    #[serde(default = "default_layers")]
    pub decoder_layers: usize,
    #[serde(default = "default_heads")]
    pub encoder_attention_heads: usize,
    #[serde(default = "default_heads")]
    pub decoder_attention_heads: usize,
    #[serde(default = "default_ffn_dim")]
    pub encoder_ffn_dim: usize,
    #[serde(default = "default_ffn_dim")]
    pub decoder_ffn_dim: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_pad_token_id")]
    pub pad_token_id: u32,
    #[serde(default = "default_eos_token_id")]
    pub eos_token_id: u32,
    #[serde(default = "default_eos_token_id")]
    pub decoder_start_token_id: u32,
    #[serde(default = "default_scale_embedding")]
    pub scale_embedding: bool,
}

fn default_d_model() -> usize {
    1024
}
fn default_layers() -> usize {
    12
}
fn default_heads() -> usize {
    16
}
fn default_ffn_dim() -> usize {
    4096
}
fn default_max_position_embeddings() -> usize {
    1024
}
fn default_pad_token_id() -> u32 {
    1
}
fn default_eos_token_id() -> u32 {
    2
}
fn default_scale_embedding() -> bool {
    true
}

impl MBartConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).context("parsing mbart config")
    }
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scaling: f64,
}

impl Attention {
    fn load(d_model: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = d_model / num_heads;
        Ok(Self {
            q_proj: linear(d_model, d_model, vb.pp("q_proj"))?,
            k_proj: linear(d_model, d_model, vb.pp("k_proj"))?,
            v_proj: linear(d_model, d_model, vb.pp("v_proj"))?,
            out_proj: linear(d_model, d_model, vb.pp("out_proj"))?,
            num_heads,
            head_dim,
            scaling: (head_dim as f64).powf(-0.5),
        })
    }

    fn split_heads(&self, xs: &Tensor, seq_len: usize) -> Result<Tensor> {
        Ok(xs
            .reshape((1, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn forward(&self, hidden: &Tensor, kv_source: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (_, q_len, d_model) = hidden.dims3()?;
        let (_, kv_len, _) = kv_source.dims3()?;

        let q = (self.q_proj.forward(hidden)? * self.scaling)?;
        let q = self.split_heads(&q, q_len)?;
        let k = self.split_heads(&self.k_proj.forward(kv_source)?, kv_len)?;
        let v = self.split_heads(&self.v_proj.forward(kv_source)?, kv_len)?;

        let mut weights = q.matmul(&k.transpose(2, 3)?)?;
        if let Some(mask) = mask {
            weights = weights.broadcast_add(mask)?;
        }
        let weights = candle_nn::ops::softmax_last_dim(&weights)?;

        let attn = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((1, q_len, d_model))?;
        Ok(self.out_proj.forward(&attn)?)
    }
}

struct EncoderLayer {
    self_attn: Attention,
    self_attn_layer_norm: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    final_layer_norm: LayerNorm,
}

impl EncoderLayer {
    fn load(cfg: &MBartConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::load(cfg.d_model, cfg.encoder_attention_heads, vb.pp("self_attn"))?,
            self_attn_layer_norm: layer_norm(cfg.d_model, 1e-5, vb.pp("self_attn_layer_norm"))?,
            fc1: linear(cfg.d_model, cfg.encoder_ffn_dim, vb.pp("fc1"))?,
            fc2: linear(cfg.encoder_ffn_dim, cfg.d_model, vb.pp("fc2"))?,
            final_layer_norm: layer_norm(cfg.d_model, 1e-5, vb.pp("final_layer_norm"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let residual = xs;
        let xs = self.self_attn_layer_norm.forward(xs)?;
        let xs = self.self_attn.forward(&xs, &xs, None)?;
        let xs = (residual + xs)?;

        let residual = &xs;
        let ys = self.final_layer_norm.forward(&xs)?;
        let ys = self.fc2.forward(&self.fc1.forward(&ys)?.gelu_erf()?)?;
        Ok((residual + ys)?)
    }
}

struct DecoderLayer {
    self_attn: Attention,
    self_attn_layer_norm: LayerNorm,
    encoder_attn: Attention,
    encoder_attn_layer_norm: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    final_layer_norm: LayerNorm,
}

impl DecoderLayer {
    fn load(cfg: &MBartConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::load(cfg.d_model, cfg.decoder_attention_heads, vb.pp("self_attn"))?,
            self_attn_layer_norm: layer_norm(cfg.d_model, 1e-5, vb.pp("self_attn_layer_norm"))?,
            encoder_attn: Attention::load(cfg.d_model, cfg.decoder_attention_heads, vb.pp("encoder_attn"))?,
            encoder_attn_layer_norm: layer_norm(cfg.d_model, 1e-5, vb.pp("encoder_attn_layer_norm"))?,
            fc1: linear(cfg.d_model, cfg.decoder_ffn_dim, vb.pp("fc1"))?,
            fc2: linear(cfg.decoder_ffn_dim, cfg.d_model, vb.pp("fc2"))?,
            final_layer_norm: layer_norm(cfg.d_model, 1e-5, vb.pp("final_layer_norm"))?,
        })
    }

    fn forward(&self, xs: &Tensor, encoder_hidden: &Tensor, causal_mask: &Tensor) -> Result<Tensor> {
        let residual = xs;
        let ys = self.self_attn_layer_norm.forward(xs)?;
        let ys = self.self_attn.forward(&ys, &ys, Some(causal_mask))?;
        let xs = (residual + ys)?;

        let residual = &xs;
        let ys = self.encoder_attn_layer_norm.forward(&xs)?;
        let ys = self.encoder_attn.forward(&ys, encoder_hidden, None)?;
        let xs = (residual + ys)?;

        let residual = &xs;
        let ys = self.final_layer_norm.forward(&xs)?;
        let ys = self.fc2.forward(&self.fc1.forward(&ys)?.gelu_erf()?)?;
        Ok((residual + ys)?)
    }
}

/// Learned positional embedding, stored with two leading offset slots.
struct PositionalEmbedding {
    weight: Embedding,
    offset: usize,
}

impl PositionalEmbedding {
    fn load(cfg: &MBartConfig, vb: VarBuilder) -> Result<Self> {
        let offset = 2;
        let weight = embedding(cfg.max_position_embeddings + offset, cfg.d_model, vb)?;
        Ok(Self { weight, offset })
    }

    fn forward(&self, seq_len: usize, device: &Device) -> Result<Tensor> {
        let positions: Vec<u32> = (0..seq_len).map(|p| (p + self.offset) as u32).collect();
        let positions = Tensor::new(positions.as_slice(), device)?;
        Ok(self.weight.forward(&positions)?.unsqueeze(0)?)
    }
}

pub struct MBartModel {
    shared: Embedding,
    encoder_positions: PositionalEmbedding,
    encoder_layernorm_embedding: LayerNorm,
    encoder_layers: Vec<EncoderLayer>,
    encoder_layer_norm: LayerNorm,
    decoder_positions: PositionalEmbedding,
    decoder_layernorm_embedding: LayerNorm,
    decoder_layers: Vec<DecoderLayer>,
    decoder_layer_norm: LayerNorm,
    lm_head: Linear,
    final_logits_bias: Tensor,
    embed_scale: f64,
    config: MBartConfig,
    device: Device,
}

impl MBartModel {
    pub fn load(cfg: MBartConfig, vb: VarBuilder) -> Result<Self> {
        let model_vb = vb.pp("model");
        let shared = embedding(cfg.vocab_size, cfg.d_model, model_vb.pp("shared"))?;

        let enc_vb = model_vb.pp("encoder");
        let mut encoder_layers = Vec::with_capacity(cfg.encoder_layers);
        for i in 0..cfg.encoder_layers {
            encoder_layers.push(EncoderLayer::load(&cfg, enc_vb.pp(format!("layers.{i}")))?);
        }

        let dec_vb = model_vb.pp("decoder");
        let mut decoder_layers = Vec::with_capacity(cfg.decoder_layers);
        for i in 0..cfg.decoder_layers {
            decoder_layers.push(DecoderLayer::load(&cfg, dec_vb.pp(format!("layers.{i}")))?);
        }

        // Output projection shares the token embedding matrix.
        let lm_head = Linear::new(shared.embeddings().clone(), None);
        let final_logits_bias = vb
            .get((1, cfg.vocab_size), "final_logits_bias")
            .or_else(|_| Tensor::zeros((1, cfg.vocab_size), DType::F32, vb.device()))?;

        let embed_scale = if cfg.scale_embedding {
            (cfg.d_model as f64).sqrt()
        } else {
            1.0
        };

        Ok(Self {
            shared,
            encoder_positions: PositionalEmbedding::load(&cfg, enc_vb.pp("embed_positions"))?,
            encoder_layernorm_embedding: layer_norm(cfg.d_model, 1e-5, enc_vb.pp("layernorm_embedding"))?,
            encoder_layers,
            encoder_layer_norm: layer_norm(cfg.d_model, 1e-5, enc_vb.pp("layer_norm"))?,
            decoder_positions: PositionalEmbedding::load(&cfg, dec_vb.pp("embed_positions"))?,
            decoder_layernorm_embedding: layer_norm(cfg.d_model, 1e-5, dec_vb.pp("layernorm_embedding"))?,
            decoder_layers,
            decoder_layer_norm: layer_norm(cfg.d_model, 1e-5, dec_vb.pp("layer_norm"))?,
            lm_head,
            final_logits_bias,
            embed_scale,
            device: vb.device().clone(),
            config: cfg,
        })
    }

    fn embed(&self, ids: &[u32], positions: &PositionalEmbedding, norm: &LayerNorm) -> Result<Tensor> {
        let ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let xs = (self.shared.forward(&ids)? * self.embed_scale)?;
        let xs = xs.broadcast_add(&positions.forward(ids.dim(1)?, &self.device)?)?;
        Ok(norm.forward(&xs)?)
    }

    pub fn encode(&self, input_ids: &[u32]) -> Result<Tensor> {
        let mut xs = self.embed(input_ids, &self.encoder_positions, &self.encoder_layernorm_embedding)?;
        for layer in &self.encoder_layers {
            xs = layer.forward(&xs)?;
        }
        Ok(self.encoder_layer_norm.forward(&xs)?)
    }

    pub fn decode(&self, decoder_ids: &[u32], encoder_hidden: &Tensor) -> Result<Tensor> {
        let seq_len = decoder_ids.len();
        let mask = causal_mask(seq_len, &self.device)?;

        let mut xs = self.embed(decoder_ids, &self.decoder_positions, &self.decoder_layernorm_embedding)?;
        for layer in &self.decoder_layers {
            xs = layer.forward(&xs, encoder_hidden, &mask)?;
        }
        let xs = self.decoder_layer_norm.forward(&xs)?;

        let last = xs.i((0, seq_len - 1))?.unsqueeze(0)?;
        let logits = self.lm_head.forward(&last)?;
        Ok(logits.broadcast_add(&self.final_logits_bias)?.squeeze(0)?)
    }
}

fn causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0f32; seq_len * seq_len];
    for row in 0..seq_len {
        for col in (row + 1)..seq_len {
            data[row * seq_len + col] = f32::NEG_INFINITY;
        }
    }
    Ok(Tensor::from_vec(data, (1, 1, seq_len, seq_len), device)?)
}

/// Translation model with a fixed target-language marker.
pub struct MBartSeq2Seq {
    model: MBartModel,
    forced_bos_token_id: u32,
}

impl MBartSeq2Seq {
    pub fn load(
        config_path: &Path,
        weights_path: &Path,
        device: &Device,
        forced_bos_token_id: u32,
    ) -> Result<Self> {
        let cfg = MBartConfig::from_file(config_path)?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &[weights_path.to_path_buf()],
                DType::F32,
                device,
            )?
        };
        let model = MBartModel::load(cfg, vb)?;
        Ok(Self {
            model,
            forced_bos_token_id,
        })
    }

    pub fn new(model: MBartModel, forced_bos_token_id: u32) -> Self {
        Self {
            model,
            forced_bos_token_id,
        }
    }
}

impl Seq2SeqModel for MBartSeq2Seq {
    fn encode(&self, input_ids: &[u32]) -> Result<EncoderOutput> {
        Ok(EncoderOutput::from_tensor(self.model.encode(input_ids)?))
    }

    fn decoder_logits(&self, decoder_ids: &[u32], encoder: &EncoderOutput) -> Result<Vec<f32>> {
        let logits = self.model.decode(decoder_ids, encoder.tensor())?;
        Ok(logits.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    fn vocab_size(&self) -> usize {
        self.model.config.vocab_size
    }

    fn decoder_start_token_id(&self) -> u32 {
        self.model.config.decoder_start_token_id
    }

    fn eos_token_id(&self) -> u32 {
        self.model.config.eos_token_id
    }

    fn forced_bos_token_id(&self) -> Option<u32> {
        Some(self.forced_bos_token_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> MBartConfig {
        MBartConfig {
            vocab_size: 32,
            d_model: 8,
            encoder_layers: 2,
            decoder_layers: 2,
            encoder_attention_heads: 2,
            decoder_attention_heads: 2,
            encoder_ffn_dim: 16,
            decoder_ffn_dim: 16,
            max_position_embeddings: 64,
            pad_token_id: 1,
            eos_token_id: 2,
            decoder_start_token_id: 2,
            scale_embedding: true,
        }
    }

    fn tiny_model() -> MBartModel {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        MBartModel::load(tiny_config(), vb).unwrap()
    }

    #[test]
    fn test_encoder_output_shape() {
        let model = tiny_model();
        let hidden = model.encode(&[4, 5, 6]).unwrap();
        assert_eq!(hidden.dims3().unwrap(), (1, 3, 8));
    }

    #[test]
    fn test_decoder_logits_cover_vocab() {
        let model = tiny_model();
        let hidden = model.encode(&[4, 5, 6]).unwrap();
        let logits = model.decode(&[2, 7], &hidden).unwrap();
        assert_eq!(logits.dims1().unwrap(), 32);
    }

    #[test]
    fn test_seq2seq_metadata() {
        let model = MBartSeq2Seq::new(tiny_model(), 9);
        assert_eq!(model.vocab_size(), 32);
        assert_eq!(model.decoder_start_token_id(), 2);
        assert_eq!(model.eos_token_id(), 2);
        assert_eq!(model.forced_bos_token_id(), Some(9));
    }

    #[test]
    fn test_trailing_pad_tokens_perturb_encoder_states() {
        // Self-attention here has no pad masking, so appending pad tokens
        // changes the hidden states of the real tokens. This is why the
        // pipelines truncate to the input window but never pad up to it.
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = MBartModel::load(tiny_config(), vb).unwrap();

        let bare = model.encode(&[4, 5, 6]).unwrap();
        let padded = model.encode(&[4, 5, 6, 1, 1, 1]).unwrap();

        let bare_first = bare.i((0, 0)).unwrap().to_vec1::<f32>().unwrap();
        let padded_first = padded.i((0, 0)).unwrap().to_vec1::<f32>().unwrap();
        let max_delta = bare_first
            .iter()
            .zip(&padded_first)
            .map(|(a, b)| (a - b).abs())
            .fold(0f32, f32::max);
        assert!(max_delta > 1e-6, "expected pads to shift real-token states");
    }

    #[test]
    fn test_causal_mask_blocks_future_positions() {
        let mask = causal_mask(3, &Device::Cpu).unwrap();
        let rows: Vec<Vec<f32>> = mask
            .squeeze(0)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(rows[0][0], 0.0);
        assert_eq!(rows[0][1], f32::NEG_INFINITY);
        assert_eq!(rows[2][2], 0.0);
        assert_eq!(rows[1][2], f32::NEG_INFINITY);
    }

    #[test]
    fn test_config_defaults_from_minimal_json() {
        let cfg: MBartConfig = serde_json::from_str(r#"{"vocab_size": 250054}"#).unwrap();
        assert_eq!(cfg.vocab_size, 250054);
        assert_eq!(cfg.d_model, 1024);
        assert_eq!(cfg.pad_token_id, 1);
        assert_eq!(cfg.eos_token_id, 2);
        assert!(cfg.scale_embedding);
    }
}
