use anyhow::{Result, bail};

use crate::config::GptConfig;

/// A100 bfloat16 dense peak.
pub const PEAK_FLOPS: f64 = 312e12;

/// Validated architecture used to build a [`Gpt`](super::Gpt).
#[derive(Clone, Debug, PartialEq)]
pub struct GptModelConfig {
    pub block_size: usize,
    pub vocab_size: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
    pub dropout: f64,
    pub bias: bool,
}

impl GptConfig {
    /// Check the shape constraints the model needs. Loading a config never
    /// performs these checks; building a model does.
    pub fn init(&self) -> Result<GptModelConfig> {
        if self.vocab_size == 0 {
            bail!("vocab_size must be positive");
        }
        if self.block_size == 0 {
            bail!("block_size must be positive");
        }
        if self.n_layer == 0 {
            bail!("n_layer must be positive");
        }
        self.head_dim()?;
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("dropout {} must be in [0, 1)", self.dropout);
        }

        Ok(GptModelConfig {
            block_size: self.block_size,
            vocab_size: self.vocab_size,
            n_layer: self.n_layer,
            n_head: self.n_head,
            n_embd: self.n_embd,
            dropout: self.dropout,
            bias: self.bias,
        })
    }
}

impl From<&GptModelConfig> for GptConfig {
    fn from(config: &GptModelConfig) -> Self {
        Self {
            block_size: config.block_size,
            vocab_size: config.vocab_size,
            n_layer: config.n_layer,
            n_head: config.n_head,
            n_embd: config.n_embd,
            dropout: config.dropout,
            bias: config.bias,
        }
    }
}

impl GptModelConfig {
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Parameter count with the LM head tied to the token embedding.
    /// `non_embedding` drops the position embedding table.
    pub fn num_params(&self, non_embedding: bool) -> usize {
        let embd = self.n_embd;
        let bias = usize::from(self.bias);
        let norm = embd + bias * embd;

        let attention = embd * 3 * embd + bias * 3 * embd + embd * embd + bias * embd;
        let mlp = embd * 4 * embd + bias * 4 * embd + 4 * embd * embd + bias * embd;
        let block = 2 * norm + attention + mlp;

        let token_embedding = self.vocab_size * embd;
        let position_embedding = self.block_size * embd;
        let total = token_embedding + position_embedding + self.n_layer * block + norm;

        if non_embedding {
            total - position_embedding
        } else {
            total
        }
    }

    /// Forward plus backward FLOPs per token, following the PaLM appendix.
    pub fn flops_per_token(&self) -> f64 {
        let params = self.num_params(true) as f64;
        let layers = self.n_layer as f64;
        let heads = self.n_head as f64;
        let head_dim = self.head_dim() as f64;
        let time = self.block_size as f64;
        6.0 * params + 12.0 * layers * heads * head_dim * time
    }

    /// Model FLOPs utilisation as a fraction of [`PEAK_FLOPS`], given how many
    /// forward/backward passes ran in `dt` seconds.
    pub fn estimate_mfu(&self, fwdbwd_per_iter: f64, dt: f64) -> f64 {
        let flops_per_fwdbwd = self.flops_per_token() * self.block_size as f64;
        let flops_per_iter = flops_per_fwdbwd * fwdbwd_per_iter;
        let flops_achieved = flops_per_iter / dt;
        flops_achieved / PEAK_FLOPS
    }
}
