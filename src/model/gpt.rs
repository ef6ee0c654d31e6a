use anyhow::{Result, bail, ensure};
use burn::module::{Module, Param, ParamId};
use burn::nn::{
    Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, Linear, LinearRecord,
};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, activation};
use tracing::info;

use super::attention::{CausalSelfAttention, linear_bias_ids, normal_linear};
use super::config::GptModelConfig;

const LAYER_NORM_EPS: f64 = 1e-5;
const INIT_STD: f64 = 0.02;

/// Layer norm whose bias is optional.
#[derive(Module, Debug)]
pub struct LayerNorm<B: Backend> {
    weight: Param<Tensor<B, 1>>,
    bias: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> LayerNorm<B> {
    pub fn new(dim: usize, bias: bool, device: &B::Device) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([dim], device)),
            bias: bias.then(|| Param::from_tensor(Tensor::zeros([dim], device))),
        }
    }

    fn vector_param_ids(&self) -> Vec<ParamId> {
        let mut ids = vec![self.weight.id];
        ids.extend(self.bias.as_ref().map(|bias| bias.id));
        ids
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let (var, mean) = x.clone().var_mean_bias(D - 1);
        let normed = x.sub(mean).div(var.add_scalar(LAYER_NORM_EPS).sqrt());
        let scaled = normed.mul(self.weight.val().unsqueeze::<D>());
        match &self.bias {
            Some(bias) => scaled.add(bias.val().unsqueeze::<D>()),
            None => scaled,
        }
    }
}

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    c_fc: Linear<B>,
    c_proj: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn new(n_embd: usize, dropout: f64, bias: bool, proj_std: f64, device: &B::Device) -> Self {
        Self {
            c_fc: normal_linear(n_embd, 4 * n_embd, bias, INIT_STD, device),
            c_proj: normal_linear(4 * n_embd, n_embd, bias, proj_std, device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    fn vector_param_ids(&self) -> Vec<ParamId> {
        linear_bias_ids(&[&self.c_fc, &self.c_proj])
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = activation::gelu(self.c_fc.forward(x));
        self.dropout.forward(self.c_proj.forward(hidden))
    }
}

#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    ln_1: LayerNorm<B>,
    attn: CausalSelfAttention<B>,
    ln_2: LayerNorm<B>,
    mlp: Mlp<B>,
}

impl<B: Backend> Block<B> {
    pub fn new(config: &GptModelConfig, device: &B::Device) -> Self {
        // residual projections are scaled down by depth
        let proj_std = INIT_STD / (2.0 * config.n_layer as f64).sqrt();
        Self {
            ln_1: LayerNorm::new(config.n_embd, config.bias, device),
            attn: CausalSelfAttention::new(
                config.n_embd,
                config.n_head,
                config.dropout,
                config.bias,
                proj_std,
                device,
            ),
            ln_2: LayerNorm::new(config.n_embd, config.bias, device),
            mlp: Mlp::new(config.n_embd, config.dropout, config.bias, proj_std, device),
        }
    }

    fn vector_param_ids(&self) -> Vec<ParamId> {
        let mut ids = self.ln_1.vector_param_ids();
        ids.extend(self.attn.vector_param_ids());
        ids.extend(self.ln_2.vector_param_ids());
        ids.extend(self.mlp.vector_param_ids());
        ids
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.ln_1.forward(x));
        x.clone() + self.mlp.forward(self.ln_2.forward(x))
    }
}

/// Decoder-only transformer with the LM head tied to the token embedding.
#[derive(Module, Debug)]
pub struct Gpt<B: Backend> {
    block_size: usize,
    vocab_size: usize,
    n_head: usize,
    bias: bool,
    wte: Embedding<B>,
    wpe: Embedding<B>,
    drop: Dropout,
    blocks: Vec<Block<B>>,
    ln_f: LayerNorm<B>,
}

impl<B: Backend> Gpt<B> {
    pub fn new(config: GptModelConfig, device: &B::Device) -> Self {
        let embedding = |rows: usize| {
            EmbeddingConfig::new(rows, config.n_embd)
                .with_initializer(Initializer::Normal {
                    mean: 0.0,
                    std: INIT_STD,
                })
                .init(device)
        };

        let model = Self {
            block_size: config.block_size,
            vocab_size: config.vocab_size,
            n_head: config.n_head,
            bias: config.bias,
            wte: embedding(config.vocab_size),
            wpe: embedding(config.block_size),
            drop: DropoutConfig::new(config.dropout).init(),
            blocks: (0..config.n_layer)
                .map(|_| Block::new(&config, device))
                .collect(),
            ln_f: LayerNorm::new(config.n_embd, config.bias, device),
        };

        info!(
            "number of parameters: {:.2}M",
            model.parameter_count(true) as f64 / 1e6
        );
        model
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Architecture of this instance, reflecting any cropping.
    pub fn config(&self) -> GptModelConfig {
        let [_, n_embd] = self.wte.weight.shape().dims();
        GptModelConfig {
            block_size: self.block_size,
            vocab_size: self.vocab_size,
            n_layer: self.blocks.len(),
            n_head: self.n_head,
            n_embd,
            dropout: self.drop.prob,
            bias: self.bias,
        }
    }

    /// Logits for every position, `[batch, time, vocab]`.
    pub fn forward(&self, idx: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>> {
        let hidden = self.hidden(idx)?;
        Ok(self.lm_head(hidden))
    }

    /// Logits for the final position only, `[batch, 1, vocab]`.
    pub fn forward_last(&self, idx: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>> {
        let hidden = self.hidden(idx)?;
        let [_, time, _] = hidden.shape().dims();
        Ok(self.lm_head(hidden.slice_dim(1, (time - 1)..time)))
    }

    fn hidden(&self, idx: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>> {
        let [_, time] = idx.shape().dims();
        if time == 0 {
            bail!("cannot forward an empty sequence");
        }
        if time > self.block_size {
            bail!(
                "cannot forward sequence of length {time}, block size is only {}",
                self.block_size
            );
        }

        let device = idx.device();
        let positions = Tensor::<B, 1, Int>::arange(0..time as i64, &device).reshape([1, time]);
        let tok_emb = self.wte.forward(idx);
        let pos_emb = self.wpe.forward(positions);

        let mut x = self.drop.forward(tok_emb + pos_emb);
        for block in &self.blocks {
            x = block.forward(x);
        }
        Ok(self.ln_f.forward(x))
    }

    fn lm_head(&self, hidden: Tensor<B, 3>) -> Tensor<B, 3> {
        let weight = self.wte.weight.val().transpose().unsqueeze_dim::<3>(0);
        hidden.matmul(weight)
    }

    /// Number of parameters; `non_embedding` excludes the position table.
    /// The token table counts because it doubles as the LM head.
    pub fn parameter_count(&self, non_embedding: bool) -> usize {
        let total = Module::num_params(self);
        if non_embedding {
            total - self.wpe.weight.shape().num_elements()
        } else {
            total
        }
    }

    /// Shrink the context window, e.g. to fine-tune a 1024-token checkpoint
    /// at a smaller block size.
    pub fn crop_block_size(&mut self, block_size: usize) -> Result<()> {
        if block_size == 0 || block_size > self.block_size {
            bail!(
                "new block size {block_size} must be in 1..={}",
                self.block_size
            );
        }
        let cropped = self.wpe.weight.val().slice_dim(0, 0..block_size);
        self.wpe.weight = Param::from_tensor(cropped);
        self.block_size = block_size;
        Ok(())
    }

    pub fn estimate_mfu(&self, fwdbwd_per_iter: f64, dt: f64) -> f64 {
        self.config().estimate_mfu(fwdbwd_per_iter, dt)
    }

    /// Ids of every 1-D parameter: layer norm weights and biases plus linear
    /// biases. Embeddings and weight matrices are not included.
    pub fn vector_param_ids(&self) -> Vec<ParamId> {
        let mut ids: Vec<ParamId> = self
            .blocks
            .iter()
            .flat_map(|block| block.vector_param_ids())
            .collect();
        ids.extend(self.ln_f.vector_param_ids());
        ids
    }

    /// Load `record` after checking every tensor fits this architecture.
    /// Burn's own `load_record` panics on a mismatch.
    pub fn load_checked(self, record: GptRecord<B>) -> Result<Self> {
        let config = self.config();
        let embd = config.n_embd;

        check_dims("wte", record.wte.weight.shape().dims(), [config.vocab_size, embd])?;
        check_dims("wpe", record.wpe.weight.shape().dims(), [config.block_size, embd])?;
        ensure!(
            record.blocks.len() == config.n_layer,
            "checkpoint has {} layers, model has {}",
            record.blocks.len(),
            config.n_layer
        );
        for (index, block) in record.blocks.iter().enumerate() {
            let name = |part: &str| format!("blocks.{index}.{part}");
            check_norm(&name("ln_1"), &block.ln_1, embd, config.bias)?;
            check_norm(&name("ln_2"), &block.ln_2, embd, config.bias)?;
            check_linear(&name("attn.c_attn"), &block.attn.c_attn, [embd, 3 * embd], config.bias)?;
            check_linear(&name("attn.c_proj"), &block.attn.c_proj, [embd, embd], config.bias)?;
            check_linear(&name("mlp.c_fc"), &block.mlp.c_fc, [embd, 4 * embd], config.bias)?;
            check_linear(&name("mlp.c_proj"), &block.mlp.c_proj, [4 * embd, embd], config.bias)?;
        }
        check_norm("ln_f", &record.ln_f, embd, config.bias)?;

        Ok(self.load_record(record))
    }
}

fn check_dims<const D: usize>(name: &str, found: [usize; D], expected: [usize; D]) -> Result<()> {
    ensure!(
        found == expected,
        "checkpoint tensor {name} has shape {found:?}, model expects {expected:?}"
    );
    Ok(())
}

fn check_bias(name: &str, found: bool, expected: bool) -> Result<()> {
    ensure!(
        found == expected,
        "checkpoint {name} bias is {}, model expects {}",
        if found { "present" } else { "absent" },
        if expected { "present" } else { "absent" }
    );
    Ok(())
}

fn check_norm<B: Backend>(
    name: &str,
    record: &LayerNormRecord<B>,
    dim: usize,
    bias: bool,
) -> Result<()> {
    check_dims(name, record.weight.shape().dims(), [dim])?;
    check_bias(name, record.bias.is_some(), bias)?;
    if let Some(found) = &record.bias {
        check_dims(name, found.shape().dims(), [dim])?;
    }
    Ok(())
}

fn check_linear<B: Backend>(
    name: &str,
    record: &LinearRecord<B>,
    shape: [usize; 2],
    bias: bool,
) -> Result<()> {
    check_dims(name, record.weight.shape().dims(), shape)?;
    check_bias(name, record.bias.is_some(), bias)?;
    if let Some(found) = &record.bias {
        check_dims(name, found.shape().dims(), [shape[1]])?;
    }
    Ok(())
}
