mod attention;
mod config;
mod gpt;
mod loss;

pub use attention::CausalSelfAttention;
pub use config::{GptModelConfig, PEAK_FLOPS};
pub use gpt::{Block, Gpt, GptRecord, LayerNorm, Mlp};
pub use loss::language_model_loss;
