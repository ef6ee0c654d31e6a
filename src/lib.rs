pub mod checkpoint;
pub mod config;
pub mod generation;
pub mod model;
pub mod optim;
pub mod sampler;
pub mod schedule;
pub mod system;
pub mod tokenizer;

pub use checkpoint::{
    init_model, load_model, read_run_config, save_checkpoint, save_model, write_run_config,
};
pub use config::{
    Config, DataConfig, DdpBackend, GPT2_VOCAB_SIZE, DdpConfig, DeviceKind, GptConfig, GptPreset, InitFrom,
    IoMetricsConfig, LearningRateConfig, OptimizerConfig, Precision, SamplingConfig, SystemConfig,
    load_config,
};
pub use generation::{GenerationSettings, generate, sample_from_logits};
pub use model::{Gpt, GptModelConfig, GptRecord, language_model_loss};
pub use optim::GptOptimizer;
pub use sampler::{GramSampler, build_prompt, first_message, transcript_prompt};
pub use schedule::WarmupCosineSchedule;
pub use system::{AcceleratorProbe, HostProbe, StaticProbe};
pub use tokenizer::{BpeTokenizer, ByteTokenizer, SharedTokenizer, Tokenizer, resolve_tokenizer};
