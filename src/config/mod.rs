pub mod core;
pub mod load;

pub use core::{
    Config, DataConfig, GPT2_VOCAB_SIZE, DdpBackend, DdpConfig, DeviceKind, GptConfig, GptPreset, InitFrom,
    IoMetricsConfig, LearningRateConfig, OptimizerConfig, Precision, SamplingConfig, SystemConfig,
};
pub use load::load_config;
