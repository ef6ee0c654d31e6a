use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// Top-level configuration shared by training and sampling.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub gpt: GptConfig,
    pub io_metrics: IoMetricsConfig,
    pub data: DataConfig,
    pub optimizer: OptimizerConfig,
    pub learning_rate: LearningRateConfig,
    pub ddp: DdpConfig,
    pub system: SystemConfig,
    pub sampling: SamplingConfig,
}

/// Model architecture.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GptConfig {
    pub block_size: usize,
    pub vocab_size: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
    pub dropout: f64,
    /// Bias terms in linear layers and layer norms.
    pub bias: bool,
}

/// Size of the GPT-2 BPE vocabulary.
pub const GPT2_VOCAB_SIZE: usize = 50257;

impl Default for GptConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            vocab_size: GPT2_VOCAB_SIZE,
            n_layer: 12,
            n_head: 12,
            n_embd: 768,
            dropout: 0.0,
            bias: true,
        }
    }
}

impl GptConfig {
    pub fn head_dim(&self) -> Result<usize> {
        if self.n_head == 0 {
            bail!("n_head must be positive");
        }
        if !self.n_embd.is_multiple_of(self.n_head) {
            bail!(
                "n_embd {} must be divisible by n_head {}",
                self.n_embd,
                self.n_head
            );
        }
        Ok(self.n_embd / self.n_head)
    }

    /// Architecture of a published GPT-2 checkpoint. Only dropout may differ
    /// from the checkpoint.
    pub fn from_pretrained(preset: GptPreset, dropout: Option<f64>) -> Self {
        let (n_layer, n_head, n_embd) = preset.shape();
        Self {
            block_size: 1024,
            vocab_size: GPT2_VOCAB_SIZE,
            n_layer,
            n_head,
            n_embd,
            dropout: dropout.unwrap_or(0.0),
            bias: true,
        }
    }

    /// Like [`GptConfig::from_pretrained`] but takes loose `key=value` overrides
    /// and rejects any key other than `dropout`.
    pub fn from_pretrained_with_overrides(
        preset: GptPreset,
        overrides: &[(&str, f64)],
    ) -> Result<Self> {
        let mut dropout = None;
        for (key, value) in overrides {
            if *key != "dropout" {
                bail!("only `dropout` can be overridden for {preset}, got `{key}`");
            }
            dropout = Some(*value);
        }
        Ok(Self::from_pretrained(preset, dropout))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GptPreset {
    Gpt2,
    Gpt2Medium,
    Gpt2Large,
    Gpt2Xl,
}

impl GptPreset {
    pub const ALL: [GptPreset; 4] = [
        GptPreset::Gpt2,
        GptPreset::Gpt2Medium,
        GptPreset::Gpt2Large,
        GptPreset::Gpt2Xl,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GptPreset::Gpt2 => "gpt2",
            GptPreset::Gpt2Medium => "gpt2-medium",
            GptPreset::Gpt2Large => "gpt2-large",
            GptPreset::Gpt2Xl => "gpt2-xl",
        }
    }

    /// `(n_layer, n_head, n_embd)`
    pub fn shape(self) -> (usize, usize, usize) {
        match self {
            GptPreset::Gpt2 => (12, 12, 768),
            GptPreset::Gpt2Medium => (24, 16, 1024),
            GptPreset::Gpt2Large => (36, 20, 1280),
            GptPreset::Gpt2Xl => (48, 25, 1600),
        }
    }
}

impl fmt::Display for GptPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GptPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        GptPreset::ALL
            .into_iter()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| {
                anyhow!("unknown model type `{s}`; expected gpt2, gpt2-medium, gpt2-large or gpt2-xl")
            })
    }
}

/// Where model weights come from at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum InitFrom {
    #[default]
    Scratch,
    Resume,
    Pretrained(GptPreset),
}

impl fmt::Display for InitFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitFrom::Scratch => f.write_str("scratch"),
            InitFrom::Resume => f.write_str("resume"),
            InitFrom::Pretrained(preset) => preset.fmt(f),
        }
    }
}

impl FromStr for InitFrom {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scratch" => Ok(InitFrom::Scratch),
            "resume" => Ok(InitFrom::Resume),
            other => other
                .parse::<GptPreset>()
                .map(InitFrom::Pretrained)
                .map_err(|_| anyhow!("unknown init_from `{other}`")),
        }
    }
}

impl TryFrom<String> for InitFrom {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<InitFrom> for String {
    fn from(value: InitFrom) -> Self {
        value.to_string()
    }
}

/// Output, evaluation cadence and experiment tracking.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IoMetricsConfig {
    pub out_dir: PathBuf,
    pub eval_interval: usize,
    pub log_interval: usize,
    pub eval_iters: usize,
    pub eval_only: bool,
    pub always_save_checkpoint: bool,
    pub init_from: InitFrom,
    pub wandb_log: bool,
    pub wandb_project: String,
    pub wandb_run_name: String,
    pub folder: PathBuf,
}

impl Default for IoMetricsConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("out"),
            eval_interval: 2000,
            log_interval: 1,
            eval_iters: 200,
            eval_only: false,
            always_save_checkpoint: true,
            init_from: InitFrom::Scratch,
            wandb_log: false,
            wandb_project: "owt".to_string(),
            wandb_run_name: "gpt2".to_string(),
            folder: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    pub dataset: String,
    pub gradient_accumulation_steps: usize,
    pub batch_size: usize,
    pub block_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset: "openwebtext".to_string(),
            gradient_accumulation_steps: 5 * 8,
            batch_size: 12,
            block_size: 1024,
        }
    }
}

impl DataConfig {
    /// Tokens consumed by one optimizer step across `world_size` processes.
    pub fn tokens_per_iter(&self, world_size: usize) -> usize {
        self.gradient_accumulation_steps * world_size * self.batch_size * self.block_size
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub max_iters: usize,
    pub weight_decay: f64,
    /// `(beta1, beta2)`
    pub betas: (f64, f64),
    /// Global gradient norm threshold; `0.0` disables clipping.
    pub grad_clip: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 6e-4,
            max_iters: 600_000,
            weight_decay: 1e-1,
            betas: (0.9, 0.95),
            grad_clip: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LearningRateConfig {
    pub learning_rate: f64,
    pub decay_lr: bool,
    pub warmup_iters: usize,
    pub lr_decay_iters: usize,
    pub min_lr: f64,
}

impl Default for LearningRateConfig {
    fn default() -> Self {
        Self {
            learning_rate: 6e-4,
            decay_lr: true,
            warmup_iters: 2000,
            lr_decay_iters: 600_000,
            min_lr: 6e-5,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DdpBackend {
    #[default]
    Nccl,
    Gloo,
    Mpi,
}

impl fmt::Display for DdpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DdpBackend::Nccl => "nccl",
            DdpBackend::Gloo => "gloo",
            DdpBackend::Mpi => "mpi",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct DdpConfig {
    pub backend: DdpBackend,
}

/// Compute device identifier, e.g. `cpu`, `cuda`, `cuda:1`, `mps`, `wgpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceKind {
    Cpu,
    Cuda(usize),
    Mps,
    Wgpu,
}

impl DeviceKind {
    /// Device family without the ordinal.
    pub fn device_type(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda(_) => "cuda",
            DeviceKind::Mps => "mps",
            DeviceKind::Wgpu => "wgpu",
        }
    }

    pub fn is_accelerator(&self) -> bool {
        !matches!(self, DeviceKind::Cpu)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cuda(0) => f.write_str("cuda"),
            DeviceKind::Cuda(index) => write!(f, "cuda:{index}"),
            other => f.write_str(other.device_type()),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "cuda" | "gpu" => Ok(DeviceKind::Cuda(0)),
            "mps" => Ok(DeviceKind::Mps),
            "wgpu" => Ok(DeviceKind::Wgpu),
            other => {
                let index = other
                    .strip_prefix("cuda:")
                    .ok_or_else(|| anyhow!("unknown device `{s}`"))?;
                let index = index
                    .parse::<usize>()
                    .map_err(|err| anyhow!("invalid cuda ordinal in `{s}`: {err}"))?;
                Ok(DeviceKind::Cuda(index))
            }
        }
    }
}

impl TryFrom<String> for DeviceKind {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceKind> for String {
    fn from(value: DeviceKind) -> Self {
        value.to_string()
    }
}

/// Numeric precision for weights and activations.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Float32,
    BFloat16,
    Float16,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Precision::Float32 => "float32",
            Precision::BFloat16 => "bfloat16",
            Precision::Float16 => "float16",
        };
        f.write_str(name)
    }
}

/// Device and runtime selection. Defaults depend on the host, see
/// [`SystemConfig::detect`](crate::system).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    pub use_cuda: bool,
    pub device: DeviceKind,
    pub dtype: Precision,
    pub compile: bool,
    pub num_workers: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::detect(&crate::system::HostProbe)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    /// Prompt used when no transcript file is given.
    pub start: String,
    pub num_samples: usize,
    pub max_new_tokens: usize,
    pub temperature: f32,
    /// Keep only the `top_k` most likely tokens; `0` disables the filter.
    pub top_k: usize,
    pub seed: u64,
    /// Speaker name appended to transcript prompts.
    pub user: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            start: "\n".to_string(),
            num_samples: 10,
            max_new_tokens: 500,
            temperature: 0.8,
            top_k: 200,
            seed: 1337,
            user: "User".to_string(),
        }
    }
}
