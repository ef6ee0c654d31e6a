use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use tracing::info;

use crate::config::{Config, GptConfig, InitFrom};
use crate::model::{Gpt, GptRecord};

/// Weights file stem inside `out_dir`; the recorder adds the extension.
pub const CHECKPOINT_NAME: &str = "ckpt";
pub const RUN_CONFIG_NAME: &str = "config.json";

type CheckpointRecorder = BinFileRecorder<FullPrecisionSettings>;

pub fn save_model<B: Backend>(model: &Gpt<B>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    model
        .clone()
        .save_file(path.to_path_buf(), &CheckpointRecorder::new())
        .with_context(|| format!("failed to save checkpoint {}", path.display()))?;
    info!("saved checkpoint to {}", path.display());
    Ok(())
}

pub fn load_model<B: Backend>(model: Gpt<B>, path: &Path, device: &B::Device) -> Result<Gpt<B>> {
    let file = path.with_extension("bin");
    if !file.is_file() {
        return Err(anyhow!("checkpoint {} does not exist", file.display()));
    }
    let record: GptRecord<B> = Recorder::<B>::load(
        &CheckpointRecorder::new(),
        path.to_path_buf(),
        device,
    )
    .with_context(|| format!("failed to load checkpoint {}", file.display()))?;
    let model = model
        .load_checked(record)
        .with_context(|| format!("checkpoint {} does not fit the model", file.display()))?;
    info!("loaded checkpoint from {}", file.display());
    Ok(model)
}

/// Save `out_dir/ckpt` plus a run snapshot whose `gpt` section is the
/// architecture of `model`, so a later resume rebuilds exactly this shape
/// even when the weights came from a preset or were cropped.
pub fn save_checkpoint<B: Backend>(model: &Gpt<B>, config: &Config, out_dir: &Path) -> Result<()> {
    save_model(model, &out_dir.join(CHECKPOINT_NAME))?;
    let mut snapshot = config.clone();
    snapshot.gpt = GptConfig::from(&model.config());
    write_run_config(&snapshot, out_dir)?;
    Ok(())
}

/// Snapshot of the resolved config next to the checkpoint, used to rebuild
/// the architecture on resume.
pub fn write_run_config(config: &Config, out_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create run directory {}", out_dir.display()))?;
    let payload = serde_json::to_string_pretty(config).context("failed to serialize config")?;
    let path = out_dir.join(RUN_CONFIG_NAME);
    fs::write(&path, payload).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn read_run_config(out_dir: &Path) -> Result<Config> {
    let path = out_dir.join(RUN_CONFIG_NAME);
    let payload =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&payload).with_context(|| format!("failed to parse {}", path.display()))
}

/// Build the model `io_metrics.init_from` asks for: fresh weights, the
/// checkpoint in `out_dir`, or converted GPT-2 weights stored as
/// `out_dir/<preset>`. The result is cropped to `gpt.block_size` when that is
/// smaller than the loaded context.
pub fn init_model<B: Backend>(config: &Config, device: &B::Device) -> Result<Gpt<B>> {
    let out_dir = &config.io_metrics.out_dir;
    let mut model = match config.io_metrics.init_from {
        InitFrom::Scratch => {
            info!("initializing a new model from scratch");
            Gpt::new(config.gpt.init()?, device)
        }
        InitFrom::Resume => {
            info!("resuming from {}", out_dir.display());
            let run = read_run_config(out_dir)?;
            let model = Gpt::new(run.gpt.init()?, device);
            load_model(model, &out_dir.join(CHECKPOINT_NAME), device)?
        }
        InitFrom::Pretrained(preset) => {
            info!("initializing from {preset} weights");
            let gpt = GptConfig::from_pretrained(preset, Some(config.gpt.dropout));
            let model = Gpt::new(gpt.init()?, device);
            load_model(model, &out_dir.join(preset.name()), device)?
        }
    };

    if config.gpt.block_size < model.block_size() {
        model.crop_block_size(config.gpt.block_size)?;
    }
    Ok(model)
}
