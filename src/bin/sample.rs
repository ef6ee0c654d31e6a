use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use burn::tensor::backend::Backend;
use burn_ndarray::NdArray;
use burn_wgpu::Wgpu;

#[cfg(feature = "cuda")]
use burn_cuda::Cuda;

use gptgram::{
    Config, DeviceKind, GenerationSettings, GramSampler, Precision, init_model, load_config,
    resolve_tokenizer,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sample chat replies from a GPT model")]
struct Args {
    /// Configuration files applied in order (later files override earlier ones).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,
    /// Single-field overrides applied after the files, e.g. `sampling.top_k=50`.
    #[arg(long = "set", value_name = "SECTION.KEY=VALUE")]
    set: Vec<String>,
    /// Backend to run on; derived from `system.device` when omitted.
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
    /// Chat transcript to continue instead of `sampling.start`.
    #[arg(long, value_name = "PATH")]
    prompt_file: Option<PathBuf>,
    /// HuggingFace `tokenizer.json`; required for GPT-2 vocabularies.
    #[arg(long, value_name = "PATH")]
    tokenizer: Option<PathBuf>,
    /// Print the resolved configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendArg {
    Ndarray,
    Wgpu,
    Cuda,
}

impl BackendArg {
    fn from_device(device: DeviceKind) -> Self {
        match device {
            DeviceKind::Cpu => BackendArg::Ndarray,
            DeviceKind::Cuda(_) if cfg!(feature = "cuda") => BackendArg::Cuda,
            DeviceKind::Cuda(_) | DeviceKind::Mps | DeviceKind::Wgpu => BackendArg::Wgpu,
        }
    }
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config, &args.set)?;

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let backend = args
        .backend
        .unwrap_or_else(|| BackendArg::from_device(config.system.device));

    match backend {
        BackendArg::Ndarray => sample_backend::<NdArray<f32>>(&config, &args, "ndarray"),
        BackendArg::Wgpu => sample_backend::<Wgpu<f32>>(&config, &args, "wgpu"),
        BackendArg::Cuda => {
            #[cfg(feature = "cuda")]
            {
                sample_backend::<Cuda<f32>>(&config, &args, "cuda")
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(anyhow!(
                    "cuda backend selected but this build lacks `cuda` feature; rebuild with `--features cuda`"
                ))
            }
        }
    }
}

fn sample_backend<B>(config: &Config, args: &Args, backend_name: &str) -> Result<()>
where
    B: Backend + 'static,
    B::Device: Clone,
{
    let device = B::Device::default();
    B::seed(&device, config.sampling.seed);

    let dtype = config.system.effective_dtype();
    if dtype != Precision::Float32 {
        warn!("{dtype} requested; sampling runs in float32 on {backend_name}");
    }
    if config.system.compile {
        info!("kernel fusion follows the {backend_name} backend defaults");
    }

    let model = init_model::<B>(config, &device)?;
    let tokenizer = resolve_tokenizer(
        args.tokenizer.as_deref(),
        config.io_metrics.init_from,
        model.vocab_size(),
    )?;
    let mut sampler = GramSampler::new(
        model,
        tokenizer,
        device,
        &config.sampling,
        args.prompt_file.as_deref(),
    )?;
    info!(
        "sampling {} replies on {backend_name} from a {}-token prompt",
        config.sampling.num_samples,
        sampler.prompt_tokens().len()
    );

    let settings = GenerationSettings::from(&config.sampling);
    for _ in 0..config.sampling.num_samples {
        let reply = sampler.generate(settings.temperature, settings.top_k)?;
        println!("{reply}");
        println!("---------------");
    }

    Ok(())
}
