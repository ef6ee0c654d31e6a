use anyhow::{Result, anyhow, bail};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::config::SamplingConfig;
use crate::model::Gpt;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationSettings {
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub top_k: Option<usize>,
}

impl From<&SamplingConfig> for GenerationSettings {
    fn from(config: &SamplingConfig) -> Self {
        Self {
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            top_k: (config.top_k > 0).then_some(config.top_k),
        }
    }
}

/// Draw one token id from raw logits after temperature scaling and an
/// optional top-k cut. Ties at the k-th value are kept.
pub fn sample_from_logits<R: Rng + ?Sized>(
    logits: &[f32],
    temperature: f32,
    top_k: Option<usize>,
    rng: &mut R,
) -> Result<i64> {
    if logits.is_empty() {
        bail!("logits are empty");
    }
    if !(temperature.is_finite() && temperature > 0.0) {
        bail!("temperature must be positive, got {temperature}");
    }

    let scaled: Vec<f64> = logits
        .iter()
        .map(|&logit| f64::from(logit) / f64::from(temperature))
        .collect();
    let floor = top_k
        .and_then(|k| kth_largest(&scaled, k))
        .unwrap_or(f64::NEG_INFINITY);
    let peak = scaled
        .iter()
        .copied()
        .filter(|&logit| logit >= floor)
        .fold(f64::NEG_INFINITY, f64::max);

    let weights: Vec<f64> = scaled
        .iter()
        .map(|&logit| {
            if logit >= floor {
                (logit - peak).exp()
            } else {
                0.0
            }
        })
        .collect();

    let index = match WeightedIndex::new(&weights) {
        Ok(dist) => dist.sample(rng),
        // all mass vanished (NaN or -inf logits): any token is as good as another
        Err(_) => rng.gen_range(0..weights.len()),
    };
    Ok(index as i64)
}

/// The `k`-th largest value, or `None` when `k` keeps every entry.
fn kth_largest(values: &[f64], k: usize) -> Option<f64> {
    if k == 0 || k >= values.len() {
        return None;
    }
    let mut scratch = values.to_vec();
    let (_, kth, _) = scratch.select_nth_unstable_by(k - 1, |a, b| b.total_cmp(a));
    Some(*kth)
}

/// Extend `prompt` by `max_new_tokens` sampled tokens, feeding each back in.
/// The context is cropped to the model's block size before every step.
pub fn generate<B: Backend, R: Rng + ?Sized>(
    model: &Gpt<B>,
    prompt: &[i64],
    settings: &GenerationSettings,
    device: &B::Device,
    rng: &mut R,
    mut on_token: Option<&mut dyn FnMut(i64)>,
) -> Result<Vec<i64>> {
    if prompt.is_empty() {
        bail!("prompt must contain at least one token");
    }

    let block_size = model.block_size();
    let mut tokens = prompt.to_vec();
    tokens.reserve(settings.max_new_tokens);

    for _ in 0..settings.max_new_tokens {
        let start = tokens.len().saturating_sub(block_size);
        let context = &tokens[start..];
        let input = Tensor::<B, 2, Int>::from_data(
            TensorData::new(context.to_vec(), [1, context.len()]),
            device,
        );

        let logits = model.forward_last(input)?;
        let [_, _, vocab] = logits.shape().dims();
        let values = logits
            .reshape([vocab])
            .to_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .map_err(|err| anyhow!("{err:?}"))?;

        let next = sample_from_logits(&values, settings.temperature, settings.top_k, rng)?;
        tokens.push(next);

        if let Some(callback) = &mut on_token {
            callback(next);
        }
    }

    Ok(tokens)
}
