use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::config::SamplingConfig;
use crate::generation::{GenerationSettings, generate};
use crate::model::Gpt;
use crate::tokenizer::SharedTokenizer;

/// Chat-style sampler: continues a transcript as the configured user and
/// returns only the first line of the reply.
pub struct GramSampler<B: Backend> {
    model: Gpt<B>,
    tokenizer: SharedTokenizer,
    device: B::Device,
    prompt: Vec<i64>,
    max_new_tokens: usize,
    rng: StdRng,
}

impl<B: Backend> GramSampler<B> {
    pub fn new(
        model: Gpt<B>,
        tokenizer: SharedTokenizer,
        device: B::Device,
        sampling: &SamplingConfig,
        prompt_file: Option<&Path>,
    ) -> Result<Self> {
        let text = build_prompt(sampling, prompt_file)?;
        let prompt: Vec<i64> = tokenizer
            .encode(&text)?
            .into_iter()
            .map(i64::from)
            .collect();
        debug!("prompt encoded to {} tokens", prompt.len());

        Ok(Self {
            model,
            tokenizer,
            device,
            prompt,
            max_new_tokens: sampling.max_new_tokens,
            rng: StdRng::seed_from_u64(sampling.seed),
        })
    }

    pub fn prompt_tokens(&self) -> &[i64] {
        &self.prompt
    }

    /// One reply: generated text after the prompt, up to the first newline.
    pub fn generate(&mut self, temperature: f32, top_k: Option<usize>) -> Result<String> {
        let settings = GenerationSettings {
            max_new_tokens: self.max_new_tokens,
            temperature,
            top_k,
        };
        let tokens = generate(
            &self.model,
            &self.prompt,
            &settings,
            &self.device,
            &mut self.rng,
            None,
        )?;

        let generated: Vec<u32> = tokens[self.prompt.len()..]
            .iter()
            .filter_map(|&token| u32::try_from(token).ok())
            .collect();
        let response = self.tokenizer.decode(&generated)?;
        Ok(first_message(&response).to_string())
    }
}

/// The configured start text, or the transcript in `prompt_file` ending in a
/// fresh `"{user}: "` turn.
pub fn build_prompt(sampling: &SamplingConfig, prompt_file: Option<&Path>) -> Result<String> {
    match prompt_file {
        None => Ok(sampling.start.clone()),
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read prompt file {}", path.display()))?;
            Ok(transcript_prompt(text, &sampling.user))
        }
    }
}

pub fn transcript_prompt(mut text: String, user: &str) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(user);
    text.push_str(": ");
    text
}

pub fn first_message(response: &str) -> &str {
    response.split('\n').next().unwrap_or_default()
}
