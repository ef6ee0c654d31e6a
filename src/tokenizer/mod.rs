pub mod bpe;
pub mod byte;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::info;

pub use bpe::BpeTokenizer;
pub use byte::ByteTokenizer;

use crate::config::{GPT2_VOCAB_SIZE, InitFrom};

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    fn decode(&self, ids: &[u32]) -> Result<String>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type SharedTokenizer = Arc<dyn Tokenizer>;

/// Pick the tokenizer for a model with `vocab_size` ids.
///
/// A `tokenizer.json` is loaded when given and must fit the vocabulary.
/// GPT-2 presets and GPT-2 sized vocabularies need one; anything else with at
/// least 256 ids falls back to raw bytes.
pub fn resolve_tokenizer(
    tokenizer_path: Option<&Path>,
    init_from: InitFrom,
    vocab_size: usize,
) -> Result<SharedTokenizer> {
    if let Some(path) = tokenizer_path {
        let tokenizer = BpeTokenizer::from_file(path)?;
        if tokenizer.len() > vocab_size {
            bail!(
                "tokenizer {} has {} ids but the model only has {vocab_size}",
                path.display(),
                tokenizer.len()
            );
        }
        info!("loaded {}-token vocabulary from {}", tokenizer.len(), path.display());
        return Ok(Arc::new(tokenizer));
    }

    if matches!(init_from, InitFrom::Pretrained(_)) || vocab_size == GPT2_VOCAB_SIZE {
        bail!("a GPT-2 vocabulary needs its tokenizer.json; pass one with --tokenizer");
    }
    if vocab_size < ByteTokenizer::VOCAB_SIZE {
        bail!(
            "vocab_size {vocab_size} is smaller than the byte tokenizer's {} ids",
            ByteTokenizer::VOCAB_SIZE
        );
    }
    Ok(Arc::new(ByteTokenizer))
}
