use std::path::Path;

use anyhow::{Result, anyhow};
use tokenizers::EncodeInput;

use super::Tokenizer;

/// Byte-level BPE loaded from a HuggingFace `tokenizer.json`, e.g. the GPT-2
/// vocabulary the pretrained presets were trained with.
pub struct BpeTokenizer {
    inner: tokenizers::Tokenizer,
}

impl BpeTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|err| anyhow!("failed to load tokenizer {}: {err}", path.display()))?;
        Ok(Self { inner })
    }
}

impl From<tokenizers::Tokenizer> for BpeTokenizer {
    fn from(inner: tokenizers::Tokenizer) -> Self {
        Self { inner }
    }
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(EncodeInput::Single(text.into()), false)
            .map_err(|err| anyhow!("tokenizer encode error: {err}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|err| anyhow!("tokenizer decode error: {err}"))
    }

    fn len(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}
