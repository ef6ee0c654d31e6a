use anyhow::Result;

use super::Tokenizer;

/// One id per UTF-8 byte. Fits any model with `vocab_size >= 256`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub const VOCAB_SIZE: usize = 256;
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    /// Ids outside the byte range are skipped; invalid UTF-8 is replaced.
    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = ids
            .iter()
            .filter_map(|&id| u8::try_from(id).ok())
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn len(&self) -> usize {
        Self::VOCAB_SIZE
    }
}
