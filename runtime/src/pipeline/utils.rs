use anyhow::Result;
use sha2::{Digest, Sha256};
use tiktoken_rs::{CoreBPE, o200k_base};

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;

    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = o200k_base()?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_with_special_tokens(text)
    }
}

/// Rough fallback when no BPE table is available: about four characters per token.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharEstimateTokenizer;

impl Tokenizer for CharEstimateTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        vec![0; self.count(text)]
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// Stable short identifier: `prefix` followed by 16 hex digits of SHA-256.
pub fn short_hash_id(content: &str, prefix: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{prefix}{}", hex(&digest[..8]))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
