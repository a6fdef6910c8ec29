use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Width of a shingle in words.
pub const DEFAULT_SHINGLE_SIZE: usize = 5;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex");
}

/// Tokenize text into words using NFKC normalization, lowercasing and
/// punctuation removal. Tokens are whitespace-delimited first, so "well-known"
/// becomes "wellknown" rather than two words.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    normalized
        .split_whitespace()
        .map(|word| NON_WORD.replace_all(word, "").into_owned())
        .filter(|word| !word.is_empty())
        .collect()
}

/// Set of hashed word n-grams of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShingleSet {
    hashes: HashSet<u64>,
}

impl ShingleSet {
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.hashes.contains(&hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.hashes.iter().copied()
    }

    /// Exact Jaccard similarity; MinHash signatures estimate this value.
    pub fn jaccard(&self, other: &ShingleSet) -> f64 {
        if self.is_empty() && other.is_empty() {
            return 0.0;
        }
        let inter = self.hashes.intersection(&other.hashes).count();
        let union = self.len() + other.len() - inter;
        inter as f64 / union as f64
    }
}

impl FromIterator<u64> for ShingleSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        ShingleSet { hashes: iter.into_iter().collect() }
    }
}

/// Build the shingle set of `text` with windows of `k` words.
///
/// Text with fewer than `k` tokens yields one shingle covering all of them;
/// text without tokens yields an empty set.
pub fn shingles(text: &str, k: usize) -> ShingleSet {
    let k = k.max(1);
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return ShingleSet::default();
    }
    if tokens.len() < k {
        return std::iter::once(shingle_hash(&tokens)).collect();
    }
    tokens.windows(k).map(shingle_hash).collect()
}

/// Stable 64-bit FNV-1a hash of the window joined by single spaces.
pub fn shingle_hash(window: &[String]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x00000100000001B3;
    let mut state = OFFSET;
    for (i, token) in window.iter().enumerate() {
        if i > 0 {
            state ^= b' ' as u64;
            state = state.wrapping_mul(PRIME);
        }
        for &b in token.as_bytes() {
            state ^= b as u64;
            state = state.wrapping_mul(PRIME);
        }
    }
    state
}
