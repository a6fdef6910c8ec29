use crate::config::FingerprintConfig;
use crate::minhash::{MinHashSignature, MinHasher};
use crate::normalize::normalize;
use crate::tokenizer::shingles;

/// Output of the normalize -> shingle -> sign pipeline for one text.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub normalized: String,
    pub shingle_count: usize,
    pub signature: MinHashSignature,
}

/// Runs the fingerprint pipeline with one fixed parameter set, so uploads and
/// checks produce comparable signatures.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    shingle_size: usize,
    hasher: MinHasher,
}

impl Fingerprinter {
    pub fn new(config: &FingerprintConfig) -> Self {
        Self {
            shingle_size: config.shingle_size,
            hasher: MinHasher::new(config.minhash_params()),
        }
    }

    pub fn signature_len(&self) -> usize {
        self.hasher.num_hashes()
    }

    pub fn fingerprint(&self, raw: &str) -> Fingerprint {
        let normalized = normalize(raw);
        let set = shingles(&normalized, self.shingle_size);
        let signature = self.hasher.signature(&set);
        Fingerprint { normalized, shingle_count: set.len(), signature }
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(&FingerprintConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare;

    #[test]
    fn identical_text_identical_fingerprint() {
        let fp = Fingerprinter::default();
        let text = "Rust makes systems programming approachable without sacrificing control over memory.";
        let a = fp.fingerprint(text);
        let b = fp.fingerprint(text);
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.shingle_count, 6);
        assert_eq!(compare(&a.signature, &b.signature).percent(), 100);
    }

    #[test]
    fn reformatting_does_not_change_signature() {
        let fp = Fingerprinter::default();
        let a = fp.fingerprint("The cat sat on the mat, and then it slept.");
        let b = fp.fingerprint("the  CAT sat on the MAT and then   it slept");
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn empty_text_has_no_shingles() {
        let fp = Fingerprinter::default();
        let f = fp.fingerprint("  ...  ");
        assert_eq!(f.shingle_count, 0);
        assert!(f.signature.is_sentinel());
        assert_eq!(f.signature.len(), fp.signature_len());
    }
}
