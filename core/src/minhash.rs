//! MinHash signatures over shingle sets.
//!
//! Each of the `H` slots holds `min_{x ∈ S} h_i(x)` for a hash function
//! `h_i(x) = (a_i·x + b_i) mod p` drawn from a pairwise-independent family.
//! Two documents agree on a slot with probability equal to the Jaccard
//! similarity of their shingle sets, so the fraction of agreeing slots is an
//! estimate of that similarity with error shrinking as `O(1/√H)`.
//!
//! The coefficients are derived from a seed once, when the [`MinHasher`] is
//! built. Signatures are only comparable between hashers built from the same
//! `(num_hashes, seed)` pair, so both values are persisted in configuration.

use crate::tokenizer::ShingleSet;
use serde::{Deserialize, Serialize};

/// Signature length used by the upload and check paths.
pub const DEFAULT_NUM_HASHES: usize = 128;
pub const DEFAULT_SEED: u64 = 0x5EED_CAFE;

/// Mersenne prime 2^61 - 1.
pub const MERSENNE_61: u64 = (1 << 61) - 1;

/// Slot value of a signature computed from an empty shingle set.
pub const EMPTY_SLOT: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinHashParams {
    pub num_hashes: usize,
    pub seed: u64,
}

impl Default for MinHashParams {
    fn default() -> Self {
        Self { num_hashes: DEFAULT_NUM_HASHES, seed: DEFAULT_SEED }
    }
}

/// A fixed-length vector of per-function minimum hash values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinHashSignature(Vec<u64>);

impl MinHashSignature {
    pub fn from_values(values: Vec<u64>) -> Self {
        MinHashSignature(values)
    }

    /// Signature of an empty shingle set.
    pub fn empty(len: usize) -> Self {
        MinHashSignature(vec![EMPTY_SLOT; len])
    }

    pub fn values(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every slot holds the empty-set sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.0.iter().all(|&v| v == EMPTY_SLOT)
    }
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    a: u64,
    b: u64,
}

/// Signature generator with a fixed family of hash functions.
#[derive(Debug, Clone)]
pub struct MinHasher {
    params: MinHashParams,
    coefficients: Vec<Coefficients>,
}

impl MinHasher {
    pub fn new(params: MinHashParams) -> Self {
        let mut rng = SplitMix64::new(params.seed);
        let coefficients = (0..params.num_hashes)
            .map(|_| Coefficients {
                a: 1 + rng.next() % (MERSENNE_61 - 1),
                b: rng.next() % MERSENNE_61,
            })
            .collect();
        Self { params, coefficients }
    }

    pub fn params(&self) -> MinHashParams {
        self.params
    }

    pub fn num_hashes(&self) -> usize {
        self.params.num_hashes
    }

    pub fn signature(&self, shingles: &ShingleSet) -> MinHashSignature {
        let mut mins = vec![EMPTY_SLOT; self.params.num_hashes];
        for base in shingles.iter() {
            let x = base % MERSENNE_61;
            for (slot, c) in mins.iter_mut().zip(&self.coefficients) {
                let h = permute(c, x);
                if h < *slot {
                    *slot = h;
                }
            }
        }
        MinHashSignature(mins)
    }
}

impl Default for MinHasher {
    fn default() -> Self {
        Self::new(MinHashParams::default())
    }
}

#[inline]
fn permute(c: &Coefficients, x: u64) -> u64 {
    ((c.a as u128 * x as u128 + c.b as u128) % MERSENNE_61 as u128) as u64
}

/// Deterministic coefficient stream.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }
}
