use crate::minhash::{MinHashSignature, EMPTY_SLOT};
use serde::Serialize;

/// Estimated similarity of two documents, as agreeing slots out of all slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Similarity {
    pub matches: usize,
    pub slots: usize,
}

impl Similarity {
    /// Unrounded estimate in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.slots == 0 {
            return 0.0;
        }
        self.matches as f64 / self.slots as f64
    }

    /// Integer percentage, rounded half-up.
    pub fn percent(&self) -> u8 {
        if self.slots == 0 {
            return 0;
        }
        ((self.matches * 100 + self.slots / 2) / self.slots) as u8
    }

    /// Percentage with two decimal digits, as shown on reports.
    pub fn percent_2dp(&self) -> f64 {
        (self.fraction() * 10_000.0).round() / 100.0
    }
}

/// Compare two signatures of equal length.
///
/// Slots holding the empty-set sentinel never count as agreement, so an empty
/// document is 0% similar to everything, itself included.
///
/// # Panics
///
/// Panics when the signatures differ in length: they were produced by
/// different hasher configurations and are not comparable.
pub fn compare(a: &MinHashSignature, b: &MinHashSignature) -> Similarity {
    assert_eq!(
        a.len(),
        b.len(),
        "signature length mismatch: {} vs {}",
        a.len(),
        b.len()
    );
    let matches = a
        .values()
        .iter()
        .zip(b.values())
        .filter(|(x, y)| x == y && **x != EMPTY_SLOT)
        .count();
    Similarity { matches, slots: a.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(v: &[u64]) -> MinHashSignature {
        MinHashSignature::from_values(v.to_vec())
    }

    #[test]
    fn reflexive_and_symmetric() {
        let a = sig(&[1, 2, 3, 4]);
        let b = sig(&[1, 9, 3, 8]);
        assert_eq!(compare(&a, &a).percent(), 100);
        assert_eq!(compare(&a, &b), compare(&b, &a));
        assert_eq!(compare(&a, &b).percent(), 50);
    }

    #[test]
    fn rounds_half_up() {
        // 1 of 8 slots = 12.5%
        let a = sig(&[1, 0, 0, 0, 0, 0, 0, 0]);
        let b = sig(&[1, 1, 1, 1, 1, 1, 1, 1]);
        let s = compare(&a, &b);
        assert_eq!(s.percent(), 13);
        assert_eq!(s.percent_2dp(), 12.5);
        assert!((s.fraction() - 0.125).abs() < f64::EPSILON);
    }

    #[test]
    fn sentinel_is_never_similar() {
        let empty = MinHashSignature::empty(4);
        assert_eq!(compare(&empty, &empty).percent(), 0);
        assert_eq!(compare(&empty, &sig(&[1, 2, 3, 4])).percent(), 0);
    }

    #[test]
    #[should_panic(expected = "signature length mismatch")]
    fn length_mismatch_fails_fast() {
        compare(&sig(&[1, 2]), &sig(&[1, 2, 3]));
    }
}
