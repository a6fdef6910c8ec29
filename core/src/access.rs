//! Signed access links for originals and reports.
//!
//! A shareable link carries an HMAC-SHA256 over `{kind, document id}`, so
//! guessing another document's id in a URL does not grant access to it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::DocId;

type HmacSha256 = Hmac<Sha256>;

const PAYLOAD_PREFIX: &str = "report-access";
/// Longer inputs are rejected before decoding.
const MAX_SIGNATURE_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Report,
    Original,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessKind::Report => "report",
            AccessKind::Original => "original",
        }
    }
}

impl std::str::FromStr for AccessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "report" => Ok(AccessKind::Report),
            "original" => Ok(AccessKind::Original),
            other => Err(format!("unknown access kind '{other}'")),
        }
    }
}

#[derive(Clone)]
pub struct AccessSigner {
    secret: Vec<u8>,
}

impl AccessSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self { secret: secret.as_ref().to_vec() }
    }

    fn mac(&self, kind: AccessKind, id: DocId) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(format!("{PAYLOAD_PREFIX}:{}:{id}", kind.as_str()).as_bytes());
        mac
    }

    /// Base64url (unpadded) signature for a link to `kind` of document `id`.
    pub fn sign(&self, kind: AccessKind, id: DocId) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(kind, id).finalize().into_bytes())
    }

    /// Constant-time check of a signature taken from a link.
    pub fn verify(&self, kind: AccessKind, id: DocId, signature: &str) -> bool {
        if signature.is_empty() || signature.len() > MAX_SIGNATURE_LEN {
            return false;
        }
        let Ok(bytes) = URL_SAFE_NO_PAD.decode(signature.trim_end_matches('=')) else {
            return false;
        };
        self.mac(kind, id).verify_slice(&bytes).is_ok()
    }
}

/// Compare two shared secrets in constant time.
///
/// Both sides are reduced to a MAC first, so the comparison also takes the
/// same time whatever their lengths.
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    let digest = |value: &str| {
        let mut mac = HmacSha256::new_from_slice(PAYLOAD_PREFIX.as_bytes()).expect("HMAC can take key of any size");
        mac.update(value.as_bytes());
        mac
    };
    let expected = digest(expected).finalize().into_bytes();
    digest(provided).verify_slice(&expected).is_ok()
}

impl std::fmt::Debug for AccessSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_for_same_resource_only() {
        let signer = AccessSigner::new("0123456789abcdef-secret");
        let sig = signer.sign(AccessKind::Report, 42);
        assert!(signer.verify(AccessKind::Report, 42, &sig));
        assert!(!signer.verify(AccessKind::Report, 43, &sig));
        assert!(!signer.verify(AccessKind::Original, 42, &sig));
    }

    #[test]
    fn other_secret_rejects() {
        let a = AccessSigner::new("0123456789abcdef-secret");
        let b = AccessSigner::new("fedcba9876543210-secret");
        assert!(!b.verify(AccessKind::Original, 7, &a.sign(AccessKind::Original, 7)));
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        let signer = AccessSigner::new("0123456789abcdef-secret");
        assert!(!signer.verify(AccessKind::Report, 1, ""));
        assert!(!signer.verify(AccessKind::Report, 1, "not base64 !!"));
        assert!(!signer.verify(AccessKind::Report, 1, &"A".repeat(201)));
    }

    #[test]
    fn tokens_match_only_when_equal() {
        assert!(tokens_match("s3cret-admin", "s3cret-admin"));
        assert!(!tokens_match("s3cret-admiN", "s3cret-admin"));
        assert!(!tokens_match("s3cret", "s3cret-admin"));
        assert!(!tokens_match("", "s3cret-admin"));
    }

    #[test]
    fn signature_is_url_safe() {
        let signer = AccessSigner::new("0123456789abcdef-secret");
        let sig = signer.sign(AccessKind::Original, 123456);
        assert_eq!(sig.len(), 43);
        assert!(sig.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
