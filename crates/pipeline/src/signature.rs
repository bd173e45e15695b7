//! Payload signature verification.
//!
//! The signature header has the form `<algorithm>=<hex digest>`. Only
//! HMAC-SHA1 (`sha1=`) is accepted. The digest is compared with
//! [`Mac::verify_slice`], which runs in constant time.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

/// The only supported algorithm tag.
pub const SIGNATURE_ALGORITHM: &str = "sha1";

/// Why a signature was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Header missing or not `<algorithm>=<digest>`.
    #[error("Signature in unexpected format.")]
    BadFormat,

    /// The algorithm tag is not `sha1`.
    #[error("Signature uses unexpected hash type {0}. Only SHA-1 is supported.")]
    UnsupportedAlgorithm(String),

    /// The digest is not the lowercase hex HMAC of the body.
    #[error("Invalid signature.")]
    Mismatch,
}

/// Verifies delivery bodies against one endpoint's shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    /// Creates a verifier for `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Verifies `body` against `header` (`None` when the header is absent).
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        let (algorithm, digest) = header
            .and_then(|h| h.trim().split_once('='))
            .ok_or(SignatureError::BadFormat)?;

        if algorithm != SIGNATURE_ALGORITHM {
            return Err(SignatureError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        // The digest must be the exact lowercase hex text; any other spelling
        // of the same bytes is a mismatch.
        if !is_lowercase_hex(digest) {
            return Err(SignatureError::Mismatch);
        }
        let expected = hex::decode(digest).map_err(|_| SignatureError::Mismatch)?;

        self.mac(body)
            .verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }

    /// Computes the lowercase hex digest of `body`.
    pub fn compute(&self, body: &[u8]) -> String {
        hex::encode(self.mac(body).finalize().into_bytes())
    }

    fn mac(&self, body: &[u8]) -> HmacSha1 {
        // `new_from_slice` only fails for MACs with a fixed key size. HMAC
        // hashes long keys and pads short ones, so every secret is accepted.
        let mut mac = <HmacSha1 as Mac>::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(body);
        mac
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

fn is_lowercase_hex(digest: &str) -> bool {
    digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Verifies `body` for an endpoint whose secret may be unset.
///
/// Without a secret, verification is skipped.
pub fn verify_signature(
    verifier: Option<&SignatureVerifier>,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    match verifier {
        Some(verifier) => verifier.verify(body, header),
        None => Ok(()),
    }
}
