//! Disclosure digests.
use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use rand::{CryptoRng, RngCore};
use sha2::Digest;

use crate::utils::random_base64url;

/// Number of random bytes hashed into a decoy digest.
const DECOY_SIZE: usize = 32;

/// Computes the digest of an encoded disclosure.
///
/// The digest is the url-safe base64 (no padding) encoding of the SHA-256 hash
/// of the ASCII bytes of `encoded`. It is the value stored in `_sd` arrays and
/// the key of [`crate::DigestedDisclosures`].
pub fn digest(encoded: &str) -> String {
    let hash = sha2::Sha256::digest(encoded.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(hash)
}

/// Generates a decoy digest.
///
/// Decoys are digests of random data and never resolve to a disclosure.
pub fn decoy_digest(rng: &mut (impl CryptoRng + RngCore)) -> String {
    digest(&random_base64url::<DECOY_SIZE>(rng))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disclosure_hashing() {
        assert_eq!(
            digest("WyI2cU1RdlJMNWhhaiIsICJmYW1pbHlfbmFtZSIsICJNw7ZiaXVzIl0"),
            "uutlBuYeMDyjLLTpf6Jxi7yNkEF35jdyWMn9U7b_RYY",
        );
    }

    #[test]
    fn decoys_look_like_digests() {
        let mut rng = rand::rngs::OsRng;
        let decoy = decoy_digest(&mut rng);
        let real = digest("WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgImNvdW50cnkiLCAiSlAiXQ");

        assert_eq!(decoy.len(), real.len());
        assert!(crate::utils::is_base64url_segment(&decoy));
        assert_ne!(decoy, decoy_digest(&mut rng));
    }
}
