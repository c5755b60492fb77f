//! Shared-secret JWT crypto provider.
use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use hmac::{digest::KeyInit, Hmac, Mac};
use log::warn;
use serde_json::{Map, Value};
use sha2::{Sha256, Sha384, Sha512};
use std::{fmt, str::FromStr};

use crate::{utils::is_compact_jwt, Error, JwtCryptoProvider};

/// HMAC signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HmacAlgorithm {
    /// HMAC using SHA-256.
    HS256,

    /// HMAC using SHA-384.
    HS384,

    /// HMAC using SHA-512.
    HS512,
}

impl HmacAlgorithm {
    /// JOSE name of the algorithm, as found in the `alg` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
        }
    }
}

impl FromStr for HmacAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            other => Err(Error::SignerUnavailable(format!(
                "unsupported algorithm for HMAC crypto provider: {other}"
            ))),
        }
    }
}

impl fmt::Display for HmacAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT crypto provider signing with a shared secret.
///
/// Signed JWTs carry an `{"alg", "typ": "JWT", "kid"}` header, the key ID
/// being omitted when not given.
#[derive(Clone)]
pub struct HmacJwtCryptoProvider {
    algorithm: HmacAlgorithm,
    secret: Vec<u8>,
}

impl HmacJwtCryptoProvider {
    /// Creates a provider for the given algorithm name (`HS256`, `HS384` or
    /// `HS512`).
    pub fn new(algorithm: &str, secret: impl Into<Vec<u8>>) -> Result<Self, Error> {
        Ok(Self::with_algorithm(algorithm.parse()?, secret))
    }

    /// Creates a provider for the given algorithm.
    pub fn with_algorithm(algorithm: HmacAlgorithm, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm,
            secret: secret.into(),
        }
    }

    /// Signature algorithm.
    pub fn algorithm(&self) -> HmacAlgorithm {
        self.algorithm
    }

    fn sign_bytes(&self, signing_input: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(match self.algorithm {
            HmacAlgorithm::HS256 => keyed::<Hmac<Sha256>>(&self.secret, signing_input)?
                .finalize()
                .into_bytes()
                .to_vec(),
            HmacAlgorithm::HS384 => keyed::<Hmac<Sha384>>(&self.secret, signing_input)?
                .finalize()
                .into_bytes()
                .to_vec(),
            HmacAlgorithm::HS512 => keyed::<Hmac<Sha512>>(&self.secret, signing_input)?
                .finalize()
                .into_bytes()
                .to_vec(),
        })
    }

    fn verify_bytes(&self, signing_input: &[u8], signature: &[u8]) -> bool {
        match self.algorithm {
            HmacAlgorithm::HS256 => keyed::<Hmac<Sha256>>(&self.secret, signing_input)
                .is_ok_and(|mac| mac.verify_slice(signature).is_ok()),
            HmacAlgorithm::HS384 => keyed::<Hmac<Sha384>>(&self.secret, signing_input)
                .is_ok_and(|mac| mac.verify_slice(signature).is_ok()),
            HmacAlgorithm::HS512 => keyed::<Hmac<Sha512>>(&self.secret, signing_input)
                .is_ok_and(|mac| mac.verify_slice(signature).is_ok()),
        }
    }
}

impl fmt::Debug for HmacJwtCryptoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacJwtCryptoProvider")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn keyed<M: Mac + KeyInit>(secret: &[u8], signing_input: &[u8]) -> Result<M, Error> {
    let mut mac = <M as KeyInit>::new_from_slice(secret)
        .map_err(|e| Error::SignerUnavailable(e.to_string()))?;
    mac.update(signing_input);
    Ok(mac)
}

impl JwtCryptoProvider for HmacJwtCryptoProvider {
    fn sign(&self, payload: &Map<String, Value>, key_id: Option<&str>) -> Result<String, Error> {
        let mut header = Map::new();
        header.insert("alg".to_owned(), self.algorithm.as_str().into());
        header.insert("typ".to_owned(), "JWT".into());
        if let Some(key_id) = key_id {
            header.insert("kid".to_owned(), key_id.into());
        }

        let header_b64 = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let payload_b64 = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);
        let signing_input = [header_b64, payload_b64].join(".");

        let signature = self.sign_bytes(signing_input.as_bytes())?;
        let signature_b64 = BASE64_URL_SAFE_NO_PAD.encode(signature);

        Ok([signing_input, signature_b64].join("."))
    }

    fn verify(&self, jwt: &str) -> bool {
        if !is_compact_jwt(jwt) {
            warn!("not a compact JWT");
            return false;
        }

        let Some((signing_input, signature_b64)) = jwt.rsplit_once('.') else {
            return false;
        };

        let algorithm_matches = signing_input
            .split('.')
            .next()
            .and_then(|header| BASE64_URL_SAFE_NO_PAD.decode(header).ok())
            .and_then(|header| serde_json::from_slice::<Map<String, Value>>(&header).ok())
            .is_some_and(|header| {
                header.get("alg").and_then(Value::as_str) == Some(self.algorithm.as_str())
            });

        if !algorithm_matches {
            warn!("JWT is not signed with {}", self.algorithm);
            return false;
        }

        match BASE64_URL_SAFE_NO_PAD.decode(signature_b64) {
            Ok(signature) => {
                let valid = self.verify_bytes(signing_input.as_bytes(), &signature);
                if !valid {
                    warn!("invalid JWT signature");
                }

                valid
            }
            Err(_) => false,
        }
    }
}
