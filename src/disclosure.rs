use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt,
    hash::{Hash, Hasher},
};

use crate::{digest::digest, utils::random_base64url, Error};

/// Salt size, in bytes.
const SALT_SIZE: usize = 128 / 8;

/// Selective disclosure of a single object property.
///
/// A disclosure carries the `[salt, key, value]` triple together with its
/// transport encoding: the url-safe base64 string (without padding) of the
/// JSON array. The encoded form is the pre-image of the digest referenced from
/// the `_sd` claim, so two disclosures are equal iff their encodings are.
///
/// See: <https://www.ietf.org/archive/id/draft-ietf-oauth-selective-disclosure-jwt-05.html#section-5.2>
#[derive(Clone)]
pub struct Disclosure {
    encoded: String,
    salt: String,
    key: String,
    value: Value,
}

impl Disclosure {
    /// Creates a disclosure for the given property, using a fresh salt drawn
    /// from the operating system random source.
    pub fn generate(key: impl Into<String>, value: Value) -> Self {
        Self::generate_with(&mut OsRng, key, value)
    }

    /// Creates a disclosure for the given property, drawing the salt from
    /// `rng`.
    pub fn generate_with(
        rng: &mut (impl CryptoRng + RngCore),
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::from_parts(random_base64url::<SALT_SIZE>(rng), key.into(), value)
    }

    /// Builds a disclosure from an explicit salt.
    pub fn from_parts(salt: String, key: String, value: Value) -> Self {
        let array = Value::Array(vec![
            Value::String(salt.clone()),
            Value::String(key.clone()),
            value.clone(),
        ]);

        Self {
            encoded: BASE64_URL_SAFE_NO_PAD.encode(array.to_string()),
            salt,
            key,
            value,
        }
    }

    /// Parses an encoded disclosure.
    pub fn parse(encoded: &str) -> Result<Self, Error> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::MalformedDisclosure(e.to_string()))?;

        let json: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::MalformedDisclosure(e.to_string()))?;

        match json {
            Value::Array(values) => match <[Value; 3]>::try_from(values) {
                Ok([Value::String(salt), Value::String(key), value]) => Ok(Self {
                    encoded: encoded.to_owned(),
                    salt,
                    key,
                    value,
                }),
                Ok(_) => Err(Error::MalformedDisclosure(
                    "salt and key must be strings".to_owned(),
                )),
                Err(values) => Err(Error::MalformedDisclosure(format!(
                    "expected 3 elements, found {}",
                    values.len()
                ))),
            },
            _ => Err(Error::MalformedDisclosure("not an array".to_owned())),
        }
    }

    /// Encoded disclosure, as transported in the SD-JWT.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Random salt.
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Disclosed property name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Disclosed property value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Digest of this disclosure.
    pub fn digest(&self) -> String {
        digest(&self.encoded)
    }
}

impl PartialEq for Disclosure {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for Disclosure {}

impl Hash for Disclosure {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state)
    }
}

impl AsRef<str> for Disclosure {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for Disclosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.encoded.fmt(f)
    }
}

impl Serialize for Disclosure {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.encoded.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Disclosure {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Self::parse(&String::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for Disclosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Salts and values stay out of debug output.
        f.debug_struct("Disclosure")
            .field("key", &self.key)
            .field("encoded", &self.encoded)
            .finish_non_exhaustive()
    }
}
