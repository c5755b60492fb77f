/// Errors raised while building, parsing or verifying SD-JWTs.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Input does not follow the compact SD-JWT serialization
    #[error("Invalid SD-JWT format")]
    MalformedToken,

    /// A disclosure does not decode to a `[salt, key, value]` array
    #[error("Invalid selective disclosure: {0}")]
    MalformedDisclosure(String),

    /// An `_sd` entry is not an array of digest strings
    #[error("SD-JWT contains invalid _sd element")]
    InvalidDigestsField,

    /// Two disclosures of the token share the same digest
    #[error("Multiple disclosures with the same digest")]
    DuplicateDisclosure,

    /// A disclosure digest is referenced more than once
    #[error("Disclosure is used multiple times")]
    DisclosureUsedMultipleTimes,

    /// Disclosed objects are nested deeper than [`crate::MAX_DEPTH`]
    #[error("SD-JWT payload is nested too deeply")]
    NestingTooDeep,

    /// The JWT header or body is not a base64url-encoded JSON object
    #[error("Invalid JWT {0}")]
    InvalidJwtPart(&'static str),

    /// The crypto provider cannot sign
    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),

    /// The crypto provider cannot verify
    #[error("Verifier unavailable: {0}")]
    VerifierUnavailable(String),

    /// The crypto provider failed to produce a signed JWT
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Signature or disclosure check failed
    #[error("SD-JWT could not be verified")]
    VerificationFailed,

    /// Bubbled up error from serde_json
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type of this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
