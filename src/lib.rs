//! Selective Disclosure for JWTs ([SD-JWT]).
//!
//! [SD-JWT]: <https://datatracker.ietf.org/doc/draft-ietf-oauth-selective-disclosure-jwt/>
//!
//! # Usage
//!
//! An issuer commits to a full set of claims by signing an *undisclosed*
//! payload, where each selectively disclosable claim is replaced by the digest
//! of a [`Disclosure`]. The holder then decides which disclosures to hand over
//! to a verifier.
//!
//! ```text
//! full claims + SdMap ─► SdPayload::create ─► SdPayload ─► SdJwt::sign ─► SdJwt
//!
//! SdJwt ─► SdJwt::present ─► compact string ─► SdJwt::parse ─► SdJwt::verify
//! ```
//!
//! Which claims are selectively disclosable, at issuance, or disclosed, at
//! presentation, is described by an [`SdMap`]. It can be derived from the
//! full payload and the payload that must stay visible
//! ([`SdMap::from_full_and_undisclosed`]), or from dot-separated claim paths
//! ([`SdMap::from_paths`]).
//!
//! Signing and signature verification are delegated to a
//! [`JwtCryptoProvider`] (or [`AsyncJwtCryptoProvider`]). A shared secret
//! implementation, [`HmacJwtCryptoProvider`], is available with the `hmac`
//! feature.
#![warn(missing_docs)]
use std::collections::BTreeMap;

pub mod digest;
mod disclosure;
mod error;
#[cfg(feature = "hmac")]
mod mac;
mod payload;
mod provider;
mod sd_jwt;
mod sd_map;
pub(crate) mod utils;

pub use disclosure::Disclosure;
pub use error::{Error, Result};
#[cfg(feature = "hmac")]
pub use mac::{HmacAlgorithm, HmacJwtCryptoProvider};
pub use payload::SdPayload;
pub use provider::{AsyncJwtCryptoProvider, JwtCryptoProvider};
pub use sd_jwt::SdJwt;
pub use sd_map::{DecoyMode, SdField, SdMap};

/// Claim holding the digests of the concealed claims of an object.
pub const DIGESTS_KEY: &str = "_sd";

/// Separator of the compact SD-JWT segments.
pub const SEPARATOR: char = '~';

/// Maximum object nesting depth when expanding or selecting disclosures,
/// counting the objects reached through disclosures. Matches the recursion
/// limit of `serde_json`.
pub const MAX_DEPTH: usize = 128;

/// Disclosures indexed by digest.
pub type DigestedDisclosures = BTreeMap<String, Disclosure>;
