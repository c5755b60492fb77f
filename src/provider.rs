//! JWT signing and verification boundary.
//!
//! The SD-JWT machinery never signs anything by itself. It hands the
//! undisclosed payload to a provider, which returns a compact signed JWT, and
//! asks the provider to check the signature of the JWT it received.
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::Error;

/// Blocking JWT crypto provider.
pub trait JwtCryptoProvider {
    /// Signs `payload` as a compact JWT, with the key identified by `key_id`
    /// when the provider requires one.
    fn sign(&self, payload: &Map<String, Value>, key_id: Option<&str>) -> Result<String, Error>;

    /// Verifies the signature of a compact JWT.
    ///
    /// Structurally invalid tokens are not errors: they just do not verify.
    fn verify(&self, jwt: &str) -> bool;
}

/// Asynchronous JWT crypto provider.
///
/// Every `Sync` blocking provider is also an asynchronous one.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait AsyncJwtCryptoProvider {
    /// Signs `payload` as a compact JWT.
    async fn sign(
        &self,
        payload: &Map<String, Value>,
        key_id: Option<&str>,
    ) -> Result<String, Error>;

    /// Verifies the signature of a compact JWT.
    async fn verify(&self, jwt: &str) -> bool;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl<T: JwtCryptoProvider + Sync> AsyncJwtCryptoProvider for T {
    async fn sign(
        &self,
        payload: &Map<String, Value>,
        key_id: Option<&str>,
    ) -> Result<String, Error> {
        JwtCryptoProvider::sign(self, payload, key_id)
    }

    async fn verify(&self, jwt: &str) -> bool {
        JwtCryptoProvider::verify(self, jwt)
    }
}
