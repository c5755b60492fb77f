use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

use crate::{
    utils::{is_base64url_segment, is_compact_jwt},
    AsyncJwtCryptoProvider, Error, JwtCryptoProvider, SdMap, SdPayload, SEPARATOR,
};

/// SD-JWT.
///
/// Signed JWT of an undisclosed payload, together with the disclosures
/// revealed to the receiver and an optional holder binding JWT.
///
/// Compact serialization:
///
/// ```text
/// <header>.<body>.<signature>(~<disclosure>)*(~<holder binding JWT>?)?
/// ```
///
/// A trailing `~`, with or without holder binding JWT, marks a presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct SdJwt {
    jwt: String,
    header: Map<String, Value>,
    sd_payload: SdPayload,
    holder_jwt: Option<String>,
    is_presentation: bool,
}

impl SdJwt {
    /// Parses a compact SD-JWT.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let parts = PartsRef::split(input)?;

        let header = decode_object(parts.header, "header")?;
        let body = decode_object(parts.body, "body")?;
        let sd_payload = SdPayload::create_from(body, parts.disclosures)?;

        Ok(Self {
            jwt: parts.jwt.to_owned(),
            header,
            sd_payload,
            holder_jwt: parts.holder_jwt.map(ToOwned::to_owned),
            is_presentation: parts.is_presentation,
        })
    }

    /// Checks that `input` follows the compact SD-JWT serialization.
    ///
    /// Header, body and disclosures are not decoded.
    pub fn is_sd_jwt(input: &str) -> bool {
        PartsRef::split(input).is_ok()
    }

    /// Parses and verifies a compact SD-JWT.
    pub fn verify_and_parse(
        input: &str,
        provider: &impl JwtCryptoProvider,
    ) -> Result<Self, Error> {
        let sd_jwt = Self::parse(input)?;
        if sd_jwt.verify(provider) {
            Ok(sd_jwt)
        } else {
            Err(Error::VerificationFailed)
        }
    }

    /// Parses and verifies a compact SD-JWT with an asynchronous provider.
    pub async fn verify_and_parse_async(
        input: &str,
        provider: &impl AsyncJwtCryptoProvider,
    ) -> Result<Self, Error> {
        let sd_jwt = Self::parse(input)?;
        if sd_jwt.verify_async(provider).await {
            Ok(sd_jwt)
        } else {
            Err(Error::VerificationFailed)
        }
    }

    /// Signs the undisclosed payload of `sd_payload`.
    ///
    /// The resulting SD-JWT carries every disclosure of `sd_payload`.
    pub fn sign(
        sd_payload: SdPayload,
        provider: &impl JwtCryptoProvider,
        key_id: Option<&str>,
        holder_jwt: Option<String>,
    ) -> Result<Self, Error> {
        let jwt = JwtCryptoProvider::sign(provider, sd_payload.undisclosed_payload(), key_id)?;
        Self::from_signed(jwt, sd_payload, holder_jwt)
    }

    /// Signs the undisclosed payload of `sd_payload` with an asynchronous
    /// provider.
    pub async fn sign_async(
        sd_payload: SdPayload,
        provider: &impl AsyncJwtCryptoProvider,
        key_id: Option<&str>,
        holder_jwt: Option<String>,
    ) -> Result<Self, Error> {
        let jwt =
            AsyncJwtCryptoProvider::sign(provider, sd_payload.undisclosed_payload(), key_id)
                .await?;
        Self::from_signed(jwt, sd_payload, holder_jwt)
    }

    fn from_signed(
        jwt: String,
        sd_payload: SdPayload,
        holder_jwt: Option<String>,
    ) -> Result<Self, Error> {
        if !is_compact_jwt(&jwt) {
            return Err(Error::Signing(
                "crypto provider did not return a compact JWT".to_owned(),
            ));
        }

        let header = jwt
            .split('.')
            .next()
            .ok_or(Error::InvalidJwtPart("header"))
            .and_then(|header| decode_object(header, "header"))?;

        debug!(
            "signed SD-JWT with {} disclosures",
            sd_payload.digested_disclosures().len()
        );

        Ok(Self {
            jwt,
            header,
            sd_payload,
            holder_jwt,
            is_presentation: false,
        })
    }

    /// Checks the JWT signature, then the disclosures against the signed
    /// payload.
    pub fn verify(&self, provider: &impl JwtCryptoProvider) -> bool {
        self.check_signature(JwtCryptoProvider::verify(provider, &self.jwt))
            && self.sd_payload.verify_disclosures()
    }

    /// Same as [`Self::verify`], with an asynchronous provider.
    pub async fn verify_async(&self, provider: &impl AsyncJwtCryptoProvider) -> bool {
        self.check_signature(AsyncJwtCryptoProvider::verify(provider, &self.jwt).await)
            && self.sd_payload.verify_disclosures()
    }

    fn check_signature(&self, valid: bool) -> bool {
        if !valid {
            warn!("invalid SD-JWT signature");
        }

        valid
    }

    /// Presents this SD-JWT with the disclosures selected by `sd_map`, or
    /// without any disclosure if `sd_map` is `None`.
    ///
    /// The original holder binding JWT is kept unless `holder_jwt` is given.
    pub fn present(
        &self,
        sd_map: Option<&SdMap>,
        holder_jwt: Option<String>,
    ) -> Result<Self, Error> {
        let sd_payload = match sd_map {
            Some(sd_map) => self.sd_payload.with_selective_disclosures(sd_map)?,
            None => self.sd_payload.without_disclosures(),
        };

        Ok(self.presentation(sd_payload, holder_jwt))
    }

    /// Presents this SD-JWT with all or none of its disclosures.
    pub fn present_all(&self, disclose_all: bool, holder_jwt: Option<String>) -> Self {
        let sd_payload = if disclose_all {
            self.sd_payload.clone()
        } else {
            self.sd_payload.without_disclosures()
        };

        self.presentation(sd_payload, holder_jwt)
    }

    fn presentation(&self, sd_payload: SdPayload, holder_jwt: Option<String>) -> Self {
        Self {
            jwt: self.jwt.clone(),
            header: self.header.clone(),
            sd_payload,
            holder_jwt: holder_jwt.or_else(|| self.holder_jwt.clone()),
            is_presentation: true,
        }
    }

    /// Serializes this SD-JWT.
    ///
    /// When formatting for presentation without holder binding JWT, the
    /// output ends with a `~`.
    pub fn to_string_with(&self, format_for_presentation: bool) -> String {
        let mut out = self.jwt.clone();

        for disclosure in self.disclosures() {
            out.push(SEPARATOR);
            out.push_str(disclosure);
        }

        match &self.holder_jwt {
            Some(holder_jwt) => {
                out.push(SEPARATOR);
                out.push_str(holder_jwt);
            }
            None if format_for_presentation => out.push(SEPARATOR),
            None => (),
        }

        out
    }

    /// Signed compact JWT.
    pub fn jwt(&self) -> &str {
        &self.jwt
    }

    /// Decoded JWT header.
    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    /// Payload and disclosures.
    pub fn sd_payload(&self) -> &SdPayload {
        &self.sd_payload
    }

    /// Holder binding JWT.
    pub fn holder_jwt(&self) -> Option<&str> {
        self.holder_jwt.as_deref()
    }

    /// Whether this SD-JWT is a presentation.
    pub fn is_presentation(&self) -> bool {
        self.is_presentation
    }

    /// Signature algorithm (`alg` header).
    pub fn algorithm(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    /// Signing key ID (`kid` header).
    pub fn key_id(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    /// Signing key (`jwk` header).
    pub fn jwk(&self) -> Option<&Value> {
        self.header.get("jwk")
    }

    /// Encoded disclosures.
    pub fn disclosures(&self) -> impl Iterator<Item = &str> {
        self.sd_payload.disclosures().map(|d| d.encoded())
    }

    /// Payload with every available disclosure revealed.
    pub fn full_payload(&self) -> Result<Map<String, Value>, Error> {
        self.sd_payload.full_payload()
    }
}

impl fmt::Display for SdJwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(self.is_presentation))
    }
}

impl FromStr for SdJwt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SdJwt {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SdJwt {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Segments of a compact SD-JWT.
struct PartsRef<'a> {
    jwt: &'a str,
    header: &'a str,
    body: &'a str,
    disclosures: Vec<&'a str>,
    holder_jwt: Option<&'a str>,
    is_presentation: bool,
}

impl<'a> PartsRef<'a> {
    fn split(input: &'a str) -> Result<Self, Error> {
        let mut segments = input.split(SEPARATOR);

        let jwt = segments
            .next()
            .filter(|jwt| is_compact_jwt(jwt))
            .ok_or(Error::MalformedToken)?;

        let mut disclosures: Vec<&str> = segments.collect();
        let mut holder_jwt = None;
        let mut is_presentation = false;

        // Only the last segment may be empty or a JWT.
        if let Some(&last) = disclosures.last() {
            if last.is_empty() || last.contains('.') {
                if !last.is_empty() {
                    if !is_compact_jwt(last) {
                        return Err(Error::MalformedToken);
                    }

                    holder_jwt = Some(last);
                }

                disclosures.pop();
                is_presentation = true;
            }
        }

        if !disclosures.iter().all(|d| is_base64url_segment(d)) {
            return Err(Error::MalformedToken);
        }

        let mut jwt_parts = jwt.split('.');
        let (Some(header), Some(body)) = (jwt_parts.next(), jwt_parts.next()) else {
            return Err(Error::MalformedToken);
        };

        Ok(Self {
            jwt,
            header,
            body,
            disclosures,
            holder_jwt,
            is_presentation,
        })
    }
}

fn decode_object(segment: &str, part: &'static str) -> Result<Map<String, Value>, Error> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| Error::InvalidJwtPart(part))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::InvalidJwtPart(part))
}
