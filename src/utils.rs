use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use rand::{CryptoRng, RngCore};

pub const fn is_url_safe_base64_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_')
}

/// Checks that `segment` is a non-empty url-safe base64 string without
/// padding.
pub fn is_base64url_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(is_url_safe_base64_char)
}

/// Checks that `jwt` is made of exactly three base64url segments separated by
/// dots.
pub fn is_compact_jwt(jwt: &str) -> bool {
    let mut parts = jwt.split('.');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(h), Some(b), Some(s), None)
            if is_base64url_segment(h) && is_base64url_segment(b) && is_base64url_segment(s)
    )
}

/// Draws `N` bytes from `rng` and encodes them as url-safe base64.
pub fn random_base64url<const N: usize>(rng: &mut (impl CryptoRng + RngCore)) -> String {
    let mut bytes = [0u8; N];
    rng.fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}
