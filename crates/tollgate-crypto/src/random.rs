use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;

/// Bytes in a CSP nonce.
pub const NONCE_LEN: usize = 16;

/// Bytes in an opaque token (session handle, reset/verify token).
pub const TOKEN_LEN: usize = 32;

/// Fill a fixed-size buffer from the thread-local CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// Fresh base64 nonce for a Content-Security-Policy `script-src`.
pub fn generate_nonce() -> String {
    BASE64.encode(random_bytes::<NONCE_LEN>())
}

/// Fresh hex token, safe to put in URLs and cookies as-is.
pub fn generate_token() -> String {
    hex::encode(random_bytes::<TOKEN_LEN>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_decodes_to_sixteen_bytes() {
        let nonce = generate_nonce();
        let raw = BASE64.decode(&nonce).unwrap();
        assert_eq!(raw.len(), NONCE_LEN);
    }

    #[test]
    fn nonces_differ() {
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[test]
    fn token_is_hex() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LEN * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }
}
