/// Tollgate Crypto Library
///
/// Per-call randomness for CSP nonces, session handles and one-time tokens,
/// plus the one-way hash used to store tokens server-side. Token signing lives
/// in tollgate-gate on top of jsonwebtoken.

pub mod hash;
pub mod random;

pub use hash::hash_token;
pub use random::{generate_nonce, generate_token};
