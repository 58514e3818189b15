//! Request gatekeeping for the adjuster dashboard.
//!
//! Every inbound request flows through [`dispatcher::gatekeep`]:
//!
//! ```text
//! request
//!     -> headers.rs   (CSP nonce, hardening headers, request id; always)
//!     -> rate_limit/  (fixed window, policy picked by path; /api only)
//!     -> routes.rs    (public / protected api / protected page / unguarded)
//!     -> session/     (cookie -> token verify -> identity injection)
//!     -> forward, 302, 401, 429 or 500
//! ```

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod headers;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod tokens;

pub use config::{Environment, GateConfig};
pub use dispatcher::{Gatekeeper, gatekeep};
pub use error::GateError;
