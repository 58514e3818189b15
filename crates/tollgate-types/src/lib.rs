pub mod api;
pub mod models;

pub use models::{OneTimeToken, Role, SessionClaims, SessionRecord, TokenKind};
