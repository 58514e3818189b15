//! Session tokens, their server-side records and the cookie that carries them.

pub mod codec;
pub mod cookie;
pub mod manager;

pub use codec::{IssuedToken, SessionTokenCodec, session_ttl};
pub use cookie::SessionCookie;
pub use manager::{IssuedSession, SessionCheck, SessionManager};
