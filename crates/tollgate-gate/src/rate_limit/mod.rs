//! Fixed-window rate limiting.
//!
//! # Data Flow
//! ```text
//! request headers
//!     -> policy.rs  (key derivation, accounting mode)
//!     -> store.rs   (atomic admit: reset window, check, charge)
//!     -> limiter.rs (Allow(ticket) / Deny(429))
//! handler status
//!     -> limiter.rs reconcile (refund or charge per accounting mode)
//! ```

pub mod limiter;
pub mod policy;
pub mod store;

pub use limiter::{Decision, Denial, RateLimiter, Ticket};
pub use policy::{Accounting, Adjustment, KeyFn, Outcome, RateLimitConfig, client_ip};
pub use store::{Admission, CounterRecord, CounterStore, MemoryCounterStore, run_sweep_loop};
