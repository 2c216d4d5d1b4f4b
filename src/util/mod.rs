//! Shared utilities: time sources, common identifiers, tracing setup.

pub mod clock;
pub mod serde;
pub mod telemetry;
pub mod threads;

pub use self::clock::*;
pub use self::serde::*;
pub use self::telemetry::*;
pub use threads::join_with_timeout;
