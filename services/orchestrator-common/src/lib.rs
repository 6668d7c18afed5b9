//! Shared primitives used across the order orchestration core.

pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod money;

pub use clock::Clock;
pub use error::{CoreError, CoreResult};
pub use money::Money;
