//! Shared config attach: provisional map, readiness gate, relocation
//!
//! ```text
//! ProvisionalConfig::attach  ──►  wait_ready  ──►  reattach  ──►  SharedConfig
//!   (read-only, OS address)       (spin on magic)   (read-write, primary's address)
//! ```

pub mod ready;
pub mod shared_config;

pub use ready::SpinWait;
pub use shared_config::{ProvisionalConfig, SharedConfig};
