//! Coordination layer for long-running operation: shutdown signalling and
//! OS signal handling.

pub mod shutdown;

pub use shutdown::{install_signal_handlers, Shutdown};
