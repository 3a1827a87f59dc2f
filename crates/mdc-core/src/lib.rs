//! # mdc-core
//!
//! Core crate for the market data collector, providing:
//!
//! - **Types** (`types`) — exchange identifiers, trade events, symbol descriptions
//! - **Configuration** (`config`) — symbol-mapping JSON deserialization
//! - **Error types** (`error`) — domain-specific `MdcError` via thiserror
//! - **WebSocket** (`ws`) — WS session with auto-reconnect and write replay
//! - **Time utilities** (`time_util`) — microsecond timestamps + ISO-8601 parsing
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
