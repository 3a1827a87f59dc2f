//! Typed error definitions for the market data collector.
//!
//! Provides [`MdcError`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate seamlessly with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the market data collector.
#[derive(Debug, Error)]
pub enum MdcError {
    /// Configuration parsing or validation error. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// WebSocket connection, handshake, or communication error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// HTTP transport error (Kraken REST polling).
    #[error("http error: {0}")]
    Http(String),

    /// Market data message parsing error.
    #[error("parse error: {0}")]
    Parse(String),

    /// Error reported by an exchange in a response payload.
    #[error("exchange error: {0}")]
    Exchange(String),
}
