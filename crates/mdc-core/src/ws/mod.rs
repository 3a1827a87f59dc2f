//! WebSocket session management.

pub mod client;

pub use client::{SessionHandle, WsConfig, WsEvent, WsSession};
