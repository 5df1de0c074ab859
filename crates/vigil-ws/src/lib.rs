//! # vigil-ws
//!
//! WebSocket transport for the registry mirror.
//!
//! - [`protocol`]: JSON command, result and event frames
//! - [`connection`]: [`WsConnection`], a reconnecting session behind the
//!   `vigil_mirror::Connection` trait, and its factory
//! - [`backoff`]: reconnect delay schedule

#![deny(unsafe_code)]

pub mod backoff;
pub mod connection;
pub mod error;
pub mod protocol;

pub use backoff::Backoff;
pub use connection::{WsConfig, WsConnection, WsFactory};
pub use error::WsError;
