//! Relay service library crate.
//!
//! # Purpose
//! Exposes relay subsystems (accounts client, config, connection handling,
//! action dispatch) for use by the relay binary and integration tests.
pub mod accounts;
pub mod config;
pub mod conn;
pub mod dispatch;
