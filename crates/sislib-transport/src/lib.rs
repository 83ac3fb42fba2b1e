//! Host link implementations for sislib.
//!
//! This crate provides concrete implementations of the
//! [`HostLink`](sislib_core::HostLink) trait from `sislib-core`:
//!
//! - [`TcpHost`]: telnet over TCP, one lazily opened connection per session
//!
//! SSH and serial hosts are supplied by the embedding process.

pub mod tcp;

pub use tcp::{DEFAULT_PORT, TcpHost};
