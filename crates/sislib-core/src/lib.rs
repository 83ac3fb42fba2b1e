//! sislib-core: Core traits, types, and error definitions for sislib.
//!
//! This crate defines the abstractions shared by the SIS engine, the host
//! link implementations, and the test harness.
//!
//! # Key types
//!
//! - [`HostLink`] -- line-level access to a host-owned connection
//! - [`Diagnostics`] -- per-session error record
//! - [`SessionKey`] -- identifies one logical control connection
//! - [`DeviceCategory`] -- hardware class that selects commands and decoders
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;
pub mod types;

pub use error::{Error, Result, UNKNOWN_SENTINEL};
pub use transport::{Diagnostics, HostLink, TracingDiagnostics};
pub use types::{DeviceCategory, Method, ParseMethodError, ProtocolKind, SessionKey};
