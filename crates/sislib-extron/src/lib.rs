//! Extron SIS protocol engine for sislib.
//!
//! This crate translates generic control requests (endpoint, method, session,
//! up to three string arguments) into Extron Simple Instruction Set commands
//! and decodes the replies. It provides:
//!
//! - **Protocol codec** ([`protocol`]) -- CR-terminated command lines, reply
//!   normalization, and the device error-code table.
//! - **Command catalog** ([`commands`]) -- per-category command templates for
//!   device-dependent endpoints and the public single-template endpoints.
//! - **Mix points** ([`mixpoint`]) -- DMP routing-table addressing.
//! - **Volume** ([`volume`]) -- logarithmic percent to tenths-of-dB mapping.
//! - **Models** ([`models`]) -- device classification, banner parsing, and
//!   model-specific port maps.
//! - **Decoders** ([`decode`]) -- typed values from status replies.
//! - **Engine** ([`engine`], [`dispatch`]) -- per-session serialization,
//!   login, retry, classification caching, keepalive, and request dispatch.
//! - **Builder** ([`builder`]) -- fluent construction with defaults.
//!
//! # Example
//!
//! ```
//! use sislib_extron::commands::{Endpoint, fill_template, resolve};
//! use sislib_extron::mixpoint::mix_point_address;
//! use sislib_core::{DeviceCategory, Method};
//!
//! let template = resolve(Endpoint::VideoRoute, Method::Set, DeviceCategory::MatrixSwitcher).unwrap();
//! assert_eq!(fill_template(template, &["3", "1"]), "3*1%");
//!
//! assert_eq!(mix_point_address("MicToOut3", "4").unwrap(), 20203);
//! ```

pub mod builder;
pub mod commands;
pub mod decode;
pub mod dispatch;
pub mod engine;
pub mod login;
pub mod mixpoint;
pub mod models;
pub mod protocol;
pub mod session;
pub mod volume;

pub use builder::{EngineBuilder, EngineConfig};
pub use commands::{Endpoint, PublicEndpoint};
pub use engine::Engine;
pub use protocol::{DeviceFault, Reply};
pub use session::{Classification, LinkState};
