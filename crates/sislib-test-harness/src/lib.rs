//! sislib-test-harness: Test utilities for sislib.
//!
//! This crate provides [`MockHost`] for deterministic testing of the SIS
//! engine without real hardware, and [`RecordingDiagnostics`] for asserting
//! on per-session error records.

pub mod mock_host;
pub mod recorder;

pub use mock_host::MockHost;
pub use recorder::RecordingDiagnostics;
