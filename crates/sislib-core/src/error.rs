//! Error types for sislib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Argument validation, catalog lookups,
//! transport failures, and device-reported errors are all captured here.

/// The reply string handed back to callers when a command could not be
/// completed at the transport level, even after retrying.
pub const UNKNOWN_SENTINEL: &str = "unknown";

/// The error type for all sislib operations.
///
/// The variants fall into two groups. Transport-class failures
/// ([`Transport`](Error::Transport), [`Login`](Error::Login),
/// [`NotConnected`](Error::NotConnected), [`Io`](Error::Io)) mean the device
/// never processed the request and the command cycle may be repeated.
/// Everything else is final for the call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A malformed or out-of-domain argument (bad mix-point token,
    /// non-numeric port, letter outside A-H).
    #[error("invalid argument: {0}")]
    Argument(String),

    /// No command template or decode map exists for the requested
    /// endpoint, device category, model, or port label.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The endpoint is part of the generic control API but is not
    /// implemented for this hardware family.
    #[error("endpoint '{0}' is not implemented")]
    NotImplemented(String),

    /// Writing or reading a line on the host link failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Login negotiation did not reach the command prompt.
    #[error("login failed: {0}")]
    Login(String),

    /// The host has no connection for this session.
    #[error("not connected")]
    NotConnected,

    /// Every attempt of a command cycle failed at the transport level.
    #[error("max retries reached after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The failure observed on the final attempt.
        last: Box<Error>,
    },

    /// The device answered with one of its error codes.
    #[error("device returned error: {code}: {description}")]
    Device {
        /// Raw error code, e.g. `E13`.
        code: String,
        /// Human-readable meaning of the code.
        description: String,
    },

    /// The device reply did not have the shape the endpoint requires.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device answered, but the reply matched neither the success
    /// pattern nor an error pattern.
    #[error("unknown response: {0}")]
    UnexpectedReply(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure happened before the device processed the
    /// request, so repeating the command cycle is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Login(_) | Error::NotConnected | Error::Io(_)
        )
    }

    /// Whether this error is a device-reported error code.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Error::Device { .. })
    }

    /// The string result paired with this error at the dispatch boundary.
    ///
    /// Terminal transport failure is reported as [`UNKNOWN_SENTINEL`];
    /// every other error renders its message.
    pub fn wire_text(&self) -> String {
        match self {
            Error::RetriesExhausted { .. } => UNKNOWN_SENTINEL.to_string(),
            other => other.to_string(),
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_argument() {
        let e = Error::Argument("return A-H expected, got Z".into());
        assert_eq!(e.to_string(), "invalid argument: return A-H expected, got Z");
    }

    #[test]
    fn error_display_device() {
        let e = Error::Device {
            code: "E13".into(),
            description: "Invalid value / parameter".into(),
        };
        assert_eq!(
            e.to_string(),
            "device returned error: E13: Invalid value / parameter"
        );
    }

    #[test]
    fn error_display_unexpected_reply() {
        let e = Error::UnexpectedReply("Qik".into());
        assert_eq!(e.to_string(), "unknown response: Qik");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("DsG20203*-35 expected, got 7".into());
        assert_eq!(e.to_string(), "protocol error: DsG20203*-35 expected, got 7");
    }

    #[test]
    fn error_display_not_implemented() {
        let e = Error::NotImplemented("power".into());
        assert_eq!(e.to_string(), "endpoint 'power' is not implemented");
    }

    #[test]
    fn transport_class_errors_are_retryable() {
        assert!(Error::Transport("write failed".into()).is_retryable());
        assert!(Error::Login("prompt never seen".into()).is_retryable());
        assert!(Error::NotConnected.is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(Error::from(io).is_retryable());
    }

    #[test]
    fn final_errors_are_not_retryable() {
        assert!(!Error::Argument("x".into()).is_retryable());
        assert!(!Error::Unsupported("x".into()).is_retryable());
        assert!(!Error::UnexpectedReply("x".into()).is_retryable());
        assert!(!Error::Protocol("x".into()).is_retryable());
        let device = Error::Device {
            code: "E10".into(),
            description: "Invalid command".into(),
        };
        assert!(!device.is_retryable());
        assert!(device.is_device_error());
    }

    #[test]
    fn exhausted_retries_render_the_sentinel() {
        let e = Error::RetriesExhausted {
            attempts: 2,
            last: Box::new(Error::NotConnected),
        };
        assert_eq!(e.wire_text(), UNKNOWN_SENTINEL);
        assert!(!e.is_retryable());
        assert!(e.to_string().contains("not connected"));
    }

    #[test]
    fn other_errors_render_their_message() {
        let e = Error::UnexpectedReply("Vmt9".into());
        assert_eq!(e.wire_text(), "unknown response: Vmt9");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
