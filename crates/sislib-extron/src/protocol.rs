//! Extron SIS line codec.
//!
//! SIS is a line-oriented ASCII protocol. Every command is a single line
//! terminated by a carriage return; every reply is a single line, sometimes
//! wrapped in a pair of double quotes.
//!
//! # Command format
//!
//! ```text
//! <body>\r
//! ```
//!
//! Many commands start with the escape byte (`0x1B`, written `W` in Extron
//! manuals when sent from a web browser). Templates in
//! [`commands`](crate::commands) embed it literally.
//!
//! # Error replies
//!
//! A unit rejects a command with a three character code such as `E13`.
//! Known codes map to the descriptions in [`ERROR_CODES`]; any other three
//! character reply starting with `E` is an error with an unknown code.

use bytes::{BufMut, BytesMut};
use sislib_core::Error;

/// SIS command terminator byte.
pub const TERMINATOR: u8 = b'\r';

/// Escape byte that prefixes most extended SIS commands.
pub const ESC: char = '\x1b';

/// Device error codes and their meaning.
pub const ERROR_CODES: &[(&str, &str)] = &[
    ("E01", "Invalid input number"),
    ("E06", "Invalid input during auto-input switching"),
    ("E10", "Invalid command"),
    ("E11", "Invalid preset number"),
    ("E12", "Invalid output or port number"),
    ("E13", "Invalid value / parameter"),
    ("E14", "Invalid command for this configuration"),
    ("E17", "Invalid command for signal type"),
    ("E18", "System timed out"),
    ("E22", "Busy"),
    ("E24", "Privilege violation"),
    ("E25", "Device not present"),
    ("E26", "Maximum number of connections exceeded"),
    ("E28", "Bad name or file not found"),
    ("E31", "Attempt to break port pass-through when not set"),
    ("E33", "Bad file type for logo"),
    ("E35", "User account does not exist"),
];

const UNKNOWN_CODE: &str = "Unknown error code";

/// Encode a command body into raw bytes ready for transmission.
///
/// # Example
///
/// ```
/// use sislib_extron::protocol::encode_command;
///
/// assert_eq!(encode_command("2I"), b"2I\r");
/// assert_eq!(encode_command("1*3!"), b"1*3!\r");
/// ```
pub fn encode_command(body: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(body.len() + 1);
    buf.put_slice(body.as_bytes());
    buf.put_u8(TERMINATOR);
    buf.to_vec()
}

/// Look up the description for a known device error code.
pub fn error_description(code: &str) -> Option<&'static str> {
    ERROR_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, description)| *description)
}

/// An error code reported by the unit in place of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFault {
    pub code: String,
    pub description: &'static str,
}

impl DeviceFault {
    /// Detect an error reply.
    ///
    /// Returns `None` when the line is an ordinary reply.
    pub fn detect(line: &str) -> Option<DeviceFault> {
        if let Some(description) = error_description(line) {
            return Some(DeviceFault {
                code: line.to_string(),
                description,
            });
        }
        if line.len() == 3 && line.starts_with('E') {
            return Some(DeviceFault {
                code: line.to_string(),
                description: UNKNOWN_CODE,
            });
        }
        None
    }

    pub fn into_error(self) -> Error {
        Error::Device {
            code: self.code,
            description: self.description.to_string(),
        }
    }
}

impl std::fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.description)
    }
}

/// One normalized reply line.
///
/// Produced by the executor for every completed round trip. A reply carrying
/// a [`DeviceFault`] is still a completed round trip: the unit processed the
/// command and refused it, so it is never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    text: String,
    fault: Option<DeviceFault>,
}

impl Reply {
    /// Normalize a raw line read from the host.
    ///
    /// SSH sessions may deliver the echoed command and prompt along with the
    /// reply, so only the last non-empty line is kept. Line terminators are
    /// dropped, the error table is consulted, and one enclosing pair of
    /// quotes is stripped.
    pub fn parse(raw: &str, ssh: bool) -> Reply {
        let line = if ssh { last_non_empty_line(raw) } else { raw };
        let line = line.trim_matches(|c| c == '\r' || c == '\n');
        let fault = DeviceFault::detect(line);
        Reply {
            text: strip_quotes(line).to_string(),
            fault,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fault(&self) -> Option<&DeviceFault> {
        self.fault.as_ref()
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }

    /// The reply text, or the device error it carries.
    pub fn into_text(self) -> sislib_core::Result<String> {
        match self.fault {
            Some(fault) => Err(fault.into_error()),
            None => Ok(self.text),
        }
    }
}

/// Remove one enclosing pair of double quotes.
pub fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
}

/// The last line of `output` that is not blank.
pub fn last_non_empty_line(output: &str) -> &str {
    output
        .split(['\r', '\n'])
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}
