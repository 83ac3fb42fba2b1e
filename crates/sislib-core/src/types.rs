//! Core types used throughout sislib.

use std::fmt;
use std::str::FromStr;

/// Coarse hardware class of a connected unit.
///
/// The category selects which command templates and decode rules apply.
/// It is determined once per session from the unit's model description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCategory {
    /// DSP with a static mix-point matrix (DMP family).
    AudioProcessor,
    /// Video/audio matrix switcher (CrossPoint, XTP).
    MatrixSwitcher,
    /// Scaling presentation switcher (IN 160x, IN 180x).
    Scaler,
    /// Non-scaling switcher.
    Switcher,
    /// Distribution amplifier.
    DistributionAmplifier,
    /// Presentation system or collaboration switcher (ShareLink, UCS).
    Collaboration,
    /// Streaming media processor (SMP).
    StreamingMedia,
    /// Switched AC power controller.
    PowerController,
    /// No classification rule matched.
    Unknown,
}

impl DeviceCategory {
    /// Human-readable category name.
    pub fn label(&self) -> &'static str {
        match self {
            DeviceCategory::AudioProcessor => "Audio Processor",
            DeviceCategory::MatrixSwitcher => "Matrix Switcher",
            DeviceCategory::Scaler => "Scaler",
            DeviceCategory::Switcher => "Switcher",
            DeviceCategory::DistributionAmplifier => "Distribution Amplifier",
            DeviceCategory::Collaboration => "Collaboration System",
            DeviceCategory::StreamingMedia => "Streaming Media",
            DeviceCategory::PowerController => "Power Controller",
            DeviceCategory::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Wire protocol the host uses for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolKind {
    #[default]
    Telnet,
    Ssh,
    Serial,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Telnet => write!(f, "telnet"),
            ProtocolKind::Ssh => write!(f, "ssh"),
            ProtocolKind::Serial => write!(f, "serial"),
        }
    }
}

/// Direction of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Set,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Set => write!(f, "SET"),
        }
    }
}

/// Error returned when parsing a [`Method`] from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMethodError(String);

impl fmt::Display for ParseMethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown method: '{}'", self.0)
    }
}

impl std::error::Error for ParseMethodError {}

impl FromStr for Method {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "SET" | "PUT" => Ok(Method::Set),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

/// Stable identifier for one logical control connection.
///
/// The textual form is `[user[:password]@]host[:port]`, the same string the
/// host uses to find its socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        SessionKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The login password carried in the key.
    ///
    /// Present only when the key has exactly one `@` and the credential part
    /// before it has exactly one `:`. Units without a password expect an
    /// empty string.
    pub fn password(&self) -> &str {
        let Some((credentials, _)) = self.split_at_credentials() else {
            return "";
        };
        if credentials.matches(':').count() != 1 {
            return "";
        }
        credentials.split_once(':').map_or("", |(_, pw)| pw)
    }

    /// The `host[:port]` part of the key.
    pub fn address(&self) -> &str {
        match self.split_at_credentials() {
            Some((_, address)) => address,
            None => &self.0,
        }
    }

    fn split_at_credentials(&self) -> Option<(&str, &str)> {
        if self.0.matches('@').count() != 1 {
            return None;
        }
        self.0.split_once('@')
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        SessionKey::new(s)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        SessionKey(s)
    }
}
