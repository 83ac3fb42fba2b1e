//! SIS command catalog.
//!
//! Two kinds of endpoints exist:
//!
//! - Device-dependent endpoints ([`Endpoint`]). Their command template
//!   differs per [`DeviceCategory`] and their reply needs decoding.
//! - Public endpoints ([`PUBLIC_ENDPOINTS`]). One template for every unit;
//!   the reply text is returned as is.
//!
//! Templates are stored without the terminator and carry up to three `%s`
//! slots filled left to right from the caller's arguments. A `%` that is not
//! followed by `s` is literal (`%s%` reads video ties on a matrix).

use sislib_core::{DeviceCategory, Error, Method, Result};

use crate::protocol::encode_command;

/// Model description query issued once per session for classification.
pub const MODEL_DESCRIPTION: &str = "2I";

/// Maximum number of positional slots in a template.
pub const MAX_SLOTS: usize = 3;

// ---------------------------------------------------------------
// Device-dependent endpoints
// ---------------------------------------------------------------

/// A device-dependent endpoint of the generic control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    InputStatus,
    VideoRoute,
    AudioAndVideoRoute,
    AudioMute,
    VideoMute,
    VideoSyncMute,
    Volume,
    MatrixMute,
    MatrixVolume,
    Power,
    AudioAndVideoMute,
    OccupancyStatus,
    SetState,
    TriggerState,
    TimedTriggerState,
}

impl Endpoint {
    pub const ALL: [Endpoint; 15] = [
        Endpoint::InputStatus,
        Endpoint::VideoRoute,
        Endpoint::AudioAndVideoRoute,
        Endpoint::AudioMute,
        Endpoint::VideoMute,
        Endpoint::VideoSyncMute,
        Endpoint::Volume,
        Endpoint::MatrixMute,
        Endpoint::MatrixVolume,
        Endpoint::Power,
        Endpoint::AudioAndVideoMute,
        Endpoint::OccupancyStatus,
        Endpoint::SetState,
        Endpoint::TriggerState,
        Endpoint::TimedTriggerState,
    ];

    /// The setting name used by the control API.
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::InputStatus => "inputstatus",
            Endpoint::VideoRoute => "videoroute",
            Endpoint::AudioAndVideoRoute => "audioandvideoroute",
            Endpoint::AudioMute => "audiomute",
            Endpoint::VideoMute => "videomute",
            Endpoint::VideoSyncMute => "videosyncmute",
            Endpoint::Volume => "volume",
            Endpoint::MatrixMute => "matrixmute",
            Endpoint::MatrixVolume => "matrixvolume",
            Endpoint::Power => "power",
            Endpoint::AudioAndVideoMute => "audioandvideomute",
            Endpoint::OccupancyStatus => "occupancystatus",
            Endpoint::SetState => "setstate",
            Endpoint::TriggerState => "triggerstate",
            Endpoint::TimedTriggerState => "timedtriggerstate",
        }
    }

    /// Look up an endpoint by setting name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Endpoint> {
        Endpoint::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(name))
    }

    /// Whether the control API offers this endpoint for `method`.
    pub fn supports(&self, method: Method) -> bool {
        match (self, method) {
            (Endpoint::VideoSyncMute, Method::Get) => false,
            (Endpoint::InputStatus, Method::Set) => false,
            (Endpoint::OccupancyStatus, Method::Set) => false,
            (Endpoint::TriggerState | Endpoint::TimedTriggerState, Method::Get) => false,
            _ => true,
        }
    }

    /// Whether this integration implements the endpoint at all.
    pub fn is_implemented(&self) -> bool {
        !matches!(
            self,
            Endpoint::Power
                | Endpoint::AudioAndVideoMute
                | Endpoint::OccupancyStatus
                | Endpoint::SetState
                | Endpoint::TriggerState
                | Endpoint::TimedTriggerState
        )
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The command template for an endpoint on a device category, if any.
pub fn template(endpoint: Endpoint, method: Method, category: DeviceCategory) -> Option<&'static str> {
    use DeviceCategory::*;
    use Endpoint::*;

    match method {
        Method::Get => match (endpoint, category) {
            (InputStatus, MatrixSwitcher) => Some("0LS"),
            (InputStatus, Scaler) => Some("\x1b0LS"),
            (InputStatus, Switcher | DistributionAmplifier) => Some("\x1bLS"),

            (VideoRoute, MatrixSwitcher) => Some("%s%"),
            (VideoRoute, Scaler) => Some("&"),
            (VideoRoute, Switcher) => Some("!"),

            (AudioAndVideoRoute, Scaler) => Some("!"),

            (AudioMute, MatrixSwitcher) => Some("%s*B"),
            (AudioMute, Scaler) => Some("\x1bD%sGRPM"),
            (AudioMute, Switcher) => Some("\x1bAFMT"),

            (VideoMute, MatrixSwitcher) => Some("\x1bVM"),
            (VideoMute, Scaler | Switcher | DistributionAmplifier) => Some("B"),

            (Volume, Scaler) => Some("\x1bD%sGRPM"),

            (MatrixMute, AudioProcessor) => Some("\x1bM%sAU"),
            (MatrixVolume, AudioProcessor) => Some("\x1bG%sAU"),

            _ => None,
        },
        Method::Set => match (endpoint, category) {
            (VideoRoute, MatrixSwitcher) => Some("%s*%s%"),
            (VideoRoute, Scaler) => Some("%s&"),

            (AudioAndVideoRoute, MatrixSwitcher) => Some("%s*%s!"),
            (AudioAndVideoRoute, Scaler | Switcher) => Some("%s!"),

            (VideoMute, MatrixSwitcher | Scaler | DistributionAmplifier) => Some("%s*%sB"),
            (VideoMute, Switcher) => Some("%sB"),

            (VideoSyncMute, MatrixSwitcher | Scaler | DistributionAmplifier) => Some("%s*2B"),
            (VideoSyncMute, Switcher) => Some("2B"),

            (AudioMute, Scaler) => Some("\x1bD%s*%sGRPM"),
            (AudioMute, Switcher) => Some("\x1b%sAFMT"),
            (AudioMute, DistributionAmplifier) => Some("\x1b%s*%sAFMT"),

            (Volume, Scaler) => Some("\x1bD%s*%sGRPM"),

            (MatrixMute, AudioProcessor) => Some("\x1bM%s*%sAU"),
            (MatrixVolume, AudioProcessor) => Some("\x1bG%s*%sAU"),

            _ => None,
        },
    }
}

/// Resolve the template or fail with [`Error::Unsupported`].
pub fn resolve(endpoint: Endpoint, method: Method, category: DeviceCategory) -> Result<&'static str> {
    template(endpoint, method, category).ok_or_else(|| {
        Error::Unsupported(format!(
            "no {method} command for {endpoint} on {category}"
        ))
    })
}

// ---------------------------------------------------------------
// Public endpoints
// ---------------------------------------------------------------

/// A single-template endpoint valid for every unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicEndpoint {
    pub name: &'static str,
    pub method: Method,
    pub template: &'static str,
}

const fn get(name: &'static str, template: &'static str) -> PublicEndpoint {
    PublicEndpoint {
        name,
        method: Method::Get,
        template,
    }
}

const fn set(name: &'static str, template: &'static str) -> PublicEndpoint {
    PublicEndpoint {
        name,
        method: Method::Set,
        template,
    }
}

pub const PUBLIC_ENDPOINTS: &[PublicEndpoint] = &[
    get("firmwareversion", "Q"),
    get("temperature", "W20STAT"),
    get("partnumber", "N"),
    get("modelname", "I"),
    get("modeldescription", "2I"),
    get("systemstatus", "S"),
    get("systemmemoryusage", "3I"),
    get("videooutputmutes", "\x1bVM"),
    get("viewlockstatus", "X"),
    get("serialnumber", "99I"),
    get("macaddress", "98I"),
    get("ipaddress", "\x1bCI"),
    get("openconnections", "\x1bCC"),
    get("systemprocessorusage", "11I"),
    get("viewpowersavemode", "\x1bPSAV"),
    get("viewglobalmute", "B"),
    get("viewloopoutinput", "\x1bLOUT"),
    get("viewinputname", "\x1b%sNI"),
    get("queryhdcpinputstatus", "\x1bI%sHDCP"),
    get("queryhdcpoutputstatus", "\x1bO%sHDCP"),
    get("viewvideosignalpresence", "\x1b0LS"),
    get("viewallinputconnections", "0LS"),
    get("viewvideoinput", "&"),
    get("viewaudioinput", "$"),
    get("viewcurrentinput", "!"),
    get("viewallvideoties", "\x1b0*1*1VC"),
    get("viewallaudioties", "\x1b0*1*2VC"),
    get("viewmutestatus", "%s*B"),
    get("viewoutputvideomutes", "\x1bVM"),
    set("lockallfrontpanelfunctions", "1X"),
    set("lockadvancedfrontpanelfunctions", "2X"),
    set("unlockallfrontpanelfunctions", "0X"),
    set("globalvideomute", "1*B"),
    set("globalvideoandsyncmute", "2*B"),
    set("globalvideounmute", "0*B"),
    set("setloopoutinput", "\x1b%sLOUT"),
    set("tieaudioandvideoroute", "%s*%s!"),
    set("tievideoroute", "%s*%s%"),
    set("tieaudioroute", "%s*%s$"),
    set("mutevideooutput", "%s*1B"),
    set("mutevideoandsync", "%s*2B"),
    set("unmutevideooutput", "%s*0B"),
];

/// Look up a public endpoint by name (case-insensitive) and method.
pub fn public_endpoint(name: &str, method: Method) -> Option<&'static PublicEndpoint> {
    PUBLIC_ENDPOINTS
        .iter()
        .find(|p| p.method == method && p.name.eq_ignore_ascii_case(name))
}

// ---------------------------------------------------------------
// Template filling
// ---------------------------------------------------------------

/// Number of `%s` slots in a template.
pub fn slot_count(template: &str) -> usize {
    template.matches("%s").count()
}

/// Substitute `args` into the `%s` slots of `template`, left to right.
///
/// Slots beyond the supplied arguments are filled with the empty string and
/// surplus arguments are ignored.
///
/// # Example
///
/// ```
/// use sislib_extron::commands::fill_template;
///
/// assert_eq!(fill_template("%s*%s!", &["3", "2"]), "3*2!");
/// assert_eq!(fill_template("%s%", &["4"]), "4%");
/// assert_eq!(fill_template("2I", &["ignored"]), "2I");
/// ```
pub fn fill_template(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;
    let mut slot = 0;
    while let Some(pos) = rest.find("%s") {
        out.push_str(&rest[..pos]);
        if slot < MAX_SLOTS {
            out.push_str(args.get(slot).copied().unwrap_or(""));
        }
        slot += 1;
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// Fill a template and encode it as a wire line.
pub fn build_command(template: &str, args: &[&str]) -> Vec<u8> {
    encode_command(&fill_template(template, args))
}
