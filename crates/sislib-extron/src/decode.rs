//! Reply decoders.
//!
//! Units report state in compact, model-specific strings. The functions in
//! this module turn a normalized reply (see [`Reply`]) into a typed value.
//! They never perform I/O and never produce the retry sentinel.
//!
//! # Status string shapes
//!
//! ```text
//! matrix   inputs  "10100000"          one flag per input
//! scaler   inputs  "1*0*1*0"           `*` between inputs
//! DA       inputs  "1*0 1 0 0"         single input, then output flags
//! switcher inputs  "1 0 1 0*1"         input flags, then `*` and the output
//! mutes            "0 0 2 0 0 0"       0 off, 1 video mute, 2 sync mute
//! ```

use sislib_core::{DeviceCategory, Error, Result};

use crate::models::{self, LOOP_OUT, LOOP_THROUGH};
use crate::protocol::Reply;

/// Decode an on/off status flag (`0`/`1`).
pub fn status_flag(c: char) -> Result<bool> {
    match c {
        '1' => Ok(true),
        '0' => Ok(false),
        other => Err(Error::Protocol(format!("status flag 0 or 1 expected, got '{other}'"))),
    }
}

/// Decode a mute flag. `2` is a sync mute and counts as muted.
pub fn mute_flag(c: char) -> Result<bool> {
    match c {
        '0' => Ok(false),
        '1' | '2' => Ok(true),
        other => Err(Error::Protocol(format!("mute flag 0, 1 or 2 expected, got '{other}'"))),
    }
}

fn char_at(s: &str, index: usize) -> Result<char> {
    s.chars()
        .nth(index)
        .ok_or_else(|| Error::Protocol(format!("no position {index} in reply '{s}'")))
}

/// Render a decoded flag for the string contract.
pub fn bool_text(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

// ---------------------------------------------------------------
// Input status
// ---------------------------------------------------------------

/// Decode whether a signal is present on `input`.
///
/// `model` selects a labelled port map when one exists; otherwise `input`
/// is a 1-based position in the flag string.
pub fn input_status(reply: &str, input: &str, model: Option<&str>) -> Result<bool> {
    let resp: String = reply.chars().filter(|c| *c != '"' && *c != '\r').collect();
    let stars = resp.matches('*').count();
    let bytes = resp.as_bytes();

    if stars == 1 && bytes.len() >= 2 && bytes[1] == b'*' && matches!(bytes[0], b'0' | b'1') {
        return status_flag(bytes[0] as char);
    }

    let mut flags = resp.clone();
    if stars == 1 {
        match resp.find('*') {
            Some(pos) if pos + 2 == resp.len() => flags.truncate(pos),
            _ => {
                return Err(Error::Protocol(format!(
                    "invalid switcher input status '{resp}'"
                )));
            }
        }
    }
    let flags: String = flags.chars().filter(|c| *c != '*' && *c != ' ').collect();

    if let Some(map) = model.and_then(models::io_map) {
        let index = map.input_index(input).ok_or_else(|| {
            Error::Unsupported(format!("no input '{input}' on {}", map.name))
        })?;
        return status_flag(char_at(&flags, index)?);
    }

    let n: usize = input
        .trim()
        .parse()
        .map_err(|_| Error::Argument(format!("invalid input number '{input}'")))?;
    if n < 1 || n > flags.chars().count() {
        return Err(Error::Argument(format!("input number out of range: {input}")));
    }
    status_flag(char_at(&flags, n - 1)?)
}

// ---------------------------------------------------------------
// Mute status
// ---------------------------------------------------------------

/// Strip the `GrpmD<group>*` echo a scaler puts in front of group values.
pub fn group_value(reply: &str) -> &str {
    match reply.strip_prefix("GrpmD") {
        Some(rest) => rest.split_once('*').map_or(rest, |(_, value)| value),
        None => reply,
    }
}

/// Decode the mute state of `output` from a video or audio mute reply.
pub fn mute_status(
    reply: &str,
    output: &str,
    category: DeviceCategory,
    model: Option<&str>,
) -> Result<bool> {
    let resp: String = reply.chars().filter(|c| *c != ' ' && *c != '"').collect();
    let len = resp.chars().count();

    if len == 1 {
        return mute_flag(char_at(&resp, 0)?);
    }

    if output == LOOP_OUT {
        if len == 3 {
            return mute_flag(char_at(&resp, 2)?);
        }
        tracing::warn!(reply = %resp, "loop-out requested on a unit without one");
    }

    if category == DeviceCategory::DistributionAmplifier {
        let has_loop_through = len % 2 == 1;
        if output == LOOP_THROUGH {
            if !has_loop_through {
                return Err(Error::Unsupported(format!(
                    "no loop-through on this unit: '{resp}'"
                )));
            }
            return mute_flag(char_at(&resp, 0)?);
        }
        let outputs: String = resp.chars().skip(usize::from(has_loop_through)).collect();
        let n: usize = output
            .trim()
            .parse()
            .map_err(|_| Error::Argument(format!("invalid output number '{output}'")))?;
        if n < 1 {
            return Err(Error::Argument(format!("output number out of range: {output}")));
        }
        return mute_flag(char_at(&outputs, n - 1).map_err(|_| {
            Error::Argument(format!("output number out of range: {output}"))
        })?);
    }

    let map = model.and_then(models::io_map).ok_or_else(|| {
        Error::Unsupported(format!("no output map for model '{}'", model.unwrap_or("")))
    })?;
    let index = map
        .output_index(output)
        .ok_or_else(|| Error::Unsupported(format!("no output '{output}' on {}", map.name)))?;
    mute_flag(char_at(&resp, index)?)
}

// ---------------------------------------------------------------
// Routes
// ---------------------------------------------------------------

/// Normalize a route reply. Some non-matrix units pad the input to two
/// digits (`02`).
pub fn route(reply: &str) -> String {
    let bytes = reply.as_bytes();
    if bytes.len() == 2 && bytes[0] == b'0' {
        reply[1..].to_string()
    } else {
        reply.to_string()
    }
}

// ---------------------------------------------------------------
// DMP mix points
// ---------------------------------------------------------------

/// Status prefix of a mix-point mute reply.
pub const MUTE_PREFIX: &str = "DsM";
/// Status prefix of a mix-point gain reply.
pub const GAIN_PREFIX: &str = "DsG";

/// Extract the value of a mix-point status reply.
///
/// Accepts `<prefix><address>*<value>` and, from units in verbose mode 0,
/// the bare value. Anything else is a protocol error carrying the reply.
pub fn matrix_value<'a>(reply: &'a str, prefix: &str, address: i64) -> Result<&'a str> {
    let expected = format!("{prefix}{address}*");
    if let Some(value) = reply.strip_prefix(expected.as_str()) {
        return Ok(value);
    }
    let bare = reply.strip_prefix('-').unwrap_or(reply);
    if !bare.is_empty() && bare.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(reply);
    }
    Err(Error::Protocol(reply.to_string()))
}

pub fn matrix_mute(reply: &str, address: i64) -> Result<bool> {
    match matrix_value(reply, MUTE_PREFIX, address)? {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(Error::Protocol(reply.to_string())),
    }
}

/// Gain of a mix point as percent.
pub fn matrix_volume(reply: &str, address: i64) -> Result<i32> {
    let value = matrix_value(reply, GAIN_PREFIX, address)?;
    crate::volume::device_to_percent(value)
}

// ---------------------------------------------------------------
// Set confirmation
// ---------------------------------------------------------------

/// Check the echo of a set command.
///
/// A device error fails the operation; a reply `accepted` rejects is an
/// unexpected reply.
pub fn confirm(reply: Reply, accepted: impl FnOnce(&str) -> bool) -> Result<()> {
    let text = reply.into_text()?;
    if accepted(&text) {
        Ok(())
    } else {
        Err(Error::UnexpectedReply(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Input status
    // ---------------------------------------------------------------

    #[test]
    fn matrix_direct_index() {
        assert!(!input_status("1010", "2", None).unwrap());
        assert!(input_status("1010", "3", None).unwrap());
    }

    #[test]
    fn scaler_star_separated() {
        assert!(input_status("0*1*0*0", "2", None).unwrap());
        assert!(!input_status("\"0*1*0*0\"", "4", None).unwrap());
    }

    #[test]
    fn distribution_amp_single_input() {
        assert!(input_status("1*0 1 0 0", "1", None).unwrap());
        assert!(!input_status("0*1 1 1 1", "7", None).unwrap());
    }

    #[test]
    fn switcher_trailing_output() {
        assert!(input_status("1 0 1 0*1", "3", None).unwrap());
        assert!(!input_status("1 0 1 0*1", "4", None).unwrap());
    }

    #[test]
    fn single_star_elsewhere_is_rejected() {
        let err = input_status("10*10", "1", None).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn model_map_applies() {
        assert!(!input_status("00000000001", "10", Some("DTP CrossPoint 108")).unwrap());
        assert!(input_status("0000000001", "10", Some("DTPCP108")).unwrap());
    }

    #[test]
    fn unmapped_label_is_unsupported() {
        let err = input_status("10101010", "3A", Some("DTPCP84")).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn direct_path_argument_errors() {
        assert!(matches!(input_status("1010", "x", None), Err(Error::Argument(_))));
        assert!(matches!(input_status("1010", "5", None), Err(Error::Argument(_))));
        assert!(matches!(input_status("1010", "0", None), Err(Error::Argument(_))));
    }

    #[test]
    fn bad_flag_is_protocol_error() {
        assert!(matches!(input_status("1x10", "2", None), Err(Error::Protocol(_))));
    }

    // ---------------------------------------------------------------
    // Mute status
    // ---------------------------------------------------------------

    #[test]
    fn single_char_mutes() {
        let c = DeviceCategory::Scaler;
        assert!(!mute_status("0", "1", c, None).unwrap());
        assert!(mute_status("1", "1", c, None).unwrap());
        assert!(mute_status("2", "1", c, None).unwrap());
        assert!(mute_status("3", "1", c, None).is_err());
    }

    #[test]
    fn crosspoint_labelled_outputs() {
        let c = DeviceCategory::MatrixSwitcher;
        let m = Some("DTP CrossPoint 84");
        assert!(mute_status("0 0 0 2 0 0", "3B", c, m).unwrap());
        assert!(!mute_status("0 0 0 2 0 0", "3A", c, m).unwrap());
        assert!(mute_status("0 0 2 0 0 0", "3A", c, m).unwrap());
    }

    #[test]
    fn loop_out_on_in1808() {
        let c = DeviceCategory::Scaler;
        assert!(mute_status("0 0 1", LOOP_OUT, c, Some("IN1808")).unwrap());
        assert!(mute_status("0 1 0", "1B", c, Some("IN1808")).unwrap());
    }

    #[test]
    fn loop_out_without_loop_out_falls_through() {
        let err = mute_status("0 0 0 0", LOOP_OUT, DeviceCategory::Scaler, Some("IN1808"))
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn da_with_loop_through() {
        let c = DeviceCategory::DistributionAmplifier;
        assert!(mute_status("1 0 0 0 0", LOOP_THROUGH, c, None).unwrap());
        assert!(!mute_status("1 0 0 0 0", "1", c, None).unwrap());
        assert!(mute_status("0 0 0 2 0", "3", c, None).unwrap());
    }

    #[test]
    fn da_without_loop_through() {
        let c = DeviceCategory::DistributionAmplifier;
        assert!(mute_status("0 2 0 0", "2", c, None).unwrap());
        let err = mute_status("0 2 0 0", LOOP_THROUGH, c, None).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn da_output_out_of_range() {
        let c = DeviceCategory::DistributionAmplifier;
        assert!(matches!(mute_status("0 0", "3", c, None), Err(Error::Argument(_))));
        assert!(matches!(mute_status("0 0", "x", c, None), Err(Error::Argument(_))));
    }

    #[test]
    fn unknown_model_is_unsupported() {
        let err = mute_status("0 0 0", "2", DeviceCategory::MatrixSwitcher, Some("XTP 1600"))
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn group_prefix_stripped() {
        assert_eq!(group_value("GrpmD2*1"), "1");
        assert_eq!(group_value("GrpmD1*-350"), "-350");
        assert_eq!(group_value("-350"), "-350");
    }

    // ---------------------------------------------------------------
    // Routes and mix points
    // ---------------------------------------------------------------

    #[test]
    fn route_strips_pad() {
        assert_eq!(route("02"), "2");
        assert_eq!(route("10"), "10");
        assert_eq!(route("3"), "3");
    }

    #[test]
    fn matrix_prefixed_and_bare() {
        assert!(matrix_mute("DsM20203*1", 20203).unwrap());
        assert!(!matrix_mute("0", 20203).unwrap());
        assert_eq!(matrix_value("DsG20203*-35", GAIN_PREFIX, 20203).unwrap(), "-35");
        assert_eq!(matrix_volume("120", 20203).unwrap(), 100);
    }

    #[test]
    fn matrix_wrong_address_is_protocol_error() {
        let err = matrix_mute("DsM20204*1", 20203).unwrap_err();
        match err {
            Error::Protocol(reply) => assert_eq!(reply, "DsM20204*1"),
            other => panic!("expected Protocol, got {other:?}"),
        }
        assert!(matches!(matrix_mute("5", 20203), Err(Error::Protocol(_))));
    }

    // ---------------------------------------------------------------
    // Set confirmation
    // ---------------------------------------------------------------

    #[test]
    fn confirm_accepts_matching_echo() {
        let reply = Reply::parse("Out4 In6 Vid", false);
        assert!(confirm(reply, |t| t.contains("In") && t.contains('6')).is_ok());
    }

    #[test]
    fn confirm_device_error() {
        let reply = Reply::parse("E01", false);
        let err = confirm(reply, |_| true).unwrap_err();
        assert!(err.is_device_error());
    }

    #[test]
    fn confirm_unexpected_echo() {
        let reply = Reply::parse("Qik", false);
        let err = confirm(reply, |t| t.contains("Vmt")).unwrap_err();
        assert_eq!(err.to_string(), "unknown response: Qik");
    }
}
