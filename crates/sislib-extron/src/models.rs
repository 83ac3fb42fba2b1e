//! Device classification and per-model port maps.
//!
//! The category comes from the unit's model description (`2I`). The exact
//! model name comes from the login banner and selects the port-label maps
//! used to decode concatenated status replies.

use sislib_core::{DeviceCategory, Error, Result};

/// Classify a model description reply.
///
/// Rules are checked in order on the lowercased text; the first match wins.
///
/// ```
/// use sislib_core::DeviceCategory;
/// use sislib_extron::models::classify;
///
/// assert_eq!(classify("DMP 128 Plus C AT"), DeviceCategory::AudioProcessor);
/// assert_eq!(classify("Matrix Switcher"), DeviceCategory::MatrixSwitcher);
/// ```
pub fn classify(description: &str) -> DeviceCategory {
    let d = description.trim().to_lowercase();
    let has = |s: &str| d.contains(s);

    if has("dmp") || has("digital audio") {
        DeviceCategory::AudioProcessor
    } else if has("presentation system") {
        DeviceCategory::Collaboration
    } else if (has("matrix") && !has("audio")) || has("xtp") {
        DeviceCategory::MatrixSwitcher
    } else if has("scaling presentation switcher")
        || has("seamless presentation switcher")
        || has("seamless scaling switcher")
    {
        DeviceCategory::Scaler
    } else if d == "streaming media processor" {
        DeviceCategory::StreamingMedia
    } else if d == "collaboration switcher" {
        DeviceCategory::Collaboration
    } else if has("switcher") && !has("scaling") && !has("matrix") && !has("scaler") {
        DeviceCategory::Switcher
    } else if has("distribution amplifier") {
        DeviceCategory::DistributionAmplifier
    } else if has("110v ac") {
        DeviceCategory::PowerController
    } else {
        DeviceCategory::Unknown
    }
}

/// Parse the model name from a login banner line.
///
/// A banner has exactly four commas, e.g.
/// `(c) Copyright 2020, Extron Electronics, DTP CrossPoint 84, V1.04, 60-1234-01`;
/// the model is the trimmed third field.
pub fn parse_banner(line: &str) -> Option<String> {
    if line.matches(',').count() != 4 {
        return None;
    }
    line.split(',').nth(2).map(|m| m.trim().to_string())
}

// ---------------------------------------------------------------
// Port maps
// ---------------------------------------------------------------

/// Output label that addresses the loop-out of an IN 180x scaler.
pub const LOOP_OUT: &str = "LoopOut";
/// Output label that addresses the local loop-through of a DA.
pub const LOOP_THROUGH: &str = "LoopThrough";

/// Port label to reply-offset map for one hardware model.
#[derive(Debug)]
pub struct IoMap {
    pub name: &'static str,
    inputs: &'static [(&'static str, usize)],
    outputs: &'static [(&'static str, usize)],
}

impl IoMap {
    pub fn input_index(&self, label: &str) -> Option<usize> {
        lookup(self.inputs, label)
    }

    pub fn output_index(&self, label: &str) -> Option<usize> {
        lookup(self.outputs, label)
    }
}

fn lookup(map: &[(&str, usize)], label: &str) -> Option<usize> {
    map.iter().find(|(l, _)| *l == label).map(|(_, i)| *i)
}

const EIGHT_INPUTS: &[(&str, usize)] = &[
    ("1", 0),
    ("2", 1),
    ("3", 2),
    ("4", 3),
    ("5", 4),
    ("6", 5),
    ("7", 6),
    ("8", 7),
];

pub static CROSSPOINT_84: IoMap = IoMap {
    name: "DTP CrossPoint 84",
    inputs: EIGHT_INPUTS,
    outputs: &[("1", 0), ("2", 1), ("3A", 2), ("3B", 3), ("4A", 4), ("4B", 5)],
};

pub static CROSSPOINT_86: IoMap = IoMap {
    name: "DTP CrossPoint 86",
    inputs: EIGHT_INPUTS,
    outputs: &[
        ("1", 0),
        ("2", 1),
        ("3A", 2),
        ("3B", 3),
        ("4A", 4),
        ("4B", 5),
        ("5", 6),
        ("6", 7),
    ],
};

pub static CROSSPOINT_108: IoMap = IoMap {
    name: "DTP CrossPoint 108",
    inputs: &[
        ("1", 0),
        ("2", 1),
        ("3", 2),
        ("4", 3),
        ("5", 4),
        ("6", 5),
        ("7", 6),
        ("8", 7),
        ("9", 8),
        ("10", 9),
    ],
    outputs: &[
        ("1", 0),
        ("2", 1),
        ("3", 2),
        ("4", 3),
        ("5A", 4),
        ("5B", 5),
        ("6A", 6),
        ("6B", 7),
        ("7", 8),
        ("8", 9),
    ],
};

/// IN 180x scalers. `LoopOut` is decoded separately.
pub static IN_180X: IoMap = IoMap {
    name: "IN 180x",
    inputs: EIGHT_INPUTS,
    outputs: &[("1A", 0), ("1B", 1)],
};

fn normalize_model(model: &str) -> String {
    model
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Select the port map for a model name.
///
/// Matching ignores whitespace and case and reads `CrossPoint` as `CP`, so
/// the banner text `DTP CrossPoint 84` selects the `DTPCP84` map. Models
/// without labelled ports return `None` and use direct 1-based indexing.
pub fn io_map(model: &str) -> Option<&'static IoMap> {
    let m = normalize_model(model).replace("CROSSPOINT", "CP");
    if m.contains("DTPCP108") {
        Some(&CROSSPOINT_108)
    } else if m.contains("DTPCP86") {
        Some(&CROSSPOINT_86)
    } else if m.contains("DTPCP84") {
        Some(&CROSSPOINT_84)
    } else if m.contains("IN18") {
        Some(&IN_180X)
    } else {
        None
    }
}

// ---------------------------------------------------------------
// Audio groups (IN 160x)
// ---------------------------------------------------------------

const GROUP_VOLUMES: &[(&str, &str)] = &[
    ("programvolume", "1"),
    ("micvolume", "3"),
    ("variablevolume", "8"),
];

const GROUP_MUTES: &[(&str, &str)] = &[("programmute", "2"), ("micmute", "4"), ("outputmute", "7")];

/// Whether the model is an IN 160x scaler.
pub fn is_in160x(model: &str) -> bool {
    let m = normalize_model(model);
    m.contains("160") && m.contains("IN")
}

/// Group number for a named volume on an IN 160x.
pub fn volume_group(model: &str, name: &str) -> Result<&'static str> {
    if !is_in160x(model) {
        return Err(Error::Unsupported(format!(
            "model {model} does not support group volume"
        )));
    }
    GROUP_VOLUMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, g)| *g)
        .ok_or_else(|| Error::Unsupported(format!("no volume group '{name}' on {model}")))
}

/// Group number for a named scaler mute.
pub fn mute_group(name: &str) -> Result<&'static str> {
    GROUP_MUTES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, g)| *g)
        .ok_or_else(|| Error::Unsupported(format!("no mute group '{name}'")))
}
