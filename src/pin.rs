//! `pin_subpackage` / `pin_compatible` pins.
//!
//! During evaluation a pin cannot be resolved yet: the pinned sibling may not
//! have been rendered. The built-ins therefore evaluate to a marker string that
//! carries the serialized [`Pin`]; the renderer replaces whole-entry markers in
//! requirement lists once the sibling's version and build string are known.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

const SUBPACKAGE_MARKER: &str = "__pin_subpackage ";
const COMPATIBLE_MARKER: &str = "__pin_compatible ";

/// Prefix shared by every marker, used to spot markers that leaked outside
/// requirement lists.
pub const MARKER_PREFIX: &str = "__pin_";

pub const DEFAULT_MIN_PIN: &str = "x.x.x.x.x.x";
pub const DEFAULT_MAX_PIN: &str = "x";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    Subpackage,
    Compatible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinArgs {
    /// `None` drops the lower bound.
    pub min_pin: Option<String>,
    /// `None` drops the upper bound.
    pub max_pin: Option<String>,
    pub lower_bound: Option<String>,
    pub upper_bound: Option<String>,
    pub exact: bool,
}

impl Default for PinArgs {
    fn default() -> Self {
        Self {
            min_pin: Some(DEFAULT_MIN_PIN.to_string()),
            max_pin: Some(DEFAULT_MAX_PIN.to_string()),
            lower_bound: None,
            upper_bound: None,
            exact: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub name: String,
    #[serde(flatten)]
    pub args: PinArgs,
}

impl Pin {
    pub fn to_marker(&self, kind: PinKind) -> String {
        let prefix = match kind {
            PinKind::Subpackage => SUBPACKAGE_MARKER,
            PinKind::Compatible => COMPATIBLE_MARKER,
        };
        // a struct of strings and bools always serializes
        format!("{prefix}{}", serde_json::to_string(self).unwrap_or_default())
    }

    /// Parses a requirement entry. Returns `None` when it is not a marker.
    pub fn from_marker(entry: &str) -> Option<Result<(PinKind, Pin)>> {
        let (kind, json) = if let Some(json) = entry.strip_prefix(SUBPACKAGE_MARKER) {
            (PinKind::Subpackage, json)
        } else if let Some(json) = entry.strip_prefix(COMPATIBLE_MARKER) {
            (PinKind::Compatible, json)
        } else {
            return None;
        };
        Some(
            serde_json::from_str(json)
                .map(|pin| (kind, pin))
                .map_err(|e| Error::evaluation(format!("corrupt pin marker: {e}"))),
        )
    }

    /// Renders the dependency spec for a resolved pin.
    ///
    /// Exact pins need the pinned build string and render as
    /// `name-version-build`; range pins render as `name >=lower,<upper`.
    pub fn apply(&self, version: &str, build_string: Option<&str>) -> Result<String> {
        let name = &self.name;
        if self.args.exact {
            return Ok(match build_string {
                Some(build) => format!("{name}-{version}-{build}"),
                None => format!("{name} =={version}"),
            });
        }

        let lower = match (&self.args.lower_bound, &self.args.min_pin) {
            (Some(bound), _) => Some(bound.clone()),
            (None, Some(pattern)) => Some(truncate(version, pin_width(pattern)?)),
            (None, None) => None,
        };
        let upper = match (&self.args.upper_bound, &self.args.max_pin) {
            (Some(bound), _) => Some(bound.clone()),
            (None, Some(pattern)) => Some(bump(version, pin_width(pattern)?)?),
            (None, None) => None,
        };

        Ok(match (lower, upper) {
            (Some(lower), Some(upper)) => format!("{name} >={lower},<{upper}"),
            (Some(lower), None) => format!("{name} >={lower}"),
            (None, Some(upper)) => format!("{name} <{upper}"),
            (None, None) => name.clone(),
        })
    }
}

/// Number of segments in a pin pattern such as `x.x`.
fn pin_width(pattern: &str) -> Result<usize> {
    let segments: Vec<&str> = pattern.split('.').collect();
    if segments.iter().any(|segment| *segment != "x") {
        return Err(Error::evaluation(format!(
            "invalid pin pattern '{pattern}' (expected something like 'x.x')"
        )));
    }
    Ok(segments.len())
}

fn truncate(version: &str, width: usize) -> String {
    version.split('.').take(width).collect::<Vec<_>>().join(".")
}

/// Upper bound: keep `width` segments, increment the last and append `.0a0`.
fn bump(version: &str, width: usize) -> Result<String> {
    let mut segments: Vec<String> =
        version.split('.').take(width).map(str::to_string).collect();
    let last = segments
        .last_mut()
        .ok_or_else(|| Error::evaluation(format!("cannot pin empty version '{version}'")))?;
    let digits: String = last.chars().take_while(|c| c.is_ascii_digit()).collect();
    let number: u64 = digits.parse().map_err(|_| {
        Error::evaluation(format!("cannot compute an upper bound for version '{version}'"))
    })?;
    let bumped = number.checked_add(1).ok_or_else(|| {
        Error::evaluation(format!("version segment '{digits}' in '{version}' is too large to bump"))
    })?;
    *last = bumped.to_string();
    Ok(format!("{}.0a0", segments.join(".")))
}
