//! Variant configuration and build matrix expansion.
//!
//! A variant configuration maps keys to candidate values:
//!
//! ```yaml
//! python:
//!   - "3.10"
//!   - "3.11"
//! numpy:
//!   - "1.23"
//!   - "1.26"
//! zip_keys:
//!   - [python, numpy]
//! pin_run_as_build:
//!   python:
//!     max_pin: x.x
//! ```
//!
//! Keys in a `zip_keys` group advance together, so the example yields two
//! combinations instead of four.

use crate::error::{Error, Result};
use crate::pin::PinArgs;
use crate::value::Value;
use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};

/// One concrete assignment of variant keys, in axis declaration order.
pub type Combination = IndexMap<String, Value>;

const ZIP_KEYS: &str = "zip_keys";
const PIN_RUN_AS_BUILD: &str = "pin_run_as_build";
/// Owned by the render context, never variant axes.
const PLATFORM_KEYS: &[&str] = &["target_platform", "build_platform", "host_platform"];

/// Pin applied to run requirements for a host dependency that is a variant key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinHint {
    pub min_pin: Option<String>,
    pub max_pin: Option<String>,
}

impl PinHint {
    pub fn to_pin_args(&self) -> PinArgs {
        let defaults = PinArgs::default();
        PinArgs {
            min_pin: self.min_pin.clone().or(defaults.min_pin),
            max_pin: self.max_pin.clone().or(defaults.max_pin),
            ..defaults
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantConfig {
    variants: IndexMap<String, Vec<Value>>,
    zip_keys: Vec<Vec<String>>,
    pin_run_as_build: IndexMap<String, PinHint>,
}

impl VariantConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses variant YAML.
    ///
    /// # Errors
    /// * `Error::ParseError` for malformed YAML or values that are not scalars
    /// * `Error::VariantError` for invalid `zip_keys` groups
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: IndexMap<String, serde_yaml::Value> = if text.trim().is_empty() {
            IndexMap::new()
        } else {
            serde_yaml::from_str(text).map_err(|e| Error::parse("<variants>", e.to_string()))?
        };

        let mut config = Self::new();
        for (key, value) in raw {
            match key.as_str() {
                ZIP_KEYS => config.zip_keys = parse_zip_keys(&value)?,
                PIN_RUN_AS_BUILD => {
                    config.pin_run_as_build = serde_yaml::from_value(value)
                        .map_err(|e| Error::parse(PIN_RUN_AS_BUILD, e.to_string()))?;
                }
                key if PLATFORM_KEYS.contains(&key) => {
                    debug!("Ignoring '{key}' in variant configuration; the render context sets it");
                }
                _ => {
                    let values = parse_candidates(&key, &value)?;
                    config.variants.insert(key, values);
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Adds or replaces an axis.
    pub fn with_variant<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.variants.insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_zip_keys<I, S>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zip_keys.push(group.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_pin_hint(mut self, key: impl Into<String>, hint: PinHint) -> Self {
        self.pin_run_as_build.insert(key.into(), hint);
        self
    }

    /// Overlays `other`: its axes and pin hints replace ours, zip groups
    /// accumulate.
    pub fn merge(&mut self, other: VariantConfig) -> Result<()> {
        self.variants.extend(other.variants);
        for group in other.zip_keys {
            if !self.zip_keys.contains(&group) {
                self.zip_keys.push(group);
            }
        }
        self.pin_run_as_build.extend(other.pin_run_as_build);
        self.validate()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.variants.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&[Value]> {
        self.variants.get(key).map(Vec::as_slice)
    }

    pub fn zip_keys(&self) -> &[Vec<String>] {
        &self.zip_keys
    }

    pub fn pin_hint(&self, key: &str) -> Option<&PinHint> {
        self.pin_run_as_build.get(key)
    }

    /// Checks every zip group: known keys, no key in two groups, equal lengths.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (i, group) in self.zip_keys.iter().enumerate() {
            let mut length = None;
            for key in group {
                if let Some(other) = seen.insert(key.as_str(), i) {
                    if other != i {
                        return Err(Error::VariantError(format!(
                            "key '{key}' appears in more than one zip_keys group"
                        )));
                    }
                }
                let values = self.variants.get(key).ok_or_else(|| {
                    Error::VariantError(format!("zip_keys names unknown variant key '{key}'"))
                })?;
                match length {
                    None => length = Some((key, values.len())),
                    Some((first, len)) if len != values.len() => {
                        return Err(Error::VariantError(format!(
                            "zip_keys group [{}] has lists of different lengths ('{first}' has {len}, '{key}' has {})",
                            group.join(", "),
                            values.len()
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Expands the build matrix over `used_keys`.
    ///
    /// Each zip group restricted to its used members is one axis; every other
    /// used key is an independent axis. Axes appear in key declaration order,
    /// the first axis varying slowest. Keys unknown to the configuration are
    /// ignored; with no used key the result is a single empty combination.
    ///
    /// # Errors
    /// * `Error::VariantError` for a used key without candidates or an invalid
    ///   zip group
    pub fn combinations(&self, used_keys: &BTreeSet<String>) -> Result<Vec<Combination>> {
        self.validate()?;

        let mut axes: Vec<Vec<Vec<(&str, &Value)>>> = Vec::new();
        let mut zipped_done: Vec<usize> = Vec::new();
        for (key, values) in &self.variants {
            if !used_keys.contains(key) {
                continue;
            }
            if values.is_empty() {
                return Err(Error::VariantError(format!(
                    "variant key '{key}' has no candidate values"
                )));
            }

            match self.zip_keys.iter().position(|group| group.contains(key)) {
                Some(group_index) => {
                    if zipped_done.contains(&group_index) {
                        continue;
                    }
                    zipped_done.push(group_index);
                    let members: Vec<&str> = self.zip_keys[group_index]
                        .iter()
                        .filter(|member| used_keys.contains(*member))
                        .map(String::as_str)
                        .collect();
                    let axis: Vec<Vec<(&str, &Value)>> = (0..values.len())
                        .map(|i| {
                            members
                                .iter()
                                .map(|member| (*member, &self.variants[*member][i]))
                                .collect()
                        })
                        .collect();
                    axes.push(axis);
                }
                None => {
                    axes.push(values.iter().map(|value| vec![(key.as_str(), value)]).collect());
                }
            }
        }

        let mut combinations = vec![Combination::new()];
        for axis in axes {
            let mut next = Vec::with_capacity(combinations.len() * axis.len());
            for combination in &combinations {
                for entry in &axis {
                    let mut extended = combination.clone();
                    for (key, value) in entry {
                        extended.insert((*key).to_string(), (*value).clone());
                    }
                    next.push(extended);
                }
            }
            combinations = next;
        }

        debug!("Expanded {} variant combinations over {:?}", combinations.len(), used_keys);
        Ok(combinations)
    }
}

fn parse_candidates(key: &str, value: &serde_yaml::Value) -> Result<Vec<Value>> {
    let scalar = |value: &serde_yaml::Value, path: &str| {
        Value::from_yaml_scalar(value, path)
            .ok_or_else(|| Error::parse(path, "variant values must be scalars"))
    };
    match value {
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| scalar(item, &format!("{key}[{i}]")))
            .collect(),
        other => Ok(vec![scalar(other, key)?]),
    }
}

fn parse_zip_keys(value: &serde_yaml::Value) -> Result<Vec<Vec<String>>> {
    let groups: Vec<Vec<String>> = serde_yaml::from_value(value.clone())
        .map_err(|e| Error::parse(ZIP_KEYS, format!("expected a list of key lists: {e}")))?;
    for (i, group) in groups.iter().enumerate() {
        if group.len() < 2 {
            return Err(Error::parse(
                format!("{ZIP_KEYS}[{i}]"),
                "a zip_keys group needs at least two keys",
            ));
        }
    }
    Ok(groups)
}
