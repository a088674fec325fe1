//! Variant filtering and build hashes.
//!
//! Only the variant keys an output uses feed its hash, so two combinations
//! that differ in a key the output ignores produce the same hash. That is what
//! lets staging caches and packages be shared instead of rebuilt.

use crate::stage1::{NoArch, UsedVariant};
use crate::value::Value;
use crate::variant::Combination;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Number of hex characters kept from the content hash.
pub const HASH_LENGTH: usize = 7;

/// Variant key whose value becomes the build string prefix.
pub const PREFIX_KEY: &str = "python";

pub const TARGET_PLATFORM_KEY: &str = "target_platform";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HashInfo {
    pub hash: String,
    pub prefix: String,
}

impl HashInfo {
    /// Hashes a filtered variant.
    ///
    /// # Algorithm
    /// 1. Serialize the key-sorted map as compact JSON
    /// 2. SHA-256 the JSON bytes
    /// 3. Keep the first [`HASH_LENGTH`] lowercase hex characters
    pub fn compute(used_variant: &UsedVariant, noarch: Option<NoArch>) -> Self {
        // BTreeMap of plain values always serializes
        let json = serde_json::to_string(used_variant).unwrap_or_default();
        let digest = hex::encode(Sha256::digest(json.as_bytes()));
        Self { hash: digest[..HASH_LENGTH].to_string(), prefix: prefix(used_variant, noarch) }
    }

    /// `{prefix}h{hash}_{number}`
    pub fn build_string(&self, number: u64) -> String {
        format!("{self}_{number}")
    }
}

impl fmt::Display for HashInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h{}", self.prefix, self.hash)
    }
}

fn prefix(used_variant: &UsedVariant, noarch: Option<NoArch>) -> String {
    match noarch {
        Some(NoArch::Python) => "py".to_string(),
        Some(NoArch::Generic) => String::new(),
        None => match used_variant.get(PREFIX_KEY) {
            Some(value) => {
                let digits = short_version(&value.to_interpolated());
                if digits.is_empty() {
                    String::new()
                } else {
                    format!("py{digits}")
                }
            }
            None => String::new(),
        },
    }
}

/// `"3.11.4"` → `"311"`: the first two numeric segments, concatenated.
pub fn short_version(version: &str) -> String {
    let version = version.split_whitespace().next().unwrap_or_default();
    version
        .split('.')
        .take(2)
        .map(|segment| segment.chars().take_while(char::is_ascii_digit).collect::<String>())
        .collect()
}

/// Restricts a combination to `used_keys` and records the target platform.
///
/// `noarch` outputs are platform independent and record `noarch` instead.
pub fn filter_variant(
    combination: &Combination,
    used_keys: &BTreeSet<String>,
    target_platform: &str,
    noarch: Option<NoArch>,
) -> UsedVariant {
    let mut filtered: UsedVariant = combination
        .iter()
        .filter(|(key, _)| used_keys.contains(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let platform = if noarch.is_some() { "noarch" } else { target_platform };
    filtered.insert(TARGET_PLATFORM_KEY.to_string(), Value::Str(platform.to_string()));
    filtered
}
