//! Stage1: fully evaluated, buildable outputs.
//!
//! These are the values handed to the builder, packager and solver. No field
//! holds an unevaluated expression.

use crate::error::{Error, Result};
use crate::hash::HashInfo;
use crate::value::{Mapping, Value};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Variant keys and values that determine an output's hash, sorted by key.
pub type UsedVariant = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoArch {
    Python,
    Generic,
}

impl FromStr for NoArch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "python" => Ok(NoArch::Python),
            "generic" => Ok(NoArch::Generic),
            other => Err(Error::parse("build.noarch", format!("unknown noarch kind '{other}'"))),
        }
    }
}

impl fmt::Display for NoArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoArch::Python => f.write_str("python"),
            NoArch::Generic => f.write_str("generic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageIdentity {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Build {
    pub number: u64,
    pub string: String,
    pub script: Vec<String>,
    pub noarch: Option<NoArch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Requirements {
    pub build: Vec<String>,
    pub host: Vec<String>,
    pub run: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct About {
    pub homepage: Option<String>,
    pub license: Option<String>,
    pub license_file: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub documentation: Option<String>,
    pub repository: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingBuild {
    pub script: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct StagingRequirements {
    pub build: Vec<String>,
    pub host: Vec<String>,
}

/// A rendered staging output. Its sources are not part of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingCache {
    pub name: String,
    pub build: StagingBuild,
    pub requirements: StagingRequirements,
    pub used_variant: UsedVariant,
    pub hash_info: HashInfo,
}

/// A sibling output this variant pins against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinnedSubpackage {
    pub version: String,
    pub build_string: Option<String>,
    pub exact: bool,
}

/// One package output rendered for one filtered variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedVariant {
    pub package: PackageIdentity,
    pub build: Build,
    pub requirements: Requirements,
    pub about: About,
    pub context: Mapping,
    pub used_variant: UsedVariant,
    pub sources: Vec<Mapping>,
    pub staging_caches: Vec<Arc<StagingCache>>,
    pub inherits_from: Option<String>,
    pub hash_info: HashInfo,
    pub pin_subpackages: IndexMap<String, PinnedSubpackage>,
}

impl RenderedVariant {
    /// `name-version-build_string`, the on-disk identifier of the package.
    pub fn identifier(&self) -> String {
        format!("{}-{}-{}", self.package.name, self.package.version, self.build.string)
    }
}
