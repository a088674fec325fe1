//! Render context: the platform triple, render flags and caller-provided
//! values that every expression can see.

use crate::error::{Error, Result};
use crate::value::{Mapping, Value};
use std::fmt;
use std::str::FromStr;

/// Platforms a recipe can be rendered for.
pub const KNOWN_PLATFORMS: &[&str] = &[
    "noarch",
    "linux-32",
    "linux-64",
    "linux-aarch64",
    "linux-armv6l",
    "linux-armv7l",
    "linux-ppc64le",
    "linux-s390x",
    "osx-64",
    "osx-arm64",
    "win-32",
    "win-64",
    "win-arm64",
    "emscripten-wasm32",
    "wasi-wasm32",
];

const OS_FLAGS: &[&str] = &["linux", "osx", "win", "unix", "emscripten", "wasi"];
const ARCH_FLAGS: &[&str] = &["x86", "x86_64", "aarch64", "arm64", "ppc64le", "s390x", "wasm32"];

/// A platform subdirectory such as `linux-64` or `osx-arm64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform(String);

impl Platform {
    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        let os = if cfg!(target_os = "macos") {
            "osx"
        } else if cfg!(target_os = "windows") {
            "win"
        } else {
            "linux"
        };
        let arch = if cfg!(target_arch = "aarch64") {
            if os == "linux" {
                "aarch64"
            } else {
                "arm64"
            }
        } else if cfg!(target_arch = "powerpc64") {
            "ppc64le"
        } else if cfg!(target_arch = "x86") {
            "32"
        } else {
            "64"
        };
        Platform(format!("{os}-{arch}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_noarch(&self) -> bool {
        self.0 == "noarch"
    }

    pub fn os(&self) -> Option<&str> {
        self.0.split_once('-').map(|(os, _)| os)
    }

    pub fn is_unix(&self) -> bool {
        matches!(self.os(), Some("linux") | Some("osx") | Some("emscripten") | Some("wasi"))
    }

    /// Architecture name as used by selectors.
    pub fn arch(&self) -> Option<&str> {
        let (os, arch) = self.0.split_once('-')?;
        Some(match (os, arch) {
            (_, "64") => "x86_64",
            (_, "32") => "x86",
            ("osx", "arm64") | ("win", "arm64") => "arm64",
            (_, other) => other,
        })
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if KNOWN_PLATFORMS.contains(&s) {
            Ok(Platform(s.to_string()))
        } else {
            Err(Error::parse(
                "platform",
                format!("unknown platform '{s}' (expected one of: {})", KNOWN_PLATFORMS.join(", ")),
            ))
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a render call needs besides the recipe and the variants.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub target_platform: Platform,
    pub build_platform: Platform,
    pub host_platform: Platform,
    /// Enables staging outputs.
    pub experimental: bool,
    /// Undefined variables evaluate to null instead of failing.
    pub allow_undefined: bool,
    /// Caller-provided values; they shadow recipe `context` entries.
    pub extra: Mapping,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::for_platform(Platform::current())
    }
}

impl RenderContext {
    /// A native render: build, host and target are the same platform.
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            target_platform: platform.clone(),
            build_platform: platform.clone(),
            host_platform: platform,
            experimental: false,
            allow_undefined: false,
            extra: Mapping::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Platform variables and selector flags.
    ///
    /// OS and architecture flags describe the host platform: the machine the
    /// package will run on.
    pub fn platform_variables(&self) -> Mapping {
        let mut vars = Mapping::new();
        vars.insert("target_platform".into(), self.target_platform.as_str().into());
        vars.insert("build_platform".into(), self.build_platform.as_str().into());
        vars.insert("host_platform".into(), self.host_platform.as_str().into());

        let host = &self.host_platform;
        for flag in OS_FLAGS {
            let set = match *flag {
                "unix" => host.is_unix(),
                os => host.os() == Some(os),
            };
            vars.insert((*flag).into(), Value::Bool(set));
        }
        let arch = host.arch();
        for flag in ARCH_FLAGS {
            let set = match (*flag, arch) {
                // osx-arm64 and linux-aarch64 are the same CPU family
                ("aarch64", Some("arm64")) | ("arm64", Some("aarch64")) => true,
                (flag, Some(arch)) => flag == arch,
                (_, None) => false,
            };
            vars.insert((*flag).into(), Value::Bool(set));
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parts() {
        let platform: Platform = "osx-arm64".parse().unwrap();
        assert_eq!(platform.os(), Some("osx"));
        assert_eq!(platform.arch(), Some("arm64"));
        assert!(platform.is_unix());

        let platform: Platform = "win-64".parse().unwrap();
        assert_eq!(platform.arch(), Some("x86_64"));
        assert!(!platform.is_unix());
    }

    #[test]
    fn test_unknown_platform() {
        assert!("plan9-64".parse::<Platform>().is_err());
    }

    #[test]
    fn test_selector_flags_follow_host() {
        let mut ctx = RenderContext::for_platform("linux-64".parse().unwrap());
        ctx.host_platform = "linux-aarch64".parse().unwrap();
        let vars = ctx.platform_variables();
        assert_eq!(vars["linux"], Value::Bool(true));
        assert_eq!(vars["unix"], Value::Bool(true));
        assert_eq!(vars["win"], Value::Bool(false));
        assert_eq!(vars["aarch64"], Value::Bool(true));
        assert_eq!(vars["x86_64"], Value::Bool(false));
        assert_eq!(vars["target_platform"], Value::Str("linux-64".into()));
    }
}
