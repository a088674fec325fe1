//! Command-line interface implementation for recipe-render.
//! Provides argument parsing and help text formatting using clap.

use crate::context::{Platform, RenderContext};
use crate::error::{Error, Result};
use crate::value::Value;
use clap::{error::ErrorKind, CommandFactory, Parser};
use std::path::PathBuf;

/// Command-line arguments structure for recipe-render.
#[derive(Parser, Debug)]
#[command(author, version, about = "recipe-render: render build recipes into concrete variants", long_about = None)]
pub struct Args {
    /// Path to a recipe file or a directory containing recipe.yaml
    #[arg(value_name = "RECIPE")]
    pub recipe: PathBuf,

    /// Variant configuration file; may be repeated, later files win
    #[arg(short = 'm', long = "variant-config", value_name = "FILE")]
    pub variant_config: Vec<PathBuf>,

    /// Platform the packages are built for (defaults to the current platform)
    #[arg(long)]
    pub target_platform: Option<String>,

    /// Platform the build runs on
    #[arg(long)]
    pub build_platform: Option<String>,

    /// Platform the host dependencies are installed for
    #[arg(long)]
    pub host_platform: Option<String>,

    /// Enable staging outputs
    #[arg(long)]
    pub experimental: bool,

    /// Treat undefined variables as null instead of failing
    #[arg(long)]
    pub allow_undefined: bool,

    /// Extra context value, as KEY=VALUE; may be repeated
    #[arg(short, long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Builds the render context from the platform flags and `-c` values.
    ///
    /// The target platform defaults to the current one; build and host
    /// platforms default to the target platform.
    ///
    /// # Errors
    /// * `Error::ParseError` for unknown platforms or malformed `KEY=VALUE` pairs
    pub fn render_context(&self) -> Result<RenderContext> {
        let target: Platform = match &self.target_platform {
            Some(platform) => platform.parse()?,
            None => Platform::current(),
        };
        let mut ctx = RenderContext::for_platform(target);
        if let Some(platform) = &self.build_platform {
            ctx.build_platform = platform.parse()?;
        }
        if let Some(platform) = &self.host_platform {
            ctx.host_platform = platform.parse()?;
        }
        ctx.experimental = self.experimental;
        ctx.allow_undefined = self.allow_undefined;

        for pair in &self.context {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::parse("--context", format!("expected KEY=VALUE, got '{pair}'")))?;
            ctx.extra.insert(key.trim().to_string(), Value::from(value));
        }
        Ok(ctx)
    }
}

/// Parses command line arguments and returns the Args structure.
///
/// # Returns
/// * `Args` - Parsed command line arguments
///
/// # Exits
/// * With status code 1 if required arguments are missing
/// * With clap's default error handling for other argument errors
pub fn get_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            if e.kind() == ErrorKind::MissingRequiredArgument {
                // help output on a closed stdout is not worth a panic
                let _ = Args::command()
                    .help_template(
                        r#"{about-section}
{usage-heading} {usage}

{all-args}
{after-help}
"#,
                    )
                    .print_help();
                std::process::exit(1);
            } else {
                e.exit();
            }
        }
    }
}
