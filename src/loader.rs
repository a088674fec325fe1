//! Recipe and variant file loading for the command-line shell.
//! The rendering core never touches the file system; everything it needs is
//! read here and handed over as parsed values.
use crate::constants::{RECIPE_FILES, VARIANT_FILES};
use crate::error::{Error, Result};
use crate::stage0::TemplateRecipe;
use crate::variant::VariantConfig;
use log::debug;
use std::path::{Path, PathBuf};

/// Finds the first existing file from `candidates` inside `dir`.
///
/// # Arguments
/// * `dir` - Directory to search
/// * `candidates` - File names to try, in order
///
/// # Returns
/// * `Option<PathBuf>` - Path of the first file that exists
pub fn find_file<P: AsRef<Path>>(dir: P, candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().map(|name| dir.as_ref().join(name)).find(|path| path.is_file())
}

/// Resolves the recipe path: a file is used as is, a directory is searched
/// for one of [`RECIPE_FILES`].
///
/// # Errors
/// * `Error::IoError` if the path does not exist or the directory holds no recipe
pub fn resolve_recipe_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.is_dir() {
        return find_file(path, &RECIPE_FILES).ok_or_else(|| {
            Error::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "no recipe found in '{}' (tried: {})",
                    path.display(),
                    RECIPE_FILES.join(", ")
                ),
            ))
        });
    }
    if !path.exists() {
        return Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("recipe '{}' does not exist", path.display()),
        )));
    }
    Ok(path.to_path_buf())
}

/// Reads and parses a recipe file.
///
/// # Returns
/// * `Result<(PathBuf, TemplateRecipe)>` - The resolved recipe path and the parsed recipe
pub fn load_recipe<P: AsRef<Path>>(path: P) -> Result<(PathBuf, TemplateRecipe)> {
    let path = resolve_recipe_path(path)?;
    debug!("Loading recipe from {}", path.display());
    let text = std::fs::read_to_string(&path).map_err(Error::IoError)?;
    let recipe = TemplateRecipe::from_yaml_str(&text)?;
    Ok((path, recipe))
}

/// Loads and merges variant files, later files overriding earlier ones.
///
/// With no explicit files, a [`VARIANT_FILES`] entry next to the recipe is
/// used when present; otherwise the configuration is empty.
pub fn load_variants<P: AsRef<Path>>(recipe_path: P, files: &[PathBuf]) -> Result<VariantConfig> {
    let files: Vec<PathBuf> = if files.is_empty() {
        recipe_path
            .as_ref()
            .parent()
            .and_then(|dir| find_file(dir, &VARIANT_FILES))
            .into_iter()
            .collect()
    } else {
        files.to_vec()
    };

    let mut config = VariantConfig::new();
    for file in &files {
        debug!("Loading variants from {}", file.display());
        let text = std::fs::read_to_string(file).map_err(Error::IoError)?;
        let overlay = VariantConfig::from_yaml_str(&text).map_err(|e| match e {
            Error::ParseError { path, message } => {
                Error::parse(format!("{}: {path}", file.display()), message)
            }
            other => other,
        })?;
        config.merge(overlay)?;
    }
    Ok(config)
}
