//! Common constants used throughout recipe-render.

/// Recipe file names tried, in order, when a directory is given
pub const RECIPE_FILES: [&str; 2] = ["recipe.yaml", "recipe.yml"];

/// Variant file names tried, in order, next to the recipe
pub const VARIANT_FILES: [&str; 2] = ["variants.yaml", "variants.yml"];
