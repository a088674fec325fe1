//! recipe-render turns template recipes into concrete, buildable package
//! variants. It evaluates `${{ }}` expressions and `if/then/else` selectors,
//! expands variant matrices, computes build hashes and resolves the graph
//! between staging caches and package outputs.

/// Command-line interface module for the recipe-render binary
pub mod cli;

/// Common constants: recipe and variant file names
pub mod constants;

/// Render context: platforms, flags and caller-provided values
pub mod context;

/// Error types and handling
pub mod error;

/// Expression evaluation and selector expansion
pub mod evaluator;

/// Output graph: inherit edges and build order
pub mod graph;

/// Variant filtering and build hashes
pub mod hash;

/// Recipe and variant file loading
pub mod loader;

/// Logger initialisation for the binary
pub mod logger;

/// Recipe text parsing
pub mod parser;

/// `pin_subpackage` / `pin_compatible` pins
pub mod pin;

/// Stage0 to Stage1 rendering
pub mod render;

/// Parsed, unevaluated recipe (Stage0)
pub mod stage0;

/// Fully evaluated outputs (Stage1)
pub mod stage1;

/// `${{ }}` scalar templates
pub mod template;

/// Static detection of the variant keys an output uses
pub mod used_keys;

/// Closed value type for evaluated leaves
pub mod value;

/// Variant configuration and matrix expansion
pub mod variant;

pub use context::{Platform, RenderContext};
pub use error::{Error, ErrorKind, Result};
pub use render::{render, render_with_cache, CacheRegistry, Renderer};
pub use stage0::TemplateRecipe;
pub use stage1::RenderedVariant;
pub use value::Value;
pub use variant::VariantConfig;
