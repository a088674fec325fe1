//! recipe-render's main application entry point.
//! Loads the recipe and variant files, renders every variant and prints the
//! result as JSON.

use anyhow::Context;
use recipe_render::{
    cli::{get_args, Args},
    error::default_error_handler,
    loader::{load_recipe, load_variants},
    logger::init_logger,
    render::render,
};

/// Main application entry point.
fn main() {
    let args = get_args();
    init_logger(args.verbose);

    if let Err(err) = run(args) {
        default_error_handler(err);
    }
}

/// Main application logic execution.
///
/// # Flow
/// 1. Resolves and parses the recipe
/// 2. Loads and merges the variant files
/// 3. Builds the render context from the command line
/// 4. Renders and prints the variants as pretty JSON
fn run(args: Args) -> anyhow::Result<()> {
    let (recipe_path, recipe) = load_recipe(&args.recipe)
        .with_context(|| format!("failed to load recipe '{}'", args.recipe.display()))?;
    let variants =
        load_variants(&recipe_path, &args.variant_config).context("failed to load variants")?;
    let ctx = args.render_context()?;

    let rendered = render(&recipe, &variants, &ctx)
        .with_context(|| format!("failed to render '{}'", recipe_path.display()))?;
    log::info!("Rendered {} variants for {}", rendered.len(), ctx.target_platform);

    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}
