use recipe_render::error::ErrorKind;
use recipe_render::loader::{load_recipe, load_variants, resolve_recipe_path};
use recipe_render::Value;
use std::fs;
use tempfile::TempDir;

const RECIPE: &str = r#"
package:
  name: demo
  version: "1.0"
requirements:
  host:
    - python
"#;

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("recipe.yaml"), RECIPE).unwrap();
    dir
}

#[test_log::test]
fn test_directory_resolves_to_recipe_file() {
    let dir = workspace();
    let path = resolve_recipe_path(dir.path()).unwrap();
    assert_eq!(path, dir.path().join("recipe.yaml"));

    let (path, recipe) = load_recipe(dir.path()).unwrap();
    assert!(path.ends_with("recipe.yaml"));
    assert_eq!(recipe.outputs[0].static_name(), Some("demo"));
}

#[test_log::test]
fn test_missing_recipe() {
    let dir = TempDir::new().unwrap();
    let err = load_recipe(dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    let err = load_recipe(dir.path().join("nope.yaml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test_log::test]
fn test_variants_next_to_recipe() {
    let dir = workspace();
    fs::write(dir.path().join("variants.yaml"), "python: ['3.11', '3.12']\n").unwrap();

    let config = load_variants(dir.path().join("recipe.yaml"), &[]).unwrap();
    assert_eq!(config.get("python").map(<[Value]>::len), Some(2));
}

#[test]
fn test_no_variant_file() {
    let dir = workspace();
    let config = load_variants(dir.path().join("recipe.yaml"), &[]).unwrap();
    assert_eq!(config.keys().count(), 0);
}

#[test]
fn test_explicit_files_merge_in_order() {
    let dir = workspace();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    fs::write(dir.path().join("variants.yaml"), "ignored: [x]\n").unwrap();
    fs::write(&base, "python: ['3.10']\nc_compiler: [gcc]\n").unwrap();
    fs::write(&overlay, "python: ['3.13']\n").unwrap();

    let config = load_variants(dir.path().join("recipe.yaml"), &[base, overlay]).unwrap();
    assert!(!config.contains_key("ignored"));
    assert_eq!(config.get("python"), Some(&[Value::from("3.13")][..]));
    assert_eq!(config.get("c_compiler"), Some(&[Value::from("gcc")][..]));
}

#[test]
fn test_variant_parse_error_names_file() {
    let dir = workspace();
    let bad = dir.path().join("bad.yaml");
    fs::write(&bad, "zip_keys: [[python]]\npython: ['3.10']\n").unwrap();

    let err = load_variants(dir.path().join("recipe.yaml"), &[bad]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.location().unwrap().contains("bad.yaml"));
}
