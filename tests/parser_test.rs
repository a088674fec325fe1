use recipe_render::error::{Error, ErrorKind};
use recipe_render::stage0::{Node, OutputKind};
use recipe_render::{TemplateRecipe, Value};

fn parse_err(text: &str) -> Error {
    TemplateRecipe::from_yaml_str(text).unwrap_err()
}

#[test]
fn test_single_output() {
    let recipe = TemplateRecipe::from_yaml_str(
        r#"
context:
  version: "0.4.1"
package:
  name: zlib-ng
  version: ${{ version }}
source:
  url: https://example.com/zlib-ng-${{ version }}.tar.gz
build:
  number: 2
about:
  license: Zlib
"#,
    )
    .unwrap();

    assert_eq!(recipe.context.len(), 1);
    assert_eq!(recipe.outputs.len(), 1);
    let output = &recipe.outputs[0];
    assert_eq!(output.kind, OutputKind::Package);
    assert_eq!(output.static_name(), Some("zlib-ng"));
    assert!(matches!(output.version, Some(Node::Template(_))));
    assert!(output.source.is_some());
    assert!(!recipe.has_staging());
}

#[test]
fn test_multi_output_defaults() {
    let recipe = TemplateRecipe::from_yaml_str(
        r#"
recipe:
  version: "1.0"
source:
  url: https://example.com/src.tar.gz
build:
  number: 5
outputs:
  - staging:
      name: core
  - package:
      name: libcore
    inherit: core
  - package:
      name: tools
      version: "2.0"
"#,
    )
    .unwrap();

    assert!(recipe.has_staging());
    let [staging, lib, tools] = &recipe.outputs[..] else { panic!("expected three outputs") };
    assert_eq!(staging.kind, OutputKind::Staging);
    assert!(staging.source.is_some());
    assert_eq!(lib.inherit.as_deref(), Some("core"));
    assert!(lib.source.is_none());
    assert!(tools.source.is_some());
    assert_eq!(lib.build.number, Some(Node::Literal(Value::Int(5))));
    assert_eq!(tools.version.as_ref().and_then(Node::as_literal_str), Some("2.0"));
}

#[test]
fn test_unknown_top_level_key() {
    let err = parse_err("package:\n  name: foo\n  version: '1'\nbuidl: {}\n");
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(err.location(), Some("buidl"));
}

#[test]
fn test_literal_type_mismatch() {
    let err = parse_err("package:\n  name: foo\n  version: '1'\nbuild:\n  number: [1]\n");
    assert_eq!(err.location(), Some("build.number"));

    let err = parse_err("package:\n  name: foo\n  version: '1'\nrequirements:\n  run:\n    - 3\n");
    assert_eq!(err.location(), Some("requirements.run[0]"));
}

#[test]
fn test_unterminated_expression() {
    let err = parse_err("package:\n  name: foo\n  version: ${{ version\n");
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(err.location(), Some("package.version"));
}

#[test]
fn test_invalid_expression_fails_at_load() {
    let err = parse_err("package:\n  name: foo\n  version: ${{ 1 + }}\n");
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(err.location(), Some("package.version"));
    assert!(err.to_string().contains("invalid expression '1 +'"));

    let err = parse_err("package:\n  name: foo\n  version: '1'\nbuild:\n  skip:\n    - (win\n");
    assert_eq!(err.location(), Some("build.skip"));
}

#[test]
fn test_staging_rules() {
    let err = parse_err(
        "outputs:\n  - staging:\n      name: ${{ name }}\n",
    );
    assert_eq!(err.location(), Some("outputs[0].staging.name"));

    let err = parse_err(
        "outputs:\n  - staging:\n      name: core\n    about:\n      license: MIT\n",
    );
    assert_eq!(err.location(), Some("outputs[0].about"));
}

#[test]
fn test_package_forbidden_with_outputs() {
    let err = parse_err(
        "package:\n  name: foo\n  version: '1'\noutputs:\n  - package:\n      name: bar\n",
    );
    assert_eq!(err.location(), Some("package"));
}

#[test]
fn test_missing_version() {
    let err = parse_err("outputs:\n  - package:\n      name: bar\n");
    assert_eq!(err.location(), Some("outputs[0].package.version"));
}
