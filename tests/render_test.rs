use recipe_render::evaluator::{Context, ExpressionEvaluator, MiniJinjaEvaluator};
use recipe_render::{
    render, render_with_cache, CacheRegistry, Error, RenderContext, RenderedVariant, Renderer,
    TemplateRecipe, Value, VariantConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn ctx(platform: &str) -> RenderContext {
    RenderContext::for_platform(platform.parse().unwrap())
}

fn recipe(text: &str) -> TemplateRecipe {
    TemplateRecipe::from_yaml_str(text).unwrap()
}

fn names(rendered: &[RenderedVariant]) -> Vec<&str> {
    rendered.iter().map(|v| v.package.name.as_str()).collect()
}

const NUMPY_RECIPE: &str = r#"
package:
  name: foo
  version: "1.0"
requirements:
  host:
    - python
    - numpy
"#;

#[test]
fn test_cartesian_product_over_used_keys() {
    let variants = VariantConfig::new()
        .with_variant("python", ["3.10", "3.11", "3.12"])
        .with_variant("numpy", ["1.26", "2.0"]);
    let rendered = render(&recipe(NUMPY_RECIPE), &variants, &ctx("linux-64")).unwrap();

    assert_eq!(rendered.len(), 6);
    assert_eq!(rendered[0].requirements.host, vec!["python 3.10.*", "numpy 1.26.*"]);
    assert_eq!(rendered[1].requirements.host, vec!["python 3.10.*", "numpy 2.0.*"]);
    assert_eq!(rendered[5].requirements.host, vec!["python 3.12.*", "numpy 2.0.*"]);
}

#[test]
fn test_zip_keys_advance_together() {
    let variants = VariantConfig::new()
        .with_variant("python", ["3.10", "3.11", "3.12"])
        .with_variant("numpy", ["1.22", "1.26", "2.0"])
        .with_zip_keys(["python", "numpy"]);
    let rendered = render(&recipe(NUMPY_RECIPE), &variants, &ctx("linux-64")).unwrap();

    let pairs: Vec<(String, String)> = rendered
        .iter()
        .map(|v| {
            (
                v.used_variant["python"].to_string(),
                v.used_variant["numpy"].to_string(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("3.10".to_string(), "1.22".to_string()),
            ("3.11".to_string(), "1.26".to_string()),
            ("3.12".to_string(), "2.0".to_string()),
        ]
    );
}

#[test]
fn test_zip_length_mismatch() {
    let variants = VariantConfig::new()
        .with_variant("python", ["3.10", "3.11"])
        .with_variant("numpy", ["1.26"])
        .with_zip_keys(["python", "numpy"]);
    let err = render(&recipe(NUMPY_RECIPE), &variants, &ctx("linux-64")).unwrap_err();
    assert!(matches!(err, Error::VariantError(_)));
}

#[test]
fn test_unreferenced_keys_do_not_change_hash() {
    let text = r#"
package:
  name: foo
  version: "1.0"
requirements:
  host:
    - python
"#;
    let a = VariantConfig::new().with_variant("python", ["3.11"]).with_variant("numpy", ["1.26"]);
    let b = VariantConfig::new().with_variant("python", ["3.11"]).with_variant("numpy", ["2.0"]);
    let rendered_a = render(&recipe(text), &a, &ctx("linux-64")).unwrap();
    let rendered_b = render(&recipe(text), &b, &ctx("linux-64")).unwrap();

    assert_eq!(rendered_a.len(), 1);
    assert_eq!(rendered_a[0].hash_info, rendered_b[0].hash_info);
    assert_eq!(rendered_a[0].build.string, rendered_b[0].build.string);
    assert!(!rendered_a[0].used_variant.contains_key("numpy"));
    assert_eq!(rendered_a[0].hash_info.prefix, "py311");
    assert!(rendered_a[0].build.string.starts_with("py311h"));
    assert!(rendered_a[0].build.string.ends_with("_0"));
}

#[test]
fn test_ignore_keys_and_use_keys() {
    let text = r#"
package:
  name: foo
  version: "1.0"
build:
  variant:
    use_keys:
      - openssl
    ignore_keys:
      - numpy
requirements:
  host:
    - python
    - numpy
"#;
    let variants = VariantConfig::new()
        .with_variant("python", ["3.11"])
        .with_variant("numpy", ["1.26", "2.0"])
        .with_variant("openssl", ["3"]);
    let rendered = render(&recipe(text), &variants, &ctx("linux-64")).unwrap();

    assert_eq!(rendered.len(), 1);
    let used: Vec<&str> = rendered[0].used_variant.keys().map(String::as_str).collect();
    assert_eq!(used, vec!["openssl", "python", "target_platform"]);
    assert_eq!(rendered[0].requirements.host, vec!["python 3.11.*", "numpy"]);
}

#[test]
fn test_coercion_of_context_values() {
    let text = r#"
context:
  a: ${{ 1234 }}
  b: "${{ '1234' }}"
  c: "${{ 1234 }}"
  d: ${{ "1234" }}
  e: ${{ a }}-suffix
package:
  name: foo
  version: "1.0"
"#;
    let rendered = render(&recipe(text), &VariantConfig::new(), &ctx("linux-64")).unwrap();
    let context = &rendered[0].context;
    assert_eq!(context["a"], Value::Int(1234));
    assert_eq!(context["b"], Value::Str("1234".into()));
    assert_eq!(context["c"], Value::Int(1234));
    assert_eq!(context["d"], Value::Str("1234".into()));
    assert_eq!(context["e"], Value::Str("1234-suffix".into()));
}

#[test]
fn test_extra_values_shadow_recipe_context() {
    let text = r#"
context:
  version: "1.0"
package:
  name: foo
  version: ${{ version }}
"#;
    let ctx = ctx("linux-64").with_extra("version", "2.0");
    let rendered = render(&recipe(text), &VariantConfig::new(), &ctx).unwrap();
    assert_eq!(rendered[0].package.version, "2.0");
    assert_eq!(rendered[0].context["version"], Value::Str("2.0".into()));
}

#[test]
fn test_selectors_follow_platform() {
    let text = r#"
package:
  name: foo
  version: "1.0"
requirements:
  run:
    - zlib
    - if: linux
      then: libgcc
      else: vc
"#;
    let linux = render(&recipe(text), &VariantConfig::new(), &ctx("linux-64")).unwrap();
    assert_eq!(linux[0].requirements.run, vec!["zlib", "libgcc"]);

    let win = render(&recipe(text), &VariantConfig::new(), &ctx("win-64")).unwrap();
    assert_eq!(win[0].requirements.run, vec!["zlib", "vc"]);
    assert_ne!(linux[0].hash_info, win[0].hash_info);
}

#[test]
fn test_skip() {
    let text = r#"
package:
  name: foo
  version: "1.0"
build:
  skip:
    - win
"#;
    assert!(render(&recipe(text), &VariantConfig::new(), &ctx("win-64")).unwrap().is_empty());
    assert_eq!(render(&recipe(text), &VariantConfig::new(), &ctx("osx-64")).unwrap().len(), 1);
}

#[test]
fn test_compiler_keys_are_used() {
    let text = r#"
package:
  name: foo
  version: "1.0"
requirements:
  build:
    - ${{ compiler('c') }}
"#;
    let variants = VariantConfig::new().with_variant("c_compiler", ["gcc", "clang"]);
    let rendered = render(&recipe(text), &variants, &ctx("linux-64")).unwrap();

    assert_eq!(rendered.len(), 2);
    assert_eq!(rendered[0].requirements.build, vec!["gcc_linux-64"]);
    assert_eq!(rendered[1].requirements.build, vec!["clang_linux-64"]);
    assert_ne!(rendered[0].hash_info, rendered[1].hash_info);
}

#[test]
fn test_noarch_python() {
    let text = r#"
package:
  name: foo
  version: "1.0"
build:
  noarch: python
requirements:
  host:
    - python
"#;
    let variants = VariantConfig::new().with_variant("python", ["3.11"]);
    let rendered = render(&recipe(text), &variants, &ctx("linux-64")).unwrap();

    assert_eq!(rendered[0].used_variant["target_platform"], Value::Str("noarch".into()));
    assert_eq!(rendered[0].hash_info.prefix, "py");
    assert!(rendered[0].build.string.starts_with("pyh"));
}

#[test]
fn test_build_string_override_sees_hash() {
    let text = r#"
package:
  name: foo
  version: "1.0"
build:
  number: 3
  string: ${{ hash }}_custom
"#;
    let rendered = render(&recipe(text), &VariantConfig::new(), &ctx("linux-64")).unwrap();
    assert_eq!(rendered[0].build.number, 3);
    assert_eq!(rendered[0].build.string, format!("{}_custom", rendered[0].hash_info));
}

#[test]
fn test_pin_run_as_build() {
    let text = r#"
package:
  name: foo
  version: "1.0"
requirements:
  host:
    - python
"#;
    let variants = VariantConfig::from_yaml_str(
        "python:\n  - '3.11'\npin_run_as_build:\n  python:\n    max_pin: x.x\n",
    )
    .unwrap();
    let rendered = render(&recipe(text), &variants, &ctx("linux-64")).unwrap();
    assert_eq!(rendered[0].requirements.run, vec!["python >=3.11,<3.12.0a0"]);
}

#[test]
fn test_undefined_variables() {
    let text = r#"
package:
  name: foo
  version: "1.0"
about:
  summary: ${{ missing }}
"#;
    let err = render(&recipe(text), &VariantConfig::new(), &ctx("linux-64")).unwrap_err();
    assert!(matches!(err, Error::EvaluationError { .. }));
    assert_eq!(err.location(), Some("about.summary"));

    let mut lenient = ctx("linux-64");
    lenient.allow_undefined = true;
    let rendered = render(&recipe(text), &VariantConfig::new(), &lenient).unwrap();
    assert_eq!(rendered[0].about.summary, None);
}

const MULTI_OUTPUT: &str = r#"
recipe:
  version: "1.2.3"
outputs:
  - package:
      name: libfoo
  - package:
      name: foo-py
    requirements:
      host:
        - python
      run:
        - "${{ pin_subpackage('libfoo', exact=True) }}"
        - "${{ pin_subpackage('libfoo', max_pin='x.x') }}"
"#;

#[test]
fn test_multi_output_count_and_order() {
    let variants = VariantConfig::new().with_variant("python", ["3.11", "3.12"]);
    let rendered = render(&recipe(MULTI_OUTPUT), &variants, &ctx("linux-64")).unwrap();

    assert_eq!(names(&rendered), vec!["libfoo", "foo-py", "foo-py"]);
    assert!(rendered.iter().all(|v| v.package.version == "1.2.3"));
}

#[test]
fn test_pin_subpackage_resolution() {
    let variants = VariantConfig::new().with_variant("python", ["3.11"]);
    let rendered = render(&recipe(MULTI_OUTPUT), &variants, &ctx("linux-64")).unwrap();
    let (lib, py) = (&rendered[0], &rendered[1]);

    assert_eq!(
        py.requirements.run,
        vec![
            format!("libfoo-1.2.3-{}", lib.build.string),
            "libfoo >=1.2.3,<1.3.0a0".to_string(),
        ]
    );
    assert_eq!(
        py.used_variant["libfoo"],
        Value::Str(format!("1.2.3 {}", lib.build.string))
    );
    let pinned = &py.pin_subpackages["libfoo"];
    assert_eq!(pinned.version, "1.2.3");
    assert!(pinned.exact);
    assert_eq!(pinned.build_string.as_deref(), Some(lib.build.string.as_str()));
}

#[test]
fn test_unknown_pin_target() {
    let text = r#"
package:
  name: foo
  version: "1.0"
requirements:
  run:
    - "${{ pin_subpackage('nope') }}"
"#;
    let err = render(&recipe(text), &VariantConfig::new(), &ctx("linux-64")).unwrap_err();
    assert!(matches!(err, Error::GraphError(_)));
}

#[test]
fn test_exact_pin_cycle() {
    let text = r#"
recipe:
  version: "1.0"
outputs:
  - package:
      name: a
    requirements:
      run:
        - "${{ pin_subpackage('b', exact=True) }}"
  - package:
      name: b
    requirements:
      run:
        - "${{ pin_subpackage('a', exact=True) }}"
"#;
    let err = render(&recipe(text), &VariantConfig::new(), &ctx("linux-64")).unwrap_err();
    assert!(matches!(err, Error::GraphError(_)));
}

#[test]
fn test_pin_compatible() {
    let text = r#"
package:
  name: foo
  version: "1.0"
requirements:
  host:
    - numpy
  run:
    - "${{ pin_compatible('numpy', max_pin='x.x') }}"
"#;
    let variants = VariantConfig::new().with_variant("numpy", ["1.26.4"]);
    let rendered = render(&recipe(text), &variants, &ctx("linux-64")).unwrap();
    assert_eq!(rendered[0].requirements.host, vec!["numpy 1.26.4.*"]);
    assert_eq!(rendered[0].requirements.run, vec!["numpy >=1.26.4,<1.27.0a0"]);
}

#[test]
fn test_pin_outside_requirements_is_rejected() {
    let text = r#"
package:
  name: foo
  version: "1.0"
build:
  script:
    - echo ${{ pin_subpackage('foo') }}
"#;
    let err = render(&recipe(text), &VariantConfig::new(), &ctx("linux-64")).unwrap_err();
    assert!(matches!(err, Error::EvaluationError { .. }));
}

#[test]
fn test_duplicate_package_names() {
    let text = r#"
recipe:
  version: "1.0"
outputs:
  - package:
      name: foo
  - package:
      name: foo
"#;
    let err = render(&recipe(text), &VariantConfig::new(), &ctx("linux-64")).unwrap_err();
    assert!(matches!(err, Error::GraphError(_)));
}

const STAGING: &str = r#"
recipe:
  version: "2.0"
outputs:
  - staging:
      name: core-build
    source:
      url: https://example.com/core-2.0.tar.gz
    build:
      script:
        - make
    requirements:
      build:
        - ${{ compiler('c') }}
  - package:
      name: libcore
    inherit: core-build
  - package:
      name: core-py
    inherit: core-build
    requirements:
      host:
        - python
"#;

fn experimental() -> RenderContext {
    let mut ctx = ctx("linux-64");
    ctx.experimental = true;
    ctx
}

#[test]
fn test_staging_requires_experimental() {
    let err = render(&recipe(STAGING), &VariantConfig::new(), &ctx("linux-64")).unwrap_err();
    assert!(matches!(err, Error::ParseError { .. }));
    assert_eq!(err.location(), Some("outputs[0].staging"));
}

#[test]
fn test_staging_caches_are_shared() {
    let variants = VariantConfig::new().with_variant("python", ["3.11", "3.12"]);
    let mut registry = CacheRegistry::new();
    let rendered =
        render_with_cache(&recipe(STAGING), &variants, &experimental(), &mut registry).unwrap();

    assert_eq!(names(&rendered), vec!["libcore", "core-py", "core-py"]);
    assert_eq!(registry.len(), 1);

    let first = &rendered[0].staging_caches[0];
    assert!(rendered.iter().all(|v| Arc::ptr_eq(&v.staging_caches[0], first)));
    assert_eq!(first.name, "core-build");
    assert_eq!(first.build.script, vec!["make"]);
    assert_eq!(first.requirements.build, vec!["gcc_linux-64"]);
    assert_eq!(rendered[1].inherits_from.as_deref(), Some("core-build"));
    // staging sources stay with the staging build
    assert!(rendered.iter().all(|v| v.sources.is_empty()));
}

#[test]
fn test_inheritors_carry_staging_keys() {
    let variants = VariantConfig::new().with_variant("c_compiler", ["gcc", "clang"]);
    let rendered = render(&recipe(STAGING), &variants, &experimental()).unwrap();

    assert_eq!(names(&rendered), vec!["libcore", "libcore", "core-py", "core-py"]);
    assert!(rendered.iter().all(|v| v.used_variant.contains_key("c_compiler")));
    assert_ne!(rendered[0].staging_caches[0].hash_info, rendered[1].staging_caches[0].hash_info);
}

#[test]
fn test_unknown_inherit_target() {
    let text = r#"
recipe:
  version: "1.0"
outputs:
  - package:
      name: foo
    inherit: nothing
"#;
    let err = render(&recipe(text), &VariantConfig::new(), &experimental()).unwrap_err();
    assert!(matches!(err, Error::GraphError(_)));
    assert!(err.to_string().contains("unknown inherit target"));
}

#[test]
fn test_render_is_deterministic() {
    let variants = VariantConfig::new()
        .with_variant("python", ["3.11", "3.12"])
        .with_variant("c_compiler", ["gcc", "clang"]);
    let first = render(&recipe(STAGING), &variants, &experimental()).unwrap();
    let second = render(&recipe(STAGING), &variants, &experimental()).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_inline_condition_without_else_drops_entry() {
    let text = r#"
package:
  name: foo
  version: "1.0"
requirements:
  run:
    - ${{ "winpkg" if win }}
    - bar
"#;
    let linux = render(&recipe(text), &VariantConfig::new(), &ctx("linux-64")).unwrap();
    assert_eq!(linux[0].requirements.run, vec!["bar"]);

    let windows = render(&recipe(text), &VariantConfig::new(), &ctx("win-64")).unwrap();
    assert_eq!(windows[0].requirements.run, vec!["winpkg", "bar"]);
}

#[test]
fn test_ignore_keys_apply_to_inherited_keys() {
    let text = r#"
recipe:
  version: "1.0"
outputs:
  - staging:
      name: core
    requirements:
      build:
        - ${{ compiler('c') }}
  - package:
      name: lib
    inherit: core
    build:
      variant:
        ignore_keys:
          - c_compiler
"#;
    let variants = VariantConfig::new().with_variant("c_compiler", ["gcc", "clang"]);
    let rendered = render(&recipe(text), &variants, &experimental()).unwrap();

    assert_eq!(names(&rendered), vec!["lib"]);
    assert!(!rendered[0].used_variant.contains_key("c_compiler"));
}

#[test]
fn test_range_pin_follows_computed_sibling_version() {
    let text = r#"
recipe:
  version: "1.0"
outputs:
  - package:
      name: x
      version: ${{ python }}
    requirements:
      host:
        - python
  - package:
      name: y
    requirements:
      run:
        - ${{ pin_subpackage('x') }}
"#;
    let variants = VariantConfig::new().with_variant("python", ["3.11", "3.12"]);
    let rendered = render(&recipe(text), &variants, &ctx("linux-64")).unwrap();

    assert_eq!(names(&rendered), vec!["x", "x", "y", "y"]);
    assert_eq!(rendered[2].requirements.run, vec!["x >=3.11,<4.0a0"]);
    assert_eq!(rendered[3].requirements.run, vec!["x >=3.12,<4.0a0"]);
    assert_eq!(rendered[2].used_variant["x"], Value::Str("3.11".into()));
    assert!(!rendered[2].used_variant.contains_key("python"));
    assert_ne!(rendered[2].hash_info, rendered[3].hash_info);
}

#[test]
fn test_range_pin_to_literal_version_is_not_hashed() {
    let variants = VariantConfig::new().with_variant("python", ["3.11"]);
    let text = r#"
recipe:
  version: "1.0"
outputs:
  - package:
      name: x
  - package:
      name: y
    requirements:
      run:
        - ${{ pin_subpackage('x') }}
"#;
    let rendered = render(&recipe(text), &variants, &ctx("linux-64")).unwrap();
    assert_eq!(rendered[1].requirements.run, vec!["x >=1.0,<2.0a0"]);
    assert!(!rendered[1].used_variant.contains_key("x"));
}

struct CountingEvaluator {
    inner: MiniJinjaEvaluator,
    calls: Arc<AtomicUsize>,
}

impl ExpressionEvaluator for CountingEvaluator {
    fn evaluate(&self, expr: &str, context: &Context) -> recipe_render::Result<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.inner.evaluate(expr, context)
    }
}

#[test]
fn test_outputs_expand_only_their_own_keys() {
    let mut text = String::from("recipe:\n  version: \"1.0\"\noutputs:\n");
    let mut variants = VariantConfig::new();
    for i in 0..8 {
        text.push_str(&format!("  - package:\n      name: out{i}\n"));
        text.push_str(&format!("    build:\n      script:\n        - echo ${{{{ k{i} }}}}\n"));
        text.push_str(&format!("    requirements:\n      host:\n        - k{i}\n"));
        variants = variants.with_variant(format!("k{i}"), ["1", "2", "3", "4"]);
    }
    let recipe = recipe(&text);
    let context = ctx("linux-64");
    let calls = Arc::new(AtomicUsize::new(0));
    let counting = CountingEvaluator {
        inner: MiniJinjaEvaluator::new(false),
        calls: Arc::clone(&calls),
    };
    let renderer = Renderer::new(&recipe, &variants, &context)
        .unwrap()
        .with_evaluator(Box::new(counting));

    for id in renderer.graph().build_order() {
        assert_eq!(renderer.combinations(*id).unwrap().len(), 4);
    }
    let rendered = renderer.render(&mut CacheRegistry::new()).unwrap();

    assert_eq!(rendered.len(), 32);
    assert_eq!(calls.load(Ordering::Relaxed), 32);
    assert_eq!(rendered[0].build.script, vec!["echo 1"]);
    assert_eq!(rendered[0].requirements.host, vec!["k0 1.*"]);
}
