//! Static analysis of which variant keys an output depends on.
//!
//! The analysis looks at expressions without evaluating them, so both
//! branches of a selector count. Keys are found through:
//! - variables read by expressions and selector/skip conditions
//! - `compiler('c')` / `stdlib('c')` arguments (`c_compiler`, `c_compiler_version`, ...)
//! - `pin_compatible('name')` arguments
//! - bare `build`/`host` requirement names that are variant keys
//! - recipe `context` entries, transitively

use crate::error::Result;
use crate::stage0::{OutputTemplate, TemplateRecipe};
use crate::variant::VariantConfig;
use indexmap::IndexMap;
use minijinja::Environment;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Environment used only to parse expressions; it never evaluates anything.
static SCANNER: LazyLock<Environment<'static>> = LazyLock::new(Environment::new);

static TOOLCHAIN_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(compiler|stdlib)\(\s*['"]([A-Za-z0-9_]+)['"]"#).expect("valid toolchain regex")
});

static PIN_COMPATIBLE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bpin_compatible\(\s*['"]([^'"]+)['"]"#).expect("valid pin_compatible regex")
});

/// Group 1 is absent when the name argument is not a string literal.
static PIN_SUBPACKAGE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bpin_subpackage\(\s*(?:['"]([^'"]+)['"])?"#).expect("valid pin_subpackage regex")
});

static BARE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("valid package name regex"));

/// Whether a requirement entry is a package name without any version spec.
pub fn is_bare_name(entry: &str) -> bool {
    BARE_NAME.is_match(entry)
}

/// Names of the free variables an expression reads, as reported by
/// MiniJinja. Called functions show up as well; they never match a variant
/// key.
///
/// # Errors
/// * The MiniJinja syntax error if the expression does not compile
pub fn referenced_variables(expr: &str) -> std::result::Result<BTreeSet<String>, minijinja::Error> {
    let compiled = SCANNER.compile_expression_owned(expr.to_string())?;
    Ok(compiled.undeclared_variables(false).into_iter().collect())
}

/// Every key name an expression may depend on, before matching against the
/// variant configuration.
pub fn expression_keys(expr: &str) -> Result<BTreeSet<String>> {
    let mut keys = referenced_variables(expr)?;
    for captures in TOOLCHAIN_CALL.captures_iter(expr) {
        let (kind, lang) = (&captures[1], &captures[2]);
        keys.insert(format!("{lang}_{kind}"));
        keys.insert(format!("{lang}_{kind}_version"));
    }
    for captures in PIN_COMPATIBLE_CALL.captures_iter(expr) {
        keys.insert(captures[1].to_string());
    }
    Ok(keys)
}

fn collect_keys<'a>(expressions: impl IntoIterator<Item = &'a str>) -> Result<BTreeSet<String>> {
    let mut keys = BTreeSet::new();
    for expr in expressions {
        keys.extend(expression_keys(expr)?);
    }
    Ok(keys)
}

/// Key sets per recipe `context` entry, with references to earlier entries
/// expanded.
pub fn context_dependencies(recipe: &TemplateRecipe) -> Result<IndexMap<String, BTreeSet<String>>> {
    let mut closure: IndexMap<String, BTreeSet<String>> = IndexMap::new();
    for (name, node) in &recipe.context {
        let mut expressions = Vec::new();
        node.for_each_expression(&mut |expr| expressions.push(expr));
        let mut keys = collect_keys(expressions)?;
        let inherited: Vec<String> = keys
            .iter()
            .filter_map(|key| closure.get(key))
            .flatten()
            .cloned()
            .collect();
        keys.extend(inherited);
        closure.insert(name.clone(), keys);
    }
    Ok(closure)
}

/// Variant keys referenced anywhere in the recipe `context` block.
pub fn context_keys(
    context: &IndexMap<String, BTreeSet<String>>,
    variants: &VariantConfig,
) -> BTreeSet<String> {
    context
        .values()
        .flatten()
        .filter(|key| variants.contains_key(key))
        .cloned()
        .collect()
}

/// Variant keys an output needs values for while it is evaluated: automatic
/// references plus `use_keys`. `ignore_keys` are not removed here.
pub fn evaluated_keys(
    output: &OutputTemplate,
    context: &IndexMap<String, BTreeSet<String>>,
    variants: &VariantConfig,
) -> Result<BTreeSet<String>> {
    let mut expressions = Vec::new();
    output.for_each_expression(&mut |expr| expressions.push(expr));
    let mut names = collect_keys(expressions)?;

    let through_context: Vec<String> = names
        .iter()
        .filter_map(|name| context.get(name))
        .flatten()
        .cloned()
        .collect();
    names.extend(through_context);

    for section in [&output.requirements.build, &output.requirements.host].into_iter().flatten() {
        names.extend(
            section
                .literal_entries()
                .into_iter()
                .filter(|entry| is_bare_name(entry))
                .map(str::to_string),
        );
    }

    let mut keys: BTreeSet<String> =
        names.into_iter().filter(|name| variants.contains_key(name)).collect();
    keys.extend(output.build.use_keys.iter().cloned());
    Ok(keys)
}

/// Variant keys an output references on its own: automatic references plus
/// `use_keys`, minus `ignore_keys`. Inherited staging keys are added by the
/// renderer, which removes `ignore_keys` again afterwards.
pub fn output_keys(
    output: &OutputTemplate,
    context: &IndexMap<String, BTreeSet<String>>,
    variants: &VariantConfig,
) -> Result<BTreeSet<String>> {
    let mut keys = evaluated_keys(output, context, variants)?;
    for ignored in &output.build.ignore_keys {
        keys.remove(ignored);
    }
    Ok(keys)
}

/// Literal names passed to `pin_subpackage` anywhere in the output.
///
/// Returns `None` when some call passes a computed name, so the target
/// cannot be known before evaluation.
pub fn pinned_names(output: &OutputTemplate) -> Option<BTreeSet<String>> {
    let mut expressions = Vec::new();
    output.for_each_expression(&mut |expr| expressions.push(expr));

    let mut names = BTreeSet::new();
    for expr in expressions {
        for captures in PIN_SUBPACKAGE_CALL.captures_iter(expr) {
            names.insert(captures.get(1)?.as_str().to_string());
        }
    }
    Some(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(expr: &str) -> BTreeSet<String> {
        referenced_variables(expr).unwrap()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_variables() {
        assert_eq!(vars("python"), set(&["python"]));
        assert_eq!(vars("name ~ '-' ~ version"), set(&["name", "version"]));
    }

    #[test]
    fn test_non_variables_are_skipped() {
        assert_eq!(vars("version | replace('.', '_')"), set(&["version"]));
        assert_eq!(vars("pkg.name"), set(&["pkg"]));
        assert_eq!(vars("x is defined"), set(&["x"]));
        assert_eq!(vars("'python' if win else none"), set(&["win"]));
        assert_eq!(vars("a == 1.5"), set(&["a"]));

        let call = vars("pin_subpackage('foo', exact=True)");
        assert!(!call.contains("foo"));
        assert!(!call.contains("exact"));
    }

    #[test]
    fn test_malformed_expression() {
        assert!(referenced_variables("a +").is_err());
        assert!(expression_keys("(python").is_err());
    }

    #[test]
    fn test_function_argument_keys() {
        let keys = expression_keys("compiler('cxx')").unwrap();
        assert!(keys.contains("cxx_compiler"));
        assert!(keys.contains("cxx_compiler_version"));

        let keys = expression_keys("pin_compatible('numpy', max_pin='x.x')").unwrap();
        assert!(keys.contains("numpy"));
    }

    #[test]
    fn test_bare_names() {
        assert!(is_bare_name("python"));
        assert!(is_bare_name("libxml2-devel"));
        assert!(!is_bare_name("python >=3.9"));
        assert!(!is_bare_name("numpy 1.26.*"));
    }

    #[test]
    fn test_pinned_names() {
        let recipe = TemplateRecipe::from_yaml_str(
            r#"
package:
  name: foo
  version: "1.0"
requirements:
  run:
    - ${{ pin_subpackage('libfoo', exact=True) }}
    - ${{ pin_subpackage("libbar") }}
"#,
        )
        .unwrap();
        assert_eq!(pinned_names(&recipe.outputs[0]), Some(set(&["libbar", "libfoo"])));

        let recipe = TemplateRecipe::from_yaml_str(
            "package:\n  name: foo\n  version: '1.0'\nrequirements:\n  run:\n    - ${{ pin_subpackage(name ~ '-libs') }}\n",
        )
        .unwrap();
        assert_eq!(pinned_names(&recipe.outputs[0]), None);
    }
}
