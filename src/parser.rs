//! Recipe text parsing.
//!
//! Turns recipe YAML into a [`TemplateRecipe`]. Everything that can be checked
//! without evaluating an expression is checked here: unknown keys, the shape of
//! selectors, the types of literal leaves and the syntax of `${{ }}` blocks.
//! Errors carry the dotted field path of the offending node.

use crate::error::{Error, Result};
use crate::stage0::{
    BuildTemplate, Conditional, Item, Node, OutputKind, OutputTemplate, RequirementsTemplate,
    TemplateRecipe,
};
use crate::template::ScalarTemplate;
use crate::used_keys::referenced_variables;
use crate::value::{yaml_key_to_string, Value};
use indexmap::IndexMap;
use log::debug;
use regex::Regex;
use std::sync::LazyLock;

const TOP_LEVEL_KEYS: &[&str] =
    &["context", "package", "recipe", "source", "build", "requirements", "about", "outputs"];
const PACKAGE_OUTPUT_KEYS: &[&str] =
    &["package", "inherit", "source", "build", "requirements", "about"];
const STAGING_OUTPUT_KEYS: &[&str] = &["staging", "source", "build", "requirements"];
const PACKAGE_BUILD_KEYS: &[&str] = &["number", "string", "script", "noarch", "skip", "variant"];
const STAGING_BUILD_KEYS: &[&str] = &["script", "skip", "variant"];
const VARIANT_KEYS: &[&str] = &["use_keys", "ignore_keys"];
const PACKAGE_REQUIREMENT_KEYS: &[&str] = &["build", "host", "run"];
const STAGING_REQUIREMENT_KEYS: &[&str] = &["build", "host"];
const ABOUT_KEYS: &[&str] = &[
    "homepage",
    "license",
    "license_file",
    "summary",
    "description",
    "documentation",
    "repository",
];
const NOARCH_KINDS: &[&str] = &["python", "generic"];

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Parses recipe text into a [`TemplateRecipe`].
///
/// # Errors
/// * `Error::ParseError` for malformed YAML, unknown keys, misplaced selectors,
///   literal type mismatches and malformed `${{ }}` blocks
pub fn parse_recipe(text: &str) -> Result<TemplateRecipe> {
    let raw: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| yaml_error(&e))?;
    let mut root = match to_node(&raw, "")? {
        Node::Mapping(map) => map,
        other => {
            return Err(Error::parse(
                "<root>",
                format!("recipe must be a mapping, found {}", describe(&other)),
            ))
        }
    };
    check_keys(&root, TOP_LEVEL_KEYS, "")?;

    let context = parse_context(root.shift_remove("context"))?;
    let outputs = match root.shift_remove("outputs") {
        None => vec![parse_single_output(root)?],
        Some(outputs) => parse_multi_output(root, outputs)?,
    };

    debug!("Parsed recipe with {} context entries and {} outputs", context.len(), outputs.len());
    Ok(TemplateRecipe { context, outputs })
}

fn yaml_error(err: &serde_yaml::Error) -> Error {
    let path = match err.location() {
        Some(location) => format!("line {}, column {}", location.line(), location.column()),
        None => "<root>".to_string(),
    };
    Error::parse(path, err.to_string())
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

fn describe(node: &Node) -> &'static str {
    match node {
        Node::Literal(value) => value.type_name(),
        Node::Template(_) => "template",
        Node::Sequence(_) => "list",
        Node::Mapping(_) => "mapping",
    }
}

/// Converts raw YAML into a [`Node`], recognising selectors and templates.
pub fn to_node(value: &serde_yaml::Value, path: &str) -> Result<Node> {
    match value {
        serde_yaml::Value::String(s) => match ScalarTemplate::parse(s) {
            Ok(Some(template)) => {
                for expr in template.expressions() {
                    check_expression(expr, display_path(path))?;
                }
                Ok(Node::Template(template))
            }
            Ok(None) => Ok(Node::Literal(Value::Str(s.clone()))),
            Err(message) => Err(Error::parse(display_path(path), message)),
        },
        serde_yaml::Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                match item {
                    serde_yaml::Value::Mapping(map) if map.contains_key("if") => {
                        out.push(Item::Conditional(parse_conditional(map, &item_path)?));
                    }
                    other => out.push(Item::Node(to_node(other, &item_path)?)),
                }
            }
            Ok(Node::Sequence(out))
        }
        serde_yaml::Value::Mapping(map) => {
            if map.contains_key("if") && map.contains_key("then") {
                return Err(Error::parse(
                    display_path(path),
                    "if/then selectors are only allowed as list entries",
                ));
            }
            let mut out = IndexMap::with_capacity(map.len());
            for (key, child) in map {
                let key = yaml_key_to_string(key);
                let child = to_node(child, &join(path, &key))?;
                out.insert(key, child);
            }
            Ok(Node::Mapping(out))
        }
        serde_yaml::Value::Tagged(tagged) => to_node(&tagged.value, path),
        scalar => Ok(Node::Literal(
            Value::from_yaml_scalar(scalar, display_path(path)).unwrap_or_default(),
        )),
    }
}

/// Compiles an expression once so syntax errors carry the field path.
fn check_expression(expr: &str, path: &str) -> Result<()> {
    referenced_variables(expr).map(|_| ()).map_err(|e| {
        Error::parse(
            path,
            format!("invalid expression '{expr}': {}", e.detail().unwrap_or("syntax error")),
        )
    })
}

fn parse_conditional(map: &serde_yaml::Mapping, path: &str) -> Result<Conditional> {
    for key in map.keys() {
        let key = yaml_key_to_string(key);
        if !matches!(key.as_str(), "if" | "then" | "else") {
            return Err(Error::parse(
                join(path, &key),
                "unknown key in selector (expected if, then, else)",
            ));
        }
    }

    let condition = match map.get("if") {
        Some(serde_yaml::Value::String(s)) => match ScalarTemplate::parse(s) {
            Ok(None) => s.trim().to_string(),
            Ok(Some(template)) => match template.single_expression() {
                Some(expr) => expr.to_string(),
                None => {
                    return Err(Error::parse(
                        join(path, "if"),
                        "selector condition must be a single expression",
                    ))
                }
            },
            Err(message) => return Err(Error::parse(join(path, "if"), message)),
        },
        Some(serde_yaml::Value::Bool(b)) => b.to_string(),
        _ => {
            return Err(Error::parse(join(path, "if"), "selector condition must be a string"))
        }
    };

    check_expression(&condition, &join(path, "if"))?;

    let then = match map.get("then") {
        Some(then) => to_node(then, &join(path, "then"))?,
        None => return Err(Error::parse(path, "selector is missing 'then'")),
    };
    let otherwise = map.get("else").map(|node| to_node(node, &join(path, "else"))).transpose()?;

    Ok(Conditional { condition, then, otherwise })
}

fn check_keys(map: &IndexMap<String, Node>, allowed: &[&str], path: &str) -> Result<()> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(Error::parse(
                join(path, key),
                format!("unknown key '{}' (expected one of: {})", key, allowed.join(", ")),
            ));
        }
    }
    Ok(())
}

fn into_mapping(node: Node, path: &str) -> Result<IndexMap<String, Node>> {
    match node {
        Node::Mapping(map) => Ok(map),
        Node::Literal(Value::Null) => Ok(IndexMap::new()),
        other => Err(Error::parse(path, format!("expected a mapping, found {}", describe(&other)))),
    }
}

fn parse_context(node: Option<Node>) -> Result<IndexMap<String, Node>> {
    let Some(node) = node else {
        return Ok(IndexMap::new());
    };
    let map = into_mapping(node, "context")?;
    for key in map.keys() {
        if !IDENTIFIER.is_match(key) {
            return Err(Error::parse(
                join("context", key),
                "context keys must be valid identifiers",
            ));
        }
    }
    Ok(map)
}

fn parse_single_output(mut root: IndexMap<String, Node>) -> Result<OutputTemplate> {
    if root.contains_key("recipe") {
        return Err(Error::parse("recipe", "'recipe' is only allowed together with 'outputs'"));
    }
    let package = root
        .shift_remove("package")
        .ok_or_else(|| Error::parse("package", "missing 'package' section"))?;
    let (name, version) = parse_package(package, "package")?;
    let version = version.ok_or_else(|| Error::parse("package.version", "missing version"))?;

    let sections = OutputSections {
        source: root.shift_remove("source"),
        build: root.shift_remove("build"),
        requirements: root.shift_remove("requirements"),
        about: root.shift_remove("about"),
    };
    build_package_output(String::new(), name, version, None, sections)
}

fn parse_multi_output(
    mut root: IndexMap<String, Node>,
    outputs: Node,
) -> Result<Vec<OutputTemplate>> {
    for forbidden in ["package", "requirements"] {
        if root.contains_key(forbidden) {
            return Err(Error::parse(
                forbidden,
                format!("'{forbidden}' is not allowed at the top level of a multi-output recipe"),
            ));
        }
    }

    let mut default_version = None;
    if let Some(recipe) = root.shift_remove("recipe") {
        let mut recipe = into_mapping(recipe, "recipe")?;
        check_keys(&recipe, &["name", "version"], "recipe")?;
        if let Some(version) = recipe.shift_remove("version") {
            expect_scalar(&version, "recipe.version")?;
            default_version = Some(version);
        }
    }

    let defaults = OutputSections {
        source: root.shift_remove("source"),
        build: root.shift_remove("build"),
        requirements: None,
        about: root.shift_remove("about"),
    };

    let Node::Sequence(items) = outputs else {
        return Err(Error::parse("outputs", "expected a list of outputs"));
    };
    if items.is_empty() {
        return Err(Error::parse("outputs", "at least one output is required"));
    }

    let mut parsed = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let path = format!("outputs[{i}]");
        let Item::Node(node) = item else {
            return Err(Error::parse(path, "selectors are not supported around outputs"));
        };
        let map = into_mapping(node, &path)?;
        let output = if map.contains_key("staging") {
            parse_staging_output(map, path, &defaults)?
        } else if map.contains_key("package") {
            parse_package_output(map, path, &defaults, default_version.as_ref())?
        } else {
            return Err(Error::parse(path, "output needs either a 'package' or a 'staging' key"));
        };
        parsed.push(output);
    }
    Ok(parsed)
}

/// Sections shared by every output kind, before validation.
struct OutputSections {
    source: Option<Node>,
    build: Option<Node>,
    requirements: Option<Node>,
    about: Option<Node>,
}

fn parse_package(node: Node, path: &str) -> Result<(Node, Option<Node>)> {
    let mut package = into_mapping(node, path)?;
    check_keys(&package, &["name", "version"], path)?;
    let name = package
        .shift_remove("name")
        .ok_or_else(|| Error::parse(join(path, "name"), "missing name"))?;
    expect_string(&name, &join(path, "name"))?;
    let version = package.shift_remove("version");
    if let Some(version) = &version {
        expect_scalar(version, &join(path, "version"))?;
    }
    Ok((name, version))
}

fn parse_package_output(
    mut map: IndexMap<String, Node>,
    path: String,
    defaults: &OutputSections,
    default_version: Option<&Node>,
) -> Result<OutputTemplate> {
    check_keys(&map, PACKAGE_OUTPUT_KEYS, &path)?;
    let package = map.shift_remove("package").unwrap_or(Node::Literal(Value::Null));
    let (name, version) = parse_package(package, &join(&path, "package"))?;
    let version = version
        .or_else(|| default_version.cloned())
        .ok_or_else(|| Error::parse(join(&path, "package.version"), "missing version"))?;

    let inherit = match map.shift_remove("inherit") {
        None => None,
        Some(node) => match node.as_literal_str() {
            Some(target) => Some(target.to_string()),
            None => {
                return Err(Error::parse(
                    join(&path, "inherit"),
                    "inherit must name a staging output with a literal string",
                ))
            }
        },
    };

    // An inheriting package builds on the staging cache, not on the
    // top-level sources.
    let source = match map.shift_remove("source") {
        Some(source) => Some(source),
        None if inherit.is_none() => defaults.source.clone(),
        None => None,
    };

    let sections = OutputSections {
        source,
        build: merge_mappings(defaults.build.as_ref(), map.shift_remove("build")),
        requirements: map.shift_remove("requirements"),
        about: merge_mappings(defaults.about.as_ref(), map.shift_remove("about")),
    };
    build_package_output(path, name, version, inherit, sections)
}

fn build_package_output(
    path: String,
    name: Node,
    version: Node,
    inherit: Option<String>,
    sections: OutputSections,
) -> Result<OutputTemplate> {
    let build = parse_build(sections.build, &join(&path, "build"), PACKAGE_BUILD_KEYS)?;
    let requirements = parse_requirements(
        sections.requirements,
        &join(&path, "requirements"),
        PACKAGE_REQUIREMENT_KEYS,
    )?;
    let about = parse_about(sections.about, &join(&path, "about"))?;
    let source = parse_source(sections.source, &join(&path, "source"))?;

    Ok(OutputTemplate {
        kind: OutputKind::Package,
        path,
        name,
        version: Some(version),
        inherit,
        source,
        build,
        requirements,
        about,
    })
}

fn parse_staging_output(
    mut map: IndexMap<String, Node>,
    path: String,
    defaults: &OutputSections,
) -> Result<OutputTemplate> {
    check_keys(&map, STAGING_OUTPUT_KEYS, &path)?;
    let staging_path = join(&path, "staging");
    let mut staging = into_mapping(map.shift_remove("staging").unwrap_or(Node::Literal(Value::Null)), &staging_path)?;
    check_keys(&staging, &["name"], &staging_path)?;
    let name = staging
        .shift_remove("name")
        .ok_or_else(|| Error::parse(join(&staging_path, "name"), "missing name"))?;
    if name.as_literal_str().is_none() {
        return Err(Error::parse(
            join(&staging_path, "name"),
            "staging names must be literal strings",
        ));
    }

    let source = map.shift_remove("source").or_else(|| defaults.source.clone());
    let build = parse_build(map.shift_remove("build"), &join(&path, "build"), STAGING_BUILD_KEYS)?;
    let requirements = parse_requirements(
        map.shift_remove("requirements"),
        &join(&path, "requirements"),
        STAGING_REQUIREMENT_KEYS,
    )?;
    let source = parse_source(source, &join(&path, "source"))?;

    Ok(OutputTemplate {
        kind: OutputKind::Staging,
        path,
        name,
        version: None,
        inherit: None,
        source,
        build,
        requirements,
        about: None,
    })
}

/// Top-level defaults overlaid with the output's own keys.
fn merge_mappings(defaults: Option<&Node>, own: Option<Node>) -> Option<Node> {
    match (defaults, own) {
        (Some(Node::Mapping(defaults)), Some(Node::Mapping(own))) => {
            let mut merged = defaults.clone();
            merged.extend(own);
            Some(Node::Mapping(merged))
        }
        (_, Some(own)) => Some(own),
        (defaults, None) => defaults.cloned(),
    }
}

fn parse_build(node: Option<Node>, path: &str, allowed: &[&str]) -> Result<BuildTemplate> {
    let Some(node) = node else {
        return Ok(BuildTemplate::default());
    };
    let mut map = into_mapping(node, path)?;
    check_keys(&map, allowed, path)?;

    let number = map.shift_remove("number");
    if let Some(number) = &number {
        match number {
            Node::Literal(Value::Int(_)) | Node::Template(_) => {}
            other => {
                return Err(Error::parse(
                    join(path, "number"),
                    format!("expected an integer, found {}", describe(other)),
                ))
            }
        }
    }

    let string = map.shift_remove("string");
    if let Some(string) = &string {
        expect_string(string, &join(path, "string"))?;
    }

    let script = map.shift_remove("script");
    if let Some(script) = &script {
        match script {
            Node::Sequence(_) => expect_string_entries(script, &join(path, "script"))?,
            other => expect_string(other, &join(path, "script"))?,
        }
    }

    let noarch = map.shift_remove("noarch");
    if let Some(Node::Literal(value)) = &noarch {
        match value.as_str() {
            Some(kind) if NOARCH_KINDS.contains(&kind) => {}
            _ => {
                return Err(Error::parse(
                    join(path, "noarch"),
                    format!("noarch must be one of: {}", NOARCH_KINDS.join(", ")),
                ))
            }
        }
    }

    let skip = map.shift_remove("skip");
    if let Some(skip) = &skip {
        match skip {
            Node::Literal(Value::Bool(_)) | Node::Literal(Value::Str(_)) | Node::Template(_) => {}
            Node::Sequence(_) => expect_string_entries(skip, &join(path, "skip"))?,
            other => {
                return Err(Error::parse(
                    join(path, "skip"),
                    format!("expected a condition or a list of conditions, found {}", describe(other)),
                ))
            }
        }
    }

    if let Some(skip) = &skip {
        for condition in skip.literal_entries() {
            check_expression(condition, &join(path, "skip"))?;
        }
    }

    let (use_keys, ignore_keys) = match map.shift_remove("variant") {
        None => (Vec::new(), Vec::new()),
        Some(node) => {
            let variant_path = join(path, "variant");
            let mut variant = into_mapping(node, &variant_path)?;
            check_keys(&variant, VARIANT_KEYS, &variant_path)?;
            (
                literal_string_list(variant.shift_remove("use_keys"), &join(&variant_path, "use_keys"))?,
                literal_string_list(
                    variant.shift_remove("ignore_keys"),
                    &join(&variant_path, "ignore_keys"),
                )?,
            )
        }
    };

    Ok(BuildTemplate { number, string, script, noarch, skip, use_keys, ignore_keys })
}

fn parse_requirements(
    node: Option<Node>,
    path: &str,
    allowed: &[&str],
) -> Result<RequirementsTemplate> {
    let Some(node) = node else {
        return Ok(RequirementsTemplate::default());
    };
    let mut map = into_mapping(node, path)?;
    check_keys(&map, allowed, path)?;

    let mut section = |name: &str| -> Result<Option<Node>> {
        let section_path = join(path, name);
        match map.shift_remove(name) {
            None | Some(Node::Literal(Value::Null)) => Ok(None),
            Some(node @ Node::Sequence(_)) => {
                expect_string_entries(&node, &section_path)?;
                Ok(Some(node))
            }
            Some(node @ Node::Template(_)) => Ok(Some(node)),
            Some(other) => Err(Error::parse(
                section_path,
                format!("expected a list of requirements, found {}", describe(&other)),
            )),
        }
    };

    Ok(RequirementsTemplate { build: section("build")?, host: section("host")?, run: section("run")? })
}

fn parse_about(node: Option<Node>, path: &str) -> Result<Option<Node>> {
    let Some(node) = node else {
        return Ok(None);
    };
    let map = into_mapping(node, path)?;
    check_keys(&map, ABOUT_KEYS, path)?;
    for (key, value) in &map {
        if !value.is_null() {
            expect_string(value, &join(path, key))?;
        }
    }
    Ok(Some(Node::Mapping(map)))
}

fn parse_source(node: Option<Node>, path: &str) -> Result<Option<Node>> {
    match node {
        None | Some(Node::Literal(Value::Null)) => Ok(None),
        Some(node @ (Node::Mapping(_) | Node::Sequence(_) | Node::Template(_))) => Ok(Some(node)),
        Some(other) => Err(Error::parse(
            path,
            format!("expected a source mapping or a list of sources, found {}", describe(&other)),
        )),
    }
}

fn expect_string(node: &Node, path: &str) -> Result<()> {
    match node {
        Node::Literal(Value::Str(_)) | Node::Template(_) => Ok(()),
        other => Err(Error::parse(path, format!("expected a string, found {}", describe(other)))),
    }
}

/// Versions are commonly written as bare numbers.
fn expect_scalar(node: &Node, path: &str) -> Result<()> {
    match node {
        Node::Literal(Value::Str(_)) | Node::Literal(Value::Int(_)) | Node::Template(_) => Ok(()),
        other => Err(Error::parse(path, format!("expected a string, found {}", describe(other)))),
    }
}

/// Every literal entry of a sequence, selector branches included, must be a string.
fn expect_string_entries(node: &Node, path: &str) -> Result<()> {
    let Node::Sequence(items) = node else {
        return expect_string(node, path);
    };
    for (i, item) in items.iter().enumerate() {
        let item_path = format!("{path}[{i}]");
        match item {
            Item::Node(Node::Sequence(_)) => {
                return Err(Error::parse(item_path, "nested lists are not allowed here"))
            }
            Item::Node(node) => expect_string(node, &item_path)?,
            Item::Conditional(cond) => {
                expect_string_entries(&cond.then, &join(&item_path, "then"))?;
                if let Some(otherwise) = &cond.otherwise {
                    expect_string_entries(otherwise, &join(&item_path, "else"))?;
                }
            }
        }
    }
    Ok(())
}

fn literal_string_list(node: Option<Node>, path: &str) -> Result<Vec<String>> {
    let Some(node) = node else {
        return Ok(Vec::new());
    };
    let Node::Sequence(items) = node else {
        return Err(Error::parse(path, "expected a list of variant keys"));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Item::Node(Node::Literal(Value::Str(key))) => Ok(key),
            _ => Err(Error::parse(format!("{path}[{i}]"), "variant keys must be literal strings")),
        })
        .collect()
}
