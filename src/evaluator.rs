//! Expression evaluation for recipe templates.
//! Wraps MiniJinja expressions behind a small trait and implements the
//! coercion rules for `${{ }}` scalars and `if/then/else` selectors.
use crate::error::{Error, Result};
use crate::hash::short_version;
use crate::pin::{Pin, PinArgs, PinKind};
use crate::stage0::{Item, Node};
use crate::template::{ScalarTemplate, Segment};
use crate::value::{Mapping, Value};
use log::debug;
use minijinja::value::{Kwargs, Value as JinjaValue};
use minijinja::{Environment, ErrorKind, State, UndefinedBehavior};

/// Variables visible to expressions.
pub type Context = Mapping;

/// Trait for expression evaluation engines.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates a bare expression (the text between `${{` and `}}`).
    ///
    /// # Arguments
    /// * `expr` - Expression source
    /// * `context` - Variables visible to the expression
    ///
    /// # Returns
    /// * `Result<Value>` - The expression's value
    fn evaluate(&self, expr: &str, context: &Context) -> Result<Value>;
}

/// MiniJinja-based expression evaluator with the recipe built-ins.
pub struct MiniJinjaEvaluator {
    env: Environment<'static>,
    allow_undefined: bool,
}

impl MiniJinjaEvaluator {
    /// Creates an evaluator.
    ///
    /// # Arguments
    /// * `allow_undefined` - Undefined variables evaluate to null instead of failing
    pub fn new(allow_undefined: bool) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(if allow_undefined {
            UndefinedBehavior::Chainable
        } else {
            UndefinedBehavior::Strict
        });
        env.add_function("compiler", compiler);
        env.add_function("stdlib", stdlib);
        env.add_function("pin_subpackage", pin_subpackage);
        env.add_function("pin_compatible", pin_compatible);
        env.add_filter("version_to_buildstring", version_to_buildstring);
        Self { env, allow_undefined }
    }

    /// Registered functions and MiniJinja's builtin globals.
    fn is_global(&self, name: &str) -> bool {
        self.env.globals().any(|(global, _)| global == name)
    }
}

impl Default for MiniJinjaEvaluator {
    fn default() -> Self {
        MiniJinjaEvaluator::new(false)
    }
}

impl ExpressionEvaluator for MiniJinjaEvaluator {
    /// # Errors
    /// * `Error::EvaluationError` if:
    ///   - The expression does not compile
    ///   - A variable is undefined and undefined values are not allowed
    ///   - A built-in rejects its arguments
    fn evaluate(&self, expr: &str, context: &Context) -> Result<Value> {
        let compiled = self
            .env
            .compile_expression_owned(expr.to_string())
            .map_err(|e| expression_error(e, expr))?;
        let result = compiled.eval(context).map_err(|e| expression_error(e, expr))?;
        if !result.is_undefined() {
            return Ok(Value::from(&result));
        }

        // `"x" if cond` without `else` is undefined when `cond` is false; only
        // a variable missing from the context is an error.
        let missing = compiled
            .undeclared_variables(false)
            .into_iter()
            .filter(|name| !context.contains_key(name) && !self.is_global(name))
            .min();
        match missing {
            Some(name) if !self.allow_undefined => {
                Err(Error::evaluation(format!("'{name}' is undefined (in '{expr}')")))
            }
            _ => {
                debug!("Expression '{expr}' is undefined; using null");
                Ok(Value::Null)
            }
        }
    }
}

fn expression_error(err: minijinja::Error, expr: &str) -> Error {
    match Error::from(err) {
        Error::EvaluationError { message, location } => Error::EvaluationError {
            message: format!("{message} (in '{expr}')"),
            location,
        },
        other => other,
    }
}

/// Default toolchain package names per target OS: (linux, osx, win).
fn default_toolchain(kind: &str, lang: &str) -> Option<(&'static str, &'static str, &'static str)> {
    match (kind, lang) {
        ("compiler", "c") => Some(("gcc", "clang", "vs2017")),
        ("compiler", "cxx") => Some(("gxx", "clangxx", "vs2017")),
        ("compiler", "fortran") => Some(("gfortran", "gfortran", "flang")),
        ("stdlib", "c") => Some(("sysroot", "macosx_deployment_target", "vs")),
        _ => None,
    }
}

fn compiler(state: &State, lang: String) -> std::result::Result<String, minijinja::Error> {
    toolchain(state, &lang, "compiler")
}

fn stdlib(state: &State, lang: String) -> std::result::Result<String, minijinja::Error> {
    toolchain(state, &lang, "stdlib")
}

fn pin_subpackage(name: String, kwargs: Kwargs) -> std::result::Result<String, minijinja::Error> {
    pin_marker(name, kwargs, PinKind::Subpackage)
}

fn pin_compatible(name: String, kwargs: Kwargs) -> std::result::Result<String, minijinja::Error> {
    pin_marker(name, kwargs, PinKind::Compatible)
}

fn version_to_buildstring(value: JinjaValue) -> String {
    short_version(&value.to_string())
}

/// `"{name}_{target_platform}"`, followed by `" {version}"` when one is set.
fn toolchain(state: &State, lang: &str, kind: &str) -> std::result::Result<String, minijinja::Error> {
    let lookup = |name: &str| {
        state
            .lookup(name)
            .filter(|value| !value.is_undefined() && !value.is_none())
            .map(|value| value.to_string())
    };
    let target_platform = lookup("target_platform").ok_or_else(|| {
        minijinja::Error::new(ErrorKind::InvalidOperation, "target_platform is not set")
    })?;

    let name = match lookup(&format!("{lang}_{kind}")) {
        Some(name) => name,
        None => {
            let os = target_platform.split('-').next().unwrap_or_default();
            match default_toolchain(kind, lang) {
                Some((_, osx, _)) if os == "osx" => osx.to_string(),
                Some((_, _, win)) if os == "win" => win.to_string(),
                Some((linux, _, _)) => linux.to_string(),
                None => lang.to_string(),
            }
        }
    };

    Ok(match lookup(&format!("{lang}_{kind}_version")) {
        Some(version) => format!("{name}_{target_platform} {version}"),
        None => format!("{name}_{target_platform}"),
    })
}

fn pin_marker(
    name: String,
    kwargs: Kwargs,
    kind: PinKind,
) -> std::result::Result<String, minijinja::Error> {
    let defaults = PinArgs::default();
    // an explicit `None` drops a bound, a missing argument keeps the default
    let optional = |key: &str, default: Option<String>| {
        if kwargs.has(key) {
            kwargs.get::<Option<String>>(key)
        } else {
            Ok(default)
        }
    };
    let args = PinArgs {
        min_pin: optional("min_pin", defaults.min_pin)?,
        max_pin: optional("max_pin", defaults.max_pin)?,
        lower_bound: optional("lower_bound", None)?,
        upper_bound: optional("upper_bound", None)?,
        exact: kwargs.get::<Option<bool>>("exact")?.unwrap_or(false),
    };
    // rejects unknown keyword arguments
    kwargs.assert_all_used()?;

    Ok(Pin { name, args }.to_marker(kind))
}

/// Evaluates a scalar template.
///
/// A scalar that is exactly one expression yields that expression's value;
/// anything else is interpolated into a string.
pub fn evaluate_scalar(
    evaluator: &dyn ExpressionEvaluator,
    template: &ScalarTemplate,
    context: &Context,
    path: &str,
) -> Result<Value> {
    if let Some(expr) = template.single_expression() {
        return evaluator.evaluate(expr, context).map_err(|e| e.at(path));
    }

    let mut out = String::new();
    for segment in template.segments() {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Expr(expr) => {
                let value = evaluator.evaluate(expr, context).map_err(|e| e.at(path))?;
                out.push_str(&value.to_interpolated());
            }
        }
    }
    Ok(Value::Str(out))
}

/// Evaluates a selector condition to its truthiness.
pub fn evaluate_condition(
    evaluator: &dyn ExpressionEvaluator,
    condition: &str,
    context: &Context,
    path: &str,
) -> Result<bool> {
    evaluator
        .evaluate(condition, context)
        .map(|value| value.is_truthy())
        .map_err(|e| e.at(path))
}

/// Evaluates a node tree. Selectors whose branch is a list splice its entries
/// into the parent list; a false selector without `else` contributes nothing.
pub fn evaluate_node(
    evaluator: &dyn ExpressionEvaluator,
    node: &Node,
    context: &Context,
    path: &str,
) -> Result<Value> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Template(template) => evaluate_scalar(evaluator, template, context, path),
        Node::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                match item {
                    Item::Node(node) => out.push(evaluate_node(evaluator, node, context, &item_path)?),
                    Item::Conditional(cond) => {
                        let chosen = if evaluate_condition(evaluator, &cond.condition, context, &item_path)? {
                            Some((&cond.then, "then"))
                        } else {
                            cond.otherwise.as_ref().map(|node| (node, "else"))
                        };
                        let Some((branch, key)) = chosen else { continue };
                        let branch_path = format!("{item_path}.{key}");
                        match evaluate_node(evaluator, branch, context, &branch_path)? {
                            Value::List(values) if matches!(branch, Node::Sequence(_)) => {
                                out.extend(values)
                            }
                            value => out.push(value),
                        }
                    }
                }
            }
            Ok(Value::List(out))
        }
        Node::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, child) in map {
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                out.insert(key.clone(), evaluate_node(evaluator, child, context, &child_path)?);
            }
            Ok(Value::Mapping(out))
        }
    }
}

/// Evaluates a `build.skip` node: a boolean, a bare condition, a template or
/// a list of conditions where any true entry skips.
pub fn evaluate_skip(
    evaluator: &dyn ExpressionEvaluator,
    node: &Node,
    context: &Context,
    path: &str,
) -> Result<bool> {
    match node {
        Node::Literal(Value::Bool(skip)) => Ok(*skip),
        Node::Literal(Value::Str(condition)) => {
            evaluate_condition(evaluator, condition, context, path)
        }
        Node::Literal(value) => Ok(value.is_truthy()),
        Node::Template(template) => {
            Ok(evaluate_scalar(evaluator, template, context, path)?.is_truthy())
        }
        Node::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                let skip = match item {
                    Item::Node(node) => evaluate_skip(evaluator, node, context, &item_path)?,
                    Item::Conditional(cond) => {
                        if evaluate_condition(evaluator, &cond.condition, context, &item_path)? {
                            evaluate_skip(evaluator, &cond.then, context, &item_path)?
                        } else if let Some(otherwise) = &cond.otherwise {
                            evaluate_skip(evaluator, otherwise, context, &item_path)?
                        } else {
                            false
                        }
                    }
                };
                if skip {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Node::Mapping(_) => Err(Error::parse(path, "expected a condition or a list of conditions")),
    }
}
