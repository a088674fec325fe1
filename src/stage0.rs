//! Stage0: the parsed, unevaluated template recipe.
//!
//! Leaves are literals or `${{ }}` templates; list entries may be
//! `if/then/else` selectors. Nothing here depends on a platform or a variant,
//! so one [`TemplateRecipe`] is rendered any number of times.

use crate::error::Result;
use crate::template::ScalarTemplate;
use crate::value::Value;
use indexmap::IndexMap;

/// A node of the recipe tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Value),
    Template(ScalarTemplate),
    Sequence(Vec<Item>),
    Mapping(IndexMap<String, Node>),
}

/// An entry of a sequence node.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Node(Node),
    Conditional(Conditional),
}

/// `- if: <condition> then: <node> else: <node>`
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub condition: String,
    pub then: Node,
    pub otherwise: Option<Node>,
}

impl Node {
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Literal(Value::Null))
    }

    pub fn as_literal_str(&self) -> Option<&str> {
        match self {
            Node::Literal(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Node>> {
        match self {
            Node::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Calls `f` with every expression in the subtree: the bodies of
    /// `${{ }}` templates and selector conditions.
    pub fn for_each_expression<'a>(&'a self, f: &mut dyn FnMut(&'a str)) {
        match self {
            Node::Literal(_) => {}
            Node::Template(template) => template.expressions().for_each(|expr| f(expr)),
            Node::Sequence(items) => {
                for item in items {
                    match item {
                        Item::Node(node) => node.for_each_expression(f),
                        Item::Conditional(cond) => {
                            f(&cond.condition);
                            cond.then.for_each_expression(f);
                            if let Some(otherwise) = &cond.otherwise {
                                otherwise.for_each_expression(f);
                            }
                        }
                    }
                }
            }
            Node::Mapping(map) => map.values().for_each(|node| node.for_each_expression(f)),
        }
    }

    /// Literal strings reachable as list entries, including both branches of
    /// selectors. Used to spot bare requirement names.
    pub fn literal_entries(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_literal_entries(self, &mut out);
        out
    }
}

fn collect_literal_entries<'a>(node: &'a Node, out: &mut Vec<&'a str>) {
    match node {
        Node::Literal(Value::Str(s)) => out.push(s),
        Node::Sequence(items) => {
            for item in items {
                match item {
                    Item::Node(node) => collect_literal_entries(node, out),
                    Item::Conditional(cond) => {
                        collect_literal_entries(&cond.then, out);
                        if let Some(otherwise) = &cond.otherwise {
                            collect_literal_entries(otherwise, out);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Produces a reusable build-artifact cache, never a shippable package.
    Staging,
    Package,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildTemplate {
    pub number: Option<Node>,
    pub string: Option<Node>,
    pub script: Option<Node>,
    pub noarch: Option<Node>,
    pub skip: Option<Node>,
    pub use_keys: Vec<String>,
    pub ignore_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequirementsTemplate {
    pub build: Option<Node>,
    pub host: Option<Node>,
    pub run: Option<Node>,
}

impl RequirementsTemplate {
    pub fn sections(&self) -> impl Iterator<Item = (&'static str, &Node)> {
        [("build", &self.build), ("host", &self.host), ("run", &self.run)]
            .into_iter()
            .filter_map(|(name, node)| node.as_ref().map(|node| (name, node)))
    }
}

/// One `staging` or `package` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTemplate {
    pub kind: OutputKind,
    /// Field path prefix, e.g. `outputs[1]`; empty for single-output recipes.
    pub path: String,
    pub name: Node,
    pub version: Option<Node>,
    pub inherit: Option<String>,
    pub source: Option<Node>,
    pub build: BuildTemplate,
    pub requirements: RequirementsTemplate,
    pub about: Option<Node>,
}

impl OutputTemplate {
    pub fn field_path(&self, field: &str) -> String {
        if self.path.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.path, field)
        }
    }

    /// Literal name, always present for staging outputs.
    pub fn static_name(&self) -> Option<&str> {
        self.name.as_literal_str()
    }

    /// Calls `f` with every expression the output evaluates.
    pub fn for_each_expression<'a>(&'a self, f: &mut dyn FnMut(&'a str)) {
        let build = &self.build;
        let nodes = [
            Some(&self.name),
            self.version.as_ref(),
            self.source.as_ref(),
            build.number.as_ref(),
            build.string.as_ref(),
            build.script.as_ref(),
            build.noarch.as_ref(),
            build.skip.as_ref(),
            self.requirements.build.as_ref(),
            self.requirements.host.as_ref(),
            self.requirements.run.as_ref(),
            self.about.as_ref(),
        ];
        for node in nodes.into_iter().flatten() {
            node.for_each_expression(f);
        }
        // bare skip conditions are expressions even without `${{ }}`
        if let Some(skip) = &build.skip {
            for entry in skip.literal_entries() {
                f(entry);
            }
        }
    }
}

/// The parsed recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRecipe {
    pub context: IndexMap<String, Node>,
    pub outputs: Vec<OutputTemplate>,
}

impl TemplateRecipe {
    /// Parses recipe text. See [`crate::parser::parse_recipe`].
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        crate::parser::parse_recipe(text)
    }

    pub fn has_staging(&self) -> bool {
        self.outputs.iter().any(|output| output.kind == OutputKind::Staging)
    }
}
