//! Output graph for multi-output recipes.
//!
//! Outputs live in an arena indexed by [`OutputId`]; `inherit` references are
//! resolved to ids once, before any evaluation. The build order is a stable
//! topological sort in which every staging output precedes the packages that
//! inherit from it.

use crate::error::{Error, Result};
use crate::stage0::{OutputKind, TemplateRecipe};
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Index of an output in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub usize);

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "outputs[{}]", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNode {
    pub id: OutputId,
    pub kind: OutputKind,
    /// Literal output name, if the name is not templated.
    pub static_name: Option<String>,
    /// Staging output this package inherits from.
    pub inherit: Option<OutputId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGraph {
    nodes: Vec<OutputNode>,
    order: Vec<OutputId>,
}

impl OutputGraph {
    /// Resolves inherit edges and computes the build order.
    ///
    /// # Errors
    /// * `Error::GraphError` if:
    ///   - Two staging outputs share a name
    ///   - An `inherit` names no output, or names a package output
    ///   - The inherit edges form a cycle
    pub fn build(recipe: &TemplateRecipe) -> Result<Self> {
        let mut staging_by_name: HashMap<&str, OutputId> = HashMap::new();
        let mut by_name: HashMap<&str, OutputId> = HashMap::new();
        for (i, output) in recipe.outputs.iter().enumerate() {
            let Some(name) = output.static_name() else { continue };
            if output.kind == OutputKind::Staging
                && staging_by_name.insert(name, OutputId(i)).is_some()
            {
                return Err(Error::GraphError(format!("duplicate staging output '{name}'")));
            }
            by_name.entry(name).or_insert(OutputId(i));
        }

        let mut nodes = Vec::with_capacity(recipe.outputs.len());
        for (i, output) in recipe.outputs.iter().enumerate() {
            let inherit = match &output.inherit {
                None => None,
                Some(target) => match staging_by_name.get(target.as_str()) {
                    Some(id) => Some(*id),
                    None if by_name.contains_key(target.as_str()) => {
                        return Err(Error::GraphError(format!(
                            "'{}' inherits from '{target}', which is not a staging output",
                            output.field_path("inherit")
                        )));
                    }
                    None => {
                        return Err(Error::GraphError(format!(
                            "unknown inherit target '{target}' at '{}'",
                            output.field_path("inherit")
                        )));
                    }
                },
            };
            nodes.push(OutputNode {
                id: OutputId(i),
                kind: output.kind,
                static_name: output.static_name().map(str::to_string),
                inherit,
            });
        }

        let order = topological_order(&nodes)?;
        debug!("Output build order: {order:?}");
        Ok(Self { nodes, order })
    }

    pub fn node(&self, id: OutputId) -> &OutputNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[OutputNode] {
        &self.nodes
    }

    /// Outputs in build order.
    pub fn build_order(&self) -> &[OutputId] {
        &self.order
    }

    /// Package outputs inheriting from `staging`.
    pub fn dependents(&self, staging: OutputId) -> impl Iterator<Item = OutputId> + '_ {
        self.nodes
            .iter()
            .filter(move |node| node.inherit == Some(staging))
            .map(|node| node.id)
    }
}

/// Kahn's algorithm; ties are broken by declaration order.
fn topological_order(nodes: &[OutputNode]) -> Result<Vec<OutputId>> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|node| usize::from(node.inherit.is_some())).collect();
    let mut ready: BTreeSet<OutputId> =
        nodes.iter().filter(|node| in_degree[node.id.0] == 0).map(|node| node.id).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        for node in nodes.iter().filter(|node| node.inherit == Some(id)) {
            in_degree[node.id.0] -= 1;
            if in_degree[node.id.0] == 0 {
                ready.insert(node.id);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<String> = nodes
            .iter()
            .filter(|node| in_degree[node.id.0] > 0)
            .map(|node| node.id.to_string())
            .collect();
        return Err(Error::GraphError(format!(
            "outputs form a cycle: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}
