//! Stage0 → Stage1 rendering.
//!
//! Every output is expanded over its own render keys: the keys it and the
//! outputs it needs (its staging output and its pin targets) are evaluated
//! with, plus the keys of the recipe context. Staging outputs are rendered
//! first, once per combination of their own keys; package combinations then
//! look up their staging cache by projecting onto those keys. Combinations
//! are rendered in parallel and merged in build order, dropping duplicates.
use crate::context::RenderContext;
use crate::error::{Error, Result};
use crate::evaluator::{
    evaluate_node, evaluate_skip, Context, ExpressionEvaluator, MiniJinjaEvaluator,
};
use crate::graph::{OutputGraph, OutputId};
use crate::hash::{filter_variant, HashInfo};
use crate::pin::{Pin, PinKind, MARKER_PREFIX};
use crate::stage0::{Node, OutputKind, OutputTemplate, TemplateRecipe};
use crate::stage1::{
    About, Build, NoArch, PackageIdentity, PinnedSubpackage, RenderedVariant, Requirements,
    StagingBuild, StagingCache, StagingRequirements, UsedVariant,
};
use crate::used_keys::{
    context_dependencies, context_keys, evaluated_keys, is_bare_name, output_keys, pinned_names,
};
use crate::value::{Mapping, Value};
use crate::variant::{Combination, VariantConfig};
use indexmap::IndexMap;
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Staging caches rendered so far, keyed by name and hash.
///
/// Pass the same registry to several [`render_with_cache`] calls to share
/// caches between them; two staging renders with the same filtered variant
/// resolve to one `Arc`.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    caches: HashMap<(String, HashInfo), Arc<StagingCache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registered cache equal to `cache`, registering it first if needed.
    pub fn intern(&mut self, cache: Arc<StagingCache>) -> Arc<StagingCache> {
        let key = (cache.name.clone(), cache.hash_info.clone());
        Arc::clone(self.caches.entry(key).or_insert(cache))
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

/// Rendered staging outputs keyed by output and projected combination.
/// `None` marks a staging output skipped for that projection.
type StagingTable = HashMap<(OutputId, String), Option<Arc<StagingCache>>>;

/// Renders every package output for every relevant variant combination.
///
/// # Arguments
/// * `recipe` - Parsed template recipe
/// * `variants` - Variant configuration
/// * `ctx` - Platforms, flags and extra values
///
/// # Returns
/// * `Result<Vec<RenderedVariant>>` - Package outputs in build order, each in
///   combination order
pub fn render(
    recipe: &TemplateRecipe,
    variants: &VariantConfig,
    ctx: &RenderContext,
) -> Result<Vec<RenderedVariant>> {
    render_with_cache(recipe, variants, ctx, &mut CacheRegistry::new())
}

/// Like [`render`], interning staging caches in a caller-owned registry.
pub fn render_with_cache(
    recipe: &TemplateRecipe,
    variants: &VariantConfig,
    ctx: &RenderContext,
    cache: &mut CacheRegistry,
) -> Result<Vec<RenderedVariant>> {
    Renderer::new(recipe, variants, ctx)?.render(cache)
}

/// Prepared render of one recipe: the output graph, the variant keys each
/// output uses and the keys each output is expanded over.
pub struct Renderer<'a> {
    recipe: &'a TemplateRecipe,
    variants: &'a VariantConfig,
    ctx: &'a RenderContext,
    graph: OutputGraph,
    used_keys: Vec<BTreeSet<String>>,
    /// Outputs rendered alongside each output, itself included.
    members: Vec<BTreeSet<OutputId>>,
    render_keys: Vec<BTreeSet<String>>,
    evaluator: Box<dyn ExpressionEvaluator>,
}

impl<'a> Renderer<'a> {
    /// # Errors
    /// * `Error::ParseError` if the recipe has staging outputs and the
    ///   experimental flag is off, or an expression does not compile
    /// * `Error::GraphError` if the output graph is invalid
    pub fn new(
        recipe: &'a TemplateRecipe,
        variants: &'a VariantConfig,
        ctx: &'a RenderContext,
    ) -> Result<Self> {
        if !ctx.experimental {
            if let Some(staging) = recipe.outputs.iter().find(|o| o.kind == OutputKind::Staging) {
                return Err(Error::parse(
                    staging.field_path("staging"),
                    "staging outputs require the experimental flag",
                ));
            }
        }

        let graph = OutputGraph::build(recipe)?;
        let dependencies = context_dependencies(recipe)?;
        let shared_keys = context_keys(&dependencies, variants);

        let mut evaluated = Vec::with_capacity(recipe.outputs.len());
        let mut used_keys = Vec::with_capacity(recipe.outputs.len());
        for output in &recipe.outputs {
            evaluated.push(evaluated_keys(output, &dependencies, variants)?);
            used_keys.push(output_keys(output, &dependencies, variants)?);
        }
        for staging in graph.nodes().iter().filter(|node| node.kind == OutputKind::Staging) {
            let inherited = used_keys[staging.id.0].clone();
            for id in graph.dependents(staging.id) {
                let ignored = &recipe.outputs[id.0].build.ignore_keys;
                used_keys[id.0].extend(inherited.iter().filter(|key| !ignored.contains(key)).cloned());
            }
        }

        let direct: Vec<BTreeSet<OutputId>> = graph
            .nodes()
            .iter()
            .map(|node| {
                let mut needs = pin_targets(&graph, &recipe.outputs[node.id.0]);
                needs.extend(node.inherit);
                needs
            })
            .collect();
        let members: Vec<BTreeSet<OutputId>> = (0..recipe.outputs.len())
            .map(|start| {
                let mut seen = BTreeSet::new();
                let mut stack = vec![OutputId(start)];
                while let Some(id) = stack.pop() {
                    if seen.insert(id) {
                        stack.extend(direct[id.0].iter().copied());
                    }
                }
                seen
            })
            .collect();
        let render_keys: Vec<BTreeSet<String>> = members
            .iter()
            .map(|group| {
                let mut keys = shared_keys.clone();
                for id in group {
                    keys.extend(evaluated[id.0].iter().cloned());
                }
                keys
            })
            .collect();

        for node in graph.nodes() {
            debug!(
                "{} uses variant keys {:?}, rendered over {:?}",
                node.id, used_keys[node.id.0], render_keys[node.id.0]
            );
        }

        Ok(Self {
            recipe,
            variants,
            ctx,
            graph,
            used_keys,
            members,
            render_keys,
            evaluator: Box::new(MiniJinjaEvaluator::new(ctx.allow_undefined)),
        })
    }

    /// Replaces the expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn graph(&self) -> &OutputGraph {
        &self.graph
    }

    /// Variant keys `id` depends on, including those of its staging output.
    pub fn used_keys(&self, id: OutputId) -> &BTreeSet<String> {
        &self.used_keys[id.0]
    }

    /// Combinations `id` is rendered for.
    pub fn combinations(&self, id: OutputId) -> Result<Vec<Combination>> {
        self.variants.combinations(&self.render_keys[id.0])
    }

    /// Renders all package outputs, staging outputs first.
    pub fn render(&self, cache: &mut CacheRegistry) -> Result<Vec<RenderedVariant>> {
        let stagings = self.render_stagings(cache)?;

        let jobs = self.jobs(OutputKind::Package)?;
        let rendered: Vec<Option<RenderedVariant>> = jobs
            .par_iter()
            .map(|(id, combination)| {
                match CombinationRenderer::new(self, *id, combination, Some(&stagings))?.run()? {
                    Slot::Package(variant) => Ok(Some(*variant)),
                    _ => Ok(None),
                }
            })
            .collect::<Result<_>>()?;

        let mut producers: HashMap<String, OutputId> = HashMap::new();
        let mut seen: HashSet<(OutputId, String)> = HashSet::new();
        let mut results = Vec::new();
        for ((id, _), variant) in jobs.iter().zip(rendered) {
            let Some(variant) = variant else {
                continue;
            };
            if let Some(other) = producers.insert(variant.package.name.clone(), *id) {
                if other != *id {
                    return Err(Error::GraphError(format!(
                        "outputs {other} and {id} both produce package '{}'",
                        variant.package.name
                    )));
                }
            }
            let key = serde_json::to_string(&variant.used_variant).unwrap_or_default();
            if seen.insert((*id, key)) {
                results.push(variant);
            }
        }

        debug!(
            "Rendered {} variants from {} package combinations ({} staging caches registered)",
            results.len(),
            jobs.len(),
            cache.len()
        );
        Ok(results)
    }

    /// Every (output, combination) pair of one kind, in build order.
    fn jobs(&self, kind: OutputKind) -> Result<Vec<(OutputId, Combination)>> {
        let mut jobs = Vec::new();
        for id in self.graph.build_order() {
            if self.graph.node(*id).kind == kind {
                jobs.extend(self.combinations(*id)?.into_iter().map(|combination| (*id, combination)));
            }
        }
        Ok(jobs)
    }

    fn render_stagings(&self, cache: &mut CacheRegistry) -> Result<StagingTable> {
        let jobs = self.jobs(OutputKind::Staging)?;
        let rendered: Vec<Option<Arc<StagingCache>>> = jobs
            .par_iter()
            .map(|(id, combination)| {
                match CombinationRenderer::new(self, *id, combination, None)?.run()? {
                    Slot::Staging(staging) => Ok(Some(staging)),
                    _ => Ok(None),
                }
            })
            .collect::<Result<_>>()?;

        let mut table = StagingTable::new();
        for ((id, combination), staging) in jobs.iter().zip(rendered) {
            let key = (*id, self.projection(*id, combination));
            table.insert(key, staging.map(|staging| cache.intern(staging)));
        }
        Ok(table)
    }

    /// `combination` restricted to the render keys of `staging`, as a lookup key.
    fn projection(&self, staging: OutputId, combination: &Combination) -> String {
        let keys = &self.render_keys[staging.0];
        let projected: BTreeMap<&String, &Value> =
            combination.iter().filter(|(key, _)| keys.contains(*key)).collect();
        serde_json::to_string(&projected).unwrap_or_default()
    }
}

/// Package outputs `output` may pin with `pin_subpackage`. Names only known
/// after evaluation can match any output with a templated name.
fn pin_targets(graph: &OutputGraph, output: &OutputTemplate) -> BTreeSet<OutputId> {
    let packages = || graph.nodes().iter().filter(|node| node.kind == OutputKind::Package);
    let Some(names) = pinned_names(output) else {
        return packages().map(|node| node.id).collect();
    };
    let mut targets = BTreeSet::new();
    for name in &names {
        let named: Vec<OutputId> = packages()
            .filter(|node| node.static_name.as_deref() == Some(name.as_str()))
            .map(|node| node.id)
            .collect();
        if named.is_empty() {
            targets.extend(packages().filter(|node| node.static_name.is_none()).map(|node| node.id));
        } else {
            targets.extend(named);
        }
    }
    targets
}

enum Slot {
    Pending,
    InProgress,
    Skipped,
    Package(Box<RenderedVariant>),
    Staging(Arc<StagingCache>),
}

/// Renders one output for one combination, along with the outputs it needs.
struct CombinationRenderer<'r, 'a> {
    renderer: &'r Renderer<'a>,
    target: OutputId,
    combination: &'r Combination,
    variables: Context,
    recipe_context: Mapping,
    identities: Vec<Option<PackageIdentity>>,
    slots: Vec<Slot>,
}

impl<'r, 'a> CombinationRenderer<'r, 'a> {
    fn new(
        renderer: &'r Renderer<'a>,
        target: OutputId,
        combination: &'r Combination,
        stagings: Option<&StagingTable>,
    ) -> Result<Self> {
        let ctx = renderer.ctx;
        let mut variables = ctx.platform_variables();
        variables.extend(combination.iter().map(|(k, v)| (k.clone(), v.clone())));
        variables.extend(ctx.extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut recipe_context = Mapping::new();
        for (key, node) in &renderer.recipe.context {
            let value = match ctx.extra.get(key) {
                Some(value) => value.clone(),
                None => {
                    let path = format!("context.{key}");
                    let value = evaluate_node(renderer.evaluator.as_ref(), node, &variables, &path)?;
                    reject_markers(&value, &path)?;
                    value
                }
            };
            variables.insert(key.clone(), value.clone());
            recipe_context.insert(key.clone(), value);
        }

        let count = renderer.recipe.outputs.len();
        let mut slots: Vec<Slot> = (0..count).map(|_| Slot::Pending).collect();
        if let Some(table) = stagings {
            for id in &renderer.members[target.0] {
                if renderer.graph.node(*id).kind != OutputKind::Staging {
                    continue;
                }
                let key = (*id, renderer.projection(*id, combination));
                slots[id.0] = match table.get(&key) {
                    Some(Some(staging)) => Slot::Staging(Arc::clone(staging)),
                    Some(None) => Slot::Skipped,
                    None => {
                        return Err(Error::GraphError(format!(
                            "{id} was not rendered for {}",
                            key.1
                        )))
                    }
                };
            }
        }

        Ok(Self {
            renderer,
            target,
            combination,
            variables,
            recipe_context,
            identities: vec![None; count],
            slots,
        })
    }

    fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.renderer.evaluator.as_ref()
    }

    fn output(&self, id: OutputId) -> &'a OutputTemplate {
        &self.renderer.recipe.outputs[id.0]
    }

    fn is_member(&self, id: OutputId) -> bool {
        self.renderer.members[self.target.0].contains(&id)
    }

    /// Renders the target and returns its final slot.
    fn run(mut self) -> Result<Slot> {
        let order: Vec<OutputId> = self
            .renderer
            .graph
            .build_order()
            .iter()
            .copied()
            .filter(|id| self.is_member(*id))
            .collect();
        self.resolve_identities(&order)?;
        let target = self.target;
        self.ensure(target)?;
        Ok(std::mem::replace(&mut self.slots[target.0], Slot::Skipped))
    }

    /// Evaluates skip conditions, names and versions.
    fn resolve_identities(&mut self, order: &[OutputId]) -> Result<()> {
        let mut names: HashMap<String, OutputId> = HashMap::new();
        for id in order {
            let output = self.output(*id);
            match &self.slots[id.0] {
                Slot::Skipped => continue,
                Slot::Staging(staging) => {
                    let name = staging.name.clone();
                    self.identities[id.0] = Some(PackageIdentity { name, version: String::new() });
                    continue;
                }
                _ => {}
            }
            let inherited_skip = self.renderer.graph.node(*id).inherit.is_some_and(|staging| {
                matches!(self.slots[staging.0], Slot::Skipped)
            });
            let skipped = inherited_skip
                || match &output.build.skip {
                    Some(skip) => evaluate_skip(
                        self.evaluator(),
                        skip,
                        &self.variables,
                        &output.field_path("build.skip"),
                    )?,
                    None => false,
                };
            if skipped {
                debug!("Skipping {} for {:?}", id, self.combination);
                self.slots[id.0] = Slot::Skipped;
                continue;
            }

            let name = self.string_field(&output.name, &output.field_path("name"))?;
            let version = match &output.version {
                Some(node) => self.string_field(node, &output.field_path("package.version"))?,
                None => String::new(),
            };
            if output.kind == OutputKind::Package {
                if let Some(other) = names.insert(name.clone(), *id) {
                    return Err(Error::GraphError(format!(
                        "outputs {other} and {id} both produce package '{name}'"
                    )));
                }
            }
            self.identities[id.0] = Some(PackageIdentity { name, version });
        }
        Ok(())
    }

    fn ensure(&mut self, id: OutputId) -> Result<()> {
        match self.slots[id.0] {
            Slot::Pending => {}
            Slot::InProgress => {
                return Err(Error::GraphError(format!(
                    "exact pins between outputs form a cycle at {id}"
                )))
            }
            _ => return Ok(()),
        }
        self.slots[id.0] = Slot::InProgress;
        let slot = match self.output(id).kind {
            OutputKind::Staging => Slot::Staging(Arc::new(self.render_staging(id)?)),
            OutputKind::Package => Slot::Package(Box::new(self.render_package(id)?)),
        };
        self.slots[id.0] = slot;
        Ok(())
    }

    fn identity(&self, id: OutputId) -> Result<PackageIdentity> {
        self.identities[id.0]
            .clone()
            .ok_or_else(|| Error::GraphError(format!("{id} has no resolved identity")))
    }

    fn render_staging(&mut self, id: OutputId) -> Result<StagingCache> {
        let output = self.output(id);
        let identity = self.identity(id)?;
        let script = self.script(output)?;

        let mut resolved = ResolvedRequirements::default();
        for (section, node) in output.requirements.sections() {
            let path = output.field_path(&format!("requirements.{section}"));
            let entries = self.string_list(Some(node), &path)?;
            self.resolve_section(id, section, entries, &path, &mut resolved)?;
        }
        // staging sources are part of the build, not of the cache
        if let Some(source) = &output.source {
            self.sources(source, &output.field_path("source"))?;
        }

        let mut used_variant = filter_variant(
            self.combination,
            self.renderer.used_keys(id),
            self.renderer.ctx.target_platform.as_str(),
            None,
        );
        used_variant.extend(resolved.used_variant);
        let hash_info = HashInfo::compute(&used_variant, None);
        debug!("Rendered staging '{}' ({hash_info})", identity.name);

        Ok(StagingCache {
            name: identity.name,
            build: StagingBuild { script },
            requirements: StagingRequirements { build: resolved.build, host: resolved.host },
            used_variant,
            hash_info,
        })
    }

    fn render_package(&mut self, id: OutputId) -> Result<RenderedVariant> {
        let output = self.output(id);
        let package = self.identity(id)?;

        let staging_caches = match self.renderer.graph.node(id).inherit {
            Some(staging) => {
                self.ensure(staging)?;
                match &self.slots[staging.0] {
                    Slot::Staging(cache) => vec![Arc::clone(cache)],
                    _ => Vec::new(),
                }
            }
            None => Vec::new(),
        };
        let inherits_from = staging_caches.first().map(|cache| cache.name.clone());

        let number = self.build_number(output)?;
        let noarch = self.noarch(output)?;
        let script = self.script(output)?;

        let mut resolved = ResolvedRequirements::default();
        for (section, node) in output.requirements.sections() {
            let path = output.field_path(&format!("requirements.{section}"));
            let entries = self.string_list(Some(node), &path)?;
            self.resolve_section(id, section, entries, &path, &mut resolved)?;
        }

        let about = match &output.about {
            Some(node) => self.about(node, &output.field_path("about"))?,
            None => About::default(),
        };
        let sources = match &output.source {
            Some(node) => self.sources(node, &output.field_path("source"))?,
            None => Vec::new(),
        };

        let mut used_variant = filter_variant(
            self.combination,
            self.renderer.used_keys(id),
            self.renderer.ctx.target_platform.as_str(),
            noarch,
        );
        used_variant.extend(resolved.used_variant);
        let hash_info = HashInfo::compute(&used_variant, noarch);

        let string = match &output.build.string {
            Some(node) => {
                let mut variables = self.variables.clone();
                variables.insert("hash".to_string(), Value::Str(hash_info.to_string()));
                let path = output.field_path("build.string");
                scalar_string(evaluate_node(self.evaluator(), node, &variables, &path)?, &path)?
            }
            None => hash_info.build_string(number),
        };

        Ok(RenderedVariant {
            package,
            build: Build { number, string, script, noarch },
            requirements: Requirements {
                build: resolved.build,
                host: resolved.host,
                run: resolved.run,
            },
            about,
            context: self.recipe_context.clone(),
            used_variant,
            sources,
            staging_caches,
            inherits_from,
            hash_info,
            pin_subpackages: resolved.pins,
        })
    }

    fn resolve_section(
        &mut self,
        id: OutputId,
        section: &str,
        entries: Vec<String>,
        path: &str,
        resolved: &mut ResolvedRequirements,
    ) -> Result<()> {
        let renderer = self.renderer;
        let used = renderer.used_keys(id);
        for (i, entry) in entries.into_iter().enumerate() {
            let entry_path = format!("{path}[{i}]");
            let spec = match Pin::from_marker(&entry) {
                Some(marker) => {
                    let (kind, pin) = marker.map_err(|e| e.at(&entry_path))?;
                    match kind {
                        PinKind::Subpackage => self.resolve_subpackage(pin, resolved)?,
                        PinKind::Compatible => self.resolve_compatible(&pin, &entry_path)?,
                    }
                }
                None if section != "run" && is_bare_name(&entry) && used.contains(&entry) => {
                    match self.combination.get(&entry) {
                        Some(value) => {
                            let value = value.to_interpolated();
                            if section == "host" {
                                if let Some(hint) = renderer.variants.pin_hint(&entry) {
                                    let pin = Pin { name: entry.clone(), args: hint.to_pin_args() };
                                    resolved.run.push(pin.apply(&value, None)?);
                                }
                            }
                            variant_spec(&entry, &value)
                        }
                        None => entry,
                    }
                }
                None if entry.contains(MARKER_PREFIX) => return Err(marker_error(&entry_path)),
                None => entry,
            };
            match section {
                "build" => resolved.build.push(spec),
                "host" => resolved.host.push(spec),
                _ => resolved.run.push(spec),
            }
        }
        Ok(())
    }

    fn resolve_subpackage(&mut self, pin: Pin, resolved: &mut ResolvedRequirements) -> Result<String> {
        let target = self.find_package(&pin.name)?;
        let identity = self.identity(target)?;

        let (spec, build_string) = if pin.args.exact {
            self.ensure(target)?;
            let Slot::Package(sibling) = &self.slots[target.0] else {
                return Err(Error::GraphError(format!(
                    "cannot pin '{}': it was not rendered",
                    pin.name
                )));
            };
            let build_string = sibling.build.string.clone();
            resolved.used_variant.insert(
                pin.name.clone(),
                Value::Str(format!("{} {}", identity.version, build_string)),
            );
            (pin.apply(&identity.version, Some(&build_string))?, Some(build_string))
        } else {
            // a computed sibling version can vary with keys this output does not use
            let computed = self
                .output(target)
                .version
                .as_ref()
                .is_some_and(|node| !matches!(node, Node::Literal(_)));
            if computed {
                resolved
                    .used_variant
                    .entry(pin.name.clone())
                    .or_insert_with(|| Value::Str(identity.version.clone()));
            }
            (pin.apply(&identity.version, None)?, None)
        };

        // a range pin never downgrades an exact pin on the same sibling
        let keep_exact = resolved.pins.get(&pin.name).is_some_and(|existing| existing.exact);
        if pin.args.exact || !keep_exact {
            resolved.pins.insert(
                pin.name.clone(),
                PinnedSubpackage { version: identity.version, build_string, exact: pin.args.exact },
            );
        }
        Ok(spec)
    }

    fn resolve_compatible(&self, pin: &Pin, path: &str) -> Result<String> {
        let value = self.combination.get(&pin.name).ok_or_else(|| {
            Error::EvaluationError {
                message: format!(
                    "pin_compatible('{}') needs a variant value for '{}'",
                    pin.name, pin.name
                ),
                location: Some(path.to_string()),
            }
        })?;
        pin.apply(&value.to_interpolated(), None)
    }

    /// Finds the rendered package output called `name` in this combination.
    fn find_package(&self, name: &str) -> Result<OutputId> {
        let recipe = self.renderer.recipe;
        for (i, output) in recipe.outputs.iter().enumerate() {
            let matches = match &self.identities[i] {
                Some(identity) => identity.name == name,
                None => output.static_name() == Some(name),
            };
            if !matches {
                continue;
            }
            if output.kind == OutputKind::Staging {
                return Err(Error::GraphError(format!(
                    "cannot pin staging output '{name}'; only package outputs can be pinned"
                )));
            }
            if matches!(self.slots[i], Slot::Skipped) {
                return Err(Error::GraphError(format!(
                    "cannot pin '{name}': it is skipped for this variant"
                )));
            }
            return Ok(OutputId(i));
        }
        Err(Error::GraphError(format!("unknown pin_subpackage target '{name}'")))
    }

    fn string_field(&self, node: &Node, path: &str) -> Result<String> {
        let value = evaluate_node(self.evaluator(), node, &self.variables, path)?;
        scalar_string(value, path)
    }

    /// A string or a list of strings; null entries are dropped.
    fn string_list(&self, node: Option<&Node>, path: &str) -> Result<Vec<String>> {
        let Some(node) = node else {
            return Ok(Vec::new());
        };
        let values = match evaluate_node(self.evaluator(), node, &self.variables, path)? {
            Value::Null => Vec::new(),
            Value::List(values) => values,
            other => vec![other],
        };
        let mut out = Vec::with_capacity(values.len());
        for (i, value) in values.into_iter().enumerate() {
            let item_path = format!("{path}[{i}]");
            match value {
                Value::Null => {}
                Value::Str(s) => out.push(s),
                Value::Int(n) => out.push(n.to_string()),
                other => {
                    return Err(Error::parse(
                        item_path,
                        format!("expected a string, found {}", other.type_name()),
                    ))
                }
            }
        }
        Ok(out)
    }

    fn script(&self, output: &OutputTemplate) -> Result<Vec<String>> {
        let path = output.field_path("build.script");
        let lines = self.string_list(output.build.script.as_ref(), &path)?;
        if lines.iter().any(|line| line.contains(MARKER_PREFIX)) {
            return Err(marker_error(&path));
        }
        Ok(lines)
    }

    fn build_number(&self, output: &OutputTemplate) -> Result<u64> {
        let Some(node) = &output.build.number else {
            return Ok(0);
        };
        let path = output.field_path("build.number");
        match evaluate_node(self.evaluator(), node, &self.variables, &path)? {
            Value::Int(n) if n >= 0 => Ok(n as u64),
            Value::Str(s) => s.trim().parse().map_err(|_| {
                Error::parse(path, format!("expected a non-negative integer, found '{s}'"))
            }),
            other => Err(Error::parse(
                path,
                format!("expected a non-negative integer, found {}", other.type_name()),
            )),
        }
    }

    fn noarch(&self, output: &OutputTemplate) -> Result<Option<NoArch>> {
        let Some(node) = &output.build.noarch else {
            return Ok(None);
        };
        let path = output.field_path("build.noarch");
        match evaluate_node(self.evaluator(), node, &self.variables, &path)? {
            Value::Null => Ok(None),
            Value::Str(kind) if kind.is_empty() => Ok(None),
            Value::Str(kind) => kind
                .parse()
                .map(Some)
                .map_err(|_| Error::parse(path, format!("unknown noarch kind '{kind}'"))),
            other => Err(Error::parse(path, format!("expected a string, found {}", other.type_name()))),
        }
    }

    fn about(&self, node: &Node, path: &str) -> Result<About> {
        let Value::Mapping(map) = evaluate_node(self.evaluator(), node, &self.variables, path)? else {
            return Err(Error::parse(path, "expected a mapping"));
        };
        let mut about = About::default();
        for (key, value) in map {
            let field_path = format!("{path}.{key}");
            let value = match value {
                Value::Null => None,
                value => Some(scalar_string(value, &field_path)?),
            };
            match key.as_str() {
                "homepage" => about.homepage = value,
                "license" => about.license = value,
                "license_file" => about.license_file = value,
                "summary" => about.summary = value,
                "description" => about.description = value,
                "documentation" => about.documentation = value,
                "repository" => about.repository = value,
                other => warn!("Ignoring unknown about field '{other}'"),
            }
        }
        Ok(about)
    }

    fn sources(&self, node: &Node, path: &str) -> Result<Vec<Mapping>> {
        let value = evaluate_node(self.evaluator(), node, &self.variables, path)?;
        reject_markers(&value, path)?;
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Mapping(map) => Ok(vec![map]),
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .filter(|(_, item)| !item.is_null())
                .map(|(i, item)| match item {
                    Value::Mapping(map) => Ok(map),
                    other => Err(Error::parse(
                        format!("{path}[{i}]"),
                        format!("expected a source mapping, found {}", other.type_name()),
                    )),
                })
                .collect(),
            other => Err(Error::parse(
                path,
                format!("expected a source mapping, found {}", other.type_name()),
            )),
        }
    }
}

#[derive(Default)]
struct ResolvedRequirements {
    build: Vec<String>,
    host: Vec<String>,
    run: Vec<String>,
    pins: IndexMap<String, PinnedSubpackage>,
    used_variant: UsedVariant,
}

/// `python` + `3.11` → `python 3.11.*`; non-numeric values are used verbatim.
fn variant_spec(name: &str, value: &str) -> String {
    if value.starts_with(|c: char| c.is_ascii_digit()) && !value.contains([' ', '*', '<', '>', '=']) {
        format!("{name} {value}.*")
    } else {
        format!("{name} {value}")
    }
}

fn scalar_string(value: Value, path: &str) -> Result<String> {
    let s = match value {
        Value::Str(s) => s,
        Value::Int(n) => n.to_string(),
        other => {
            return Err(Error::parse(
                path,
                format!("expected a string, found {}", other.type_name()),
            ))
        }
    };
    if s.contains(MARKER_PREFIX) {
        return Err(marker_error(path));
    }
    Ok(s)
}

fn reject_markers(value: &Value, path: &str) -> Result<()> {
    match value {
        Value::Str(s) if s.contains(MARKER_PREFIX) => Err(marker_error(path)),
        Value::List(items) => items.iter().try_for_each(|item| reject_markers(item, path)),
        Value::Mapping(map) => map.values().try_for_each(|item| reject_markers(item, path)),
        _ => Ok(()),
    }
}

fn marker_error(path: &str) -> Error {
    Error::EvaluationError {
        message: "pin_subpackage and pin_compatible may only be used as whole requirement entries"
            .to_string(),
        location: Some(path.to_string()),
    }
}
