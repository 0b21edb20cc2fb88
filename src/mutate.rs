//! Mutator pipeline.
//!
//! Mutators transform the module graph in registration order. Top-down
//! mutators visit roots before leaves on a single thread; bottom-up mutators
//! visit leaves first through the parallel visitor. Either way a callback
//! only ever *stages* mutations into its own context; the runner commits all
//! staged operations between passes, in deterministic traversal order, so
//! concurrent callbacks never observe a half-mutated graph.
//!
//! Splitting follows the same two-step discipline: `create_variations`
//! records the intended labels, and the commit step materialises one module
//! per label, rewires incoming edges by axis label, and finally retargets any
//! remaining edge on a split original to its first variant.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::context::{Context, DepRef};
use crate::errors::Error;
use crate::graph::{
    DepEdge, DependencyTag, GroupEntry, ModuleId, ModuleInfo, Variation,
};
use crate::module::{Module, module_downcast_ref};
use crate::provider::{ProviderKey, ProviderTable, ProviderValue};
use crate::visit::{VisitOrder, parallel_visit};
use camino::Utf8PathBuf;

pub(crate) type TopDownFn = Arc<dyn Fn(&mut TopDownMutatorContext<'_>) + Send + Sync>;
pub(crate) type BottomUpFn = Arc<dyn Fn(&mut BottomUpMutatorContext<'_>) + Send + Sync>;

#[derive(Clone)]
pub(crate) enum MutatorKind {
    TopDown(TopDownFn),
    BottomUp(BottomUpFn),
}

#[derive(Clone)]
pub(crate) struct MutatorInfo {
    pub name: String,
    pub kind: MutatorKind,
}

/// How an added dependency's target variant is selected.
pub(crate) enum DepQuery {
    /// Match the requester's dependency variations exactly.
    Direct,
    /// Overlay the given variations, then match exactly.
    Variations(Vec<Variation>),
    /// Require only the given variations; extra target axes are ignored.
    FarVariations(Vec<Variation>),
}

pub(crate) enum MutatorOp {
    AddDependency {
        query: DepQuery,
        tag: Option<Arc<dyn DependencyTag>>,
        names: Vec<String>,
    },
    ReplaceDependencies {
        name: String,
    },
    Rename {
        name: String,
    },
    CreateVariations {
        labels: Vec<String>,
    },
    AliasVariation {
        label: String,
    },
    SetProvider(Box<dyn FnOnce(&mut ProviderTable, ModuleId) + Send>),
    CreateModule {
        type_name: String,
        properties: serde_json::Value,
    },
}

/// Operations shared by both mutator context kinds.
macro_rules! common_mutator_methods {
    () => {
        /// The module's name.
        #[must_use]
        pub fn module_name(&self) -> &str {
            self.core.module_name(self.module)
        }

        /// The module's type name.
        #[must_use]
        pub fn module_type(&self) -> &str {
            self.core.module_type(self.module)
        }

        /// The module's handle, usable with the read-only graph accessors.
        #[must_use]
        pub fn module_id(&self) -> ModuleId {
            self.module
        }

        /// Directory containing the module's blueprint file.
        #[must_use]
        pub fn module_dir(&self) -> Utf8PathBuf {
            self.core.module_dir(self.module)
        }

        /// Downcast the module's logic payload.
        #[must_use]
        pub fn module<T: Module>(&self) -> Option<&T> {
            self.core
                .module_logic(self.module)
                .and_then(module_downcast_ref)
        }

        /// The label this module carries on `axis`, if any.
        #[must_use]
        pub fn module_variation(&self, axis: &str) -> Option<&str> {
            self.core.module_variation(self.module, axis)
        }

        /// Visit the module's direct dependencies as of the previous barrier.
        pub fn visit_direct_deps(&self, visit: impl FnMut(DepRef<'_>)) {
            self.core.visit_direct_deps(self.module, visit);
        }

        /// Read a provider off this module.
        #[must_use]
        pub fn provider<T: ProviderValue>(&self, key: ProviderKey<T>) -> Option<&T> {
            self.core.module_provider(self.module, key)
        }

        /// Read a provider off another module.
        #[must_use]
        pub fn other_module_provider<T: ProviderValue>(
            &self,
            module: ModuleId,
            key: ProviderKey<T>,
        ) -> Option<&T> {
            self.core.module_provider(module, key)
        }

        /// Host configuration, if one was supplied to the pipeline.
        #[must_use]
        pub fn config<T: Any>(&self) -> Option<&T> {
            self.core.config::<T>()
        }

        /// Attach a typed, write-once provider value to this module.
        pub fn set_provider<T: ProviderValue>(&mut self, key: ProviderKey<T>, value: T) {
            self.ops.push(MutatorOp::SetProvider(Box::new(
                move |table, module| table.set(module, key, value),
            )));
        }

        /// Report a module error positioned at this module's definition.
        pub fn errorf(&mut self, message: impl Into<String>) {
            self.errors.push(Error::module(
                self.core.module_pos(self.module).clone(),
                message,
            ));
        }
    };
}

/// Context passed to top-down mutator callbacks.
pub struct TopDownMutatorContext<'a> {
    pub(crate) core: &'a Context,
    pub(crate) module: ModuleId,
    pub(crate) ops: Vec<MutatorOp>,
    pub(crate) errors: Vec<Error>,
}

impl TopDownMutatorContext<'_> {
    common_mutator_methods!();

    /// Create a new module of a registered type. The module is committed at
    /// the end of the current pass and participates in all later passes.
    /// `properties` must serialise to an object carrying the new module's
    /// `name`.
    pub fn create_module<P: Serialize>(&mut self, type_name: &str, properties: P) {
        match serde_json::to_value(properties) {
            Ok(value) => self.ops.push(MutatorOp::CreateModule {
                type_name: type_name.to_owned(),
                properties: value,
            }),
            Err(err) => self.errors.push(Error::property(
                self.core.module_pos(self.module).clone(),
                format!("create_module properties did not serialise: {err}"),
            )),
        }
    }
}

/// Context passed to bottom-up mutator callbacks.
pub struct BottomUpMutatorContext<'a> {
    pub(crate) core: &'a Context,
    pub(crate) module: ModuleId,
    pub(crate) ops: Vec<MutatorOp>,
    pub(crate) errors: Vec<Error>,
}

impl BottomUpMutatorContext<'_> {
    common_mutator_methods!();

    /// Add dependencies on `names`, selecting the variant whose variations
    /// equal this module's dependency variations.
    pub fn add_dependency<S: AsRef<str>>(
        &mut self,
        tag: impl DependencyTag,
        names: impl IntoIterator<Item = S>,
    ) {
        self.push_dep(DepQuery::Direct, Some(Arc::new(tag)), names);
    }

    /// Add dependencies whose target variant must equal this module's
    /// dependency variations overlaid with `variations`.
    pub fn add_variation_dependencies<S: AsRef<str>>(
        &mut self,
        variations: &[Variation],
        tag: impl DependencyTag,
        names: impl IntoIterator<Item = S>,
    ) {
        self.push_dep(
            DepQuery::Variations(variations.to_vec()),
            Some(Arc::new(tag)),
            names,
        );
    }

    /// Add dependencies whose target variant must carry each of `variations`,
    /// ignoring any other axes the target has.
    pub fn add_far_variation_dependencies<S: AsRef<str>>(
        &mut self,
        variations: &[Variation],
        tag: impl DependencyTag,
        names: impl IntoIterator<Item = S>,
    ) {
        self.push_dep(
            DepQuery::FarVariations(variations.to_vec()),
            Some(Arc::new(tag)),
            names,
        );
    }

    fn push_dep<S: AsRef<str>>(
        &mut self,
        query: DepQuery,
        tag: Option<Arc<dyn DependencyTag>>,
        names: impl IntoIterator<Item = S>,
    ) {
        let names: Vec<String> = names
            .into_iter()
            .map(|name| name.as_ref().to_owned())
            .collect();
        if names.is_empty() {
            return;
        }
        self.ops.push(MutatorOp::AddDependency { query, tag, names });
    }

    /// Redirect every dependency on the identically-varianted module called
    /// `name` to this module instead. Tags are preserved.
    pub fn replace_dependencies(&mut self, name: impl Into<String>) {
        self.ops.push(MutatorOp::ReplaceDependencies { name: name.into() });
    }

    /// Rename this module's group.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.ops.push(MutatorOp::Rename { name: name.into() });
    }

    /// Split this module into one variant per label on the current mutator's
    /// axis. Operations staged after this call apply to the first variant.
    pub fn create_variations<S: AsRef<str>>(&mut self, labels: impl IntoIterator<Item = S>) {
        let labels: Vec<String> = labels
            .into_iter()
            .map(|label| label.as_ref().to_owned())
            .collect();
        self.ops.push(MutatorOp::CreateVariations { labels });
    }

    /// After a split, alias this module's pre-split variant to the split
    /// variant labelled `label`, so existing lookups land on it.
    pub fn alias_variation(&mut self, label: impl Into<String>) {
        self.ops.push(MutatorOp::AliasVariation { label: label.into() });
    }
}

impl Context {
    /// Run every registered mutator, committing staged operations and
    /// re-deriving the traversal adjacency between passes.
    pub(crate) fn run_mutators(&mut self) -> Vec<Error> {
        let mutators = self.mutators.clone();
        for mutator in &mutators {
            debug!(mutator = mutator.name, "running mutator");
            let errs = match &mutator.kind {
                MutatorKind::TopDown(f) => self.run_top_down(&mutator.name, f),
                MutatorKind::BottomUp(f) => self.run_bottom_up(&mutator.name, f),
            };
            if !errs.is_empty() {
                return errs;
            }
            let errs = self.update_dependencies();
            if !errs.is_empty() {
                return errs;
            }
        }
        Vec::new()
    }

    /// Visit every live module roots-first in a deterministic depth-first
    /// pre-order and stage the callback's operations.
    fn run_top_down(&mut self, name: &str, f: &TopDownFn) -> Vec<Error> {
        let order = self.top_down_order();
        let mut staged: Vec<(ModuleId, Vec<MutatorOp>)> = Vec::new();
        let mut errs = Vec::new();
        for id in order {
            let mut mctx = TopDownMutatorContext {
                core: self,
                module: id,
                ops: Vec::new(),
                errors: Vec::new(),
            };
            f(&mut mctx);
            let TopDownMutatorContext { ops, errors, .. } = mctx;
            errs.extend(errors);
            staged.push((id, ops));
        }
        if !errs.is_empty() {
            return errs;
        }
        self.commit_ops(name, staged)
    }

    /// Pre-order DFS over forward deps starting from the modules nothing
    /// depends on, in definition order.
    fn top_down_order(&self) -> Vec<ModuleId> {
        fn dfs(core: &Context, module: ModuleId, seen: &mut Vec<bool>, order: &mut Vec<ModuleId>) {
            if seen[module.index()] {
                return;
            }
            seen[module.index()] = true;
            order.push(module);
            for &dep in &core.modules[module.index()].forward_deps {
                dfs(core, dep, seen, order);
            }
        }

        let mut seen = vec![false; self.modules.len()];
        let mut order = Vec::new();
        for module in self.live_modules() {
            if self.modules[module.index()].reverse_deps.is_empty() {
                dfs(self, module, &mut seen, &mut order);
            }
        }
        for module in self.live_modules() {
            dfs(self, module, &mut seen, &mut order);
        }
        order
    }

    /// Visit every live module leaves-first through the parallel visitor and
    /// stage the callbacks' operations.
    fn run_bottom_up(&mut self, name: &str, f: &BottomUpFn) -> Vec<Error> {
        let list = self.modules_sorted.clone();
        let collected: Mutex<HashMap<ModuleId, (Vec<MutatorOp>, Vec<Error>)>> =
            Mutex::new(HashMap::new());
        let core: &Context = &*self;
        let visit_errs = parallel_visit(
            core,
            VisitOrder::BottomUp,
            &list,
            self.parallelism,
            |id, _pause| {
                let mut mctx = BottomUpMutatorContext {
                    core,
                    module: id,
                    ops: Vec::new(),
                    errors: Vec::new(),
                };
                f(&mut mctx);
                let BottomUpMutatorContext { ops, errors, .. } = mctx;
                collected
                    .lock()
                    .expect("mutator op collection")
                    .insert(id, (ops, errors));
                false
            },
        );
        if !visit_errs.is_empty() {
            return visit_errs;
        }

        let mut collected = collected.into_inner().expect("mutator op collection");
        let mut staged = Vec::new();
        let mut errs = Vec::new();
        for &id in &list {
            if let Some((ops, errors)) = collected.remove(&id) {
                errs.extend(errors);
                staged.push((id, ops));
            }
        }
        if !errs.is_empty() {
            return errs;
        }
        self.commit_ops(name, staged)
    }

    /// Commit staged operations in traversal order, then run the end-of-pass
    /// fixups: dangling split edges, deferred module creation, renames, and
    /// dependency replacements.
    fn commit_ops(&mut self, axis: &str, staged: Vec<(ModuleId, Vec<MutatorOp>)>) -> Vec<Error> {
        let mut errs = Vec::new();
        let mut renames: Vec<(ModuleId, String)> = Vec::new();
        let mut replacements: Vec<(ModuleId, ModuleId)> = Vec::new();
        let mut created: Vec<(ModuleId, String, serde_json::Value)> = Vec::new();

        for (origin, ops) in staged {
            for op in ops {
                // A split replaces the origin module; later operations from
                // the same callback apply to the first variant.
                let module = self.live_descendant(origin);
                match op {
                    MutatorOp::AddDependency { query, tag, names } => {
                        for name in names {
                            match self.resolve_dependency_target(module, &name, &query) {
                                Ok(target) => {
                                    self.modules[module.index()].direct_deps.push(DepEdge {
                                        target,
                                        tag: tag.clone(),
                                    });
                                }
                                Err(err) => errs.push(err),
                            }
                        }
                    }
                    MutatorOp::ReplaceDependencies { name } => {
                        match self.find_identical_variant(module, &name) {
                            Ok(target) => replacements.push((target, module)),
                            Err(err) => errs.push(err),
                        }
                    }
                    MutatorOp::Rename { name } => renames.push((module, name)),
                    MutatorOp::CreateVariations { labels } => {
                        errs.extend(self.split_module(module, axis, &labels));
                    }
                    MutatorOp::AliasVariation { label } => {
                        // Aliases hang off the pre-split module, so resolve
                        // from the staged origin rather than the descendant.
                        if let Err(err) = self.add_variant_alias(origin, axis, &label) {
                            errs.push(err);
                        }
                    }
                    MutatorOp::SetProvider(apply) => apply(&mut self.providers, module),
                    MutatorOp::CreateModule {
                        type_name,
                        properties,
                    } => created.push((module, type_name, properties)),
                }
            }
        }

        self.retarget_dangling_deps();
        for (creator, type_name, properties) in created {
            errs.extend(self.add_created_module(creator, &type_name, properties));
        }
        for (module, name) in renames {
            if let Err(err) = self.rename_group(module, &name) {
                errs.push(err);
            }
        }
        self.apply_replacements(&replacements);
        errs
    }

    /// Follow a split chain down to the living first variant.
    fn live_descendant(&self, mut module: ModuleId) -> ModuleId {
        while !self.modules[module.index()].is_live() {
            match self.modules[module.index()].split_into.first() {
                Some(&first) => module = first,
                None => break,
            }
        }
        module
    }

    /// Materialise one variant per label for `original` on `axis`.
    fn split_module(&mut self, original: ModuleId, axis: &str, labels: &[String]) -> Vec<Error> {
        if labels.is_empty() {
            return vec![Error::internal(format!(
                "create_variations on {:?} requires at least one label",
                self.module_name(original)
            ))];
        }
        let orig_index = original.index();
        let group_id = self.modules[orig_index].group;
        let Some(entry_pos) = self.groups[group_id.index()]
            .entries
            .iter()
            .position(|entry| matches!(entry, GroupEntry::Module(id) if *id == original))
        else {
            return vec![Error::internal(format!(
                "split module {:?} missing from its group",
                self.module_name(original)
            ))];
        };

        let Some(logic) = self.modules[orig_index].logic.take() else {
            return vec![Error::internal(
                "split of a module that was already split".to_owned(),
            )];
        };
        let mut logics: Vec<Box<dyn Module>> = Vec::with_capacity(labels.len());
        for _ in 1..labels.len() {
            logics.push(logic.clone_module());
        }
        logics.insert(0, logic);

        let mut new_ids = Vec::with_capacity(labels.len());
        for (label, logic) in labels.iter().zip(logics) {
            let id = ModuleId(u32::try_from(self.modules.len()).expect("module arena size"));
            let source = &self.modules[orig_index];
            let mut info = ModuleInfo::new(id, group_id, source.type_name.clone(), source.pos.clone(), logic);
            info.variant = source.variant.with_variation(axis, label, false);
            info.direct_deps = source.direct_deps.clone();
            self.modules.push(info);
            self.providers.copy_module(original, id);
            new_ids.push(id);
        }
        debug!(
            module = self.module_name(original),
            axis,
            variants = new_ids.len(),
            "split module into variants"
        );
        self.modules[orig_index].split_into.clone_from(&new_ids);
        self.groups[group_id.index()].entries.splice(
            entry_pos..=entry_pos,
            new_ids.iter().map(|&id| GroupEntry::Module(id)),
        );

        // Each variant's outgoing edges follow the matching label of targets
        // that split on this axis.
        let mut errs = Vec::new();
        for (label, &id) in labels.iter().zip(&new_ids) {
            errs.extend(self.convert_deps_to_variation(id, axis, label));
        }
        errs
    }

    /// Retarget `module`'s edges that point at split originals to the child
    /// carrying `label` on `axis`.
    fn convert_deps_to_variation(&mut self, module: ModuleId, axis: &str, label: &str) -> Vec<Error> {
        let mut retargets: Vec<(usize, ModuleId)> = Vec::new();
        let mut errs = Vec::new();
        for (index, edge) in self.modules[module.index()].direct_deps.iter().enumerate() {
            let target = &self.modules[edge.target.index()];
            if target.is_live() || target.split_into.is_empty() {
                continue;
            }
            let child = target.split_into.iter().copied().find(|&child| {
                self.modules[child.index()]
                    .variant
                    .variations
                    .get(axis)
                    .is_some_and(|value| value == label)
            });
            match child {
                Some(child) => retargets.push((index, child)),
                None => errs.push(Error::module(
                    self.module_pos(module).clone(),
                    format!(
                        "failed to find variation {label:?} on axis {axis:?} of {:?} needed by {:?}",
                        self.module_name(edge.target),
                        self.module_name(module),
                    ),
                )),
            }
        }
        for (index, child) in retargets {
            self.modules[module.index()].direct_deps[index].target = child;
        }
        errs
    }

    /// Point any edge still targeting a split original at its first variant.
    fn retarget_dangling_deps(&mut self) {
        for index in 0..self.modules.len() {
            if !self.modules[index].is_live() {
                continue;
            }
            for dep_index in 0..self.modules[index].direct_deps.len() {
                let target = self.modules[index].direct_deps[dep_index].target;
                let live = self.live_descendant(target);
                if live != target {
                    self.modules[index].direct_deps[dep_index].target = live;
                }
            }
        }
    }

    /// Create an alias from `source`'s pre-split variant to its child
    /// carrying `label` on `axis`. `source` is the staged origin module,
    /// which a preceding `create_variations` in the same pass left dead.
    fn add_variant_alias(&mut self, source: ModuleId, axis: &str, label: &str) -> Result<(), Error> {
        if self.modules[source.index()].is_live()
            || self.modules[source.index()].split_into.is_empty()
        {
            return Err(Error::module(
                self.module_pos(source).clone(),
                format!(
                    "alias_variation on {:?} requires a create_variations call in the same pass",
                    self.module_name(source)
                ),
            ));
        }
        let split_into = self.modules[source.index()].split_into.clone();
        let target = split_into
            .iter()
            .copied()
            .find(|&child| {
                self.modules[child.index()]
                    .variant
                    .variations
                    .get(axis)
                    .is_some_and(|value| value == label)
            })
            .ok_or_else(|| {
                Error::module(
                    self.module_pos(source).clone(),
                    format!(
                        "alias_variation: no variant {label:?} on axis {axis:?} of {:?}",
                        self.module_name(source)
                    ),
                )
            })?;
        let variant = self.modules[source.index()].variant.clone();
        let group_id = self.modules[source.index()].group;
        self.groups[group_id.index()]
            .entries
            .push(GroupEntry::Alias { variant, target });
        Ok(())
    }

    /// Find the module named `name` whose variant equals `module`'s variant.
    fn find_identical_variant(&self, module: ModuleId, name: &str) -> Result<ModuleId, Error> {
        let group = self
            .group_by_name(name)
            .ok_or_else(|| {
                Error::module(
                    self.module_pos(module).clone(),
                    format!(
                        "replace_dependencies: {:?} depends on undefined module {name:?}",
                        self.module_name(module)
                    ),
                )
            })?;
        let wanted = &self.modules[module.index()].variant.variations;
        group
            .entries
            .iter()
            .filter_map(|entry| match entry {
                GroupEntry::Module(id) => Some(*id),
                GroupEntry::Alias { .. } => None,
            })
            .find(|id| {
                crate::graph::variations_equal(&self.modules[id.index()].variant.variations, wanted)
            })
            .ok_or_else(|| {
                Error::module(
                    self.module_pos(module).clone(),
                    format!(
                        "replace_dependencies could not find a variant of {name:?} matching {:?}",
                        self.module_name(module)
                    ),
                )
            })
    }

    fn apply_replacements(&mut self, replacements: &[(ModuleId, ModuleId)]) {
        if replacements.is_empty() {
            return;
        }
        for index in 0..self.modules.len() {
            if !self.modules[index].is_live() {
                continue;
            }
            let self_id = self.modules[index].id;
            for edge in &mut self.modules[index].direct_deps {
                if let Some(&(_, to)) = replacements.iter().find(|(from, _)| *from == edge.target) {
                    if to != self_id {
                        edge.target = to;
                    }
                }
            }
        }
    }
}
