//! The engine context: registries, the module graph, and the pipeline.
//!
//! A [`Context`] is configured with module types, mutators, and singletons,
//! then driven through the pipeline phases in order: parse the blueprint
//! files, resolve dependencies (which runs the mutators), prepare build
//! actions, and write the manifest. Each phase returns its accumulated
//! errors; callers must not advance past a non-empty error list.
//!
//! Registration is only valid before parsing begins; violating that is a
//! programming error and panics.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::actions::LocalBuildActions;
use crate::errors::{Error, SourcePos, cycle_error};
use crate::fs::{FileSystem, MockFileSystem, OsFileSystem};
use crate::graph::{
    DependencyTag, GroupEntry, GroupId, ModuleGroup, ModuleId, ModuleInfo, find_variant,
};
use crate::module::{Module, ModuleContext, ModuleFactory};
use crate::mutate::{BottomUpMutatorContext, DepQuery, MutatorInfo, MutatorKind, TopDownMutatorContext};
use crate::ninja::NinjaWriter;
use crate::parse::{DEFAULT_FILE_NAME, walk_blueprint_files};
use crate::phony::deduplicate_order_only_deps;
use crate::provider::{ProviderKey, ProviderTable, ProviderValue};
use crate::singleton::{Singleton, SingletonContext, SingletonInfo};
use crate::source_root::SourceRootDirs;
use crate::syntax::{FileParser, DraftParser, ModuleBlock, ParsedFile, PropertyValue, properties_to_json};
use crate::visit::{VisitGraph, VisitOrder, parallel_visit};

/// The one module type the engine recognises directly: gates every other
/// module in its file on the context's include tags.
pub const PACKAGE_INCLUDES_TYPE: &str = "blueprint_package_includes";

/// A module definition suppressed by source-root filtering.
pub(crate) struct SkippedDefinition {
    pub file: Utf8PathBuf,
    pub prefix: String,
}

/// A dependency edge as seen by visitors: target handle, payload, and tag.
pub struct DepRef<'a> {
    pub id: ModuleId,
    pub module: &'a dyn Module,
    pub tag: Option<&'a dyn DependencyTag>,
}

/// The graph engine.
pub struct Context {
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) parser: Arc<dyn FileParser>,
    pub(crate) factories: IndexMap<String, ModuleFactory>,
    pub(crate) mutators: Vec<MutatorInfo>,
    pub(crate) singletons: Vec<SingletonInfo>,
    pub(crate) include_tags: BTreeSet<String>,
    pub(crate) source_roots: SourceRootDirs,
    pub(crate) parse_started: bool,
    pub(crate) parallelism: usize,

    pub(crate) modules: Vec<ModuleInfo>,
    pub(crate) groups: Vec<ModuleGroup>,
    pub(crate) groups_by_name: HashMap<String, GroupId>,
    pub(crate) modules_sorted: Vec<ModuleId>,
    pub(crate) skipped: HashMap<String, Vec<SkippedDefinition>>,
    pub(crate) providers: ProviderTable,
    pub(crate) config: Option<Arc<dyn Any + Send + Sync>>,

    pub(crate) singleton_actions: Vec<LocalBuildActions>,
    pub(crate) phony_actions: LocalBuildActions,
    pub(crate) defaults: Vec<String>,
    pub(crate) subninjas: Vec<String>,
    pub(crate) known_aggregates: HashSet<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fs: Arc::new(OsFileSystem),
            parser: Arc::new(DraftParser),
            factories: IndexMap::new(),
            mutators: Vec::new(),
            singletons: Vec::new(),
            include_tags: BTreeSet::new(),
            source_roots: SourceRootDirs::default(),
            parse_started: false,
            parallelism: num_cpus::get().max(1),
            modules: Vec::new(),
            groups: Vec::new(),
            groups_by_name: HashMap::new(),
            modules_sorted: Vec::new(),
            skipped: HashMap::new(),
            providers: ProviderTable::default(),
            config: None,
            singleton_actions: Vec::new(),
            phony_actions: LocalBuildActions::default(),
            defaults: Vec::new(),
            subninjas: Vec::new(),
            known_aggregates: HashSet::new(),
        }
    }

    fn assert_pre_parse(&self, what: &str) {
        assert!(
            !self.parse_started,
            "{what} is only valid before parsing begins"
        );
    }

    /// Register a module type. `build` receives the deserialised property
    /// struct (the parsed properties minus `name`, which the engine owns).
    ///
    /// # Panics
    ///
    /// Panics when called after parsing begins or when `name` is already
    /// registered.
    pub fn register_module_type<P, M, F>(&mut self, name: &str, build: F)
    where
        P: DeserializeOwned,
        M: Module,
        F: Fn(P) -> M + Send + Sync + 'static,
    {
        self.assert_pre_parse("register_module_type");
        let factory: ModuleFactory = Arc::new(move |value| {
            let props: P = serde_json::from_value(value)?;
            Ok(Box::new(build(props)) as Box<dyn Module>)
        });
        let previous = self.factories.insert(name.to_owned(), factory);
        assert!(previous.is_none(), "module type {name:?} registered twice");
    }

    /// Register a bottom-up mutator. Mutators run in registration order.
    pub fn register_bottom_up_mutator<F>(&mut self, name: &str, mutator: F)
    where
        F: Fn(&mut BottomUpMutatorContext<'_>) + Send + Sync + 'static,
    {
        self.assert_pre_parse("register_bottom_up_mutator");
        self.mutators.push(MutatorInfo {
            name: name.to_owned(),
            kind: MutatorKind::BottomUp(Arc::new(mutator)),
        });
    }

    /// Register a top-down mutator. Mutators run in registration order.
    pub fn register_top_down_mutator<F>(&mut self, name: &str, mutator: F)
    where
        F: Fn(&mut TopDownMutatorContext<'_>) + Send + Sync + 'static,
    {
        self.assert_pre_parse("register_top_down_mutator");
        self.mutators.push(MutatorInfo {
            name: name.to_owned(),
            kind: MutatorKind::TopDown(Arc::new(mutator)),
        });
    }

    /// Register a singleton. `parallel` singletons may run concurrently with
    /// each other; emission order stays registration order regardless.
    pub fn register_singleton_type(
        &mut self,
        name: &str,
        singleton: impl Singleton + 'static,
        parallel: bool,
    ) {
        self.assert_pre_parse("register_singleton_type");
        self.singletons.push(SingletonInfo {
            name: name.to_owned(),
            singleton: Box::new(singleton),
            parallel,
        });
    }

    /// Add include tags consulted by `blueprint_package_includes` blocks.
    pub fn add_include_tags<S: Into<String>>(&mut self, tags: impl IntoIterator<Item = S>) {
        self.include_tags.extend(tags.into_iter().map(Into::into));
    }

    /// Add source-root allow/deny prefixes (leading `-` denies).
    pub fn add_source_root_dirs<S: Into<String>>(&mut self, dirs: impl IntoIterator<Item = S>) {
        self.source_roots.add(dirs);
    }

    /// Replace the filesystem with an in-memory tree. Test-oriented.
    pub fn mock_file_system<P, C>(&mut self, files: impl IntoIterator<Item = (P, C)>)
    where
        P: Into<Utf8PathBuf>,
        C: Into<Vec<u8>>,
    {
        self.assert_pre_parse("mock_file_system");
        self.fs = Arc::new(MockFileSystem::new(files));
    }

    /// Replace the filesystem collaborator.
    pub fn set_file_system(&mut self, fs: Arc<dyn FileSystem>) {
        self.assert_pre_parse("set_file_system");
        self.fs = fs;
    }

    /// Replace the parser collaborator.
    pub fn set_file_parser(&mut self, parser: Arc<dyn FileParser>) {
        self.assert_pre_parse("set_file_parser");
        self.parser = parser;
    }

    /// Cap in-flight callbacks in the parallel phases. `1` makes bottom-up
    /// visit order fully deterministic.
    pub fn set_parallelism(&mut self, parallelism: usize) {
        self.parallelism = parallelism.max(1);
    }

    /// Enable the provider verification pass.
    pub fn set_verify_providers(&mut self, verify: bool) {
        self.providers.set_verify(verify);
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    /// Parse `root_file` and everything it transitively references, adding
    /// module definitions to the graph in deterministic file order.
    pub fn parse_blueprints_files(
        &mut self,
        root_file: impl AsRef<Utf8Path>,
    ) -> (Vec<Utf8PathBuf>, Vec<Error>) {
        let root = root_file.as_ref().to_path_buf();
        let subfile = root
            .file_name()
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_owned();
        self.parse_files(&[root], &subfile, true)
    }

    /// Parse exactly `files` (no transitive discovery), adding module
    /// definitions in the given order.
    pub fn parse_file_list<P: AsRef<Utf8Path>>(
        &mut self,
        dir: impl AsRef<Utf8Path>,
        files: &[P],
    ) -> (Vec<Utf8PathBuf>, Vec<Error>) {
        let seeds = resolve_seeds(dir.as_ref(), files);
        let subfile = seeds
            .first()
            .and_then(|p| p.file_name())
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_owned();
        self.parse_files(&seeds, &subfile, false)
    }

    /// Walk blueprint files without building the graph, invoking `visitor`
    /// per parsed file in deterministic order.
    pub fn walk_blueprints_files<P: AsRef<Utf8Path>>(
        &mut self,
        dir: impl AsRef<Utf8Path>,
        seeds: &[P],
        mut visitor: impl FnMut(&ParsedFile),
    ) -> (Vec<Utf8PathBuf>, Vec<Error>) {
        self.parse_started = true;
        let seeds = resolve_seeds(dir.as_ref(), seeds);
        let subfile = seeds
            .first()
            .and_then(|p| p.file_name())
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_owned();
        walk_blueprint_files(
            self.fs.as_ref(),
            self.parser.as_ref(),
            self.parallelism,
            &seeds,
            &subfile,
            true,
            &mut |file| visitor(file),
        )
    }

    fn parse_files(
        &mut self,
        seeds: &[Utf8PathBuf],
        subfile_name: &str,
        follow_refs: bool,
    ) -> (Vec<Utf8PathBuf>, Vec<Error>) {
        self.parse_started = true;
        let mut parsed: Vec<ParsedFile> = Vec::new();
        let (deps, mut errs) = walk_blueprint_files(
            self.fs.as_ref(),
            self.parser.as_ref(),
            self.parallelism,
            seeds,
            subfile_name,
            follow_refs,
            &mut |file| parsed.push(file.clone()),
        );
        for file in &parsed {
            errs.extend(self.process_parsed_file(file));
        }
        (deps, errs)
    }

    /// Apply package-include gating and source-root filtering, then add the
    /// file's module blocks to the graph.
    fn process_parsed_file(&mut self, file: &ParsedFile) -> Vec<Error> {
        let mut errs = Vec::new();
        let mut gated = false;
        for block in &file.modules {
            if block.type_name != PACKAGE_INCLUDES_TYPE {
                continue;
            }
            match block.properties.get("match_all") {
                Some(value) => match value.as_string_list() {
                    Some(tags) => {
                        if tags.iter().any(|tag| !self.include_tags.contains(tag)) {
                            gated = true;
                        }
                    }
                    None => errs.push(Error::property(
                        value.pos.in_file(file.path.clone()),
                        "'match_all' must be a list of strings",
                    )),
                },
                None => errs.push(Error::property(
                    block.pos.in_file(file.path.clone()),
                    format!("property 'match_all' is missing from {PACKAGE_INCLUDES_TYPE}"),
                )),
            }
        }
        if gated {
            debug!(file = %file.path, "file gated out by package includes");
            return errs;
        }

        let (allowed, prefix) = self.source_roots.allowed(file.path.as_str());
        let prefix = prefix.to_owned();
        for block in &file.modules {
            if block.type_name == PACKAGE_INCLUDES_TYPE {
                continue;
            }
            if allowed {
                errs.extend(self.add_module(&file.path, block));
            } else if let Some(name) =
                block.properties.get("name").and_then(PropertyValue::as_str)
            {
                debug!(file = %file.path, module = name, "module skipped by source roots");
                self.skipped
                    .entry(name.to_owned())
                    .or_default()
                    .push(SkippedDefinition {
                        file: file.path.clone(),
                        prefix: prefix.clone(),
                    });
            }
        }
        errs
    }

    fn add_module(&mut self, path: &Utf8Path, block: &ModuleBlock) -> Vec<Error> {
        let pos = block.pos.in_file(path);
        let Some(name) = block.properties.get("name").and_then(PropertyValue::as_str) else {
            return vec![Error::property(
                pos,
                "property 'name' is missing from a module",
            )];
        };
        let name = name.to_owned();
        let Some(factory) = self.factories.get(&block.type_name) else {
            return vec![Error::module(
                pos,
                format!("unrecognised module type {:?}", block.type_name),
            )];
        };
        let factory = Arc::clone(factory);
        let mut properties = block.properties.clone();
        properties.shift_remove("name");
        match factory(properties_to_json(&properties)) {
            Ok(logic) => self.insert_module(name, block.type_name.clone(), pos, logic),
            Err(err) => vec![Error::property(pos, err.to_string())],
        }
    }

    /// Commit a module created by a top-down mutator. The new module carries
    /// its creator's position for diagnostics.
    pub(crate) fn add_created_module(
        &mut self,
        creator: ModuleId,
        type_name: &str,
        mut properties: serde_json::Value,
    ) -> Vec<Error> {
        let pos = self.modules[creator.index()].pos.clone();
        let Some(object) = properties.as_object_mut() else {
            return vec![Error::property(
                pos,
                "create_module properties must serialise to an object",
            )];
        };
        let name = match object.remove("name") {
            Some(serde_json::Value::String(name)) => name,
            _ => {
                return vec![Error::property(
                    pos,
                    "property 'name' is missing from a module",
                )];
            }
        };
        let Some(factory) = self.factories.get(type_name) else {
            return vec![Error::module(
                pos,
                format!("unrecognised module type {type_name:?}"),
            )];
        };
        let factory = Arc::clone(factory);
        match factory(properties) {
            Ok(logic) => self.insert_module(name, type_name.to_owned(), pos, logic),
            Err(err) => vec![Error::property(pos, err.to_string())],
        }
    }

    fn insert_module(
        &mut self,
        name: String,
        type_name: String,
        pos: SourcePos,
        logic: Box<dyn Module>,
    ) -> Vec<Error> {
        if let Some(&group_id) = self.groups_by_name.get(&name) {
            // Graph-construction modules all carry the empty variant, so any
            // existing entry is a duplicate definition.
            let mut errs = vec![Error::module(
                pos,
                format!("module {name:?} already defined"),
            )];
            if let Some(previous) = self.groups[group_id.index()].first_module() {
                errs.push(Error::module(
                    self.modules[previous.index()].pos.clone(),
                    "previous definition here",
                ));
            }
            return errs;
        }
        let group_id = GroupId(u32::try_from(self.groups.len()).expect("group arena size"));
        self.groups.push(ModuleGroup::new(name.clone()));
        self.groups_by_name.insert(name, group_id);
        let id = ModuleId(u32::try_from(self.modules.len()).expect("module arena size"));
        self.modules
            .push(ModuleInfo::new(id, group_id, type_name, pos, logic));
        self.groups[group_id.index()]
            .entries
            .push(GroupEntry::Module(id));
        self.modules_sorted.push(id);
        Vec::new()
    }

    pub(crate) fn rename_group(&mut self, module: ModuleId, new_name: &str) -> Result<(), Error> {
        if self.groups_by_name.contains_key(new_name) {
            return Err(Error::module(
                self.modules[module.index()].pos.clone(),
                format!(
                    "renaming module {:?} to {new_name:?}: a module with that name already exists",
                    self.module_name(module)
                ),
            ));
        }
        let group_id = self.modules[module.index()].group;
        let old = self.groups[group_id.index()].name.clone();
        self.groups_by_name.remove(&old);
        self.groups_by_name.insert(new_name.to_owned(), group_id);
        self.groups[group_id.index()].name = new_name.to_owned();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pipeline phases
    // ------------------------------------------------------------------

    /// Derive traversal adjacency, then run every registered mutator.
    pub fn resolve_dependencies(&mut self, config: Option<Arc<dyn Any + Send + Sync>>) -> Vec<Error> {
        self.config = config;
        let errs = self.update_dependencies();
        if !errs.is_empty() {
            return errs;
        }
        self.run_mutators()
    }

    /// Generate build actions for every module and singleton, then
    /// deduplicate shared order-only dependency sets.
    pub fn prepare_build_actions(
        &mut self,
        config: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Vec<Error> {
        if config.is_some() {
            self.config = config;
        }
        let mut errs = self.providers.freeze();
        if !errs.is_empty() {
            return errs;
        }

        // Module actions, collected bottom-up in parallel and committed in
        // graph order.
        let list = self.modules_sorted.clone();
        let collected: Mutex<HashMap<ModuleId, (LocalBuildActions, Vec<Error>)>> =
            Mutex::new(HashMap::new());
        {
            let core: &Context = &*self;
            let visit_errs = parallel_visit(
                core,
                VisitOrder::BottomUp,
                &list,
                core.parallelism,
                |id, _pause| {
                    let Some(logic) = core.modules[id.index()].logic.as_deref() else {
                        return false;
                    };
                    let mut mctx = ModuleContext::new(core, id);
                    logic.generate_build_actions(&mut mctx);
                    let ModuleContext {
                        actions, errors, ..
                    } = mctx;
                    collected
                        .lock()
                        .expect("action collection")
                        .insert(id, (actions, errors));
                    false
                },
            );
            errs.extend(visit_errs);
        }
        let mut collected = collected.into_inner().expect("action collection");
        for &id in &list {
            if let Some((actions, action_errs)) = collected.remove(&id) {
                errs.extend(action_errs);
                self.modules[id.index()].action_defs = actions;
            }
        }
        if !errs.is_empty() {
            return errs;
        }

        errs.extend(self.run_singletons());
        if !errs.is_empty() {
            return errs;
        }

        let order = self.modules_sorted.clone();
        self.phony_actions =
            deduplicate_order_only_deps(&mut self.modules, &order, &mut self.known_aggregates);
        Vec::new()
    }

    /// Run singletons in registration order; consecutive `parallel`
    /// singletons run concurrently. Results commit in registration order.
    fn run_singletons(&mut self) -> Vec<Error> {
        let singletons = std::mem::take(&mut self.singletons);
        let mut results: Vec<Option<SingletonOutcome>> = Vec::new();
        results.resize_with(singletons.len(), || None);
        let core: &Context = &*self;

        let mut index = 0;
        while index < singletons.len() {
            if singletons[index].parallel {
                let mut batch_end = index;
                while batch_end < singletons.len() && singletons[batch_end].parallel {
                    batch_end += 1;
                }
                let batch: Vec<SingletonOutcome> = std::thread::scope(|scope| {
                    let handles: Vec<_> = singletons[index..batch_end]
                        .iter()
                        .map(|info| scope.spawn(move || run_singleton(core, info)))
                        .collect();
                    handles
                        .into_iter()
                        .map(|handle| handle.join().expect("singleton thread"))
                        .collect()
                });
                for (offset, outcome) in batch.into_iter().enumerate() {
                    results[index + offset] = Some(outcome);
                }
                index = batch_end;
            } else {
                results[index] = Some(run_singleton(core, &singletons[index]));
                index += 1;
            }
        }

        self.singletons = singletons;
        let mut errs = Vec::new();
        self.singleton_actions.clear();
        self.defaults.clear();
        self.subninjas.clear();
        for outcome in results.into_iter().flatten() {
            errs.extend(outcome.errors);
            self.singleton_actions.push(outcome.actions);
            self.defaults.extend(outcome.defaults);
            self.subninjas.extend(outcome.subninjas);
        }
        errs
    }

    /// Write the manifest through `writer` in the fixed emission order:
    /// variables, pools, rules, build statements (modules, then singletons,
    /// then phony aggregates), defaults, and subninja includes.
    pub fn write_build_file(&self, writer: &mut dyn NinjaWriter) -> anyhow::Result<()> {
        use anyhow::Context as _;

        writer
            .comment("generated build manifest - do not edit")
            .context("write manifest header")?;
        writer.blank().context("write manifest header")?;

        let sections: Vec<&LocalBuildActions> = self
            .modules_sorted
            .iter()
            .map(|id| &self.modules[id.index()].action_defs)
            .chain(self.singleton_actions.iter())
            .chain(std::iter::once(&self.phony_actions))
            .filter(|actions| !actions.is_empty())
            .collect();

        let mut wrote_variables = false;
        for actions in &sections {
            for variable in &actions.variables {
                writer
                    .variable(&variable.name, &variable.value)
                    .context("write ninja variable")?;
                wrote_variables = true;
            }
        }
        if wrote_variables {
            writer.blank().context("write ninja variable")?;
        }

        for actions in &sections {
            for pool in &actions.pools {
                writer.pool(pool).context("write ninja pool")?;
                writer.blank().context("write ninja pool")?;
            }
        }

        for actions in &sections {
            for rule in &actions.rules {
                writer.rule(rule).context("write ninja rule")?;
                writer.blank().context("write ninja rule")?;
            }
        }

        for actions in &sections {
            for def in &actions.build_defs {
                writer.build(def).context("write ninja build statement")?;
                writer.blank().context("write ninja build statement")?;
            }
        }

        if !self.defaults.is_empty() {
            writer
                .default(&self.defaults)
                .context("write ninja defaults")?;
        }
        for subninja in &self.subninjas {
            writer.subninja(subninja).context("write subninja include")?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Graph derivation
    // ------------------------------------------------------------------

    /// Rebuild `forward_deps`/`reverse_deps` as exact mutual inverses of the
    /// live dependency edges and re-derive the bottom-up traversal order (a
    /// stable postorder DFS in definition order). Reports dependency cycles.
    pub(crate) fn update_dependencies(&mut self) -> Vec<Error> {
        let count = self.modules.len();
        let mut forward: Vec<Vec<ModuleId>> = vec![Vec::new(); count];
        for module in &self.modules {
            if !module.is_live() {
                continue;
            }
            let mut seen = HashSet::new();
            for edge in &module.direct_deps {
                if seen.insert(edge.target) {
                    forward[module.id.index()].push(edge.target);
                }
            }
        }

        #[derive(Clone, Copy, PartialEq, Eq)]
        enum VisitState {
            Visiting,
            Visited,
        }

        fn visit(
            module: ModuleId,
            forward: &[Vec<ModuleId>],
            states: &mut [Option<VisitState>],
            stack: &mut Vec<ModuleId>,
            sorted: &mut Vec<ModuleId>,
        ) -> Option<Vec<ModuleId>> {
            match states[module.index()] {
                Some(VisitState::Visited) => return None,
                Some(VisitState::Visiting) => {
                    let start = stack
                        .iter()
                        .position(|&m| m == module)
                        .unwrap_or_default();
                    let mut cycle: Vec<ModuleId> = stack[start..].to_vec();
                    cycle.reverse();
                    return Some(cycle);
                }
                None => {}
            }
            states[module.index()] = Some(VisitState::Visiting);
            stack.push(module);
            for &dep in &forward[module.index()] {
                if let Some(cycle) = visit(dep, forward, states, stack, sorted) {
                    return Some(cycle);
                }
            }
            stack.pop();
            states[module.index()] = Some(VisitState::Visited);
            sorted.push(module);
            None
        }

        let mut states: Vec<Option<VisitState>> = vec![None; count];
        let mut sorted = Vec::new();
        let live: Vec<ModuleId> = self.live_modules().collect();
        for &module in &live {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(module, &forward, &mut states, &mut stack, &mut sorted) {
                let names: Vec<String> = cycle
                    .iter()
                    .map(|&id| self.module_name(id).to_owned())
                    .collect();
                return cycle_error(&names);
            }
        }

        for (index, deps) in forward.into_iter().enumerate() {
            self.modules[index].forward_deps = deps;
            self.modules[index].reverse_deps.clear();
        }
        let mut inverse: Vec<(ModuleId, ModuleId)> = Vec::new();
        for &module in &live {
            for &dep in &self.modules[module.index()].forward_deps {
                inverse.push((dep, module));
            }
        }
        for (dep, module) in inverse {
            self.modules[dep.index()].reverse_deps.push(module);
        }
        self.modules_sorted = sorted;
        Vec::new()
    }

    // ------------------------------------------------------------------
    // Dependency resolution
    // ------------------------------------------------------------------

    /// Resolve a dependency request from `from` to the module named `name`,
    /// selecting the variant `query` describes.
    pub(crate) fn resolve_dependency_target(
        &self,
        from: ModuleId,
        name: &str,
        query: &DepQuery,
    ) -> Result<ModuleId, Error> {
        let from_info = &self.modules[from.index()];
        let from_name = &self.groups[from_info.group.index()].name;
        if from_name == name {
            return Err(Error::module(
                from_info.pos.clone(),
                format!("module {name:?} depends on itself"),
            ));
        }
        let Some(&group_id) = self.groups_by_name.get(name) else {
            if let Some(defs) = self.skipped.get(name) {
                let files = defs
                    .iter()
                    .map(|def| format!("{:?}", def.file.as_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                let reasons = defs
                    .iter()
                    .map(|def| {
                        format!(
                            "{:?} is a descendant of {:?}, and that path prefix is not in the allowed source roots",
                            def.file.as_str(),
                            def.prefix
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(Error::module(
                    from_info.pos.clone(),
                    format!(
                        "module {from_name:?} depends on skipped module {name:?}; {name:?} was defined in file(s) [{files}], but was skipped for reason(s) [{reasons}]"
                    ),
                ));
            }
            return Err(Error::module(
                from_info.pos.clone(),
                format!("{from_name:?} depends on undefined module {name:?}"),
            ));
        };

        let group = &self.groups[group_id.index()];
        let (variations, far) = match query {
            DepQuery::Direct => (&[][..], false),
            DepQuery::Variations(v) => (v.as_slice(), false),
            DepQuery::FarVariations(v) => (v.as_slice(), true),
        };
        let (found, composed) = find_variant(from_info, group, &self.modules, variations, far);
        found.ok_or_else(|| {
            let available = group
                .entries
                .iter()
                .map(|entry| match entry {
                    GroupEntry::Module(id) => {
                        render_variant(&self.modules[id.index()].variant.variations)
                    }
                    GroupEntry::Alias { variant, .. } => {
                        format!("{} (alias)", render_variant(&variant.variations))
                    }
                })
                .collect::<Vec<_>>()
                .join("\n  ");
            Error::module(
                from_info.pos.clone(),
                format!(
                    "dependency {name:?} of {from_name:?} missing variant:\n  {}\navailable variants:\n  {available}",
                    render_variant(&composed)
                ),
            )
        })
    }

    // ------------------------------------------------------------------
    // Read-only graph access
    // ------------------------------------------------------------------

    /// The first module defined under `name`, if any.
    #[must_use]
    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.group_by_name(name)?.first_module()
    }

    /// Every variant module defined under `name`, in group order.
    #[must_use]
    pub fn modules_by_name(&self, name: &str) -> Vec<ModuleId> {
        self.group_by_name(name).map_or_else(Vec::new, |group| {
            group
                .entries
                .iter()
                .filter_map(|entry| match entry {
                    GroupEntry::Module(id) => Some(*id),
                    GroupEntry::Alias { .. } => None,
                })
                .collect()
        })
    }

    pub(crate) fn group_by_name(&self, name: &str) -> Option<&ModuleGroup> {
        self.groups_by_name
            .get(name)
            .map(|id| &self.groups[id.index()])
    }

    /// The module's name.
    #[must_use]
    pub fn module_name(&self, module: ModuleId) -> &str {
        &self.groups[self.modules[module.index()].group.index()].name
    }

    /// The module's type name.
    #[must_use]
    pub fn module_type(&self, module: ModuleId) -> &str {
        &self.modules[module.index()].type_name
    }

    /// The module's stringified variant name (empty for unsplit modules).
    #[must_use]
    pub fn module_variant_name(&self, module: ModuleId) -> &str {
        &self.modules[module.index()].variant.name
    }

    /// The label the module carries on `axis`, if any.
    #[must_use]
    pub fn module_variation(&self, module: ModuleId, axis: &str) -> Option<&str> {
        self.modules[module.index()]
            .variant
            .variations
            .get(axis)
            .map(String::as_str)
    }

    pub(crate) fn module_pos(&self, module: ModuleId) -> &SourcePos {
        &self.modules[module.index()].pos
    }

    /// Directory containing the module's blueprint file.
    #[must_use]
    pub fn module_dir(&self, module: ModuleId) -> Utf8PathBuf {
        self.modules[module.index()].dir()
    }

    /// The module's logic payload, if the module is live.
    #[must_use]
    pub fn module_logic(&self, module: ModuleId) -> Option<&dyn Module> {
        self.modules[module.index()].logic.as_deref()
    }

    /// Read a provider off a module.
    #[must_use]
    pub fn module_provider<T: ProviderValue>(
        &self,
        module: ModuleId,
        key: ProviderKey<T>,
    ) -> Option<&T> {
        self.providers.get(module, key)
    }

    /// Host configuration, if one was supplied to the pipeline.
    #[must_use]
    pub fn config<T: Any>(&self) -> Option<&T> {
        let config = self.config.as_ref()?;
        (&**config as &dyn Any).downcast_ref()
    }

    /// Visit a module's direct dependencies in edge order.
    pub fn visit_direct_deps(&self, module: ModuleId, mut visit: impl FnMut(DepRef<'_>)) {
        for edge in &self.modules[module.index()].direct_deps {
            let Some(logic) = self.modules[edge.target.index()].logic.as_deref() else {
                continue;
            };
            visit(DepRef {
                id: edge.target,
                module: logic,
                tag: edge.tag.as_deref(),
            });
        }
    }

    /// Visit every live module in deterministic graph order.
    pub fn visit_all_modules(&self, mut visit: impl FnMut(ModuleId, &dyn Module)) {
        for &id in &self.modules_sorted {
            if let Some(logic) = self.modules[id.index()].logic.as_deref() {
                visit(id, logic);
            }
        }
    }

    /// Render every provider value for cross-run comparison in tests.
    #[must_use]
    pub fn rendered_providers(&self) -> Vec<(ModuleId, &'static str, String)> {
        self.providers.render_all()
    }

    pub(crate) fn live_modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules
            .iter()
            .filter(|module| module.is_live())
            .map(|module| module.id)
    }
}

struct SingletonOutcome {
    actions: LocalBuildActions,
    defaults: Vec<String>,
    subninjas: Vec<String>,
    errors: Vec<Error>,
}

fn run_singleton(core: &Context, info: &SingletonInfo) -> SingletonOutcome {
    let mut ctx = SingletonContext::new(core, &info.name);
    info.singleton.generate_build_actions(&mut ctx);
    SingletonOutcome {
        actions: ctx.actions,
        defaults: ctx.defaults,
        subninjas: ctx.subninjas,
        errors: ctx.errors,
    }
}

fn resolve_seeds<P: AsRef<Utf8Path>>(dir: &Utf8Path, files: &[P]) -> Vec<Utf8PathBuf> {
    files
        .iter()
        .map(|file| {
            let file = file.as_ref();
            if dir.as_str().is_empty() || dir.as_str() == "." {
                file.to_path_buf()
            } else {
                dir.join(file)
            }
        })
        .collect()
}

fn render_variant(variations: &crate::graph::VariationMap) -> String {
    if variations.is_empty() {
        "<empty variant>".to_owned()
    } else {
        variations
            .iter()
            .map(|(axis, value)| format!("{axis}:{value}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl VisitGraph for Context {
    fn forward_deps(&self, module: ModuleId) -> &[ModuleId] {
        &self.modules[module.index()].forward_deps
    }

    fn reverse_deps(&self, module: ModuleId) -> &[ModuleId] {
        &self.modules[module.index()].reverse_deps
    }

    fn module_name(&self, module: ModuleId) -> &str {
        Context::module_name(self, module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DepEdge;
    use crate::module::tests::NullModule;

    fn context_with_modules(names: &[&str]) -> (Context, Vec<ModuleId>) {
        let mut ctx = Context::new();
        let mut ids = Vec::new();
        for name in names {
            let errs = ctx.insert_module(
                (*name).to_owned(),
                "test_module".to_owned(),
                SourcePos::default(),
                Box::new(NullModule),
            );
            assert!(errs.is_empty(), "unexpected errors: {errs:?}");
            ids.push(ctx.module_by_name(name).expect("inserted module"));
        }
        (ctx, ids)
    }

    fn add_dep(ctx: &mut Context, from: ModuleId, to: ModuleId) {
        ctx.modules[from.index()].direct_deps.push(DepEdge {
            target: to,
            tag: None,
        });
    }

    #[test]
    fn update_dependencies_builds_mutual_inverses() {
        let (mut ctx, ids) = context_with_modules(&["A", "B", "C"]);
        add_dep(&mut ctx, ids[0], ids[1]);
        add_dep(&mut ctx, ids[0], ids[2]);
        add_dep(&mut ctx, ids[1], ids[2]);
        assert!(ctx.update_dependencies().is_empty());

        for module in &ctx.modules {
            for &dep in &module.forward_deps {
                assert!(
                    ctx.modules[dep.index()].reverse_deps.contains(&module.id),
                    "reverse edge missing for {:?} -> {dep:?}",
                    module.id
                );
            }
            for &parent in &module.reverse_deps {
                assert!(
                    ctx.modules[parent.index()].forward_deps.contains(&module.id),
                    "forward edge missing for {parent:?} -> {:?}",
                    module.id
                );
            }
        }
    }

    #[test]
    fn update_dependencies_deduplicates_parallel_edges() {
        let (mut ctx, ids) = context_with_modules(&["A", "B"]);
        add_dep(&mut ctx, ids[0], ids[1]);
        add_dep(&mut ctx, ids[0], ids[1]);
        assert!(ctx.update_dependencies().is_empty());
        assert_eq!(ctx.modules[ids[0].index()].forward_deps, vec![ids[1]]);
        assert_eq!(ctx.modules[ids[1].index()].reverse_deps, vec![ids[0]]);
    }

    #[test]
    fn update_dependencies_orders_postorder_in_adjacency_order() {
        let (mut ctx, ids) = context_with_modules(&["A", "B", "C", "D"]);
        add_dep(&mut ctx, ids[0], ids[1]);
        add_dep(&mut ctx, ids[0], ids[2]);
        add_dep(&mut ctx, ids[1], ids[3]);
        add_dep(&mut ctx, ids[2], ids[3]);
        assert!(ctx.update_dependencies().is_empty());
        let order: Vec<&str> = ctx
            .modules_sorted
            .iter()
            .map(|&id| Context::module_name(&ctx, id))
            .collect();
        assert_eq!(order, vec!["D", "B", "C", "A"]);
    }

    #[test]
    fn update_dependencies_reports_cycles() {
        let (mut ctx, ids) = context_with_modules(&["A", "B"]);
        add_dep(&mut ctx, ids[0], ids[1]);
        add_dep(&mut ctx, ids[1], ids[0]);
        let errs = ctx.update_dependencies();
        let rendered: Vec<String> = errs.iter().map(ToString::to_string).collect();
        assert_eq!(rendered[0], "encountered dependency cycle");
        assert!(rendered.contains(&"module \"A\" depends on module \"B\"".to_owned()));
        assert!(rendered.contains(&"module \"B\" depends on module \"A\"".to_owned()));
    }

    #[test]
    fn duplicate_insertion_is_rejected() {
        let (mut ctx, _) = context_with_modules(&["A"]);
        let errs = ctx.insert_module(
            "A".to_owned(),
            "test_module".to_owned(),
            SourcePos::default(),
            Box::new(NullModule),
        );
        assert_eq!(errs.len(), 2);
        assert!(errs[0].to_string().contains("module \"A\" already defined"));
    }

    #[test]
    #[should_panic(expected = "only valid before parsing begins")]
    fn registration_after_parse_panics() {
        let mut ctx = Context::new();
        ctx.mock_file_system([("Blueprints", "")]);
        let _ = ctx.parse_blueprints_files("Blueprints");
        ctx.register_module_type("late", |_: serde_json::Value| NullModule);
    }
}
