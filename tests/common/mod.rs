//! Shared module types and fixtures for the integration suites.
#![allow(dead_code, reason = "each integration crate uses a subset of the fixtures")]

use blueprint::{
    BottomUpMutatorContext, Context, DependencyTag, Module, ModuleContext, ModuleId,
    module_downcast_ref, tag_downcast_ref,
};
use serde::Deserialize;

/// Properties shared by the walkable test module type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FooProperties {
    pub deps: Vec<String>,
    pub ignored_deps: Vec<String>,
    pub foo: String,
}

/// A module whose subtree dependency walks descend into.
#[derive(Debug, Clone)]
pub struct FooModule {
    pub properties: FooProperties,
}

impl Module for FooModule {
    fn generate_build_actions(&self, _ctx: &mut ModuleContext<'_>) {}

    fn clone_module(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BarProperties {
    pub deps: Vec<String>,
    pub ignored_deps: Vec<String>,
    pub bar: bool,
}

/// A module whose subtree dependency walks do not descend into.
#[derive(Debug, Clone)]
pub struct BarModule {
    pub properties: BarProperties,
}

impl Module for BarModule {
    fn generate_build_actions(&self, _ctx: &mut ModuleContext<'_>) {}

    fn clone_module(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }
}

/// Edge tag distinguishing followable from ignored dependencies.
#[derive(Debug, Clone, Copy)]
pub struct WalkerDepsTag {
    pub follow: bool,
}

impl DependencyTag for WalkerDepsTag {}

/// Adds each module's declared dependencies: ignored ones first with a
/// non-follow tag, then the real ones with a follow tag.
pub fn deps_mutator(ctx: &mut BottomUpMutatorContext<'_>) {
    let props = if let Some(module) = ctx.module::<FooModule>() {
        Some((
            module.properties.deps.clone(),
            module.properties.ignored_deps.clone(),
        ))
    } else {
        ctx.module::<BarModule>().map(|module| {
            (
                module.properties.deps.clone(),
                module.properties.ignored_deps.clone(),
            )
        })
    };
    if let Some((deps, ignored)) = props {
        ctx.add_dependency(WalkerDepsTag { follow: false }, &ignored);
        ctx.add_dependency(WalkerDepsTag { follow: true }, &deps);
    }
}

/// A context with both test module types and the deps mutator registered,
/// reading from the given in-memory tree.
pub fn test_context(files: &[(&str, &str)]) -> Context {
    let mut ctx = Context::new();
    ctx.mock_file_system(files.iter().copied());
    ctx.register_module_type("foo_module", |properties: FooProperties| FooModule {
        properties,
    });
    ctx.register_module_type("bar_module", |properties: BarProperties| BarModule {
        properties,
    });
    ctx.register_bottom_up_mutator("deps", deps_mutator);
    ctx
}

/// Parse and resolve, asserting both phases are error-free.
pub fn parse_and_resolve(ctx: &mut Context, root: &str) {
    let (_, errs) = ctx.parse_blueprints_files(root);
    assert!(errs.is_empty(), "unexpected parse errors: {errs:?}");
    let errs = ctx.resolve_dependencies(None);
    assert!(errs.is_empty(), "unexpected dep errors: {errs:?}");
}

/// Record the down/up visit order of a dependency walk as module-name
/// strings, honouring non-follow tags and the walkability of each module
/// type.
pub fn walk_dependency_graph(
    ctx: &Context,
    top: ModuleId,
    allow_duplicates: bool,
) -> (String, String) {
    let mut down_order = String::new();
    let mut up_order = String::new();
    ctx.walk_deps(
        top,
        allow_duplicates,
        |dep, _parent| {
            down_order.push_str(ctx.module_name(dep.id));
            if let Some(tag) = dep.tag.and_then(tag_downcast_ref::<WalkerDepsTag>) {
                if !tag.follow {
                    return false;
                }
            }
            module_downcast_ref::<FooModule>(dep.module).is_some()
        },
        |dep, _parent| {
            up_order.push_str(ctx.module_name(dep.id));
        },
    );
    (down_order, up_order)
}
