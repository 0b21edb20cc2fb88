//! Blueprint graph engine.
//!
//! This library is the core of a meta-build tool: it parses declarative
//! blueprint files into a typed module graph, resolves inter-module
//! dependencies, runs registered mutators that may split modules into
//! variants and rewrite edges, and emits a Ninja build manifest through a
//! writer collaborator.
//!
//! The typical pipeline:
//!
//! ```rust,no_run
//! use blueprint::Context;
//!
//! let mut ctx = Context::new();
//! // ctx.register_module_type(...), ctx.register_bottom_up_mutator(...)
//! let (_deps, errs) = ctx.parse_blueprints_files("Blueprints");
//! assert!(errs.is_empty());
//! let errs = ctx.resolve_dependencies(None);
//! assert!(errs.is_empty());
//! let errs = ctx.prepare_build_actions(None);
//! assert!(errs.is_empty());
//! let mut writer = blueprint::ninja::NinjaTextWriter::new(Vec::new());
//! ctx.write_build_file(&mut writer).expect("write manifest");
//! ```

pub mod actions;
pub mod context;
pub mod errors;
pub mod fs;
pub mod graph;
pub mod hasher;
pub mod module;
mod mutate;
pub mod ninja;
mod parse;
mod phony;
pub mod provider;
pub mod singleton;
pub mod source_root;
pub mod syntax;
mod visit;
mod walk;

pub use actions::{BuildDef, BuildParams, LocalBuildActions, PoolDef, RuleDef, VariableDef};
pub use context::{Context, DepRef, PACKAGE_INCLUDES_TYPE};
pub use errors::{Error, SourcePos};
pub use graph::{
    BaseDependencyTag, DependencyTag, ModuleId, Variation, VariationMap, tag_downcast_ref,
};
pub use module::{Module, ModuleContext, module_downcast_ref};
pub use mutate::{BottomUpMutatorContext, TopDownMutatorContext};
pub use provider::{ProviderKey, ProviderValue};
pub use singleton::{Singleton, SingletonContext};
