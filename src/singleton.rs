//! Singletons: once-per-build components.
//!
//! A singleton runs after every module has produced its build actions. It
//! sees a read-only view of the whole graph and contributes its own
//! definitions, plus the manifest-level defaults and subninja includes no
//! single module owns.

use std::any::Any;

use indexmap::IndexMap;

use crate::actions::{BuildParams, LocalBuildActions, PoolDef, RuleDef, VariableDef};
use crate::context::Context;
use crate::errors::Error;
use crate::graph::ModuleId;
use crate::module::Module;
use crate::provider::{ProviderKey, ProviderValue};

/// A registered singleton component.
pub trait Singleton: Send + Sync {
    fn generate_build_actions(&self, ctx: &mut SingletonContext<'_>);
}

pub(crate) struct SingletonInfo {
    pub name: String,
    pub singleton: Box<dyn Singleton>,
    /// Whether this singleton may run concurrently with other parallel
    /// singletons. Emission order stays registration order either way.
    pub parallel: bool,
}

/// Context handed to [`Singleton::generate_build_actions`].
pub struct SingletonContext<'a> {
    pub(crate) core: &'a Context,
    pub(crate) name: &'a str,
    pub(crate) actions: LocalBuildActions,
    pub(crate) defaults: Vec<String>,
    pub(crate) subninjas: Vec<String>,
    pub(crate) errors: Vec<Error>,
}

impl<'a> SingletonContext<'a> {
    pub(crate) fn new(core: &'a Context, name: &'a str) -> Self {
        Self {
            core,
            name,
            actions: LocalBuildActions::default(),
            defaults: Vec::new(),
            subninjas: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Visit every live module in deterministic graph order.
    pub fn visit_all_modules(&self, mut visit: impl FnMut(ModuleId, &dyn Module)) {
        self.core.visit_all_modules(|id, module| visit(id, module));
    }

    /// The name of a visited module.
    #[must_use]
    pub fn module_name(&self, module: ModuleId) -> &str {
        self.core.module_name(module)
    }

    /// Read a provider off a visited module.
    #[must_use]
    pub fn module_provider<T: ProviderValue>(
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

    /// Define a global ninja variable.
    pub fn variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.actions.variables.push(VariableDef {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Define a ninja rule.
    pub fn rule(&mut self, name: impl Into<String>, params: IndexMap<String, String>) {
        self.actions.rules.push(RuleDef {
            name: name.into(),
            params,
        });
    }

    /// Define a ninja pool.
    pub fn pool(&mut self, name: impl Into<String>, depth: u32) {
        self.actions.pools.push(PoolDef {
            name: name.into(),
            depth,
        });
    }

    /// Record a build statement.
    pub fn build(&mut self, params: BuildParams) {
        self.actions.build_defs.push(params.into());
    }

    /// Mark a target as a manifest default.
    pub fn add_default_target(&mut self, target: impl Into<String>) {
        self.defaults.push(target.into());
    }

    /// Include another ninja file from the generated manifest.
    pub fn add_subninja(&mut self, path: impl Into<String>) {
        self.subninjas.push(path.into());
    }

    /// Report an error attributed to this singleton.
    pub fn errorf(&mut self, message: impl Into<String>) {
        self.errors.push(Error::Internal {
            message: format!("singleton {:?}: {}", self.name, message.into()),
        });
    }
}
