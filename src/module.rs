//! The host-facing module payload.
//!
//! Every node of the graph carries a *logic module*: an opaque host object
//! built by the module type's factory from the parsed properties. The engine
//! only requires the [`Module`] trait; domain behaviour is added by the host
//! through downcasting.

use std::any::Any;

use crate::actions::{BuildParams, LocalBuildActions, PoolDef, RuleDef, VariableDef};
use crate::context::{Context, DepRef};
use crate::errors::Error;
use crate::graph::ModuleId;
use crate::provider::{ProviderKey, ProviderValue};
use camino::Utf8PathBuf;
use indexmap::IndexMap;

/// A logic module: the host payload of one graph node.
///
/// Implementations must be `Clone`-like via [`Module::clone_module`]; the
/// engine clones the payload when a mutator splits the module into variants.
pub trait Module: Any + Send + Sync {
    /// Emit the module's build definitions.
    fn generate_build_actions(&self, ctx: &mut ModuleContext<'_>);

    /// Duplicate the payload for a new variant.
    fn clone_module(&self) -> Box<dyn Module>;
}

/// Downcast a logic module to its concrete host type.
#[must_use]
pub fn module_downcast_ref<T: Module>(module: &dyn Module) -> Option<&T> {
    let any: &dyn Any = module;
    any.downcast_ref()
}

/// Factory closure stored in the module-type registry. Receives the parsed
/// properties (minus `name`, which the engine owns) as a JSON object.
pub(crate) type ModuleFactory = std::sync::Arc<
    dyn Fn(serde_json::Value) -> Result<Box<dyn Module>, serde_json::Error> + Send + Sync,
>;

/// Context handed to [`Module::generate_build_actions`].
///
/// Records build definitions locally; the engine commits them to the graph
/// once the whole phase completes.
pub struct ModuleContext<'a> {
    pub(crate) core: &'a Context,
    pub(crate) module: ModuleId,
    pub(crate) actions: LocalBuildActions,
    pub(crate) errors: Vec<Error>,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(core: &'a Context, module: ModuleId) -> Self {
        Self {
            core,
            module,
            actions: LocalBuildActions::default(),
            errors: Vec::new(),
        }
    }

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

    /// Directory containing the module's blueprint file.
    #[must_use]
    pub fn module_dir(&self) -> Utf8PathBuf {
        self.core.module_dir(self.module)
    }

    /// The label this module carries on `axis`, if it was split there.
    #[must_use]
    pub fn module_variation(&self, axis: &str) -> Option<&str> {
        self.core.module_variation(self.module, axis)
    }

    /// Host configuration, if one was supplied to the pipeline.
    #[must_use]
    pub fn config<T: Any>(&self) -> Option<&T> {
        self.core.config::<T>()
    }

    /// Read a provider off this module.
    #[must_use]
    pub fn provider<T: ProviderValue>(&self, key: ProviderKey<T>) -> Option<&T> {
        self.core.module_provider(self.module, key)
    }

    /// Read a provider off another module, typically a visited dependency.
    #[must_use]
    pub fn other_module_provider<T: ProviderValue>(
        &self,
        module: ModuleId,
        key: ProviderKey<T>,
    ) -> Option<&T> {
        self.core.module_provider(module, key)
    }

    /// The name of another module.
    #[must_use]
    pub fn other_module_name(&self, module: ModuleId) -> &str {
        self.core.module_name(module)
    }

    /// Visit this module's direct dependencies in edge order.
    pub fn visit_direct_deps(&self, visit: impl FnMut(DepRef<'_>)) {
        self.core.visit_direct_deps(self.module, visit);
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

    /// Report a module error positioned at this module's definition.
    pub fn module_errorf(&mut self, message: impl Into<String>) {
        self.errors.push(Error::module(
            self.core.module_pos(self.module).clone(),
            message,
        ));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Inert payload used by unit tests that only exercise graph structure.
    #[derive(Debug, Clone)]
    pub(crate) struct NullModule;

    impl Module for NullModule {
        fn generate_build_actions(&self, _ctx: &mut ModuleContext<'_>) {}

        fn clone_module(&self) -> Box<dyn Module> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn module_downcast_recovers_concrete_type() {
        let module: Box<dyn Module> = Box::new(NullModule);
        assert!(module_downcast_ref::<NullModule>(module.as_ref()).is_some());
    }
}
