//! Build-action definitions collected from modules and singletons.
//!
//! The engine treats every string here as opaque: ninja variable references
//! and escaping are the host's concern. Definitions are recorded locally by a
//! module or singleton context and committed to the graph in deterministic
//! order once the producing phase completes.

use indexmap::IndexMap;

/// A ninja `build` statement in abstract form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDef {
    /// Rule invoked by the statement. `phony` is the only name the engine
    /// itself ever emits.
    pub rule: String,
    pub outputs: Vec<String>,
    pub implicit_outputs: Vec<String>,
    pub inputs: Vec<String>,
    pub implicit: Vec<String>,
    pub order_only: Vec<String>,
    /// Per-edge ninja variable bindings.
    pub variables: IndexMap<String, String>,
    /// Rule argument overrides; emitted after `variables`.
    pub args: IndexMap<String, String>,
    pub description: Option<String>,
}

/// A ninja rule definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDef {
    pub name: String,
    /// Rule parameters (`command`, `depfile`, ...), in declaration order.
    pub params: IndexMap<String, String>,
}

/// A ninja pool definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDef {
    pub name: String,
    pub depth: u32,
}

/// A global ninja variable assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDef {
    pub name: String,
    pub value: String,
}

/// Everything one module or singleton contributed.
#[derive(Debug, Clone, Default)]
pub struct LocalBuildActions {
    pub variables: Vec<VariableDef>,
    pub pools: Vec<PoolDef>,
    pub rules: Vec<RuleDef>,
    pub build_defs: Vec<BuildDef>,
}

impl LocalBuildActions {
    pub(crate) fn is_empty(&self) -> bool {
        self.variables.is_empty()
            && self.pools.is_empty()
            && self.rules.is_empty()
            && self.build_defs.is_empty()
    }
}

/// Parameters accepted by the `build` methods on module and singleton
/// contexts; converted verbatim into a [`BuildDef`].
#[derive(Debug, Clone, Default)]
pub struct BuildParams {
    pub rule: String,
    pub outputs: Vec<String>,
    pub implicit_outputs: Vec<String>,
    pub inputs: Vec<String>,
    pub implicit: Vec<String>,
    pub order_only: Vec<String>,
    pub variables: IndexMap<String, String>,
    pub args: IndexMap<String, String>,
    pub description: Option<String>,
}

impl From<BuildParams> for BuildDef {
    fn from(params: BuildParams) -> Self {
        Self {
            rule: params.rule,
            outputs: params.outputs,
            implicit_outputs: params.implicit_outputs,
            inputs: params.inputs,
            implicit: params.implicit,
            order_only: params.order_only,
            variables: params.variables,
            args: params.args,
            description: params.description,
        }
    }
}
