//! Pre/post-order dependency walks.
//!
//! `walk_deps` traverses the graph from a root module (which is itself never
//! visited). The down visitor is called on entering an edge and decides
//! whether to expand the target's subtree; the up visitor is called on
//! leaving. A module's subtree is expanded at most once per walk, but with
//! duplicates allowed every distinct edge still produces a down/up visit
//! pair.
//!
//! A module first reached through an edge the down visitor declined is *not*
//! marked as expanded: a later edge that does want the subtree still gets it.

use std::collections::HashSet;

use crate::context::{Context, DepRef};
use crate::graph::ModuleId;

impl Context {
    /// Walk the dependencies of `root`.
    ///
    /// `down` receives each edge on entry together with the parent's handle;
    /// returning `false` skips the subtree below that edge. `up` receives the
    /// edge on exit. When `allow_duplicates` is false a module already
    /// expanded is not visited again through later edges.
    pub fn walk_deps(
        &self,
        root: ModuleId,
        allow_duplicates: bool,
        mut down: impl FnMut(DepRef<'_>, ModuleId) -> bool,
        mut up: impl FnMut(DepRef<'_>, ModuleId),
    ) {
        let mut visited = HashSet::new();
        self.walk_deps_inner(root, allow_duplicates, &mut visited, &mut down, &mut up);
    }

    fn walk_deps_inner(
        &self,
        module: ModuleId,
        allow_duplicates: bool,
        visited: &mut HashSet<ModuleId>,
        down: &mut dyn FnMut(DepRef<'_>, ModuleId) -> bool,
        up: &mut dyn FnMut(DepRef<'_>, ModuleId),
    ) {
        for edge in &self.modules[module.index()].direct_deps {
            let dep = edge.target;
            if !allow_duplicates && visited.contains(&dep) {
                continue;
            }
            let Some(logic) = self.modules[dep.index()].logic.as_deref() else {
                continue;
            };
            let recurse = down(
                DepRef {
                    id: dep,
                    module: logic,
                    tag: edge.tag.as_deref(),
                },
                module,
            );
            if recurse && !visited.contains(&dep) {
                self.walk_deps_inner(dep, allow_duplicates, visited, down, up);
                visited.insert(dep);
            }
            up(
                DepRef {
                    id: dep,
                    module: logic,
                    tag: edge.tag.as_deref(),
                },
                module,
            );
        }
    }
}
