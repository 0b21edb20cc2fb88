//! Order-only dependency deduplication.
//!
//! Build definitions frequently share identical order-only dependency lists.
//! After action collection the engine replaces each shared list with a single
//! phony aggregate node named after the FNV digest of the sorted list, so the
//! generated manifest states every shared set once.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use crate::actions::{BuildDef, LocalBuildActions};
use crate::graph::{ModuleId, ModuleInfo};
use crate::hasher::fnv64a_hex;

/// Scan every module's build definitions, synthesise one phony aggregate per
/// order-only set shared by two or more definitions, and rewrite the sharing
/// definitions to reference the aggregate.
///
/// `known_aggregates` carries the names synthesised so far; definitions
/// already rewritten to reference one are left alone, which makes repeated
/// application a no-op.
pub(crate) fn deduplicate_order_only_deps(
    arena: &mut [ModuleInfo],
    order: &[ModuleId],
    known_aggregates: &mut HashSet<String>,
) -> LocalBuildActions {
    let skip = |def: &BuildDef, known: &HashSet<String>| {
        def.order_only.is_empty()
            || (def.order_only.len() == 1 && known.contains(&def.order_only[0]))
    };
    let sorted_key = |def: &BuildDef| {
        let mut key = def.order_only.clone();
        key.sort();
        key
    };

    // First pass: count definitions per distinct sorted order-only list, in
    // first-encounter order.
    let mut groups: IndexMap<Vec<String>, usize> = IndexMap::new();
    for &id in order {
        for def in &arena[id.index()].action_defs.build_defs {
            if skip(def, known_aggregates) {
                continue;
            }
            *groups.entry(sorted_key(def)).or_insert(0) += 1;
        }
    }

    // Synthesise aggregates for every shared list.
    let mut aggregates = LocalBuildActions::default();
    let mut names: HashMap<Vec<String>, String> = HashMap::new();
    for (key, count) in &groups {
        if *count < 2 {
            continue;
        }
        let name = format!("dedup-{}", fnv64a_hex(key.concat().as_bytes()));
        aggregates.build_defs.push(BuildDef {
            rule: "phony".to_owned(),
            outputs: vec![name.clone()],
            inputs: key.clone(),
            ..BuildDef::default()
        });
        names.insert(key.clone(), name);
    }
    if aggregates.build_defs.is_empty() {
        return aggregates;
    }
    debug!(aggregates = aggregates.build_defs.len(), "deduplicated order-only deps");

    // Second pass: point the sharing definitions at their aggregate.
    for &id in order {
        for def in &mut arena[id.index()].action_defs.build_defs {
            if skip(def, known_aggregates) {
                continue;
            }
            if let Some(name) = names.get(&sorted_key(def)) {
                def.order_only = vec![name.clone()];
            }
        }
    }
    known_aggregates.extend(names.into_values());
    aggregates
}
