//! Parallel graph visitor with a pause-and-resume discipline.
//!
//! Modules are visited on a pool of worker threads once all their
//! predecessors (per the traversal order) have completed. A callback may
//! *pause* on another module: the worker blocks, the scheduler stops counting
//! it against the parallelism limit, and the callback resumes when the target
//! module completes. Pausing on an already-completed module resumes
//! immediately.
//!
//! A callback returning `true` cancels the visit: nothing new is scheduled,
//! in-flight callbacks run to completion, and pending pauses resolve with
//! [`VisitCancelled`] so their callbacks can finish quickly. Cancellation is
//! not an error.
//!
//! When no progress is possible and work remains, the scheduler reports the
//! dependency cycle responsible, walking both real edges and pause edges.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc;
use std::thread;

use tracing::debug;

use crate::errors::{Error, cycle_error};
use crate::graph::ModuleId;

/// Read access to the adjacency the visitor schedules over.
pub(crate) trait VisitGraph: Sync {
    fn forward_deps(&self, module: ModuleId) -> &[ModuleId];
    fn reverse_deps(&self, module: ModuleId) -> &[ModuleId];
    fn module_name(&self, module: ModuleId) -> &str;
}

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VisitOrder {
    /// Leaves first: a module waits for its forward deps.
    BottomUp,
    /// Roots first: a module waits for its reverse deps.
    TopDown,
}

impl VisitOrder {
    fn wait_deps(self, graph: &dyn VisitGraph, module: ModuleId) -> &[ModuleId] {
        match self {
            Self::BottomUp => graph.forward_deps(module),
            Self::TopDown => graph.reverse_deps(module),
        }
    }

    /// Modules whose wait count drops when `module` completes.
    fn propagate(self, graph: &dyn VisitGraph, module: ModuleId) -> &[ModuleId] {
        match self {
            Self::BottomUp => graph.reverse_deps(module),
            Self::TopDown => graph.forward_deps(module),
        }
    }
}

/// Signal that a pause was interrupted by cancellation (or an aborting
/// cycle); the callback should finish without doing further work.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VisitCancelled;

/// A pending pause: `paused` waits for `until` to complete.
struct PauseSpec {
    paused: ModuleId,
    until: ModuleId,
    unpause: mpsc::Sender<()>,
}

enum VisitMsg {
    Done { module: ModuleId, cancel: bool },
    Pause(PauseSpec),
}

/// Handle a visitor callback uses to pause itself.
pub(crate) struct Pauser<'a> {
    module: ModuleId,
    tx: &'a mpsc::Sender<VisitMsg>,
}

impl Pauser<'_> {
    /// Block until `until` completes. Returns immediately when it already
    /// has.
    pub(crate) fn pause_until(&self, until: ModuleId) -> Result<(), VisitCancelled> {
        let (unpause_tx, unpause_rx) = mpsc::channel();
        self.tx
            .send(VisitMsg::Pause(PauseSpec {
                paused: self.module,
                until,
                unpause: unpause_tx,
            }))
            .map_err(|_| VisitCancelled)?;
        unpause_rx.recv().map_err(|_| VisitCancelled)
    }
}

fn spawn_visitor<'scope, 'env, F>(
    scope: &'scope thread::Scope<'scope, 'env>,
    tx: &mpsc::Sender<VisitMsg>,
    visit: &'env F,
    module: ModuleId,
) where
    F: Fn(ModuleId, &Pauser<'_>) -> bool + Sync,
{
    let tx = tx.clone();
    scope.spawn(move || {
        let pauser = Pauser { module, tx: &tx };
        let cancel = visit(module, &pauser);
        let _ = tx.send(VisitMsg::Done { module, cancel });
    });
}

/// Visit `modules` in dependency order with at most `limit` callbacks in
/// flight. The list must be closed under the traversal's wait edges.
pub(crate) fn parallel_visit<G, F>(
    graph: &G,
    order: VisitOrder,
    modules: &[ModuleId],
    limit: usize,
    visit: F,
) -> Vec<Error>
where
    G: VisitGraph,
    F: Fn(ModuleId, &Pauser<'_>) -> bool + Sync,
{
    if modules.is_empty() {
        return Vec::new();
    }
    let limit = limit.max(1);
    let in_list: HashSet<ModuleId> = modules.iter().copied().collect();
    let mut waiting: HashMap<ModuleId, usize> = modules
        .iter()
        .map(|&m| {
            let count = order
                .wait_deps(graph, m)
                .iter()
                .filter(|dep| in_list.contains(dep))
                .count();
            (m, count)
        })
        .collect();
    let mut done: HashSet<ModuleId> = HashSet::new();
    let (tx, rx) = mpsc::channel::<VisitMsg>();
    let visit = &visit;
    let mut errs = Vec::new();

    thread::scope(|scope| {
        let mut active = 0usize;
        let mut spawned = 0usize;
        let mut finished = 0usize;
        let mut cancelled = false;
        let mut backlog: VecDeque<ModuleId> = VecDeque::new();
        let mut unpause_backlog: VecDeque<PauseSpec> = VecDeque::new();
        let mut pause_map: HashMap<ModuleId, Vec<PauseSpec>> = HashMap::new();

        for &module in modules {
            if waiting[&module] != 0 {
                continue;
            }
            if active < limit {
                active += 1;
                spawned += 1;
                spawn_visitor(scope, &tx, visit, module);
            } else {
                backlog.push_back(module);
            }
        }

        while active > 0 {
            match rx.recv().expect("visitor thread channel") {
                VisitMsg::Done { module, cancel } => {
                    active -= 1;
                    finished += 1;
                    if cancel && !cancelled {
                        debug!(module = graph.module_name(module), "visit cancelled");
                        cancelled = true;
                        backlog.clear();
                        unpause_backlog.clear();
                    }
                    if !cancelled {
                        done.insert(module);
                        if let Some(specs) = pause_map.remove(&module) {
                            for spec in specs {
                                if active < limit {
                                    active += 1;
                                    let _ = spec.unpause.send(());
                                } else {
                                    unpause_backlog.push_back(spec);
                                }
                            }
                        }
                        for &next in order.propagate(graph, module) {
                            if !in_list.contains(&next) {
                                continue;
                            }
                            let count = waiting.get_mut(&next).expect("listed module");
                            if *count == 0 {
                                continue;
                            }
                            *count -= 1;
                            if *count > 0 {
                                continue;
                            }
                            if active < limit {
                                active += 1;
                                spawned += 1;
                                spawn_visitor(scope, &tx, visit, next);
                            } else {
                                backlog.push_back(next);
                            }
                        }
                    }
                    while active < limit {
                        if let Some(spec) = unpause_backlog.pop_front() {
                            active += 1;
                            let _ = spec.unpause.send(());
                        } else if let Some(next) = backlog.pop_front() {
                            active += 1;
                            spawned += 1;
                            spawn_visitor(scope, &tx, visit, next);
                        } else {
                            break;
                        }
                    }
                }
                VisitMsg::Pause(spec) => {
                    if cancelled {
                        // Dropping the spec's channel resolves the pause with
                        // VisitCancelled.
                    } else if done.contains(&spec.until) {
                        let _ = spec.unpause.send(());
                    } else {
                        pause_map.entry(spec.until).or_default().push(spec);
                        active -= 1;
                        while active < limit {
                            if let Some(spec) = unpause_backlog.pop_front() {
                                active += 1;
                                let _ = spec.unpause.send(());
                            } else if let Some(next) = backlog.pop_front() {
                                active += 1;
                                spawned += 1;
                                spawn_visitor(scope, &tx, visit, next);
                            } else {
                                break;
                            }
                        }
                    }
                }
            }
        }

        if !cancelled {
            if !pause_map.is_empty() {
                errs = report_pause_cycle(graph, order, modules, &done, &pause_map);
            } else if done.len() < in_list.len() {
                errs = report_dep_cycle(graph, order, modules, &done, &in_list);
            }
        }

        // Release any threads still blocked in a pause, then wait for their
        // completion messages so the scope can join cleanly.
        drop(pause_map);
        drop(unpause_backlog);
        while finished < spawned {
            if let VisitMsg::Done { .. } = rx.recv().expect("visitor thread channel") {
                finished += 1;
            }
        }
    });
    errs
}

/// Search for the module chain that closes a deadlocked pause.
///
/// `pause_map` is keyed by pause target. For each pause, walk from the paused
/// module along "completion would unblock" edges (reverse of the wait
/// relation, plus pauses registered on the walked module) looking for the
/// pause's target; the first path found, closed by the pause edge itself, is
/// the reported cycle.
fn report_pause_cycle(
    graph: &dyn VisitGraph,
    order: VisitOrder,
    modules: &[ModuleId],
    done: &HashSet<ModuleId>,
    pause_map: &HashMap<ModuleId, Vec<PauseSpec>>,
) -> Vec<Error> {
    let mut checked = HashSet::new();
    for &module in modules {
        let Some(specs) = pause_map.get(&module) else {
            continue;
        };
        for spec in specs {
            let mut visiting = HashSet::new();
            if let Some(path) = unblock_path(
                graph,
                order,
                done,
                pause_map,
                &mut checked,
                &mut visiting,
                spec.paused,
                spec.until,
            ) {
                let names: Vec<String> = path
                    .iter()
                    .map(|&id| graph.module_name(id).to_owned())
                    .collect();
                return cycle_error(&names);
            }
        }
    }
    vec![Error::internal(
        "parallel visit deadlocked without a discoverable cycle",
    )]
}

/// Depth-first search for `end` starting at `module`, following edges in the
/// direction completion propagates.
#[expect(clippy::too_many_arguments, reason = "internal recursion carries the full search state")]
fn unblock_path(
    graph: &dyn VisitGraph,
    order: VisitOrder,
    done: &HashSet<ModuleId>,
    pause_map: &HashMap<ModuleId, Vec<PauseSpec>>,
    checked: &mut HashSet<ModuleId>,
    visiting: &mut HashSet<ModuleId>,
    module: ModuleId,
    end: ModuleId,
) -> Option<Vec<ModuleId>> {
    if done.contains(&module) {
        return None;
    }
    if module == end {
        return Some(vec![module]);
    }
    if checked.contains(&module) || !visiting.insert(module) {
        return None;
    }
    for &next in order.propagate(graph, module) {
        if let Some(mut path) = unblock_path(
            graph, order, done, pause_map, checked, visiting, next, end,
        ) {
            path.insert(0, module);
            visiting.remove(&module);
            return Some(path);
        }
    }
    if let Some(specs) = pause_map.get(&module) {
        for spec in specs {
            if let Some(mut path) = unblock_path(
                graph,
                order,
                done,
                pause_map,
                checked,
                visiting,
                spec.paused,
                end,
            ) {
                path.insert(0, module);
                visiting.remove(&module);
                return Some(path);
            }
        }
    }
    visiting.remove(&module);
    checked.insert(module);
    None
}

/// Report a cycle among real wait edges when the queue drained with
/// unfinished modules and no pauses outstanding.
fn report_dep_cycle(
    graph: &dyn VisitGraph,
    order: VisitOrder,
    modules: &[ModuleId],
    done: &HashSet<ModuleId>,
    in_list: &HashSet<ModuleId>,
) -> Vec<Error> {
    let empty = HashMap::new();
    let mut checked = HashSet::new();
    for &module in modules {
        if done.contains(&module) {
            continue;
        }
        for &dep in order.wait_deps(graph, module) {
            if !in_list.contains(&dep) || done.contains(&dep) {
                continue;
            }
            let mut visiting = HashSet::new();
            if let Some(path) = unblock_path(
                graph,
                order,
                done,
                &empty,
                &mut checked,
                &mut visiting,
                module,
                dep,
            ) {
                let names: Vec<String> = path
                    .iter()
                    .map(|&id| graph.module_name(id).to_owned())
                    .collect();
                return cycle_error(&names);
            }
        }
    }
    vec![Error::internal(
        "parallel visit stalled without a discoverable cycle",
    )]
}
