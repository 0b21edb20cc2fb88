//! Typed, write-once provider slots.
//!
//! A provider is a value a mutator attaches to a module for later phases to
//! read. Keys are process-unique and carry the value type, so reads are fully
//! typed; each key may be written at most once per module and the whole table
//! freezes when build-action generation begins.
//!
//! When verification is enabled the table snapshots each value's debug
//! rendering at set time and re-renders at freeze, flagging values that
//! changed behind the table's back.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::Error;
use crate::graph::ModuleId;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(0);

/// Values storable as providers.
pub trait ProviderValue: Any + Send + Sync + fmt::Debug {}

impl<T: Any + Send + Sync + fmt::Debug> ProviderValue for T {}

/// A process-unique, typed provider key.
///
/// Keys are usually created once and shared through a `LazyLock`:
///
/// ```
/// use blueprint::provider::ProviderKey;
/// use std::sync::LazyLock;
///
/// static DEPS_INFO: LazyLock<ProviderKey<Vec<String>>> =
///     LazyLock::new(|| ProviderKey::new("deps_info"));
/// ```
pub struct ProviderKey<T> {
    id: u64,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ProviderValue> ProviderKey<T> {
    /// Allocate a fresh key. The name only appears in diagnostics.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            name,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for ProviderKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ProviderKey<T> {}

impl<T> fmt::Debug for ProviderKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderKey({}#{})", self.name, self.id)
    }
}

struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    key_name: &'static str,
    /// Debug rendering captured at set time, kept only when verification is
    /// enabled.
    snapshot: Option<String>,
    render: fn(&(dyn Any + Send + Sync)) -> String,
}

/// Provider storage for the whole graph.
#[derive(Default)]
pub(crate) struct ProviderTable {
    slots: HashMap<(ModuleId, u64), Slot>,
    frozen: bool,
    verify: bool,
}

fn render_value<T: ProviderValue>(value: &(dyn Any + Send + Sync)) -> String {
    value
        .downcast_ref::<T>()
        .map_or_else(|| "<type mismatch>".to_owned(), |v| format!("{v:?}"))
}

impl ProviderTable {
    pub(crate) fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    /// Store `value` for `(module, key)`.
    ///
    /// # Panics
    ///
    /// Setting a provider twice for the same module, or setting one after the
    /// table froze, is an engine-contract violation and panics.
    pub(crate) fn set<T: ProviderValue>(&mut self, module: ModuleId, key: ProviderKey<T>, value: T) {
        assert!(
            !self.frozen,
            "provider {:?} set after build actions began",
            key
        );
        let snapshot = self.verify.then(|| format!("{value:?}"));
        let slot = Slot {
            value: Arc::new(value),
            key_name: key.name,
            snapshot,
            render: render_value::<T>,
        };
        let previous = self.slots.insert((module, key.id), slot);
        assert!(
            previous.is_none(),
            "provider {:?} already set for this module",
            key
        );
    }

    pub(crate) fn get<T: ProviderValue>(
        &self,
        module: ModuleId,
        key: ProviderKey<T>,
    ) -> Option<&T> {
        self.slots
            .get(&(module, key.id))
            .and_then(|slot| slot.value.downcast_ref())
    }

    /// Copy every provider of `from` onto `to`. Used when a split clones a
    /// module into variants; values are shared, not duplicated.
    pub(crate) fn copy_module(&mut self, from: ModuleId, to: ModuleId) {
        let copied: Vec<(u64, Slot)> = self
            .slots
            .iter()
            .filter(|((module, _), _)| *module == from)
            .map(|((_, key), slot)| {
                (
                    *key,
                    Slot {
                        value: Arc::clone(&slot.value),
                        key_name: slot.key_name,
                        snapshot: slot.snapshot.clone(),
                        render: slot.render,
                    },
                )
            })
            .collect();
        for (key, slot) in copied {
            self.slots.insert((to, key), slot);
        }
    }

    /// Freeze the table and, when verification is enabled, check that no
    /// value changed since it was set.
    pub(crate) fn freeze(&mut self) -> Vec<Error> {
        self.frozen = true;
        if !self.verify {
            return Vec::new();
        }
        let mut errs = Vec::new();
        for ((module, _), slot) in &self.slots {
            let Some(snapshot) = &slot.snapshot else {
                continue;
            };
            let current = (slot.render)(slot.value.as_ref());
            if &current != snapshot {
                errs.push(Error::internal(format!(
                    "provider {} on module {module:?} changed after it was set: {snapshot} -> {current}",
                    slot.key_name,
                )));
            }
        }
        errs
    }

    /// Render every stored value, keyed for deterministic comparison across
    /// runs. Used by tests asserting mutator determinism.
    pub(crate) fn render_all(&self) -> Vec<(ModuleId, &'static str, String)> {
        let mut rendered: Vec<(ModuleId, &'static str, String)> = self
            .slots
            .iter()
            .map(|((module, _), slot)| {
                (*module, slot.key_name, (slot.render)(slot.value.as_ref()))
            })
            .collect();
        rendered.sort();
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let key = ProviderKey::<Vec<String>>::new("list");
        let mut table = ProviderTable::default();
        table.set(ModuleId(0), key, vec!["x".to_string()]);
        assert_eq!(
            table.get(ModuleId(0), key),
            Some(&vec!["x".to_string()])
        );
        assert_eq!(table.get::<Vec<String>>(ModuleId(1), key), None);
    }

    #[test]
    #[should_panic(expected = "already set")]
    fn double_set_panics() {
        let key = ProviderKey::<u32>::new("count");
        let mut table = ProviderTable::default();
        table.set(ModuleId(0), key, 1);
        table.set(ModuleId(0), key, 2);
    }

    #[test]
    #[should_panic(expected = "after build actions began")]
    fn set_after_freeze_panics() {
        let key = ProviderKey::<u32>::new("late");
        let mut table = ProviderTable::default();
        let _ = table.freeze();
        table.set(ModuleId(0), key, 1);
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let a = ProviderKey::<u32>::new("a");
        let b = ProviderKey::<u32>::new("b");
        let mut table = ProviderTable::default();
        table.set(ModuleId(0), a, 1);
        table.set(ModuleId(0), b, 2);
        assert_eq!(table.get(ModuleId(0), a), Some(&1));
        assert_eq!(table.get(ModuleId(0), b), Some(&2));
    }

    #[test]
    fn copy_module_shares_values() {
        let key = ProviderKey::<String>::new("shared");
        let mut table = ProviderTable::default();
        table.set(ModuleId(0), key, "v".to_string());
        table.copy_module(ModuleId(0), ModuleId(7));
        assert_eq!(table.get(ModuleId(7), key).map(String::as_str), Some("v"));
    }
}
