//! In-memory module graph model.
//!
//! The graph is an arena of [`ModuleInfo`] nodes addressed by [`ModuleId`];
//! edges are stored as id pairs so cyclic graphs never form ownership cycles.
//! Every module belongs to a [`ModuleGroup`] keyed by name; a group holds the
//! module's variants and any aliases redirecting a variant lookup to another
//! variant's module.

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::actions::LocalBuildActions;
use crate::errors::SourcePos;
use crate::module::Module;

/// Stable handle of a module node within the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable handle of a module group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub(crate) u32);

impl GroupId {
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One `(axis, value)` pair of a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variation {
    /// The mutator axis the variation was created on.
    pub axis: String,
    /// The value selected along that axis.
    pub value: String,
}

impl Variation {
    #[must_use]
    pub fn new(axis: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            axis: axis.into(),
            value: value.into(),
        }
    }
}

/// Ordered mapping from variation axis to value.
pub type VariationMap = IndexMap<String, String>;

/// Compare two variation maps for equality regardless of axis order.
#[must_use]
pub(crate) fn variations_equal(a: &VariationMap, b: &VariationMap) -> bool {
    a.len() == b.len() && a.iter().all(|(axis, value)| b.get(axis) == Some(value))
}

/// Report whether every non-empty entry of `query` appears in `candidate`.
///
/// This is the *far* matching rule: the candidate may carry extra axes.
#[must_use]
pub(crate) fn variations_subset(query: &VariationMap, candidate: &VariationMap) -> bool {
    query
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .all(|(axis, value)| candidate.get(axis) == Some(value))
}

/// A module's variant identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variant {
    /// Stable stringified form: variation values joined in creation order.
    pub name: String,
    /// Every variation applied to the module.
    pub variations: VariationMap,
    /// The subset used when matching outgoing dependency edges.
    pub dependency_variations: VariationMap,
}

impl Variant {
    /// Derive the variant a split produces: the new axis is appended to both
    /// maps (dependency variations only for non-local axes) and the label is
    /// appended to the stringified name.
    #[must_use]
    pub(crate) fn with_variation(&self, axis: &str, label: &str, local: bool) -> Self {
        let mut name = self.name.clone();
        if !label.is_empty() {
            if name.is_empty() {
                name = label.to_owned();
            } else {
                name.push('_');
                name.push_str(label);
            }
        }
        let mut variations = self.variations.clone();
        variations.insert(axis.to_owned(), label.to_owned());
        let mut dependency_variations = self.dependency_variations.clone();
        if !local {
            dependency_variations.insert(axis.to_owned(), label.to_owned());
        }
        Self {
            name,
            variations,
            dependency_variations,
        }
    }
}

/// Marker trait for dependency tags.
///
/// Tags are opaque edge payloads owned by the host. The marker keeps
/// arbitrary values from being attached to edges; concrete tags are recovered
/// with [`tag_downcast_ref`].
pub trait DependencyTag: Any + Send + Sync + fmt::Debug {}

/// Built-in tag used when the host does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseDependencyTag;

impl DependencyTag for BaseDependencyTag {}

/// Downcast a tag to its concrete host type.
#[must_use]
pub fn tag_downcast_ref<T: DependencyTag>(tag: &dyn DependencyTag) -> Option<&T> {
    let any: &dyn Any = tag;
    any.downcast_ref()
}

/// A directed dependency edge.
#[derive(Debug, Clone)]
pub(crate) struct DepEdge {
    pub target: ModuleId,
    pub tag: Option<Arc<dyn DependencyTag>>,
}

/// Entry of a module group: a variant's module or an alias to one.
#[derive(Debug, Clone)]
pub(crate) enum GroupEntry {
    Module(ModuleId),
    Alias { variant: Variant, target: ModuleId },
}

impl GroupEntry {
    pub(crate) fn target(&self) -> ModuleId {
        match self {
            Self::Module(id) | Self::Alias { target: id, .. } => *id,
        }
    }
}

/// All variants and aliases sharing one module name.
#[derive(Debug, Clone)]
pub(crate) struct ModuleGroup {
    pub name: String,
    pub entries: Vec<GroupEntry>,
}

impl ModuleGroup {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// The first live module of the group, if any.
    pub(crate) fn first_module(&self) -> Option<ModuleId> {
        self.entries.iter().map(GroupEntry::target).next()
    }
}

/// A concrete node of the module graph.
pub(crate) struct ModuleInfo {
    pub id: ModuleId,
    pub group: GroupId,
    pub type_name: String,
    pub pos: SourcePos,
    pub variant: Variant,
    /// The host payload. `None` once the module has been split into variants.
    pub logic: Option<Box<dyn Module>>,
    pub direct_deps: Vec<DepEdge>,
    pub forward_deps: Vec<ModuleId>,
    pub reverse_deps: Vec<ModuleId>,
    /// Variants this module was split into, in label order.
    pub split_into: Vec<ModuleId>,
    pub action_defs: LocalBuildActions,
}

impl ModuleInfo {
    pub(crate) fn new(
        id: ModuleId,
        group: GroupId,
        type_name: impl Into<String>,
        pos: SourcePos,
        logic: Box<dyn Module>,
    ) -> Self {
        Self {
            id,
            group,
            type_name: type_name.into(),
            pos,
            variant: Variant::default(),
            logic: Some(logic),
            direct_deps: Vec::new(),
            forward_deps: Vec::new(),
            reverse_deps: Vec::new(),
            split_into: Vec::new(),
            action_defs: LocalBuildActions::default(),
        }
    }

    /// Whether the node still participates in the graph.
    pub(crate) fn is_live(&self) -> bool {
        self.logic.is_some()
    }

    /// The directory containing the module's blueprint file.
    pub(crate) fn dir(&self) -> Utf8PathBuf {
        self.pos
            .file
            .parent()
            .map_or_else(Utf8PathBuf::new, camino::Utf8Path::to_path_buf)
    }
}

impl fmt::Debug for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInfo")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("variant", &self.variant.name)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

/// Find the entry of `group` matching a variant query issued by `from`.
///
/// A *near* query (`far == false`) overlays `variations` onto the requester's
/// dependency variations and requires map equality. A *far* query matches
/// when every requested `(axis, value)` pair appears in the candidate,
/// ignoring axes the candidate carries beyond the query. Aliases participate
/// in the search and resolve to their target module.
///
/// Returns the matched module together with the composed query map, which is
/// reported in resolution errors when the lookup fails.
pub(crate) fn find_variant(
    from: &ModuleInfo,
    group: &ModuleGroup,
    arena: &[ModuleInfo],
    variations: &[Variation],
    far: bool,
) -> (Option<ModuleId>, VariationMap) {
    let mut query = if far {
        VariationMap::new()
    } else {
        from.variant.dependency_variations.clone()
    };
    for variation in variations {
        query.insert(variation.axis.clone(), variation.value.clone());
    }

    let matches = |candidate: &VariationMap| {
        if far {
            variations_subset(&query, candidate)
        } else {
            variations_equal(candidate, &query)
        }
    };

    let found = group
        .entries
        .iter()
        .find(|entry| match entry {
            GroupEntry::Module(id) => matches(&arena[id.index()].variant.variations),
            GroupEntry::Alias { variant, .. } => matches(&variant.variations),
        })
        .map(GroupEntry::target);
    (found, query)
}
