//! Blueprint file syntax.
//!
//! This module defines the abstract syntax the engine consumes and the
//! [`FileParser`] collaborator seam that produces it. The engine itself never
//! inspects blueprint text; it sees [`ParsedFile`] values: a list of module
//! blocks plus the file's `subdirs` and `build` reference lists. The default
//! collaborator, [`DraftParser`], lexes with `logos` and parses the grammar
//! subset below with a hand-written recursive-descent parser:
//!
//! ```text
//! file       := (assignment | module)*
//! assignment := ident "=" value
//! module     := ident "{" properties "}"
//! properties := (ident ":" value ","?)*
//! value      := string | integer | "true" | "false"
//!             | "[" (value ","?)* "]" | "{" properties "}"
//! ```
//!
//! Syntax errors carry `file:line:col` positions and abort only the file they
//! occur in; the parse driver keeps going on other files.

mod lexer;
mod parser;

use crate::errors::{Error, SourcePos};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

pub use parser::DraftParser;

/// A 1-based line/column position within a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    /// Attach a file path, producing a position usable in error reports.
    #[must_use]
    pub fn in_file(self, file: impl Into<Utf8PathBuf>) -> SourcePos {
        SourcePos::new(file, self.line, self.col)
    }
}

/// Ordered property map of a module block or nested map value.
pub type PropertyMap = IndexMap<String, PropertyValue>;

/// A parsed property value with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub pos: Pos,
    pub kind: ValueKind,
}

/// The value forms the blueprint grammar admits.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    String(String),
    Bool(bool),
    Int(i64),
    List(Vec<PropertyValue>),
    Map(PropertyMap),
}

impl PropertyValue {
    /// View the value as a string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collect a list-of-strings value. Non-list or mixed-type values yield
    /// `None`.
    #[must_use]
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match &self.kind {
            ValueKind::List(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect(),
            _ => None,
        }
    }

    /// Convert to a JSON value for property-struct binding.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match &self.kind {
            ValueKind::String(s) => serde_json::Value::String(s.clone()),
            ValueKind::Bool(b) => serde_json::Value::Bool(*b),
            ValueKind::Int(i) => serde_json::Value::from(*i),
            ValueKind::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            ValueKind::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

/// One `type_name { ... }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleBlock {
    pub type_name: String,
    pub pos: Pos,
    pub properties: PropertyMap,
}

/// Convert a whole property map to a JSON object.
#[must_use]
pub fn properties_to_json(properties: &PropertyMap) -> serde_json::Value {
    serde_json::Value::Object(
        properties
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    )
}

/// The abstract syntax of one blueprint file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    pub path: Utf8PathBuf,
    pub modules: Vec<ModuleBlock>,
    /// Directories whose conventional blueprint file should also be parsed.
    pub subdirs: Vec<String>,
    /// Blueprint files referenced directly.
    pub build: Vec<String>,
}

/// Parser collaborator: turns blueprint text into abstract syntax.
///
/// Implementations must be infallible at the interface level; syntax problems
/// are reported through the returned error list while the [`ParsedFile`]
/// carries whatever was recognised before the first error.
pub trait FileParser: Send + Sync {
    fn parse(&self, path: &Utf8Path, source: &str) -> (ParsedFile, Vec<Error>);
}
