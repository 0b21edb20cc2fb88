//! Engine error types.
//!
//! Errors fall into the kinds the pipeline accumulates per phase: syntactic
//! parse errors, property errors over a parsed value, module errors over a
//! graph node, dependency-cycle reports, and internal invariant violations.
//! The first three carry a [`SourcePos`] and render as `file:line:col:
//! message`. Cycle reports are emitted as an error list: one header followed
//! by one edge line per participating dependency.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

/// A position within a blueprint file.
///
/// Line and column are 1-based; a zero line means the position is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub file: Utf8PathBuf,
    pub line: u32,
    pub col: u32,
}

impl SourcePos {
    #[must_use]
    pub fn new(file: impl Into<Utf8PathBuf>, line: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.file)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.col)
        }
    }
}

/// An error produced by the graph engine.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// Syntactic error from the blueprint parser.
    #[error("{pos}: {message}")]
    #[diagnostic(code(blueprint::parse))]
    Parse { pos: SourcePos, message: String },

    /// Semantic error over a parsed property value.
    #[error("{pos}: {message}")]
    #[diagnostic(code(blueprint::property))]
    Property { pos: SourcePos, message: String },

    /// Semantic error over a module.
    #[error("{pos}: {message}")]
    #[diagnostic(code(blueprint::module))]
    Module { pos: SourcePos, message: String },

    /// Header line of a dependency-cycle report.
    #[error("encountered dependency cycle")]
    #[diagnostic(code(blueprint::cycle))]
    Cycle,

    /// One edge of a dependency-cycle report.
    #[error("module {from:?} depends on module {to:?}")]
    #[diagnostic(code(blueprint::cycle_edge))]
    CycleEdge { from: String, to: String },

    /// Failure to read a blueprint file.
    #[error("{path}: {source}")]
    #[diagnostic(code(blueprint::io))]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invariant violation inside the engine.
    #[error("internal error: {message}")]
    #[diagnostic(code(blueprint::internal))]
    Internal { message: String },
}

impl Error {
    pub(crate) fn parse(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::Parse {
            pos,
            message: message.into(),
        }
    }

    pub(crate) fn property(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::Property {
            pos,
            message: message.into(),
        }
    }

    pub(crate) fn module(pos: SourcePos, message: impl Into<String>) -> Self {
        Self::Module {
            pos,
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Build the error list for a dependency cycle.
///
/// `cycle` is a path of module names where each entry is unblocked by the
/// previous one and the first entry depends on the last. The report starts
/// with a header error, then walks the closing edge followed by each waiting
/// edge in turn, matching the canonical
/// `module "X" depends on module "Y"` rendering.
pub(crate) fn cycle_error(cycle: &[String]) -> Vec<Error> {
    let mut errs = vec![Error::Cycle];
    let Some(first) = cycle.first() else {
        return errs;
    };
    let mut cur = first.clone();
    for next in cycle.iter().rev() {
        errs.push(Error::CycleEdge {
            from: cur.clone(),
            to: next.clone(),
        });
        cur.clone_from(next);
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn source_pos_renders_file_line_col() {
        let pos = SourcePos::new("dir/Blueprints", 3, 18);
        assert_eq!(pos.to_string(), "dir/Blueprints:3:18");
    }

    #[rstest]
    fn source_pos_without_line_renders_file_only() {
        let pos = SourcePos::new("Blueprints", 0, 0);
        assert_eq!(pos.to_string(), "Blueprints");
    }

    #[test]
    fn cycle_error_lists_closing_edge_first() {
        let cycle = vec!["C".to_string(), "B".to_string(), "A".to_string()];
        let errs = cycle_error(&cycle);
        let rendered: Vec<String> = errs.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "encountered dependency cycle",
                "module \"C\" depends on module \"A\"",
                "module \"A\" depends on module \"B\"",
                "module \"B\" depends on module \"C\"",
            ]
        );
    }
}
