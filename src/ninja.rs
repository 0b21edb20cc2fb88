//! Ninja manifest writer collaborator.
//!
//! The engine is agnostic to manifest syntax; it calls a [`NinjaWriter`] in a
//! fixed order (variables, pools, rules, build statements, defaults,
//! subninjas) and the writer renders each element. [`NinjaTextWriter`] is the
//! textual implementation; tests may substitute a recording writer.

use std::io::{self, Write};

use itertools::Itertools;

use crate::actions::{BuildDef, PoolDef, RuleDef};

/// Receives manifest elements in emission order.
pub trait NinjaWriter {
    fn comment(&mut self, text: &str) -> io::Result<()>;
    fn variable(&mut self, name: &str, value: &str) -> io::Result<()>;
    fn pool(&mut self, pool: &PoolDef) -> io::Result<()>;
    fn rule(&mut self, rule: &RuleDef) -> io::Result<()>;
    fn build(&mut self, def: &BuildDef) -> io::Result<()>;
    fn default(&mut self, targets: &[String]) -> io::Result<()>;
    fn subninja(&mut self, path: &str) -> io::Result<()>;
    fn blank(&mut self) -> io::Result<()>;
}

/// Writes ninja syntax to any [`io::Write`] sink.
pub struct NinjaTextWriter<W: Write> {
    out: W,
}

impl<W: Write> NinjaTextWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the underlying sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}

fn join(paths: &[String]) -> String {
    paths.iter().join(" ")
}

impl<W: Write> NinjaWriter for NinjaTextWriter<W> {
    fn comment(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "# {text}")
    }

    fn variable(&mut self, name: &str, value: &str) -> io::Result<()> {
        writeln!(self.out, "{name} = {value}")
    }

    fn pool(&mut self, pool: &PoolDef) -> io::Result<()> {
        writeln!(self.out, "pool {}", pool.name)?;
        writeln!(self.out, "  depth = {}", pool.depth)
    }

    fn rule(&mut self, rule: &RuleDef) -> io::Result<()> {
        writeln!(self.out, "rule {}", rule.name)?;
        for (param, value) in &rule.params {
            writeln!(self.out, "  {param} = {value}")?;
        }
        Ok(())
    }

    fn build(&mut self, def: &BuildDef) -> io::Result<()> {
        write!(self.out, "build {}", join(&def.outputs))?;
        if !def.implicit_outputs.is_empty() {
            write!(self.out, " | {}", join(&def.implicit_outputs))?;
        }
        write!(self.out, ": {}", def.rule)?;
        if !def.inputs.is_empty() {
            write!(self.out, " {}", join(&def.inputs))?;
        }
        if !def.implicit.is_empty() {
            write!(self.out, " | {}", join(&def.implicit))?;
        }
        if !def.order_only.is_empty() {
            write!(self.out, " || {}", join(&def.order_only))?;
        }
        writeln!(self.out)?;
        if let Some(description) = &def.description {
            writeln!(self.out, "  description = {description}")?;
        }
        for (name, value) in def.variables.iter().chain(&def.args) {
            writeln!(self.out, "  {name} = {value}")?;
        }
        Ok(())
    }

    fn default(&mut self, targets: &[String]) -> io::Result<()> {
        writeln!(self.out, "default {}", join(targets))
    }

    fn subninja(&mut self, path: &str) -> io::Result<()> {
        writeln!(self.out, "subninja {path}")
    }

    fn blank(&mut self) -> io::Result<()> {
        writeln!(self.out)
    }
}
