//! Module trees and trace-path resolution
//!
//! Trace events only carry a textual path into the execution's structure.
//! The root [`Module`] announced at start is what turns such a path into the
//! kind of node it names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::trace::TracePath;

/// Kind of node a trace path names, as persisted with each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Input,
    Composite,
    Loop,
    Simple,
}

impl ModuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Input => "input",
            ModuleKind::Composite => "composite",
            ModuleKind::Loop => "loop",
            ModuleKind::Simple => "simple",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "input" => Some(ModuleKind::Input),
            "composite" => Some(ModuleKind::Composite),
            "loop" => Some(ModuleKind::Loop),
            "simple" => Some(ModuleKind::Simple),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linked structure of a workflow, as resolved by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Module {
    Input,
    Simple,
    Composite {
        #[serde(default)]
        children: BTreeMap<String, Module>,
    },
    Loop {
        #[serde(default)]
        children: BTreeMap<String, Module>,
    },
    /// Reference to a declared module; takes the declaration's kind
    Proxy { declaration: Box<Module> },
}

impl Module {
    pub fn composite<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, Module)>,
        S: Into<String>,
    {
        Module::Composite {
            children: children.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn looping<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, Module)>,
        S: Into<String>,
    {
        Module::Loop {
            children: children.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn proxy(declaration: Module) -> Self {
        Module::Proxy {
            declaration: Box::new(declaration),
        }
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            Module::Input => ModuleKind::Input,
            Module::Simple => ModuleKind::Simple,
            Module::Composite { .. } => ModuleKind::Composite,
            Module::Loop { .. } => ModuleKind::Loop,
            Module::Proxy { declaration } => match declaration.kind() {
                ModuleKind::Composite => ModuleKind::Composite,
                _ => ModuleKind::Simple,
            },
        }
    }

    /// Resolve `path` against this (root) module and return the node's kind.
    ///
    /// Within a loop, a numeric segment selects an iteration and names the
    /// loop itself; the following segment descends into the loop body.
    pub fn resolve(&self, path: &TracePath) -> Result<ModuleKind> {
        let mut current = self;
        let mut in_iteration = false;

        for segment in path.segments()? {
            let target = current.unproxied();
            match target {
                Module::Loop { children } => {
                    if !in_iteration {
                        if segment.parse::<u64>().is_err() {
                            return Err(Error::unresolved_path(
                                path.as_str(),
                                format!("expected iteration index inside loop, found '{}'", segment),
                            ));
                        }
                        in_iteration = true;
                        continue;
                    }
                    current = child(children, segment, path)?;
                }
                Module::Composite { children } => {
                    current = child(children, segment, path)?;
                }
                other => {
                    return Err(Error::unresolved_path(
                        path.as_str(),
                        format!("{} module has no child '{}'", other.kind(), segment),
                    ));
                }
            }
            in_iteration = false;
        }

        Ok(current.kind())
    }

    fn unproxied(&self) -> &Module {
        match self {
            Module::Proxy { declaration } => declaration.unproxied(),
            other => other,
        }
    }
}

fn child<'a>(children: &'a BTreeMap<String, Module>, segment: &str, path: &TracePath) -> Result<&'a Module> {
    children
        .get(segment)
        .ok_or_else(|| Error::unresolved_path(path.as_str(), format!("unknown child '{}'", segment)))
}
