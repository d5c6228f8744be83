//! Import statement extraction from Python syntax trees

use std::collections::BTreeSet;
use std::path::Path;

use rustpython_parser::{ast, Parse};

use crate::error::{ResolveError, Result};

/// Root module names imported by one source file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportScan {
    pub roots: BTreeSet<String>,
}

/// Parse `source` and return the first path segment of every import.
///
/// `import a.b` and `from a.b import c` both yield `a`; a relative
/// `from .x import y` yields `x`; `from . import y` yields nothing. Imports
/// nested in functions, classes and control flow are included.
pub fn import_roots(source: &str, path: &Path) -> Result<ImportScan> {
    let suite = ast::Suite::parse(source, &path.to_string_lossy()).map_err(|e| {
        ResolveError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    let mut scan = ImportScan::default();
    collect_block(&suite, &mut scan.roots);
    Ok(scan)
}

fn collect_block(stmts: &[ast::Stmt], roots: &mut BTreeSet<String>) {
    for stmt in stmts {
        collect_stmt(stmt, roots);
    }
}

fn collect_stmt(stmt: &ast::Stmt, roots: &mut BTreeSet<String>) {
    match stmt {
        ast::Stmt::Import(import) => {
            for alias in &import.names {
                push_root(alias.name.as_str(), roots);
            }
        }
        ast::Stmt::ImportFrom(import) => {
            if let Some(module) = &import.module {
                push_root(module.as_str(), roots);
            }
        }
        ast::Stmt::FunctionDef(def) => collect_block(&def.body, roots),
        ast::Stmt::AsyncFunctionDef(def) => collect_block(&def.body, roots),
        ast::Stmt::ClassDef(def) => collect_block(&def.body, roots),
        ast::Stmt::For(s) => {
            collect_block(&s.body, roots);
            collect_block(&s.orelse, roots);
        }
        ast::Stmt::AsyncFor(s) => {
            collect_block(&s.body, roots);
            collect_block(&s.orelse, roots);
        }
        ast::Stmt::While(s) => {
            collect_block(&s.body, roots);
            collect_block(&s.orelse, roots);
        }
        ast::Stmt::If(s) => {
            collect_block(&s.body, roots);
            collect_block(&s.orelse, roots);
        }
        ast::Stmt::With(s) => collect_block(&s.body, roots),
        ast::Stmt::AsyncWith(s) => collect_block(&s.body, roots),
        ast::Stmt::Match(s) => {
            for case in &s.cases {
                collect_block(&case.body, roots);
            }
        }
        ast::Stmt::Try(s) => {
            collect_block(&s.body, roots);
            collect_handlers(&s.handlers, roots);
            collect_block(&s.orelse, roots);
            collect_block(&s.finalbody, roots);
        }
        ast::Stmt::TryStar(s) => {
            collect_block(&s.body, roots);
            collect_handlers(&s.handlers, roots);
            collect_block(&s.orelse, roots);
            collect_block(&s.finalbody, roots);
        }
        _ => {}
    }
}

fn collect_handlers(handlers: &[ast::ExceptHandler], roots: &mut BTreeSet<String>) {
    for handler in handlers {
        let ast::ExceptHandler::ExceptHandler(handler) = handler;
        collect_block(&handler.body, roots);
    }
}

fn push_root(dotted: &str, roots: &mut BTreeSet<String>) {
    if let Some(root) = dotted.split('.').next().filter(|r| !r.is_empty()) {
        roots.insert(root.to_string());
    }
}
