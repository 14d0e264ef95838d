//! Static import analysis.
//!
//! Source is parsed into a syntax tree and every import statement,
//! including ones nested in function bodies, branches, loops, `with`,
//! `try` and `match` blocks, is checked against the allow-list. Nothing is
//! executed here, so a refused import never gets a chance to run.

use rustpython_parser::{ast, Parse};

use crate::error::{Result, SandboxError};
use crate::sandbox::allowlist::{is_allowed, AllowList, ImportStatement};

const SOURCE_PATH: &str = "<asterr>";

/// Source text that parsed successfully.
#[derive(Debug)]
pub struct ParsedSource<'a> {
    source: &'a str,
    suite: ast::Suite,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validated {
    /// The universal wildcard admitted everything.
    pub insecure: bool,
    /// Import statements inspected.
    pub imports_checked: usize,
}

/// Parse `source`, mapping parser diagnostics to [`SandboxError::Syntax`].
pub fn parse(source: &str) -> Result<ParsedSource<'_>> {
    let suite = ast::Suite::parse(source, SOURCE_PATH).map_err(|err| {
        let (line, column) = line_column(source, u32::from(err.offset) as usize);
        SandboxError::Syntax {
            message: err.error.to_string(),
            line,
            column,
        }
    })?;
    Ok(ParsedSource { source, suite })
}

/// Parse and validate in one step.
pub fn validate(source: &str, allow_list: &AllowList) -> Result<Validated> {
    parse(source)?.validate(allow_list)
}

impl<'a> ParsedSource<'a> {
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Every import statement in source order, depth first.
    pub fn imports(&self) -> Vec<ImportStatement> {
        let mut found = Vec::new();
        collect_imports(&self.suite, &mut found);
        found
    }

    /// Check every import against `allow_list`, stopping at the first refusal.
    pub fn validate(&self, allow_list: &AllowList) -> Result<Validated> {
        if allow_list.is_universal() {
            return Ok(Validated {
                insecure: true,
                imports_checked: 0,
            });
        }

        let imports = self.imports();
        if let Some(refused) = imports.iter().find(|stmt| !is_allowed(stmt, allow_list)) {
            return Err(SandboxError::ImportNotAllowed {
                module: refused.offending_module().to_string(),
            });
        }

        Ok(Validated {
            insecure: false,
            imports_checked: imports.len(),
        })
    }
}

fn collect_imports(body: &[ast::Stmt], found: &mut Vec<ImportStatement>) {
    for stmt in body {
        match stmt {
            ast::Stmt::Import(ast::StmtImport { names, .. }) => {
                found.push(ImportStatement::Import {
                    names: names.iter().map(|a| a.name.as_str().to_string()).collect(),
                });
            }
            ast::Stmt::ImportFrom(ast::StmtImportFrom {
                module,
                names,
                level,
                ..
            }) => {
                let dots = level.as_ref().map_or(0, |l| l.to_u32()) as usize;
                let module = module.as_ref().map_or("", |m| m.as_str());
                found.push(ImportStatement::From {
                    module: format!("{}{}", ".".repeat(dots), module),
                    names: names.iter().map(|a| a.name.as_str().to_string()).collect(),
                });
            }
            ast::Stmt::FunctionDef(ast::StmtFunctionDef { body, .. })
            | ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef { body, .. })
            | ast::Stmt::ClassDef(ast::StmtClassDef { body, .. })
            | ast::Stmt::With(ast::StmtWith { body, .. })
            | ast::Stmt::AsyncWith(ast::StmtAsyncWith { body, .. }) => {
                collect_imports(body, found);
            }
            ast::Stmt::If(ast::StmtIf { body, orelse, .. })
            | ast::Stmt::For(ast::StmtFor { body, orelse, .. })
            | ast::Stmt::AsyncFor(ast::StmtAsyncFor { body, orelse, .. })
            | ast::Stmt::While(ast::StmtWhile { body, orelse, .. }) => {
                collect_imports(body, found);
                collect_imports(orelse, found);
            }
            ast::Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            })
            | ast::Stmt::TryStar(ast::StmtTryStar {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                collect_imports(body, found);
                for handler in handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    collect_imports(&handler.body, found);
                }
                collect_imports(orelse, found);
                collect_imports(finalbody, found);
            }
            ast::Stmt::Match(ast::StmtMatch { cases, .. }) => {
                for case in cases {
                    collect_imports(&case.body, found);
                }
            }
            _ => {}
        }
    }
}

/// 1-based line and column of a byte offset.
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}
