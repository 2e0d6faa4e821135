//! Text and JSON rendering of analysis results.

use crate::args::FlagDef;
use passkit_core::{Action, Analysis, Diagnostic, FileSet, Package, Pos};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

/// One line per diagnostic, sorted: `file:line:col: [analyzer] message`.
pub(crate) fn print_text(analysis: &Analysis, out: &mut dyn Write) -> io::Result<()> {
    for reported in analysis.diagnostics() {
        writeln!(out, "{}", reported.format())?;
    }
    Ok(())
}

/// Errors of root actions that did not run to completion.
pub(crate) fn print_failures(failures: &[&Action], err: &mut dyn Write) -> io::Result<()> {
    for action in failures {
        if let Some(error) = action.error() {
            writeln!(err, "{action}: {error}")?;
        }
    }
    Ok(())
}

/// Loader errors of every package that has them.
pub(crate) fn print_load_errors(packages: &[Arc<Package>], err: &mut dyn Write) -> io::Result<()> {
    for pkg in packages.iter().filter(|p| p.has_errors()) {
        writeln!(err, "# {}", pkg.path)?;
        for error in &pkg.errors {
            writeln!(err, "{error}")?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonFlag<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Bool")]
    is_bool: bool,
    #[serde(rename = "Usage")]
    usage: &'a str,
}

/// The `--flags` listing.
pub(crate) fn print_flags(defs: &[FlagDef], out: &mut dyn Write) -> io::Result<()> {
    let flags: Vec<JsonFlag<'_>> = defs
        .iter()
        .filter(|d| d.name != "flags")
        .map(|d| JsonFlag {
            name: &d.name,
            is_bool: d.is_bool,
            usage: &d.usage,
        })
        .collect();
    serde_json::to_writer_pretty(&mut *out, &flags)?;
    writeln!(out)
}

#[derive(Serialize)]
struct JsonEdit {
    filename: String,
    start: usize,
    end: usize,
    new: String,
}

#[derive(Serialize)]
struct JsonFix {
    message: String,
    edits: Vec<JsonEdit>,
}

#[derive(Serialize)]
struct JsonRelated {
    posn: String,
    end: String,
    message: String,
}

#[derive(Serialize)]
struct JsonDiagnostic {
    posn: String,
    end: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    related: Vec<JsonRelated>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    suggested_fixes: Vec<JsonFix>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum JsonResult {
    Diagnostics(Vec<JsonDiagnostic>),
    Error { error: String },
}

fn posn(fset: &FileSet, pos: Pos) -> String {
    fset.position(pos)
        .map_or_else(|| "-".to_string(), |p| p.to_string())
}

fn json_diagnostic(fset: &FileSet, diag: &Diagnostic) -> JsonDiagnostic {
    let suggested_fixes = diag
        .suggested_fixes
        .iter()
        .map(|fix| JsonFix {
            message: fix.message.clone(),
            edits: fix
                .edits
                .iter()
                .filter_map(|edit| {
                    let file = fset.file(edit.pos)?;
                    Some(JsonEdit {
                        filename: file.name().display().to_string(),
                        start: file.offset(edit.pos)?,
                        end: file.offset(edit.effective_end())?,
                        new: edit.new_text.clone(),
                    })
                })
                .collect(),
        })
        .collect();
    JsonDiagnostic {
        posn: posn(fset, diag.pos),
        end: posn(fset, diag.effective_end()),
        message: diag.message.clone(),
        category: diag.category.clone(),
        url: diag.url.clone(),
        related: diag
            .related
            .iter()
            .map(|r| JsonRelated {
                posn: posn(fset, r.pos),
                end: posn(fset, r.end.or(r.pos)),
                message: r.message.clone(),
            })
            .collect(),
        suggested_fixes,
    }
}

/// `{"<package>": {"<analyzer>": [diagnostic...] | {"error": "..."}}}` for
/// every root action that reported something or failed.
pub(crate) fn print_json(analysis: &Analysis, out: &mut dyn Write) -> io::Result<()> {
    let mut tree: BTreeMap<&str, BTreeMap<&str, JsonResult>> = BTreeMap::new();
    for action in analysis.roots() {
        let pkg = action.package();
        let result = if let Some(error) = action.error() {
            JsonResult::Error {
                error: error.to_string(),
            }
        } else if action.had_diagnostics() {
            JsonResult::Diagnostics(
                action
                    .diagnostics()
                    .iter()
                    .map(|d| json_diagnostic(&pkg.fset, d))
                    .collect(),
            )
        } else {
            continue;
        };
        tree.entry(pkg.id.as_str())
            .or_default()
            .insert(action.analyzer().name(), result);
    }
    serde_json::to_writer_pretty(&mut *out, &tree)?;
    writeln!(out)
}
