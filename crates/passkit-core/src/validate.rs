//! Structural checks applied to every reported diagnostic.
//!
//! A failure here is a bug in the analyzer, never a property of the analyzed
//! code, so it aborts the invocation instead of being reported.

use crate::package::Package;
use crate::source::Pos;
use crate::types::{Diagnostic, TextEdit};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

/// A structural defect in a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The primary position is not inside a file of the package.
    #[error("diagnostic position {pos:?} is not within a file of package {package}")]
    PosOutsidePackage {
        /// Offending position.
        pos: Pos,
        /// Package being analyzed.
        package: String,
    },

    /// The end precedes the start.
    #[error("diagnostic end {end:?} precedes pos {pos:?}")]
    EndBeforePos {
        /// Start.
        pos: Pos,
        /// End.
        end: Pos,
    },

    /// Start and end lie in different files.
    #[error("diagnostic pos {pos:?} and end {end:?} are in different files")]
    RangeSpansFiles {
        /// Start.
        pos: Pos,
        /// End.
        end: Pos,
    },

    /// Related information does not resolve to a range of one loaded file.
    #[error("related information {message:?} at {pos:?}..{end:?} is not a range within one loaded file")]
    InvalidRelated {
        /// Start.
        pos: Pos,
        /// End, after defaulting to the start.
        end: Pos,
        /// Related message.
        message: String,
    },

    /// Two fixes share a message.
    #[error("duplicate suggested fix message {0:?}")]
    DuplicateFixMessage(String),

    /// An edit lies outside the package files.
    #[error("fix {fix:?} has an edit at {pos:?} outside the files of package {package}")]
    EditOutsidePackage {
        /// Fix message.
        fix: String,
        /// Offending position.
        pos: Pos,
        /// Package being analyzed.
        package: String,
    },

    /// An edit ends before it starts.
    #[error("fix {fix:?} has an edit with end {end:?} before pos {pos:?}")]
    EditEndBeforePos {
        /// Fix message.
        fix: String,
        /// Start.
        pos: Pos,
        /// End.
        end: Pos,
    },

    /// An edit spans two files.
    #[error("fix {fix:?} has an edit spanning files")]
    EditSpansFiles {
        /// Fix message.
        fix: String,
    },

    /// Two edits of one fix overlap.
    #[error("fix {fix:?} has overlapping edits in {}", file.display())]
    OverlappingEdits {
        /// Fix message.
        fix: String,
        /// File containing the overlap.
        file: PathBuf,
    },
}

/// Resolves every `Pos::NONE` end to its start.
pub(crate) fn normalize(diag: &mut Diagnostic) {
    diag.end = diag.effective_end();
    for related in &mut diag.related {
        related.end = related.end.or(related.pos);
    }
    for fix in &mut diag.suggested_fixes {
        for edit in &mut fix.edits {
            edit.end = edit.effective_end();
        }
    }
}

/// Checks `diag` against the files of `pkg`.
///
/// # Errors
///
/// Returns the first structural defect found.
pub fn validate_diagnostic(pkg: &Package, diag: &Diagnostic) -> Result<(), ValidationError> {
    let fset = &pkg.fset;

    if !pkg.contains_pos(diag.pos) {
        return Err(ValidationError::PosOutsidePackage {
            pos: diag.pos,
            package: pkg.path.clone(),
        });
    }
    let end = diag.effective_end();
    if end < diag.pos {
        return Err(ValidationError::EndBeforePos { pos: diag.pos, end });
    }
    let pos_file = fset.file(diag.pos).map(|f| f.name());
    if pos_file != fset.file(end).map(|f| f.name()) {
        return Err(ValidationError::RangeSpansFiles { pos: diag.pos, end });
    }

    // Related locations may point into imported packages, so they only
    // need to resolve in the shared file set.
    for related in &diag.related {
        let end = related.end.or(related.pos);
        let resolves = match (fset.file(related.pos), fset.file(end)) {
            (Some(start_file), Some(end_file)) => start_file.name() == end_file.name(),
            _ => false,
        };
        if !resolves || end < related.pos {
            return Err(ValidationError::InvalidRelated {
                pos: related.pos,
                end,
                message: related.message.clone(),
            });
        }
    }

    let mut messages = HashSet::new();
    for fix in &diag.suggested_fixes {
        if !messages.insert(fix.message.as_str()) {
            return Err(ValidationError::DuplicateFixMessage(fix.message.clone()));
        }

        let mut by_file: BTreeMap<PathBuf, Vec<&TextEdit>> = BTreeMap::new();
        for edit in &fix.edits {
            let end = edit.effective_end();
            for p in [edit.pos, end] {
                if !pkg.contains_pos(p) {
                    return Err(ValidationError::EditOutsidePackage {
                        fix: fix.message.clone(),
                        pos: p,
                        package: pkg.path.clone(),
                    });
                }
            }
            if end < edit.pos {
                return Err(ValidationError::EditEndBeforePos {
                    fix: fix.message.clone(),
                    pos: edit.pos,
                    end,
                });
            }
            let (Some(start_file), Some(end_file)) = (fset.file(edit.pos), fset.file(end)) else {
                continue;
            };
            if start_file.name() != end_file.name() {
                return Err(ValidationError::EditSpansFiles {
                    fix: fix.message.clone(),
                });
            }
            by_file
                .entry(start_file.name().to_path_buf())
                .or_default()
                .push(edit);
        }

        for (file, mut edits) in by_file {
            edits.sort_by_key(|e| (e.pos, e.effective_end()));
            for pair in edits.windows(2) {
                if pair[0].effective_end() > pair[1].pos {
                    return Err(ValidationError::OverlappingEdits {
                        fix: fix.message.clone(),
                        file,
                    });
                }
            }
        }
    }

    Ok(())
}
