//! Merging and applying suggested fixes.
//!
//! Only the first fix of each root diagnostic is considered. Edits are
//! grouped per file and checked for conflicts; a file with a conflict keeps
//! its original content while the other files are still rewritten.

use crate::diff::unified_diff;
use crate::driver::Analysis;
use crate::source::content_digest;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors of the fix phase. Each one affects a single file.
#[derive(Debug, Error)]
pub enum FixError {
    /// Two different fixes edit overlapping ranges.
    #[error("conflicting edits from {first} and {second} on {}", file.display())]
    Conflict {
        /// Analyzer of one edit (alphabetically first).
        first: String,
        /// Analyzer of the other edit.
        second: String,
        /// Affected file.
        file: PathBuf,
    },

    /// The file changed on disk after it was loaded.
    #[error("{} was modified since it was loaded; not applying fixes", file.display())]
    ModifiedSinceLoad {
        /// Affected file.
        file: PathBuf,
    },

    /// An edit does not fall on character boundaries of the file.
    #[error("edit {start}..{end} is out of bounds for {}", file.display())]
    InvalidEdit {
        /// Affected file.
        file: PathBuf,
        /// Start offset.
        start: usize,
        /// End offset.
        end: usize,
    },

    /// Reading or writing the file failed.
    #[error("failed to update {}: {source}", file.display())]
    Io {
        /// Affected file.
        file: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// One edit in byte offsets, with the fix it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEdit {
    /// Start offset.
    pub start: usize,
    /// End offset (exclusive).
    pub end: usize,
    /// Replacement text.
    pub new_text: String,
    /// Reporting analyzer.
    pub analyzer: String,
    /// Message of the fix.
    pub fix: String,
}

impl PlannedEdit {
    fn same_origin(&self, other: &Self) -> bool {
        self.analyzer == other.analyzer && self.fix == other.fix
    }

    fn conflicts_with(&self, next: &Self) -> bool {
        let both_insert_here =
            self.start == self.end && next.start == next.end && self.start == next.start;
        next.start < self.end || (both_insert_here && self.new_text != next.new_text)
    }
}

/// The conflict-free edits of one file.
#[derive(Debug, Clone)]
pub struct FileFix {
    /// File to rewrite.
    pub path: PathBuf,
    /// Digest of the content the edits were computed against.
    pub digest: [u8; 32],
    /// Edits sorted by position.
    pub edits: Vec<PlannedEdit>,
}

impl FileFix {
    /// Applies the edits to `content`, right to left.
    ///
    /// # Errors
    ///
    /// Returns [`FixError::InvalidEdit`] if an edit does not fit `content`.
    pub fn apply_to(&self, content: &str) -> Result<String, FixError> {
        let mut out = content.to_string();
        for edit in self.edits.iter().rev() {
            let fits = edit.start <= edit.end
                && edit.end <= out.len()
                && out.is_char_boundary(edit.start)
                && out.is_char_boundary(edit.end);
            if !fits {
                return Err(FixError::InvalidEdit {
                    file: self.path.clone(),
                    start: edit.start,
                    end: edit.end,
                });
            }
            out.replace_range(edit.start..edit.end, &edit.new_text);
        }
        Ok(out)
    }
}

/// What to do with the merged edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    /// Rewrite files in place.
    Write,
    /// Only render a unified diff.
    Diff,
}

/// Result of [`FixPlan::apply`].
#[derive(Debug, Default)]
pub struct FixReport {
    /// Files rewritten (or that would be, in diff mode).
    pub changed: Vec<PathBuf>,
    /// Unified diff, in diff mode.
    pub diff: String,
    /// Per-file errors, conflicts included.
    pub errors: Vec<FixError>,
}

impl FixReport {
    /// True if any file could not be fixed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Merged edits of an analysis, ready to apply.
#[derive(Debug, Default)]
pub struct FixPlan {
    /// Files with conflict-free edits.
    pub files: Vec<FileFix>,
    /// Files dropped because of conflicts.
    pub conflicts: Vec<FixError>,
}

impl FixPlan {
    /// Collects the first fix of every root diagnostic and merges the edits
    /// per file.
    #[must_use]
    pub fn from_analysis(analysis: &Analysis) -> Self {
        let mut by_file: BTreeMap<PathBuf, ([u8; 32], Vec<PlannedEdit>)> = BTreeMap::new();
        for reported in analysis.diagnostics() {
            let Some(fix) = reported.diagnostic.suggested_fixes.first() else {
                continue;
            };
            let fset = &reported.package.fset;
            for edit in &fix.edits {
                let Some(token) = fset.file(edit.pos) else {
                    continue;
                };
                let (Some(start), Some(end)) =
                    (token.offset(edit.pos), token.offset(edit.effective_end()))
                else {
                    continue;
                };
                by_file
                    .entry(token.name().to_path_buf())
                    .or_insert_with(|| (*token.digest(), Vec::new()))
                    .1
                    .push(PlannedEdit {
                        start,
                        end,
                        new_text: edit.new_text.clone(),
                        analyzer: reported.analyzer.name().to_string(),
                        fix: fix.message.clone(),
                    });
            }
        }

        let mut plan = Self::default();
        for (path, (digest, edits)) in by_file {
            match merge_edits(&path, edits) {
                Ok(edits) => plan.files.push(FileFix {
                    path,
                    digest,
                    edits,
                }),
                Err(err) => {
                    tracing::warn!("{err}");
                    plan.conflicts.push(err);
                }
            }
        }
        plan
    }

    /// True if there is nothing to apply and nothing was dropped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.conflicts.is_empty()
    }

    /// Applies the plan: rewrites each file atomically, or renders a diff.
    ///
    /// Files whose on-disk content no longer matches the loaded content
    /// are left alone. Failures are per file; other files proceed.
    #[must_use]
    pub fn apply(self, mode: FixMode) -> FixReport {
        let mut report = FixReport {
            errors: self.conflicts,
            ..FixReport::default()
        };
        for file in &self.files {
            match apply_file(file, mode, &mut report.diff) {
                Ok(true) => report.changed.push(file.path.clone()),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!("{err}");
                    report.errors.push(err);
                }
            }
        }
        report
    }
}

/// Sorts `edits` and rejects overlaps between different fixes.
///
/// Overlapping edits of the same fix are duplicates (the same fix reported
/// twice) and collapse to one. An insertion at the start of a replaced range
/// and a replacement ending where an insertion starts do not overlap.
///
/// # Errors
///
/// Returns [`FixError::Conflict`] naming both analyzers.
pub fn merge_edits(
    path: &Path,
    mut edits: Vec<PlannedEdit>,
) -> Result<Vec<PlannedEdit>, FixError> {
    edits.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));
    let mut merged: Vec<PlannedEdit> = Vec::with_capacity(edits.len());
    for edit in edits {
        if let Some(last) = merged.last() {
            if last == &edit || (last.conflicts_with(&edit) && last.same_origin(&edit)) {
                continue;
            }
            if last.conflicts_with(&edit) {
                let mut names = [last.analyzer.clone(), edit.analyzer.clone()];
                names.sort();
                let [first, second] = names;
                return Err(FixError::Conflict {
                    first,
                    second,
                    file: path.to_path_buf(),
                });
            }
        }
        merged.push(edit);
    }
    Ok(merged)
}

fn apply_file(file: &FileFix, mode: FixMode, diff: &mut String) -> Result<bool, FixError> {
    let io = |source| FixError::Io {
        file: file.path.clone(),
        source,
    };
    let current = std::fs::read_to_string(&file.path).map_err(io)?;
    if content_digest(current.as_bytes()) != file.digest {
        return Err(FixError::ModifiedSinceLoad {
            file: file.path.clone(),
        });
    }
    let fixed = file.apply_to(&current)?;
    if fixed == current {
        return Ok(false);
    }

    match mode {
        FixMode::Diff => diff.push_str(&unified_diff(&file.path, &current, &fixed)),
        FixMode::Write => {
            write_atomically(&file.path, &fixed).map_err(io)?;
            tracing::info!("applied {} edits to {}", file.edits.len(), file.path.display());
        }
    }
    Ok(true)
}

fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
