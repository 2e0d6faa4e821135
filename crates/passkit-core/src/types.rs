//! Diagnostics, suggested fixes and text edits.

use crate::source::{FileSet, Pos};
use serde::{Deserialize, Serialize};

/// Anything that covers a source range.
pub trait Range {
    /// Start of the range.
    fn pos(&self) -> Pos;
    /// End of the range (exclusive). `Pos::NONE` means "same as start".
    fn end(&self) -> Pos;
}

impl Range for (Pos, Pos) {
    fn pos(&self) -> Pos {
        self.0
    }
    fn end(&self) -> Pos {
        self.1
    }
}

/// A single replacement of the bytes in `[pos, end)` by `new_text`.
///
/// `pos == end` is a pure insertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextEdit {
    /// Start of the replaced range.
    pub pos: Pos,
    /// End of the replaced range; `Pos::NONE` is treated as `pos`.
    pub end: Pos,
    /// Replacement text.
    pub new_text: String,
}

impl TextEdit {
    /// Creates an edit replacing `[pos, end)`.
    #[must_use]
    pub fn new(pos: Pos, end: Pos, new_text: impl Into<String>) -> Self {
        Self {
            pos,
            end,
            new_text: new_text.into(),
        }
    }

    /// Creates an insertion at `pos`.
    #[must_use]
    pub fn insert(pos: Pos, new_text: impl Into<String>) -> Self {
        Self::new(pos, pos, new_text)
    }

    /// Creates a deletion of `[pos, end)`.
    #[must_use]
    pub fn delete(pos: Pos, end: Pos) -> Self {
        Self::new(pos, end, "")
    }

    /// Returns the effective end, resolving `Pos::NONE` to `pos`.
    #[must_use]
    pub fn effective_end(&self) -> Pos {
        self.end.or(self.pos)
    }
}

impl Range for TextEdit {
    fn pos(&self) -> Pos {
        self.pos
    }
    fn end(&self) -> Pos {
        self.end
    }
}

/// A named group of edits that together address one diagnostic.
///
/// The message doubles as the fix identifier, so it must be unique within
/// its diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedFix {
    /// Human-readable description of the fix.
    pub message: String,
    /// Edits, possibly spanning several files.
    pub edits: Vec<TextEdit>,
}

impl SuggestedFix {
    /// Creates a fix from its edits.
    #[must_use]
    pub fn new(message: impl Into<String>, edits: Vec<TextEdit>) -> Self {
        Self {
            message: message.into(),
            edits,
        }
    }
}

/// A secondary location attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedInformation {
    /// Start position.
    pub pos: Pos,
    /// End position; `Pos::NONE` means "same as start".
    pub end: Pos,
    /// Message for this location.
    pub message: String,
}

impl RelatedInformation {
    /// Creates related information.
    #[must_use]
    pub fn new(pos: Pos, end: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            end,
            message: message.into(),
        }
    }
}

/// A finding reported by an analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Primary position.
    pub pos: Pos,
    /// End of the primary range; `Pos::NONE` means "same as `pos`".
    pub end: Pos,
    /// Optional category, appended to the analyzer URL as a fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Optional documentation link; defaults to the analyzer URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Additional locations.
    #[serde(default)]
    pub related: Vec<RelatedInformation>,
    /// Suggested fixes, in order of preference.
    #[serde(default)]
    pub suggested_fixes: Vec<SuggestedFix>,
}

impl Diagnostic {
    /// Creates a diagnostic at `pos`.
    #[must_use]
    pub fn new(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            end: Pos::NONE,
            category: None,
            message: message.into(),
            url: None,
            related: Vec::new(),
            suggested_fixes: Vec::new(),
        }
    }

    /// Creates a diagnostic spanning `range`.
    #[must_use]
    pub fn spanning(range: &impl Range, message: impl Into<String>) -> Self {
        Self::new(range.pos(), message).with_end(range.end())
    }

    /// Sets the end position.
    #[must_use]
    pub fn with_end(mut self, end: Pos) -> Self {
        self.end = end;
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the documentation URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Adds related information.
    #[must_use]
    pub fn with_related(mut self, related: RelatedInformation) -> Self {
        self.related.push(related);
        self
    }

    /// Adds a suggested fix.
    #[must_use]
    pub fn with_fix(mut self, fix: SuggestedFix) -> Self {
        self.suggested_fixes.push(fix);
        self
    }

    /// Returns the effective end, resolving `Pos::NONE` to `pos`.
    #[must_use]
    pub fn effective_end(&self) -> Pos {
        self.end.or(self.pos)
    }

    /// Fills in the URL from the analyzer URL when the diagnostic has none.
    ///
    /// A category becomes the URL fragment.
    pub(crate) fn resolve_url(&mut self, analyzer_url: Option<&str>) {
        if self.url.is_some() {
            return;
        }
        if let Some(base) = analyzer_url.filter(|u| !u.is_empty()) {
            self.url = Some(match &self.category {
                Some(category) => format!("{base}#{category}"),
                None => base.to_string(),
            });
        }
    }

    /// Formats the diagnostic as `file:line:col: [analyzer] message`,
    /// followed by one `\trelated:` line per related location.
    #[must_use]
    pub fn format(&self, fset: &FileSet, analyzer: &str) -> String {
        use std::fmt::Write;
        let mut output = format!(
            "{}: [{analyzer}] {}",
            display_pos(fset, self.pos),
            self.message
        );
        for related in &self.related {
            let _ = write!(
                output,
                "\n\trelated: {}: {}",
                display_pos(fset, related.pos),
                related.message
            );
        }
        output
    }
}

impl Range for Diagnostic {
    fn pos(&self) -> Pos {
        self.pos
    }
    fn end(&self) -> Pos {
        self.end
    }
}

fn display_pos(fset: &FileSet, pos: Pos) -> String {
    fset.position(pos)
        .map_or_else(|| "-".to_string(), |p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fset() -> (FileSet, Pos) {
        let mut fset = FileSet::new();
        let file = fset.add_file("src/lib.rs", "fn a() {}\nfn b() {}\n").unwrap();
        let pos = file.pos_at(2, 3);
        (fset, pos)
    }

    #[test]
    fn url_defaults_to_analyzer_url_with_category_fragment() {
        let mut d = Diagnostic::new(Pos::NONE, "m").with_category("shadow");
        d.resolve_url(Some("https://example.com/a"));
        assert_eq!(d.url.as_deref(), Some("https://example.com/a#shadow"));
    }

    #[test]
    fn explicit_url_is_kept() {
        let mut d = Diagnostic::new(Pos::NONE, "m").with_url("https://x");
        d.resolve_url(Some("https://example.com/a"));
        assert_eq!(d.url.as_deref(), Some("https://x"));
    }

    #[test]
    fn empty_analyzer_url_leaves_none() {
        let mut d = Diagnostic::new(Pos::NONE, "m");
        d.resolve_url(Some(""));
        assert!(d.url.is_none());
    }

    #[test]
    fn format_includes_analyzer_and_related() {
        let (fset, pos) = fset();
        let d = Diagnostic::new(pos, "bad name")
            .with_related(RelatedInformation::new(pos, Pos::NONE, "declared here"));
        assert_eq!(
            d.format(&fset, "naming"),
            "src/lib.rs:2:4: [naming] bad name\n\trelated: src/lib.rs:2:4: declared here"
        );
    }

    #[test]
    fn end_defaults_to_pos() {
        let (_, pos) = fset();
        assert_eq!(Diagnostic::new(pos, "m").effective_end(), pos);
        assert_eq!(TextEdit::new(pos, Pos::NONE, "x").effective_end(), pos);
    }
}
