//! Source positions and file sets.
//!
//! A [`Pos`] is a compact offset into a [`FileSet`]: every file added to the
//! set owns the half-open range `[base, base + size]` (the extra slot is the
//! end-of-file position). `Pos::NONE` never maps to a file.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A position inside a [`FileSet`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Pos(u32);

impl Pos {
    /// The "no position" sentinel.
    pub const NONE: Pos = Pos(0);

    /// Returns true unless this is [`Pos::NONE`].
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Returns the raw offset value.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Returns this position, or `other` if this one is [`Pos::NONE`].
    #[must_use]
    pub fn or(self, other: Pos) -> Pos {
        if self.is_valid() {
            self
        } else {
            other
        }
    }

    /// Returns the position `delta` bytes after this one.
    #[must_use]
    pub fn add(self, delta: usize) -> Pos {
        Pos(self
            .0
            .saturating_add(u32::try_from(delta).unwrap_or(u32::MAX)))
    }
}

/// A resolved, human-readable position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// File the position belongs to.
    pub filename: PathBuf,
    /// Byte offset from the start of the file.
    pub offset: usize,
    /// Line number (1-indexed).
    pub line: usize,
    /// Byte column (1-indexed).
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.filename.display(),
            self.line,
            self.column
        )
    }
}

/// A single file registered in a [`FileSet`].
#[derive(Debug, Clone)]
pub struct TokenFile {
    name: PathBuf,
    base: u32,
    size: u32,
    line_starts: Vec<u32>,
    digest: [u8; 32],
}

impl TokenFile {
    fn new(name: PathBuf, base: u32, size: u32, content: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(u32::try_from(i + 1).unwrap_or(u32::MAX));
            }
        }
        Self {
            name,
            base,
            size,
            line_starts,
            digest: content_digest(content.as_bytes()),
        }
    }

    /// Returns the file name as registered by the loader.
    #[must_use]
    pub fn name(&self) -> &Path {
        &self.name
    }

    /// Returns the size of the file in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Returns the position of the first byte.
    #[must_use]
    pub fn start(&self) -> Pos {
        Pos(self.base)
    }

    /// Returns the end-of-file position.
    #[must_use]
    pub fn end(&self) -> Pos {
        Pos(self.base + self.size)
    }

    /// Returns the SHA-256 digest of the content seen when the file was added.
    #[must_use]
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Returns true if `pos` lies within `[start, end]`.
    #[must_use]
    pub fn contains(&self, pos: Pos) -> bool {
        pos.0 >= self.base && pos.0 <= self.base + self.size
    }

    /// Converts a byte offset into a position. Offsets past EOF are clamped.
    #[must_use]
    pub fn pos(&self, offset: usize) -> Pos {
        let offset = u32::try_from(offset).unwrap_or(u32::MAX).min(self.size);
        Pos(self.base + offset)
    }

    /// Converts a position of this file back into a byte offset.
    #[must_use]
    pub fn offset(&self, pos: Pos) -> Option<usize> {
        self.contains(pos).then(|| (pos.0 - self.base) as usize)
    }

    /// Returns the byte offset at which a 1-indexed line starts.
    #[must_use]
    pub fn line_start(&self, line: usize) -> Option<usize> {
        let index = line.checked_sub(1)?;
        self.line_starts.get(index).map(|&s| s as usize)
    }

    /// Returns the position for a 1-indexed line and a 0-indexed byte column.
    #[must_use]
    pub fn pos_at(&self, line: usize, column: usize) -> Pos {
        if line == 0 {
            return self.start();
        }
        match self.line_start(line) {
            Some(start) => self.pos(start + column),
            None => self.end(),
        }
    }

    /// Returns the 1-indexed (line, column) for a byte offset.
    #[must_use]
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = u32::try_from(offset).unwrap_or(u32::MAX);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line + 1, (offset - self.line_starts[line]) as usize + 1)
    }

    /// Resolves a position of this file.
    #[must_use]
    pub fn position(&self, pos: Pos) -> Option<Position> {
        let offset = self.offset(pos)?;
        let (line, column) = self.line_col(offset);
        Some(Position {
            filename: self.name.clone(),
            offset,
            line,
            column,
        })
    }
}

/// Computes the SHA-256 digest used to detect on-disk modification.
#[must_use]
pub fn content_digest(content: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.finalize().into()
}

/// A file did not fit into the position space of its [`FileSet`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot add {} ({size} bytes): file set position space exhausted", name.display())]
pub struct FileSetFull {
    /// File that was rejected.
    pub name: PathBuf,
    /// Its size in bytes.
    pub size: usize,
}

/// A set of source files sharing one position space.
///
/// Built once by the loader, then shared read-only (`Arc<FileSet>`) by every
/// package of the load.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    files: Vec<Arc<TokenFile>>,
}

impl FileSet {
    /// Creates an empty file set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file and returns its token file.
    ///
    /// # Errors
    ///
    /// Returns [`FileSetFull`] once the files no longer fit the 32-bit
    /// position space, about 4 GiB of source in total.
    pub fn add_file(
        &mut self,
        name: impl Into<PathBuf>,
        content: &str,
    ) -> Result<Arc<TokenFile>, FileSetFull> {
        let name = name.into();
        let base = match self.files.last() {
            Some(f) => f.base.checked_add(f.size).and_then(|end| end.checked_add(1)),
            None => Some(1),
        };
        let placed = base.zip(u32::try_from(content.len()).ok()).filter(|&(base, size)| {
            base.checked_add(size).is_some()
        });
        let Some((base, size)) = placed else {
            return Err(FileSetFull {
                name,
                size: content.len(),
            });
        };
        let file = Arc::new(TokenFile::new(name, base, size, content));
        self.files.push(Arc::clone(&file));
        Ok(file)
    }

    /// Returns the file containing `pos`.
    #[must_use]
    pub fn file(&self, pos: Pos) -> Option<&Arc<TokenFile>> {
        if !pos.is_valid() {
            return None;
        }
        let idx = match self.files.binary_search_by_key(&pos.0, |f| f.base) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        self.files.get(idx).filter(|f| f.contains(pos))
    }

    /// Returns the file registered under `name`.
    #[must_use]
    pub fn file_by_name(&self, name: &Path) -> Option<&Arc<TokenFile>> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Resolves `pos` to file, line and column.
    #[must_use]
    pub fn position(&self, pos: Pos) -> Option<Position> {
        self.file(pos).and_then(|f| f.position(pos))
    }

    /// Iterates over all registered files.
    pub fn files(&self) -> impl Iterator<Item = &Arc<TokenFile>> {
        self.files.iter()
    }
}
