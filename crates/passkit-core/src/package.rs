//! Package handles as produced by a [`Loader`](crate::Loader).
//!
//! Packages are read-only once loaded and shared as `Arc<Package>` across
//! worker threads. Syntax trees are not stored: `syn` trees are not `Send`,
//! so each action parses the files it needs through [`SourceFile::parse`].

use crate::source::{FileSet, Pos, TokenFile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stable locator of a declared program entity.
///
/// Package-level items have no parent; struct fields and methods carry the
/// name of their containing type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    /// Import path of the declaring package.
    pub package: String,
    /// Containing type for fields and methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Declared name.
    pub name: String,
}

impl ObjectId {
    /// Locator of a package-level declaration.
    #[must_use]
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            parent: None,
            name: name.into(),
        }
    }

    /// Locator of a field or method of `parent`.
    #[must_use]
    pub fn member(
        package: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            parent: Some(parent.into()),
            name: name.into(),
        }
    }

    /// Returns the dotted name relative to the package (`T.field` or `f`).
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{parent}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.package, self.qualified_name())
    }
}

/// Kind of a declared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Free function.
    Fn,
    /// Struct type.
    Struct,
    /// Enum type.
    Enum,
    /// Union type.
    Union,
    /// Trait.
    Trait,
    /// Constant.
    Const,
    /// Static item.
    Static,
    /// Type alias.
    Type,
    /// Inline or out-of-line module.
    Mod,
    /// `macro_rules!` definition.
    Macro,
    /// Named struct field.
    Field,
    /// Method in an impl block.
    Method,
}

/// A declared program entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// Locator.
    pub id: ObjectId,
    /// Kind of declaration.
    pub kind: ObjectKind,
    /// Position of the declaring identifier.
    pub pos: Pos,
    /// Whether the item is `pub`.
    pub exported: bool,
}

/// Per-package object arena, the type information available to analyzers.
#[derive(Debug, Clone, Default)]
pub struct TypesInfo {
    objects: Vec<Object>,
    index: HashMap<ObjectId, usize>,
}

impl TypesInfo {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object; a later object with the same id replaces the earlier.
    pub fn insert(&mut self, object: Object) {
        if let Some(&i) = self.index.get(&object.id) {
            self.objects[i] = object;
        } else {
            self.index.insert(object.id.clone(), self.objects.len());
            self.objects.push(object);
        }
    }

    /// Looks up an object by id.
    #[must_use]
    pub fn lookup(&self, id: &ObjectId) -> Option<&Object> {
        self.index.get(id).map(|&i| &self.objects[i])
    }

    /// Returns the object whose declaring identifier starts at `pos`.
    #[must_use]
    pub fn object_at(&self, pos: Pos) -> Option<&Object> {
        self.objects.iter().find(|o| o.pos == pos)
    }

    /// Iterates over objects in declaration order.
    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter()
    }

    /// Number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if no objects are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Records the declarations of one parsed file.
    pub fn collect(&mut self, package: &str, file: &SourceFile, ast: &syn::File) {
        collect_items(self, package, file, &ast.items);
    }
}

fn ident_pos(file: &SourceFile, ident: &syn::Ident) -> Pos {
    file.span_range(ident.span()).0
}

fn is_pub(vis: &syn::Visibility) -> bool {
    !matches!(vis, syn::Visibility::Inherited)
}

fn collect_items(types: &mut TypesInfo, package: &str, file: &SourceFile, items: &[syn::Item]) {
    use syn::Item;

    for item in items {
        let (ident, kind, vis) = match item {
            Item::Fn(f) => (&f.sig.ident, ObjectKind::Fn, Some(&f.vis)),
            Item::Struct(s) => {
                if let syn::Fields::Named(fields) = &s.fields {
                    for field in &fields.named {
                        if let Some(name) = &field.ident {
                            types.insert(Object {
                                id: ObjectId::member(package, s.ident.to_string(), name.to_string()),
                                kind: ObjectKind::Field,
                                pos: ident_pos(file, name),
                                exported: is_pub(&field.vis),
                            });
                        }
                    }
                }
                (&s.ident, ObjectKind::Struct, Some(&s.vis))
            }
            Item::Enum(e) => (&e.ident, ObjectKind::Enum, Some(&e.vis)),
            Item::Union(u) => (&u.ident, ObjectKind::Union, Some(&u.vis)),
            Item::Trait(t) => (&t.ident, ObjectKind::Trait, Some(&t.vis)),
            Item::Const(c) => (&c.ident, ObjectKind::Const, Some(&c.vis)),
            Item::Static(s) => (&s.ident, ObjectKind::Static, Some(&s.vis)),
            Item::Type(t) => (&t.ident, ObjectKind::Type, Some(&t.vis)),
            Item::Mod(m) => (&m.ident, ObjectKind::Mod, Some(&m.vis)),
            Item::Macro(m) => match &m.ident {
                Some(ident) => (ident, ObjectKind::Macro, None),
                None => continue,
            },
            Item::Impl(imp) => {
                collect_methods(types, package, file, imp);
                continue;
            }
            _ => continue,
        };
        types.insert(Object {
            id: ObjectId::new(package, ident.to_string()),
            kind,
            pos: ident_pos(file, ident),
            exported: vis.is_some_and(is_pub),
        });
    }
}

fn collect_methods(types: &mut TypesInfo, package: &str, file: &SourceFile, imp: &syn::ItemImpl) {
    let syn::Type::Path(self_ty) = imp.self_ty.as_ref() else {
        return;
    };
    let Some(parent) = self_ty.path.segments.last().map(|s| s.ident.to_string()) else {
        return;
    };
    let in_trait_impl = imp.trait_.is_some();
    for item in &imp.items {
        if let syn::ImplItem::Fn(method) = item {
            types.insert(Object {
                id: ObjectId::member(package, parent.clone(), method.sig.ident.to_string()),
                kind: ObjectKind::Method,
                pos: ident_pos(file, &method.sig.ident),
                exported: in_trait_impl || is_pub(&method.vis),
            });
        }
    }
}

/// A compiled source file of a package.
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    content: Arc<str>,
    token: Arc<TokenFile>,
}

impl SourceFile {
    /// Creates a source file from its registered token file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, content: Arc<str>, token: Arc<TokenFile>) -> Self {
        Self {
            path: path.into(),
            content,
            token,
        }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content as loaded.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Position information for this file.
    #[must_use]
    pub fn token(&self) -> &TokenFile {
        &self.token
    }

    /// Parses the file into a syntax tree.
    ///
    /// # Errors
    ///
    /// Returns the `syn` error if the content does not parse.
    pub fn parse(&self) -> syn::Result<syn::File> {
        syn::parse_file(&self.content)
    }

    /// Converts a span of a tree parsed from this file into a position range.
    #[must_use]
    pub fn span_range(&self, span: proc_macro2::Span) -> (Pos, Pos) {
        let (start, end) = (span.start(), span.end());
        (
            self.pos_at(start.line, start.column),
            self.pos_at(end.line, end.column),
        )
    }

    /// Returns the position of a 1-indexed line and a 0-indexed character
    /// column, the convention of `proc_macro2` span locations.
    #[must_use]
    pub fn pos_at(&self, line: usize, char_column: usize) -> Pos {
        let Some(line_start) = self.token.line_start(line) else {
            return self.token.end();
        };
        let byte_column: usize = self.content[line_start..]
            .chars()
            .take(char_column)
            .map(char::len_utf8)
            .sum();
        self.token.pos(line_start + byte_column)
    }
}

/// Module metadata of a package.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Module {
    /// Module path.
    pub path: String,
    /// Module version, if known.
    #[serde(default)]
    pub version: Option<String>,
    /// Declared language version.
    #[serde(default)]
    pub lang_version: Option<String>,
}

/// Kind of a load error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadErrorKind {
    /// Syntax error.
    Parse,
    /// Type-checking error.
    Type,
    /// Tooling-level error (unresolvable path, missing dependency data).
    List,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "parse"),
            Self::Type => write!(f, "type"),
            Self::List => write!(f, "list"),
        }
    }
}

/// An error attached to a package by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadError {
    /// Error kind.
    pub kind: LoadErrorKind,
    /// Position as `file:line:col`, when known.
    #[serde(default)]
    pub pos: Option<String>,
    /// Message.
    pub message: String,
}

impl LoadError {
    /// Creates a load error.
    #[must_use]
    pub fn new(kind: LoadErrorKind, pos: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pos {
            Some(pos) => write!(f, "{pos}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Target word size and alignment, for analyzers reasoning about layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSizes {
    /// Pointer width in bytes.
    pub word_size: u64,
    /// Maximum alignment in bytes.
    pub max_align: u64,
}

impl Default for TypeSizes {
    fn default() -> Self {
        Self {
            word_size: 8,
            max_align: 8,
        }
    }
}

/// A loaded package.
#[derive(Debug, Clone)]
pub struct Package {
    /// Stable identifier, unique within a load.
    pub id: String,
    /// Package name.
    pub name: String,
    /// Import path.
    pub path: String,
    /// Position space shared by all packages of the load.
    pub fset: Arc<FileSet>,
    /// Compiled source files.
    pub files: Vec<SourceFile>,
    /// Non-source files belonging to the package.
    pub other_files: Vec<PathBuf>,
    /// Files excluded from compilation.
    pub ignored_files: Vec<PathBuf>,
    /// Declared objects.
    pub types: TypesInfo,
    /// Direct imports by import path.
    pub imports: BTreeMap<String, Arc<Package>>,
    /// Module metadata.
    pub module: Option<Module>,
    /// Load errors, in the order reported by the loader.
    pub errors: Vec<LoadError>,
}

impl Package {
    /// Returns true if the package has parse or type errors.
    #[must_use]
    pub fn ill_typed(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e.kind, LoadErrorKind::Parse | LoadErrorKind::Type))
    }

    /// Returns true if the loader reported tooling-level errors.
    #[must_use]
    pub fn has_list_errors(&self) -> bool {
        self.errors.iter().any(|e| e.kind == LoadErrorKind::List)
    }

    /// Returns true if the package has any load error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the compiled file registered under `path`.
    #[must_use]
    pub fn file(&self, path: &Path) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.path() == path)
    }

    /// Returns the compiled file containing `pos`.
    #[must_use]
    pub fn file_at(&self, pos: Pos) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.token().contains(pos))
    }

    /// Returns true if `path` is a compiled, other or ignored file.
    #[must_use]
    pub fn owns_file(&self, path: &Path) -> bool {
        self.files.iter().any(|f| f.path() == path)
            || self.other_files.iter().any(|f| f == path)
            || self.ignored_files.iter().any(|f| f == path)
    }

    /// Returns true if `pos` lies in a compiled or other file of this package.
    #[must_use]
    pub fn contains_pos(&self, pos: Pos) -> bool {
        self.fset.file(pos).is_some_and(|f| {
            self.files.iter().any(|s| s.path() == f.name())
                || self.other_files.iter().any(|o| o == f.name())
        })
    }

    /// Iterates over the transitive import closure, excluding `self`,
    /// each package once, dependencies before dependents.
    #[must_use]
    pub fn transitive_imports(&self) -> Vec<Arc<Package>> {
        fn visit(
            pkg: &Package,
            seen: &mut std::collections::HashSet<String>,
            out: &mut Vec<Arc<Package>>,
        ) {
            for dep in pkg.imports.values() {
                if seen.insert(dep.id.clone()) {
                    visit(dep, seen, out);
                    out.push(Arc::clone(dep));
                }
            }
        }
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        visit(self, &mut seen, &mut out);
        out
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types_of(src: &str) -> TypesInfo {
        let mut fset = FileSet::new();
        let token = fset.add_file("lib.rs", src).unwrap();
        let file = SourceFile::new("lib.rs", Arc::from(src), token);
        let ast = file.parse().unwrap();
        let mut types = TypesInfo::new();
        types.collect("demo", &file, &ast);
        types
    }

    #[test]
    fn span_columns_are_converted_to_bytes() {
        let src = "const S: &str = \"é\"; fn after() {}\n";
        let types = types_of(src);
        let obj = types.lookup(&ObjectId::new("demo", "after")).unwrap();
        let offset = src.find("after").unwrap();
        assert_eq!(obj.pos.raw() as usize, 1 + offset);
    }

    #[test]
    fn collects_items_fields_and_methods() {
        let types = types_of(
            r#"
pub struct Point { pub x: i32, y: i32 }
impl Point { pub fn norm(&self) -> i32 { 0 } fn hidden(&self) {} }
pub fn free() {}
const LIMIT: usize = 3;
"#,
        );

        let field = types.lookup(&ObjectId::member("demo", "Point", "x")).unwrap();
        assert_eq!(field.kind, ObjectKind::Field);
        assert!(field.exported);
        assert!(!types.lookup(&ObjectId::member("demo", "Point", "y")).unwrap().exported);

        let method = types.lookup(&ObjectId::member("demo", "Point", "norm")).unwrap();
        assert_eq!(method.kind, ObjectKind::Method);
        assert!(!types.lookup(&ObjectId::member("demo", "Point", "hidden")).unwrap().exported);

        assert_eq!(types.lookup(&ObjectId::new("demo", "free")).unwrap().kind, ObjectKind::Fn);
        assert!(!types.lookup(&ObjectId::new("demo", "LIMIT")).unwrap().exported);
    }

    #[test]
    fn object_positions_point_at_identifiers() {
        let src = "fn alpha() {}\n";
        let types = types_of(src);
        let obj = types.lookup(&ObjectId::new("demo", "alpha")).unwrap();
        // `alpha` starts at byte 3
        assert_eq!(obj.pos.raw(), 1 + 3);
        assert_eq!(types.object_at(obj.pos).unwrap().id.name, "alpha");
    }

    #[test]
    fn object_id_display() {
        assert_eq!(ObjectId::new("a/b", "f").to_string(), "a/b.f");
        assert_eq!(ObjectId::member("a/b", "T", "m").to_string(), "a/b.T.m");
    }
}
