//! The per-action context handed to an analyzer's run function.

use crate::analyzer::{Analyzer, AnalyzerKey, AnalyzerResult};
use crate::driver::DriverError;
use crate::fact::{Fact, FactStore, ObjectFact, PackageFact};
use crate::package::{ObjectId, Package, SourceFile, TypeSizes, TypesInfo};
use crate::source::{FileSet, Pos};
use crate::types::{Diagnostic, Range};
use crate::validate::{normalize, validate_diagnostic};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned to analyzers by [`Pass`] helpers.
#[derive(Debug, Error)]
pub enum PassError {
    /// The path is not a file of the package nor explicitly allowed.
    #[error("{} is not among OtherFiles, IgnoredFiles, or names of Files", path.display())]
    NotAmongFiles {
        /// Requested path.
        path: PathBuf,
    },

    /// Reading an allowed file failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Requested path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Everything a finished run leaves behind.
#[derive(Debug, Default)]
pub(crate) struct PassOutput {
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) facts: FactStore,
    pub(crate) exported_object_facts: usize,
    pub(crate) exported_package_facts: usize,
    pub(crate) fatal: Option<DriverError>,
}

/// Context of one analyzer running on one package.
///
/// Valid only for the duration of the run function it is passed to.
pub struct Pass<'a> {
    analyzer: &'a Analyzer,
    package: &'a Package,
    type_sizes: TypeSizes,
    results: &'a HashMap<AnalyzerKey, AnalyzerResult>,
    read_allow: &'a [PathBuf],
    flags: Option<&'a BTreeMap<String, String>>,
    out: PassOutput,
}

impl<'a> Pass<'a> {
    pub(crate) fn new(
        analyzer: &'a Analyzer,
        package: &'a Package,
        type_sizes: TypeSizes,
        results: &'a HashMap<AnalyzerKey, AnalyzerResult>,
        facts: FactStore,
        read_allow: &'a [PathBuf],
        flags: Option<&'a BTreeMap<String, String>>,
    ) -> Self {
        Self {
            analyzer,
            package,
            type_sizes,
            results,
            read_allow,
            flags,
            out: PassOutput {
                facts,
                ..PassOutput::default()
            },
        }
    }

    pub(crate) fn finish(self) -> PassOutput {
        self.out
    }

    /// The analyzer being run.
    #[must_use]
    pub fn analyzer(&self) -> &Analyzer {
        self.analyzer
    }

    /// The package being analyzed.
    #[must_use]
    pub fn package(&self) -> &Package {
        self.package
    }

    /// The position space of the load.
    #[must_use]
    pub fn fset(&self) -> &FileSet {
        &self.package.fset
    }

    /// Compiled files of the package.
    #[must_use]
    pub fn files(&self) -> &[SourceFile] {
        &self.package.files
    }

    /// Non-source files of the package.
    #[must_use]
    pub fn other_files(&self) -> &[PathBuf] {
        &self.package.other_files
    }

    /// Files excluded from compilation.
    #[must_use]
    pub fn ignored_files(&self) -> &[PathBuf] {
        &self.package.ignored_files
    }

    /// Declared objects of the package.
    #[must_use]
    pub fn types(&self) -> &TypesInfo {
        &self.package.types
    }

    /// Word size and alignment of the target.
    #[must_use]
    pub fn type_sizes(&self) -> TypeSizes {
        self.type_sizes
    }

    /// Returns the result `prerequisite` produced on this package.
    ///
    /// `None` if `prerequisite` is not a declared requirement, produced no
    /// result, or produced a value of another type.
    #[must_use]
    pub fn result_of<T: Any + Send + Sync>(&self, prerequisite: &Analyzer) -> Option<&T> {
        let result = self.results.get(&prerequisite.key())?;
        let value: &dyn Any = result.as_ref();
        value.downcast_ref::<T>()
    }

    /// Returns the value of one of this analyzer's flags, falling back to
    /// its declared default.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.flags.and_then(|f| f.get(name)) {
            return Some(value);
        }
        self.analyzer
            .flags()
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.default.as_str())
    }

    /// Returns a boolean flag; unknown flags and unparsable values are false.
    #[must_use]
    pub fn flag_bool(&self, name: &str) -> bool {
        self.flag(name).is_some_and(|v| v == "true" || v == "1")
    }

    /// Reports a diagnostic.
    ///
    /// The diagnostic is validated immediately. A malformed diagnostic is a
    /// bug in the analyzer: it aborts the invocation and every later report
    /// of this pass is dropped.
    pub fn report(&mut self, mut diag: Diagnostic) {
        if self.out.fatal.is_some() {
            return;
        }
        if let Err(source) = validate_diagnostic(self.package, &diag) {
            tracing::error!(
                analyzer = self.analyzer.name(),
                package = %self.package,
                "invalid diagnostic: {source}"
            );
            self.out.fatal = Some(DriverError::InvalidDiagnostic {
                analyzer: self.analyzer.name().to_string(),
                package: self.package.path.clone(),
                source,
            });
            return;
        }
        normalize(&mut diag);
        diag.resolve_url(self.analyzer.url());
        self.out.diagnostics.push(diag);
    }

    /// Reports a diagnostic at `pos`.
    pub fn report_at(&mut self, pos: Pos, message: impl Into<String>) {
        self.report(Diagnostic::new(pos, message));
    }

    /// Reports a diagnostic spanning `range`.
    pub fn report_range(&mut self, range: &impl Range, message: impl Into<String>) {
        self.report(Diagnostic::spanning(range, message));
    }

    /// Diagnostics reported so far.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.out.diagnostics
    }

    /// Attaches `fact` to an object declared in this package, replacing any
    /// fact of the same type.
    pub fn export_object_fact<T: Fact>(&mut self, object: &ObjectId, fact: T) {
        if !self.check_fact_type::<T>() {
            return;
        }
        if object.package != self.package.path {
            self.violation(format!(
                "cannot export fact {} about {object}: object is not in package {}",
                T::KIND,
                self.package.path
            ));
            return;
        }
        self.out.facts.set_object_fact(object.clone(), Arc::new(fact));
        self.out.exported_object_facts += 1;
    }

    /// Attaches `fact` to this package, replacing any fact of the same type.
    pub fn export_package_fact<T: Fact>(&mut self, fact: T) {
        if !self.check_fact_type::<T>() {
            return;
        }
        self.out
            .facts
            .set_package_fact(self.package.path.clone(), Arc::new(fact));
        self.out.exported_package_facts += 1;
    }

    /// Returns the fact of type `T` on `object`, exported either by this pass
    /// or by this analyzer on a (transitively) imported package.
    #[must_use]
    pub fn import_object_fact<T: Fact>(&self, object: &ObjectId) -> Option<&T> {
        self.out.facts.object_fact::<T>(object)
    }

    /// Returns the fact of type `T` on the package with import path `path`.
    #[must_use]
    pub fn import_package_fact<T: Fact>(&self, path: &str) -> Option<&T> {
        self.out.facts.package_fact::<T>(path)
    }

    /// All object facts visible to this pass, in key order.
    pub fn all_object_facts(&self) -> impl Iterator<Item = ObjectFact<'_>> {
        self.out.facts.object_facts()
    }

    /// All package facts visible to this pass, in key order.
    pub fn all_package_facts(&self) -> impl Iterator<Item = PackageFact<'_>> {
        self.out.facts.package_facts()
    }

    /// Reads a file of the package.
    ///
    /// Only compiled, other and ignored files, plus the paths the driver was
    /// told to allow, can be read. Compiled files are returned as loaded.
    ///
    /// # Errors
    ///
    /// Returns [`PassError::NotAmongFiles`] for any other path, or
    /// [`PassError::Io`] if reading fails.
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<String, PassError> {
        let path = path.as_ref();
        if let Some(file) = self.package.file(path) {
            return Ok(file.content().to_string());
        }
        let allowed = self.package.owns_file(path) || self.read_allow.iter().any(|p| p == path);
        if !allowed {
            return Err(PassError::NotAmongFiles {
                path: path.to_path_buf(),
            });
        }
        std::fs::read_to_string(path).map_err(|source| PassError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn check_fact_type<T: Fact>(&mut self) -> bool {
        if self.out.fatal.is_some() {
            return false;
        }
        let declared = self
            .analyzer
            .fact_types()
            .iter()
            .any(|ft| ft.type_id() == std::any::TypeId::of::<T>());
        if !declared {
            self.violation(format!(
                "fact type {} ({}) is not declared by the analyzer",
                T::KIND,
                std::any::type_name::<T>()
            ));
        }
        declared
    }

    fn violation(&mut self, message: String) {
        tracing::error!(analyzer = self.analyzer.name(), "{message}");
        self.out.fatal = Some(DriverError::Contract {
            analyzer: self.analyzer.name().to_string(),
            package: self.package.path.clone(),
            message,
        });
    }
}

impl std::fmt::Debug for Pass<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("analyzer", &self.analyzer.name())
            .field("package", &self.package.path)
            .field("diagnostics", &self.out.diagnostics.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FactType;
    use crate::package::{Object, ObjectKind};
    use crate::source::FileSet;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Pure(bool);

    impl Fact for Pure {
        const KIND: &'static str = "pure";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Undeclared;

    impl Fact for Undeclared {
        const KIND: &'static str = "undeclared";
    }

    fn package(other: &Path) -> Package {
        let mut fset = FileSet::new();
        let src = "fn f() {}\n";
        let token = fset.add_file("p/a.rs", src).unwrap();
        let mut types = TypesInfo::new();
        types.insert(Object {
            id: ObjectId::new("p", "f"),
            kind: ObjectKind::Fn,
            pos: token.pos(3),
            exported: false,
        });
        Package {
            id: "p".into(),
            name: "p".into(),
            path: "p".into(),
            fset: Arc::new(fset),
            files: vec![SourceFile::new("p/a.rs", Arc::from(src), token)],
            other_files: vec![other.to_path_buf()],
            ignored_files: Vec::new(),
            types,
            imports: BTreeMap::new(),
            module: None,
            errors: Vec::new(),
        }
    }

    fn analyzer() -> Arc<Analyzer> {
        Analyzer::builder("purity")
            .doc("records pure functions")
            .url("https://example.com/purity")
            .fact_type(FactType::of::<Pure>())
            .run(|_| Ok(None))
            .build()
            .unwrap()
    }

    fn with_pass(pkg: &Package, a: &Analyzer, f: impl FnOnce(&mut Pass<'_>)) -> PassOutput {
        let results = HashMap::new();
        let mut pass = Pass::new(
            a,
            pkg,
            TypeSizes::default(),
            &results,
            FactStore::new(),
            &[],
            None,
        );
        f(&mut pass);
        pass.finish()
    }

    #[test]
    fn report_normalizes_and_fills_url() {
        let pkg = package(Path::new("p/notes.txt"));
        let a = analyzer();
        let pos = pkg.files[0].token().pos(3);
        let out = with_pass(&pkg, &a, |pass| {
            pass.report(Diagnostic::new(pos, "first").with_category("cat"));
            pass.report_at(pos, "second");
        });
        assert!(out.fatal.is_none());
        let messages: Vec<_> = out.diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
        assert_eq!(out.diagnostics[0].end, pos);
        assert_eq!(
            out.diagnostics[0].url.as_deref(),
            Some("https://example.com/purity#cat")
        );
    }

    #[test]
    fn invalid_diagnostic_is_fatal_and_names_the_analyzer() {
        let pkg = package(Path::new("p/notes.txt"));
        let a = analyzer();
        let out = with_pass(&pkg, &a, |pass| {
            pass.report_at(Pos::NONE, "nowhere");
            pass.report_at(pkg.files[0].token().pos(0), "dropped");
        });
        assert!(out.diagnostics.is_empty());
        let err = out.fatal.unwrap();
        assert!(matches!(&err, DriverError::InvalidDiagnostic { analyzer, .. } if analyzer == "purity"));
    }

    #[test]
    fn exported_facts_are_visible_to_the_same_pass() {
        let pkg = package(Path::new("p/notes.txt"));
        let a = analyzer();
        let f = ObjectId::new("p", "f");
        let out = with_pass(&pkg, &a, |pass| {
            pass.export_object_fact(&f, Pure(true));
            pass.export_object_fact(&f, Pure(false));
            pass.export_package_fact(Pure(true));
            assert_eq!(pass.import_object_fact::<Pure>(&f), Some(&Pure(false)));
            assert_eq!(pass.import_package_fact::<Pure>("p"), Some(&Pure(true)));
            assert_eq!(pass.all_object_facts().count(), 1);
        });
        assert!(out.fatal.is_none());
        assert_eq!(out.facts.len(), 2);
        assert_eq!(out.exported_object_facts, 2);
    }

    #[test]
    fn exporting_undeclared_fact_type_is_a_violation() {
        let pkg = package(Path::new("p/notes.txt"));
        let a = analyzer();
        let out = with_pass(&pkg, &a, |pass| pass.export_package_fact(Undeclared));
        assert!(matches!(out.fatal, Some(DriverError::Contract { .. })));
        assert!(out.facts.is_empty());
    }

    #[test]
    fn exporting_fact_about_foreign_object_is_a_violation() {
        let pkg = package(Path::new("p/notes.txt"));
        let a = analyzer();
        let out = with_pass(&pkg, &a, |pass| {
            pass.export_object_fact(&ObjectId::new("q", "g"), Pure(true));
        });
        assert!(matches!(out.fatal, Some(DriverError::Contract { .. })));
    }

    #[test]
    fn read_file_is_limited_to_package_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, "hello").unwrap();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "no").unwrap();

        let pkg = package(&notes);
        let a = analyzer();
        with_pass(&pkg, &a, |pass| {
            assert_eq!(pass.read_file(&notes).unwrap(), "hello");
            assert_eq!(pass.read_file("p/a.rs").unwrap(), "fn f() {}\n");
            let err = pass.read_file(&secret).unwrap_err();
            assert!(err.to_string().contains("is not among OtherFiles"));
        });
    }

    #[test]
    fn flags_fall_back_to_defaults() {
        let pkg = package(Path::new("p/notes.txt"));
        let a = Analyzer::builder("cfg")
            .doc("d")
            .flag(crate::analyzer::FlagSpec::bool("strict", false, "strict mode"))
            .flag(crate::analyzer::FlagSpec::string("prefix", "x_", "prefix"))
            .run(|_| Ok(None))
            .build()
            .unwrap();
        let results = HashMap::new();
        let values = BTreeMap::from([("strict".to_string(), "true".to_string())]);
        let pass = Pass::new(
            &a,
            &pkg,
            TypeSizes::default(),
            &results,
            FactStore::new(),
            &[],
            Some(&values),
        );
        assert!(pass.flag_bool("strict"));
        assert_eq!(pass.flag("prefix"), Some("x_"));
        assert_eq!(pass.flag("missing"), None);
    }
}
