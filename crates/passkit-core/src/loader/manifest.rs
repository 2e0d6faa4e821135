//! A loader driven by a `passkit-workspace.toml` manifest.
//!
//! ```toml
//! [module]
//! path = "example.com/m"
//!
//! [[package]]
//! path = "example.com/m/a"
//! dir = "a"
//! imports = ["example.com/m/b"]
//! other_files = ["README.md"]
//!
//! [[package.type_errors]]
//! at = "a.rs:3:5"
//! message = "mismatched types"
//! ```
//!
//! Compiled files are the `*.rs` files directly inside `dir`, minus
//! `ignored_files`. File lists are relative to `dir`. Declared type errors
//! stand in for a type checker.

use super::{LoadMode, Loader, LoaderError, Pattern};
use crate::cancel::CancelToken;
use crate::graph::cycle_through;
use crate::package::{
    LoadError, LoadErrorKind, Module, Package, SourceFile, TypesInfo,
};
use crate::source::{FileSet, TokenFile};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the workspace manifest.
pub const MANIFEST_FILE: &str = "passkit-workspace.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestDto {
    #[serde(default)]
    module: Option<Module>,
    #[serde(rename = "package", default)]
    packages: Vec<PackageDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageDto {
    path: String,
    dir: PathBuf,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default)]
    other_files: Vec<PathBuf>,
    #[serde(default)]
    ignored_files: Vec<PathBuf>,
    #[serde(default)]
    type_errors: Vec<TypeErrorDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeErrorDto {
    at: String,
    message: String,
}

/// Files of one package after listing its directory.
struct Listed {
    compiled: Vec<(PathBuf, Arc<str>, Arc<TokenFile>)>,
    other: Vec<PathBuf>,
    ignored: Vec<PathBuf>,
}

/// Loads packages described by a workspace manifest.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    root: PathBuf,
    cancel: CancelToken,
}

impl ManifestLoader {
    /// Creates a loader for the manifest in `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cancel: CancelToken::new(),
        }
    }

    /// Finds the closest directory at or above `start` containing a
    /// manifest.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::NotFound`] if there is none.
    pub fn discover(start: &Path) -> Result<Self, LoaderError> {
        start
            .ancestors()
            .find(|dir| dir.join(MANIFEST_FILE).is_file())
            .map(Self::new)
            .ok_or_else(|| LoaderError::NotFound {
                start: start.to_path_buf(),
            })
    }

    /// Stops loading when `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Directory holding the manifest.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_manifest(&self) -> Result<ManifestDto, LoaderError> {
        let path = self.root.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| LoaderError::Io {
            path: path.clone(),
            source: e,
        })?;
        let manifest: ManifestDto = toml::from_str(&content).map_err(|e| LoaderError::Manifest {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let mut seen = HashSet::new();
        for pkg in &manifest.packages {
            if !seen.insert(pkg.path.as_str()) {
                return Err(LoaderError::Manifest {
                    path,
                    message: format!("package {} declared twice", pkg.path),
                });
            }
        }
        Ok(manifest)
    }

    fn check_cancelled(&self) -> Result<(), LoaderError> {
        if self.cancel.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }
        Ok(())
    }

    fn list_files(&self, dto: &PackageDto, fset: &mut FileSet) -> Result<Listed, LoaderError> {
        let dir = self.root.join(&dto.dir);
        let ignored: Vec<PathBuf> = dto.ignored_files.iter().map(|f| dir.join(f)).collect();

        let pattern = format!(
            "{}/*.rs",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let entries = glob::glob(&pattern).map_err(|e| LoaderError::Manifest {
            path: self.root.join(MANIFEST_FILE),
            message: format!("bad directory {}: {e}", dto.dir.display()),
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| LoaderError::Io {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            if path.is_file() && !ignored.contains(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut compiled = Vec::with_capacity(paths.len());
        for path in paths {
            let content = read(&path)?;
            let token = fset.add_file(&path, &content)?;
            compiled.push((path, Arc::from(content), token));
        }

        let mut other = Vec::with_capacity(dto.other_files.len());
        for file in &dto.other_files {
            let path = dir.join(file);
            if let Ok(content) = std::fs::read_to_string(&path) {
                fset.add_file(&path, &content)?;
            }
            other.push(path);
        }

        Ok(Listed {
            compiled,
            other,
            ignored,
        })
    }

    /// Returns the declared packages matching `patterns` in first-match
    /// order, and the exact patterns that matched nothing.
    fn select<'m>(
        &self,
        manifest: &'m ManifestDto,
        patterns: &[String],
    ) -> (Vec<&'m PackageDto>, Vec<String>) {
        let mut selected: Vec<&PackageDto> = Vec::new();
        let mut unmatched = Vec::new();
        for raw in patterns {
            let pattern = Pattern::parse(raw);
            let matches: Vec<&PackageDto> = match &pattern {
                Pattern::File(file) => {
                    let wanted = [file.clone(), self.root.join(file)];
                    manifest
                        .packages
                        .iter()
                        .filter(|p| {
                            let dir = self.root.join(&p.dir);
                            wanted.iter().any(|w| {
                                (w.parent() == Some(dir.as_path())
                                    && w.extension().is_some_and(|e| e == "rs"))
                                    || p.other_files.iter().any(|o| dir.join(o) == *w)
                                    || p.ignored_files.iter().any(|i| dir.join(i) == *w)
                            })
                        })
                        .collect()
                }
                _ => manifest
                    .packages
                    .iter()
                    .filter(|p| pattern.matches_path(&p.path))
                    .collect(),
            };

            if matches.is_empty() {
                if pattern.is_wildcard() {
                    tracing::warn!("pattern {raw} matched no packages");
                } else {
                    unmatched.push(raw.clone());
                }
            }
            for m in matches {
                if !selected.iter().any(|s| s.path == m.path) {
                    selected.push(m);
                }
            }
        }
        (selected, unmatched)
    }
}

impl Loader for ManifestLoader {
    fn load(&self, patterns: &[String], mode: LoadMode) -> Result<Vec<Arc<Package>>, LoaderError> {
        self.check_cancelled()?;
        let manifest = self.read_manifest()?;
        let by_path: HashMap<&str, &PackageDto> = manifest
            .packages
            .iter()
            .map(|p| (p.path.as_str(), p))
            .collect();

        let (selected, unmatched) = self.select(&manifest, patterns);
        let roots: HashSet<&str> = selected.iter().map(|p| p.path.as_str()).collect();

        let order = dependency_order(&selected, &by_path)?;

        let mut fset = FileSet::new();
        let mut listed = HashMap::new();
        for dto in &order {
            self.check_cancelled()?;
            listed.insert(dto.path.as_str(), self.list_files(dto, &mut fset)?);
        }
        let fset = Arc::new(fset);

        let mut built: BTreeMap<String, Arc<Package>> = BTreeMap::new();
        for dto in &order {
            self.check_cancelled()?;
            let Some(files) = listed.remove(dto.path.as_str()) else {
                continue;
            };
            let is_root = roots.contains(dto.path.as_str());
            let pkg = self.build(
                dto,
                files,
                &fset,
                &built,
                manifest.module.as_ref(),
                type_error_kind(mode, is_root),
            );
            built.insert(dto.path.clone(), Arc::new(pkg));
        }

        let mut out: Vec<Arc<Package>> = selected
            .iter()
            .filter_map(|dto| built.get(&dto.path).cloned())
            .collect();
        for pattern in unmatched {
            tracing::warn!("no package matches {pattern}");
            out.push(Arc::new(placeholder(&pattern, &fset)));
        }

        tracing::info!(
            packages = out.len(),
            loaded = built.len(),
            "loaded packages from {}",
            self.root.display()
        );
        Ok(out)
    }
}

impl ManifestLoader {
    fn build(
        &self,
        dto: &PackageDto,
        listed: Listed,
        fset: &Arc<FileSet>,
        built: &BTreeMap<String, Arc<Package>>,
        module: Option<&Module>,
        type_error_kind: LoadErrorKind,
    ) -> Package {
        let mut errors = Vec::new();
        let mut imports = BTreeMap::new();
        for import in &dto.imports {
            match built.get(import) {
                Some(pkg) => {
                    imports.insert(import.clone(), Arc::clone(pkg));
                }
                None => errors.push(LoadError::new(
                    LoadErrorKind::List,
                    None,
                    format!("could not import {import} (no such package)"),
                )),
            }
        }

        let mut types = TypesInfo::new();
        let mut files = Vec::with_capacity(listed.compiled.len());
        for (path, content, token) in listed.compiled {
            let file = SourceFile::new(path, content, token);
            match file.parse() {
                Ok(ast) => types.collect(&dto.path, &file, &ast),
                Err(err) => {
                    let start = err.span().start();
                    let pos = file.pos_at(start.line, start.column);
                    errors.push(LoadError::new(
                        LoadErrorKind::Parse,
                        fset.position(pos).map(|p| p.to_string()),
                        err.to_string(),
                    ));
                }
            }
            files.push(file);
        }

        let dir = self.root.join(&dto.dir);
        for declared in &dto.type_errors {
            let at = match declared.at.split_once(':') {
                Some((file, rest)) => format!("{}:{rest}", dir.join(file).display()),
                None => dir.join(&declared.at).display().to_string(),
            };
            errors.push(LoadError::new(
                type_error_kind,
                Some(at),
                declared.message.clone(),
            ));
        }
        errors.sort_by(|a, b| a.pos.cmp(&b.pos));

        Package {
            id: dto.path.clone(),
            name: dto
                .name
                .clone()
                .unwrap_or_else(|| default_name(&dto.path)),
            path: dto.path.clone(),
            fset: Arc::clone(fset),
            files,
            other_files: listed.other,
            ignored_files: listed.ignored,
            types,
            imports,
            module: module.cloned(),
            errors,
        }
    }
}

/// In `Roots` mode the requested packages are not type-checked from
/// source, so their declared type errors surface as tooling errors.
fn type_error_kind(mode: LoadMode, is_root: bool) -> LoadErrorKind {
    match mode {
        LoadMode::Roots if is_root => LoadErrorKind::List,
        _ => LoadErrorKind::Type,
    }
}

/// Returns `selected` and everything they import, dependencies first so
/// every import is built before its importer.
fn dependency_order<'m>(
    selected: &[&'m PackageDto],
    by_path: &HashMap<&str, &'m PackageDto>,
) -> Result<Vec<&'m PackageDto>, LoaderError> {
    // Edges point from an import to its importer.
    fn add<'m>(
        pkg: &'m PackageDto,
        by_path: &HashMap<&str, &'m PackageDto>,
        graph: &mut DiGraph<&'m PackageDto, ()>,
        nodes: &mut HashMap<&'m str, NodeIndex>,
    ) -> NodeIndex {
        if let Some(&node) = nodes.get(pkg.path.as_str()) {
            return node;
        }
        let node = graph.add_node(pkg);
        nodes.insert(&pkg.path, node);
        for import in &pkg.imports {
            if let Some(&dep) = by_path.get(import.as_str()) {
                let dep = add(dep, by_path, graph, nodes);
                graph.update_edge(dep, node, ());
            }
        }
        node
    }

    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    for &pkg in selected {
        add(pkg, by_path, &mut graph, &mut nodes);
    }
    let order = toposort(&graph, None).map_err(|cycle| {
        let path = cycle_through(&graph, cycle.node_id());
        LoaderError::ImportCycle(path.into_iter().rev().map(|n| graph[n].path.clone()).collect())
    })?;
    Ok(order.into_iter().map(|n| graph[n]).collect())
}

fn default_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).replace('-', "_")
}

fn placeholder(pattern: &str, fset: &Arc<FileSet>) -> Package {
    Package {
        id: pattern.to_string(),
        name: default_name(pattern),
        path: pattern.to_string(),
        fset: Arc::clone(fset),
        files: Vec::new(),
        other_files: Vec::new(),
        ignored_files: Vec::new(),
        types: TypesInfo::new(),
        imports: BTreeMap::new(),
        module: None,
        errors: vec![LoadError::new(
            LoadErrorKind::List,
            None,
            format!("no package matches {pattern}"),
        )],
    }
}

fn read(path: &Path) -> Result<String, LoaderError> {
    std::fs::read_to_string(path).map_err(|e| LoaderError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
