//! # passkit-core
//!
//! Core of the passkit static-analysis driver.
//!
//! The driver runs a set of [`Analyzer`]s over a set of loaded
//! [`Package`]s. Every (analyzer, package) pair is an [`Action`] in an
//! [`ActionGraph`]; actions run in dependency order on a bounded worker pool.
//! Analyzers see the package through a [`Pass`], report [`Diagnostic`]s,
//! exchange results with the analyzers they require, and attach [`Fact`]s
//! to objects that analyzers on importing packages can read.
//!
//! - [`analyze`] plans and executes the graph and returns an [`Analysis`]
//! - [`validate_diagnostic`] checks what analyzers report
//! - [`FixPlan`] merges suggested fixes and rewrites files or renders a diff
//! - [`ManifestLoader`] loads packages from a `passkit-workspace.toml`
//!
//! ## Example
//!
//! ```ignore
//! use passkit_core::{analyze, Analyzer, Loader, LoadMode, ManifestLoader, Options};
//!
//! let todo = Analyzer::builder("todo")
//!     .doc("reports TODO comments")
//!     .run(|pass| {
//!         let found: Vec<_> = pass
//!             .files()
//!             .iter()
//!             .filter_map(|f| f.content().find("TODO").map(|i| f.token().pos(i)))
//!             .collect();
//!         for pos in found {
//!             pass.report_at(pos, "TODO left in code");
//!         }
//!         Ok(None)
//!     })
//!     .build()?;
//!
//! let packages = ManifestLoader::discover(".".as_ref())?
//!     .load(&["...".to_string()], LoadMode::Roots)?;
//! let analysis = analyze(&[todo], &packages, &Options::new())?;
//! for d in analysis.diagnostics() {
//!     println!("{}", d.format());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod analyzer;
mod cancel;
mod config;
mod diff;
mod driver;
mod fact;
mod fixes;
mod graph;
mod loader;
mod package;
mod pass;
mod scheduler;
mod source;
mod types;
mod validate;

pub use action::{Action, ActionError, ActionOutcome, ActionState};
pub use analyzer::{
    validate, Analyzer, AnalyzerBuilder, AnalyzerResult, FlagSpec, PlanError, ResultType, RunFn,
    RunResult,
};
pub use cancel::CancelToken;
pub use config::{AnalyzerConfig, Config, ConfigError, DriverConfig};
pub use diff::unified_diff;
pub use driver::{analyze, Analysis, DriverError, Options, Reported};
pub use fact::{AnyFact, Fact, FactError, FactStore, FactType, ObjectFact, PackageFact};
pub use fixes::{merge_edits, FileFix, FixError, FixMode, FixPlan, FixReport, PlannedEdit};
pub use graph::{ActionGraph, ActionId};
pub use loader::{LoadMode, Loader, LoaderError, ManifestLoader, Pattern, MANIFEST_FILE};
pub use package::{
    LoadError, LoadErrorKind, Module, Object, ObjectId, ObjectKind, Package, SourceFile,
    TypeSizes, TypesInfo,
};
pub use pass::{Pass, PassError};
pub use source::{content_digest, FileSet, FileSetFull, Pos, Position, TokenFile};
pub use types::{Diagnostic, Range, RelatedInformation, SuggestedFix, TextEdit};
pub use validate::{validate_diagnostic, ValidationError};
