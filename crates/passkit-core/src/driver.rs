//! The library entry point: plan, execute, and collect results.

use crate::action::{Action, RunContext};
use crate::analyzer::{validate, Analyzer, PlanError};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::graph::ActionGraph;
use crate::package::{Package, TypeSizes};
use crate::scheduler;
use crate::source::Position;
use crate::types::Diagnostic;
use crate::validate::ValidationError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a whole invocation.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The analyzer set or the import graph is invalid.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// An analyzer reported a malformed diagnostic.
    #[error("analyzer {analyzer} reported an invalid diagnostic on package {package}: {source}")]
    InvalidDiagnostic {
        /// Analyzer name.
        analyzer: String,
        /// Import path of the package.
        package: String,
        /// What was wrong.
        #[source]
        source: ValidationError,
    },

    /// An analyzer misused the pass (undeclared fact type, foreign object).
    #[error("analyzer {analyzer} on package {package}: {message}")]
    Contract {
        /// Analyzer name.
        analyzer: String,
        /// Import path of the package.
        package: String,
        /// Description of the violation.
        message: String,
    },

    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The invocation was cancelled or timed out.
    #[error("analysis cancelled")]
    Cancelled,
}

/// Settings for [`analyze`].
#[derive(Debug, Clone, Default)]
pub struct Options {
    parallelism: Option<usize>,
    read_allow: Vec<PathBuf>,
    flags: BTreeMap<String, BTreeMap<String, String>>,
    cancel: CancelToken,
    timeout: Option<Duration>,
    type_sizes: TypeSizes,
}

impl Options {
    /// Default options: one worker per logical CPU, no extra readable files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds options from the `[driver]` and `[analyzers.*]` tables.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut options = Self::new();
        options.parallelism = config.driver.parallelism;
        options.read_allow.clone_from(&config.driver.read_allow);
        for name in config.analyzers.keys() {
            let values = config.flag_values(name);
            if !values.is_empty() {
                options.flags.insert(name.clone(), values);
            }
        }
        options.timeout = config.driver.timeout_secs.map(Duration::from_secs);
        options
    }

    /// Sets the maximum number of concurrently running actions.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism.max(1));
        self
    }

    /// Allows analyzers to read `path` through [`Pass::read_file`](crate::Pass::read_file).
    #[must_use]
    pub fn with_read_allow(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_allow.push(path.into());
        self
    }

    /// Sets the value of an analyzer flag.
    #[must_use]
    pub fn with_flag(
        mut self,
        analyzer: impl Into<String>,
        flag: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.flags
            .entry(analyzer.into())
            .or_default()
            .insert(flag.into(), value.into());
        self
    }

    /// Uses `cancel` to stop the analysis early.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bounds the analysis phase. The clock starts when [`analyze`] is
    /// called, so package loading does not count against it.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the target word size and alignment.
    #[must_use]
    pub fn with_type_sizes(mut self, type_sizes: TypeSizes) -> Self {
        self.type_sizes = type_sizes;
        self
    }

    /// Effective parallelism.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        })
    }

    /// The cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// A diagnostic together with where it came from.
#[derive(Debug, Clone, Copy)]
pub struct Reported<'a> {
    /// Reporting analyzer.
    pub analyzer: &'a Analyzer,
    /// Analyzed package.
    pub package: &'a Package,
    /// The diagnostic.
    pub diagnostic: &'a Diagnostic,
}

impl<'a> Reported<'a> {
    /// Resolved start position.
    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.package.fset.position(self.diagnostic.pos)
    }

    /// `file:line:col: [analyzer] message` plus related lines.
    #[must_use]
    pub fn format(&self) -> String {
        self.diagnostic.format(&self.package.fset, self.analyzer.name())
    }

    fn sort_key(&self) -> (Option<PathBuf>, usize, usize, &'a str, &'a str) {
        let start = self.position();
        let end = self.package.fset.position(self.diagnostic.end);
        (
            start.as_ref().map(|p| p.filename.clone()),
            start.map_or(0, |p| p.offset),
            end.map_or(0, |p| p.offset),
            self.analyzer.name(),
            &self.diagnostic.message,
        )
    }
}

/// Results of one invocation.
#[derive(Debug)]
pub struct Analysis {
    graph: ActionGraph,
}

impl Analysis {
    /// The full action graph.
    #[must_use]
    pub fn graph(&self) -> &ActionGraph {
        &self.graph
    }

    /// Requested actions.
    pub fn roots(&self) -> impl Iterator<Item = &Action> {
        self.graph.roots()
    }

    /// All actions, predecessors first.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.graph.actions()
    }

    /// Diagnostics of root actions, ordered by file, offset, end, analyzer
    /// and message.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Reported<'_>> {
        let mut out: Vec<Reported<'_>> = self
            .roots()
            .flat_map(|action| {
                action.diagnostics().iter().map(move |d| Reported {
                    analyzer: action.analyzer(),
                    package: action.package(),
                    diagnostic: d,
                })
            })
            .collect();
        out.sort_by_cached_key(Reported::sort_key);
        out
    }

    /// Root actions that failed.
    #[must_use]
    pub fn failures(&self) -> Vec<&Action> {
        self.roots().filter(|a| a.failed()).collect()
    }

    /// Returns the root action of `analyzer` on the package `id`.
    #[must_use]
    pub fn root(&self, analyzer: &str, package_id: &str) -> Option<&Action> {
        self.roots()
            .find(|a| a.analyzer().name() == analyzer && a.package().id == package_id)
    }
}

/// Runs `analyzers` on `packages` and everything they need.
///
/// Per-action failures are recorded in the returned [`Analysis`]; only
/// invocation-level problems are errors.
///
/// # Errors
///
/// Returns [`DriverError::Plan`] for an invalid analyzer set or import
/// cycle, [`DriverError::InvalidDiagnostic`] or [`DriverError::Contract`]
/// when an analyzer breaks the pass contract, and [`DriverError::Cancelled`]
/// if the token or timeout in `options` fires.
pub fn analyze(
    analyzers: &[Arc<Analyzer>],
    packages: &[Arc<Package>],
    options: &Options,
) -> Result<Analysis, DriverError> {
    validate(analyzers)?;
    let graph = ActionGraph::plan(analyzers, packages)?;

    let mut cancel = options.cancel.child();
    if let Some(timeout) = options.timeout {
        cancel = cancel.with_timeout(timeout);
    }
    let ctx = RunContext {
        type_sizes: options.type_sizes,
        read_allow: &options.read_allow,
        flags: &options.flags,
        cancel,
    };
    scheduler::execute(&graph, &ctx, options.parallelism())?;

    if ctx.cancel.is_cancelled() {
        return Err(DriverError::Cancelled);
    }
    Ok(Analysis { graph })
}
