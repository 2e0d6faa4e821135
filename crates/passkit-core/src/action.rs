//! Actions: one analyzer applied to one package.

use crate::analyzer::{Analyzer, AnalyzerKey, AnalyzerResult};
use crate::cancel::CancelToken;
use crate::driver::DriverError;
use crate::fact::{FactError, FactStore};
use crate::graph::{ActionGraph, ActionId};
use crate::package::{LoadErrorKind, Package, TypeSizes};
use crate::pass::Pass;
use crate::types::Diagnostic;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Lifecycle state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Waiting for predecessors.
    Pending,
    /// Run function executing.
    Running,
    /// Finished, successfully or not.
    Done,
}

/// Why an action did not produce a result.
///
/// Action errors never abort the invocation; they are recorded on the
/// action and surface through the exit code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The loader could not produce the package.
    #[error("package {package} could not be loaded: {}", errors.join("; "))]
    PackageNotLoaded {
        /// Import path.
        package: String,
        /// Rendered loader errors.
        errors: Vec<String>,
    },

    /// The package has parse or type errors and the analyzer does not
    /// tolerate them.
    #[error("analysis skipped due to errors in package")]
    SkippedDueToErrors,

    /// A predecessor failed.
    #[error("failed prerequisites: {}", .0.join(", "))]
    FailedPrerequisites(Vec<String>),

    /// The run function returned an error.
    #[error("{0}")]
    Run(String),

    /// The run function panicked.
    #[error("analyzer panicked: {0}")]
    Panicked(String),

    /// The run function returned a value of an undeclared type.
    #[error(
        "internal error: on package {package}, analyzer {analyzer} returned a result \
         of type {actual}, but declared result type {expected}"
    )]
    ResultTypeMismatch {
        /// Analyzer name.
        analyzer: String,
        /// Import path.
        package: String,
        /// Declared type, or `none`.
        expected: String,
        /// Description of the returned value.
        actual: String,
    },

    /// Facts could not be encoded or decoded.
    #[error("facts: {0}")]
    Facts(String),

    /// The pass violated its contract; the invocation is aborted.
    #[error("{0}")]
    Aborted(String),

    /// The invocation was cancelled before the action ran.
    #[error("analysis cancelled")]
    Cancelled,
}

impl From<FactError> for ActionError {
    fn from(err: FactError) -> Self {
        Self::Facts(err.to_string())
    }
}

/// What a finished action leaves behind.
#[derive(Debug, Default)]
pub struct ActionOutcome {
    /// Value for dependent analyzers on the same package.
    pub result: Option<AnalyzerResult>,
    /// Accepted diagnostics, in report order.
    pub diagnostics: Vec<Diagnostic>,
    /// Encoded fact store: inherited facts plus own exports.
    pub facts: Option<Arc<[u8]>>,
    /// Number of object facts exported by this action.
    pub object_facts: usize,
    /// Number of package facts exported by this action.
    pub package_facts: usize,
    /// First error, if the action failed.
    pub error: Option<ActionError>,
    /// Wall time spent in the run function.
    pub duration: Duration,
}

impl ActionOutcome {
    fn failed(error: ActionError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Inputs shared by every action of one invocation.
pub(crate) struct RunContext<'a> {
    pub(crate) type_sizes: TypeSizes,
    pub(crate) read_allow: &'a [PathBuf],
    pub(crate) flags: &'a BTreeMap<String, BTreeMap<String, String>>,
    pub(crate) cancel: CancelToken,
}

/// A node of the action graph.
pub struct Action {
    analyzer: Arc<Analyzer>,
    package: Arc<Package>,
    pub(crate) deps: Vec<ActionId>,
    pub(crate) dependents: Vec<ActionId>,
    pub(crate) is_root: bool,
    state: Mutex<ActionState>,
    outcome: OnceLock<ActionOutcome>,
}

impl Action {
    pub(crate) fn new(analyzer: Arc<Analyzer>, package: Arc<Package>, deps: Vec<ActionId>) -> Self {
        Self {
            analyzer,
            package,
            deps,
            dependents: Vec::new(),
            is_root: false,
            state: Mutex::new(ActionState::Pending),
            outcome: OnceLock::new(),
        }
    }

    /// The analyzer.
    #[must_use]
    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    /// The package.
    #[must_use]
    pub fn package(&self) -> &Arc<Package> {
        &self.package
    }

    /// Whether the action was requested directly rather than as a
    /// prerequisite.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ActionState {
        *self.state.lock()
    }

    /// Outcome, once done.
    #[must_use]
    pub fn outcome(&self) -> Option<&ActionOutcome> {
        self.outcome.get()
    }

    /// Accepted diagnostics; empty until done.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.outcome().map_or(&[], |o| o.diagnostics.as_slice())
    }

    /// The error, if the action failed.
    #[must_use]
    pub fn error(&self) -> Option<&ActionError> {
        self.outcome().and_then(|o| o.error.as_ref())
    }

    /// True if the action finished with an error.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.error().is_some()
    }

    /// True if the action reported at least one diagnostic.
    #[must_use]
    pub fn had_diagnostics(&self) -> bool {
        !self.diagnostics().is_empty()
    }

    /// Decodes the facts visible after this action ran.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored encoding cannot be decoded.
    pub fn facts(&self) -> Result<FactStore, FactError> {
        match self.outcome().and_then(|o| o.facts.as_deref()) {
            Some(bytes) => FactStore::decode(bytes, self.analyzer.fact_types()),
            None => Ok(FactStore::new()),
        }
    }

    pub(crate) fn key(&self) -> (AnalyzerKey, &str) {
        (self.analyzer.key(), &self.package.id)
    }

    pub(crate) fn complete(&self, outcome: ActionOutcome) {
        if self.outcome.set(outcome).is_err() {
            tracing::warn!(action = %self, "action completed twice");
        }
        *self.state.lock() = ActionState::Done;
    }

    pub(crate) fn cancel(&self) {
        self.complete(ActionOutcome::failed(ActionError::Cancelled));
    }

    /// Records a panic that escaped [`Action::execute`], such as one raised
    /// by a fact's `Serialize` or `Deserialize` impl. An outcome already
    /// published is kept.
    pub(crate) fn abandon(&self, payload: &(dyn std::any::Any + Send)) {
        let message = panic_message(payload);
        tracing::error!(action = %self, "panicked outside the run function: {message}");
        if self.outcome().is_none() {
            self.complete(ActionOutcome::failed(ActionError::Panicked(message)));
        } else {
            *self.state.lock() = ActionState::Done;
        }
    }

    /// Runs the action once all predecessors are done and records its
    /// outcome. Returns the fatal error that should abort the invocation,
    /// if any.
    pub(crate) fn execute(&self, graph: &ActionGraph, ctx: &RunContext<'_>) -> Option<DriverError> {
        *self.state.lock() = ActionState::Running;
        tracing::debug!(action = %self, "running");

        let (outcome, fatal) = match self.prepare(graph, ctx) {
            Ok((results, facts)) => self.run(results, facts, ctx),
            Err(error) => (ActionOutcome::failed(error), None),
        };

        match &outcome.error {
            Some(err) => tracing::debug!(action = %self, "failed: {err}"),
            None => tracing::debug!(
                action = %self,
                diagnostics = outcome.diagnostics.len(),
                elapsed_ms = outcome.duration.as_millis(),
                "done"
            ),
        }
        self.complete(outcome);
        fatal
    }

    fn prepare(
        &self,
        graph: &ActionGraph,
        ctx: &RunContext<'_>,
    ) -> Result<(HashMap<AnalyzerKey, AnalyzerResult>, FactStore), ActionError> {
        if ctx.cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }

        let pkg = &self.package;
        if pkg.has_list_errors() {
            return Err(ActionError::PackageNotLoaded {
                package: pkg.path.clone(),
                errors: pkg
                    .errors
                    .iter()
                    .filter(|e| e.kind == LoadErrorKind::List)
                    .map(ToString::to_string)
                    .collect(),
            });
        }
        if pkg.ill_typed() && !self.analyzer.run_despite_errors() {
            return Err(ActionError::SkippedDueToErrors);
        }

        let failed: Vec<String> = self
            .deps
            .iter()
            .map(|&id| graph.action(id))
            .filter(|dep| dep.error().is_some())
            .map(ToString::to_string)
            .collect();
        if !failed.is_empty() {
            return Err(ActionError::FailedPrerequisites(failed));
        }

        let mut results = HashMap::new();
        let mut facts = FactStore::new();
        for dep in self.deps.iter().map(|&id| graph.action(id)) {
            let Some(outcome) = dep.outcome() else {
                continue;
            };
            if dep.analyzer.key() == self.analyzer.key() {
                if let Some(bytes) = outcome.facts.as_deref() {
                    facts.merge(FactStore::decode(bytes, self.analyzer.fact_types())?);
                }
            } else if let Some(result) = &outcome.result {
                results.insert(dep.analyzer.key(), Arc::clone(result));
            }
        }
        Ok((results, facts))
    }

    fn run(
        &self,
        results: HashMap<AnalyzerKey, AnalyzerResult>,
        facts: FactStore,
        ctx: &RunContext<'_>,
    ) -> (ActionOutcome, Option<DriverError>) {
        let mut pass = Pass::new(
            &self.analyzer,
            &self.package,
            ctx.type_sizes,
            &results,
            facts,
            ctx.read_allow,
            ctx.flags.get(self.analyzer.name()),
        );

        let started = Instant::now();
        let returned = panic::catch_unwind(AssertUnwindSafe(|| self.analyzer.run(&mut pass)));
        let duration = started.elapsed();
        let output = pass.finish();

        if let Some(fatal) = output.fatal {
            let outcome = ActionOutcome {
                duration,
                ..ActionOutcome::failed(ActionError::Aborted(fatal.to_string()))
            };
            return (outcome, Some(fatal));
        }

        let mut outcome = ActionOutcome {
            diagnostics: output.diagnostics,
            object_facts: output.exported_object_facts,
            package_facts: output.exported_package_facts,
            duration,
            ..ActionOutcome::default()
        };

        match returned {
            Err(payload) => {
                outcome.diagnostics.clear();
                outcome.error = Some(ActionError::Panicked(panic_message(payload.as_ref())));
            }
            Ok(Err(err)) => outcome.error = Some(ActionError::Run(format!("{err:#}"))),
            Ok(Ok(result)) => match self.check_result(result) {
                Ok(result) => outcome.result = result,
                Err(err) => outcome.error = Some(err),
            },
        }

        if outcome.error.is_none() && self.analyzer.uses_facts() {
            match output.facts.encode() {
                Ok(bytes) => outcome.facts = Some(bytes.into()),
                Err(err) => outcome.error = Some(err.into()),
            }
        }
        (outcome, None)
    }

    fn check_result(
        &self,
        result: Option<AnalyzerResult>,
    ) -> Result<Option<AnalyzerResult>, ActionError> {
        let Some(value) = result else {
            return Ok(None);
        };
        match self.analyzer.result_type() {
            Some(expected) if expected.matches(&value) => Ok(Some(value)),
            expected => Err(ActionError::ResultTypeMismatch {
                analyzer: self.analyzer.name().to_string(),
                package: self.package.path.clone(),
                expected: expected.map_or_else(|| "none".to_string(), |t| t.name().to_string()),
                actual: "an undeclared value".to_string(),
            }),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.analyzer.name(), self.package.path)
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("analyzer", &self.analyzer.name())
            .field("package", &self.package.id)
            .field("deps", &self.deps)
            .field("is_root", &self.is_root)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let err = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "boom 1");
        let err = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "static");
    }

    #[test]
    fn errors_render_for_users() {
        let err = ActionError::FailedPrerequisites(vec!["inspect@a".into(), "ctrlflow@a".into()]);
        assert_eq!(err.to_string(), "failed prerequisites: inspect@a, ctrlflow@a");
        let err = ActionError::PackageNotLoaded {
            package: "a".into(),
            errors: vec!["no such package".into()],
        };
        assert_eq!(err.to_string(), "package a could not be loaded: no such package");
    }
}
