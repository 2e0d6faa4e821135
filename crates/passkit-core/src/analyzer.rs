//! Analyzer descriptors and analyzer-set validation.

use crate::fact::FactType;
use crate::graph::cycle_through;
use crate::pass::Pass;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Value returned by an analyzer's run, consumed by dependent analyzers on
/// the same package.
pub type AnalyzerResult = Arc<dyn Any + Send + Sync>;

/// Outcome of an analyzer's run.
pub type RunResult = anyhow::Result<Option<AnalyzerResult>>;

/// The analyzer's behavior.
pub type RunFn = dyn Fn(&mut Pass<'_>) -> RunResult + Send + Sync;

/// Errors in the analyzer set or the package graph that prevent planning.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The analyzer name is not a valid identifier.
    #[error("invalid analyzer name {0:?}")]
    InvalidName(String),

    /// The analyzer has no documentation.
    #[error("analyzer {0:?} is undocumented")]
    Undocumented(String),

    /// Two distinct analyzers share a name.
    #[error("duplicate analyzer name {0:?}")]
    DuplicateName(String),

    /// The `requires` relation has a cycle.
    #[error("cycle detected involving the following analyzers: {}", .0.join(" -> "))]
    RequiresCycle(Vec<String>),

    /// A fact type is declared by more than one analyzer.
    #[error("fact type {kind} registered by two analyzers: {first}, {second}")]
    SharedFactType {
        /// Fact tag.
        kind: &'static str,
        /// First declaring analyzer.
        first: String,
        /// Second declaring analyzer.
        second: String,
    },

    /// An analyzer was built without a run function.
    #[error("analyzer {0:?} has no run function")]
    MissingRun(String),

    /// The package import graph has a cycle.
    #[error("import cycle through package {0}")]
    ImportCycle(String),
}

/// Declared shape of an analyzer result.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ResultType {
    name: &'static str,
    id: TypeId,
}

impl ResultType {
    /// Returns the descriptor of `T`.
    #[must_use]
    pub fn of<T: Any + Send + Sync>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    /// The Rust type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if `result` holds a value of this type.
    #[must_use]
    pub fn matches(&self, result: &AnalyzerResult) -> bool {
        let value: &dyn Any = result.as_ref();
        value.type_id() == self.id
    }
}

impl fmt::Debug for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A command-line flag declared by an analyzer.
///
/// Registered by the CLI as `--<analyzer>.<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSpec {
    /// Flag name, without the analyzer prefix.
    pub name: String,
    /// Help text.
    pub usage: String,
    /// Default value.
    pub default: String,
    /// Whether the flag is boolean.
    pub is_bool: bool,
}

impl FlagSpec {
    /// A boolean flag.
    #[must_use]
    pub fn bool(name: impl Into<String>, default: bool, usage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usage: usage.into(),
            default: default.to_string(),
            is_bool: true,
        }
    }

    /// A string flag.
    #[must_use]
    pub fn string(
        name: impl Into<String>,
        default: impl Into<String>,
        usage: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            usage: usage.into(),
            default: default.into(),
            is_bool: false,
        }
    }
}

/// Identity of an analyzer descriptor within one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct AnalyzerKey(usize);

impl AnalyzerKey {
    pub(crate) fn of(analyzer: &Analyzer) -> Self {
        Self(std::ptr::from_ref(analyzer) as usize)
    }
}

/// Static description of an analysis plus its run function.
///
/// Analyzers refer to their prerequisites by identity (`Arc`), never by
/// name; two descriptors are the same analyzer only if they are the same
/// allocation.
pub struct Analyzer {
    name: String,
    doc: String,
    url: Option<String>,
    requires: Vec<Arc<Analyzer>>,
    fact_types: Vec<FactType>,
    result_type: Option<ResultType>,
    run_despite_errors: bool,
    flags: Vec<FlagSpec>,
    run: Box<RunFn>,
}

impl Analyzer {
    /// Creates a builder for an analyzer called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> AnalyzerBuilder {
        AnalyzerBuilder::new(name)
    }

    /// The analyzer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full documentation.
    #[must_use]
    pub fn doc(&self) -> &str {
        &self.doc
    }

    /// First paragraph of the documentation.
    #[must_use]
    pub fn summary(&self) -> &str {
        let doc = self.doc.trim();
        doc.split("\n\n").next().unwrap_or(doc).trim()
    }

    /// Documentation link.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Analyzers that must run on the same package first.
    #[must_use]
    pub fn requires(&self) -> &[Arc<Analyzer>] {
        &self.requires
    }

    /// Declared fact types.
    #[must_use]
    pub fn fact_types(&self) -> &[FactType] {
        &self.fact_types
    }

    /// Returns true if the analyzer produces or consumes facts.
    #[must_use]
    pub fn uses_facts(&self) -> bool {
        !self.fact_types.is_empty()
    }

    /// Declared result type.
    #[must_use]
    pub fn result_type(&self) -> Option<ResultType> {
        self.result_type
    }

    /// Whether the analyzer runs on packages with parse or type errors.
    #[must_use]
    pub fn run_despite_errors(&self) -> bool {
        self.run_despite_errors
    }

    /// Declared flags.
    #[must_use]
    pub fn flags(&self) -> &[FlagSpec] {
        &self.flags
    }

    /// Invokes the run function.
    ///
    /// # Errors
    ///
    /// Propagates whatever the run function returns.
    pub fn run(&self, pass: &mut Pass<'_>) -> RunResult {
        (self.run)(pass)
    }

    pub(crate) fn key(&self) -> AnalyzerKey {
        AnalyzerKey::of(self)
    }
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("name", &self.name)
            .field(
                "requires",
                &self.requires.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .field("fact_types", &self.fact_types)
            .field("result_type", &self.result_type)
            .field("run_despite_errors", &self.run_despite_errors)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builder for an [`Analyzer`].
pub struct AnalyzerBuilder {
    name: String,
    doc: String,
    url: Option<String>,
    requires: Vec<Arc<Analyzer>>,
    fact_types: Vec<FactType>,
    result_type: Option<ResultType>,
    run_despite_errors: bool,
    flags: Vec<FlagSpec>,
    run: Option<Box<RunFn>>,
}

impl AnalyzerBuilder {
    /// Creates a builder for an analyzer called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            url: None,
            requires: Vec::new(),
            fact_types: Vec::new(),
            result_type: None,
            run_despite_errors: false,
            flags: Vec::new(),
            run: None,
        }
    }

    /// Sets the documentation.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// Sets the documentation link.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Adds a prerequisite analyzer.
    #[must_use]
    pub fn requires(mut self, analyzer: &Arc<Analyzer>) -> Self {
        self.requires.push(Arc::clone(analyzer));
        self
    }

    /// Declares a fact type.
    #[must_use]
    pub fn fact_type(mut self, fact_type: FactType) -> Self {
        if !self.fact_types.contains(&fact_type) {
            self.fact_types.push(fact_type);
        }
        self
    }

    /// Declares the result type `T`.
    #[must_use]
    pub fn result_type<T: Any + Send + Sync>(mut self) -> Self {
        self.result_type = Some(ResultType::of::<T>());
        self
    }

    /// Lets the analyzer run on packages with parse or type errors.
    #[must_use]
    pub fn run_despite_errors(mut self, yes: bool) -> Self {
        self.run_despite_errors = yes;
        self
    }

    /// Declares a flag.
    #[must_use]
    pub fn flag(mut self, flag: FlagSpec) -> Self {
        self.flags.push(flag);
        self
    }

    /// Sets the run function.
    #[must_use]
    pub fn run<F>(mut self, run: F) -> Self
    where
        F: Fn(&mut Pass<'_>) -> RunResult + Send + Sync + 'static,
    {
        self.run = Some(Box::new(run));
        self
    }

    /// Builds the analyzer.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::MissingRun`] if no run function was set.
    pub fn build(self) -> Result<Arc<Analyzer>, PlanError> {
        let run = self.run.ok_or_else(|| PlanError::MissingRun(self.name.clone()))?;
        Ok(Arc::new(Analyzer {
            name: self.name,
            doc: self.doc,
            url: self.url,
            requires: self.requires,
            fact_types: self.fact_types,
            result_type: self.result_type,
            run_despite_errors: self.run_despite_errors,
            flags: self.flags,
            run,
        }))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Validates an analyzer set and returns its transitive `requires` closure,
/// prerequisites before dependents.
///
/// # Errors
///
/// Returns the first problem found: an invalid or duplicate name, missing
/// documentation, a `requires` cycle, or a fact type declared by two
/// analyzers.
pub fn validate(analyzers: &[Arc<Analyzer>]) -> Result<Vec<Arc<Analyzer>>, PlanError> {
    // Edges point from a prerequisite to the analyzer requiring it.
    fn add(
        analyzer: &Arc<Analyzer>,
        graph: &mut DiGraph<Arc<Analyzer>, ()>,
        nodes: &mut HashMap<AnalyzerKey, NodeIndex>,
    ) -> Result<NodeIndex, PlanError> {
        if let Some(&node) = nodes.get(&analyzer.key()) {
            return Ok(node);
        }
        if !is_identifier(analyzer.name()) {
            return Err(PlanError::InvalidName(analyzer.name().to_string()));
        }
        if analyzer.doc().trim().is_empty() {
            return Err(PlanError::Undocumented(analyzer.name().to_string()));
        }

        let node = graph.add_node(Arc::clone(analyzer));
        nodes.insert(analyzer.key(), node);
        for req in analyzer.requires() {
            let dep = add(req, graph, nodes)?;
            graph.update_edge(dep, node, ());
        }
        Ok(node)
    }

    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    for analyzer in analyzers {
        add(analyzer, &mut graph, &mut nodes)?;
    }
    let order = toposort(&graph, None).map_err(|cycle| {
        let path = cycle_through(&graph, cycle.node_id());
        PlanError::RequiresCycle(
            path.into_iter()
                .rev()
                .map(|n| graph[n].name().to_string())
                .collect(),
        )
    })?;

    let mut names = HashSet::new();
    let mut fact_owners: HashMap<TypeId, &Analyzer> = HashMap::new();
    let mut kind_owners: HashMap<&'static str, &Analyzer> = HashMap::new();
    for analyzer in graph.node_weights() {
        if !names.insert(analyzer.name()) {
            return Err(PlanError::DuplicateName(analyzer.name().to_string()));
        }
        for ft in analyzer.fact_types() {
            let by_type = fact_owners.insert(ft.type_id(), analyzer);
            let by_kind = kind_owners.insert(ft.kind(), analyzer);
            if let Some(first) = by_type.or(by_kind) {
                return Err(PlanError::SharedFactType {
                    kind: ft.kind(),
                    first: first.name().to_string(),
                    second: analyzer.name().to_string(),
                });
            }
        }
    }

    Ok(order.into_iter().map(|n| Arc::clone(&graph[n])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Fact;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Marker;

    impl Fact for Marker {
        const KIND: &'static str = "marker";
    }

    fn noop(name: &str) -> AnalyzerBuilder {
        Analyzer::builder(name)
            .doc("does nothing\n\nLonger text.")
            .run(|_| Ok(None))
    }

    #[test]
    fn summary_is_first_paragraph() {
        let a = noop("a").build().unwrap();
        assert_eq!(a.summary(), "does nothing");
    }

    #[test]
    fn closure_lists_prerequisites_first() {
        let inspect = noop("inspect").build().unwrap();
        let ctrlflow = noop("ctrlflow").requires(&inspect).build().unwrap();
        let lostcancel = noop("lostcancel")
            .requires(&ctrlflow)
            .requires(&inspect)
            .build()
            .unwrap();

        let order = validate(&[lostcancel]).unwrap();
        let names: Vec<&str> = order.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["inspect", "ctrlflow", "lostcancel"]);
    }

    #[test]
    fn rejects_invalid_names() {
        let bad = noop("has space").build().unwrap();
        assert!(matches!(validate(&[bad]), Err(PlanError::InvalidName(_))));
        let empty = noop("").build().unwrap();
        assert!(matches!(validate(&[empty]), Err(PlanError::InvalidName(_))));
    }

    #[test]
    fn rejects_undocumented() {
        let a = Analyzer::builder("a").run(|_| Ok(None)).build().unwrap();
        assert!(matches!(validate(&[a]), Err(PlanError::Undocumented(_))));
    }

    #[test]
    fn rejects_duplicate_names_of_distinct_analyzers() {
        let a1 = noop("same").build().unwrap();
        let a2 = noop("same").build().unwrap();
        assert!(matches!(
            validate(&[a1.clone(), a2]),
            Err(PlanError::DuplicateName(n)) if n == "same"
        ));
        // The same descriptor listed twice is fine.
        assert_eq!(validate(&[a1.clone(), a1]).unwrap().len(), 1);
    }

    #[test]
    fn rejects_shared_fact_types() {
        let a = noop("a").fact_type(FactType::of::<Marker>()).build().unwrap();
        let b = noop("b").fact_type(FactType::of::<Marker>()).build().unwrap();
        let err = validate(&[a, b]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "fact type marker registered by two analyzers: a, b"
        );
    }

    #[test]
    fn build_requires_run() {
        let err = Analyzer::builder("x").doc("d").build().unwrap_err();
        assert!(matches!(err, PlanError::MissingRun(_)));
    }

    #[test]
    fn result_type_matches_values() {
        let rt = ResultType::of::<Vec<String>>();
        let ok: AnalyzerResult = Arc::new(vec!["x".to_string()]);
        let bad: AnalyzerResult = Arc::new(3_u32);
        assert!(rt.matches(&ok));
        assert!(!rt.matches(&bad));
    }
}
