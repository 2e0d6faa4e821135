//! Planning: turns analyzers and packages into a sparse DAG of actions.
//!
//! Predecessors of `(a, p)` are `(r, p)` for each `r` that `a` requires,
//! plus `(a, q)` for each direct import `q` of `p` when `a` uses facts.
//! Roots are every requested analyzer on every initial package; everything
//! else exists only because a root needs it.

use crate::action::Action;
use crate::analyzer::{Analyzer, AnalyzerKey, PlanError};
use crate::package::Package;
use petgraph::algo::{astar, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Index of an action in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub(crate) usize);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arena of actions. Every action appears after all of its predecessors.
#[derive(Debug, Default)]
pub struct ActionGraph {
    actions: Vec<Action>,
    roots: Vec<ActionId>,
}

impl ActionGraph {
    /// Plans the actions needed to run `analyzers` on `packages`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ImportCycle`] if a fact-using analyzer meets a
    /// cycle in the import graph.
    pub fn plan(
        analyzers: &[Arc<Analyzer>],
        packages: &[Arc<Package>],
    ) -> Result<Self, PlanError> {
        let mut planner = Planner::default();
        let mut roots = Vec::new();
        for pkg in packages {
            for analyzer in analyzers {
                let node = planner.node_for(analyzer, pkg);
                if !roots.contains(&node) {
                    roots.push(node);
                }
            }
        }
        let graph = planner.finish(&roots)?;

        tracing::info!(
            actions = graph.actions.len(),
            roots = graph.roots.len(),
            "planned action graph"
        );
        Ok(graph)
    }

    /// Returns the action with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    #[must_use]
    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id.0]
    }

    /// All actions, predecessors first.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Ids of all actions, predecessors first.
    pub fn ids(&self) -> impl Iterator<Item = ActionId> {
        (0..self.actions.len()).map(ActionId)
    }

    /// Requested actions, in request order (package-major).
    pub fn roots(&self) -> impl Iterator<Item = &Action> {
        self.roots.iter().map(|id| &self.actions[id.0])
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if nothing was planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Discovers the `(analyzer, package)` pairs a set of roots needs. Edges
/// point from predecessor to dependent.
#[derive(Default)]
struct Planner {
    graph: DiGraph<(Arc<Analyzer>, Arc<Package>), ()>,
    nodes: HashMap<(AnalyzerKey, String), NodeIndex>,
}

impl Planner {
    fn node_for(&mut self, analyzer: &Arc<Analyzer>, pkg: &Arc<Package>) -> NodeIndex {
        let key = (analyzer.key(), pkg.id.clone());
        if let Some(&node) = self.nodes.get(&key) {
            return node;
        }
        let node = self.graph.add_node((Arc::clone(analyzer), Arc::clone(pkg)));
        self.nodes.insert(key, node);

        for req in analyzer.requires() {
            let dep = self.node_for(req, pkg);
            self.graph.update_edge(dep, node, ());
        }
        if analyzer.uses_facts() {
            for import in pkg.imports.values() {
                let dep = self.node_for(analyzer, import);
                self.graph.update_edge(dep, node, ());
            }
        }
        node
    }

    /// Lays the discovered actions out in topological order.
    fn finish(self, roots: &[NodeIndex]) -> Result<ActionGraph, PlanError> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            PlanError::ImportCycle(self.graph[cycle.node_id()].1.path.clone())
        })?;

        let mut slots = vec![ActionId(0); self.graph.node_count()];
        for (i, node) in order.iter().enumerate() {
            slots[node.index()] = ActionId(i);
        }
        let ids = |node: NodeIndex, dir: Direction| -> Vec<ActionId> {
            let mut ids: Vec<ActionId> = self
                .graph
                .neighbors_directed(node, dir)
                .map(|n| slots[n.index()])
                .collect();
            ids.sort_unstable();
            ids
        };

        let mut actions: Vec<Action> = order
            .iter()
            .map(|&node| {
                let (analyzer, pkg) = &self.graph[node];
                let mut action = Action::new(
                    Arc::clone(analyzer),
                    Arc::clone(pkg),
                    ids(node, Direction::Incoming),
                );
                action.dependents = ids(node, Direction::Outgoing);
                action
            })
            .collect();
        let roots: Vec<ActionId> = roots.iter().map(|r| slots[r.index()]).collect();
        for id in &roots {
            actions[id.0].is_root = true;
        }
        Ok(ActionGraph { actions, roots })
    }
}

/// Returns a closed path `[n, .., n]` along the edges of `graph` through
/// `node`, rotated to start at its lowest index. `node` must lie on a
/// cycle, as reported by [`toposort`].
pub(crate) fn cycle_through<N, E>(graph: &DiGraph<N, E>, node: NodeIndex) -> Vec<NodeIndex> {
    let mut path = graph
        .neighbors(node)
        .filter_map(|next| astar(graph, next, |n| n == node, |_| 1, |_| 0))
        .min_by_key(|(cost, _)| *cost)
        .map_or_else(Vec::new, |(_, path)| path);
    path.pop();
    path.insert(0, node);
    if let Some(start) = path.iter().enumerate().min_by_key(|(_, n)| **n).map(|(i, _)| i) {
        path.rotate_left(start);
    }
    path.push(path[0]);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{Fact, FactType};
    use crate::package::TypesInfo;
    use crate::source::FileSet;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Serialize, Deserialize)]
    struct Seen;

    impl Fact for Seen {
        const KIND: &'static str = "seen";
    }

    fn pkg(path: &str, imports: &[&Arc<Package>]) -> Arc<Package> {
        Arc::new(Package {
            id: path.into(),
            name: path.into(),
            path: path.into(),
            fset: Arc::new(FileSet::new()),
            files: Vec::new(),
            other_files: Vec::new(),
            ignored_files: Vec::new(),
            types: TypesInfo::new(),
            imports: imports
                .iter()
                .map(|p| (p.path.clone(), Arc::clone(p)))
                .collect::<BTreeMap<_, _>>(),
            module: None,
            errors: Vec::new(),
        })
    }

    fn analyzer(name: &str, facts: bool, requires: &[&Arc<Analyzer>]) -> Arc<Analyzer> {
        let mut b = Analyzer::builder(name).doc("test").run(|_| Ok(None));
        if facts {
            b = b.fact_type(FactType::of::<Seen>());
        }
        for r in requires {
            b = b.requires(r);
        }
        b.build().unwrap()
    }

    fn names(graph: &ActionGraph) -> Vec<String> {
        graph.actions().map(ToString::to_string).collect()
    }

    fn id_of(graph: &ActionGraph, name: &str) -> ActionId {
        graph
            .ids()
            .find(|&id| graph.action(id).to_string() == name)
            .unwrap()
    }

    fn assert_predecessors_first(graph: &ActionGraph) {
        for id in graph.ids() {
            let action = graph.action(id);
            assert!(action.deps.iter().all(|&dep| dep < id), "{action}");
            for &next in &action.dependents {
                assert!(graph.action(next).deps.contains(&id));
            }
        }
    }

    #[test]
    fn factless_analyzers_stay_on_initial_packages() {
        let c = pkg("c", &[]);
        let b = pkg("b", &[&c]);
        let a = pkg("a", &[&b]);
        let inspect = analyzer("inspect", false, &[]);
        let lint = analyzer("lint", false, &[&inspect]);

        let graph = ActionGraph::plan(&[lint], &[a]).unwrap();
        assert_eq!(names(&graph), ["inspect@a", "lint@a"]);
        assert_eq!(graph.roots().count(), 1);
    }

    #[test]
    fn fact_analyzers_follow_imports() {
        let c = pkg("c", &[]);
        let b = pkg("b", &[&c]);
        let a = pkg("a", &[&b, &c]);
        let purity = analyzer("purity", true, &[]);

        let graph = ActionGraph::plan(&[purity], &[Arc::clone(&a)]).unwrap();
        assert_eq!(names(&graph), ["purity@c", "purity@b", "purity@a"]);
        assert_predecessors_first(&graph);

        // One action per package of the import closure.
        let mut planned: Vec<&str> = graph.actions().map(|a| a.package().path.as_str()).collect();
        let imports = a.transitive_imports();
        let mut closure: Vec<&str> = imports.iter().map(|p| p.path.as_str()).collect();
        closure.push(&a.path);
        planned.sort();
        closure.sort();
        assert_eq!(planned, closure);

        let root = graph.roots().next().unwrap();
        assert!(root.is_root());
        assert_eq!(root.deps.len(), 2);
        // c is shared by a and b but planned once.
        let c_id = id_of(&graph, "purity@c");
        assert_eq!(graph.action(c_id).dependents.len(), 2);
    }

    #[test]
    fn requirements_run_on_dependencies_of_fact_analyzers() {
        let b = pkg("b", &[]);
        let a = pkg("a", &[&b]);
        let inspect = analyzer("inspect", false, &[]);
        let facts = analyzer("facts", true, &[&inspect]);

        let graph = ActionGraph::plan(&[facts, inspect], &[a]).unwrap();
        let mut planned = names(&graph);
        planned.sort();
        assert_eq!(planned, ["facts@a", "facts@b", "inspect@a", "inspect@b"]);
        assert_predecessors_first(&graph);
        let mut deps = vec![id_of(&graph, "inspect@a"), id_of(&graph, "facts@b")];
        deps.sort_unstable();
        assert_eq!(graph.action(id_of(&graph, "facts@a")).deps, deps);
        let roots: Vec<String> = graph.roots().map(ToString::to_string).collect();
        assert_eq!(roots, ["facts@a", "inspect@a"]);
    }

    #[test]
    fn import_cycles_are_rejected() {
        // Actions are keyed by package id, so an import sharing the
        // importer's id closes a cycle.
        let leaf = pkg("a", &[]);
        let a = pkg("a", &[&leaf]);
        let purity = analyzer("purity", true, &[]);
        let err = ActionGraph::plan(&[purity], &[a]).unwrap_err();
        assert!(matches!(err, PlanError::ImportCycle(p) if p == "a"));
    }

    #[test]
    fn cycle_path_starts_at_the_lowest_node() {
        let mut graph = DiGraph::<&str, ()>::new();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        let c = graph.add_node("c");
        let d = graph.add_node("d");
        graph.extend_with_edges([(a, b), (b, c), (c, a), (c, d)]);

        let cycle = toposort(&graph, None).unwrap_err();
        let path: Vec<&str> = cycle_through(&graph, cycle.node_id())
            .into_iter()
            .map(|n| graph[n])
            .collect();
        assert_eq!(path, ["a", "b", "c", "a"]);

        graph.add_edge(d, d, ());
        assert_eq!(cycle_through(&graph, d), [d, d]);
    }
}
