// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#[cfg(test)]
mod tests;

use std::fmt;

use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use log::debug;
use parking_lot::Mutex;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// Identifies a package's node for as long as its entry is in the graph.
type PackageId = NodeIndex<u32>;

/// An edge `src -> dst` records that `src` depends on `dst`; the incoming edges of a
/// node are therefore its dependees. Keeping both directions in one edge set makes
/// forward/backward consistency structural rather than maintained.
type PGraph = StableDiGraph<String, (), u32>;

///
/// Why a mutation was refused. The wire protocol collapses every variant to `FAIL`;
/// the reason is only ever surfaced in debug logging.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Rejection {
    /// INDEX named a dependency that is not itself indexed.
    MissingDependency(String),
    /// INDEX listed the package as its own dependency.
    SelfDependency,
    /// INDEX would have made the dependency graph cyclic.
    WouldCreateCycle,
    /// REMOVE targeted a package that other packages still depend on.
    HasDependees(usize),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejection::MissingDependency(dep) => write!(f, "dependency {dep:?} is not indexed"),
            Rejection::SelfDependency => write!(f, "a package cannot depend on itself"),
            Rejection::WouldCreateCycle => write!(f, "would create a dependency cycle"),
            Rejection::HasDependees(count) => {
                write!(f, "{count} package(s) still depend on it")
            }
        }
    }
}

struct InnerGraph {
    nodes: HashMap<String, PackageId>,
    pg: PGraph,
}

impl InnerGraph {
    fn index(&mut self, package: &str, dependencies: &[String]) -> Result<(), Rejection> {
        // Resolve every named dependency before touching anything.
        let mut dep_ids = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            match self.nodes.get(dep) {
                Some(&id) => dep_ids.push(id),
                None => return Err(Rejection::MissingDependency(dep.clone())),
            }
        }

        if let Some(&existing) = self.nodes.get(package) {
            self.replace_dependencies(package, existing, &dep_ids)
        } else {
            let id = self.pg.add_node(package.to_owned());
            self.nodes.insert(package.to_owned(), id);
            for &dep_id in &dep_ids {
                // update_edge rather than add_edge: repeated names in one request
                // collapse to a single edge.
                self.pg.update_edge(id, dep_id, ());
            }
            debug!("indexed {package} with {} dependencies", dep_ids.len());
            Ok(())
        }
    }

    ///
    /// Replace the dependency set of an already-indexed package.
    ///
    /// Every existing edge was accepted in the past, so a new cycle can only run through
    /// an edge in `new = deps \ old`: the reachability walk starts from the new
    /// dependencies only. The walk happens before any mutation, which makes a refusal
    /// rollback-free.
    ///
    fn replace_dependencies(
        &mut self,
        package: &str,
        id: PackageId,
        dep_ids: &[PackageId],
    ) -> Result<(), Rejection> {
        if dep_ids.contains(&id) {
            return Err(Rejection::SelfDependency);
        }

        let old: HashSet<PackageId> = self
            .pg
            .neighbors_directed(id, Direction::Outgoing)
            .collect();
        let new: Vec<PackageId> = dep_ids
            .iter()
            .copied()
            .filter(|dep_id| !old.contains(dep_id))
            .collect();
        if self.reaches(&new, id) {
            return Err(Rejection::WouldCreateCycle);
        }

        let keep: HashSet<PackageId> = dep_ids.iter().copied().collect();
        let stale: Vec<_> = self
            .pg
            .edges_directed(id, Direction::Outgoing)
            .filter(|edge| !keep.contains(&edge.target()))
            .map(|edge| edge.id())
            .collect();
        for edge in stale {
            self.pg.remove_edge(edge);
        }
        for dep_id in new {
            self.pg.add_edge(id, dep_id, ());
        }
        debug!("re-indexed {package} with {} dependencies", keep.len());
        Ok(())
    }

    /// Depth-first reachability along dependency edges from the given roots. A fresh
    /// visited set per call: no memo survives across mutations to go stale.
    fn reaches(&self, roots: &[PackageId], target: PackageId) -> bool {
        let mut stack: Vec<PackageId> = roots.to_vec();
        let mut visited: HashSet<PackageId> = HashSet::default();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.extend(self.pg.neighbors_directed(id, Direction::Outgoing));
        }
        false
    }

    fn remove(&mut self, package: &str) -> Result<(), Rejection> {
        let Some(&id) = self.nodes.get(package) else {
            debug!("remove of unindexed {package} is a noop");
            return Ok(());
        };

        let dependees = self.pg.neighbors_directed(id, Direction::Incoming).count();
        if dependees > 0 {
            return Err(Rejection::HasDependees(dependees));
        }

        // Removing the node drops its (outgoing) edges, unlinking it from its
        // dependencies' dependee sets in the same step.
        self.pg.remove_node(id);
        self.nodes.remove(package);
        debug!("removed {package}");
        Ok(())
    }

    fn neighbor_names(&self, id: PackageId, direction: Direction) -> Vec<String> {
        self.pg
            .neighbors_directed(id, direction)
            .map(|neighbor| self.pg[neighbor].clone())
            .collect()
    }
}

///
/// A DAG of packages and their dependencies (acyclicity enforced on mutation), shared
/// by every client session.
///
/// All operations serialise on one coarse mutex and never suspend or perform I/O while
/// holding it: each takes the lock, reads or mutates, and returns before any reply is
/// written. A refused mutation leaves the graph exactly as it was.
///
pub struct PackageGraph {
    inner: Mutex<InnerGraph>,
}

impl PackageGraph {
    pub fn new() -> PackageGraph {
        PackageGraph {
            inner: Mutex::new(InnerGraph {
                nodes: HashMap::default(),
                pg: PGraph::default(),
            }),
        }
    }

    ///
    /// INDEX: make `package` depend on exactly `dependencies`, creating its entry if it
    /// is not yet indexed. Refused if any dependency is unindexed, or if the new
    /// dependency set would make the graph cyclic.
    ///
    pub fn index(&self, package: &str, dependencies: &[String]) -> Result<(), Rejection> {
        self.inner.lock().index(package, dependencies)
    }

    ///
    /// REMOVE: delete `package` from the index. Refused while other packages depend on
    /// it; removing a package that is not indexed is a noop.
    ///
    pub fn remove(&self, package: &str) -> Result<(), Rejection> {
        self.inner.lock().remove(package)
    }

    /// QUERY: read-only presence check.
    pub fn query(&self, package: &str) -> bool {
        self.inner.lock().nodes.contains_key(package)
    }

    /// The number of packages currently indexed.
    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// The names `package` depends on, if it is indexed. Inspection only: the wire
    /// protocol never exposes adjacency, and no ordering is implied.
    pub fn dependencies_of(&self, package: &str) -> Option<Vec<String>> {
        let inner = self.inner.lock();
        let &id = inner.nodes.get(package)?;
        Some(inner.neighbor_names(id, Direction::Outgoing))
    }

    /// The names of packages that depend on `package`, if it is indexed.
    pub fn dependees_of(&self, package: &str) -> Option<Vec<String>> {
        let inner = self.inner.lock();
        let &id = inner.nodes.get(package)?;
        Some(inner.neighbor_names(id, Direction::Incoming))
    }
}
