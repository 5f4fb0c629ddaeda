//! Dependency graph over snapshot node IDs.
//!
//! Edges point from parent to child: a parent must exist before its child is built.
//! Vertices are string IDs; removal is supported without invalidating other vertices.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
  #[error("unknown vertex {0}")]
  UnknownVertex(String),

  #[error("dependency cycle detected")]
  Cycle,
}

#[derive(Debug, Clone, Default)]
pub struct Dag {
  graph: StableDiGraph<String, ()>,
  index: HashMap<String, NodeIndex>,
}

impl Dag {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a vertex. Returns `false` if it was already present.
  pub fn add_vertex(&mut self, id: &str) -> bool {
    if self.index.contains_key(id) {
      return false;
    }
    let idx = self.graph.add_node(id.to_string());
    self.index.insert(id.to_string(), idx);
    true
  }

  pub fn has_vertex(&self, id: &str) -> bool {
    self.index.contains_key(id)
  }

  pub fn remove_vertex(&mut self, id: &str) -> bool {
    match self.index.remove(id) {
      Some(idx) => self.graph.remove_node(idx).is_some(),
      None => false,
    }
  }

  fn idx(&self, id: &str) -> Result<NodeIndex, DagError> {
    self.index.get(id).copied().ok_or_else(|| DagError::UnknownVertex(id.to_string()))
  }

  /// Add the edge `parent → child`. Connecting twice is a no-op.
  pub fn connect(&mut self, parent: &str, child: &str) -> Result<(), DagError> {
    let from = self.idx(parent)?;
    let to = self.idx(child)?;
    if self.graph.find_edge(from, to).is_none() {
      self.graph.add_edge(from, to, ());
    }
    Ok(())
  }

  pub fn has_edge(&self, parent: &str, child: &str) -> bool {
    match (self.index.get(parent), self.index.get(child)) {
      (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
      _ => false,
    }
  }

  /// Remove `parent → child`. Returns whether the edge existed.
  pub fn remove_edge(&mut self, parent: &str, child: &str) -> bool {
    let (Some(&from), Some(&to)) = (self.index.get(parent), self.index.get(child)) else {
      return false;
    };
    match self.graph.find_edge(from, to) {
      Some(edge) => self.graph.remove_edge(edge).is_some(),
      None => false,
    }
  }

  pub fn vertex_count(&self) -> usize {
    self.graph.node_count()
  }

  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }

  pub fn vertices(&self) -> impl Iterator<Item = &str> {
    self.index.keys().map(String::as_str)
  }

  /// Every edge as `(parent, child)`, sorted.
  pub fn edges(&self) -> Vec<(String, String)> {
    let mut edges: Vec<(String, String)> = self
      .graph
      .edge_indices()
      .filter_map(|e| self.graph.edge_endpoints(e))
      .map(|(from, to)| (self.graph[from].clone(), self.graph[to].clone()))
      .collect();
    edges.sort();
    edges
  }

  fn neighbors(&self, id: &str, direction: Direction) -> Vec<String> {
    let Some(&idx) = self.index.get(id) else {
      return Vec::new();
    };
    let mut ids: Vec<String> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    ids.sort();
    ids.dedup();
    ids
  }

  pub fn parents(&self, id: &str) -> Vec<String> {
    self.neighbors(id, Direction::Incoming)
  }

  pub fn children(&self, id: &str) -> Vec<String> {
    self.neighbors(id, Direction::Outgoing)
  }

  pub fn is_acyclic(&self) -> bool {
    !is_cyclic_directed(&self.graph)
  }

  fn reachable_avoiding(&self, from: NodeIndex, target: NodeIndex, skip_direct: NodeIndex) -> bool {
    let mut stack: Vec<NodeIndex> = self
      .graph
      .neighbors_directed(from, Direction::Outgoing)
      .filter(|&n| n != skip_direct)
      .collect();
    let mut seen: HashSet<NodeIndex> = stack.iter().copied().collect();

    while let Some(node) = stack.pop() {
      if node == target {
        return true;
      }
      for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
        if seen.insert(next) {
          stack.push(next);
        }
      }
    }
    false
  }

  /// Remove every edge `u → v` for which another path from `u` to `v` exists.
  ///
  /// Reachability is unchanged. Assumes the graph is acyclic.
  pub fn transitive_reduction(&mut self) -> usize {
    let mut removed = 0;
    let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
    for u in nodes {
      let children: Vec<NodeIndex> = self.graph.neighbors_directed(u, Direction::Outgoing).collect();
      for v in children {
        if self.reachable_avoiding(u, v, v)
          && let Some(edge) = self.graph.find_edge(u, v)
        {
          self.graph.remove_edge(edge);
          removed += 1;
        }
      }
    }
    removed
  }

  /// Topological order, parents before children.
  ///
  /// Among vertices that are ready at the same time the lexicographically smallest ID
  /// goes first, so the order is the same however the graph was assembled.
  pub fn topological_order(&self) -> Result<Vec<String>, DagError> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();

    let mut ready: BTreeSet<(String, NodeIndex)> = in_degree
      .iter()
      .filter(|&(_, &deg)| deg == 0)
      .map(|(&idx, _)| (self.graph[idx].clone(), idx))
      .collect();

    let mut order = Vec::with_capacity(self.graph.node_count());
    while let Some((id, idx)) = ready.pop_first() {
      order.push(id);
      for child in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        if let Some(deg) = in_degree.get_mut(&child) {
          *deg -= 1;
          if *deg == 0 {
            ready.insert((self.graph[child].clone(), child));
          }
        }
      }
    }

    if order.len() != self.graph.node_count() {
      return Err(DagError::Cycle);
    }
    Ok(order)
  }
}
