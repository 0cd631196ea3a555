//! Dependency graph of the steps in a list step.
//!
//! Edges run from prerequisite to dependent. Cycles are rejected when an
//! edge is added, so a graph is acyclic at all times and can always be cut
//! into execution waves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use super::step::{BuildStep, StepId};

/// Errors raised while declaring step dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepGraphError {
  /// The step was never added to this list.
  #[error("step {0} is not part of this list")]
  UnknownStep(StepId),

  /// The dependency would make a step wait on itself.
  #[error("dependency from {prerequisite} to {dependent} would create a cycle")]
  CycleDetected { prerequisite: StepId, dependent: StepId },
}

/// Steps of a list and the prerequisite edges between them.
#[derive(Default)]
pub struct StepGraph {
  graph: DiGraph<Arc<BuildStep>, ()>,
  nodes: HashMap<StepId, NodeIndex>,
}

impl StepGraph {
  /// Add a step. Adding the same step twice is a no-op.
  pub fn add(&mut self, step: Arc<BuildStep>) {
    let id = step.id();
    if self.nodes.contains_key(&id) {
      return;
    }
    let idx = self.graph.add_node(step);
    self.nodes.insert(id, idx);
  }

  /// Add an edge from `prerequisite` to `dependent`.
  ///
  /// # Errors
  ///
  /// Returns `UnknownStep` if either step is not in the graph, and
  /// `CycleDetected` if `prerequisite` already (transitively) depends on
  /// `dependent`.
  pub fn add_dependency(&mut self, prerequisite: StepId, dependent: StepId) -> Result<(), StepGraphError> {
    let from = self.index(prerequisite)?;
    let to = self.index(dependent)?;

    if from == to || has_path_connecting(&self.graph, to, from, None) {
      return Err(StepGraphError::CycleDetected {
        prerequisite,
        dependent,
      });
    }

    self.graph.update_edge(from, to, ());
    Ok(())
  }

  fn index(&self, id: StepId) -> Result<NodeIndex, StepGraphError> {
    self.nodes.get(&id).copied().ok_or(StepGraphError::UnknownStep(id))
  }

  /// Steps in insertion order.
  pub fn steps(&self) -> Vec<Arc<BuildStep>> {
    self.graph.node_weights().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  /// Direct prerequisites of a step.
  pub fn prerequisites(&self, id: StepId) -> Vec<Arc<BuildStep>> {
    let Some(&idx) = self.nodes.get(&id) else {
      return Vec::new();
    };

    self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep| self.graph[dep].clone())
      .collect()
  }

  /// Direct dependents of a step.
  pub fn dependents(&self, id: StepId) -> Vec<Arc<BuildStep>> {
    let Some(&idx) = self.nodes.get(&id) else {
      return Vec::new();
    };

    self
      .graph
      .neighbors_directed(idx, Direction::Outgoing)
      .map(|dep| self.graph[dep].clone())
      .collect()
  }

  /// Number of direct prerequisites of every step.
  pub fn in_degrees(&self) -> HashMap<StepId, usize> {
    self
      .graph
      .node_indices()
      .map(|idx| {
        let degree = self.graph.neighbors_directed(idx, Direction::Incoming).count();
        (self.graph[idx].id(), degree)
      })
      .collect()
  }

  /// Steps grouped into waves.
  ///
  /// Every prerequisite of a step sits in an earlier wave than the step, so
  /// each wave can run in parallel once the previous one is done. Within a
  /// wave, steps keep insertion order.
  pub fn waves(&self) -> Vec<Vec<Arc<BuildStep>>> {
    // Kahn's algorithm, one level at a time
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let mut ready: Vec<NodeIndex> = remaining.iter().filter(|idx| in_degree[*idx] == 0).copied().collect();

      // Unreachable while add_dependency rejects cycles.
      if ready.is_empty() {
        break;
      }
      ready.sort();

      for &idx in &ready {
        remaining.remove(&idx);
        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      waves.push(ready.into_iter().map(|idx| self.graph[idx].clone()).collect());
    }

    waves
  }
}
