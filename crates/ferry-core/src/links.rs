//! [`LinkGraph`]: transitive grouping of explicitly linked source records.
//!
//! Groups live in an arena; every member maps directly to its group slot.
//! Merging two groups moves the smaller member list into the larger one and
//! re-points each moved member, so membership lookups never chase parents.

use std::collections::HashMap;

use crate::record::{LinkEdge, RecordId};

#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
  groups:     Vec<Vec<RecordId>>,
  membership: HashMap<RecordId, usize>,
}

impl LinkGraph {
  pub fn new() -> Self { Self::default() }

  /// Build a graph from a sequence of edges.
  pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a LinkEdge>) -> Self {
    let mut graph = Self::new();
    for edge in edges {
      graph.add_link(&edge.left, &edge.right);
    }
    graph
  }

  /// Declare `a` and `b` to be the same identity.
  pub fn add_link(&mut self, a: &str, b: &str) {
    match (self.membership.get(a).copied(), self.membership.get(b).copied()) {
      (None, None) => {
        let slot = self.groups.len();
        let mut members = vec![a.to_owned()];
        if a != b {
          members.push(b.to_owned());
        }
        for id in &members {
          self.membership.insert(id.clone(), slot);
        }
        self.groups.push(members);
      }
      (Some(slot), None) => self.join(slot, b),
      (None, Some(slot)) => self.join(slot, a),
      (Some(left), Some(right)) if left != right => {
        let (into, from) = if self.groups[left].len() >= self.groups[right].len() {
          (left, right)
        } else {
          (right, left)
        };
        let moved = std::mem::take(&mut self.groups[from]);
        for id in &moved {
          self.membership.insert(id.clone(), into);
        }
        self.groups[into].extend(moved);
      }
      // Already in the same group.
      (Some(_), Some(_)) => {}
    }
  }

  fn join(&mut self, slot: usize, id: &str) {
    self.membership.insert(id.to_owned(), slot);
    self.groups[slot].push(id.to_owned());
  }

  /// All members of the group containing `id`, including `id` itself.
  /// Empty if `id` was never linked.
  pub fn group(&self, id: &str) -> &[RecordId] {
    self
      .membership
      .get(id)
      .map(|&slot| self.groups[slot].as_slice())
      .unwrap_or(&[])
  }

  pub fn are_linked(&self, a: &str, b: &str) -> bool {
    match (self.membership.get(a), self.membership.get(b)) {
      (Some(x), Some(y)) => x == y,
      _ => false,
    }
  }

  /// Number of non-empty groups.
  pub fn group_count(&self) -> usize {
    self.groups.iter().filter(|g| !g.is_empty()).count()
  }
}
