//! Node ranges owned by trackers.
//!
//! A [`Bounds`] is a contiguous run of siblings under one parent, given by its
//! first and last node. Trackers never record the nodes in between: a range
//! is walked through [`TreeOperations::next_sibling`] when it has to be
//! cleared.

use crate::{
    error::RenderError,
    tree::{NodeId, TreeOperations},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    parent: NodeId,
    range: Option<(NodeId, NodeId)>,
}

impl Bounds {
    #[must_use]
    pub fn new(parent: NodeId, first: NodeId, last: NodeId) -> Self {
        Self {
            parent,
            range: Some((first, last)),
        }
    }

    #[must_use]
    pub fn single(parent: NodeId, node: NodeId) -> Self {
        Self::new(parent, node, node)
    }

    #[must_use]
    pub fn empty(parent: NodeId) -> Self {
        Self { parent, range: None }
    }

    #[must_use]
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_none()
    }

    pub fn first(&self) -> Result<NodeId, RenderError> {
        self.range.map(|(first, _)| first).ok_or(RenderError::InvalidBounds)
    }

    pub fn last(&self) -> Result<NodeId, RenderError> {
        self.range.map(|(_, last)| last).ok_or(RenderError::InvalidBounds)
    }

    /// Every node of the range in document order.
    ///
    /// Fails when `last` is not reachable from `first`.
    pub fn nodes(&self, tree: &impl TreeOperations) -> Result<Vec<NodeId>, RenderError> {
        let Some((first, last)) = self.range else {
            return Ok(Vec::new());
        };
        let mut nodes = vec![first];
        let mut current = first;
        while current != last {
            current = tree.next_sibling(current).ok_or(RenderError::InvalidBounds)?;
            nodes.push(current);
        }
        Ok(nodes)
    }

    /// Follows an edge replacement in a child: when the child's old first or
    /// last node was also this range's edge, the child's new edge takes over.
    pub fn replace_edge(&mut self, old: &Self, new: &Self) {
        let (Some((first, last)), Some((old_first, old_last))) = (self.range, old.range) else {
            return;
        };
        let Some((new_first, new_last)) = new.range else {
            return;
        };
        let first = if first == old_first { new_first } else { first };
        let last = if last == old_last { new_last } else { last };
        self.range = Some((first, last));
    }
}

/// Removes every node of `bounds`, returning the sibling after the range.
pub fn clear(tree: &mut impl TreeOperations, bounds: &Bounds) -> Result<Option<NodeId>, RenderError> {
    if bounds.is_empty() {
        return Ok(None);
    }
    let nodes = bounds.nodes(tree)?;
    let next = tree.next_sibling(bounds.last()?);
    for node in nodes {
        tree.remove(node);
    }
    Ok(next)
}

/// Accumulates the top-level nodes a tracker inserts, in order.
#[derive(Debug, Clone, Copy)]
pub struct BoundsBuilder {
    parent: NodeId,
    range: Option<(NodeId, NodeId)>,
}

impl BoundsBuilder {
    #[must_use]
    pub fn new(parent: NodeId) -> Self {
        Self { parent, range: None }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_none()
    }

    pub fn push(&mut self, node: NodeId) {
        self.range = Some(match self.range {
            None => (node, node),
            Some((first, _)) => (first, node),
        });
    }

    /// Appends a finished range that was inserted after everything pushed so far.
    pub fn merge(&mut self, bounds: &Bounds) {
        if let Some((first, last)) = bounds.range {
            self.range = Some(match self.range {
                None => (first, last),
                Some((existing, _)) => (existing, last),
            });
        }
    }

    #[must_use]
    pub fn finish(self) -> Bounds {
        Bounds {
            parent: self.parent,
            range: self.range,
        }
    }
}
