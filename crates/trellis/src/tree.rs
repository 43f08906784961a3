//! The output tree contract.
//!
//! The VMs never hold nodes themselves; they create and move nodes through a
//! [`TreeOperations`] implementation and keep only [`NodeId`]s.
//! [`SimpleDocument`](crate::SimpleDocument) is the in-memory implementation.

use crate::bounds::Bounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// An insertion point: new nodes go into `parent` before `next_sibling`,
/// or at the end when it is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub parent: NodeId,
    pub next_sibling: Option<NodeId>,
}

impl Cursor {
    /// Appends to the end of `parent`.
    #[must_use]
    pub fn append_to(parent: NodeId) -> Self {
        Self {
            parent,
            next_sibling: None,
        }
    }

    #[must_use]
    pub fn before(parent: NodeId, next_sibling: NodeId) -> Self {
        Self {
            parent,
            next_sibling: Some(next_sibling),
        }
    }
}

pub trait TreeOperations {
    fn create_text(&mut self, text: &str) -> NodeId;

    fn create_comment(&mut self, text: &str) -> NodeId;

    fn create_element(&mut self, tag: &str) -> NodeId;

    /// Inserts `node` into `parent` before `reference`, or last when it is `None`.
    fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>);

    /// Parses `html` and inserts the resulting nodes at `cursor`, returning
    /// their bounds (empty when `html` produced no nodes).
    fn insert_html(&mut self, cursor: Cursor, html: &str) -> Bounds;

    fn set_attribute(&mut self, element: NodeId, name: &str, value: &str);

    fn remove_attribute(&mut self, element: NodeId, name: &str);

    /// Detaches `node` from its parent.
    fn remove(&mut self, node: NodeId);

    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;
}
