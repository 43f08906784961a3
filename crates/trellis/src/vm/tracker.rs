//! Invalidation trackers and the render result that owns them.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    bounds::Bounds,
    bytecode::TrackerKind,
    program::{Handle, LayoutId},
    reactive::Tag,
    scope::{ScopeId, Scopes},
    tree::NodeId,
    value::{BlockRef, Value},
};

/// What a list tracker needs to reconcile its items.
#[derive(Debug, Clone)]
pub struct ListState {
    pub items: Rc<[Value]>,
    pub body: BlockRef,
    pub inverse: Option<BlockRef>,
    /// Heap offset of the list's `Each` instruction.
    pub each_ip: usize,
}

/// The value and position one list item was rendered with.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub value: Value,
    pub index: usize,
    pub body: BlockRef,
}

/// One recorded region of a render.
///
/// Covers the instructions from its `Enter` to its `Exit` (list items cover a
/// run of the list's body block instead) and the nodes they produced.
/// Trackers opened while this one was open are its children.
#[derive(Debug, Clone)]
pub struct Tracker {
    pub(crate) kind: TrackerKind,
    pub(crate) enter_ip: usize,
    pub(crate) exit_ip: usize,
    pub(crate) scope: ScopeId,
    pub(crate) layout: LayoutId,
    /// The element a dynamic attribute is written to.
    pub(crate) element: Option<NodeId>,
    pub(crate) bounds: Bounds,
    pub(crate) tag: Tag,
    pub(crate) children: Vec<Tracker>,
    /// Scopes created while this tracker was the innermost open one.
    pub(crate) owned_scopes: Vec<ScopeId>,
    pub(crate) list: Option<ListState>,
    pub(crate) item: Option<ItemState>,
}

impl Tracker {
    #[must_use]
    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    #[must_use]
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    #[must_use]
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// Instruction range as `(enter, exit)` heap offsets.
    #[must_use]
    pub fn range(&self) -> (usize, usize) {
        (self.enter_ip, self.exit_ip)
    }

    #[must_use]
    pub fn list_items(&self) -> Option<&[Value]> {
        self.list.as_ref().map(|list| &*list.items)
    }

    /// This tracker and every descendant, depth first.
    #[must_use]
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Self::count).sum::<usize>()
    }

    pub(crate) fn for_each_scope(&self, f: &mut impl FnMut(ScopeId)) {
        for &scope in &self.owned_scopes {
            f(scope);
        }
        for child in &self.children {
            child.for_each_scope(f);
        }
    }
}

/// Output of one top-level render: the root bounds, the trackers recorded in
/// order, and the scopes they run against.
#[derive(Debug)]
pub struct RenderResult {
    pub(crate) handle: Handle,
    pub(crate) layout: LayoutId,
    pub(crate) bounds: Bounds,
    pub(crate) trackers: Vec<Tracker>,
    pub(crate) scopes: Scopes,
    pub(crate) root_scope: ScopeId,
    pub(crate) lexicals: IndexMap<String, Value>,
}

impl RenderResult {
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[must_use]
    pub fn layout(&self) -> LayoutId {
        self.layout
    }

    #[must_use]
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Top-level trackers in recorded order.
    #[must_use]
    pub fn trackers(&self) -> &[Tracker] {
        &self.trackers
    }

    /// Number of trackers at every level.
    #[must_use]
    pub fn tracker_count(&self) -> usize {
        self.trackers.iter().map(Tracker::count).sum()
    }

    /// Scopes still held by the result, the template's root scope included.
    #[must_use]
    pub fn live_scopes(&self) -> usize {
        self.scopes.live_count()
    }

    #[must_use]
    pub fn root_scope(&self) -> ScopeId {
        self.root_scope
    }
}
