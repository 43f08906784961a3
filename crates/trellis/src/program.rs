//! The compiled program: one shared opcode heap, a deduplicated constant pool
//! and layout metadata for every template placed in the heap.
//!
//! Nothing in a [`Program`] refers to memory addresses: handles are heap
//! offsets, jumps are relative, and every other reference is an index into one
//! of the tables below. A program can therefore be dumped with postcard and
//! loaded in another process.

use std::hash::{Hash, Hasher};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::{
    resolver::{HelperHandle, TemplateMeta},
    symbol_table::Symbol,
};

/// Heap offset of a compiled template's first opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u32);

impl Handle {
    #[inline]
    #[must_use]
    pub fn offset(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayoutId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstId(pub u32);

/// A constant pool entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    Str(String),
    Number(f64),
    Bool(bool),
    Null,
    Undefined,
    /// Argument or block names of a call site.
    Names(Vec<String>),
    /// Block locals visible at a `{{debugger}}` statement.
    Locals(Vec<(String, Symbol)>),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            // bitwise so that NaN constants deduplicate
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Null, Self::Null) | (Self::Undefined, Self::Undefined) => true,
            (Self::Names(a), Self::Names(b)) => a == b,
            (Self::Locals(a), Self::Locals(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Str(s) => s.hash(state),
            Self::Number(n) => n.to_bits().hash(state),
            Self::Bool(b) => b.hash(state),
            Self::Null | Self::Undefined => {}
            Self::Names(names) => names.hash(state),
            Self::Locals(locals) => locals.hash(state),
        }
    }
}

/// Deduplicating constant storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantPool(IndexSet<Constant>);

impl ConstantPool {
    /// Returns the id of `constant`, adding it on first use.
    pub fn intern(&mut self, constant: Constant) -> ConstId {
        let (index, _) = self.0.insert_full(constant);
        ConstId(u32::try_from(index).unwrap_or(u32::MAX))
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: ConstId) -> Option<&Constant> {
        self.0.get_index(id.0 as usize)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.0.iter()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

/// What a compile-time resolved name turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolved {
    Helper(HelperHandle),
    Component(LayoutId),
}

/// A free variable of a template and its resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upvar {
    pub name: String,
    pub resolved: Resolved,
}

/// Per-template metadata a runtime needs to invoke the template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub id: Option<String>,
    pub handle: Handle,
    /// Size of the template's root scope (slot 0 included).
    pub symbol_count: u32,
    pub has_eval: bool,
    /// Name of every slot from 1 on.
    pub symbols: Vec<String>,
    /// Set only when `has_eval` is, for name-based lookup at runtime.
    pub eval_symbols: Option<Vec<String>>,
    pub upvars: Vec<Upvar>,
    /// Names read through the open-world root lookup, by lexical index.
    pub lexicals: Vec<String>,
    pub named: IndexMap<String, Symbol>,
    pub blocks: IndexMap<String, Symbol>,
    pub referrer: TemplateMeta,
}

impl LayoutInfo {
    /// Slot of symbol `name` for eval lookups (`@x`, `&block`, or a block local).
    #[must_use]
    pub fn eval_symbol(&self, name: &str) -> Option<Symbol> {
        let symbols = self.eval_symbols.as_ref()?;
        let index = symbols.iter().position(|symbol| symbol == name)?;
        u32::try_from(index + 1).ok().map(Symbol::new)
    }
}

/// An inner block of a template (`let`, `each`, `yield` and component blocks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Heap offset of the block's first opcode.
    pub start: u32,
    /// Slots the block's positional parameters bind to, in declaration order.
    pub params: Vec<Symbol>,
    pub layout: LayoutId,
}

/// Serializable compile output shared by any number of renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub(crate) heap: Vec<u32>,
    pub(crate) constants: ConstantPool,
    pub(crate) layouts: Vec<LayoutInfo>,
    pub(crate) blocks: Vec<BlockInfo>,
}

/// The transportable view of one compiled template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramArtifact<'a> {
    pub symbol_count: u32,
    pub has_eval: bool,
    pub opcode_heap: &'a [u32],
    pub constant_pool: &'a ConstantPool,
    pub referrer: &'a TemplateMeta,
}

impl Program {
    #[must_use]
    pub fn heap(&self) -> &[u32] {
        &self.heap
    }

    #[must_use]
    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    #[must_use]
    pub fn layouts(&self) -> &[LayoutInfo] {
        &self.layouts
    }

    #[must_use]
    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    #[inline]
    #[must_use]
    pub fn layout(&self, id: LayoutId) -> Option<&LayoutInfo> {
        self.layouts.get(id.0 as usize)
    }

    #[inline]
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BlockInfo> {
        self.blocks.get(id.0 as usize)
    }

    /// The layout whose entry point is `handle`.
    #[must_use]
    pub fn layout_for(&self, handle: Handle) -> Option<(LayoutId, &LayoutInfo)> {
        self.layouts
            .iter()
            .enumerate()
            .find(|(_, layout)| layout.handle == handle)
            .map(|(i, layout)| (LayoutId(u32::try_from(i).unwrap_or(u32::MAX)), layout))
    }

    #[must_use]
    pub fn artifact(&self, handle: Handle) -> Option<ProgramArtifact<'_>> {
        let (_, layout) = self.layout_for(handle)?;
        Some(ProgramArtifact {
            symbol_count: layout.symbol_count,
            has_eval: layout.has_eval,
            opcode_heap: &self.heap,
            constant_pool: &self.constants,
            referrer: &layout.referrer,
        })
    }

    /// Serializes the program to postcard bytes.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a program produced by [`Program::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_deduplicates() {
        let mut pool = ConstantPool::default();
        let a = pool.intern(Constant::Str("div".to_owned()));
        let b = pool.intern(Constant::Number(1.0));
        let c = pool.intern(Constant::Str("div".to_owned()));
        let nan = pool.intern(Constant::Number(f64::NAN));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.intern(Constant::Number(f64::NAN)), nan);
        assert_eq!(pool.len(), 3);
    }
}
