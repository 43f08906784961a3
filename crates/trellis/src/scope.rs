//! Runtime scopes.
//!
//! A component invocation gets a root scope with one slot per symbol of its
//! layout. A block invocation gets a block scope that binds the block's
//! parameter slots and defers every other slot to the scope it closed over.
//! All scopes live in one arena addressed by [`ScopeId`], so block values and
//! trackers can refer to them without borrowing.

use crate::{error::RenderError, program::LayoutId, symbol_table::Symbol, value::Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

impl ScopeId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
enum Scope {
    /// Released; the id is waiting in `reuse_ids`.
    Free,
    Root { layout: LayoutId, slots: Vec<Value> },
    Block { parent: ScopeId, bindings: Vec<(Symbol, Value)> },
}

/// Arena of every live scope of one render result.
#[derive(Debug, Default)]
pub struct Scopes {
    scopes: Vec<Scope>,
    reuse_ids: Vec<ScopeId>,
}

impl Scopes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, scope: Scope) -> ScopeId {
        if let Some(id) = self.reuse_ids.pop() {
            self.scopes[id.index()] = scope;
            id
        } else {
            let id = ScopeId::new(self.scopes.len());
            self.scopes.push(scope);
            id
        }
    }

    /// Creates a root scope of `size` slots, all `undefined`, with `this` at slot 0.
    pub fn new_root(&mut self, layout: LayoutId, size: u32, this: Value) -> ScopeId {
        let mut slots = vec![Value::Undefined; (size as usize).max(1)];
        slots[0] = this;
        self.insert(Scope::Root { layout, slots })
    }

    pub fn new_block(&mut self, parent: ScopeId, bindings: Vec<(Symbol, Value)>) -> ScopeId {
        self.insert(Scope::Block { parent, bindings })
    }

    /// Reads `symbol`, walking block scopes outwards to the owning root.
    ///
    /// Fails on a released scope or a slot outside the root's range.
    pub fn get(&self, id: ScopeId, symbol: Symbol) -> Result<&Value, ScopeError> {
        let mut current = id;
        loop {
            match self.scopes.get(current.index()) {
                None | Some(Scope::Free) => return Err(ScopeError::Released(current)),
                Some(Scope::Root { slots, .. }) => {
                    return slots.get(symbol.index()).ok_or(ScopeError::OutOfRange(symbol));
                }
                Some(Scope::Block { parent, bindings }) => {
                    if let Some((_, value)) = bindings.iter().find(|(bound, _)| *bound == symbol) {
                        return Ok(value);
                    }
                    current = *parent;
                }
            }
        }
    }

    /// Sets a slot of a root scope.
    pub fn set_root_slot(&mut self, id: ScopeId, symbol: Symbol, value: Value) -> Result<(), ScopeError> {
        match self.scopes.get_mut(id.index()) {
            Some(Scope::Root { slots, .. }) => {
                let slot = slots.get_mut(symbol.index()).ok_or(ScopeError::OutOfRange(symbol))?;
                *slot = value;
                Ok(())
            }
            _ => Err(ScopeError::Released(id)),
        }
    }

    /// The layout of the root scope `id` belongs to.
    pub fn layout(&self, id: ScopeId) -> Result<LayoutId, ScopeError> {
        let mut current = id;
        loop {
            match self.scopes.get(current.index()) {
                None | Some(Scope::Free) => return Err(ScopeError::Released(current)),
                Some(Scope::Root { layout, .. }) => return Ok(*layout),
                Some(Scope::Block { parent, .. }) => current = *parent,
            }
        }
    }

    /// Marks `id` free. Releasing an already free scope is a no-op.
    pub fn release(&mut self, id: ScopeId) {
        if let Some(scope) = self.scopes.get_mut(id.index())
            && !matches!(scope, Scope::Free)
        {
            *scope = Scope::Free;
            self.reuse_ids.push(id);
        }
    }

    #[must_use]
    pub fn is_live(&self, id: ScopeId) -> bool {
        matches!(self.scopes.get(id.index()), Some(Scope::Root { .. } | Scope::Block { .. }))
    }

    /// Number of scopes not yet released.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.scopes.len() - self.reuse_ids.len()
    }
}

/// Why a scope read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    Released(ScopeId),
    OutOfRange(Symbol),
}

impl ScopeError {
    pub(crate) fn at(self, ip: usize) -> RenderError {
        match self {
            Self::Released(id) => RenderError::corrupt(ip, format!("read of released scope {}", id.0)),
            Self::OutOfRange(symbol) => RenderError::corrupt(ip, format!("symbol {} outside its scope", symbol.raw())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_scopes_defer_to_their_parent() {
        let mut scopes = Scopes::new();
        let root = scopes.new_root(LayoutId(0), 3, Value::str("self"));
        scopes.set_root_slot(root, Symbol::new(1), Value::Number(1.0)).unwrap();
        let block = scopes.new_block(root, vec![(Symbol::new(2), Value::Bool(true))]);

        assert_eq!(scopes.get(block, Symbol::SELF), Ok(&Value::str("self")));
        assert_eq!(scopes.get(block, Symbol::new(1)), Ok(&Value::Number(1.0)));
        assert_eq!(scopes.get(block, Symbol::new(2)), Ok(&Value::Bool(true)));
        assert_eq!(scopes.get(root, Symbol::new(2)), Ok(&Value::Undefined));
        assert_eq!(scopes.layout(block), Ok(LayoutId(0)));
    }

    #[test]
    fn released_ids_are_reused() {
        let mut scopes = Scopes::new();
        let root = scopes.new_root(LayoutId(0), 1, Value::Undefined);
        let block = scopes.new_block(root, Vec::new());
        scopes.release(block);
        scopes.release(block);
        assert_eq!(scopes.live_count(), 1);
        assert_eq!(scopes.get(block, Symbol::SELF), Err(ScopeError::Released(block)));

        let again = scopes.new_block(root, Vec::new());
        assert_eq!(again, block);
        assert_eq!(scopes.live_count(), 2);
    }
}
