//! Compile-time symbol tables.
//!
//! One [`SymbolTable`] exists per compiled template. It is an arena of frames:
//! frame 0 is the program (root) table and every other frame is a block table
//! that stores its parent as a [`TableId`]. All allocation goes through the
//! root counters no matter which frame asks for it, so symbols are monotonic
//! and never renumbered within a template.
//!
//! Slot 0 is reserved for `this`; the first allocated symbol is 1.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A storage slot in a runtime scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(u32);

impl Symbol {
    /// The reserved `this` slot.
    pub const SELF: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Identifies one frame of a [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(u32);

impl TableId {
    /// The program (root) table.
    pub const ROOT: Self = Self(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Result of [`SymbolTable::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// A block-local binding.
    Local(Symbol),
    /// An index into the template's used locals, resolved by name at runtime.
    Lexical(u32),
}

impl Lookup {
    /// True when the name was satisfied by the root table.
    #[must_use]
    pub fn is_root(self) -> bool {
        matches!(self, Self::Lexical(_))
    }
}

#[derive(Debug, Clone)]
enum Frame {
    Root,
    Block {
        parent: TableId,
        locals: Vec<String>,
        slots: Vec<Symbol>,
    },
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    frames: Vec<Frame>,
    template_locals: Vec<String>,
    symbols: Vec<String>,
    upvars: Vec<String>,
    size: u32,
    named: IndexMap<String, Symbol>,
    blocks: IndexMap<String, Symbol>,
    used_template_locals: Vec<String>,
    has_eval: bool,
    overflowed: bool,
}

impl SymbolTable {
    /// Creates the table for a template whose declared outer locals are `locals`.
    #[must_use]
    pub fn top(locals: Vec<String>) -> Self {
        Self {
            frames: vec![Frame::Root],
            template_locals: locals,
            symbols: Vec::new(),
            upvars: Vec::new(),
            size: 1,
            named: IndexMap::new(),
            blocks: IndexMap::new(),
            used_template_locals: Vec::new(),
            has_eval: false,
            overflowed: false,
        }
    }

    /// Allocates a fresh root slot.
    pub fn allocate(&mut self, identifier: &str) -> Symbol {
        self.symbols.push(identifier.to_owned());
        let symbol = Symbol(self.size);
        match self.size.checked_add(1) {
            Some(size) => self.size = size,
            None => self.overflowed = true,
        }
        symbol
    }

    /// Returns the upvar index for `name`, appending it on first reference.
    pub fn allocate_free(&mut self, name: &str) -> u32 {
        let index = match self.upvars.iter().position(|upvar| upvar == name) {
            Some(index) => index,
            None => {
                self.upvars.push(name.to_owned());
                self.upvars.len() - 1
            }
        };
        self.index_u32(index)
    }

    /// Memoized slot for a named argument.
    pub fn allocate_named(&mut self, name: &str) -> Symbol {
        if let Some(&symbol) = self.named.get(name) {
            return symbol;
        }
        let symbol = self.allocate(name);
        self.named.insert(name.to_owned(), symbol);
        symbol
    }

    /// Memoized slot for a named block. `inverse` and `else` share one slot.
    pub fn allocate_block(&mut self, name: &str) -> Symbol {
        let name = if name == "inverse" { "else" } else { name };
        if let Some(&symbol) = self.blocks.get(name) {
            return symbol;
        }
        let symbol = self.allocate(&format!("&{name}"));
        self.blocks.insert(name.to_owned(), symbol);
        symbol
    }

    /// Whether `name` is bound in `table` or any of its ancestors.
    ///
    /// At the root only declared template locals count.
    #[must_use]
    pub fn has(&self, table: TableId, name: &str) -> bool {
        let mut current = table;
        loop {
            match &self.frames[current.index()] {
                Frame::Root => return self.template_locals.iter().any(|local| local == name),
                Frame::Block { parent, locals, .. } => {
                    if locals.iter().any(|local| local == name) {
                        return true;
                    }
                    current = *parent;
                }
            }
        }
    }

    /// Resolves `name` innermost-first.
    ///
    /// The root never fails: an unknown name is recorded as a used template
    /// local and resolved by name when the program runs.
    pub fn get(&mut self, table: TableId, name: &str) -> Lookup {
        let mut current = table;
        loop {
            match &self.frames[current.index()] {
                Frame::Root => break,
                Frame::Block { parent, locals, slots } => {
                    if let Some(position) = locals.iter().position(|local| local == name) {
                        return Lookup::Local(slots[position]);
                    }
                    current = *parent;
                }
            }
        }

        let index = match self.used_template_locals.iter().position(|local| local == name) {
            Some(index) => index,
            None => {
                self.used_template_locals.push(name.to_owned());
                self.used_template_locals.len() - 1
            }
        };
        Lookup::Lexical(self.index_u32(index))
    }

    /// Opens a block table under `parent`, allocating one slot per local.
    pub fn child(&mut self, parent: TableId, locals: &[String]) -> TableId {
        let slots = locals.iter().map(|name| self.allocate(name)).collect();
        let id = TableId(self.index_u32(self.frames.len()));
        self.frames.push(Frame::Block {
            parent,
            locals: locals.to_vec(),
            slots,
        });
        id
    }

    /// Marks the whole program as using name-based lookup.
    pub fn set_has_eval(&mut self) {
        self.has_eval = true;
    }

    #[must_use]
    pub fn has_eval(&self) -> bool {
        self.has_eval
    }

    /// Every block local visible from `table`, inner bindings overriding outer ones.
    #[must_use]
    pub fn locals_map(&self, table: TableId) -> IndexMap<String, Symbol> {
        let mut chain = Vec::new();
        let mut current = table;
        while let Frame::Block { parent, .. } = &self.frames[current.index()] {
            chain.push(current);
            current = *parent;
        }

        let mut map = IndexMap::new();
        for id in chain.into_iter().rev() {
            if let Frame::Block { locals, slots, .. } = &self.frames[id.index()] {
                for name in locals {
                    // duplicate locals resolve to their first declaration, as `get` does
                    if let Some(position) = locals.iter().position(|local| local == name) {
                        map.insert(name.clone(), slots[position]);
                    }
                }
            }
        }
        map
    }

    #[must_use]
    pub fn eval_info(&self, table: TableId) -> Vec<Symbol> {
        self.locals_map(table).into_values().collect()
    }

    /// The block locals declared directly by `table` (empty for the root).
    #[must_use]
    pub fn block_locals(&self, table: TableId) -> &[String] {
        match &self.frames[table.index()] {
            Frame::Root => &[],
            Frame::Block { locals, .. } => locals,
        }
    }

    /// Slots of the locals declared directly by `table`.
    #[must_use]
    pub fn block_slots(&self, table: TableId) -> &[Symbol] {
        match &self.frames[table.index()] {
            Frame::Root => &[],
            Frame::Block { slots, .. } => slots,
        }
    }

    /// The next symbol to be allocated, which is also the runtime scope size.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Name of every allocated slot, slot 1 first.
    #[must_use]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    #[must_use]
    pub fn upvars(&self) -> &[String] {
        &self.upvars
    }

    #[must_use]
    pub fn template_locals(&self) -> &[String] {
        &self.template_locals
    }

    #[must_use]
    pub fn used_template_locals(&self) -> &[String] {
        &self.used_template_locals
    }

    #[must_use]
    pub fn named(&self) -> &IndexMap<String, Symbol> {
        &self.named
    }

    #[must_use]
    pub fn blocks(&self) -> &IndexMap<String, Symbol> {
        &self.blocks
    }

    /// True once an id ran past `u32::MAX`. Ids minted after that alias.
    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    fn index_u32(&mut self, index: usize) -> u32 {
        u32::try_from(index).unwrap_or_else(|_| {
            self.overflowed = true;
            u32::MAX
        })
    }
}
