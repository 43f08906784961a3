//! The name-resolution contract between the compiler, the VM and the host.
//!
//! The compiler asks a [`CompileTimeResolver`] to turn names into helper
//! handles and component templates; the VM asks a [`RuntimeResolver`] for the
//! helper behind a handle. [`Registry`] implements both for simple hosts.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    ast::Template,
    reactive::{CellId, ReactiveStore},
    value::Value,
};

/// Metadata identifying where a template came from.
///
/// The compiler hands the referrer of the template being compiled to every
/// lookup, so hosts can resolve names relative to their owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateMeta {
    pub module_name: Option<String>,
    pub owner: Option<String>,
}

impl TemplateMeta {
    #[must_use]
    pub fn owned_by(owner: &str) -> Self {
        Self {
            module_name: None,
            owner: Some(owner.to_owned()),
        }
    }
}

/// Handle a resolver hands out for a helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HelperHandle(pub u32);

pub trait CompileTimeResolver {
    fn lookup_helper(&self, name: &str, referrer: &TemplateMeta) -> Option<HelperHandle>;

    fn lookup_component(&self, name: &str, referrer: &TemplateMeta) -> Option<Rc<Template>>;
}

pub trait RuntimeResolver {
    fn helper(&self, handle: HelperHandle) -> Option<(&str, &dyn Helper)>;
}

/// Evaluated arguments of a helper call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelperArgs {
    pub positional: Vec<Value>,
    pub named: IndexMap<String, Value>,
}

impl HelperArgs {
    /// Positional argument `index`, `undefined` when absent.
    #[must_use]
    pub fn at(&self, index: usize) -> Value {
        self.positional.get(index).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn named(&self, key: &str) -> Value {
        self.named.get(key).cloned().unwrap_or_default()
    }
}

/// What a helper may touch while it runs.
#[derive(Debug)]
pub struct HelperContext<'a> {
    store: &'a ReactiveStore,
    reads: SmallVec<[CellId; 4]>,
}

impl<'a> HelperContext<'a> {
    pub(crate) fn new(store: &'a ReactiveStore) -> Self {
        Self {
            store,
            reads: SmallVec::new(),
        }
    }

    /// Reads a cell, making the calling tracker depend on it.
    pub fn read(&mut self, cell: CellId) -> Value {
        self.reads.push(cell);
        self.store.get(cell)
    }

    /// Follows a cell reference, recording the read; other values pass through.
    pub fn deref(&mut self, value: Value) -> Value {
        match value {
            Value::Cell(cell) => self.read(cell),
            other => other,
        }
    }

    /// The store, for writes. Writes made during a render are queued.
    #[must_use]
    pub fn store(&self) -> &'a ReactiveStore {
        self.store
    }

    pub(crate) fn into_reads(self) -> SmallVec<[CellId; 4]> {
        self.reads
    }
}

/// A host function callable from templates.
pub trait Helper {
    fn call(&self, args: &HelperArgs, cx: &mut HelperContext<'_>) -> Result<Value, String>;
}

impl<F> Helper for F
where
    F: Fn(&HelperArgs, &mut HelperContext<'_>) -> Result<Value, String>,
{
    fn call(&self, args: &HelperArgs, cx: &mut HelperContext<'_>) -> Result<Value, String> {
        self(args, cx)
    }
}

/// Pins a closure to the helper signature so its argument and return types infer.
pub fn helper_fn<F>(f: F) -> F
where
    F: Fn(&HelperArgs, &mut HelperContext<'_>) -> Result<Value, String>,
{
    f
}

/// Name-keyed helpers and components.
#[derive(Default)]
pub struct Registry {
    helpers: Vec<(String, Box<dyn Helper>)>,
    helper_names: AHashMap<String, HelperHandle>,
    components: AHashMap<String, Rc<Template>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("helpers", &self.helper_names.keys().collect::<Vec<_>>())
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `helper` under `name`, replacing an earlier registration.
    pub fn register_helper(&mut self, name: &str, helper: impl Helper + 'static) -> HelperHandle {
        if let Some(&handle) = self.helper_names.get(name) {
            self.helpers[handle.0 as usize].1 = Box::new(helper);
            return handle;
        }
        let handle = HelperHandle(u32::try_from(self.helpers.len()).unwrap_or(u32::MAX));
        self.helpers.push((name.to_owned(), Box::new(helper)));
        self.helper_names.insert(name.to_owned(), handle);
        handle
    }

    pub fn register_component(&mut self, name: &str, layout: Template) -> Rc<Template> {
        let layout = Rc::new(layout);
        self.components.insert(name.to_owned(), layout.clone());
        layout
    }
}

impl CompileTimeResolver for Registry {
    fn lookup_helper(&self, name: &str, _referrer: &TemplateMeta) -> Option<HelperHandle> {
        self.helper_names.get(name).copied()
    }

    fn lookup_component(&self, name: &str, _referrer: &TemplateMeta) -> Option<Rc<Template>> {
        self.components.get(name).cloned()
    }
}

impl RuntimeResolver for Registry {
    fn helper(&self, handle: HelperHandle) -> Option<(&str, &dyn Helper)> {
        self.helpers
            .get(handle.0 as usize)
            .map(|(name, helper)| (name.as_str(), helper.as_ref()))
    }
}
