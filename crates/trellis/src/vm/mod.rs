//! The render VM.
//!
//! A stack machine over the program heap. Each frame carries an instruction
//! pointer, the scope it reads symbols from and the layout its upvars and
//! lexicals belong to. Nodes are inserted through [`TreeOperations`] at the
//! cursor on top of the element stack, in strict instruction order.
//!
//! `Enter`/`Exit` pairs open and close trackers. Reactive reads are recorded
//! on the innermost open tracker, and a node inserted at a tracker's element
//! depth extends that tracker's bounds. Closed trackers become children of
//! the tracker that was open around them.

use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

pub use tracker::{ItemState, ListState, RenderResult, Tracker};
pub use updating::TickReport;

use crate::{
    bounds::{Bounds, BoundsBuilder},
    bytecode::{Opcode, TrackerKind, jump_target},
    error::RenderError,
    limits::RenderLimits,
    program::{BlockId, Constant, ConstId, Handle, LayoutId, LayoutInfo, Program, Resolved},
    reactive::{CellId, ReactiveStore, Revision, Tag},
    resolver::{HelperArgs, HelperContext, RuntimeResolver},
    scope::{ScopeId, Scopes},
    symbol_table::Symbol,
    tracer::{NoopTracer, RenderTracer},
    tree::{Cursor, NodeId, TreeOperations},
    value::{BlockRef, Value},
};

mod tracker;
mod updating;

/// Callback invoked by `{{debugger}}`.
pub type DebuggerCallback<'a> = &'a dyn Fn(&DebugContext<'_>);

/// Everything a render or tick reads but does not own.
#[derive(Clone, Copy)]
pub struct RenderEnv<'a> {
    pub program: &'a Program,
    pub resolver: &'a dyn RuntimeResolver,
    pub store: &'a ReactiveStore,
    pub limits: RenderLimits,
    pub debugger: Option<DebuggerCallback<'a>>,
}

impl std::fmt::Debug for RenderEnv<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEnv")
            .field("limits", &self.limits)
            .field("debugger", &self.debugger.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> RenderEnv<'a> {
    #[must_use]
    pub fn new(program: &'a Program, resolver: &'a dyn RuntimeResolver, store: &'a ReactiveStore) -> Self {
        Self {
            program,
            resolver,
            store,
            limits: RenderLimits::default(),
            debugger: None,
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: RenderLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_debugger(mut self, debugger: DebuggerCallback<'a>) -> Self {
        self.debugger = Some(debugger);
        self
    }
}

/// Inputs of a top-level render.
#[derive(Debug, Clone, Default)]
pub struct RenderArgs {
    /// Value of `this`.
    pub this: Value,
    /// Named arguments, with or without the leading `@`.
    pub named: IndexMap<String, Value>,
    /// Values of outer locals, by name.
    pub lexicals: IndexMap<String, Value>,
}

impl RenderArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_this(mut self, this: impl Into<Value>) -> Self {
        self.this = this.into();
        self
    }

    #[must_use]
    pub fn with_named(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.named.insert(name.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn with_lexical(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.lexicals.insert(name.to_owned(), value.into());
        self
    }
}

/// Renders the template at `handle` into `tree` at `cursor`.
///
/// On failure every node the render inserted is removed again.
pub fn render<T: TreeOperations>(
    env: &RenderEnv<'_>,
    handle: Handle,
    args: RenderArgs,
    tree: &mut T,
    cursor: Cursor,
) -> Result<RenderResult, RenderError> {
    render_traced(env, handle, args, tree, cursor, NoopTracer)
}

pub fn render_traced<T: TreeOperations, Tr: RenderTracer>(
    env: &RenderEnv<'_>,
    handle: Handle,
    args: RenderArgs,
    tree: &mut T,
    cursor: Cursor,
    tracer: Tr,
) -> Result<RenderResult, RenderError> {
    let (layout_id, layout) = env
        .program
        .layout_for(handle)
        .ok_or_else(|| RenderError::corrupt(handle.offset(), "handle is not a template entry point"))?;

    env.store.begin_tick()?;
    let result = render_layout(env, handle, layout_id, layout, args, tree, cursor, tracer);
    env.store.end_tick();
    result
}

#[expect(clippy::too_many_arguments, reason = "render entry points pass their inputs through")]
fn render_layout<T: TreeOperations, Tr: RenderTracer>(
    env: &RenderEnv<'_>,
    handle: Handle,
    layout_id: LayoutId,
    layout: &LayoutInfo,
    args: RenderArgs,
    tree: &mut T,
    cursor: Cursor,
    tracer: Tr,
) -> Result<RenderResult, RenderError> {
    let RenderArgs { this, named, lexicals } = args;
    let mut scopes = Scopes::new();
    let root_scope = scopes.new_root(layout_id, layout.symbol_count, this);
    for (name, value) in named {
        let key = if name.starts_with('@') { name } else { format!("@{name}") };
        if let Some(&symbol) = layout.named.get(&key) {
            scopes
                .set_root_slot(root_scope, symbol, value)
                .map_err(|err| err.at(handle.offset()))?;
        }
    }

    let (bounds, trackers) = {
        let mut vm = Vm::new(env, tree, &mut scopes, &lexicals, tracer, cursor);
        vm.push_frame(handle.offset(), root_scope, layout_id)?;
        match vm.run(Stop::Return).and_then(|()| vm.finish()) {
            Ok(output) => output,
            Err(err) => {
                vm.abort();
                return Err(err);
            }
        }
    };
    log::debug!(
        "rendered {} ({} top-level trackers)",
        layout.id.as_deref().unwrap_or("<anonymous>"),
        trackers.len()
    );

    Ok(RenderResult {
        handle,
        layout: layout_id,
        bounds,
        trackers,
        scopes,
        root_scope,
        lexicals,
    })
}

/// What `{{debugger}}` exposes to the callback.
#[derive(Debug)]
pub struct DebugContext<'a> {
    scopes: &'a Scopes,
    scope: ScopeId,
    layout: &'a LayoutInfo,
    locals: &'a [(String, Symbol)],
    lexicals: &'a IndexMap<String, Value>,
}

impl DebugContext<'_> {
    #[must_use]
    pub fn this(&self) -> Value {
        self.scopes.get(self.scope, Symbol::SELF).cloned().unwrap_or_default()
    }

    /// Block locals visible at the statement, innermost binding per name.
    pub fn locals(&self) -> impl Iterator<Item = &str> {
        self.locals.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn template(&self) -> Option<&str> {
        self.layout.id.as_deref()
    }

    /// Looks `name` up the way an evaluated expression would: block locals,
    /// then the template's symbols by name (`@arg`, `&block`), then outer locals.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if name == "this" {
            return Some(self.this());
        }
        let symbol = self
            .locals
            .iter()
            .find(|(local, _)| local == name)
            .map(|(_, symbol)| *symbol)
            .or_else(|| self.layout.eval_symbol(name));
        if let Some(symbol) = symbol {
            return self.scopes.get(self.scope, symbol).ok().cloned();
        }
        self.lexicals.get(name).cloned()
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    ip: usize,
    scope: ScopeId,
    layout: LayoutId,
}

/// Where a nested `run` hands control back.
#[derive(Debug, Clone, Copy)]
enum Stop {
    /// When the frame `run` started in returns.
    Return,
    /// When the starting frame reaches this heap offset.
    At(usize),
}

/// A tracker between its `Enter` and `Exit`.
#[derive(Debug)]
struct OpenTracker {
    kind: TrackerKind,
    enter_ip: usize,
    scope: ScopeId,
    layout: LayoutId,
    element: Option<NodeId>,
    /// Element stack height the tracker was opened at.
    depth: usize,
    bounds: BoundsBuilder,
    deps: SmallVec<[CellId; 4]>,
    children: Vec<Tracker>,
    owned_scopes: Vec<ScopeId>,
    list: Option<ListState>,
    item: Option<ItemState>,
}

pub(crate) struct Vm<'a, T: TreeOperations, Tr: RenderTracer> {
    env: &'a RenderEnv<'a>,
    tree: &'a mut T,
    scopes: &'a mut Scopes,
    lexicals: &'a IndexMap<String, Value>,
    tracer: Tr,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    elements: Vec<Cursor>,
    open: Vec<OpenTracker>,
    /// Trackers closed with no tracker open around them.
    completed: Vec<Tracker>,
    root_bounds: BoundsBuilder,
    /// Nodes inserted at the base cursor, removed again on abort.
    inserted: Vec<NodeId>,
    /// Scopes created since the last reset, released again on abort.
    created_scopes: Vec<ScopeId>,
    instructions: u64,
    snapshot: Revision,
}

impl<'a, T: TreeOperations, Tr: RenderTracer> Vm<'a, T, Tr> {
    pub(crate) fn new(
        env: &'a RenderEnv<'a>,
        tree: &'a mut T,
        scopes: &'a mut Scopes,
        lexicals: &'a IndexMap<String, Value>,
        tracer: Tr,
        cursor: Cursor,
    ) -> Self {
        Self {
            env,
            tree,
            scopes,
            lexicals,
            tracer,
            stack: Vec::new(),
            frames: Vec::new(),
            elements: vec![cursor],
            open: Vec::new(),
            completed: Vec::new(),
            root_bounds: BoundsBuilder::new(cursor.parent),
            inserted: Vec::new(),
            created_scopes: Vec::new(),
            instructions: 0,
            snapshot: env.store.now(),
        }
    }

    /// Clears per-run state and moves the base cursor.
    pub(crate) fn reset(&mut self, cursor: Cursor) {
        self.stack.clear();
        self.frames.clear();
        self.elements.clear();
        self.elements.push(cursor);
        self.open.clear();
        self.completed.clear();
        self.root_bounds = BoundsBuilder::new(cursor.parent);
        self.inserted.clear();
        self.created_scopes.clear();
    }

    /// Undoes the tree and scope effects of the current run.
    pub(crate) fn abort(&mut self) {
        for node in self.inserted.drain(..) {
            self.tree.remove(node);
        }
        for scope in self.created_scopes.drain(..) {
            self.scopes.release(scope);
        }
        self.stack.clear();
        self.frames.clear();
        self.open.clear();
        self.completed.clear();
    }

    fn finish(&mut self) -> Result<(Bounds, Vec<Tracker>), RenderError> {
        if !self.open.is_empty() {
            return Err(RenderError::corrupt(0, "render ended with open trackers"));
        }
        let parent = self.base().parent;
        let bounds = std::mem::replace(&mut self.root_bounds, BoundsBuilder::new(parent)).finish();
        Ok((bounds, std::mem::take(&mut self.completed)))
    }

    fn base(&self) -> Cursor {
        self.elements[0]
    }

    // -----------------------------------------------------------------------
    // program access

    fn program(&self) -> &'a Program {
        self.env.program
    }

    fn layout_info(&self, id: LayoutId, ip: usize) -> Result<&'a LayoutInfo, RenderError> {
        self.program()
            .layout(id)
            .ok_or_else(|| RenderError::corrupt(ip, format!("layout {} does not exist", id.0)))
    }

    fn constant(&self, id: u32, ip: usize) -> Result<&'a Constant, RenderError> {
        self.program()
            .constants()
            .get(ConstId(id))
            .ok_or_else(|| RenderError::corrupt(ip, format!("constant {id} does not exist")))
    }

    fn const_str(&self, id: u32, ip: usize) -> Result<&'a str, RenderError> {
        match self.constant(id, ip)? {
            Constant::Str(s) => Ok(s),
            other => Err(RenderError::corrupt(ip, format!("expected a string constant, found {other:?}"))),
        }
    }

    fn const_names(&self, id: u32, ip: usize) -> Result<&'a [String], RenderError> {
        match self.constant(id, ip)? {
            Constant::Names(names) => Ok(names),
            other => Err(RenderError::corrupt(ip, format!("expected a name list, found {other:?}"))),
        }
    }

    fn const_value(&self, id: u32, ip: usize) -> Result<Value, RenderError> {
        Ok(match self.constant(id, ip)? {
            Constant::Str(s) => Value::str(s),
            Constant::Number(n) => Value::Number(*n),
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Null => Value::Null,
            Constant::Undefined => Value::Undefined,
            other => return Err(RenderError::corrupt(ip, format!("{other:?} is not a value constant"))),
        })
    }

    // -----------------------------------------------------------------------
    // stack and frames

    fn pop(&mut self, ip: usize) -> Result<Value, RenderError> {
        self.stack
            .pop()
            .ok_or_else(|| RenderError::corrupt(ip, "operand stack underflow"))
    }

    /// Pops `n` values, returned in push order.
    fn pop_n(&mut self, n: usize, ip: usize) -> Result<Vec<Value>, RenderError> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| RenderError::corrupt(ip, "operand stack underflow"))?;
        Ok(self.stack.split_off(at))
    }

    pub(crate) fn push_frame(&mut self, ip: usize, scope: ScopeId, layout: LayoutId) -> Result<(), RenderError> {
        let depth = self.frames.len() + 1;
        self.env.limits.check_depth(depth)?;
        self.frames.push(Frame { ip, scope, layout });
        self.tracer.on_frame_push(ip, depth);
        Ok(())
    }

    fn current_frame(&self, ip: usize) -> Result<Frame, RenderError> {
        self.frames
            .last()
            .copied()
            .ok_or_else(|| RenderError::corrupt(ip, "no active frame"))
    }

    fn cursor(&self) -> Cursor {
        self.elements.last().copied().unwrap_or_else(|| self.base())
    }

    fn own_scope(&mut self, scope: ScopeId) {
        self.created_scopes.push(scope);
        if let Some(open) = self.open.last_mut() {
            open.owned_scopes.push(scope);
        }
    }

    // -----------------------------------------------------------------------
    // reactivity

    fn track(&mut self, cell: CellId) {
        if let Some(open) = self.open.last_mut() {
            open.deps.push(cell);
        }
    }

    /// Follows cell references, recording each read.
    fn deref(&mut self, mut value: Value) -> Value {
        while let Value::Cell(cell) = value {
            self.track(cell);
            value = self.env.store.get(cell);
        }
        value
    }

    // -----------------------------------------------------------------------
    // output

    fn insert(&mut self, node: NodeId) {
        let cursor = self.cursor();
        self.tree.insert_before(cursor.parent, node, cursor.next_sibling);
        self.record(node);
    }

    /// Adds a freshly inserted top-level node to the right bounds.
    fn record(&mut self, node: NodeId) {
        let depth = self.elements.len();
        if depth == 1 {
            self.inserted.push(node);
        }
        match self.open.last_mut() {
            Some(open) if open.depth == depth => open.bounds.push(node),
            Some(_) => {}
            None if depth == 1 => self.root_bounds.push(node),
            None => {}
        }
    }

    fn record_range(&mut self, bounds: &Bounds) -> Result<(), RenderError> {
        for node in bounds.nodes(&*self.tree)? {
            self.record(node);
        }
        Ok(())
    }

    fn open_tracker(&mut self, kind: TrackerKind, ip: usize, frame: Frame) {
        let cursor = self.cursor();
        self.open.push(OpenTracker {
            kind,
            enter_ip: ip,
            scope: frame.scope,
            layout: frame.layout,
            element: (kind == TrackerKind::Attribute).then_some(cursor.parent),
            depth: self.elements.len(),
            bounds: BoundsBuilder::new(cursor.parent),
            deps: SmallVec::new(),
            children: Vec::new(),
            owned_scopes: Vec::new(),
            list: None,
            item: None,
        });
        self.tracer.on_tracker_open(kind, ip);
    }

    fn close_tracker(&mut self, ip: usize) -> Result<(), RenderError> {
        let open = self
            .open
            .pop()
            .ok_or_else(|| RenderError::corrupt(ip, "exit without a matching enter"))?;
        if open.depth != self.elements.len() {
            return Err(RenderError::corrupt(ip, "element left open inside a tracker"));
        }

        let mut bounds = open.bounds.finish();
        if open.kind.has_bounds() && bounds.is_empty() {
            let placeholder = self.tree.create_comment("");
            let cursor = self.cursor();
            self.tree.insert_before(cursor.parent, placeholder, cursor.next_sibling);
            if open.depth == 1 {
                self.inserted.push(placeholder);
            }
            bounds = Bounds::single(cursor.parent, placeholder);
        }

        let tracker = Tracker {
            kind: open.kind,
            enter_ip: open.enter_ip,
            exit_ip: ip,
            scope: open.scope,
            layout: open.layout,
            element: open.element,
            bounds,
            tag: Tag::new(open.deps, self.snapshot),
            children: open.children,
            owned_scopes: open.owned_scopes,
            list: open.list,
            item: open.item,
        };
        self.tracer.on_tracker_close(tracker.kind, ip);

        match self.open.last_mut() {
            Some(parent) => {
                if parent.depth == open.depth {
                    parent.bounds.merge(&tracker.bounds);
                }
                parent.children.push(tracker);
            }
            None => {
                if open.depth == 1 {
                    self.root_bounds.merge(&tracker.bounds);
                }
                self.completed.push(tracker);
            }
        }
        Ok(())
    }

    /// Takes the single tracker a standalone run produced.
    pub(crate) fn take_completed(&mut self, ip: usize) -> Result<Tracker, RenderError> {
        match (self.completed.pop(), self.completed.is_empty()) {
            (Some(tracker), true) => Ok(tracker),
            _ => Err(RenderError::corrupt(ip, "rerun did not produce exactly one tracker")),
        }
    }

    // -----------------------------------------------------------------------
    // execution

    fn run(&mut self, stop: Stop) -> Result<(), RenderError> {
        let base = self.frames.len();
        loop {
            if self.frames.len() < base {
                return Ok(());
            }
            let Some(frame) = self.frames.last() else {
                return Ok(());
            };
            if let Stop::At(target) = stop
                && self.frames.len() == base
                && frame.ip == target
            {
                return Ok(());
            }
            self.step()?;
        }
    }

    fn step(&mut self) -> Result<(), RenderError> {
        let frame = self.current_frame(0)?;
        let ip = frame.ip;
        let heap = self.program().heap();
        let word = *heap
            .get(ip)
            .ok_or_else(|| RenderError::corrupt(ip, "instruction pointer outside the heap"))?;
        let op = Opcode::decode(word).ok_or_else(|| RenderError::corrupt(ip, format!("unknown opcode {word}")))?;
        let next = ip + op.width();
        let operands = heap
            .get(ip + 1..next)
            .ok_or_else(|| RenderError::corrupt(ip, format!("truncated operands for {op}")))?;

        self.instructions += 1;
        self.env.limits.check_instructions(self.instructions)?;
        self.tracer.on_instruction(ip, op, self.stack.len(), self.frames.len());
        if let Some(current) = self.frames.last_mut() {
            current.ip = next;
        }

        match op {
            Opcode::PushConst => {
                let value = self.const_value(operands[0], ip)?;
                self.stack.push(value);
            }
            Opcode::GetSymbol => {
                let value = self
                    .scopes
                    .get(frame.scope, Symbol::new(operands[0]))
                    .map_err(|err| err.at(ip))?
                    .clone();
                let value = self.deref(value);
                self.stack.push(value);
            }
            Opcode::GetLexical => {
                let layout = self.layout_info(frame.layout, ip)?;
                let name = layout
                    .lexicals
                    .get(operands[0] as usize)
                    .ok_or_else(|| RenderError::corrupt(ip, format!("lexical {} does not exist", operands[0])))?;
                let value = self.lexicals.get(name).cloned().unwrap_or_default();
                let value = self.deref(value);
                self.stack.push(value);
            }
            Opcode::GetProperty => {
                let key = self.const_str(operands[0], ip)?;
                let object = self.pop(ip)?;
                let value = self.deref(object.property(key));
                self.stack.push(value);
            }
            Opcode::PushBlock => {
                let block = BlockId(operands[0]);
                if self.program().block(block).is_none() {
                    return Err(RenderError::corrupt(ip, format!("block {} does not exist", block.0)));
                }
                self.stack.push(Value::Block(BlockRef {
                    block,
                    scope: frame.scope,
                }));
            }
            Opcode::HasBlock => {
                let present = self
                    .scopes
                    .get(frame.scope, Symbol::new(operands[0]))
                    .map_err(|err| err.at(ip))?
                    .is_block();
                self.stack.push(Value::Bool(present));
            }
            Opcode::Helper => self.call_helper(ip, frame, operands[0], operands[1], operands[2])?,
            Opcode::Concat => {
                let parts = self.pop_n(operands[0] as usize, ip)?;
                let text: String = parts.iter().map(ToString::to_string).collect();
                self.stack.push(Value::Str(Rc::from(text)));
            }
            Opcode::Text => {
                let text = self.const_str(operands[0], ip)?;
                let node = self.tree.create_text(text);
                self.insert(node);
            }
            Opcode::Comment => {
                let text = self.const_str(operands[0], ip)?;
                let node = self.tree.create_comment(text);
                self.insert(node);
            }
            Opcode::OpenElement => {
                let tag = self.const_str(operands[0], ip)?;
                let node = self.tree.create_element(tag);
                self.insert(node);
                self.elements.push(Cursor::append_to(node));
            }
            Opcode::StaticAttr => {
                let name = self.const_str(operands[0], ip)?;
                let value = self.const_str(operands[1], ip)?;
                let element = self.cursor().parent;
                self.tree.set_attribute(element, name, value);
            }
            Opcode::DynamicAttr => {
                let name = self.const_str(operands[0], ip)?;
                let value = self.pop(ip)?;
                let element = self.cursor().parent;
                match value {
                    Value::Undefined | Value::Null | Value::Bool(false) => self.tree.remove_attribute(element, name),
                    Value::Bool(true) => self.tree.set_attribute(element, name, ""),
                    value => self.tree.set_attribute(element, name, &value.to_string()),
                }
            }
            Opcode::CloseElement => {
                if self.elements.len() <= 1 {
                    return Err(RenderError::corrupt(ip, "close without an open element"));
                }
                self.elements.pop();
            }
            Opcode::Append => {
                let value = self.pop(ip)?;
                if operands[0] == 1 || matches!(value, Value::SafeString(_)) {
                    let cursor = self.cursor();
                    let bounds = self.tree.insert_html(cursor, &value.to_string());
                    self.record_range(&bounds)?;
                } else {
                    let node = self.tree.create_text(&value.to_string());
                    self.insert(node);
                }
            }
            Opcode::Jump => self.jump(ip, next, operands[0])?,
            Opcode::JumpUnless => {
                if !self.pop(ip)?.is_truthy() {
                    self.jump(ip, next, operands[0])?;
                }
            }
            Opcode::JumpIf => {
                if self.pop(ip)?.is_truthy() {
                    self.jump(ip, next, operands[0])?;
                }
            }
            Opcode::Enter => {
                let kind = TrackerKind::decode(operands[0])
                    .ok_or_else(|| RenderError::corrupt(ip, format!("unknown tracker kind {}", operands[0])))?;
                self.open_tracker(kind, ip, frame);
            }
            Opcode::Exit => self.close_tracker(ip)?,
            Opcode::InvokeBlock => {
                let block = self.pop(ip)?;
                let args = self.pop_n(operands[0] as usize, ip)?;
                if let Value::Block(block) = block {
                    self.push_block_frame(ip, block, args)?;
                }
            }
            Opcode::Each => {
                let inverse = self.pop(ip)?;
                let body = self.pop(ip)?;
                let list = self.pop(ip)?;
                self.each(ip, list, body, inverse)?;
            }
            Opcode::InvokeComponent => self.invoke_component(ip, frame, operands[0], operands[1], operands[2])?,
            Opcode::Debugger => self.debugger(ip, frame, operands[0])?,
            Opcode::Return => {
                self.frames.pop();
                self.tracer.on_frame_pop(self.frames.len());
            }
        }
        Ok(())
    }

    fn jump(&mut self, ip: usize, next: usize, operand: u32) -> Result<(), RenderError> {
        let target = jump_target(next, operand)
            .filter(|&target| target < self.program().heap().len())
            .ok_or_else(|| RenderError::corrupt(ip, "jump outside the heap"))?;
        if let Some(current) = self.frames.last_mut() {
            current.ip = target;
        }
        Ok(())
    }

    fn push_block_frame(&mut self, ip: usize, block: BlockRef, args: Vec<Value>) -> Result<(), RenderError> {
        let info = self
            .program()
            .block(block.block)
            .ok_or_else(|| RenderError::corrupt(ip, format!("block {} does not exist", block.block.0)))?;
        let mut args = args.into_iter();
        let bindings = info
            .params
            .iter()
            .map(|&symbol| (symbol, args.next().unwrap_or_default()))
            .collect();
        let scope = self.scopes.new_block(block.scope, bindings);
        self.own_scope(scope);
        self.push_frame(info.start as usize, scope, info.layout)
    }

    fn call_helper(&mut self, ip: usize, frame: Frame, upvar: u32, argc: u32, names: u32) -> Result<(), RenderError> {
        let layout = self.layout_info(frame.layout, ip)?;
        let upvar = layout
            .upvars
            .get(upvar as usize)
            .ok_or_else(|| RenderError::corrupt(ip, format!("upvar {upvar} does not exist")))?;
        let Resolved::Helper(handle) = upvar.resolved else {
            return Err(RenderError::corrupt(ip, format!("`{}` is not a helper", upvar.name)));
        };
        let names = self.const_names(names, ip)?;
        let named = self.pop_n(names.len(), ip)?;
        let positional = self.pop_n(argc as usize, ip)?;
        let args = HelperArgs {
            positional,
            named: names.iter().cloned().zip(named).collect(),
        };

        let (name, helper) = self.env.resolver.helper(handle).ok_or_else(|| RenderError::Helper {
            name: upvar.name.clone(),
            message: "no helper registered for this handle".to_owned(),
        })?;
        let mut cx = HelperContext::new(self.env.store);
        let result = helper.call(&args, &mut cx);
        for cell in cx.into_reads() {
            self.track(cell);
        }
        let value = result.map_err(|message| RenderError::Helper {
            name: name.to_owned(),
            message,
        })?;
        let value = self.deref(value);
        self.stack.push(value);
        Ok(())
    }

    fn each(&mut self, ip: usize, list: Value, body: Value, inverse: Value) -> Result<(), RenderError> {
        let Value::Block(body) = body else {
            return Err(RenderError::corrupt(ip, "each body is not a block"));
        };
        let inverse = match inverse {
            Value::Block(inverse) => Some(inverse),
            Value::Null | Value::Undefined => None,
            _ => return Err(RenderError::corrupt(ip, "each inverse is not a block")),
        };
        let items = list.iter_items().unwrap_or_else(|| Rc::from(Vec::new()));

        let open = self
            .open
            .last_mut()
            .filter(|open| open.kind == TrackerKind::List)
            .ok_or_else(|| RenderError::corrupt(ip, "each outside a list tracker"))?;
        open.list = Some(ListState {
            items: items.clone(),
            body,
            inverse,
            each_ip: ip,
        });

        if items.is_empty() {
            if let Some(inverse) = inverse {
                self.push_block_frame(ip, inverse, Vec::new())?;
                self.run(Stop::Return)?;
            }
            return Ok(());
        }
        for (index, item) in items.iter().enumerate() {
            self.render_item(ip, body, item.clone(), index)?;
        }
        Ok(())
    }

    /// Runs the list body for one item inside its own item tracker.
    pub(crate) fn render_item(&mut self, ip: usize, body: BlockRef, value: Value, index: usize) -> Result<(), RenderError> {
        let layout = self
            .program()
            .block(body.block)
            .ok_or_else(|| RenderError::corrupt(ip, format!("block {} does not exist", body.block.0)))?
            .layout;
        self.open_tracker(
            TrackerKind::Item,
            ip,
            Frame {
                ip,
                scope: body.scope,
                layout,
            },
        );
        if let Some(open) = self.open.last_mut() {
            open.item = Some(ItemState {
                value: value.clone(),
                index,
                body,
            });
        }
        self.push_block_frame(ip, body, vec![value, Value::Number(index as f64)])?;
        self.run(Stop::Return)?;
        self.close_tracker(ip)
    }

    fn invoke_component(
        &mut self,
        ip: usize,
        frame: Frame,
        upvar: u32,
        names: u32,
        blocks: u32,
    ) -> Result<(), RenderError> {
        let caller = self.layout_info(frame.layout, ip)?;
        let upvar = caller
            .upvars
            .get(upvar as usize)
            .ok_or_else(|| RenderError::corrupt(ip, format!("upvar {upvar} does not exist")))?;
        let Resolved::Component(callee_id) = upvar.resolved else {
            return Err(RenderError::corrupt(ip, format!("`{}` is not a component", upvar.name)));
        };
        let callee = self.layout_info(callee_id, ip)?;
        let block_names = self.const_names(blocks, ip)?;
        let names = self.const_names(names, ip)?;
        let block_values = self.pop_n(block_names.len(), ip)?;
        let named = self.pop_n(names.len(), ip)?;

        let scope = self.scopes.new_root(callee_id, callee.symbol_count, Value::Undefined);
        self.own_scope(scope);
        let bindings = names
            .iter()
            .zip(named)
            .filter_map(|(name, value)| callee.named.get(name).map(|&symbol| (symbol, value)));
        let block_bindings = block_names
            .iter()
            .zip(block_values)
            .filter_map(|(name, value)| callee.blocks.get(name).map(|&symbol| (symbol, value)));
        for (symbol, value) in bindings.chain(block_bindings) {
            self.scopes
                .set_root_slot(scope, symbol, value)
                .map_err(|err| err.at(ip))?;
        }
        self.push_frame(callee.handle.offset(), scope, callee_id)
    }

    fn debugger(&mut self, ip: usize, frame: Frame, locals: u32) -> Result<(), RenderError> {
        let Some(callback) = self.env.debugger else {
            return Ok(());
        };
        let Constant::Locals(locals) = self.constant(locals, ip)? else {
            return Err(RenderError::corrupt(ip, "debugger operand is not a locals map"));
        };
        let layout = self.layout_info(frame.layout, ip)?;
        callback(&DebugContext {
            scopes: &*self.scopes,
            scope: frame.scope,
            layout,
            locals,
            lexicals: self.lexicals,
        });
        Ok(())
    }
}
