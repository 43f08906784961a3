//! Lowers template trees to bytecode.
//!
//! A [`CompilationContext`] owns the heap under construction and is threaded
//! explicitly through every [`Template::compile`] call. Each template is
//! compiled into its own [`CodeBuilder`] buffer and appended to the shared
//! heap only once it is complete, so a component compiled halfway through its
//! caller never interleaves with the caller's code.
//!
//! Inner blocks (`let`, `each`, `yield` targets and component blocks) are
//! emitted after the template's main code, in the same buffer.

use ahash::AHashMap;

use super::{
    builder::CodeBuilder,
    op::{Opcode, TrackerKind},
};
use crate::{
    ast::{
        AttrValue, BlockStatement, ConcatPart, ElementNode, Expression, Hash, Literal, MustacheStatement,
        PathExpression, PathHead, Statement, Template,
    },
    error::CompileError,
    limits::CompileOptions,
    program::{BlockId, BlockInfo, Constant, Handle, LayoutId, LayoutInfo, Program, Resolved, Upvar},
    resolver::CompileTimeResolver,
    symbol_table::{Lookup, Symbol, SymbolTable, TableId},
};

/// Shared state of one compilation session.
pub struct CompilationContext<'r> {
    resolver: &'r dyn CompileTimeResolver,
    options: CompileOptions,
    program: Program,
    /// Template serial to its layout, filled before the body compiles.
    memo: AHashMap<u64, LayoutId>,
}

impl std::fmt::Debug for CompilationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationContext")
            .field("options", &self.options)
            .field("heap_len", &self.program.heap.len())
            .field("layouts", &self.program.layouts.len())
            .finish_non_exhaustive()
    }
}

/// Lengths to roll back to when a template fails to compile.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    heap: usize,
    constants: usize,
    layouts: usize,
    blocks: usize,
}

impl<'r> CompilationContext<'r> {
    #[must_use]
    pub fn new(resolver: &'r dyn CompileTimeResolver, options: CompileOptions) -> Self {
        Self {
            resolver,
            options,
            program: Program::default(),
            memo: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> CompileOptions {
        self.options
    }

    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    #[must_use]
    pub fn into_program(self) -> Program {
        self.program
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            heap: self.program.heap.len(),
            constants: self.program.constants.len(),
            layouts: self.program.layouts.len(),
            blocks: self.program.blocks.len(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.program.heap.truncate(checkpoint.heap);
        self.program.constants.truncate(checkpoint.constants);
        self.program.layouts.truncate(checkpoint.layouts);
        self.program.blocks.truncate(checkpoint.blocks);
        let keep = checkpoint.layouts;
        self.memo.retain(|_, layout| (layout.0 as usize) < keep);
    }

    fn intern(&mut self, constant: Constant) -> u32 {
        self.program.constants.intern(constant).0
    }

    /// Compiles `template` (memoized) and returns its layout.
    pub(crate) fn compile_template(&mut self, template: &Template) -> Result<LayoutId, CompileError> {
        if let Some(&layout) = self.memo.get(&template.serial()) {
            return Ok(layout);
        }

        let checkpoint = self.checkpoint();
        let layout = LayoutId(operand(self.program.layouts.len(), "layouts", template)?);
        self.program.layouts.push(LayoutInfo {
            id: template.id.clone(),
            handle: Handle(u32::MAX),
            symbol_count: 0,
            has_eval: false,
            symbols: Vec::new(),
            eval_symbols: None,
            upvars: Vec::new(),
            lexicals: Vec::new(),
            named: indexmap::IndexMap::new(),
            blocks: indexmap::IndexMap::new(),
            referrer: template.meta.clone(),
        });
        self.memo.insert(template.serial(), layout);

        let result = TemplateCompiler::new(self, template, layout).run();
        match result {
            Ok(()) => Ok(layout),
            Err(err) => {
                log::debug!("compiling {} failed: {err}", template.display_name());
                self.rollback(checkpoint);
                Err(err)
            }
        }
    }
}

impl Template {
    /// Appends this template's code to the context's heap and returns its
    /// entry point. Compiling the same template again returns the same handle.
    pub fn compile(&self, ctx: &mut CompilationContext<'_>) -> Result<Handle, CompileError> {
        let layout = ctx.compile_template(self)?;
        Ok(ctx.program.layouts[layout.0 as usize].handle)
    }
}

/// A block whose code is emitted after the template's main code.
#[derive(Clone, Copy)]
struct PendingBlock<'t> {
    id: BlockId,
    table: TableId,
    body: &'t [Statement],
}

struct TemplateCompiler<'c, 'r, 't> {
    ctx: &'c mut CompilationContext<'r>,
    template: &'t Template,
    layout: LayoutId,
    table: SymbolTable,
    code: CodeBuilder,
    upvars: Vec<Upvar>,
    pending: Vec<PendingBlock<'t>>,
    /// This template's blocks and their buffer-relative start.
    block_starts: Vec<(BlockId, usize)>,
}

impl<'c, 'r, 't> TemplateCompiler<'c, 'r, 't> {
    fn new(ctx: &'c mut CompilationContext<'r>, template: &'t Template, layout: LayoutId) -> Self {
        Self {
            ctx,
            template,
            layout,
            table: SymbolTable::top(template.locals.clone()),
            code: CodeBuilder::new(),
            upvars: Vec::new(),
            pending: Vec::new(),
            block_starts: Vec::new(),
        }
    }

    fn run(mut self) -> Result<(), CompileError> {
        let template = self.template;
        self.statements(TableId::ROOT, &template.body)?;
        self.code.emit(Opcode::Return, &[]);

        // blocks compiled here may queue further blocks
        let mut next = 0;
        while let Some(&PendingBlock { id, table, body }) = self.pending.get(next) {
            next += 1;
            let start = self.code.mark_block_start();
            self.block_starts.push((id, start));
            self.statements(table, body)?;
            self.code.emit(Opcode::Return, &[]);
        }

        self.finish()
    }

    fn finish(self) -> Result<(), CompileError> {
        let Self {
            ctx,
            template,
            layout,
            table,
            code,
            upvars,
            block_starts,
            ..
        } = self;

        let code = code.build();
        if table.overflowed() {
            return Err(CompileError::TooLarge {
                what: "symbols",
                template: template.display_name(),
            });
        }
        verify_symbols(&code, table.size())?;

        let base = ctx.program.heap.len();
        operand(base + code.len(), "heap words", template)?;
        ctx.program.heap.extend_from_slice(&code);
        for (id, start) in block_starts {
            if let Some(block) = ctx.program.blocks.get_mut(id.0 as usize) {
                block.start = operand(base + start, "heap words", template)?;
            }
        }

        let handle = Handle(operand(base, "heap words", template)?);
        let has_eval = table.has_eval();
        let info = LayoutInfo {
            id: template.id.clone(),
            handle,
            symbol_count: table.size(),
            has_eval,
            symbols: table.symbols().to_vec(),
            eval_symbols: has_eval.then(|| table.symbols().to_vec()),
            upvars,
            lexicals: table.used_template_locals().to_vec(),
            named: table.named().clone(),
            blocks: table.blocks().clone(),
            referrer: template.meta.clone(),
        };
        log::debug!(
            "compiled {} at {} ({} words, {} symbols)",
            template.display_name(),
            handle.0,
            code.len(),
            info.symbol_count
        );
        if let Some(slot) = ctx.program.layouts.get_mut(layout.0 as usize) {
            *slot = info;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // helpers

    fn template_name(&self) -> String {
        self.template.display_name()
    }

    fn unresolved(&self, name: &str) -> CompileError {
        CompileError::UnresolvedReference {
            name: name.to_owned(),
            template: self.template_name(),
        }
    }

    fn unsupported(&self, construct: &str) -> CompileError {
        CompileError::Unsupported {
            construct: construct.to_owned(),
            template: self.template_name(),
        }
    }

    fn constant(&mut self, constant: Constant) -> u32 {
        self.ctx.intern(constant)
    }

    fn string(&mut self, value: &str) -> u32 {
        self.constant(Constant::Str(value.to_owned()))
    }

    fn names(&mut self, names: Vec<String>) -> u32 {
        self.constant(Constant::Names(names))
    }

    fn upvar(&mut self, name: &str, resolved: Resolved) -> u32 {
        let index = self.table.allocate_free(name);
        if index as usize == self.upvars.len() {
            self.upvars.push(Upvar {
                name: name.to_owned(),
                resolved,
            });
        }
        index
    }

    fn resolve_helper(&mut self, name: &str) -> Option<u32> {
        if let Some(index) = self.known_upvar(name, |resolved| matches!(resolved, Resolved::Helper(_))) {
            return Some(index);
        }
        let handle = self.ctx.resolver.lookup_helper(name, &self.template.meta)?;
        Some(self.upvar(name, Resolved::Helper(handle)))
    }

    fn resolve_component(&mut self, name: &str) -> Result<Option<u32>, CompileError> {
        if let Some(index) = self.known_upvar(name, |resolved| matches!(resolved, Resolved::Component(_))) {
            return Ok(Some(index));
        }
        let Some(layout_template) = self.ctx.resolver.lookup_component(name, &self.template.meta) else {
            return Ok(None);
        };
        let layout = self.ctx.compile_template(&layout_template)?;
        Ok(Some(self.upvar(name, Resolved::Component(layout))))
    }

    fn known_upvar(&self, name: &str, matches: impl Fn(&Resolved) -> bool) -> Option<u32> {
        self.upvars
            .iter()
            .position(|upvar| upvar.name == name && matches(&upvar.resolved))
            .and_then(|i| u32::try_from(i).ok())
    }

    fn push_block(
        &mut self,
        parent: TableId,
        params: &[String],
        body: &'t [Statement],
    ) -> Result<BlockId, CompileError> {
        let id = BlockId(operand(self.ctx.program.blocks.len(), "blocks", self.template)?);
        let table = self.table.child(parent, params);
        let slots = self.table.block_slots(table).to_vec();
        self.ctx.program.blocks.push(BlockInfo {
            start: 0,
            params: slots,
            layout: self.layout,
        });
        self.pending.push(PendingBlock { id, table, body });
        self.code.emit(Opcode::PushBlock, &[id.0]);
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // statements

    fn statements(&mut self, table: TableId, statements: &'t [Statement]) -> Result<(), CompileError> {
        for statement in statements {
            self.statement(table, statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, table: TableId, statement: &'t Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Text(chars) => {
                let c = self.string(chars);
                self.code.emit(Opcode::Text, &[c]);
            }
            Statement::Comment(value) => {
                let c = self.string(value);
                self.code.emit(Opcode::Comment, &[c]);
            }
            Statement::MustacheComment(_) => {}
            Statement::Mustache(mustache) => self.append(table, mustache)?,
            Statement::Block(block) => self.block_statement(table, block)?,
            Statement::Element(el) if el.is_component() => self.component_element(table, el)?,
            Statement::Element(el) if el.named_block().is_some() => {
                return Err(self.unsupported(&format!("<{}> outside a component invocation", el.tag)));
            }
            Statement::Element(el) => self.element(table, el)?,
        }
        Ok(())
    }

    fn append(&mut self, table: TableId, mustache: &'t MustacheStatement) -> Result<(), CompileError> {
        if let Expression::Path(path) = &mustache.path
            && let Some(name) = path.as_bare_var()
            && !self.table.has(table, name)
        {
            match name {
                "yield" => return self.yield_statement(table, &mustache.params, &mustache.hash),
                "debugger" => {
                    self.debugger(table);
                    return Ok(());
                }
                _ => {}
            }

            let has_args = !mustache.params.is_empty() || !mustache.hash.is_empty();
            let is_helper = self.resolve_helper(name).is_some();
            if !is_helper && !is_keyword_helper(name) {
                if let Some(upvar) = self.resolve_component(name)? {
                    if !mustache.params.is_empty() {
                        return Err(self.unsupported(&format!("positional arguments to component `{name}`")));
                    }
                    return self.invoke_component(table, upvar, &mustache.hash, &[]);
                }
                if has_args {
                    return Err(self.unresolved(name));
                }
            }
        }

        self.code.emit(Opcode::Enter, &[TrackerKind::Append as u32]);
        self.mustache_value(table, mustache)?;
        self.code.emit(Opcode::Append, &[u32::from(mustache.trusting)]);
        self.code.emit(Opcode::Exit, &[]);
        Ok(())
    }

    /// Pushes the value of a mustache used as content or attribute value.
    fn mustache_value(&mut self, table: TableId, mustache: &'t MustacheStatement) -> Result<(), CompileError> {
        if mustache.params.is_empty() && mustache.hash.is_empty() {
            return self.expression(table, &mustache.path);
        }
        match &mustache.path {
            Expression::Path(path) => self.call(table, path, &mustache.params, &mustache.hash),
            _ => Err(self.unsupported("arguments after a literal")),
        }
    }

    fn yield_statement(&mut self, table: TableId, params: &'t [Expression], hash: &'t Hash) -> Result<(), CompileError> {
        let to = match hash.get("to") {
            None => "default".to_owned(),
            Some(Expression::Literal(Literal::String(name))) => name.clone(),
            Some(_) => return Err(self.unsupported("non-literal `to` in yield")),
        };
        let symbol = self.table.allocate_block(&to);

        self.code.emit(Opcode::Enter, &[TrackerKind::Yield as u32]);
        for param in params {
            self.expression(table, param)?;
        }
        self.code.emit(Opcode::GetSymbol, &[symbol.raw()]);
        self.code.emit(Opcode::InvokeBlock, &[arg_count(params.len())]);
        self.code.emit(Opcode::Exit, &[]);
        Ok(())
    }

    fn debugger(&mut self, table: TableId) {
        self.table.set_has_eval();
        let locals = self.table.locals_map(table).into_iter().collect();
        let c = self.constant(Constant::Locals(locals));
        self.code.emit(Opcode::Debugger, &[c]);
    }

    fn block_statement(&mut self, table: TableId, block: &'t BlockStatement) -> Result<(), CompileError> {
        let keyword = block.path.as_bare_var().filter(|name| !self.table.has(table, name));
        match keyword {
            Some(name @ ("if" | "unless")) => self.conditional(table, block, name == "unless"),
            Some("each") => self.each(table, block),
            Some("let") => self.let_block(table, block),
            Some(name) => {
                let Some(upvar) = self.resolve_component(name)? else {
                    return Err(self.unresolved(name));
                };
                if !block.params.is_empty() {
                    return Err(self.unsupported(&format!("positional arguments to component `{name}`")));
                }
                let mut blocks: Vec<(&str, &'t [String], &'t [Statement])> =
                    vec![("default", block.program.block_params.as_slice(), block.program.body.as_slice())];
                if let Some(inverse) = &block.inverse {
                    blocks.push(("else", inverse.block_params.as_slice(), inverse.body.as_slice()));
                }
                self.invoke_component(table, upvar, &block.hash, &blocks)
            }
            None => Err(self.unsupported(&format!("block invocation of `{}`", block.path.original()))),
        }
    }

    fn conditional(&mut self, table: TableId, block: &'t BlockStatement, negate: bool) -> Result<(), CompileError> {
        let [condition] = block.params.as_slice() else {
            return Err(self.unsupported("conditional without exactly one condition"));
        };
        if !block.program.block_params.is_empty() {
            return Err(self.unsupported("block params on a conditional"));
        }

        self.code.emit(Opcode::Enter, &[TrackerKind::Conditional as u32]);
        self.expression(table, condition)?;
        let to_inverse = self
            .code
            .emit_jump(if negate { Opcode::JumpIf } else { Opcode::JumpUnless });
        self.statements(table, &block.program.body)?;
        if let Some(inverse) = &block.inverse {
            let to_end = self.code.emit_jump(Opcode::Jump);
            self.code.patch_jump(to_inverse);
            self.statements(table, &inverse.body)?;
            self.code.patch_jump(to_end);
        } else {
            self.code.patch_jump(to_inverse);
        }
        self.code.emit(Opcode::Exit, &[]);
        Ok(())
    }

    fn each(&mut self, table: TableId, block: &'t BlockStatement) -> Result<(), CompileError> {
        let [list] = block.params.as_slice() else {
            return Err(self.unsupported("each without exactly one list"));
        };

        self.code.emit(Opcode::Enter, &[TrackerKind::List as u32]);
        self.expression(table, list)?;
        self.push_block(table, &block.program.block_params, &block.program.body)?;
        match &block.inverse {
            Some(inverse) => {
                self.push_block(table, &[], &inverse.body)?;
            }
            None => {
                let null = self.constant(Constant::Null);
                self.code.emit(Opcode::PushConst, &[null]);
            }
        }
        self.code.emit(Opcode::Each, &[]);
        self.code.emit(Opcode::Exit, &[]);
        Ok(())
    }

    fn let_block(&mut self, table: TableId, block: &'t BlockStatement) -> Result<(), CompileError> {
        if block.params.is_empty() {
            return Err(self.unsupported("let without values"));
        }
        if block.inverse.is_some() {
            return Err(self.unsupported("else block on let"));
        }

        self.code.emit(Opcode::Enter, &[TrackerKind::Let as u32]);
        for param in &block.params {
            self.expression(table, param)?;
        }
        self.push_block(table, &block.program.block_params, &block.program.body)?;
        self.code.emit(Opcode::InvokeBlock, &[arg_count(block.params.len())]);
        self.code.emit(Opcode::Exit, &[]);
        Ok(())
    }

    fn element(&mut self, table: TableId, el: &'t ElementNode) -> Result<(), CompileError> {
        let tag = self.string(&el.tag);
        self.code.emit(Opcode::OpenElement, &[tag]);

        for attr in &el.attributes {
            if attr.name.starts_with('@') {
                return Err(self.unsupported(&format!("argument {} on plain element <{}>", attr.name, el.tag)));
            }
            let name = self.string(&attr.name);
            match &attr.value {
                AttrValue::Text(value) => {
                    let value = self.string(value);
                    self.code.emit(Opcode::StaticAttr, &[name, value]);
                }
                AttrValue::Mustache(mustache) => {
                    self.code.emit(Opcode::Enter, &[TrackerKind::Attribute as u32]);
                    self.mustache_value(table, mustache)?;
                    self.code.emit(Opcode::DynamicAttr, &[name]);
                    self.code.emit(Opcode::Exit, &[]);
                }
                AttrValue::Concat(parts) => {
                    self.code.emit(Opcode::Enter, &[TrackerKind::Attribute as u32]);
                    self.concat(table, parts)?;
                    self.code.emit(Opcode::DynamicAttr, &[name]);
                    self.code.emit(Opcode::Exit, &[]);
                }
            }
        }

        self.statements(table, &el.children)?;
        self.code.emit(Opcode::CloseElement, &[]);
        Ok(())
    }

    fn concat(&mut self, table: TableId, parts: &'t [ConcatPart]) -> Result<(), CompileError> {
        for part in parts {
            match part {
                ConcatPart::Text(chars) => {
                    let c = self.string(chars);
                    self.code.emit(Opcode::PushConst, &[c]);
                }
                ConcatPart::Mustache(mustache) => self.mustache_value(table, mustache)?,
            }
        }
        self.code.emit(Opcode::Concat, &[arg_count(parts.len())]);
        Ok(())
    }

    fn component_element(&mut self, table: TableId, el: &'t ElementNode) -> Result<(), CompileError> {
        let Some(upvar) = self.resolve_component(&el.tag)? else {
            return Err(self.unresolved(&el.tag));
        };

        let mut named_args = Vec::new();
        for attr in &el.attributes {
            if !attr.name.starts_with('@') {
                return Err(self.unsupported(&format!("attribute {} on component <{}>", attr.name, el.tag)));
            }
            named_args.push(attr);
        }

        let has_named_blocks = el
            .children
            .iter()
            .any(|child| matches!(child, Statement::Element(child) if child.named_block().is_some()));
        let mut blocks: Vec<(&str, &'t [String], &'t [Statement])> = Vec::new();
        if has_named_blocks {
            for child in &el.children {
                match child {
                    Statement::Element(child) => match child.named_block() {
                        Some(name) => blocks.push((name, child.block_params.as_slice(), child.children.as_slice())),
                        None => return Err(self.unsupported("content mixed with named blocks")),
                    },
                    Statement::Text(chars) if chars.trim().is_empty() => {}
                    Statement::MustacheComment(_) => {}
                    _ => return Err(self.unsupported("content mixed with named blocks")),
                }
            }
        } else if !el.children.is_empty() {
            blocks.push(("default", el.block_params.as_slice(), el.children.as_slice()));
        }

        self.code.emit(Opcode::Enter, &[TrackerKind::Component as u32]);
        let mut names = Vec::with_capacity(named_args.len());
        for attr in named_args {
            names.push(attr.name.clone());
            match &attr.value {
                AttrValue::Text(value) => {
                    let c = self.string(value);
                    self.code.emit(Opcode::PushConst, &[c]);
                }
                AttrValue::Mustache(mustache) => self.mustache_value(table, mustache)?,
                AttrValue::Concat(parts) => self.concat(table, parts)?,
            }
        }
        self.emit_blocks_and_invoke(table, upvar, names, &blocks)
    }

    /// Curly invocation: hash pairs become `@key` arguments.
    fn invoke_component(
        &mut self,
        table: TableId,
        upvar: u32,
        hash: &'t Hash,
        blocks: &[(&str, &'t [String], &'t [Statement])],
    ) -> Result<(), CompileError> {
        self.code.emit(Opcode::Enter, &[TrackerKind::Component as u32]);
        let mut names = Vec::with_capacity(hash.pairs.len());
        for pair in &hash.pairs {
            names.push(format!("@{}", pair.key));
            self.expression(table, &pair.value)?;
        }
        self.emit_blocks_and_invoke(table, upvar, names, blocks)
    }

    fn emit_blocks_and_invoke(
        &mut self,
        table: TableId,
        upvar: u32,
        names: Vec<String>,
        blocks: &[(&str, &'t [String], &'t [Statement])],
    ) -> Result<(), CompileError> {
        let mut block_names = Vec::with_capacity(blocks.len());
        for &(name, params, body) in blocks {
            let name = if name == "inverse" { "else" } else { name };
            block_names.push(name.to_owned());
            self.push_block(table, params, body)?;
        }
        let names = self.names(names);
        let block_names = self.names(block_names);
        self.code.emit(Opcode::InvokeComponent, &[upvar, names, block_names]);
        self.code.emit(Opcode::Exit, &[]);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // expressions

    fn expression(&mut self, table: TableId, expr: &'t Expression) -> Result<(), CompileError> {
        match expr {
            Expression::Literal(literal) => {
                let c = self.constant(literal_constant(literal));
                self.code.emit(Opcode::PushConst, &[c]);
                Ok(())
            }
            Expression::Path(path) => self.path(table, path),
            Expression::SubExpression(call) => self.call(table, &call.path, &call.params, &call.hash),
        }
    }

    fn path(&mut self, table: TableId, path: &'t PathExpression) -> Result<(), CompileError> {
        match &path.head {
            PathHead::This => self.code.emit(Opcode::GetSymbol, &[Symbol::SELF.raw()]),
            PathHead::Arg(name) => {
                let symbol = self.table.allocate_named(&format!("@{name}"));
                self.code.emit(Opcode::GetSymbol, &[symbol.raw()]);
            }
            PathHead::Var(name) => {
                if self.table.has(table, name) {
                    self.lookup(table, name);
                } else if path.tail.is_empty() && name == "has-block" {
                    let symbol = self.table.allocate_block("default");
                    self.code.emit(Opcode::HasBlock, &[symbol.raw()]);
                } else if let Some(upvar) = path.tail.is_empty().then(|| self.resolve_helper(name)).flatten() {
                    let names = self.names(Vec::new());
                    self.code.emit(Opcode::Helper, &[upvar, 0, names]);
                } else if self.ctx.options.strict {
                    return Err(self.unresolved(name));
                } else {
                    self.lookup(table, name);
                }
            }
        }
        for segment in &path.tail {
            let c = self.string(segment);
            self.code.emit(Opcode::GetProperty, &[c]);
        }
        Ok(())
    }

    fn lookup(&mut self, table: TableId, name: &str) {
        match self.table.get(table, name) {
            Lookup::Local(symbol) => self.code.emit(Opcode::GetSymbol, &[symbol.raw()]),
            Lookup::Lexical(index) => self.code.emit(Opcode::GetLexical, &[index]),
        }
    }

    fn call(
        &mut self,
        table: TableId,
        path: &'t PathExpression,
        params: &'t [Expression],
        hash: &'t Hash,
    ) -> Result<(), CompileError> {
        let Some(name) = path.as_bare_var() else {
            return Err(self.unsupported(&format!("call through path `{}`", path.original())));
        };

        if !self.table.has(table, name) {
            match name {
                "has-block" => return self.has_block(params),
                "if" | "unless" => return self.inline_if(table, params, name == "unless"),
                _ => {}
            }
        }

        let Some(upvar) = self.resolve_helper(name) else {
            return Err(self.unresolved(name));
        };
        for param in params {
            self.expression(table, param)?;
        }
        let mut names = Vec::with_capacity(hash.pairs.len());
        for pair in &hash.pairs {
            names.push(pair.key.clone());
            self.expression(table, &pair.value)?;
        }
        let names = self.names(names);
        self.code.emit(Opcode::Helper, &[upvar, arg_count(params.len()), names]);
        Ok(())
    }

    fn has_block(&mut self, params: &[Expression]) -> Result<(), CompileError> {
        let name = match params {
            [] => "default",
            [Expression::Literal(Literal::String(name))] => name.as_str(),
            _ => return Err(self.unsupported("has-block with a non-literal name")),
        };
        let symbol = self.table.allocate_block(name);
        self.code.emit(Opcode::HasBlock, &[symbol.raw()]);
        Ok(())
    }

    fn inline_if(&mut self, table: TableId, params: &'t [Expression], negate: bool) -> Result<(), CompileError> {
        let (condition, truthy, falsy) = match params {
            [c, t] => (c, t, None),
            [c, t, f] => (c, t, Some(f)),
            _ => return Err(self.unsupported("inline if without two or three arguments")),
        };
        self.expression(table, condition)?;
        let to_falsy = self
            .code
            .emit_jump(if negate { Opcode::JumpIf } else { Opcode::JumpUnless });
        self.expression(table, truthy)?;
        let to_end = self.code.emit_jump(Opcode::Jump);
        self.code.patch_jump(to_falsy);
        match falsy {
            Some(falsy) => self.expression(table, falsy)?,
            None => {
                let undefined = self.constant(Constant::Undefined);
                self.code.emit(Opcode::PushConst, &[undefined]);
            }
        }
        self.code.patch_jump(to_end);
        Ok(())
    }
}

/// Names that act as built-in helpers in call position.
fn is_keyword_helper(name: &str) -> bool {
    matches!(name, "has-block" | "if" | "unless")
}

fn literal_constant(literal: &Literal) -> Constant {
    match literal {
        Literal::String(value) => Constant::Str(value.clone()),
        Literal::Boolean(value) => Constant::Bool(*value),
        Literal::Number(value) => Constant::Number(*value),
        Literal::Undefined => Constant::Undefined,
        Literal::Null => Constant::Null,
    }
}

/// Converts a table index or heap offset into a 32-bit id.
fn operand(index: usize, what: &'static str, template: &Template) -> Result<u32, CompileError> {
    u32::try_from(index).map_err(|_| CompileError::TooLarge {
        what,
        template: template.display_name(),
    })
}

fn arg_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Checks that every slot operand lies inside the root allocator's range.
fn verify_symbols(code: &[u32], size: u32) -> Result<(), CompileError> {
    let mut ip = 0;
    while ip < code.len() {
        let Some(op) = Opcode::decode(code[ip]) else {
            break;
        };
        if matches!(op, Opcode::GetSymbol | Opcode::HasBlock)
            && let Some(&symbol) = code.get(ip + 1)
            && symbol >= size
        {
            return Err(CompileError::SymbolCountMismatch {
                expected: size,
                found: symbol,
            });
        }
        ip += op.width();
    }
    Ok(())
}
