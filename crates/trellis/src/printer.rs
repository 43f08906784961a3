//! Prints a template tree back to template source.
//!
//! Mostly useful for tooling: codemods that edit a tree and want to keep
//! untouched nodes byte-for-byte can do so through the override hook.

use std::fmt;

use crate::{
    ast::{
        AttrNode, AttrValue, Block, BlockStatement, Call, ConcatPart, ElementNode, Expression, Hash, HashPair, Literal,
        MustacheStatement, PathExpression, Statement, Template,
    },
    dom::is_void_element,
    value::format_number,
};

/// How text content is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntityEncoding {
    /// Escape characters that would change meaning when re-read.
    #[default]
    Transformed,
    /// Write text exactly as stored.
    Raw,
}

/// Any node the printer visits, as handed to the override hook.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Template(&'a Template),
    Block(&'a Block),
    Statement(&'a Statement),
    Text(&'a str),
    Element(&'a ElementNode),
    Attr(&'a AttrNode),
    Concat(&'a [ConcatPart]),
    Mustache(&'a MustacheStatement),
    BlockStatement(&'a BlockStatement),
    MustacheComment(&'a str),
    Comment(&'a str),
    Expression(&'a Expression),
    Path(&'a PathExpression),
    SubExpression(&'a Call),
    Literal(&'a Literal),
    Hash(&'a Hash),
    HashPair(&'a HashPair),
}

/// Replacement hook: return `Some(text)` to print a node yourself.
pub type OverrideHook = Box<dyn Fn(NodeRef<'_>, EntityEncoding) -> Option<String>>;

#[derive(Default)]
pub struct PrinterOptions {
    pub entity_encoding: EntityEncoding,
    pub override_hook: Option<OverrideHook>,
}

impl fmt::Debug for PrinterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrinterOptions")
            .field("entity_encoding", &self.entity_encoding)
            .field("override_hook", &self.override_hook.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct Printer {
    buffer: String,
    options: PrinterOptions,
}

impl Printer {
    #[must_use]
    pub fn new(options: PrinterOptions) -> Self {
        Self {
            buffer: String::new(),
            options,
        }
    }

    /// Prints `node` and everything below it.
    pub fn print(&mut self, node: NodeRef<'_>) -> String {
        if let Some(result) = self.overridden(node) {
            return result;
        }
        self.buffer.clear();
        self.node(node);
        std::mem::take(&mut self.buffer)
    }

    fn overridden(&self, node: NodeRef<'_>) -> Option<String> {
        let hook = self.options.override_hook.as_ref()?;
        hook(node, self.options.entity_encoding)
    }

    fn handled_by_override(&mut self, node: NodeRef<'_>, ensure_leading_whitespace: bool) -> bool {
        let Some(mut result) = self.overridden(node) else {
            return false;
        };
        if ensure_leading_whitespace && result.chars().next().is_some_and(|c| !c.is_whitespace()) {
            result.insert(0, ' ');
        }
        self.buffer.push_str(&result);
        true
    }

    fn node(&mut self, node: NodeRef<'_>) {
        match node {
            NodeRef::Template(template) => self.template(template),
            NodeRef::Block(block) => self.block(block),
            NodeRef::Statement(statement) => self.statement(statement, false),
            NodeRef::Text(chars) => self.text(chars, false),
            NodeRef::Element(el) => self.element(el),
            NodeRef::Attr(attr) => self.attr(attr),
            NodeRef::Concat(parts) => self.concat(parts),
            NodeRef::Mustache(mustache) => self.mustache(mustache),
            NodeRef::BlockStatement(block) => self.block_statement(block, false),
            NodeRef::MustacheComment(value) => self.mustache_comment(value),
            NodeRef::Comment(value) => self.comment(value),
            NodeRef::Expression(expr) => self.expression(expr),
            NodeRef::Path(path) => self.path(path),
            NodeRef::SubExpression(call) => self.sub_expression(call),
            NodeRef::Literal(literal) => self.literal(literal),
            NodeRef::Hash(hash) => self.hash(hash),
            NodeRef::HashPair(pair) => self.hash_pair(pair),
        }
    }

    fn template(&mut self, template: &Template) {
        if self.handled_by_override(NodeRef::Template(template), false) {
            return;
        }
        self.statements(&template.body, false);
    }

    fn block(&mut self, block: &Block) {
        if self.handled_by_override(NodeRef::Block(block), false) {
            return;
        }
        // a chained block holds the `if` of an `{{else if}}`; it prints without its own opener
        self.statements(&block.body, block.chained);
    }

    fn statements(&mut self, statements: &[Statement], chained_first: bool) {
        for (i, statement) in statements.iter().enumerate() {
            self.statement(statement, chained_first && i == 0);
        }
    }

    fn statement(&mut self, statement: &Statement, chained: bool) {
        match statement {
            Statement::Text(chars) => self.text(chars, false),
            Statement::Comment(value) => self.comment(value),
            Statement::MustacheComment(value) => self.mustache_comment(value),
            Statement::Mustache(mustache) => self.mustache(mustache),
            Statement::Block(block) => self.block_statement(block, chained),
            Statement::Element(el) => self.element(el),
        }
    }

    fn element(&mut self, el: &ElementNode) {
        if self.handled_by_override(NodeRef::Element(el), false) {
            return;
        }
        self.open_element(el);
        self.statements(&el.children, false);
        self.close_element(el);
    }

    fn open_element(&mut self, el: &ElementNode) {
        self.buffer.push('<');
        self.buffer.push_str(&el.tag);
        for attr in &el.attributes {
            self.buffer.push(' ');
            self.attr(attr);
        }
        for comment in &el.comments {
            self.buffer.push(' ');
            self.mustache_comment(comment);
        }
        if !el.block_params.is_empty() {
            self.block_params(&el.block_params);
        }
        if el.self_closing {
            self.buffer.push_str(" /");
        }
        self.buffer.push('>');
    }

    fn close_element(&mut self, el: &ElementNode) {
        if el.self_closing || is_void_element(&el.tag.to_ascii_lowercase()) {
            return;
        }
        self.buffer.push_str("</");
        self.buffer.push_str(&el.tag);
        self.buffer.push('>');
    }

    fn attr(&mut self, attr: &AttrNode) {
        if self.handled_by_override(NodeRef::Attr(attr), false) {
            return;
        }
        self.buffer.push_str(&attr.name);
        match &attr.value {
            AttrValue::Text(chars) if chars.is_empty() => {}
            AttrValue::Text(chars) => {
                self.buffer.push_str("=\"");
                self.text(chars, true);
                self.buffer.push('"');
            }
            AttrValue::Mustache(mustache) => {
                self.buffer.push('=');
                self.mustache(mustache);
            }
            AttrValue::Concat(parts) => {
                self.buffer.push('=');
                self.concat(parts);
            }
        }
    }

    fn text(&mut self, chars: &str, is_attr: bool) {
        if self.handled_by_override(NodeRef::Text(chars), false) {
            return;
        }
        match self.options.entity_encoding {
            EntityEncoding::Raw => self.buffer.push_str(chars),
            EntityEncoding::Transformed if is_attr => escape_attr_value(chars, &mut self.buffer),
            EntityEncoding::Transformed => escape_text(chars, &mut self.buffer),
        }
    }

    fn mustache(&mut self, mustache: &MustacheStatement) {
        if self.handled_by_override(NodeRef::Mustache(mustache), false) {
            return;
        }
        self.buffer.push_str(if mustache.trusting { "{{{" } else { "{{" });
        if mustache.strip.open {
            self.buffer.push('~');
        }
        self.expression(&mustache.path);
        self.params(&mustache.params);
        self.hash(&mustache.hash);
        if mustache.strip.close {
            self.buffer.push('~');
        }
        self.buffer.push_str(if mustache.trusting { "}}}" } else { "}}" });
    }

    fn block_statement(&mut self, block: &BlockStatement, forwarded_chain: bool) {
        if self.handled_by_override(NodeRef::BlockStatement(block), false) {
            return;
        }
        let chained = block.chained || forwarded_chain;

        if chained {
            self.buffer.push_str(if block.inverse_strip.open { "{{~" } else { "{{" });
            self.buffer.push_str("else ");
        } else {
            self.buffer.push_str(if block.open_strip.open { "{{~#" } else { "{{#" });
        }

        self.path(&block.path);
        self.params(&block.params);
        self.hash(&block.hash);
        if !block.program.block_params.is_empty() {
            self.block_params(&block.program.block_params);
        }

        let close = if chained { block.inverse_strip.close } else { block.open_strip.close };
        self.buffer.push_str(if close { "~}}" } else { "}}" });

        self.block(&block.program);

        if let Some(inverse) = &block.inverse {
            if !inverse.chained {
                self.buffer.push_str(if block.inverse_strip.open { "{{~" } else { "{{" });
                self.buffer.push_str("else");
                self.buffer.push_str(if block.inverse_strip.close { "~}}" } else { "}}" });
            }
            self.block(inverse);
        }

        if !chained {
            self.buffer.push_str(if block.close_strip.open { "{{~/" } else { "{{/" });
            self.path(&block.path);
            self.buffer.push_str(if block.close_strip.close { "~}}" } else { "}}" });
        }
    }

    fn block_params(&mut self, params: &[String]) {
        self.buffer.push_str(" as |");
        self.buffer.push_str(&params.join(" "));
        self.buffer.push('|');
    }

    fn concat(&mut self, parts: &[ConcatPart]) {
        if self.handled_by_override(NodeRef::Concat(parts), false) {
            return;
        }
        self.buffer.push('"');
        for part in parts {
            match part {
                ConcatPart::Text(chars) => self.text(chars, true),
                ConcatPart::Mustache(mustache) => self.mustache(mustache),
            }
        }
        self.buffer.push('"');
    }

    fn mustache_comment(&mut self, value: &str) {
        if self.handled_by_override(NodeRef::MustacheComment(value), false) {
            return;
        }
        self.buffer.push_str("{{!--");
        self.buffer.push_str(value);
        self.buffer.push_str("--}}");
    }

    fn comment(&mut self, value: &str) {
        if self.handled_by_override(NodeRef::Comment(value), false) {
            return;
        }
        self.buffer.push_str("<!--");
        self.buffer.push_str(value);
        self.buffer.push_str("-->");
    }

    fn expression(&mut self, expr: &Expression) {
        if self.handled_by_override(NodeRef::Expression(expr), false) {
            return;
        }
        match expr {
            Expression::Literal(literal) => self.literal(literal),
            Expression::Path(path) => self.path(path),
            Expression::SubExpression(call) => self.sub_expression(call),
        }
    }

    fn path(&mut self, path: &PathExpression) {
        if self.handled_by_override(NodeRef::Path(path), false) {
            return;
        }
        self.buffer.push_str(&path.original());
    }

    fn sub_expression(&mut self, call: &Call) {
        if self.handled_by_override(NodeRef::SubExpression(call), false) {
            return;
        }
        self.buffer.push('(');
        self.path(&call.path);
        self.params(&call.params);
        self.hash(&call.hash);
        self.buffer.push(')');
    }

    fn params(&mut self, params: &[Expression]) {
        for param in params {
            self.buffer.push(' ');
            self.expression(param);
        }
    }

    fn hash(&mut self, hash: &Hash) {
        if self.handled_by_override(NodeRef::Hash(hash), true) {
            return;
        }
        for pair in &hash.pairs {
            self.buffer.push(' ');
            self.hash_pair(pair);
        }
    }

    fn hash_pair(&mut self, pair: &HashPair) {
        if self.handled_by_override(NodeRef::HashPair(pair), false) {
            return;
        }
        self.buffer.push_str(&pair.key);
        self.buffer.push('=');
        self.expression(&pair.value);
    }

    fn literal(&mut self, literal: &Literal) {
        if self.handled_by_override(NodeRef::Literal(literal), false) {
            return;
        }
        match literal {
            Literal::String(value) => {
                // JSON quoting cannot fail for a plain string
                let quoted = serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""));
                self.buffer.push_str(&quoted);
            }
            Literal::Boolean(value) => self.buffer.push_str(if *value { "true" } else { "false" }),
            Literal::Number(value) => self.buffer.push_str(&format_number(*value)),
            Literal::Undefined => self.buffer.push_str("undefined"),
            Literal::Null => self.buffer.push_str("null"),
        }
    }
}

/// Prints a whole template with default options.
#[must_use]
pub fn print(template: &Template) -> String {
    Printer::new(PrinterOptions::default()).print(NodeRef::Template(template))
}

fn escape_text(chars: &str, out: &mut String) {
    for c in chars.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr_value(chars: &str, out: &mut String) {
    for c in chars.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}
