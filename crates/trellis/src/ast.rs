//! Template syntax tree.
//!
//! Trees are assembled directly (there is no source parser in this crate).
//! The free functions at the bottom of the module keep hand-built trees short:
//!
//! ```
//! use trellis::ast::{element, mustache, path, text, Template};
//!
//! let template = Template::new(vec![element("p", vec![text("Hello "), mustache(path("this.name"))])]);
//! assert_eq!(template.body.len(), 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::resolver::TemplateMeta;

static NEXT_TEMPLATE_SERIAL: AtomicU64 = AtomicU64::new(1);

/// A compilable template.
///
/// Every `Template::new` call gets a fresh serial. Clones keep the serial and
/// so count as the same template when compiled.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: Option<String>,
    pub body: Vec<Statement>,
    /// Outer locals declared for this template.
    pub locals: Vec<String>,
    pub meta: TemplateMeta,
    serial: u64,
}

impl Template {
    #[must_use]
    pub fn new(body: Vec<Statement>) -> Self {
        Self {
            id: None,
            body,
            locals: Vec::new(),
            meta: TemplateMeta::default(),
            serial: NEXT_TEMPLATE_SERIAL.fetch_add(1, Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_locals(mut self, locals: &[&str]) -> Self {
        self.locals = locals.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: TemplateMeta) -> Self {
        self.meta = meta;
        self
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    /// Human readable identity used in error messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (&self.id, &self.meta.module_name) {
            (Some(id), _) => id.clone(),
            (None, Some(module)) => module.clone(),
            (None, None) => format!("<template {}>", self.serial),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Text(String),
    /// `<!-- ... -->`, rendered into the output.
    Comment(String),
    /// `{{!-- ... --}}`, dropped at compile time.
    MustacheComment(String),
    Mustache(MustacheStatement),
    Block(BlockStatement),
    Element(ElementNode),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripFlags {
    pub open: bool,
    pub close: bool,
}

/// `{{path params hash}}`, or `{{{...}}}` when `trusting`.
#[derive(Debug, Clone, PartialEq)]
pub struct MustacheStatement {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Hash,
    pub trusting: bool,
    pub strip: StripFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub path: PathExpression,
    pub params: Vec<Expression>,
    pub hash: Hash,
    pub program: Block,
    pub inverse: Option<Block>,
    /// Set on the `if` of an `{{else if}}` chain.
    pub chained: bool,
    pub open_strip: StripFlags,
    pub inverse_strip: StripFlags,
    pub close_strip: StripFlags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub body: Vec<Statement>,
    pub block_params: Vec<String>,
    pub chained: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub tag: String,
    pub attributes: Vec<AttrNode>,
    pub block_params: Vec<String>,
    pub children: Vec<Statement>,
    pub self_closing: bool,
    pub comments: Vec<String>,
}

impl ElementNode {
    /// Uppercase tags invoke components.
    #[must_use]
    pub fn is_component(&self) -> bool {
        self.tag.chars().next().is_some_and(char::is_uppercase)
    }

    /// `<:name>` children of a component invocation.
    #[must_use]
    pub fn named_block(&self) -> Option<&str> {
        self.tag.strip_prefix(':')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttrNode {
    pub name: String,
    pub value: AttrValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Mustache(MustacheStatement),
    Concat(Vec<ConcatPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConcatPart {
    Text(String),
    Mustache(MustacheStatement),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Path(PathExpression),
    SubExpression(Call),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Boolean(bool),
    Number(f64),
    Undefined,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathHead {
    This,
    /// `@name`, stored without the sigil.
    Arg(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpression {
    pub head: PathHead,
    pub tail: Vec<String>,
}

impl PathExpression {
    /// The path as it would be written in source.
    #[must_use]
    pub fn original(&self) -> String {
        let mut out = match &self.head {
            PathHead::This => "this".to_owned(),
            PathHead::Arg(name) => format!("@{name}"),
            PathHead::Var(name) => name.clone(),
        };
        for segment in &self.tail {
            out.push('.');
            out.push_str(segment);
        }
        out
    }

    /// The head name when this is a bare identifier such as `if` or `my-helper`.
    #[must_use]
    pub fn as_bare_var(&self) -> Option<&str> {
        match &self.head {
            PathHead::Var(name) if self.tail.is_empty() => Some(name),
            _ => None,
        }
    }
}

/// A helper invocation: `(path params hash)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub path: PathExpression,
    pub params: Vec<Expression>,
    pub hash: Hash,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hash {
    pub pairs: Vec<HashPair>,
}

impl Hash {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Expression> {
        self.pairs.iter().find(|pair| pair.key == key).map(|pair| &pair.value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: String,
    pub value: Expression,
}

// ---------------------------------------------------------------------------
// construction helpers

/// Parses a dotted path: `this.a.b`, `@arg.x` or `name.x`.
#[must_use]
pub fn path_expr(original: &str) -> PathExpression {
    let mut parts = original.split('.');
    let first = parts.next().unwrap_or_default();
    let head = if first == "this" {
        PathHead::This
    } else if let Some(arg) = first.strip_prefix('@') {
        PathHead::Arg(arg.to_owned())
    } else {
        PathHead::Var(first.to_owned())
    };
    PathExpression {
        head,
        tail: parts.map(str::to_owned).collect(),
    }
}

#[must_use]
pub fn path(original: &str) -> Expression {
    Expression::Path(path_expr(original))
}

#[must_use]
pub fn string(value: &str) -> Expression {
    Expression::Literal(Literal::String(value.to_owned()))
}

#[must_use]
pub fn number(value: f64) -> Expression {
    Expression::Literal(Literal::Number(value))
}

#[must_use]
pub fn boolean(value: bool) -> Expression {
    Expression::Literal(Literal::Boolean(value))
}

#[must_use]
pub fn sexpr(name: &str, params: Vec<Expression>, hash: Vec<(&str, Expression)>) -> Expression {
    Expression::SubExpression(Call {
        path: path_expr(name),
        params,
        hash: hash_of(hash),
    })
}

#[must_use]
pub fn hash_of(pairs: Vec<(&str, Expression)>) -> Hash {
    Hash {
        pairs: pairs
            .into_iter()
            .map(|(key, value)| HashPair {
                key: key.to_owned(),
                value,
            })
            .collect(),
    }
}

#[must_use]
pub fn text(chars: &str) -> Statement {
    Statement::Text(chars.to_owned())
}

#[must_use]
pub fn comment(value: &str) -> Statement {
    Statement::Comment(value.to_owned())
}

#[must_use]
pub fn mustache(expr: Expression) -> Statement {
    mustache_call(expr, vec![], vec![])
}

#[must_use]
pub fn mustache_call(expr: Expression, params: Vec<Expression>, hash: Vec<(&str, Expression)>) -> Statement {
    Statement::Mustache(MustacheStatement {
        path: expr,
        params,
        hash: hash_of(hash),
        trusting: false,
        strip: StripFlags::default(),
    })
}

/// `{{{expr}}}`
#[must_use]
pub fn triple(expr: Expression) -> Statement {
    Statement::Mustache(MustacheStatement {
        path: expr,
        params: vec![],
        hash: Hash::default(),
        trusting: true,
        strip: StripFlags::default(),
    })
}

#[must_use]
pub fn block(
    name: &str,
    params: Vec<Expression>,
    hash: Vec<(&str, Expression)>,
    block_params: &[&str],
    body: Vec<Statement>,
    inverse: Option<Vec<Statement>>,
) -> Statement {
    Statement::Block(BlockStatement {
        path: path_expr(name),
        params,
        hash: hash_of(hash),
        program: Block {
            body,
            block_params: block_params.iter().map(|s| (*s).to_owned()).collect(),
            chained: false,
        },
        inverse: inverse.map(|body| Block {
            body,
            block_params: Vec::new(),
            chained: false,
        }),
        chained: false,
        open_strip: StripFlags::default(),
        inverse_strip: StripFlags::default(),
        close_strip: StripFlags::default(),
    })
}

/// `{{#if cond}}body{{else}}inverse{{/if}}`
#[must_use]
pub fn if_block(cond: Expression, body: Vec<Statement>, inverse: Option<Vec<Statement>>) -> Statement {
    block("if", vec![cond], vec![], &[], body, inverse)
}

/// `{{#each list as |item index|}}body{{else}}inverse{{/each}}`
#[must_use]
pub fn each_block(
    list: Expression,
    block_params: &[&str],
    body: Vec<Statement>,
    inverse: Option<Vec<Statement>>,
) -> Statement {
    block("each", vec![list], vec![], block_params, body, inverse)
}

#[must_use]
pub fn element(tag: &str, children: Vec<Statement>) -> Statement {
    element_with(tag, vec![], children)
}

#[must_use]
pub fn element_with(tag: &str, attributes: Vec<AttrNode>, children: Vec<Statement>) -> Statement {
    Statement::Element(ElementNode {
        tag: tag.to_owned(),
        attributes,
        block_params: Vec::new(),
        children,
        self_closing: false,
        comments: Vec::new(),
    })
}

#[must_use]
pub fn attr(name: &str, value: &str) -> AttrNode {
    AttrNode {
        name: name.to_owned(),
        value: AttrValue::Text(value.to_owned()),
    }
}

#[must_use]
pub fn dynamic_attr(name: &str, expr: Expression) -> AttrNode {
    AttrNode {
        name: name.to_owned(),
        value: AttrValue::Mustache(MustacheStatement {
            path: expr,
            params: vec![],
            hash: Hash::default(),
            trusting: false,
            strip: StripFlags::default(),
        }),
    }
}

#[must_use]
pub fn concat_attr(name: &str, parts: Vec<ConcatPart>) -> AttrNode {
    AttrNode {
        name: name.to_owned(),
        value: AttrValue::Concat(parts),
    }
}
