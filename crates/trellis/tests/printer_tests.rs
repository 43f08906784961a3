//! Tests for printing template trees back to source.

use pretty_assertions::assert_eq;
use trellis::{
    Template,
    ast::{
        Block, BlockStatement, ConcatPart, ElementNode, Expression, Literal, MustacheStatement, Statement, StripFlags,
        attr, boolean, comment, concat_attr, dynamic_attr, each_block, element, element_with, hash_of, if_block,
        mustache, mustache_call, number, path, path_expr, sexpr, string, text, triple,
    },
    print,
    printer::{EntityEncoding, NodeRef, Printer, PrinterOptions},
};

fn print_with(template: &Template, options: PrinterOptions) -> String {
    Printer::new(options).print(NodeRef::Template(template))
}

#[test]
fn elements_and_attributes() {
    let template = Template::new(vec![element_with(
        "div",
        vec![
            attr("class", "box"),
            dynamic_attr("id", path("this.id")),
            concat_attr(
                "title",
                vec![
                    ConcatPart::Text("Hi ".to_owned()),
                    ConcatPart::Mustache(MustacheStatement {
                        path: path("@name"),
                        params: vec![],
                        hash: hash_of(vec![]),
                        trusting: false,
                        strip: StripFlags::default(),
                    }),
                ],
            ),
        ],
        vec![text("hello"), element_with("input", vec![attr("disabled", "")], vec![])],
    )]);
    assert_eq!(
        print(&template),
        r#"<div class="box" id={{this.id}} title="Hi {{@name}}">hello<input disabled></div>"#
    );
}

#[test]
fn self_closing_component_keeps_its_slash() {
    let template = Template::new(vec![Statement::Element(ElementNode {
        tag: "Card".to_owned(),
        attributes: vec![attr("@title", "x")],
        block_params: Vec::new(),
        children: Vec::new(),
        self_closing: true,
        comments: vec![" note ".to_owned()],
    })]);
    assert_eq!(print(&template), r#"<Card @title="x" {{!-- note --}} />"#);
}

#[test]
fn element_block_params() {
    let template = Template::new(vec![Statement::Element(ElementNode {
        tag: "List".to_owned(),
        attributes: Vec::new(),
        block_params: vec!["item".to_owned(), "i".to_owned()],
        children: vec![mustache(path("item"))],
        self_closing: false,
        comments: Vec::new(),
    })]);
    assert_eq!(print(&template), "<List as |item i|>{{item}}</List>");
}

#[test]
fn blocks_with_params_and_inverse() {
    let template = Template::new(vec![
        each_block(path("this.items"), &["item", "i"], vec![mustache(path("item"))], Some(vec![text("none")])),
        if_block(path("@show"), vec![text("y")], None),
    ]);
    assert_eq!(
        print(&template),
        "{{#each this.items as |item i|}}{{item}}{{else}}none{{/each}}{{#if @show}}y{{/if}}"
    );
}

#[test]
fn else_if_chains_print_without_their_own_opener() {
    let Statement::Block(mut inner) = if_block(path("b"), vec![text("B")], Some(vec![text("C")])) else {
        panic!("expected a block statement");
    };
    inner.chained = true;
    let outer = Statement::Block(BlockStatement {
        inverse: Some(Block {
            body: vec![Statement::Block(inner)],
            block_params: Vec::new(),
            chained: true,
        }),
        ..block_body(if_block(path("a"), vec![text("A")], None))
    });
    assert_eq!(
        print(&Template::new(vec![outer])),
        "{{#if a}}A{{else if b}}B{{else}}C{{/if}}"
    );
}

fn block_body(statement: Statement) -> BlockStatement {
    match statement {
        Statement::Block(block) => block,
        other => panic!("expected a block statement, got {other:?}"),
    }
}

#[test]
fn strip_flags_add_tildes() {
    let mut block = block_body(if_block(path("a"), vec![text("x")], Some(vec![text("y")])));
    block.open_strip = StripFlags { open: true, close: false };
    block.inverse_strip = StripFlags { open: true, close: true };
    block.close_strip = StripFlags { open: false, close: true };
    let template = Template::new(vec![
        Statement::Block(block),
        Statement::Mustache(MustacheStatement {
            path: path("z"),
            params: vec![],
            hash: hash_of(vec![]),
            trusting: false,
            strip: StripFlags { open: true, close: true },
        }),
    ]);
    assert_eq!(print(&template), "{{~#if a}}x{{~else~}}y{{/if~}}{{~z~}}");
}

#[test]
fn literals_params_and_hashes() {
    let template = Template::new(vec![mustache_call(
        path("format"),
        vec![
            string("say \"hi\""),
            number(1.5),
            number(3.0),
            boolean(true),
            Expression::Literal(Literal::Null),
            Expression::Literal(Literal::Undefined),
        ],
        vec![("with", sexpr("concat", vec![path("this.a")], vec![("sep", string("-"))]))],
    )]);
    assert_eq!(
        print(&template),
        r#"{{format "say \"hi\"" 1.5 3 true null undefined with=(concat this.a sep="-")}}"#
    );
}

#[test]
fn triples_and_comments() {
    let template = Template::new(vec![
        triple(path("this.html")),
        comment(" visible "),
        Statement::MustacheComment(" hidden ".to_owned()),
    ]);
    assert_eq!(print(&template), "{{{this.html}}}<!-- visible -->{{!-- hidden --}}");
}

#[test]
fn transformed_encoding_escapes_text_and_attributes() {
    let template = Template::new(vec![element_with(
        "p",
        vec![attr("title", "a \"b\" & <c>")],
        vec![text("1 < 2 & 3 > 2\u{a0}!")],
    )]);
    assert_eq!(
        print(&template),
        r#"<p title="a &quot;b&quot; &amp; <c>">1 &lt; 2 &amp; 3 &gt; 2&nbsp;!</p>"#
    );
}

#[test]
fn raw_encoding_writes_text_verbatim() {
    let template = Template::new(vec![element_with("p", vec![attr("title", "&amp;")], vec![text("&lt;b&gt;")])]);
    let printed = print_with(
        &template,
        PrinterOptions {
            entity_encoding: EntityEncoding::Raw,
            override_hook: None,
        },
    );
    assert_eq!(printed, r#"<p title="&amp;">&lt;b&gt;</p>"#);
}

#[test]
fn override_hook_replaces_matching_nodes() {
    let template = Template::new(vec![element(
        "p",
        vec![mustache(path("this.name")), mustache(path("this.other"))],
    )]);
    let printed = print_with(
        &template,
        PrinterOptions {
            entity_encoding: EntityEncoding::Transformed,
            override_hook: Some(Box::new(|node: NodeRef<'_>, _: EntityEncoding| match node {
                NodeRef::Path(p) if *p == path_expr("this.name") => Some("@name".to_owned()),
                _ => None,
            })),
        },
    );
    assert_eq!(printed, "<p>{{@name}}{{this.other}}</p>");
}

#[test]
fn overridden_hash_gets_leading_whitespace() {
    let template = Template::new(vec![mustache_call(path("t"), vec![string("key")], vec![("locale", string("en"))])]);
    let printed = print_with(
        &template,
        PrinterOptions {
            entity_encoding: EntityEncoding::Transformed,
            override_hook: Some(Box::new(|node: NodeRef<'_>, _: EntityEncoding| match node {
                NodeRef::Hash(hash) if !hash.is_empty() => Some(r#"locale="fr""#.to_owned()),
                _ => None,
            })),
        },
    );
    assert_eq!(printed, r#"{{t "key" locale="fr"}}"#);
}

#[test]
fn override_at_the_root_short_circuits() {
    let template = Template::new(vec![text("ignored")]);
    let printed = print_with(
        &template,
        PrinterOptions {
            entity_encoding: EntityEncoding::Raw,
            override_hook: Some(Box::new(|node: NodeRef<'_>, encoding: EntityEncoding| {
                matches!(node, NodeRef::Template(_)).then(|| format!("{encoding:?}"))
            })),
        },
    );
    assert_eq!(printed, "Raw");
}
