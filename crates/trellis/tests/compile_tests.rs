//! Tests for the template compiler: symbol allocation, upvars, memoization
//! and rollback of failed compiles.

use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;
use trellis::{
    CompilationContext, CompileError, CompileOptions, CompileTimeResolver, Constant, HelperHandle, Opcode, Registry,
    Template, TemplateMeta, Value,
    ast::{block, each_block, element, element_with, if_block, mustache, mustache_call, number, path, string, text},
    helper_fn,
};

fn registry_with_shout() -> Registry {
    let mut registry = Registry::new();
    registry.register_helper("shout", helper_fn(|args, _| Ok(Value::from(args.at(0).to_string().to_uppercase()))));
    registry
}

fn lengths(ctx: &CompilationContext<'_>) -> (usize, usize, usize, usize) {
    let program = ctx.program();
    (
        program.heap().len(),
        program.constants().len(),
        program.layouts().len(),
        program.blocks().len(),
    )
}

#[test]
fn symbols_are_numbered_in_allocation_order() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let template = Template::new(vec![
        each_block(path("this.items"), &["item", "i"], vec![mustache(path("item"))], None),
        mustache(path("@title")),
        mustache(path("yield")),
    ]);
    let handle = template.compile(&mut ctx).unwrap();

    let (_, layout) = ctx.program().layout_for(handle).unwrap();
    assert_eq!(layout.symbols, vec!["item", "i", "@title", "&default"]);
    assert_eq!(layout.symbol_count, 5);
    assert_eq!(layout.named.get("@title").map(|s| s.raw()), Some(3));
    assert_eq!(layout.blocks.get("default").map(|s| s.raw()), Some(4));
}

#[test]
fn repeated_named_args_share_a_slot() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let template = Template::new(vec![mustache(path("@title")), text(" / "), mustache(path("@title.length"))]);
    let handle = template.compile(&mut ctx).unwrap();
    let (_, layout) = ctx.program().layout_for(handle).unwrap();
    assert_eq!(layout.symbols, vec!["@title"]);
    assert_eq!(layout.symbol_count, 2);
}

#[test]
fn helper_upvars_are_deduplicated() {
    let registry = registry_with_shout();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let template = Template::new(vec![
        mustache_call(path("shout"), vec![string("a")], vec![]),
        mustache_call(path("shout"), vec![string("b")], vec![]),
        element("p", vec![mustache_call(path("shout"), vec![string("c")], vec![])]),
    ]);
    let handle = template.compile(&mut ctx).unwrap();
    let (_, layout) = ctx.program().layout_for(handle).unwrap();
    assert_eq!(layout.upvars.len(), 1);
    assert_eq!(layout.upvars[0].name, "shout");
}

#[test]
fn string_constants_are_interned_once() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let template = Template::new(vec![element("div", vec![]), element("div", vec![text("div")])]);
    template.compile(&mut ctx).unwrap();
    let divs = ctx
        .program()
        .constants()
        .iter()
        .filter(|constant| matches!(constant, Constant::Str(s) if s == "div"))
        .count();
    assert_eq!(divs, 1);
}

#[test]
fn handle_points_at_first_opcode() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let handle = Template::new(vec![element("p", vec![])]).compile(&mut ctx).unwrap();
    let heap = ctx.program().heap();
    assert_eq!(Opcode::decode(heap[handle.offset()]), Some(Opcode::OpenElement));
}

#[test]
fn compiling_twice_returns_the_same_handle() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let template = Template::new(vec![if_block(path("this.ok"), vec![text("yes")], None)]);
    let first = template.compile(&mut ctx).unwrap();
    let before = lengths(&ctx);
    let second = template.clone().compile(&mut ctx).unwrap();
    assert_eq!(first, second);
    assert_eq!(lengths(&ctx), before);
}

#[test]
fn fresh_contexts_allocate_the_same_symbols() {
    let registry = registry_with_shout();
    let template = Template::new(vec![
        each_block(
            path("this.items"),
            &["item", "i"],
            vec![mustache_call(path("shout"), vec![path("item")], vec![]), mustache(path("@sep"))],
            Some(vec![mustache(path("yield"))]),
        ),
        mustache(path("@title")),
    ]);

    let compiled = || {
        let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
        let handle = template.compile(&mut ctx).unwrap();
        let program = ctx.into_program();
        let (_, layout) = program.layout_for(handle).unwrap();
        (handle, layout.clone(), program.heap().to_vec())
    };
    let (first_handle, first, first_heap) = compiled();
    let (second_handle, second, second_heap) = compiled();

    assert_eq!(first_handle, second_handle);
    assert_eq!(first.symbols, second.symbols);
    assert_eq!(first.symbol_count, second.symbol_count);
    assert_eq!(first.named, second.named);
    assert_eq!(first.blocks, second.blocks);
    assert_eq!(first, second);
    assert_eq!(first_heap, second_heap);
}

#[test]
fn oversized_ids_name_what_overflowed() {
    let err = CompileError::TooLarge {
        what: "heap words",
        template: "app".to_owned(),
    };
    assert_eq!(
        err.to_string(),
        "template app has more heap words than a 32-bit operand can address"
    );
}

#[test]
fn shared_component_is_compiled_once() {
    let mut registry = Registry::new();
    registry.register_component("Badge", Template::new(vec![element("span", vec![mustache(path("@label"))])]));
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());

    Template::new(vec![element("Badge", vec![])]).compile(&mut ctx).unwrap();
    Template::new(vec![element("div", vec![element("Badge", vec![])])])
        .compile(&mut ctx)
        .unwrap();
    assert_eq!(ctx.program().layouts().len(), 3);
}

#[test]
fn unresolved_block_reports_name_and_template() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let template = Template::new(vec![block("Missing", vec![], vec![], &[], vec![text("x")], None)]).with_id("app");
    assert_eq!(
        template.compile(&mut ctx),
        Err(CompileError::UnresolvedReference {
            name: "Missing".to_owned(),
            template: "app".to_owned(),
        })
    );
}

#[test]
fn unknown_name_with_arguments_is_unresolved() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let template = Template::new(vec![mustache_call(path("format"), vec![number(1.0)], vec![])]).with_id("t");
    let err = template.compile(&mut ctx).unwrap_err();
    assert!(matches!(err, CompileError::UnresolvedReference { ref name, .. } if name == "format"));
}

#[test]
fn failed_compile_leaves_context_untouched() {
    let mut registry = Registry::new();
    registry.register_component(
        "Broken",
        Template::new(vec![mustache_call(path("nope"), vec![number(1.0)], vec![])]),
    );
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let good = Template::new(vec![element("p", vec![text("fine")])]);
    let good_handle = good.compile(&mut ctx).unwrap();
    let before = lengths(&ctx);

    let bad = Template::new(vec![element("div", vec![text("never stored"), element("Broken", vec![])])]);
    assert!(bad.compile(&mut ctx).is_err());
    assert_eq!(lengths(&ctx), before);
    assert_eq!(good.compile(&mut ctx).unwrap(), good_handle);
}

#[test]
fn strict_mode_rejects_free_names() {
    let registry = Registry::new();
    let template = Template::new(vec![mustache(path("name"))]).with_id("strict");

    let mut strict = CompilationContext::new(&registry, CompileOptions::strict());
    assert_eq!(
        template.compile(&mut strict),
        Err(CompileError::UnresolvedReference {
            name: "name".to_owned(),
            template: "strict".to_owned(),
        })
    );

    let mut open = CompilationContext::new(&registry, CompileOptions::default());
    let handle = template.compile(&mut open).unwrap();
    let (_, layout) = open.program().layout_for(handle).unwrap();
    assert_eq!(layout.lexicals, vec!["name"]);
}

#[test]
fn declared_locals_resolve_in_strict_mode() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::strict());
    let template = Template::new(vec![mustache(path("user.name"))]).with_locals(&["user"]);
    let handle = template.compile(&mut ctx).unwrap();
    let (_, layout) = ctx.program().layout_for(handle).unwrap();
    assert_eq!(layout.lexicals, vec!["user"]);
}

#[test]
fn positional_component_arguments_are_unsupported() {
    let mut registry = Registry::new();
    registry.register_component("Card", Template::new(vec![mustache(path("yield"))]));
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let template = Template::new(vec![block("Card", vec![number(1.0)], vec![], &[], vec![text("x")], None)]);
    assert!(matches!(template.compile(&mut ctx), Err(CompileError::Unsupported { .. })));
}

#[test]
fn arguments_on_plain_elements_are_unsupported() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let template = Template::new(vec![element_with("div", vec![trellis::ast::attr("@x", "1")], vec![])]);
    assert!(matches!(template.compile(&mut ctx), Err(CompileError::Unsupported { .. })));
}

#[test]
fn debugger_marks_the_layout_as_eval() {
    let registry = Registry::new();
    let mut ctx = CompilationContext::new(&registry, CompileOptions::default());
    let handle = Template::new(vec![mustache(path("@title")), mustache(path("debugger"))])
        .compile(&mut ctx)
        .unwrap();
    let artifact = ctx.program().artifact(handle).unwrap();
    assert!(artifact.has_eval);
    assert_eq!(artifact.symbol_count, 2);
    let (_, layout) = ctx.program().layout_for(handle).unwrap();
    assert_eq!(layout.eval_symbols.as_deref(), Some(&["@title".to_owned()][..]));
}

/// Records every lookup together with the owner it was asked for.
#[derive(Default)]
struct RecordingResolver {
    lookups: RefCell<Vec<(String, Option<String>)>>,
}

impl CompileTimeResolver for RecordingResolver {
    fn lookup_helper(&self, name: &str, referrer: &TemplateMeta) -> Option<HelperHandle> {
        self.lookups.borrow_mut().push((name.to_owned(), referrer.owner.clone()));
        (name == "t").then_some(HelperHandle(7))
    }

    fn lookup_component(&self, name: &str, referrer: &TemplateMeta) -> Option<Rc<Template>> {
        self.lookups.borrow_mut().push((name.to_owned(), referrer.owner.clone()));
        None
    }
}

#[test]
fn resolver_sees_the_referrer() {
    let resolver = RecordingResolver::default();
    let mut ctx = CompilationContext::new(&resolver, CompileOptions::default());
    let template =
        Template::new(vec![mustache_call(path("t"), vec![string("greeting")], vec![])]).with_meta(TemplateMeta::owned_by("app"));
    let handle = template.compile(&mut ctx).unwrap();

    assert_eq!(resolver.lookups.borrow().as_slice(), &[("t".to_owned(), Some("app".to_owned()))]);
    let (_, layout) = ctx.program().layout_for(handle).unwrap();
    assert_eq!(layout.referrer.owner.as_deref(), Some("app"));
}
