//! Tests for update ticks: which trackers rerun, what the tree looks like
//! afterwards, and what a failed or clean tick leaves behind.

use pretty_assertions::assert_eq;
use trellis::{
    CellId, CompilationContext, CompileOptions, Cursor, Handle, LogTracer, Program, ReactiveStore, RecordingTracer,
    Registry, RenderArgs, RenderEnv, RenderError, RenderResult, SimpleDocument, TickPhase, TickReport, Template,
    Tracker, TrackerKind, TreeOperations, Value,
    ast::{
        attr, dynamic_attr, each_block, element, element_with, if_block, mustache, mustache_call, path, text,
    },
    helper_fn, render, render_traced,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn compile(registry: &Registry, template: &Template) -> (Program, Handle) {
    let mut ctx = CompilationContext::new(registry, CompileOptions::default());
    let handle = template.compile(&mut ctx).unwrap();
    (ctx.into_program(), handle)
}

fn render_into(env: &RenderEnv<'_>, handle: Handle, this: Value) -> (SimpleDocument, RenderResult) {
    let mut doc = SimpleDocument::new();
    let root = doc.root();
    let result = render(env, handle, RenderArgs::new().with_this(this), &mut doc, Cursor::append_to(root)).unwrap();
    (doc, result)
}

fn strings(items: &[&str]) -> Value {
    Value::list(items.iter().copied().map(Value::str).collect())
}

fn list_template() -> Template {
    Template::new(vec![element(
        "ul",
        vec![each_block(
            path("this.items"),
            &["item"],
            vec![element("li", vec![mustache(path("item"))])],
            Some(vec![element("li", vec![text("none")])]),
        )],
    )])
}

/// Renders `list_template` over `items` held in a cell.
struct ListPage {
    store: ReactiveStore,
    items: CellId,
    registry: Registry,
    program: Program,
    handle: Handle,
}

impl ListPage {
    fn new(items: &[&str]) -> Self {
        init_logging();
        let store = ReactiveStore::new();
        let items = store.cell(strings(items));
        let registry = Registry::new();
        let (program, handle) = compile(&registry, &list_template());
        Self {
            store,
            items,
            registry,
            program,
            handle,
        }
    }

    fn env(&self) -> RenderEnv<'_> {
        RenderEnv::new(&self.program, &self.registry, &self.store)
    }

    fn this(&self) -> Value {
        Value::object([("items", Value::Cell(self.items))])
    }
}

#[test]
fn clean_tick_touches_nothing() {
    let store = ReactiveStore::new();
    let name = store.cell("Ann");
    let registry = Registry::new();
    let template = Template::new(vec![
        element("p", vec![mustache(path("this.name"))]),
        if_block(path("this.name"), vec![text("!")], None),
    ]);
    let (program, handle) = compile(&registry, &template);
    let env = RenderEnv::new(&program, &registry, &store);
    let (mut doc, mut result) = render_into(&env, handle, Value::object([("name", Value::Cell(name))]));

    let html = doc.to_html();
    let mutations = doc.mutations();
    let report = result.update(&env, &mut doc).unwrap();

    assert_eq!(
        report,
        TickReport {
            visited: 2,
            clean: 2,
            ..TickReport::default()
        }
    );
    assert_eq!(doc.to_html(), html);
    assert_eq!(doc.mutations(), mutations);
}

#[test]
fn changed_text_reruns_one_append() {
    let store = ReactiveStore::new();
    let name = store.cell("Ann");
    let registry = Registry::new();
    let template = Template::new(vec![element("p", vec![text("Hi "), mustache(path("this.name"))])]);
    let (program, handle) = compile(&registry, &template);
    let env = RenderEnv::new(&program, &registry, &store);
    let (mut doc, mut result) = render_into(&env, handle, Value::object([("name", Value::Cell(name))]));
    assert_eq!(doc.to_html(), "<p>Hi Ann</p>");

    store.set(name, "Bob");
    let mutations = doc.mutations();
    let report = result.update(&env, &mut doc).unwrap();

    assert_eq!(report.rerun, 1);
    assert_eq!(doc.to_html(), "<p>Hi Bob</p>");
    // one insert, one removal
    assert_eq!(doc.mutations(), mutations + 2);

    let report = result.update(&env, &mut doc).unwrap();
    assert_eq!(report.rerun, 0);
}

#[test]
fn conditional_swaps_branches_and_keeps_root_bounds() {
    let store = ReactiveStore::new();
    let first = store.cell(true);
    let last = store.cell(false);
    let registry = Registry::new();
    let template = Template::new(vec![
        if_block(
            path("this.first"),
            vec![element("b", vec![mustache(path("this.label"))])],
            Some(vec![text("a")]),
        ),
        text("-"),
        if_block(path("this.last"), vec![text("Z")], None),
    ]);
    let (program, handle) = compile(&registry, &template);
    let env = RenderEnv::new(&program, &registry, &store);
    let this = Value::object([
        ("first", Value::Cell(first)),
        ("last", Value::Cell(last)),
        ("label", Value::str("A")),
    ]);
    let (mut doc, mut result) = render_into(&env, handle, this);
    assert_eq!(doc.to_html(), "<b>A</b>-<!---->");
    let kinds: Vec<TrackerKind> = result.trackers()[0].children().iter().map(Tracker::kind).collect();
    assert_eq!(kinds, vec![TrackerKind::Append]);
    assert_eq!(result.tracker_count(), 3);

    store.set(first, false);
    store.set(last, true);
    let report = result.update(&env, &mut doc).unwrap();
    assert_eq!(report.rerun, 2);
    assert_eq!(doc.to_html(), "a-Z");
    assert_eq!(result.trackers()[0].kind(), TrackerKind::Conditional);
    assert!(result.trackers()[0].children().is_empty());
    assert_eq!(result.tracker_count(), 2);

    let root = doc.root();
    assert_eq!(result.bounds().nodes(&doc).unwrap(), doc.children(root));
}

#[test]
fn clean_parent_passes_the_tick_to_its_children() {
    let store = ReactiveStore::new();
    let show = store.cell(true);
    let name = store.cell("x");
    let registry = Registry::new();
    let template = Template::new(vec![element(
        "div",
        vec![if_block(path("this.show"), vec![element("b", vec![mustache(path("this.name"))])], None)],
    )]);
    let (program, handle) = compile(&registry, &template);
    let env = RenderEnv::new(&program, &registry, &store);
    let this = Value::object([("show", Value::Cell(show)), ("name", Value::Cell(name))]);
    let (mut doc, mut result) = render_into(&env, handle, this);

    store.set(name, "y");
    let mut tracer = RecordingTracer::without_instructions();
    let report = result.update_traced(&env, &mut doc, &mut tracer).unwrap();

    assert_eq!(tracer.reruns(), vec![TrackerKind::Append]);
    assert_eq!(report.visited, 2);
    assert_eq!(report.clean, 1);
    assert_eq!(doc.to_html(), "<div><b>y</b></div>");
}

#[test]
fn list_growth_appends_only_the_new_item() {
    let page = ListPage::new(&["a", "b"]);
    let env = page.env();
    let (mut doc, mut result) = render_into(&env, page.handle, page.this());
    assert_eq!(doc.to_html(), "<ul><li>a</li><li>b</li></ul>");
    let scopes = result.live_scopes();

    page.store.set(page.items, strings(&["a", "b", "c"]));
    let report = result.update(&env, &mut doc).unwrap();

    assert_eq!((report.appended, report.rerun, report.torn_down), (1, 0, 0));
    assert_eq!(doc.to_html(), "<ul><li>a</li><li>b</li><li>c</li></ul>");
    let [list] = result.trackers() else { panic!("expected the list tracker") };
    assert_eq!(list.children().len(), 3);
    assert_eq!(list.list_items().map(<[Value]>::len), Some(3));
    assert_eq!(result.live_scopes(), scopes + 1);
}

#[test]
fn list_shrink_tears_down_surplus_items() {
    let page = ListPage::new(&["a", "b", "c"]);
    let env = page.env();
    let (mut doc, mut result) = render_into(&env, page.handle, page.this());
    let scopes = result.live_scopes();

    page.store.set(page.items, strings(&["a"]));
    let report = result.update(&env, &mut doc).unwrap();

    assert_eq!(report.torn_down, 2);
    assert_eq!(doc.to_html(), "<ul><li>a</li></ul>");
    assert_eq!(result.live_scopes(), scopes - 2);
}

#[test]
fn changed_item_is_rerendered_in_place() {
    let page = ListPage::new(&["a", "b", "c"]);
    let env = page.env();
    let (mut doc, mut result) = render_into(&env, page.handle, page.this());

    page.store.set(page.items, strings(&["a", "z", "c"]));
    let mut tracer = RecordingTracer::without_instructions();
    let report = result.update_traced(&env, &mut doc, &mut tracer).unwrap();

    assert_eq!(report.rerun, 1);
    assert_eq!(tracer.reruns(), vec![TrackerKind::Item]);
    assert_eq!(doc.to_html(), "<ul><li>a</li><li>z</li><li>c</li></ul>");
}

#[test]
fn list_switches_between_items_and_inverse() {
    let page = ListPage::new(&[]);
    let env = page.env();
    let (mut doc, mut result) = render_into(&env, page.handle, page.this());
    assert_eq!(doc.to_html(), "<ul><li>none</li></ul>");

    page.store.set(page.items, strings(&["a", "b"]));
    let report = result.update(&env, &mut doc).unwrap();
    assert_eq!(report.rerun, 1);
    assert_eq!(doc.to_html(), "<ul><li>a</li><li>b</li></ul>");

    page.store.set(page.items, strings(&[]));
    result.update(&env, &mut doc).unwrap();
    assert_eq!(doc.to_html(), "<ul><li>none</li></ul>");
}

#[test]
fn attribute_rerun_writes_only_the_attribute() {
    let store = ReactiveStore::new();
    let url = store.cell("/a");
    let registry = Registry::new();
    let template = Template::new(vec![element_with(
        "a",
        vec![attr("class", "nav"), dynamic_attr("href", path("this.url"))],
        vec![text("link")],
    )]);
    let (program, handle) = compile(&registry, &template);
    let env = RenderEnv::new(&program, &registry, &store);
    let (mut doc, mut result) = render_into(&env, handle, Value::object([("url", Value::Cell(url))]));
    assert_eq!(doc.to_html(), "<a class=\"nav\" href=\"/a\">link</a>");

    store.set(url, "/b");
    let mutations = doc.mutations();
    result.update(&env, &mut doc).unwrap();
    assert_eq!(doc.to_html(), "<a class=\"nav\" href=\"/b\">link</a>");
    assert_eq!(doc.mutations(), mutations + 1);

    store.set(url, Value::Null);
    result.update(&env, &mut doc).unwrap();
    assert_eq!(doc.to_html(), "<a class=\"nav\">link</a>");
}

#[test]
fn component_argument_change_reruns_the_component() {
    let store = ReactiveStore::new();
    let title = store.cell("One");
    let mut registry = Registry::new();
    registry.register_component(
        "Card",
        Template::new(vec![element("section", vec![element("h1", vec![mustache(path("@title"))]), mustache(path("yield"))])]),
    );
    let template = Template::new(vec![element_with(
        "Card",
        vec![dynamic_attr("@title", path("this.title"))],
        vec![text("body")],
    )]);
    let (program, handle) = compile(&registry, &template);
    let env = RenderEnv::new(&program, &registry, &store);
    let (mut doc, mut result) = render_into(&env, handle, Value::object([("title", Value::Cell(title))]));
    assert_eq!(doc.to_html(), "<section><h1>One</h1>body</section>");
    let scopes = result.live_scopes();

    store.set(title, "Two");
    let mut tracer = RecordingTracer::without_instructions();
    result.update_traced(&env, &mut doc, &mut tracer).unwrap();

    assert_eq!(tracer.reruns(), vec![TrackerKind::Component]);
    assert_eq!(doc.to_html(), "<section><h1>Two</h1>body</section>");
    assert_eq!(result.live_scopes(), scopes);
}

#[test]
fn failed_rerun_keeps_the_old_output() {
    let store = ReactiveStore::new();
    let value = store.cell("ok");
    let mut registry = Registry::new();
    registry.register_helper(
        "check",
        helper_fn(|args, _| {
            if args.at(0) == Value::str("bad") {
                Err("rejected".to_owned())
            } else {
                Ok(args.at(0))
            }
        }),
    );
    let template = Template::new(vec![element("p", vec![mustache_call(path("check"), vec![path("this.v")], vec![])])]);
    let (program, handle) = compile(&registry, &template);
    let env = RenderEnv::new(&program, &registry, &store);
    let (mut doc, mut result) = render_into(&env, handle, Value::object([("v", Value::Cell(value))]));

    store.set(value, "bad");
    let err = result.update(&env, &mut doc).unwrap_err();
    assert_eq!(
        err,
        RenderError::Helper {
            name: "check".to_owned(),
            message: "rejected".to_owned(),
        }
    );
    assert_eq!(doc.to_html(), "<p>ok</p>");
    assert_eq!(store.phase(), TickPhase::Idle);

    store.set(value, "fine");
    result.update(&env, &mut doc).unwrap();
    assert_eq!(doc.to_html(), "<p>fine</p>");
}

#[test]
fn failed_append_leaves_the_list_retryable() {
    init_logging();
    let store = ReactiveStore::new();
    let items = store.cell(strings(&["a"]));
    let mut registry = Registry::new();
    registry.register_helper(
        "check",
        helper_fn(|args, _| {
            if args.at(0) == Value::str("bad") {
                Err("rejected".to_owned())
            } else {
                Ok(args.at(0))
            }
        }),
    );
    let template = Template::new(vec![element(
        "ul",
        vec![each_block(
            path("this.items"),
            &["item"],
            vec![element("li", vec![mustache_call(path("check"), vec![path("item")], vec![])])],
            None,
        )],
    )]);
    let (program, handle) = compile(&registry, &template);
    let env = RenderEnv::new(&program, &registry, &store);
    let (mut doc, mut result) = render_into(&env, handle, Value::object([("items", Value::Cell(items))]));
    let count = result.tracker_count();

    store.set(items, strings(&["a", "b", "c", "bad"]));
    let err = result.update(&env, &mut doc).unwrap_err();
    assert!(matches!(err, RenderError::Helper { .. }), "{err:?}");
    assert_eq!(doc.to_html(), "<ul><li>a</li></ul>");
    assert_eq!(result.tracker_count(), count);

    store.set(items, strings(&["a", "b", "c", "d"]));
    let report = result.update(&env, &mut doc).unwrap();
    assert_eq!(report.appended, 3);
    assert_eq!(doc.to_html(), "<ul><li>a</li><li>b</li><li>c</li><li>d</li></ul>");

    store.set(items, strings(&["a", "b"]));
    let report = result.update(&env, &mut doc).unwrap();
    assert_eq!(report.torn_down, 2);
    assert_eq!(doc.to_html(), "<ul><li>a</li><li>b</li></ul>");
}

#[test]
fn writes_during_a_tick_land_after_it() {
    let store = ReactiveStore::new();
    let name = store.cell("a");
    let renders = store.cell(0i64);
    let mut registry = Registry::new();
    registry.register_helper(
        "counted",
        helper_fn(move |args, cx| {
            let Value::Number(n) = cx.store().get(renders) else {
                return Err("counter is not a number".to_owned());
            };
            cx.store().set(renders, n + 1.0);
            Ok(args.at(0))
        }),
    );
    let template = Template::new(vec![mustache_call(path("counted"), vec![path("this.name")], vec![])]);
    let (program, handle) = compile(&registry, &template);
    let env = RenderEnv::new(&program, &registry, &store);
    let (mut doc, mut result) = render_into(&env, handle, Value::object([("name", Value::Cell(name))]));
    assert_eq!(store.get(renders), Value::Number(1.0));

    store.set(name, "b");
    result.update(&env, &mut doc).unwrap();
    assert_eq!(store.get(renders), Value::Number(2.0));
    assert_eq!(store.pending_writes(), 0);

    // the counter is not a dependency, so nothing is dirty now
    assert_eq!(result.update(&env, &mut doc).unwrap().rerun, 0);
    assert_eq!(doc.to_html(), "b");
}

#[test]
fn update_refuses_to_nest_inside_a_tick() {
    let page = ListPage::new(&["a"]);
    let env = page.env();
    let (mut doc, mut result) = render_into(&env, page.handle, page.this());

    page.store.begin_tick().unwrap();
    assert_eq!(result.update(&env, &mut doc), Err(RenderError::TickInProgress));
    page.store.end_tick();
}

#[test]
fn teardown_removes_everything() {
    let page = ListPage::new(&["a", "b"]);
    let env = page.env();
    let mut doc = SimpleDocument::new();
    let root = doc.root();
    let keep = doc.create_element("footer");
    doc.insert_before(root, keep, None);
    let result = render(&env, page.handle, RenderArgs::new().with_this(page.this()), &mut doc, Cursor::before(root, keep))
        .unwrap();
    assert_eq!(doc.to_html(), "<ul><li>a</li><li>b</li></ul><footer></footer>");

    result.teardown(&mut doc).unwrap();
    assert_eq!(doc.to_html(), "<footer></footer>");
}

#[test]
fn log_tracer_goes_quiet_at_its_limit() {
    let page = ListPage::new(&["a", "b"]);
    let env = page.env();
    let mut doc = SimpleDocument::new();
    let root = doc.root();
    let mut tracer = LogTracer::with_limit(4);
    let mut result = render_traced(
        &env,
        page.handle,
        RenderArgs::new().with_this(page.this()),
        &mut doc,
        Cursor::append_to(root),
        &mut tracer,
    )
    .unwrap();
    assert_eq!(tracer.logged(), 4);
    assert_eq!(doc.to_html(), "<ul><li>a</li><li>b</li></ul>");

    page.store.set(page.items, strings(&["a", "c"]));
    let mut unlimited = LogTracer::new();
    let report = result.update_traced(&env, &mut doc, &mut unlimited).unwrap();
    assert_eq!(report.rerun, 1);
    assert!(unlimited.logged() > 0);
    assert_eq!(doc.to_html(), "<ul><li>a</li><li>c</li></ul>");
}
