use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};
use trellis::{
    CellId, CompilationContext, CompileOptions, Cursor, Handle, Program, ReactiveStore, Registry, RenderArgs,
    RenderEnv, SimpleDocument, Template, Value,
    ast::{dynamic_attr, each_block, element, element_with, if_block, mustache, path, text},
};

const ROWS: usize = 100;

/// A table of rows, each row a component with a conditional badge.
fn table_template() -> Template {
    Template::new(vec![element(
        "table",
        vec![each_block(
            path("this.rows"),
            &["row", "i"],
            vec![element_with(
                "Row",
                vec![dynamic_attr("@label", path("row")), dynamic_attr("@index", path("i"))],
                vec![],
            )],
            Some(vec![text("empty")]),
        )],
    )])
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_component(
        "Row",
        Template::new(vec![element(
            "tr",
            vec![
                element("td", vec![mustache(path("@index"))]),
                element("td", vec![mustache(path("@label"))]),
                if_block(path("@index"), vec![], Some(vec![element("td", vec![text("first")])])),
            ],
        )]),
    );
    registry
}

fn rows(prefix: &str) -> Value {
    Value::list((0..ROWS).map(|i| Value::from(format!("{prefix}{i}"))).collect())
}

fn compile(registry: &Registry) -> (Program, Handle) {
    let mut ctx = CompilationContext::new(registry, CompileOptions::default());
    let handle = table_template().compile(&mut ctx).unwrap();
    (ctx.into_program(), handle)
}

fn bench_compile(bench: &mut Bencher) {
    let registry = registry();
    bench.iter(|| black_box(compile(&registry)));
}

fn bench_render(bench: &mut Bencher) {
    let registry = registry();
    let (program, handle) = compile(&registry);
    let store = ReactiveStore::new();
    let env = RenderEnv::new(&program, &registry, &store);
    let this = Value::object([("rows", rows("row "))]);

    bench.iter(|| {
        let mut doc = SimpleDocument::new();
        let root = doc.root();
        let result =
            trellis::render(&env, handle, RenderArgs::new().with_this(this.clone()), &mut doc, Cursor::append_to(root))
                .unwrap();
        black_box(result.tracker_count());
    });
}

/// Renders once, then measures ticks that either change nothing or swap the
/// whole list between two equal-length contents.
fn bench_update(bench: &mut Bencher, swap: bool) {
    let registry = registry();
    let (program, handle) = compile(&registry);
    let store = ReactiveStore::new();
    let cell: CellId = store.cell(rows("a"));
    let env = RenderEnv::new(&program, &registry, &store);
    let mut doc = SimpleDocument::new();
    let root = doc.root();
    let this = Value::object([("rows", Value::Cell(cell))]);
    let mut result = trellis::render(&env, handle, RenderArgs::new().with_this(this), &mut doc, Cursor::append_to(root))
        .unwrap();

    let (a, b) = (rows("a"), rows("b"));
    let mut flip = false;
    bench.iter(|| {
        if swap {
            flip = !flip;
            store.set(cell, if flip { b.clone() } else { a.clone() });
        }
        black_box(result.update(&env, &mut doc).unwrap());
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("compile_table", bench_compile);
    c.bench_function("render_table_100", bench_render);
    c.bench_function("update_table_100__clean", |b| bench_update(b, false));
    c.bench_function("update_table_100__every_row", |b| bench_update(b, true));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
