#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "integral numbers are narrowed after a range check")]

pub mod ast;
pub mod bounds;
pub mod bytecode;
pub mod dom;
mod error;
mod limits;
pub mod printer;
pub mod program;
pub mod reactive;
pub mod resolver;
pub mod scope;
pub mod symbol_table;
pub mod tracer;
pub mod tree;
pub mod value;
pub mod vm;

pub use crate::{
    ast::Template,
    bounds::Bounds,
    bytecode::{CompilationContext, Opcode, TrackerKind},
    dom::{NodeKind, SimpleDocument},
    error::{CompileError, RenderError},
    limits::{CompileOptions, DEFAULT_MAX_RENDER_DEPTH, RenderLimits},
    printer::print,
    program::{BlockId, ConstId, Constant, Handle, LayoutId, LayoutInfo, Program, ProgramArtifact},
    reactive::{CellId, ReactiveStore, Revision, Tag, TickPhase},
    resolver::{
        CompileTimeResolver, Helper, HelperArgs, HelperContext, HelperHandle, Registry, RuntimeResolver, TemplateMeta,
        helper_fn,
    },
    scope::{ScopeId, Scopes},
    symbol_table::{Lookup, Symbol, SymbolTable, TableId},
    tracer::{
        LogTracer, NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, RenderTracer, TraceEvent,
    },
    tree::{Cursor, NodeId, TreeOperations},
    value::Value,
    vm::{DebugContext, RenderArgs, RenderEnv, RenderResult, TickReport, Tracker, render, render_traced},
};
