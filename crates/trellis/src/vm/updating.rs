//! Revalidation ticks over a [`RenderResult`].
//!
//! A tick walks the tracker tree in recorded order. A clean tracker costs a
//! tag check and a descent into its children; a dirty one re-executes its
//! instruction range against its original scope, inserting the new nodes
//! before its old first node, and only then removes the old nodes. Nothing
//! below a rerun tracker is visited again in the same tick: its children are
//! the ones the rerun just created.
//!
//! Lists reconcile positionally instead of rerunning wholesale.

use std::rc::Rc;

use smallvec::SmallVec;

use super::{Stop, Vm, tracker::ListState};
use crate::{
    bounds::{self, Bounds},
    bytecode::{Opcode, TrackerKind},
    error::RenderError,
    reactive::{CellId, Tag},
    tracer::{NoopTracer, RenderTracer},
    tree::{Cursor, TreeOperations},
    value::{BlockRef, Value},
    vm::{RenderEnv, RenderResult, Tracker},
};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Trackers whose tag was checked.
    pub visited: usize,
    /// Trackers re-executed, list items included.
    pub rerun: usize,
    /// List items removed without replacement.
    pub torn_down: usize,
    /// List items added at the end of a list.
    pub appended: usize,
    pub clean: usize,
}

impl RenderResult {
    /// Runs one revalidation tick.
    ///
    /// Writes made while the tick runs are queued and applied when it ends.
    /// On error, reruns that already finished stay committed and the failed
    /// rerun leaves its old tracker in place.
    pub fn update<T: TreeOperations>(&mut self, env: &RenderEnv<'_>, tree: &mut T) -> Result<TickReport, RenderError> {
        self.update_traced(env, tree, NoopTracer)
    }

    pub fn update_traced<T: TreeOperations, Tr: RenderTracer>(
        &mut self,
        env: &RenderEnv<'_>,
        tree: &mut T,
        tracer: Tr,
    ) -> Result<TickReport, RenderError> {
        env.store.begin_tick()?;
        let result = self.revalidate(env, tree, tracer);
        env.store.end_tick();
        if let Ok(report) = &result {
            log::debug!(
                "tick: {} visited, {} rerun, {} appended, {} torn down",
                report.visited,
                report.rerun,
                report.appended,
                report.torn_down
            );
        }
        result
    }

    fn revalidate<T: TreeOperations, Tr: RenderTracer>(
        &mut self,
        env: &RenderEnv<'_>,
        tree: &mut T,
        tracer: Tr,
    ) -> Result<TickReport, RenderError> {
        let Self {
            bounds,
            trackers,
            scopes,
            lexicals,
            ..
        } = self;
        let mut vm = Vm::new(env, tree, scopes, lexicals, tracer, Cursor::append_to(bounds.parent()));
        let mut report = TickReport::default();
        for tracker in trackers.iter_mut() {
            let old = tracker.bounds;
            let outcome = vm.update_tracker(tracker, &mut report);
            bounds.replace_edge(&old, &tracker.bounds);
            outcome?;
        }
        Ok(report)
    }

    /// Removes everything the render produced and releases its scopes.
    pub fn teardown<T: TreeOperations>(mut self, tree: &mut T) -> Result<(), RenderError> {
        bounds::clear(tree, &self.bounds)?;
        for tracker in &self.trackers {
            tracker.for_each_scope(&mut |scope| self.scopes.release(scope));
        }
        self.scopes.release(self.root_scope);
        self.trackers.clear();
        log::debug!("tore down render of layout {}", self.layout.0);
        Ok(())
    }
}

/// The re-evaluated operands of a list's `Each`.
struct EvaluatedList {
    items: Rc<[Value]>,
    body: BlockRef,
    inverse: Option<BlockRef>,
    deps: SmallVec<[CellId; 4]>,
}

impl<T: TreeOperations, Tr: RenderTracer> Vm<'_, T, Tr> {
    fn update_tracker(&mut self, tracker: &mut Tracker, report: &mut TickReport) -> Result<(), RenderError> {
        report.visited += 1;

        if !tracker.tag.is_dirty(self.env.store) {
            report.clean += 1;
            for child in &mut tracker.children {
                let old = child.bounds;
                let outcome = self.update_tracker(child, report);
                tracker.bounds.replace_edge(&old, &child.bounds);
                outcome?;
            }
            return Ok(());
        }

        if tracker.kind == TrackerKind::List
            && let Some(state) = tracker.list.clone()
        {
            return self.reconcile_list(tracker, &state, report);
        }
        self.replace(tracker, report)
    }

    /// Reruns `tracker` and swaps the result in.
    fn replace(&mut self, tracker: &mut Tracker, report: &mut TickReport) -> Result<(), RenderError> {
        let replacement = self.rerun(tracker)?;
        let old = std::mem::replace(tracker, replacement);
        self.discard(&old)?;
        report.rerun += 1;
        Ok(())
    }

    /// Re-executes the range of `old` in front of its current nodes.
    fn rerun(&mut self, old: &Tracker) -> Result<Tracker, RenderError> {
        self.tracer.on_rerun(old.kind, old.enter_ip);
        let cursor = match old.element {
            Some(element) if old.kind == TrackerKind::Attribute => Cursor::append_to(element),
            _ => Cursor::before(old.bounds.parent(), old.bounds.first()?),
        };
        self.reset(cursor);

        let outcome = self.run_range(old).and_then(|()| self.take_completed(old.enter_ip));
        if outcome.is_err() {
            self.abort();
        }
        outcome
    }

    fn run_range(&mut self, old: &Tracker) -> Result<(), RenderError> {
        if let Some(item) = &old.item {
            return self.render_item(old.enter_ip, item.body, item.value.clone(), item.index);
        }
        self.push_frame(old.enter_ip, old.scope, old.layout)?;
        self.run(Stop::At(old.exit_ip + Opcode::Exit.width()))?;
        self.frames.pop();
        Ok(())
    }

    /// Removes the nodes of a replaced or dropped tracker and frees its scopes.
    fn discard(&mut self, tracker: &Tracker) -> Result<(), RenderError> {
        bounds::clear(self.tree, &tracker.bounds)?;
        let scopes = &mut *self.scopes;
        tracker.for_each_scope(&mut |scope| scopes.release(scope));
        self.tracer.on_teardown(tracker.kind);
        Ok(())
    }

    fn reconcile_list(
        &mut self,
        tracker: &mut Tracker,
        state: &ListState,
        report: &mut TickReport,
    ) -> Result<(), RenderError> {
        let parent = tracker.bounds.parent();
        self.reset(Cursor::before(parent, tracker.bounds.first()?));
        let evaluated = match self.evaluate_list(tracker, state) {
            Ok(evaluated) => evaluated,
            Err(err) => {
                self.abort();
                return Err(err);
            }
        };

        if state.items.is_empty() || evaluated.items.is_empty() {
            return self.replace(tracker, report);
        }
        log::trace!(
            "reconciling list at {}: {} -> {} items",
            tracker.enter_ip,
            state.items.len(),
            evaluated.items.len()
        );

        let outcome = self.reconcile_items(tracker, state, &evaluated, report);
        if outcome.is_err() {
            // Items appended before the failure go; the old list state stays dirty.
            let kept = state.items.len().min(tracker.children.len());
            let appended: Vec<Tracker> = tracker.children.drain(kept..).collect();
            for old in &appended {
                if let Err(err) = self.discard(old) {
                    log::debug!("could not remove a failed list append: {err}");
                }
            }
        }
        if let (Some(first), Some(last)) = (tracker.children.first(), tracker.children.last()) {
            tracker.bounds = Bounds::new(parent, first.bounds.first()?, last.bounds.last()?);
        }
        outcome?;

        let EvaluatedList {
            items,
            body,
            inverse,
            deps,
        } = evaluated;
        tracker.tag = Tag::new(deps, self.snapshot);
        tracker.list = Some(ListState {
            items,
            body,
            inverse,
            each_ip: state.each_ip,
        });
        Ok(())
    }

    /// Runs the list expression up to its `Each` and pops the operands.
    fn evaluate_list(&mut self, tracker: &Tracker, state: &ListState) -> Result<EvaluatedList, RenderError> {
        let ip = state.each_ip;
        let frame = super::Frame {
            ip: tracker.enter_ip,
            scope: tracker.scope,
            layout: tracker.layout,
        };
        self.open_tracker(TrackerKind::List, tracker.enter_ip, frame);
        self.push_frame(tracker.enter_ip + Opcode::Enter.width(), tracker.scope, tracker.layout)?;
        self.run(Stop::At(ip))?;
        let inverse = self.pop(ip)?;
        let body = self.pop(ip)?;
        let list = self.pop(ip)?;
        self.frames.pop();
        let collector = self
            .open
            .pop()
            .ok_or_else(|| RenderError::corrupt(ip, "list collector went missing"))?;

        let Value::Block(body) = body else {
            return Err(RenderError::corrupt(ip, "each body is not a block"));
        };
        let inverse = match inverse {
            Value::Block(inverse) => Some(inverse),
            _ => None,
        };
        Ok(EvaluatedList {
            items: list.iter_items().unwrap_or_else(|| Rc::from(Vec::new())),
            body,
            inverse,
            deps: collector.deps,
        })
    }

    fn reconcile_items(
        &mut self,
        tracker: &mut Tracker,
        state: &ListState,
        evaluated: &EvaluatedList,
        report: &mut TickReport,
    ) -> Result<(), RenderError> {
        let ip = state.each_ip;
        let parent = tracker.bounds.parent();
        let items = &evaluated.items;
        let common = state.items.len().min(items.len());
        if tracker.children.len() != state.items.len() {
            return Err(RenderError::corrupt(ip, "list items and item trackers disagree"));
        }

        for (index, item) in items.iter().enumerate().take(common) {
            let child = &mut tracker.children[index];
            if state.items[index] == *item {
                self.update_tracker(child, report)?;
                continue;
            }
            self.tracer.on_rerun(TrackerKind::Item, ip);
            self.reset(Cursor::before(child.bounds.parent(), child.bounds.first()?));
            let replacement = self.item(ip, evaluated.body, item.clone(), index)?;
            let old = std::mem::replace(child, replacement);
            self.discard(&old)?;
            report.rerun += 1;
        }

        if items.len() > common {
            let last = tracker.children[common - 1].bounds.last()?;
            let cursor = Cursor {
                parent,
                next_sibling: self.tree.next_sibling(last),
            };
            for (index, item) in items.iter().enumerate().skip(common) {
                self.reset(cursor);
                let appended = self.item(ip, evaluated.body, item.clone(), index)?;
                tracker.children.push(appended);
                report.appended += 1;
            }
        }

        let surplus: Vec<Tracker> = tracker.children.drain(items.len()..).collect();
        for old in &surplus {
            self.discard(old)?;
            report.torn_down += 1;
        }
        Ok(())
    }

    /// Renders one item at the current cursor, undoing it on failure.
    fn item(&mut self, ip: usize, body: BlockRef, value: Value, index: usize) -> Result<Tracker, RenderError> {
        let outcome = self
            .render_item(ip, body, value, index)
            .and_then(|()| self.take_completed(ip));
        if outcome.is_err() {
            self.abort();
        }
        outcome
    }
}
