//! Render tracing infrastructure.
//!
//! The VM carries a [`RenderTracer`] as a type parameter and calls its hooks
//! at instruction dispatch, frame pushes and pops, and tracker lifecycle
//! events. Every hook has an empty default, so [`NoopTracer`] monomorphizes
//! away entirely.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (default) |
//! | [`LogTracer`] | Execution log through the `log` facade at trace level |
//! | [`ProfilingTracer`] | Opcode frequency counters and frame depth tracking |
//! | [`RecordingTracer`] | Full event recording for assertions and post-mortems |

use ahash::AHashMap;

use crate::bytecode::{Opcode, TrackerKind};

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Instruction { ip: usize, opcode: Opcode, stack_depth: usize },
    FramePush { ip: usize, depth: usize },
    FramePop { depth: usize },
    TrackerOpen { kind: TrackerKind, ip: usize },
    TrackerClose { kind: TrackerKind, ip: usize },
    /// A dirty tracker was re-executed by the updating VM.
    Rerun { kind: TrackerKind, ip: usize },
    /// A tracker's nodes were removed and its scopes released.
    Teardown { kind: TrackerKind },
}

/// Hooks called by the render and updating VMs.
pub trait RenderTracer: std::fmt::Debug {
    /// Called before each opcode dispatch. This is the hottest hook.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// A block or component frame was pushed; `ip` is its first instruction.
    #[inline(always)]
    fn on_frame_push(&mut self, _ip: usize, _depth: usize) {}

    #[inline(always)]
    fn on_frame_pop(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_tracker_open(&mut self, _kind: TrackerKind, _ip: usize) {}

    #[inline(always)]
    fn on_tracker_close(&mut self, _kind: TrackerKind, _ip: usize) {}

    #[inline(always)]
    fn on_rerun(&mut self, _kind: TrackerKind, _ip: usize) {}

    #[inline(always)]
    fn on_teardown(&mut self, _kind: TrackerKind) {}
}

impl<Tr: RenderTracer + ?Sized> RenderTracer for &mut Tr {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        (**self).on_instruction(ip, opcode, stack_depth, frame_depth);
    }

    fn on_frame_push(&mut self, ip: usize, depth: usize) {
        (**self).on_frame_push(ip, depth);
    }

    fn on_frame_pop(&mut self, depth: usize) {
        (**self).on_frame_pop(depth);
    }

    fn on_tracker_open(&mut self, kind: TrackerKind, ip: usize) {
        (**self).on_tracker_open(kind, ip);
    }

    fn on_tracker_close(&mut self, kind: TrackerKind, ip: usize) {
        (**self).on_tracker_close(kind, ip);
    }

    fn on_rerun(&mut self, kind: TrackerKind, ip: usize) {
        (**self).on_rerun(kind, ip);
    }

    fn on_teardown(&mut self, kind: TrackerKind) {
        (**self).on_teardown(kind);
    }
}

// ============================================================================
// NoopTracer
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl RenderTracer for NoopTracer {}

// ============================================================================
// LogTracer
// ============================================================================

/// Tracer that writes a human-readable execution log through `log::trace!`.
///
/// ```text
/// [   12] Enter  stack=0  frames=1
///   >>> FRAME at 40  depth=2
/// [   40] Text  stack=0  frames=2
///   <<< FRAME  depth=1
/// ```
#[derive(Debug, Default)]
pub struct LogTracer {
    /// Stop logging after this many instructions. `None` is unlimited.
    limit: Option<usize>,
    count: usize,
}

impl LogTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracer that goes quiet after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
        }
    }

    /// Instructions logged so far.
    #[must_use]
    pub fn logged(&self) -> usize {
        self.count
    }

    fn stopped(&self) -> bool {
        self.limit.is_some_and(|limit| self.count >= limit)
    }
}

impl RenderTracer for LogTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if self.stopped() {
            return;
        }
        log::trace!("[{ip:>5}] {opcode}  stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if self.stopped() {
            log::trace!("--- trace limit reached ({} instructions) ---", self.count);
        }
    }

    fn on_frame_push(&mut self, ip: usize, depth: usize) {
        if !self.stopped() {
            log::trace!("  >>> FRAME at {ip}  depth={depth}");
        }
    }

    fn on_frame_pop(&mut self, depth: usize) {
        if !self.stopped() {
            log::trace!("  <<< FRAME  depth={depth}");
        }
    }

    fn on_rerun(&mut self, kind: TrackerKind, ip: usize) {
        log::trace!("  ~~~ RERUN {kind} at {ip}");
    }

    fn on_teardown(&mut self, kind: TrackerKind) {
        log::trace!("  --- TEARDOWN {kind}");
    }
}

// ============================================================================
// ProfilingTracer
// ============================================================================

/// Tracer that collects execution statistics.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    opcode_counts: AHashMap<Opcode, u64>,
    total_instructions: u64,
    max_depth: usize,
    total_frames: u64,
    trackers_opened: u64,
    reruns: u64,
}

/// Summary of a [`ProfilingTracer`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingReport {
    /// Per-opcode execution counts, most executed first.
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    pub max_depth: usize,
    pub total_frames: u64,
    pub trackers_opened: u64,
    pub reruns: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| (a.0 as u8).cmp(&(b.0 as u8))));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            max_depth: self.max_depth,
            total_frames: self.total_frames,
            trackers_opened: self.trackers_opened,
            reruns: self.reruns,
        }
    }
}

impl RenderTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    #[inline]
    fn on_frame_push(&mut self, _ip: usize, depth: usize) {
        self.total_frames += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_tracker_open(&mut self, _kind: TrackerKind, _ip: usize) {
        self.trackers_opened += 1;
    }

    fn on_rerun(&mut self, _kind: TrackerKind, _ip: usize) {
        self.reruns += 1;
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Tracer that records every event.
///
/// Instruction events can be left out with [`RecordingTracer::without_instructions`]
/// when only the structural events matter.
#[derive(Debug)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    instructions: bool,
}

impl Default for RecordingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            instructions: true,
        }
    }

    #[must_use]
    pub fn without_instructions() -> Self {
        Self {
            events: Vec::new(),
            instructions: false,
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Kinds of every re-executed tracker, in order.
    #[must_use]
    pub fn reruns(&self) -> Vec<TrackerKind> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Rerun { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }
}

impl RenderTracer for RecordingTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, _frame_depth: usize) {
        if self.instructions {
            self.events.push(TraceEvent::Instruction {
                ip,
                opcode,
                stack_depth,
            });
        }
    }

    fn on_frame_push(&mut self, ip: usize, depth: usize) {
        self.events.push(TraceEvent::FramePush { ip, depth });
    }

    fn on_frame_pop(&mut self, depth: usize) {
        self.events.push(TraceEvent::FramePop { depth });
    }

    fn on_tracker_open(&mut self, kind: TrackerKind, ip: usize) {
        self.events.push(TraceEvent::TrackerOpen { kind, ip });
    }

    fn on_tracker_close(&mut self, kind: TrackerKind, ip: usize) {
        self.events.push(TraceEvent::TrackerClose { kind, ip });
    }

    fn on_rerun(&mut self, kind: TrackerKind, ip: usize) {
        self.events.push(TraceEvent::Rerun { kind, ip });
    }

    fn on_teardown(&mut self, kind: TrackerKind) {
        self.events.push(TraceEvent::Teardown { kind });
    }
}
