use std::fmt;

/// Error returned when a template cannot be compiled into a runnable handle.
///
/// Compilation errors leave the [`CompilationContext`](crate::CompilationContext)
/// exactly as it was before the failing `compile` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A helper or component reference the resolver does not know.
    UnresolvedReference {
        /// The name as written in the template.
        name: String,
        /// Identity of the referencing template (its id, or its module name).
        template: String,
    },
    /// A construct the compiler recognizes but cannot lower.
    Unsupported { construct: String, template: String },
    /// The root allocator and a symbol operand disagree. Always a compiler defect.
    SymbolCountMismatch { expected: u32, found: u32 },
    /// A table, heap offset or symbol count no longer fits in a 32-bit operand.
    TooLarge { what: &'static str, template: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedReference { name, template } => {
                write!(f, "unresolved reference `{name}` in template {template}")
            }
            Self::Unsupported { construct, template } => {
                write!(f, "unsupported construct {construct} in template {template}")
            }
            Self::SymbolCountMismatch { expected, found } => {
                write!(f, "symbol {found} is outside the allocated range (size {expected})")
            }
            Self::TooLarge { what, template } => {
                write!(f, "template {template} has more {what} than a 32-bit operand can address")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Fatal error raised while rendering or revalidating.
///
/// None of these are retried. A failed render returns no result; a failed
/// tick leaves the already committed output tree untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// An opcode, operand, constant or heap index that does not exist.
    CorruptProgram { ip: usize, detail: String },
    /// An empty bounds was dereferenced, or its edges are out of document order.
    InvalidBounds,
    /// A helper reported a failure.
    Helper { name: String, message: String },
    /// Maximum frame depth exceeded.
    Recursion { limit: usize, depth: usize },
    /// Maximum executed instructions exceeded.
    InstructionLimit { limit: u64, count: u64 },
    /// A tick was requested while another one is still running.
    TickInProgress,
}

impl RenderError {
    pub(crate) fn corrupt(ip: usize, detail: impl Into<String>) -> Self {
        Self::CorruptProgram {
            ip,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptProgram { ip, detail } => write!(f, "corrupt program at {ip}: {detail}"),
            Self::InvalidBounds => write!(f, "invalid bounds"),
            Self::Helper { name, message } => write!(f, "helper `{name}` failed: {message}"),
            Self::Recursion { limit, depth } => {
                write!(f, "maximum render depth exceeded: {depth} > {limit}")
            }
            Self::InstructionLimit { limit, count } => {
                write!(f, "instruction limit exceeded: {count} > {limit}")
            }
            Self::TickInProgress => write!(f, "a revalidation tick is already running"),
        }
    }
}

impl std::error::Error for RenderError {}
