use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// Default maximum number of nested frames (blocks plus components).
pub const DEFAULT_MAX_RENDER_DEPTH: usize = 256;

/// Limits enforced by the render and updating VMs.
///
/// Deserializable so hosts can keep them next to the rest of their configuration:
///
/// ```
/// let limits: trellis::RenderLimits = serde_json::from_str(r#"{"max_depth": 8}"#).unwrap();
/// assert_eq!(limits.max_depth, 8);
/// assert_eq!(limits.max_instructions, None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderLimits {
    /// Maximum frame depth before a render fails with [`RenderError::Recursion`].
    pub max_depth: usize,
    /// Maximum instructions executed by one render or one tick.
    pub max_instructions: Option<u64>,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_RENDER_DEPTH,
            max_instructions: None,
        }
    }
}

impl RenderLimits {
    /// Limits with no instruction cap and the default depth.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_max_instructions(mut self, max_instructions: u64) -> Self {
        self.max_instructions = Some(max_instructions);
        self
    }

    #[inline]
    pub(crate) fn check_depth(&self, depth: usize) -> Result<(), RenderError> {
        if depth > self.max_depth {
            Err(RenderError::Recursion {
                limit: self.max_depth,
                depth,
            })
        } else {
            Ok(())
        }
    }

    #[inline]
    pub(crate) fn check_instructions(&self, count: u64) -> Result<(), RenderError> {
        match self.max_instructions {
            Some(limit) if count > limit => Err(RenderError::InstructionLimit { limit, count }),
            _ => Ok(()),
        }
    }
}

/// Options controlling how templates are compiled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Report unknown top-level names as unresolved instead of treating them
    /// as implicitly available outer locals.
    pub strict: bool,
}

impl CompileOptions {
    #[must_use]
    pub fn strict() -> Self {
        Self { strict: true }
    }
}
