//! Opcode definitions.
//!
//! Every instruction is one opcode word followed by a fixed number of `u32`
//! operand words (see [`Opcode::operand_count`]). Jump operands hold an `i32`
//! offset relative to the start of the next instruction.

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr, IntoStaticStr};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, IntoStaticStr, Serialize, Deserialize)]
pub enum Opcode {
    // === values ===
    /// Push constant `c`.
    PushConst,
    /// Push the value in scope slot `s` (0 is `this`).
    GetSymbol,
    /// Push the outer local with lexical index `i`, looked up by name.
    GetLexical,
    /// Pop an object, push its property named by constant `c`.
    GetProperty,
    /// Push a block value for block `b`, closed over the current scope.
    PushBlock,
    /// Push whether scope slot `s` holds a block.
    HasBlock,
    /// Call the helper in upvar `u` with `argc` positional values and the
    /// named values listed by constant `names` (popped in that order).
    Helper,
    /// Pop `n` values, push their concatenated text.
    Concat,

    // === output ===
    /// Insert the text constant `c`.
    Text,
    /// Insert an HTML comment with the text constant `c`.
    Comment,
    /// Insert an element with tag constant `c` and make it the insertion parent.
    OpenElement,
    /// Set attribute `name` to `value` (both constants) on the open element.
    StaticAttr,
    /// Pop a value and set it as attribute constant `name` on the open element.
    DynamicAttr,
    /// Restore the insertion parent from before the matching `OpenElement`.
    CloseElement,
    /// Pop a value and insert it. Trusted content (`trusting` = 1 or a safe
    /// string) is inserted as HTML.
    Append,

    // === control ===
    Jump,
    /// Pop a value, jump when it is falsy.
    JumpUnless,
    /// Pop a value, jump when it is truthy.
    JumpIf,
    /// Open an invalidation tracker of kind `k`.
    Enter,
    /// Close the innermost tracker.
    Exit,
    /// Pop a block and `argc` args below it, then run the block with the args
    /// bound to its parameters. Anything other than a block is skipped.
    InvokeBlock,
    /// Pop the inverse block (or null), the body block and the list, then run
    /// the body once per item, or the inverse when the list is empty.
    Each,
    /// Pop blocks then named args (names from constants `blocks` and `names`)
    /// and run the component in upvar `u`.
    InvokeComponent,
    /// Hand the visible locals (constant `c`) to the debugger callback.
    Debugger,
    /// Leave the current frame.
    Return,
}

impl Opcode {
    /// Number of operand words following the opcode.
    #[must_use]
    pub fn operand_count(self) -> usize {
        match self {
            Self::CloseElement | Self::Exit | Self::Each | Self::Return => 0,
            Self::PushConst
            | Self::GetSymbol
            | Self::GetLexical
            | Self::GetProperty
            | Self::PushBlock
            | Self::HasBlock
            | Self::Concat
            | Self::Text
            | Self::Comment
            | Self::OpenElement
            | Self::DynamicAttr
            | Self::Append
            | Self::Jump
            | Self::JumpUnless
            | Self::JumpIf
            | Self::Enter
            | Self::InvokeBlock
            | Self::Debugger => 1,
            Self::StaticAttr => 2,
            Self::Helper | Self::InvokeComponent => 3,
        }
    }

    /// Total words of the instruction, opcode included.
    #[inline]
    #[must_use]
    pub fn width(self) -> usize {
        1 + self.operand_count()
    }

    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jump | Self::JumpUnless | Self::JumpIf)
    }

    #[inline]
    #[must_use]
    pub fn decode(word: u32) -> Option<Self> {
        u8::try_from(word).ok().and_then(Self::from_repr)
    }
}

/// What produced an invalidation tracker.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, Serialize, Deserialize)]
pub enum TrackerKind {
    /// A `{{value}}` insertion.
    Append,
    /// A dynamic attribute. Produces no nodes.
    Attribute,
    /// `{{#if}}` / `{{#unless}}`.
    Conditional,
    /// `{{#each}}`; its children are the items.
    List,
    /// One item of a list. Created by `Each`, never by `Enter`.
    Item,
    Let,
    Component,
    Yield,
}

impl TrackerKind {
    #[inline]
    #[must_use]
    pub fn decode(word: u32) -> Option<Self> {
        u8::try_from(word).ok().and_then(Self::from_repr)
    }

    /// Whether the tracker owns a range of nodes.
    #[must_use]
    pub fn has_bounds(self) -> bool {
        !matches!(self, Self::Attribute)
    }
}
