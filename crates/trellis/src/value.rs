use std::{fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{program::BlockId, reactive::CellId, scope::ScopeId};

/// A runtime value.
///
/// Compound values are reference counted so copying them between the operand
/// stack, scopes and trackers is cheap.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    /// Trusted markup, inserted as HTML rather than text.
    SafeString(Rc<str>),
    List(Rc<[Value]>),
    Object(Rc<IndexMap<String, Value>>),
    /// A reactive cell. Reading through a cell records a dependency.
    Cell(CellId),
    /// A compiled block closed over the scope it was created in.
    Block(BlockRef),
}

/// A block value: which block to run and the scope it captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub block: BlockId,
    pub scope: ScopeId,
}

impl Value {
    #[must_use]
    pub fn str(value: &str) -> Self {
        Self::Str(Rc::from(value))
    }

    #[must_use]
    pub fn safe(html: &str) -> Self {
        Self::SafeString(Rc::from(html))
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::from(items))
    }

    #[must_use]
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Object(Rc::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()))
    }

    /// Template truthiness: `undefined`, `null`, `false`, `0`, `NaN`, `""` and
    /// empty lists are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) | Self::SafeString(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Object(_) | Self::Cell(_) | Self::Block(_) => true,
        }
    }

    /// Property access. Missing properties and non-objects read as `undefined`.
    #[must_use]
    pub fn property(&self, key: &str) -> Self {
        match self {
            Self::Object(map) => map.get(key).cloned().unwrap_or_default(),
            Self::List(items) if key == "length" => Self::Number(items.len() as f64),
            Self::List(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default(),
            Self::Str(s) | Self::SafeString(s) if key == "length" => Self::Number(s.chars().count() as f64),
            _ => Self::Undefined,
        }
    }

    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }

    /// The list items when this is a list; `None` and `undefined` iterate as empty.
    #[must_use]
    pub fn iter_items(&self) -> Option<Rc<[Self]>> {
        match self {
            Self::List(items) => Some(items.clone()),
            Self::Undefined | Self::Null => Some(Rc::from(Vec::new())),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    /// The text a value renders as.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined | Self::Null | Self::Block(_) => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Str(s) | Self::SafeString(s) => f.write_str(s),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Object(_) => f.write_str("[object Object]"),
            Self::Cell(id) => write!(f, "[cell {}]", id.raw()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<CellId> for Value {
    fn from(value: CellId) -> Self {
        Self::Cell(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::from(s),
            serde_json::Value::Array(items) => Self::list(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => Self::object(map.into_iter().map(|(k, v)| (k, Self::from(v)))),
        }
    }
}

/// Formats a number the way template output shows it: integral values
/// without a fractional part, `NaN`, `Infinity` and `-Infinity` spelled out.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() }
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        // -0 prints as 0
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
