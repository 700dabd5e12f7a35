//! Runtime values.
//!
//! Objects are stacks of [`Layer`]s: `a + b` puts `b`'s layers on top of
//! `a`'s. Field bodies stay unevaluated until read, and `self`/`super`
//! resolve against the whole stack, so inheritance works the Jsonnet way.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Number;

use super::ast::{Bind, Expr, Param, Visibility};
use super::error::EvalResult;
use super::eval::{Document, Env, Evaluator};

// =============================================================================
// Values
// =============================================================================

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<Vec<Value>>),
    Object(Rc<ObjectValue>),
    Function(Rc<Closure>),
    Builtin(&'static Builtin),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Function(_) | Self::Builtin(_) => "function",
        }
    }

    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(items))
    }
}

/// Integral values within the exactly-representable range print without a
/// fractional part.
pub fn manifest_number(n: f64) -> Result<Number, String> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() <= MAX_EXACT {
        return Ok(Number::from(n as i64));
    }
    Number::from_f64(n).ok_or_else(|| format!("cannot manifest non-finite number {n}"))
}

// =============================================================================
// Thunks
// =============================================================================

/// A lazily evaluated binding.
pub struct Thunk {
    pub(super) state: RefCell<ThunkState>,
}

pub(super) enum ThunkState {
    Pending {
        expr: Rc<Expr>,
        env: Env,
        doc: Rc<Document>,
    },
    /// Being evaluated; reaching it again means the value depends on itself.
    Forcing(Rc<Document>, super::lexer::Pos),
    Done(Value),
}

impl Thunk {
    pub fn done(value: Value) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(ThunkState::Done(value)),
        })
    }

    pub fn pending(expr: Rc<Expr>, env: Env, doc: Rc<Document>) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(ThunkState::Pending { expr, env, doc }),
        })
    }

    /// Point a pending thunk at the scope it was bound into.
    pub(super) fn set_env(&self, scope: Env) {
        if let ThunkState::Pending { env, .. } = &mut *self.state.borrow_mut() {
            *env = scope;
        }
    }

    /// Drop whatever the thunk holds.
    pub(super) fn clear(&self) {
        self.state.replace(ThunkState::Done(Value::Null));
    }
}

// =============================================================================
// Functions
// =============================================================================

pub struct Closure {
    pub params: Rc<[Param]>,
    pub body: Rc<Expr>,
    pub env: Env,
    /// Document the body was parsed from, for error locations.
    pub doc: Rc<Document>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        write!(f, "function({})", names.join(", "))
    }
}

/// Native function behind a `std` field.
pub type BuiltinFn = fn(&Evaluator<'_>, &[Value]) -> EvalResult<Value>;

pub struct Builtin {
    pub name: &'static str,
    pub params: &'static [&'static str],
    /// Leading parameters that must be supplied; the rest arrive as `null`.
    pub required: usize,
    pub run: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "std.{}({})", self.name, self.params.join(", "))
    }
}

// =============================================================================
// Objects
// =============================================================================

pub struct LayerField {
    pub visibility: Visibility,
    /// `+:`: combine with the inherited value.
    pub plus: bool,
    pub body: FieldBody,
}

pub enum FieldBody {
    /// Evaluated on first read with `self` bound.
    Expr {
        expr: Rc<Expr>,
        env: Env,
        doc: Rc<Document>,
    },
    /// Already known, e.g. builtins and values decoded from JSON.
    Value(Value),
}

/// One object literal (or comprehension) in an inheritance stack.
pub struct Layer {
    pub fields: FxHashMap<String, LayerField>,
    /// Object locals, bound in every field's scope.
    pub locals: Rc<[Bind]>,
}

pub struct ObjectValue {
    /// Base first; later layers override earlier ones.
    pub(super) layers: Vec<Rc<Layer>>,
    /// Field values of the full stack, by name.
    pub(super) cache: RefCell<FxHashMap<String, Value>>,
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.field_names(true)).finish()
    }
}

impl ObjectValue {
    pub fn new(layers: Vec<Rc<Layer>>) -> Self {
        Self {
            layers,
            cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// Object whose fields are plain values.
    pub fn from_values(fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        let fields = fields
            .into_iter()
            .map(|(name, value)| {
                (
                    name,
                    LayerField {
                        visibility: Visibility::Inherit,
                        plus: false,
                        body: FieldBody::Value(value),
                    },
                )
            })
            .collect();
        Self::new(vec![Rc::new(Layer {
            fields,
            locals: Rc::from([]),
        })])
    }

    /// `self + other`.
    pub fn extend(&self, other: &ObjectValue) -> Self {
        Self::new(self.layers.iter().chain(&other.layers).cloned().collect())
    }

    /// Whether any of the lowest `upto` layers defines `name`.
    pub fn has_field_below(&self, upto: usize, name: &str) -> bool {
        self.layers[..upto]
            .iter()
            .any(|layer| layer.fields.contains_key(name))
    }

    /// Visibility after inheritance: the topmost explicit marker wins, and a
    /// field with only `:` markers is visible.
    pub fn is_visible(&self, name: &str) -> bool {
        for layer in self.layers.iter().rev() {
            match layer.fields.get(name).map(|f| f.visibility) {
                Some(Visibility::Hidden) => return false,
                Some(Visibility::Visible) => return true,
                Some(Visibility::Inherit) | None => {}
            }
        }
        true
    }

    /// Field names in sorted order, optionally including hidden ones.
    pub fn field_names(&self, include_hidden: bool) -> Vec<String> {
        let mut seen = FxHashSet::default();
        let mut names: Vec<String> = self
            .layers
            .iter()
            .flat_map(|layer| layer.fields.keys())
            .filter(|name| seen.insert(name.as_str()))
            .filter(|name| include_hidden || self.is_visible(name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn has_field(&self, name: &str, include_hidden: bool) -> bool {
        self.has_field_below(self.layers.len(), name) && (include_hidden || self.is_visible(name))
    }
}
