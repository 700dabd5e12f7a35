//! Lazy tree-walking evaluator.
//!
//! Locals, arguments and object fields are bound as thunks and evaluated on
//! first use. Imports go through the [`Importer`] and are evaluated once per
//! resolved path.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use super::ast::{
    Arg, BinaryOp, Bind, CompSpec, Expr, ExprKind, FieldKey, ImportKind, Member, UnaryOp, Visibility,
};
use super::error::{EvalError, EvalErrorKind, EvalResult, Location};
use super::lexer::Pos;
use super::stdlib;
use super::syntax::parse;
use super::value::{
    Closure, FieldBody, Layer, LayerField, ObjectValue, Thunk, ThunkState, Value,
};
use super::{decode_utf8, Importer};
use crate::resolver::ResolvedImport;

/// Function call nesting limit.
const MAX_STACK: usize = 500;

/// Nesting limit for evaluation, manifestation and comparison.
const MAX_DEPTH: usize = 10_000;

/// Name used in locations for documents without a path.
pub const ANONYMOUS: &str = "<anonymous>";

// =============================================================================
// Environment
// =============================================================================

/// Variables in scope plus the object context for `self`, `super` and `$`.
#[derive(Clone, Default)]
pub struct Env {
    vars: Option<Rc<Binding>>,
    this: Option<SelfRef>,
    dollar: Option<Rc<ObjectValue>>,
}

struct Binding {
    name: String,
    thunk: Rc<Thunk>,
    next: Option<Rc<Binding>>,
}

/// The object being evaluated and the layer the current field came from.
/// `super` refers to the layers below it.
#[derive(Clone)]
struct SelfRef {
    object: Rc<ObjectValue>,
    layer: usize,
}

impl Env {
    fn bind(&self, name: &str, thunk: Rc<Thunk>) -> Self {
        Self {
            vars: Some(Rc::new(Binding {
                name: name.to_owned(),
                thunk,
                next: self.vars.clone(),
            })),
            ..self.clone()
        }
    }

    fn lookup(&self, name: &str) -> Option<&Rc<Thunk>> {
        let mut cursor = self.vars.as_deref();
        while let Some(binding) = cursor {
            if binding.name == name {
                return Some(&binding.thunk);
            }
            cursor = binding.next.as_deref();
        }
        None
    }
}

// =============================================================================
// Document
// =============================================================================

/// A parsed unit: the top-level snippet or one imported file.
pub struct Document {
    path: Option<PathBuf>,
    name: String,
    source: String,
}

impl Document {
    fn new(path: Option<&Path>, source: &str) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            name: path.map_or_else(|| ANONYMOUS.to_owned(), |p| p.display().to_string()),
            source: source.to_owned(),
        }
    }

    /// Attach `pos` to an error that has no location yet.
    pub(super) fn locate(&self, error: EvalError, pos: Pos) -> EvalError {
        if error.location().is_some() {
            return error;
        }
        let line = self
            .source
            .lines()
            .nth(pos.line.saturating_sub(1))
            .map(str::to_owned);
        error.at(
            Location {
                file: self.name.clone(),
                line: pos.line,
                column: pos.column,
            },
            line,
        )
    }

    fn error(&self, kind: EvalErrorKind, pos: Pos) -> EvalError {
        self.locate(EvalError::new(kind), pos)
    }

    pub(super) fn fail(&self, pos: Pos, message: impl Into<String>) -> EvalError {
        self.error(EvalErrorKind::Runtime(message.into()), pos)
    }
}

/// Runtime error without a location; the caller adds one.
pub(super) fn runtime(message: impl Into<String>) -> EvalError {
    EvalError::new(EvalErrorKind::Runtime(message.into()))
}

// =============================================================================
// Evaluator
// =============================================================================

/// Values that can end up referring to themselves.
enum Tracked {
    Thunk(Weak<Thunk>),
    Object(Weak<ObjectValue>),
}

/// Decrements a depth counter when dropped.
pub(super) struct Nested<'a>(&'a Cell<usize>);

impl Drop for Nested<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

pub struct Evaluator<'i> {
    importer: &'i dyn Importer,
    std: Value,
    imported: RefCell<FxHashMap<PathBuf, Value>>,
    in_progress: RefCell<Vec<PathBuf>>,
    calls: Cell<usize>,
    depth: Cell<usize>,
    tracked: RefCell<Vec<Tracked>>,
}

impl Drop for Evaluator<'_> {
    /// Recursive locals and cached fields can form `Rc` cycles; clearing
    /// them frees every value the evaluation produced.
    fn drop(&mut self) {
        for tracked in self.tracked.get_mut().drain(..) {
            match tracked {
                Tracked::Thunk(thunk) => {
                    if let Some(thunk) = thunk.upgrade() {
                        thunk.clear();
                    }
                }
                Tracked::Object(object) => {
                    if let Some(object) = object.upgrade() {
                        drop(object.cache.take());
                    }
                }
            }
        }
    }
}

impl<'i> Evaluator<'i> {
    pub fn new(importer: &'i dyn Importer) -> Self {
        Self {
            importer,
            std: stdlib::std_object(),
            imported: RefCell::new(FxHashMap::default()),
            in_progress: RefCell::new(Vec::new()),
            calls: Cell::new(0),
            depth: Cell::new(0),
            tracked: RefCell::new(Vec::new()),
        }
    }

    /// Evaluate a document and convert the result to JSON.
    pub fn run(&self, path: Option<&Path>, source: &str) -> EvalResult<serde_json::Value> {
        let value = self.evaluate(path, source)?;
        self.manifest(&value)
    }

    /// Evaluate a document. `path` is `None` for anonymous snippets.
    pub fn evaluate(&self, path: Option<&Path>, source: &str) -> EvalResult<Value> {
        let doc = Rc::new(Document::new(path, source));
        let expr = parse(&doc.source).map_err(|(kind, pos)| doc.error(kind, pos))?;
        let env = Env::default().bind("std", Thunk::done(self.std.clone()));

        if let Some(path) = path {
            self.in_progress.borrow_mut().push(path.to_path_buf());
        }
        let result = self.eval(&doc, &expr, &env);
        if path.is_some() {
            self.in_progress.borrow_mut().pop();
        }
        result
    }

    // =========================================================================
    // Limits
    // =========================================================================

    fn nested(counter: &Cell<usize>, limit: usize) -> EvalResult<Nested<'_>> {
        if counter.get() >= limit {
            return Err(runtime("max stack frames exceeded"));
        }
        counter.set(counter.get() + 1);
        Ok(Nested(counter))
    }

    /// Guard for one level of recursion inside the evaluator.
    pub(super) fn descend(&self) -> EvalResult<Nested<'_>> {
        Self::nested(&self.depth, MAX_DEPTH)
    }

    fn track(&self, tracked: Tracked) {
        self.tracked.borrow_mut().push(tracked);
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn eval(&self, doc: &Rc<Document>, expr: &Expr, env: &Env) -> EvalResult<Value> {
        let _level = self.descend().map_err(|e| doc.locate(e, expr.pos))?;
        let pos = expr.pos;
        match &expr.kind {
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::string(s.as_str())),
            ExprKind::Var(name) => match env.lookup(name) {
                Some(thunk) => self.force(thunk),
                None => Err(doc.fail(pos, format!("unknown variable: {name}"))),
            },
            ExprKind::SelfRef => match &env.this {
                Some(this) => Ok(Value::Object(Rc::clone(&this.object))),
                None => Err(doc.fail(pos, "can't use self outside of an object")),
            },
            ExprKind::Dollar => match &env.dollar {
                Some(object) => Ok(Value::Object(Rc::clone(object))),
                None => Err(doc.fail(pos, "can't use $ outside of an object")),
            },
            ExprKind::SuperIndex(index) => {
                let this = env
                    .this
                    .as_ref()
                    .ok_or_else(|| doc.fail(pos, "can't use super outside of an object"))?;
                let name = self.field_name(doc, index, env)?;
                self.field_below(&this.object, this.layer, &name)?
                    .ok_or_else(|| doc.fail(pos, format!("field does not exist: {name}")))
            }
            ExprKind::InSuper(name) => {
                let name = self.field_name(doc, name, env)?;
                Ok(Value::Bool(env.this.as_ref().is_some_and(|this| {
                    this.object.has_field_below(this.layer, &name)
                })))
            }
            ExprKind::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(doc, item, env))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::array(values))
            }
            ExprKind::ArrayComp { body, specs } => {
                let mut values = Vec::new();
                self.for_each_binding(doc, specs, env, &mut |scope| {
                    values.push(self.eval(doc, body, scope)?);
                    Ok(())
                })?;
                Ok(Value::array(values))
            }
            ExprKind::Object(members) => self.object(doc, members, env),
            ExprKind::ObjectComp {
                locals,
                key,
                value,
                specs,
            } => self.object_comprehension(doc, locals, key, value, specs, env),
            ExprKind::Local(binds, body) => {
                let scope = self.bind_recursive(doc, binds, env);
                self.eval(doc, body, &scope)
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                if self.condition(doc, cond, env)? {
                    self.eval(doc, then, env)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval(doc, otherwise, env),
                        None => Ok(Value::Null),
                    }
                }
            }
            ExprKind::Error(message) => {
                let message = self.eval(doc, message, env)?;
                let text = self.to_text(&message).map_err(|e| doc.locate(e, pos))?;
                Err(doc.fail(pos, text))
            }
            ExprKind::Assert {
                cond,
                message,
                body,
            } => {
                if !self.condition(doc, cond, env)? {
                    let text = match message {
                        Some(message) => {
                            let message = self.eval(doc, message, env)?;
                            self.to_text(&message).map_err(|e| doc.locate(e, pos))?
                        }
                        None => "Assertion failed".to_owned(),
                    };
                    return Err(doc.fail(pos, text));
                }
                self.eval(doc, body, env)
            }
            ExprKind::Function { params, body } => Ok(Value::Function(Rc::new(Closure {
                params: Rc::clone(params),
                body: Rc::clone(body),
                env: env.clone(),
                doc: Rc::clone(doc),
            }))),
            ExprKind::Call { target, args } => {
                let callee = self.eval(doc, target, env)?;
                let (positional, named) = self.arg_thunks(doc, args, env);
                self.apply(&callee, positional, named)
                    .map_err(|e| doc.locate(e, pos))
            }
            ExprKind::Index { target, index } => {
                let target = self.eval(doc, target, env)?;
                let index = self.eval(doc, index, env)?;
                self.index(&target, &index).map_err(|e| doc.locate(e, pos))
            }
            ExprKind::Slice {
                target,
                start,
                end,
                step,
            } => {
                let target = self.eval(doc, target, env)?;
                let bound = |part: &Option<Box<Expr>>| -> EvalResult<Option<f64>> {
                    match part {
                        None => Ok(None),
                        Some(expr) => match self.eval(doc, expr, env)? {
                            Value::Null => Ok(None),
                            Value::Number(n) => Ok(Some(n)),
                            other => Err(doc.fail(
                                expr.pos,
                                format!("slice index must be number, got {}", other.type_name()),
                            )),
                        },
                    }
                };
                let (start, end, step) = (bound(start)?, bound(end)?, bound(step)?);
                slice(&target, start, end, step).map_err(|m| doc.fail(pos, m))
            }
            ExprKind::Unary(op, operand) => {
                let value = self.eval(doc, operand, env)?;
                unary(*op, &value).map_err(|m| doc.fail(pos, m))
            }
            ExprKind::Binary(BinaryOp::And, lhs, rhs) => {
                Ok(Value::Bool(
                    self.boolean(doc, lhs, env, BinaryOp::And)?
                        && self.boolean(doc, rhs, env, BinaryOp::And)?,
                ))
            }
            ExprKind::Binary(BinaryOp::Or, lhs, rhs) => {
                Ok(Value::Bool(
                    self.boolean(doc, lhs, env, BinaryOp::Or)?
                        || self.boolean(doc, rhs, env, BinaryOp::Or)?,
                ))
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lhs = self.eval(doc, lhs, env)?;
                let rhs = self.eval(doc, rhs, env)?;
                self.binary(*op, &lhs, &rhs).map_err(|e| doc.locate(e, pos))
            }
            ExprKind::Import(kind, path) => self.import(doc, pos, *kind, path),
        }
    }

    pub(super) fn force(&self, thunk: &Thunk) -> EvalResult<Value> {
        let (expr, env, doc) = match &*thunk.state.borrow() {
            ThunkState::Done(value) => return Ok(value.clone()),
            ThunkState::Forcing(doc, pos) => {
                return Err(doc.fail(*pos, "infinite recursion: value depends on itself"));
            }
            ThunkState::Pending { expr, env, doc } => (Rc::clone(expr), env.clone(), Rc::clone(doc)),
        };

        thunk
            .state
            .replace(ThunkState::Forcing(Rc::clone(&doc), expr.pos));
        match self.eval(&doc, &expr, &env) {
            Ok(value) => {
                thunk.state.replace(ThunkState::Done(value.clone()));
                Ok(value)
            }
            Err(error) => {
                thunk.state.replace(ThunkState::Pending { expr, env, doc });
                Err(error)
            }
        }
    }

    fn condition(&self, doc: &Rc<Document>, cond: &Expr, env: &Env) -> EvalResult<bool> {
        match self.eval(doc, cond, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(doc.fail(
                cond.pos,
                format!("condition must be boolean, got {}", other.type_name()),
            )),
        }
    }

    fn boolean(&self, doc: &Rc<Document>, expr: &Expr, env: &Env, op: BinaryOp) -> EvalResult<bool> {
        match self.eval(doc, expr, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(doc.fail(
                expr.pos,
                format!("operator {} expects boolean, got {}", op.symbol(), other.type_name()),
            )),
        }
    }

    /// Bind `binds` so that each can refer to all of them.
    fn bind_recursive(&self, doc: &Rc<Document>, binds: &[Bind], env: &Env) -> Env {
        let thunks: Vec<Rc<Thunk>> = binds
            .iter()
            .map(|b| Thunk::pending(Rc::clone(&b.value), Env::default(), Rc::clone(doc)))
            .collect();
        let mut scope = env.clone();
        for (b, thunk) in binds.iter().zip(&thunks) {
            scope = scope.bind(&b.name, Rc::clone(thunk));
        }
        for thunk in &thunks {
            thunk.set_env(scope.clone());
            self.track(Tracked::Thunk(Rc::downgrade(thunk)));
        }
        scope
    }

    /// Run `f` once per combination the `for`/`if` clauses produce.
    fn for_each_binding(
        &self,
        doc: &Rc<Document>,
        specs: &[CompSpec],
        env: &Env,
        f: &mut dyn FnMut(&Env) -> EvalResult<()>,
    ) -> EvalResult<()> {
        let Some((spec, rest)) = specs.split_first() else {
            return f(env);
        };
        match spec {
            CompSpec::For { var, list } => {
                let items = match self.eval(doc, list, env)? {
                    Value::Array(items) => items,
                    other => {
                        return Err(doc.fail(
                            list.pos,
                            format!("in comprehension, expected array, got {}", other.type_name()),
                        ));
                    }
                };
                for item in items.iter() {
                    let scope = env.bind(var, Thunk::done(item.clone()));
                    self.for_each_binding(doc, rest, &scope, f)?;
                }
                Ok(())
            }
            CompSpec::If(cond) => {
                if self.condition(doc, cond, env)? {
                    self.for_each_binding(doc, rest, env, f)
                } else {
                    Ok(())
                }
            }
        }
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// A field name expression: string, or `null` to omit the field.
    fn field_key(&self, doc: &Rc<Document>, key: &Expr, env: &Env) -> EvalResult<Option<String>> {
        match self.eval(doc, key, env)? {
            Value::Str(s) => Ok(Some(s.to_string())),
            Value::Null => Ok(None),
            other => Err(doc.fail(
                key.pos,
                format!("field name must be string, got {}", other.type_name()),
            )),
        }
    }

    fn field_name(&self, doc: &Rc<Document>, key: &Expr, env: &Env) -> EvalResult<String> {
        match self.eval(doc, key, env)? {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(doc.fail(
                key.pos,
                format!("field name must be string, got {}", other.type_name()),
            )),
        }
    }

    fn object(&self, doc: &Rc<Document>, members: &[Member], env: &Env) -> EvalResult<Value> {
        let mut fields = FxHashMap::default();
        let mut locals = Vec::new();
        for member in members {
            let (key, plus, visibility, value) = match member {
                Member::Local(bind) => {
                    locals.push(bind.clone());
                    continue;
                }
                Member::Field {
                    key,
                    plus,
                    visibility,
                    value,
                } => (key, *plus, *visibility, value),
            };

            let name = match key {
                FieldKey::Fixed(name) => name.clone(),
                FieldKey::Computed(expr) => match self.field_key(doc, expr, env)? {
                    Some(name) => name,
                    None => continue,
                },
            };
            let field = LayerField {
                visibility,
                plus,
                body: FieldBody::Expr {
                    expr: Rc::clone(value),
                    env: env.clone(),
                    doc: Rc::clone(doc),
                },
            };
            if fields.insert(name.clone(), field).is_some() {
                return Err(doc.fail(value.pos, format!("duplicate field name: {name:?}")));
            }
        }

        let layer = Layer {
            fields,
            locals: locals.into(),
        };
        Ok(Value::Object(Rc::new(ObjectValue::new(vec![Rc::new(layer)]))))
    }

    fn object_comprehension(
        &self,
        doc: &Rc<Document>,
        locals: &Rc<[Bind]>,
        key: &Expr,
        value: &Rc<Expr>,
        specs: &[CompSpec],
        env: &Env,
    ) -> EvalResult<Value> {
        let mut fields = FxHashMap::default();
        self.for_each_binding(doc, specs, env, &mut |scope| {
            let Some(name) = self.field_key(doc, key, scope)? else {
                return Ok(());
            };
            let field = LayerField {
                visibility: Visibility::Inherit,
                plus: false,
                body: FieldBody::Expr {
                    expr: Rc::clone(value),
                    env: scope.clone(),
                    doc: Rc::clone(doc),
                },
            };
            match fields.insert(name.clone(), field) {
                Some(_) => Err(doc.fail(key.pos, format!("duplicate field name: {name:?}"))),
                None => Ok(()),
            }
        })?;

        let layer = Layer {
            fields,
            locals: Rc::clone(locals),
        };
        Ok(Value::Object(Rc::new(ObjectValue::new(vec![Rc::new(layer)]))))
    }

    /// Read a field of the whole object.
    pub(super) fn field(&self, object: &Rc<ObjectValue>, name: &str) -> EvalResult<Option<Value>> {
        self.field_below(object, object.layers.len(), name)
    }

    /// Read `name` from the topmost of the lowest `upto` layers, with `self`
    /// bound to the whole object.
    fn field_below(&self, object: &Rc<ObjectValue>, upto: usize, name: &str) -> EvalResult<Option<Value>> {
        let whole = upto == object.layers.len();
        if whole && let Some(value) = object.cache.borrow().get(name) {
            return Ok(Some(value.clone()));
        }
        let Some(index) = object.layers[..upto]
            .iter()
            .rposition(|layer| layer.fields.contains_key(name))
        else {
            return Ok(None);
        };
        let layer = Rc::clone(&object.layers[index]);
        let Some(field) = layer.fields.get(name) else {
            return Ok(None);
        };

        let value = match &field.body {
            FieldBody::Value(value) => value.clone(),
            FieldBody::Expr { expr, env, doc } => {
                let mut scope = env.clone();
                scope.this = Some(SelfRef {
                    object: Rc::clone(object),
                    layer: index,
                });
                if scope.dollar.is_none() {
                    scope.dollar = Some(Rc::clone(object));
                }
                if !layer.locals.is_empty() {
                    scope = self.bind_recursive(doc, &layer.locals, &scope);
                }

                let value = self.eval(doc, expr, &scope)?;
                match (field.plus, self.field_below(object, index, name)?) {
                    (true, Some(inherited)) => self
                        .binary(BinaryOp::Add, &inherited, &value)
                        .map_err(|e| doc.locate(e, expr.pos))?,
                    _ => value,
                }
            }
        };

        if whole {
            let mut cache = object.cache.borrow_mut();
            if cache.is_empty() {
                self.track(Tracked::Object(Rc::downgrade(object)));
            }
            cache.insert(name.to_owned(), value.clone());
        }
        Ok(Some(value))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn arg_thunks(
        &self,
        doc: &Rc<Document>,
        args: &[Arg],
        env: &Env,
    ) -> (Vec<Rc<Thunk>>, Vec<(String, Rc<Thunk>)>) {
        let mut positional = Vec::new();
        let mut named = Vec::new();
        for arg in args {
            let thunk = Thunk::pending(Rc::clone(&arg.value), env.clone(), Rc::clone(doc));
            match &arg.name {
                Some(name) => named.push((name.clone(), thunk)),
                None => positional.push(thunk),
            }
        }
        (positional, named)
    }

    /// Call a function value with already-evaluated arguments.
    pub(super) fn call_function(&self, function: &Value, args: &[Value]) -> EvalResult<Value> {
        let positional = args.iter().cloned().map(Thunk::done).collect();
        self.apply(function, positional, Vec::new())
    }

    /// Call `callee`. Errors raised here have no location; the caller's
    /// call site is attached by the caller.
    fn apply(
        &self,
        callee: &Value,
        positional: Vec<Rc<Thunk>>,
        named: Vec<(String, Rc<Thunk>)>,
    ) -> EvalResult<Value> {
        let _frame = Self::nested(&self.calls, MAX_STACK)?;
        match callee {
            Value::Function(closure) => {
                let names: Vec<&str> = closure.params.iter().map(|p| p.name.as_str()).collect();
                let slots = assign_args(&names, positional, named)?;

                let mut scope = closure.env.clone();
                let mut defaults = Vec::new();
                for (param, slot) in closure.params.iter().zip(slots) {
                    let thunk = match (slot, &param.default) {
                        (Some(thunk), _) => thunk,
                        (None, Some(default)) => {
                            let thunk =
                                Thunk::pending(Rc::clone(default), Env::default(), Rc::clone(&closure.doc));
                            defaults.push(Rc::clone(&thunk));
                            thunk
                        }
                        (None, None) => return Err(runtime(format!("missing argument: {}", param.name))),
                    };
                    scope = scope.bind(&param.name, thunk);
                }
                // Defaults may refer to other parameters.
                for thunk in defaults {
                    thunk.set_env(scope.clone());
                    self.track(Tracked::Thunk(Rc::downgrade(&thunk)));
                }

                self.eval(&closure.doc, &closure.body, &scope)
            }
            Value::Builtin(builtin) => {
                let slots = assign_args(builtin.params, positional, named)?;
                let mut args = Vec::with_capacity(slots.len());
                for (i, slot) in slots.into_iter().enumerate() {
                    args.push(match slot {
                        Some(thunk) => self.force(&thunk)?,
                        None if i >= builtin.required => Value::Null,
                        None => {
                            return Err(runtime(format!(
                                "std.{}: missing argument: {}",
                                builtin.name, builtin.params[i]
                            )));
                        }
                    });
                }
                (builtin.run)(self, &args)
            }
            other => Err(runtime(format!(
                "only functions can be called, got {}",
                other.type_name()
            ))),
        }
    }

    // =========================================================================
    // Imports
    // =========================================================================

    fn import(&self, doc: &Rc<Document>, pos: Pos, kind: ImportKind, path: &str) -> EvalResult<Value> {
        let from = doc.path.as_deref().unwrap_or(Path::new(""));
        let found = self
            .importer
            .import(from, path)
            .map_err(|e| doc.error(EvalErrorKind::Import(e), pos))?
            .ok_or_else(|| {
                doc.error(
                    EvalErrorKind::ImportNotFound {
                        path: path.to_owned(),
                    },
                    pos,
                )
            })?;

        match kind {
            ImportKind::Str => Ok(Value::string(import_text(doc, pos, &found)?)),
            ImportKind::Bin => Ok(Value::array(
                found
                    .contents
                    .iter()
                    .map(|b| Value::Number(f64::from(*b)))
                    .collect(),
            )),
            ImportKind::Code => {
                if let Some(value) = self.imported.borrow().get(&found.found_at) {
                    return Ok(value.clone());
                }
                if self.in_progress.borrow().contains(&found.found_at) {
                    return Err(doc.error(
                        EvalErrorKind::ImportCycle {
                            path: found.found_at.display().to_string(),
                        },
                        pos,
                    ));
                }

                let source = import_text(doc, pos, &found)?;
                let value = {
                    let _frame = Self::nested(&self.calls, MAX_STACK).map_err(|e| doc.locate(e, pos))?;
                    self.evaluate(Some(&found.found_at), source)?
                };

                self.imported
                    .borrow_mut()
                    .insert(found.found_at.clone(), value.clone());
                Ok(value)
            }
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    /// Binary operators other than the short-circuiting ones.
    pub(super) fn binary(&self, op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
        use Value::{Array, Number, Object, Str};

        Ok(match (op, lhs, rhs) {
            (BinaryOp::Add, Number(a), Number(b)) => Number(a + b),
            (BinaryOp::Add, Str(_), _) | (BinaryOp::Add, _, Str(_)) => {
                let mut s = self.to_text(lhs)?;
                s.push_str(&self.to_text(rhs)?);
                Value::string(s)
            }
            (BinaryOp::Add, Array(a), Array(b)) => {
                Value::array(a.iter().chain(b.iter()).cloned().collect())
            }
            (BinaryOp::Add, Object(a), Object(b)) => Object(Rc::new(a.extend(b))),
            (BinaryOp::Mod, Str(fmt), values) => {
                Value::string(stdlib::format(self, fmt, values)?)
            }
            (BinaryOp::In, Str(name), Object(object)) => Value::Bool(object.has_field(name, true)),
            (BinaryOp::Eq, _, _) => Value::Bool(self.equals(lhs, rhs)?),
            (BinaryOp::NotEq, _, _) => Value::Bool(!self.equals(lhs, rhs)?),
            _ => arithmetic(op, lhs, rhs).map_err(runtime)?,
        })
    }

    fn index(&self, target: &Value, index: &Value) -> EvalResult<Value> {
        match (target, index) {
            (Value::Object(object), Value::Str(name)) => self
                .field(object, name)?
                .ok_or_else(|| runtime(format!("field does not exist: {name}"))),
            (Value::Object(_), other) => Err(runtime(format!(
                "object index must be string, got {}",
                other.type_name()
            ))),
            _ => index_value(target, index).map_err(runtime),
        }
    }

    /// String form used by `+` with a string operand and by `error`.
    pub(super) fn to_text(&self, value: &Value) -> EvalResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => Ok(stdlib::inline_json(&self.manifest(other)?)),
        }
    }

    // =========================================================================
    // Manifestation
    // =========================================================================

    /// Convert to JSON, dropping hidden fields.
    pub fn manifest(&self, value: &Value) -> EvalResult<serde_json::Value> {
        let _level = self.descend()?;
        Ok(match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(super::value::manifest_number(*n).map_err(runtime)?),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.manifest(item))
                    .collect::<EvalResult<_>>()?,
            ),
            Value::Object(object) => {
                let mut map = serde_json::Map::new();
                for name in object.field_names(false) {
                    let value = self
                        .field(object, &name)?
                        .ok_or_else(|| runtime(format!("field does not exist: {name}")))?;
                    map.insert(name, self.manifest(&value)?);
                }
                serde_json::Value::Object(map)
            }
            Value::Function(_) | Value::Builtin(_) => {
                return Err(runtime("couldn't manifest function as JSON"));
            }
        })
    }

    /// Structural equality; hidden fields are ignored.
    pub(super) fn equals(&self, lhs: &Value, rhs: &Value) -> EvalResult<bool> {
        let _level = self.descend()?;
        Ok(match (lhs, rhs) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b.iter()) {
                    if !self.equals(x, y)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Object(a), Value::Object(b)) => {
                let names = a.field_names(false);
                if names != b.field_names(false) {
                    return Ok(false);
                }
                for name in &names {
                    let (Some(x), Some(y)) = (self.field(a, name)?, self.field(b, name)?) else {
                        return Ok(false);
                    };
                    if !self.equals(&x, &y)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Function(_) | Value::Builtin(_), _) | (_, Value::Function(_) | Value::Builtin(_)) => {
                return Err(runtime("cannot test equality of functions"));
            }
            _ => false,
        })
    }
}

fn import_text<'a>(doc: &Document, pos: Pos, found: &'a ResolvedImport) -> EvalResult<&'a str> {
    decode_utf8(&found.contents)
        .map_err(|e| doc.fail(pos, format!("{}: invalid UTF-8: {e}", found.found_at.display())))
}

/// Match call arguments to parameter names.
fn assign_args(
    params: &[&str],
    positional: Vec<Rc<Thunk>>,
    named: Vec<(String, Rc<Thunk>)>,
) -> EvalResult<Vec<Option<Rc<Thunk>>>> {
    if positional.len() > params.len() {
        return Err(runtime(format!(
            "function expected {} argument(s), got {}",
            params.len(),
            positional.len()
        )));
    }
    let mut slots: Vec<Option<Rc<Thunk>>> = vec![None; params.len()];
    for (slot, thunk) in slots.iter_mut().zip(positional) {
        *slot = Some(thunk);
    }
    for (name, thunk) in named {
        let Some(i) = params.iter().position(|p| *p == name) else {
            return Err(runtime(format!("function has no parameter {name}")));
        };
        if slots[i].is_some() {
            return Err(runtime(format!("argument {name} already provided")));
        }
        slots[i] = Some(thunk);
    }
    Ok(slots)
}

// =============================================================================
// Operators
// =============================================================================

fn unary(op: UnaryOp, value: &Value) -> Result<Value, String> {
    match (op, value) {
        (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Plus, Value::Number(n)) => Ok(Value::Number(*n)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, value) => Err(format!(
            "unary operator {} does not operate on {}",
            op.symbol(),
            value.type_name()
        )),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    use Value::{Number, Str};

    Ok(match (op, lhs, rhs) {
        (BinaryOp::Sub, Number(a), Number(b)) => Number(a - b),
        (BinaryOp::Mul, Number(a), Number(b)) => Number(a * b),
        (BinaryOp::Div | BinaryOp::Mod, Number(_), Number(b)) if *b == 0.0 => {
            return Err("division by zero".into());
        }
        (BinaryOp::Div, Number(a), Number(b)) => Number(a / b),
        (BinaryOp::Mod, Number(a), Number(b)) => Number(a % b),
        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, Number(a), Number(b)) => {
            Value::Bool(compare(op, a.partial_cmp(b)))
        }
        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, Str(a), Str(b)) => {
            Value::Bool(compare(op, Some(a.cmp(b))))
        }
        _ => {
            return Err(format!(
                "binary operator {} does not operate on {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            ));
        }
    })
}

fn compare(op: BinaryOp, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    matches!(
        (op, ordering),
        (BinaryOp::Lt, Some(Less))
            | (BinaryOp::Le, Some(Less | Equal))
            | (BinaryOp::Gt, Some(Greater))
            | (BinaryOp::Ge, Some(Greater | Equal))
    )
}

fn index_value(target: &Value, index: &Value) -> Result<Value, String> {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = array_index(*n, items.len())?;
            Ok(items[i].clone())
        }
        (Value::Str(s), Value::Number(n)) => {
            let chars: Vec<char> = s.chars().collect();
            let i = array_index(*n, chars.len())?;
            Ok(Value::string(chars[i].to_string()))
        }
        (Value::Array(_) | Value::Str(_), other) => Err(format!(
            "index must be number, got {}",
            other.type_name()
        )),
        (other, _) => Err(format!("value of type {} is not indexable", other.type_name())),
    }
}

fn array_index(n: f64, len: usize) -> Result<usize, String> {
    if n.fract() != 0.0 {
        return Err(format!("index must be an integer, got {n}"));
    }
    if n < 0.0 || n >= len as f64 {
        return Err(format!("index {n} out of bounds, length {len}"));
    }
    Ok(n as usize)
}

/// `target[start:end:step]` on arrays and strings. Missing bounds default to
/// the whole sequence; negative bounds are not supported.
fn slice(target: &Value, start: Option<f64>, end: Option<f64>, step: Option<f64>) -> Result<Value, String> {
    let bound = |n: Option<f64>, default: usize, what: &str| -> Result<usize, String> {
        match n {
            None => Ok(default),
            Some(n) if n < 0.0 || n.fract() != 0.0 => {
                Err(format!("slice {what} must be a non-negative integer, got {n}"))
            }
            Some(n) => Ok(n as usize),
        }
    };
    let step = bound(step, 1, "step")?;
    if step == 0 {
        return Err("slice step must be greater than zero".into());
    }

    let pick = |len: usize| -> Result<std::iter::StepBy<std::ops::Range<usize>>, String> {
        let start = bound(start, 0, "start")?.min(len);
        let end = bound(end, len, "end")?.min(len);
        Ok((start..end.max(start)).step_by(step))
    };

    match target {
        Value::Array(items) => Ok(Value::array(
            pick(items.len())?.map(|i| items[i].clone()).collect(),
        )),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::string(
                pick(chars.len())?.map(|i| chars[i]).collect::<String>(),
            ))
        }
        other => Err(format!("value of type {} cannot be sliced", other.type_name())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveError;

    /// Importer that never finds anything.
    struct NoImports;

    impl Importer for NoImports {
        fn import(&self, _: &Path, _: &str) -> Result<Option<ResolvedImport>, ResolveError> {
            Ok(None)
        }
    }

    fn eval(src: &str) -> EvalResult<serde_json::Value> {
        Evaluator::new(&NoImports).run(None, src)
    }

    fn eval_err(src: &str) -> String {
        eval(src).unwrap_err().to_string()
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3 - 4 / 2").unwrap(), serde_json::json!(5));
        assert_eq!(eval("-(1 + 2) % 2").unwrap(), serde_json::json!(-1));
        assert_eq!(eval("7 % 4").unwrap(), serde_json::json!(3));
    }

    #[test]
    fn test_strings() {
        assert_eq!(eval("'a' + 'b'").unwrap(), serde_json::json!("ab"));
        assert_eq!(eval("'n=' + 3").unwrap(), serde_json::json!("n=3"));
        assert_eq!(eval("'abc'[1]").unwrap(), serde_json::json!("b"));
        assert_eq!(eval("'a' < 'b'").unwrap(), serde_json::json!(true));
        assert_eq!(eval("'v' + [1, true]").unwrap(), serde_json::json!("v[1, true]"));
    }

    #[test]
    fn test_locals_and_functions() {
        let src = "local add(a, b) = a + b, two = add(1, 1); { r: add(two, 3), f: (function(x) x * 2)(4) }";
        assert_eq!(eval(src).unwrap(), serde_json::json!({ "r": 5, "f": 8 }));
    }

    #[test]
    fn test_closures_capture_scope() {
        let src = "local k = 10; local f(x) = x + k; local k = 0; f(1)";
        assert_eq!(eval(src).unwrap(), serde_json::json!(11));
    }

    #[test]
    fn test_recursive_locals() {
        let src = "local fact(n) = if n <= 1 then 1 else n * fact(n - 1); fact(5)";
        assert_eq!(eval(src).unwrap(), serde_json::json!(120));
        let src = "local even(n) = n == 0 || odd(n - 1), odd(n) = n != 0 && even(n - 1); even(10)";
        assert_eq!(eval(src).unwrap(), serde_json::json!(true));
    }

    #[test]
    fn test_bindings_are_lazy() {
        assert_eq!(eval("local unused = error 'never'; 1").unwrap(), serde_json::json!(1));
        assert_eq!(
            eval("local f(a, b) = a; f(1, error 'never')").unwrap(),
            serde_json::json!(1)
        );
        assert_eq!(
            eval("{ a: 1, b:: error 'hidden' }").unwrap(),
            serde_json::json!({ "a": 1 })
        );
    }

    #[test]
    fn test_default_and_named_arguments() {
        let src = "local f(a, b=a * 2, c=b + 1) = [a, b, c]; [f(1), f(1, c=0), f(b=5, a=0)]";
        assert_eq!(
            eval(src).unwrap(),
            serde_json::json!([[1, 2, 3], [1, 2, 0], [0, 5, 6]])
        );
        assert!(eval_err("local f(a) = a; f(b=1)").contains("function has no parameter b"));
        assert!(eval_err("local f(a) = a; f()").contains("missing argument: a"));
        assert!(eval_err("local f(a) = a; f(1, 2)").contains("function expected 1 argument(s), got 2"));
    }

    #[test]
    fn test_self_and_inheritance() {
        let src = r#"
            {
              person1: {
                name: "Alice",
                welcome: "Hello " + self.name + "!",
              },
              person2: self.person1 { name: "Bob" },
            }
        "#;
        assert_eq!(
            eval(src).unwrap(),
            serde_json::json!({
                "person1": { "name": "Alice", "welcome": "Hello Alice!" },
                "person2": { "name": "Bob", "welcome": "Hello Bob!" },
            })
        );
    }

    #[test]
    fn test_super_and_plus_fields() {
        let src = r#"
            local base = { greeting: 'hi', tags: ['a'], n: 1 };
            base + {
              greeting: super.greeting + '!',
              tags+: ['b'],
              n+: 10,
              fresh+: ['only'],
              has: 'tags' in super,
              missing: 'nope' in super,
            }
        "#;
        assert_eq!(
            eval(src).unwrap(),
            serde_json::json!({
                "greeting": "hi!",
                "tags": ["a", "b"],
                "n": 11,
                "fresh": ["only"],
                "has": true,
                "missing": false,
            })
        );
        assert!(eval_err("{ a: super.x }").contains("field does not exist: x"));
        assert!(eval_err("self.a").contains("can't use self outside of an object"));
    }

    #[test]
    fn test_dollar_is_outermost_object() {
        let src = "{ top: 1, inner: { value: $.top + 1, own: self.k, k: 5 } }";
        assert_eq!(
            eval(src).unwrap(),
            serde_json::json!({ "top": 1, "inner": { "value": 2, "own": 5, "k": 5 } })
        );
    }

    #[test]
    fn test_object_locals_see_self() {
        let src = "{ local twice = self.n * 2, n: 3, m: twice }";
        assert_eq!(eval(src).unwrap(), serde_json::json!({ "n": 3, "m": 6 }));
        let src = "{ local twice = self.n * 2, n: 3, m: twice } + { n: 10 }";
        assert_eq!(eval(src).unwrap(), serde_json::json!({ "n": 10, "m": 20 }));
    }

    #[test]
    fn test_objects_hidden_and_merge() {
        let src = r#"
            local base = { a: 1, h:: 'hidden', keep:: 0 };
            base + { b: 2, h: 'still hidden', keep::: 1 }
        "#;
        assert_eq!(
            eval(src).unwrap(),
            serde_json::json!({ "a": 1, "b": 2, "keep": 1 })
        );
    }

    #[test]
    fn test_object_locals_and_computed_keys() {
        let src = "{ local p = 'x', [p + '1']: 1, [null]: 2, 'quoted key': p }";
        assert!(eval(src).is_err());
        let src = "local p = 'x'; { local q = p, [p + '1']: 1, [null]: 2, 'quoted key': q }";
        assert_eq!(
            eval(src).unwrap(),
            serde_json::json!({ "x1": 1, "quoted key": "x" })
        );
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(
            eval("[x * y for x in [1, 2] for y in [10, 20] if x * y != 20]").unwrap(),
            serde_json::json!([10, 40])
        );
        assert_eq!(
            eval("{ [k]: k + '!' for k in ['a', 'b'] }").unwrap(),
            serde_json::json!({ "a": "a!", "b": "b!" })
        );
        assert!(eval_err("[x for x in 3]").contains("expected array, got number"));
        assert!(eval_err("{ [k]: 1 for k in ['a', 'a'] }").contains("duplicate field name"));
    }

    #[test]
    fn test_object_apply_sugar() {
        assert_eq!(
            eval("local b = { a: 1 }; b { a: 2 }.a").unwrap(),
            serde_json::json!(2)
        );
    }

    #[test]
    fn test_conditionals_and_asserts() {
        assert_eq!(eval("if 1 < 2 then 'y' else 'n'").unwrap(), serde_json::json!("y"));
        assert_eq!(eval("if false then 1").unwrap(), serde_json::Value::Null);
        assert_eq!(eval("true && !false || error 'x'").unwrap(), serde_json::json!(true));
        assert_eq!(eval("assert 1 < 2; 'ok'").unwrap(), serde_json::json!("ok"));
        assert!(eval_err("assert 1 > 2 : 'too small'; 'ok'").ends_with("too small"));
        assert!(eval_err("assert false; 1").ends_with("Assertion failed"));
    }

    #[test]
    fn test_arrays_and_slices() {
        assert_eq!(eval("([1, 2] + [3])[2]").unwrap(), serde_json::json!(3));
        assert_eq!(eval("[1, [2]] == [1, [2]]").unwrap(), serde_json::json!(true));
        assert_eq!(eval("[0, 1, 2, 3, 4][1:4]").unwrap(), serde_json::json!([1, 2, 3]));
        assert_eq!(eval("[0, 1, 2, 3, 4][::2]").unwrap(), serde_json::json!([0, 2, 4]));
        assert_eq!(eval("'hello'[1:3]").unwrap(), serde_json::json!("el"));
    }

    #[test]
    fn test_object_equality_and_in() {
        assert_eq!(eval("{ a: 1, h:: 2 } == { a: 1 }").unwrap(), serde_json::json!(true));
        assert_eq!(eval("'h' in { h:: 2 }").unwrap(), serde_json::json!(true));
        assert!(eval_err("(function() 1) == (function() 1)").contains("cannot test equality of functions"));
    }

    #[test]
    fn test_string_formatting_operator() {
        assert_eq!(eval("'%s-%d' % ['a', 3]").unwrap(), serde_json::json!("a-3"));
        assert_eq!(eval("'%(x)s' % { x: 'y' }").unwrap(), serde_json::json!("y"));
    }

    #[test]
    fn test_runtime_errors_have_locations() {
        assert_eq!(eval_err("{\n  a: error 'boom',\n}"), "<anonymous>:2:6: boom");
        assert!(eval_err("local x = 1; y").contains("unknown variable: y"));
        assert!(eval_err("{ a: 1 }.b").contains("field does not exist: b"));
        assert!(eval_err("1 / 0").contains("division by zero"));
        assert!(eval_err("[1][3]").contains("out of bounds"));
        assert!(eval_err("{ a: 1, a: 2 }").contains("duplicate field name"));
        assert!(eval_err("1 + true").contains("binary operator + does not operate on number and boolean"));
        assert!(eval_err("local x = x; x").contains("infinite recursion"));
    }

    #[test]
    fn test_syntax_error_location() {
        let err = eval("{ a: }").unwrap_err();
        assert!(matches!(err.kind(), EvalErrorKind::Syntax(_)));
        let loc = err.location().unwrap();
        assert_eq!((loc.line, loc.column), (1, 6));
        assert_eq!(err.source_line(), Some("{ a: }"));
    }

    #[test]
    fn test_missing_import() {
        let err = eval_err("import 'nope.libsonnet'");
        assert!(err.contains(r#"couldn't open import "nope.libsonnet""#));
    }

    #[test]
    fn test_function_manifest_fails() {
        assert!(eval_err("function(x) x").contains("couldn't manifest function"));
        assert!(eval_err("{ f: std.length }").contains("couldn't manifest function"));
    }
}
