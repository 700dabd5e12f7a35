//! Syntax tree.
//!
//! Sub-expressions that may be evaluated lazily (bindings, arguments, field
//! bodies) are held in `Rc` so thunks and objects can share them.

use std::rc::Rc;

use super::lexer::Pos;

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
    height: usize,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        let height = child_height(&kind) + 1;
        Self { kind, pos, height }
    }

    /// Levels in the tree rooted here; a leaf is 1.
    pub fn height(&self) -> usize {
        self.height
    }
}

fn child_height(kind: &ExprKind) -> usize {
    fn max<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> usize {
        exprs.into_iter().map(Expr::height).max().unwrap_or(0)
    }
    fn binds(binds: &[Bind]) -> usize {
        max(binds.iter().map(|b| &*b.value))
    }
    fn specs(specs: &[CompSpec]) -> usize {
        max(specs.iter().map(|spec| match spec {
            CompSpec::For { list, .. } => list,
            CompSpec::If(cond) => cond,
        }))
    }

    match kind {
        ExprKind::Null
        | ExprKind::Bool(_)
        | ExprKind::Number(_)
        | ExprKind::Str(_)
        | ExprKind::Var(_)
        | ExprKind::SelfRef
        | ExprKind::Dollar
        | ExprKind::Import(..) => 0,
        ExprKind::SuperIndex(e) | ExprKind::InSuper(e) | ExprKind::Error(e) | ExprKind::Unary(_, e) => {
            e.height()
        }
        ExprKind::Array(items) => max(items),
        ExprKind::ArrayComp { body, specs: s } => body.height().max(specs(s)),
        ExprKind::Object(members) => max(members.iter().flat_map(|m| match m {
            Member::Local(b) => [Some(&*b.value), None],
            Member::Field { key, value, .. } => [
                Some(&**value),
                match key {
                    FieldKey::Computed(k) => Some(k),
                    FieldKey::Fixed(_) => None,
                },
            ],
        })
        .flatten()),
        ExprKind::ObjectComp {
            locals,
            key,
            value,
            specs: s,
        } => binds(locals).max(key.height()).max(value.height()).max(specs(s)),
        ExprKind::Local(b, body) => binds(b).max(body.height()),
        ExprKind::If {
            cond,
            then,
            otherwise,
        } => max([cond.as_ref(), then.as_ref()].into_iter().chain(otherwise.as_deref())),
        ExprKind::Assert {
            cond,
            message,
            body,
        } => max([cond.as_ref(), body.as_ref()].into_iter().chain(message.as_deref())),
        ExprKind::Function { params, body } => {
            max(params.iter().filter_map(|p| p.default.as_deref())).max(body.height())
        }
        ExprKind::Call { target, args } => target.height().max(max(args.iter().map(|a| &*a.value))),
        ExprKind::Index { target, index } => target.height().max(index.height()),
        ExprKind::Slice {
            target,
            start,
            end,
            step,
        } => max(
            [Some(target), start.as_ref(), end.as_ref(), step.as_ref()]
                .into_iter()
                .flatten()
                .map(|e| &**e),
        ),
        ExprKind::Binary(_, lhs, rhs) => lhs.height().max(rhs.height()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import`: evaluate the file as Jsonnet.
    Code,
    /// `importstr`: the file as a string.
    Str,
    /// `importbin`: the file as an array of bytes.
    Bin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Plus => "+",
            Self::Not => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Eq,
    NotEq,
    And,
    Or,
}

impl BinaryOp {
    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::NotEq => 3,
            Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::In => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Mod => 6,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Field visibility marker: `:`, `::` or `:::`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Inherit,
    Hidden,
    Visible,
}

#[derive(Debug, Clone)]
pub enum FieldKey {
    Fixed(String),
    Computed(Expr),
}

#[derive(Debug, Clone)]
pub enum Member {
    Local(Bind),
    Field {
        key: FieldKey,
        /// `+:` adds to the inherited value.
        plus: bool,
        visibility: Visibility,
        value: Rc<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct Bind {
    pub name: String,
    pub value: Rc<Expr>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Rc<Expr>>,
}

#[derive(Debug, Clone)]
pub struct Arg {
    /// Set for `name = value` arguments.
    pub name: Option<String>,
    pub value: Rc<Expr>,
}

/// One `for` or `if` clause of a comprehension.
#[derive(Debug, Clone)]
pub enum CompSpec {
    For { var: String, list: Expr },
    If(Expr),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Var(String),
    /// `self`
    SelfRef,
    /// `$`, the outermost object.
    Dollar,
    /// `super.name` or `super[expr]`.
    SuperIndex(Box<Expr>),
    /// `expr in super`.
    InSuper(Box<Expr>),
    Array(Vec<Expr>),
    ArrayComp {
        body: Box<Expr>,
        specs: Vec<CompSpec>,
    },
    Object(Rc<[Member]>),
    ObjectComp {
        locals: Rc<[Bind]>,
        key: Box<Expr>,
        value: Rc<Expr>,
        specs: Vec<CompSpec>,
    },
    Local(Rc<[Bind]>, Box<Expr>),
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Error(Box<Expr>),
    Assert {
        cond: Box<Expr>,
        message: Option<Box<Expr>>,
        body: Box<Expr>,
    },
    Function {
        params: Rc<[Param]>,
        body: Rc<Expr>,
    },
    Call {
        target: Box<Expr>,
        args: Vec<Arg>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Import(ImportKind, String),
}
