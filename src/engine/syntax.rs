//! Recursive-descent parser producing [`Expr`] trees.

use std::rc::Rc;

use super::ast::{
    Arg, Bind, BinaryOp, CompSpec, Expr, ExprKind, FieldKey, ImportKind, Member, Param, UnaryOp,
    Visibility,
};
use super::error::EvalErrorKind;
use super::lexer::{Lexer, Pos, Token};
use super::MAX_NESTING;

/// Parse failure: message and where it happened.
pub type SyntaxError = (EvalErrorKind, Pos);

type PResult<T> = Result<T, SyntaxError>;

/// Parse a whole document.
pub fn parse(src: &str) -> PResult<Expr> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser {
        tokens,
        index: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    if *parser.peek() != Token::Eof {
        return Err(parser.unexpected("end of file"));
    }
    Ok(expr)
}

fn binary_op(token: &Token) -> Option<BinaryOp> {
    Some(match token {
        Token::Star => BinaryOp::Mul,
        Token::Slash => BinaryOp::Div,
        Token::Percent => BinaryOp::Mod,
        Token::Plus => BinaryOp::Add,
        Token::Minus => BinaryOp::Sub,
        Token::Lt => BinaryOp::Lt,
        Token::Le => BinaryOp::Le,
        Token::Gt => BinaryOp::Gt,
        Token::Ge => BinaryOp::Ge,
        Token::In => BinaryOp::In,
        Token::EqEq => BinaryOp::Eq,
        Token::NotEq => BinaryOp::NotEq,
        Token::AndAnd => BinaryOp::And,
        Token::OrOr => BinaryOp::Or,
        _ => return None,
    })
}

fn too_deep(pos: Pos) -> SyntaxError {
    (
        EvalErrorKind::Syntax(format!("max nesting depth exceeded ({MAX_NESTING})")),
        pos,
    )
}

struct Parser {
    tokens: Vec<(Token, Pos)>,
    index: usize,
    /// Open `expr` calls.
    depth: usize,
}

impl Parser {
    // =========================================================================
    // Token Cursor
    // =========================================================================

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    /// The token `n` places ahead, or Eof past the end.
    fn peek_nth(&self, n: usize) -> &Token {
        // The lexer always terminates the stream with Eof.
        let last = self.tokens.len() - 1;
        &self.tokens[(self.index + n).min(last)].0
    }

    fn pos(&self) -> Pos {
        self.tokens[self.index].1
    }

    fn advance(&mut self) -> (Token, Pos) {
        let current = self.tokens[self.index].clone();
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
        current
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> PResult<Pos> {
        if *self.peek() == token {
            Ok(self.advance().1)
        } else {
            Err(self.unexpected(&token.describe()))
        }
    }

    fn ident(&mut self) -> PResult<String> {
        if let Token::Ident(name) = self.peek() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        (
            EvalErrorKind::Syntax(format!(
                "expected {expected}, got {}",
                self.peek().describe()
            )),
            self.pos(),
        )
    }

    /// Build a node, rejecting trees taller than the nesting limit.
    fn node(&self, kind: ExprKind, pos: Pos) -> PResult<Expr> {
        let expr = Expr::new(kind, pos);
        if expr.height() > MAX_NESTING {
            return Err(too_deep(pos));
        }
        Ok(expr)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr(&mut self) -> PResult<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(too_deep(self.pos()));
        }
        self.depth += 1;
        let result = self.binary(0);
        self.depth -= 1;
        result
    }

    fn binary(&mut self, min_precedence: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = binary_op(self.peek()) {
            let precedence = op.precedence();
            if precedence <= min_precedence {
                break;
            }
            let pos = self.advance().1;

            // `e in super` tests the inherited fields.
            if op == BinaryOp::In
                && *self.peek() == Token::Super
                && !matches!(self.peek_nth(1), Token::Dot | Token::LBracket)
            {
                self.advance();
                lhs = self.node(ExprKind::InSuper(Box::new(lhs)), pos)?;
                continue;
            }

            let rhs = self.binary(precedence)?;
            lhs = self.node(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), pos)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Token::Minus => UnaryOp::Neg,
                Token::Plus => UnaryOp::Plus,
                Token::Bang => UnaryOp::Not,
                _ => break,
            };
            ops.push((op, self.advance().1));
        }

        let mut expr = self.postfix()?;
        for (op, pos) in ops.into_iter().rev() {
            expr = self.node(ExprKind::Unary(op, Box::new(expr)), pos)?;
        }
        Ok(expr)
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let pos = self.pos();
            let kind = match self.peek() {
                Token::Dot => {
                    self.advance();
                    let field_pos = self.pos();
                    let name = self.ident()?;
                    ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(Expr::new(ExprKind::Str(name), field_pos)),
                    }
                }
                Token::LBracket => {
                    self.advance();
                    self.index_or_slice(expr)?
                }
                Token::LParen => {
                    self.advance();
                    let args = self.args()?;
                    ExprKind::Call {
                        target: Box::new(expr),
                        args,
                    }
                }
                // `base { ... }` is shorthand for `base + { ... }`.
                Token::LBrace => {
                    let object = self.primary()?;
                    ExprKind::Binary(BinaryOp::Add, Box::new(expr), Box::new(object))
                }
                _ => return Ok(expr),
            };
            expr = self.node(kind, pos)?;
        }
    }

    /// After `[` in postfix position: `[i]`, `[a:b]`, `[a:b:c]`, `[::c]`.
    fn index_or_slice(&mut self, target: Expr) -> PResult<ExprKind> {
        let start = match self.peek() {
            Token::Colon(_) => None,
            _ => Some(Box::new(self.expr()?)),
        };

        let (end, step) = match self.peek() {
            Token::RBracket => {
                self.advance();
                if let Some(index) = start {
                    return Ok(ExprKind::Index {
                        target: Box::new(target),
                        index,
                    });
                }
                return Err(self.unexpected("index"));
            }
            Token::Colon(1) => {
                self.advance();
                let end = self.slice_part()?;
                let step = if self.eat(&Token::Colon(1)) {
                    self.slice_part()?
                } else {
                    None
                };
                (end, step)
            }
            Token::Colon(2) => {
                self.advance();
                (None, self.slice_part()?)
            }
            _ => return Err(self.unexpected("`]` or `:`")),
        };
        self.expect(Token::RBracket)?;
        Ok(ExprKind::Slice {
            target: Box::new(target),
            start,
            end,
            step,
        })
    }

    fn slice_part(&mut self) -> PResult<Option<Box<Expr>>> {
        match self.peek() {
            Token::Colon(_) | Token::RBracket => Ok(None),
            _ => Ok(Some(Box::new(self.expr()?))),
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let (token, pos) = self.advance();
        let kind = match token {
            Token::Null => ExprKind::Null,
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
            Token::Number(n) => ExprKind::Number(n),
            Token::Str(s) => ExprKind::Str(s),
            Token::Ident(name) => ExprKind::Var(name),
            Token::SelfKw => ExprKind::SelfRef,
            Token::Dollar => ExprKind::Dollar,
            Token::Super => self.super_index()?,
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                return Ok(inner);
            }
            Token::LBracket => self.array()?,
            Token::LBrace => self.object()?,
            Token::Local => {
                let binds = self.binds()?;
                self.expect(Token::Semicolon)?;
                let body = self.expr()?;
                ExprKind::Local(binds.into(), Box::new(body))
            }
            Token::If => {
                let cond = self.expr()?;
                self.expect(Token::Then)?;
                let then = self.expr()?;
                let otherwise = if self.eat(&Token::Else) {
                    Some(Box::new(self.expr()?))
                } else {
                    None
                };
                ExprKind::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise,
                }
            }
            Token::Function => {
                self.expect(Token::LParen)?;
                let params = self.params()?;
                let body = self.expr()?;
                ExprKind::Function {
                    params,
                    body: Rc::new(body),
                }
            }
            Token::Error => ExprKind::Error(Box::new(self.expr()?)),
            Token::Assert => {
                let cond = self.expr()?;
                let message = if self.eat(&Token::Colon(1)) {
                    Some(Box::new(self.expr()?))
                } else {
                    None
                };
                self.expect(Token::Semicolon)?;
                let body = self.expr()?;
                ExprKind::Assert {
                    cond: Box::new(cond),
                    message,
                    body: Box::new(body),
                }
            }
            Token::Import => self.import(ImportKind::Code, pos)?,
            Token::ImportStr => self.import(ImportKind::Str, pos)?,
            Token::ImportBin => self.import(ImportKind::Bin, pos)?,
            other => {
                return Err((
                    EvalErrorKind::Syntax(format!("unexpected {}", other.describe())),
                    pos,
                ));
            }
        };
        self.node(kind, pos)
    }

    // =========================================================================
    // Pieces
    // =========================================================================

    /// After `super`: `.name` or `[expr]`.
    fn super_index(&mut self) -> PResult<ExprKind> {
        let index = match self.advance() {
            (Token::Dot, _) => {
                let pos = self.pos();
                Expr::new(ExprKind::Str(self.ident()?), pos)
            }
            (Token::LBracket, _) => {
                let index = self.expr()?;
                self.expect(Token::RBracket)?;
                index
            }
            (other, at) => {
                return Err((
                    EvalErrorKind::Syntax(format!(
                        "expected `.` or `[` after super, got {}",
                        other.describe()
                    )),
                    at,
                ));
            }
        };
        Ok(ExprKind::SuperIndex(Box::new(index)))
    }

    /// After `[`: an array literal or an array comprehension.
    fn array(&mut self) -> PResult<ExprKind> {
        if self.eat(&Token::RBracket) {
            return Ok(ExprKind::Array(Vec::new()));
        }
        let first = self.expr()?;
        if *self.peek() == Token::For {
            let specs = self.comp_specs()?;
            self.expect(Token::RBracket)?;
            return Ok(ExprKind::ArrayComp {
                body: Box::new(first),
                specs,
            });
        }

        let mut items = vec![first];
        if self.eat(&Token::Comma) {
            items.extend(self.list(Token::RBracket, Self::expr)?);
        } else {
            self.expect(Token::RBracket)?;
        }
        Ok(ExprKind::Array(items))
    }

    /// After `{`: an object literal or an object comprehension.
    fn object(&mut self) -> PResult<ExprKind> {
        let mut members = Vec::new();
        loop {
            if self.eat(&Token::RBrace) {
                break;
            }
            members.push(self.member()?);
            if *self.peek() == Token::For {
                return self.object_comp(members);
            }
            if !self.eat(&Token::Comma) {
                self.expect(Token::RBrace)?;
                break;
            }
        }
        Ok(ExprKind::Object(members.into()))
    }

    fn object_comp(&mut self, members: Vec<Member>) -> PResult<ExprKind> {
        let pos = self.pos();
        let mut locals = Vec::new();
        let mut field = None;
        for member in members {
            match member {
                Member::Local(bind) => locals.push(bind),
                Member::Field {
                    key: FieldKey::Computed(key),
                    plus: false,
                    visibility: Visibility::Inherit,
                    value,
                } if field.is_none() => field = Some((key, value)),
                Member::Field { .. } => {
                    return Err((
                        EvalErrorKind::Syntax(
                            "object comprehension needs exactly one `[key]: value` field".into(),
                        ),
                        pos,
                    ));
                }
            }
        }
        let Some((key, value)) = field else {
            return Err((
                EvalErrorKind::Syntax("object comprehension has no field".into()),
                pos,
            ));
        };

        let specs = self.comp_specs()?;
        self.expect(Token::RBrace)?;
        Ok(ExprKind::ObjectComp {
            locals: locals.into(),
            key: Box::new(key),
            value,
            specs,
        })
    }

    /// `for x in e` followed by any mix of `for` and `if` clauses.
    fn comp_specs(&mut self) -> PResult<Vec<CompSpec>> {
        let mut specs = Vec::new();
        loop {
            if self.eat(&Token::For) {
                let var = self.ident()?;
                self.expect(Token::In)?;
                let list = self.expr()?;
                specs.push(CompSpec::For { var, list });
            } else if self.eat(&Token::If) {
                specs.push(CompSpec::If(self.expr()?));
            } else {
                return Ok(specs);
            }
        }
    }

    /// The string literal after an import keyword.
    fn import(&mut self, kind: ImportKind, pos: Pos) -> PResult<ExprKind> {
        match self.advance().0 {
            Token::Str(path) => Ok(ExprKind::Import(kind, path)),
            _ => Err((
                EvalErrorKind::Syntax("computed imports are not allowed; use a string literal".into()),
                pos,
            )),
        }
    }

    /// Comma-separated items up to `close`, trailing comma allowed.
    /// The opening delimiter has already been consumed.
    fn list<T>(&mut self, close: Token, mut item: impl FnMut(&mut Self) -> PResult<T>) -> PResult<Vec<T>> {
        let mut items = Vec::new();
        loop {
            if self.eat(&close) {
                return Ok(items);
            }
            items.push(item(self)?);
            if !self.eat(&Token::Comma) {
                self.expect(close.clone())?;
                return Ok(items);
            }
        }
    }

    /// Parameters after `(`, through the closing `)`.
    fn params(&mut self) -> PResult<Rc<[Param]>> {
        let params = self.list(Token::RParen, |p| {
            let name = p.ident()?;
            let default = if p.eat(&Token::Assign) {
                Some(Rc::new(p.expr()?))
            } else {
                None
            };
            Ok(Param { name, default })
        })?;
        Ok(params.into())
    }

    /// Call arguments after `(`. Named arguments follow positional ones.
    fn args(&mut self) -> PResult<Vec<Arg>> {
        let args = self.list(Token::RParen, |p| {
            let name = match (p.peek(), p.peek_nth(1)) {
                (Token::Ident(name), Token::Assign) => {
                    let name = name.clone();
                    p.advance();
                    p.advance();
                    Some(name)
                }
                _ => None,
            };
            let value = Rc::new(p.expr()?);
            Ok(Arg { name, value })
        })?;

        if let Some(i) = args.iter().position(|a| a.name.is_some())
            && let Some(late) = args[i..].iter().find(|a| a.name.is_none())
        {
            return Err((
                EvalErrorKind::Syntax("positional argument after a named argument".into()),
                late.value.pos,
            ));
        }
        Ok(args)
    }

    fn binds(&mut self) -> PResult<Vec<Bind>> {
        let mut binds = vec![self.bind()?];
        while self.eat(&Token::Comma) {
            binds.push(self.bind()?);
        }
        Ok(binds)
    }

    /// `name = expr` or `name(params) = expr`.
    fn bind(&mut self) -> PResult<Bind> {
        let pos = self.pos();
        let name = self.ident()?;
        let params = if self.eat(&Token::LParen) {
            Some(self.params()?)
        } else {
            None
        };
        self.expect(Token::Assign)?;
        let value = self.expr()?;
        Ok(Bind {
            name,
            value: Rc::new(wrap_function(params, value, pos)),
        })
    }

    fn member(&mut self) -> PResult<Member> {
        if self.eat(&Token::Local) {
            return Ok(Member::Local(self.bind()?));
        }

        let pos = self.pos();
        let key = match self.advance().0 {
            Token::Ident(name) | Token::Str(name) => FieldKey::Fixed(name),
            Token::LBracket => {
                let key = self.expr()?;
                self.expect(Token::RBracket)?;
                FieldKey::Computed(key)
            }
            other => {
                return Err((
                    EvalErrorKind::Syntax(format!("expected field name, got {}", other.describe())),
                    pos,
                ));
            }
        };

        let params = if self.eat(&Token::LParen) {
            Some(self.params()?)
        } else {
            None
        };
        let plus = self.eat(&Token::Plus);

        let visibility = match self.advance() {
            (Token::Colon(1), _) => Visibility::Inherit,
            (Token::Colon(2), _) => Visibility::Hidden,
            (Token::Colon(_), _) => Visibility::Visible,
            (other, at) => {
                return Err((
                    EvalErrorKind::Syntax(format!("expected `:`, got {}", other.describe())),
                    at,
                ));
            }
        };

        let value = self.expr()?;
        Ok(Member::Field {
            key,
            plus,
            visibility,
            value: Rc::new(wrap_function(params, value, pos)),
        })
    }
}

fn wrap_function(params: Option<Rc<[Param]>>, body: Expr, pos: Pos) -> Expr {
    match params {
        Some(params) => Expr::new(
            ExprKind::Function {
                params,
                body: Rc::new(body),
            },
            pos,
        ),
        None => body,
    }
}
