//! Tokenizer.

use super::error::EvalErrorKind;

/// Line/column of a token start, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),

    // Keywords
    Local,
    Import,
    ImportStr,
    ImportBin,
    True,
    False,
    Null,
    If,
    Then,
    Else,
    Error,
    Function,
    SelfKw,
    Super,
    For,
    In,
    Assert,

    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    Dollar,
    /// One, two or three colons (`:`, `::`, `:::`).
    Colon(u8),

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,

    Eof,
}

impl Token {
    /// Short human description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier `{name}`"),
            Self::Number(n) => format!("number {n}"),
            Self::Str(s) => format!("string {s:?}"),
            Self::Eof => "end of file".to_owned(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Import => "import",
            Self::ImportStr => "importstr",
            Self::ImportBin => "importbin",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::If => "if",
            Self::Then => "then",
            Self::Else => "else",
            Self::Error => "error",
            Self::Function => "function",
            Self::SelfKw => "self",
            Self::Super => "super",
            Self::For => "for",
            Self::In => "in",
            Self::Assert => "assert",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::Comma => ",",
            Self::Semicolon => ";",
            Self::Dot => ".",
            Self::Dollar => "$",
            Self::Colon(1) => ":",
            Self::Colon(2) => "::",
            Self::Colon(_) => ":::",
            Self::Assign => "=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Bang => "!",
            Self::Ident(_) | Self::Number(_) | Self::Str(_) | Self::Eof => "",
        }
    }
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "local" => Token::Local,
        "import" => Token::Import,
        "importstr" => Token::ImportStr,
        "importbin" => Token::ImportBin,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        "if" => Token::If,
        "then" => Token::Then,
        "else" => Token::Else,
        "error" => Token::Error,
        "function" => Token::Function,
        "self" => Token::SelfKw,
        "super" => Token::Super,
        "for" => Token::For,
        "in" => Token::In,
        "assert" => Token::Assert,
        _ => return None,
    })
}

/// Lexing failure: message and where it happened.
pub type LexError = (EvalErrorKind, Pos);

pub struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole input. The last token is always [`Token::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<(Token, Pos)>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let pos = self.pos();
            let Some(c) = self.peek() else {
                tokens.push((Token::Eof, pos));
                return Ok(tokens);
            };
            let token = self.next_token(c).map_err(|kind| (kind, pos))?;
            tokens.push((token, pos));
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(offset, c)| self.peek_at(offset) == Some(c))
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('#'), _) | (Some('/'), Some('/')) => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.pos();
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err((
                                    EvalErrorKind::Syntax("unterminated comment".into()),
                                    start,
                                ));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self, c: char) -> Result<Token, EvalErrorKind> {
        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(self.word());
        }
        if c.is_ascii_digit() {
            return self.number();
        }
        if c == '"' || c == '\'' {
            return self.string(c);
        }
        if c == '@' {
            self.bump();
            return match self.peek() {
                Some(quote @ ('"' | '\'')) => self.verbatim(quote),
                _ => Err(EvalErrorKind::Syntax("expected string after @".into())),
            };
        }
        if self.starts_with("|||") {
            return self.text_block();
        }

        self.bump();
        let token = match c {
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '.' => Token::Dot,
            '$' => Token::Dollar,
            ':' => {
                let mut count = 1;
                while count < 3 && self.eat(':') {
                    count += 1;
                }
                Token::Colon(count)
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' if self.eat('=') => Token::EqEq,
            '=' => Token::Assign,
            '!' if self.eat('=') => Token::NotEq,
            '!' => Token::Bang,
            '<' if self.eat('=') => Token::Le,
            '<' => Token::Lt,
            '>' if self.eat('=') => Token::Ge,
            '>' => Token::Gt,
            '&' if self.eat('&') => Token::AndAnd,
            '|' if self.eat('|') => Token::OrOr,
            other => {
                return Err(EvalErrorKind::Syntax(format!("unexpected character {other:?}")));
            }
        };
        Ok(token)
    }

    fn word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        keyword(&word).unwrap_or(Token::Ident(word))
    }

    fn number(&mut self) -> Result<Token, EvalErrorKind> {
        let mut text = String::new();
        self.digits(&mut text);

        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.bump();
            self.digits(&mut text);
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            text.push('e');
            self.bump();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                text.push(sign);
                self.bump();
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(EvalErrorKind::Syntax(format!("malformed number exponent in {text:?}")));
            }
            self.digits(&mut text);
        }

        text.parse()
            .map(Token::Number)
            .map_err(|_| EvalErrorKind::Syntax(format!("malformed number {text:?}")))
    }

    fn digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            out.push(c);
            self.bump();
        }
    }

    fn string(&mut self, quote: char) -> Result<Token, EvalErrorKind> {
        self.bump();
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(EvalErrorKind::Syntax("unterminated string".into()));
            };
            match c {
                c if c == quote => return Ok(Token::Str(out)),
                '\\' => out.push(self.escape()?),
                c => out.push(c),
            }
        }
    }

    /// `@'...'`: no escapes except a doubled quote.
    fn verbatim(&mut self, quote: char) -> Result<Token, EvalErrorKind> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(EvalErrorKind::Syntax("unterminated string".into())),
                Some(c) if c == quote => {
                    if !self.eat(quote) {
                        return Ok(Token::Str(out));
                    }
                    out.push(quote);
                }
                Some(c) => out.push(c),
            }
        }
    }

    /// `|||` text block. The first line's indentation is stripped from every
    /// line; a line indented less closes the block with `|||`.
    fn text_block(&mut self) -> Result<Token, EvalErrorKind> {
        for _ in 0..3 {
            self.bump();
        }
        while matches!(self.peek(), Some(' ' | '\t' | '\r')) {
            self.bump();
        }
        if !self.eat('\n') {
            return Err(EvalErrorKind::Syntax("text block requires a new line after |||".into()));
        }

        let mut out = String::new();
        while self.eat('\n') {
            out.push('\n');
        }
        let indent: String = self.chars[self.index..]
            .iter()
            .take_while(|c| matches!(c, ' ' | '\t'))
            .collect();
        if indent.is_empty() {
            return Err(EvalErrorKind::Syntax("text block's first line must start with whitespace".into()));
        }

        loop {
            if self.starts_with(&indent) {
                for _ in 0..indent.chars().count() {
                    self.bump();
                }
                loop {
                    match self.bump() {
                        Some('\n') => break,
                        Some(c) => out.push(c),
                        None => {
                            return Err(EvalErrorKind::Syntax("unexpected end of file in text block".into()));
                        }
                    }
                }
                out.push('\n');
            } else if self.eat('\n') {
                out.push('\n');
            } else {
                while matches!(self.peek(), Some(' ' | '\t')) {
                    self.bump();
                }
                if !self.starts_with("|||") {
                    return Err(EvalErrorKind::Syntax("text block not terminated with |||".into()));
                }
                for _ in 0..3 {
                    self.bump();
                }
                return Ok(Token::Str(out));
            }
        }
    }

    fn escape(&mut self) -> Result<char, EvalErrorKind> {
        let Some(c) = self.bump() else {
            return Err(EvalErrorKind::Syntax("unterminated string".into()));
        };
        Ok(match c {
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            '/' => '/',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'u' => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let digit = self
                        .bump()
                        .and_then(|d| d.to_digit(16))
                        .ok_or_else(|| EvalErrorKind::Syntax("malformed \\u escape".into()))?;
                    code = code * 16 + digit;
                }
                char::from_u32(code).ok_or_else(|| {
                    EvalErrorKind::Syntax(format!("invalid unicode escape \\u{code:04x}"))
                })?
            }
            other => {
                return Err(EvalErrorKind::Syntax(format!("unknown escape sequence \\{other}")));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_punctuation_and_keywords() {
        assert_eq!(
            kinds("local x = { a:: 1 }; x"),
            vec![
                Token::Local,
                Token::Ident("x".into()),
                Token::Assign,
                Token::LBrace,
                Token::Ident("a".into()),
                Token::Colon(2),
                Token::Number(1.0),
                Token::RBrace,
                Token::Semicolon,
                Token::Ident("x".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nA""#),
            vec![Token::Str("it's".into()), Token::Str("a\nA".into()), Token::Eof]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 1e3 7.25E-1"),
            vec![
                Token::Number(1.0),
                Token::Number(2.5),
                Token::Number(1000.0),
                Token::Number(0.725),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("// line\n# hash\n/* block\n */ 1"),
            vec![Token::Number(1.0), Token::Eof]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("{\n  a: 1\n}").tokenize().unwrap();
        assert_eq!(tokens[1].1, Pos { line: 2, column: 3 });
    }

    #[test]
    fn test_object_keywords() {
        assert_eq!(
            kinds("self super $ x in y"),
            vec![
                Token::SelfKw,
                Token::Super,
                Token::Dollar,
                Token::Ident("x".into()),
                Token::In,
                Token::Ident("y".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_verbatim_string() {
        assert_eq!(
            kinds(r"@'a\b''c'"),
            vec![Token::Str(r"a\b'c".into()), Token::Eof]
        );
    }

    #[test]
    fn test_text_block() {
        let src = "|||\n  line one\n\n    indented\n|||";
        assert_eq!(
            kinds(src),
            vec![Token::Str("line one\n\n  indented\n".into()), Token::Eof]
        );
        assert!(Lexer::new("|||\nno indent\n|||").tokenize().is_err());
    }

    #[test]
    fn test_unterminated_string() {
        let (kind, pos) = Lexer::new("  'abc").tokenize().unwrap_err();
        assert!(kind.to_string().contains("unterminated string"));
        assert_eq!(pos, Pos { line: 1, column: 3 });
    }
}
