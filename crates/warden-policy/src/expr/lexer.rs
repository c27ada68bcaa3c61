//! Tokenizer for the condition language.

use super::ExpressionError;
use super::parser::CompareOp;

/// A lexical token with its byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Byte offset of the token's first character.
    pub position: usize,
}

/// Tokens of the condition language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare name (function or keyword-less identifier).
    Identifier(String),
    /// `#name` variable reference.
    Variable(String),
    /// Quoted string literal, unescaped.
    Str(String),
    /// Numeric literal.
    Number(f64),
    /// `true` / `false`.
    Bool(bool),
    /// `null`.
    Null,
    /// `and` / `&&`.
    And,
    /// `or` / `||`.
    Or,
    /// `not` / `!`.
    Not,
    /// Comparison operator.
    Compare(CompareOp),
    /// `(`.
    OpenParen,
    /// `)`.
    CloseParen,
    /// `,`.
    Comma,
    /// `.`.
    Dot,
    /// End of input.
    Eof,
}

/// Splits an expression into tokens on demand.
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a tokenizer over the input.
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if !pred(ch) {
                break;
            }
            self.pos += ch.len_utf8();
        }
        &self.input[start..self.pos]
    }

    /// Produce the next token.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError::Parse` on an unterminated string, a
    /// malformed number or an unexpected character.
    pub fn next_token(&mut self) -> Result<Spanned, ExpressionError> {
        self.skip_whitespace();
        let start = self.pos;

        let Some(ch) = self.peek_char() else {
            return Ok(Spanned {
                token: Token::Eof,
                position: start,
            });
        };

        let token = match ch {
            '(' => {
                self.bump();
                Token::OpenParen
            }
            ')' => {
                self.bump();
                Token::CloseParen
            }
            ',' => {
                self.bump();
                Token::Comma
            }
            '.' if !self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                self.bump();
                Token::Dot
            }
            '\'' | '"' => self.read_string(ch)?,
            '#' => {
                self.bump();
                let name = self.take_while(is_name_char);
                if name.is_empty() {
                    return Err(ExpressionError::parse("expected variable name after '#'", start));
                }
                Token::Variable(name.to_string())
            }
            '&' | '|' => {
                self.bump();
                if self.bump() != Some(ch) {
                    return Err(ExpressionError::parse(
                        format!("expected '{}{}'", ch, ch),
                        start,
                    ));
                }
                if ch == '&' { Token::And } else { Token::Or }
            }
            '=' => {
                self.bump();
                if self.bump() != Some('=') {
                    return Err(ExpressionError::parse("expected '=='", start));
                }
                Token::Compare(CompareOp::Eq)
            }
            '!' => {
                self.bump();
                if self.peek_char() == Some('=') {
                    self.bump();
                    Token::Compare(CompareOp::Ne)
                } else {
                    Token::Not
                }
            }
            '<' | '>' => {
                self.bump();
                let or_equal = self.peek_char() == Some('=');
                if or_equal {
                    self.bump();
                }
                Token::Compare(match (ch, or_equal) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                })
            }
            c if c.is_ascii_digit() || c == '.' => self.read_number(start)?,
            '-' if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                self.bump();
                self.read_number(start)?
            }
            c if is_name_start(c) => {
                let word = self.take_while(is_name_char);
                keyword(word).unwrap_or_else(|| Token::Identifier(word.to_string()))
            }
            other => {
                return Err(ExpressionError::parse(
                    format!("unexpected character '{}'", other),
                    start,
                ));
            }
        };

        Ok(Spanned {
            token,
            position: start,
        })
    }

    fn read_string(&mut self, quote: char) -> Result<Token, ExpressionError> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(ExpressionError::parse("unterminated string literal", start)),
                Some('\\') => match self.bump() {
                    Some(escaped) => value.push(escaped),
                    None => {
                        return Err(ExpressionError::parse("unterminated string literal", start));
                    }
                },
                Some(c) if c == quote => {
                    // Doubled quote escapes itself
                    if self.peek_char() == Some(quote) {
                        self.bump();
                        value.push(quote);
                    } else {
                        return Ok(Token::Str(value));
                    }
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn read_number(&mut self, start: usize) -> Result<Token, ExpressionError> {
        self.take_while(|c| c.is_ascii_digit() || c == '.');
        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExpressionError::parse(format!("invalid number '{}'", text), start))
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn keyword(word: &str) -> Option<Token> {
    let token = match word.to_ascii_lowercase().as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "true" => Token::Bool(true),
        "false" => Token::Bool(false),
        "null" => Token::Null,
        "eq" => Token::Compare(CompareOp::Eq),
        "ne" => Token::Compare(CompareOp::Ne),
        "lt" => Token::Compare(CompareOp::Lt),
        "le" => Token::Compare(CompareOp::Le),
        "gt" => Token::Compare(CompareOp::Gt),
        "ge" => Token::Compare(CompareOp::Ge),
        _ => return None,
    };
    Some(token)
}
