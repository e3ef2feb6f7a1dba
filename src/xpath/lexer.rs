//! XPath Lexer
//!
//! Tokenizes XPath expressions into tokens.
//!
//! `and`, `or`, `div` and `mod` are operators only where an operator can
//! appear (after an operand); elsewhere they lex as plain names, so
//! `/div/or` selects elements.

use super::{Result, XPathError};

/// XPath token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Operators
    Slash,       // /
    DoubleSlash, // //
    Dot,         // .
    DoubleDot,   // ..
    At,          // @
    Pipe,        // |
    Plus,        // +
    Minus,       // -
    Star,        // *
    Eq,          // =
    NotEq,       // !=
    Lt,          // <
    LtEq,        // <=
    Gt,          // >
    GtEq,        // >=
    And,         // and
    Or,          // or
    Mod,         // mod
    Div,         // div

    // Brackets
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]

    // Literals
    Number(f64),
    String(String),

    // Names
    Name(String),         // NCName
    NameTest(String),     // prefix:* or prefix:local
    FunctionName(String), // name or prefix:local followed by (
    NodeType(String),     // node(), text(), comment(), processing-instruction()

    // Axis
    Axis(String), // child::, descendant::, etc.

    // Special
    DoubleColon, // ::
    Comma,       // ,
    Dollar,      // $

    // End of input
    Eof,
}

impl Token {
    /// Whether an operator may follow this token
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Name(_)
                | Token::NameTest(_)
                | Token::Number(_)
                | Token::String(_)
                | Token::RightParen
                | Token::RightBracket
                | Token::Dot
                | Token::DoubleDot
                | Token::Star
        )
    }
}

/// XPath lexer
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    token_start: usize,
    operator_allowed: bool,
    after_variable: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            pos: 0,
            token_start: 0,
            operator_allowed: false,
            after_variable: false,
        }
    }

    /// Byte offset where the most recently returned token starts
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.remaining().chars().nth(n)
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance(c.len_utf8());
            } else {
                break;
            }
        }
    }

    fn error(&self, position: usize, message: impl Into<String>) -> XPathError {
        XPathError::Syntax {
            position,
            message: message.into(),
        }
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token> {
        let token = self.scan()?;
        // `*` after an operand multiplies; anywhere else it is a name test
        let star_is_operator = matches!(token, Token::Star) && self.operator_allowed;
        self.operator_allowed = match token {
            Token::Star => !star_is_operator,
            ref t => t.ends_operand(),
        };
        self.after_variable = matches!(token, Token::Dollar);
        Ok(token)
    }

    fn scan(&mut self) -> Result<Token> {
        self.skip_whitespace();
        let start = self.pos;
        self.token_start = start;

        let Some(c) = self.peek() else {
            return Ok(Token::Eof);
        };

        let token = match c {
            '/' => {
                if self.peek_at(1) == Some('/') {
                    self.advance(2);
                    Token::DoubleSlash
                } else {
                    self.advance(1);
                    Token::Slash
                }
            }
            '.' => {
                if self.peek_at(1) == Some('.') {
                    self.advance(2);
                    Token::DoubleDot
                } else if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                    self.read_number()
                } else {
                    self.advance(1);
                    Token::Dot
                }
            }
            '@' => {
                self.advance(1);
                Token::At
            }
            '|' => {
                self.advance(1);
                Token::Pipe
            }
            '+' => {
                self.advance(1);
                Token::Plus
            }
            '-' => {
                self.advance(1);
                Token::Minus
            }
            '*' => {
                self.advance(1);
                Token::Star
            }
            '=' => {
                self.advance(1);
                Token::Eq
            }
            '!' => {
                if self.peek_at(1) == Some('=') {
                    self.advance(2);
                    Token::NotEq
                } else {
                    return Err(self.error(start, "expected '=' after '!'"));
                }
            }
            '<' => {
                if self.peek_at(1) == Some('=') {
                    self.advance(2);
                    Token::LtEq
                } else {
                    self.advance(1);
                    Token::Lt
                }
            }
            '>' => {
                if self.peek_at(1) == Some('=') {
                    self.advance(2);
                    Token::GtEq
                } else {
                    self.advance(1);
                    Token::Gt
                }
            }
            '(' => {
                self.advance(1);
                Token::LeftParen
            }
            ')' => {
                self.advance(1);
                Token::RightParen
            }
            '[' => {
                self.advance(1);
                Token::LeftBracket
            }
            ']' => {
                self.advance(1);
                Token::RightBracket
            }
            ',' => {
                self.advance(1);
                Token::Comma
            }
            '$' => {
                self.advance(1);
                Token::Dollar
            }
            ':' => {
                if self.peek_at(1) == Some(':') {
                    self.advance(2);
                    Token::DoubleColon
                } else {
                    return Err(self.error(start, "unexpected ':'"));
                }
            }
            '"' | '\'' => self.read_string(c)?,
            c if c.is_ascii_digit() => self.read_number(),
            c if is_name_start_char(c) => self.read_name_or_keyword()?,
            other => return Err(self.error(start, format!("unexpected character '{other}'"))),
        };
        Ok(token)
    }

    fn read_number(&mut self) -> Token {
        let start = self.pos;
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance(1);
            } else if c == '.' && !seen_dot && self.peek_at(1) != Some('.') {
                seen_dot = true;
                self.advance(1);
            } else {
                break;
            }
        }
        let text = &self.input[start..self.pos];
        Token::Number(text.parse().unwrap_or(f64::NAN))
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        let start = self.pos;
        self.advance(1);
        let content_start = self.pos;
        match self.remaining().find(quote) {
            Some(len) => {
                let content = &self.input[content_start..content_start + len];
                self.advance(len + 1);
                Ok(Token::String(content.to_string()))
            }
            None => Err(self.error(start, "unterminated string literal")),
        }
    }

    fn read_ncname(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_name_char(c) {
                self.advance(c.len_utf8());
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    fn read_name_or_keyword(&mut self) -> Result<Token> {
        let name = self.read_ncname();

        if self.operator_allowed && !self.after_variable {
            match name {
                "and" => return Ok(Token::And),
                "or" => return Ok(Token::Or),
                "mod" => return Ok(Token::Mod),
                "div" => return Ok(Token::Div),
                _ => {}
            }
        }

        // Prefixed name: no whitespace is allowed around the colon
        if self.peek() == Some(':') && self.peek_at(1) != Some(':') {
            self.advance(1);
            if self.peek() == Some('*') {
                self.advance(1);
                return Ok(Token::NameTest(format!("{name}:*")));
            }
            if !self.peek().is_some_and(is_name_start_char) {
                return Err(self.error(self.pos, "expected local name after ':'"));
            }
            let local = self.read_ncname();
            let qname = format!("{name}:{local}");
            let save = self.pos;
            self.skip_whitespace();
            if self.peek() == Some('(') && !self.after_variable {
                return Ok(Token::FunctionName(qname));
            }
            self.pos = save;
            return Ok(Token::NameTest(qname));
        }

        let save = self.pos;
        self.skip_whitespace();
        if self.remaining().starts_with("::") {
            return Ok(Token::Axis(name.to_string()));
        }
        if self.peek() == Some('(') && !self.after_variable {
            return Ok(match name {
                "node" | "text" | "comment" | "processing-instruction" => {
                    Token::NodeType(name.to_string())
                }
                _ => Token::FunctionName(name.to_string()),
            });
        }
        self.pos = save;
        Ok(Token::Name(name.to_string()))
    }

    /// Tokenize entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            if matches!(token, Token::Eof) {
                break;
            }
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn is_name_start_char(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_path() {
        let mut lexer = Lexer::new("/root/child");
        assert_eq!(lexer.next_token().unwrap(), Token::Slash);
        assert_eq!(lexer.next_token().unwrap(), Token::Name("root".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::Slash);
        assert_eq!(lexer.next_token().unwrap(), Token::Name("child".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_predicate() {
        let tokens = Lexer::new("item[@id='test']").tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Name("item".to_string()),
                Token::LeftBracket,
                Token::At,
                Token::Name("id".to_string()),
                Token::Eq,
                Token::String("test".to_string()),
                Token::RightBracket,
            ]
        );
    }

    #[test]
    fn test_axis() {
        let mut lexer = Lexer::new("child::element");
        assert_eq!(lexer.next_token().unwrap(), Token::Axis("child".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::DoubleColon);
        assert_eq!(lexer.next_token().unwrap(), Token::Name("element".to_string()));
    }

    #[test]
    fn test_operator_names_depend_on_position() {
        let tokens = Lexer::new("div div div").tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Name("div".to_string()),
                Token::Div,
                Token::Name("div".to_string()),
            ]
        );
        let tokens = Lexer::new("a and /or").tokenize().unwrap();
        assert_eq!(tokens[1], Token::And);
        assert_eq!(tokens[3], Token::Name("or".to_string()));
    }

    #[test]
    fn test_prefixed_function_and_name_test() {
        let tokens = Lexer::new("xf:instance('a')/my:item").tokenize().unwrap();
        assert_eq!(tokens[0], Token::FunctionName("xf:instance".to_string()));
        assert_eq!(tokens[5], Token::NameTest("my:item".to_string()));
        let tokens = Lexer::new("my:*").tokenize().unwrap();
        assert_eq!(tokens, vec![Token::NameTest("my:*".to_string())]);
    }

    #[test]
    fn test_numbers() {
        let tokens = Lexer::new("position() = 1.5 + .5").tokenize().unwrap();
        assert!(matches!(tokens[4], Token::Number(n) if n == 1.5));
        assert!(matches!(tokens[6], Token::Number(n) if n == 0.5));
    }

    #[test]
    fn test_errors_carry_position() {
        let err = Lexer::new("a = 'open").tokenize().unwrap_err();
        assert_eq!(
            err,
            XPathError::Syntax {
                position: 4,
                message: "unterminated string literal".to_string()
            }
        );
        assert!(Lexer::new("a ! b").tokenize().is_err());
    }
}
