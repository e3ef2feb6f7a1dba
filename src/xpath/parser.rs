//! XPath Parser
//!
//! Recursive descent parser for XPath 1.0 expressions.

use super::lexer::{Lexer, Token};
use super::{Result, XPathError};

/// XPath expression AST node
#[derive(Debug, Clone)]
pub enum Expr {
    /// Root of the tree containing the context node (/)
    Root,
    /// Union of two expressions (|)
    Union(Box<Expr>, Box<Expr>),
    /// Path expression (expr/step)
    Path(Box<Expr>, Box<Step>),
    /// Filter expression with predicate
    Filter(Box<Expr>, Box<Expr>),
    /// Function call, name as written (possibly prefixed)
    Function(String, Vec<Expr>),
    /// Binary operation
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    /// Unary negation
    Negate(Box<Expr>),
    /// Literal number
    Number(f64),
    /// Literal string
    String(String),
    /// Variable reference
    Variable(String),
    /// Location step relative to the context node
    Step(Box<Step>),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Location step in a path
#[derive(Debug, Clone)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    fn abbreviated(axis: Axis) -> Self {
        Step {
            axis,
            node_test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }
}

/// XPath axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Self_,
    Attribute,
    Namespace,
}

impl Axis {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "child" => Some(Axis::Child),
            "descendant" => Some(Axis::Descendant),
            "descendant-or-self" => Some(Axis::DescendantOrSelf),
            "parent" => Some(Axis::Parent),
            "ancestor" => Some(Axis::Ancestor),
            "ancestor-or-self" => Some(Axis::AncestorOrSelf),
            "following-sibling" => Some(Axis::FollowingSibling),
            "preceding-sibling" => Some(Axis::PrecedingSibling),
            "following" => Some(Axis::Following),
            "preceding" => Some(Axis::Preceding),
            "self" => Some(Axis::Self_),
            "attribute" => Some(Axis::Attribute),
            "namespace" => Some(Axis::Namespace),
            _ => None,
        }
    }

    /// Reverse axes number their nodes nearest-first
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Parent
                | Axis::Ancestor
                | Axis::AncestorOrSelf
                | Axis::PrecedingSibling
                | Axis::Preceding
        )
    }
}

/// Node test in a location step
#[derive(Debug, Clone)]
pub enum NodeTest {
    /// Matches any node of the axis' principal type (*)
    Any,
    /// Matches by local name
    Name(String),
    /// Matches prefix:localname
    QName(String, String),
    /// Matches prefix:*
    NamespaceWildcard(String),
    /// node() - matches any node
    Node,
    /// text() - matches text nodes
    Text,
    /// comment() - matches comments
    Comment,
    /// processing-instruction() - matches PIs
    ProcessingInstruction(Option<String>),
}

/// XPath parser
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser
    pub fn new(input: &'a str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        let position = lexer.token_start();
        Ok(Parser {
            lexer,
            current,
            position,
        })
    }

    /// Parse a complete XPath expression
    pub fn parse(&mut self) -> Result<Expr> {
        let expr = self.parse_expr()?;
        if !matches!(self.current, Token::Eof) {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    /// Advance to next token
    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        self.position = self.lexer.token_start();
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError::Syntax {
            position: self.position,
            message: message.into(),
        }
    }

    fn unexpected(&self) -> XPathError {
        match &self.current {
            Token::Eof => self.error("unexpected end of expression"),
            token => self.error(format!("unexpected token {token:?}")),
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        if self.current != token {
            return Err(self.error(format!("expected {what}")));
        }
        self.advance()
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_and_expr()?;

        while matches!(self.current, Token::Or) {
            self.advance()?;
            let right = self.parse_and_expr()?;
            left = Expr::Binary(Box::new(left), BinaryOp::Or, Box::new(right));
        }

        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality_expr()?;

        while matches!(self.current, Token::And) {
            self.advance()?;
            let right = self.parse_equality_expr()?;
            left = Expr::Binary(Box::new(left), BinaryOp::And, Box::new(right));
        }

        Ok(left)
    }

    fn parse_equality_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational_expr()?;

        loop {
            let op = match &self.current {
                Token::Eq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_relational_expr()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }

        Ok(left)
    }

    fn parse_relational_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive_expr()?;

        loop {
            let op = match &self.current {
                Token::Lt => BinaryOp::Lt,
                Token::LtEq => BinaryOp::LtEq,
                Token::Gt => BinaryOp::Gt,
                Token::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_additive_expr()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }

        Ok(left)
    }

    fn parse_additive_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative_expr()?;

        loop {
            let op = match &self.current {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_multiplicative_expr()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }

        Ok(left)
    }

    fn parse_multiplicative_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary_expr()?;

        loop {
            let op = match &self.current {
                Token::Star => BinaryOp::Mul,
                Token::Div => BinaryOp::Div,
                Token::Mod => BinaryOp::Mod,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary_expr()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }

        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr> {
        if matches!(self.current, Token::Minus) {
            self.advance()?;
            let expr = self.parse_unary_expr()?;
            Ok(Expr::Negate(Box::new(expr)))
        } else {
            self.parse_union_expr()
        }
    }

    fn parse_union_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_path_expr()?;

        while matches!(self.current, Token::Pipe) {
            self.advance()?;
            let right = self.parse_path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.current,
            Token::Name(_)
                | Token::NameTest(_)
                | Token::Star
                | Token::At
                | Token::Axis(_)
                | Token::NodeType(_)
                | Token::Dot
                | Token::DoubleDot
        )
    }

    fn parse_path_expr(&mut self) -> Result<Expr> {
        let expr = match &self.current {
            Token::Slash => {
                self.advance()?;
                if !self.starts_step() {
                    return Ok(Expr::Root);
                }
                let step = self.parse_step()?;
                Expr::Path(Box::new(Expr::Root), Box::new(step))
            }
            Token::DoubleSlash => {
                self.advance()?;
                // //path is shorthand for /descendant-or-self::node()/path
                let desc = Expr::Path(
                    Box::new(Expr::Root),
                    Box::new(Step::abbreviated(Axis::DescendantOrSelf)),
                );
                let step = self.parse_step()?;
                Expr::Path(Box::new(desc), Box::new(step))
            }
            _ if self.starts_step() => Expr::Step(Box::new(self.parse_step()?)),
            _ => self.parse_filter_expr()?,
        };
        self.parse_relative_path(expr)
    }

    /// Continue `base` with `/step` and `//step` segments
    fn parse_relative_path(&mut self, mut expr: Expr) -> Result<Expr> {
        loop {
            match &self.current {
                Token::Slash => {
                    self.advance()?;
                    let step = self.parse_step()?;
                    expr = Expr::Path(Box::new(expr), Box::new(step));
                }
                Token::DoubleSlash => {
                    self.advance()?;
                    let desc = Expr::Path(
                        Box::new(expr),
                        Box::new(Step::abbreviated(Axis::DescendantOrSelf)),
                    );
                    let step = self.parse_step()?;
                    expr = Expr::Path(Box::new(desc), Box::new(step));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_filter_expr(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary_expr()?;
        while matches!(self.current, Token::LeftBracket) {
            self.advance()?;
            let pred = self.parse_expr()?;
            self.expect(Token::RightBracket, "]")?;
            expr = Expr::Filter(Box::new(expr), Box::new(pred));
        }
        Ok(expr)
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        match &self.current {
            Token::Number(n) => {
                let n = *n;
                self.advance()?;
                Ok(Expr::Number(n))
            }
            Token::String(s) => {
                let s = s.clone();
                self.advance()?;
                Ok(Expr::String(s))
            }
            Token::Dollar => {
                self.advance()?;
                let name = match &self.current {
                    Token::Name(name) | Token::NameTest(name) => name.clone(),
                    _ => return Err(self.error("expected variable name")),
                };
                self.advance()?;
                Ok(Expr::Variable(name))
            }
            Token::LeftParen => {
                self.advance()?;
                let expr = self.parse_expr()?;
                self.expect(Token::RightParen, ")")?;
                Ok(expr)
            }
            Token::FunctionName(name) => {
                let name = name.clone();
                self.advance()?;
                self.expect(Token::LeftParen, "(")?;
                let args = self.parse_function_args()?;
                Ok(Expr::Function(name, args))
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_step(&mut self) -> Result<Step> {
        match &self.current {
            Token::Dot => {
                self.advance()?;
                return Ok(Step::abbreviated(Axis::Self_));
            }
            Token::DoubleDot => {
                self.advance()?;
                return Ok(Step::abbreviated(Axis::Parent));
            }
            _ => {}
        }

        let mut axis = Axis::Child;
        if matches!(self.current, Token::At) {
            axis = Axis::Attribute;
            self.advance()?;
        } else if let Token::Axis(axis_name) = &self.current {
            axis = Axis::from_name(axis_name)
                .ok_or_else(|| self.error(format!("unknown axis '{axis_name}'")))?;
            self.advance()?;
            self.expect(Token::DoubleColon, "::")?;
        }

        let node_test = match &self.current {
            Token::Star => {
                self.advance()?;
                NodeTest::Any
            }
            Token::Name(name) => {
                let name = name.clone();
                self.advance()?;
                NodeTest::Name(name)
            }
            Token::NameTest(qname) => {
                let qname = qname.clone();
                self.advance()?;
                match qname.split_once(':') {
                    Some((prefix, "*")) => NodeTest::NamespaceWildcard(prefix.to_string()),
                    Some((prefix, local)) => NodeTest::QName(prefix.to_string(), local.to_string()),
                    None => NodeTest::Name(qname),
                }
            }
            Token::NodeType(name) => {
                let name = name.clone();
                self.advance()?;
                self.expect(Token::LeftParen, "(")?;
                let arg = if let Token::String(s) = &self.current {
                    let s = s.clone();
                    self.advance()?;
                    Some(s)
                } else {
                    None
                };
                self.expect(Token::RightParen, ")")?;

                match name.as_str() {
                    "node" => NodeTest::Node,
                    "text" => NodeTest::Text,
                    "comment" => NodeTest::Comment,
                    _ => NodeTest::ProcessingInstruction(arg),
                }
            }
            _ => return Err(self.error(format!("expected node test, got {:?}", self.current))),
        };

        let mut predicates = Vec::new();
        while matches!(self.current, Token::LeftBracket) {
            self.advance()?;
            predicates.push(self.parse_expr()?);
            self.expect(Token::RightBracket, "]")?;
        }

        Ok(Step {
            axis,
            node_test,
            predicates,
        })
    }

    fn parse_function_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();

        if !matches!(self.current, Token::RightParen) {
            args.push(self.parse_expr()?);

            while matches!(self.current, Token::Comma) {
                self.advance()?;
                args.push(self.parse_expr()?);
            }
        }

        self.expect(Token::RightParen, ")")?;
        Ok(args)
    }
}

/// Parse an XPath expression string
pub fn parse(input: &str) -> Result<Expr> {
    Parser::new(input)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_path() {
        let expr = parse("/root/child").unwrap();
        assert!(matches!(expr, Expr::Path(..)));
    }

    #[test]
    fn test_step_predicates_stay_on_step() {
        let expr = parse("item[@id='test']").unwrap();
        let Expr::Step(step) = expr else {
            panic!("expected a step");
        };
        assert_eq!(step.predicates.len(), 1);
    }

    #[test]
    fn test_filter_predicate() {
        let expr = parse("(a | b)[1]").unwrap();
        assert!(matches!(expr, Expr::Filter(..)));
    }

    #[test]
    fn test_descendant() {
        let expr = parse("//item").unwrap();
        assert!(matches!(expr, Expr::Path(..)));
    }

    #[test]
    fn test_function() {
        let expr = parse("count(//item)").unwrap();
        assert!(matches!(expr, Expr::Function(name, _) if name == "count"));
        let expr = parse("xf:instance('a')/x").unwrap();
        let Expr::Path(base, _) = expr else {
            panic!("expected a path");
        };
        assert!(matches!(*base, Expr::Function(ref name, _) if name == "xf:instance"));
    }

    #[test]
    fn test_abbreviated_steps() {
        let expr = parse("../a/.").unwrap();
        let Expr::Path(_, step) = expr else {
            panic!("expected a path");
        };
        assert_eq!(step.axis, Axis::Self_);
    }

    #[test]
    fn test_qualified_name_tests() {
        let Expr::Step(step) = parse("my:item").unwrap() else {
            panic!("expected a step");
        };
        assert!(matches!(step.node_test, NodeTest::QName(ref p, ref l) if p == "my" && l == "item"));
        let Expr::Step(step) = parse("@my:*").unwrap() else {
            panic!("expected a step");
        };
        assert_eq!(step.axis, Axis::Attribute);
        assert!(matches!(step.node_test, NodeTest::NamespaceWildcard(ref p) if p == "my"));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("a["), Err(XPathError::Syntax { .. })));
        assert!(matches!(parse("a b"), Err(XPathError::Syntax { position: 2, .. })));
        assert!(parse("").is_err());
    }
}
