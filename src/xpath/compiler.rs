//! XPath Expression Compiler
//!
//! Flattens parsed XPath expressions into a postfix program for the stack
//! evaluator. Step predicates stay attached to their step so that
//! `position()` counts along the axis of each context node.

use super::parser::{Axis, BinaryOp, Expr, NodeTest, Step};
use super::Result;

/// Compiled XPath expression
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    pub ops: Vec<Op>,
}

/// Compiled operation
#[derive(Debug, Clone)]
pub enum Op {
    /// Push the root of the context node's tree
    Root,
    /// Push context node onto stack
    Context,
    /// Replace the node-set on top with the step result
    Step(Axis, CompiledNodeTest, Vec<CompiledExpr>),
    /// Filter the node-set on top, in document order
    Filter(Box<CompiledExpr>),
    /// Union two node sets
    Union,
    /// Push literal number
    Number(f64),
    /// Push literal string
    String(String),
    /// Call function with the given argument count
    Call(String, usize),
    /// Binary operation
    Binary(BinaryOp),
    /// Negate
    Negate,
    /// Variable reference
    Variable(String),
}

/// Compiled node test
#[derive(Debug, Clone)]
pub enum CompiledNodeTest {
    Any,
    Name(String),
    QName(String, String),
    NamespaceWildcard(String),
    Node,
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
}

impl From<&NodeTest> for CompiledNodeTest {
    fn from(test: &NodeTest) -> Self {
        match test {
            NodeTest::Any => CompiledNodeTest::Any,
            NodeTest::Name(n) => CompiledNodeTest::Name(n.clone()),
            NodeTest::QName(prefix, local) => CompiledNodeTest::QName(prefix.clone(), local.clone()),
            NodeTest::NamespaceWildcard(prefix) => CompiledNodeTest::NamespaceWildcard(prefix.clone()),
            NodeTest::Node => CompiledNodeTest::Node,
            NodeTest::Text => CompiledNodeTest::Text,
            NodeTest::Comment => CompiledNodeTest::Comment,
            NodeTest::ProcessingInstruction(arg) => CompiledNodeTest::ProcessingInstruction(arg.clone()),
        }
    }
}

impl CompiledExpr {
    /// Compile a parsed expression
    pub fn compile(expr: &Expr) -> Self {
        let mut ops = Vec::new();
        Self::compile_expr(expr, &mut ops);
        CompiledExpr { ops }
    }

    fn compile_expr(expr: &Expr, ops: &mut Vec<Op>) {
        match expr {
            Expr::Root => ops.push(Op::Root),
            Expr::Number(n) => ops.push(Op::Number(*n)),
            Expr::String(s) => ops.push(Op::String(s.clone())),
            Expr::Variable(name) => ops.push(Op::Variable(name.clone())),
            Expr::Negate(inner) => {
                Self::compile_expr(inner, ops);
                ops.push(Op::Negate);
            }
            Expr::Binary(left, op, right) => {
                Self::compile_expr(left, ops);
                Self::compile_expr(right, ops);
                ops.push(Op::Binary(*op));
            }
            Expr::Union(left, right) => {
                Self::compile_expr(left, ops);
                Self::compile_expr(right, ops);
                ops.push(Op::Union);
            }
            Expr::Path(base, step) => {
                Self::compile_expr(base, ops);
                Self::compile_step(step, ops);
            }
            Expr::Filter(base, pred) => {
                Self::compile_expr(base, ops);
                ops.push(Op::Filter(Box::new(CompiledExpr::compile(pred))));
            }
            Expr::Step(step) => {
                ops.push(Op::Context);
                Self::compile_step(step, ops);
            }
            Expr::Function(name, args) => {
                for arg in args {
                    Self::compile_expr(arg, ops);
                }
                ops.push(Op::Call(name.clone(), args.len()));
            }
        }
    }

    fn compile_step(step: &Step, ops: &mut Vec<Op>) {
        let predicates = step.predicates.iter().map(CompiledExpr::compile).collect();
        ops.push(Op::Step(step.axis, (&step.node_test).into(), predicates));
    }
}

/// Compile an XPath expression string
pub fn compile(xpath: &str) -> Result<CompiledExpr> {
    let expr = super::parser::parse(xpath)?;
    Ok(CompiledExpr::compile(&expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_simple() {
        let compiled = compile("/root").unwrap();
        assert!(matches!(compiled.ops[0], Op::Root));
        assert!(matches!(compiled.ops[1], Op::Step(Axis::Child, CompiledNodeTest::Name(ref n), _) if n == "root"));
    }

    #[test]
    fn test_compile_keeps_predicates_on_step() {
        let compiled = compile("a/b[1]").unwrap();
        assert_eq!(compiled.ops.len(), 3);
        assert!(matches!(compiled.ops[2], Op::Step(_, _, ref preds) if preds.len() == 1));
    }

    #[test]
    fn test_compile_function_args_before_call() {
        let compiled = compile("concat('a', 'b')").unwrap();
        assert!(matches!(compiled.ops.last(), Some(Op::Call(name, 2)) if name == "concat"));
    }
}
