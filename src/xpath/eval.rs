//! XPath Evaluation Engine
//!
//! Evaluates compiled XPath programs against any [`DocumentAccess`].
//! Function calls go to the context's [`FunctionResolver`] first and fall
//! back to the core library for unprefixed names.

use std::collections::HashSet;

use super::axes::{matches_node_test, navigate};
use super::compiler::{CompiledExpr, Op};
use super::functions;
use super::parser::BinaryOp;
use super::value::XPathValue;
use super::{Result, XPathError};
use crate::dom::{split_qname, DocumentAccess, NodeId};

/// Extension point for function libraries and variable bindings
pub trait FunctionResolver {
    /// Call `local` in `namespace` (empty for unprefixed calls)
    ///
    /// Returns `None` when this resolver does not know the function.
    fn call(
        &self,
        ctx: &EvalContext<'_>,
        namespace: &str,
        local: &str,
        args: &[XPathValue],
    ) -> Option<Result<XPathValue>>;

    /// Value bound to `$name`, if any
    fn variable(&self, _name: &str) -> Option<XPathValue> {
        None
    }
}

/// Resolver with no functions and no variables
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFunctions;

impl FunctionResolver for NoFunctions {
    fn call(&self, _: &EvalContext<'_>, _: &str, _: &str, _: &[XPathValue]) -> Option<Result<XPathValue>> {
        None
    }
}

/// Evaluation context: context node, position and size plus the collaborators
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub doc: &'a dyn DocumentAccess,
    pub node: NodeId,
    pub position: usize,
    pub size: usize,
    /// Element whose in-scope namespace declarations resolve prefixes
    pub namespaces: NodeId,
    pub functions: &'a dyn FunctionResolver,
}

impl<'a> EvalContext<'a> {
    /// Context at `node` with position and size 1, resolving prefixes at `node`
    pub fn new(doc: &'a dyn DocumentAccess, node: NodeId, functions: &'a dyn FunctionResolver) -> Self {
        EvalContext {
            doc,
            node,
            position: 1,
            size: 1,
            namespaces: node,
            functions,
        }
    }

    /// Same context with prefixes resolved at `element`
    pub fn with_namespaces(self, element: NodeId) -> Self {
        EvalContext {
            namespaces: element,
            ..self
        }
    }

    /// Same collaborators, different node/position/size
    pub fn at(&self, node: NodeId, position: usize, size: usize) -> Self {
        EvalContext {
            node,
            position,
            size,
            ..*self
        }
    }
}

/// Compile and evaluate an XPath expression
#[must_use = "XPath evaluation result should be used"]
pub fn evaluate(ctx: &EvalContext<'_>, xpath: &str) -> Result<XPathValue> {
    let compiled = super::compiler::compile(xpath)?;
    evaluate_compiled(&compiled, ctx)
}

fn pop(stack: &mut Vec<XPathValue>) -> Result<XPathValue> {
    stack
        .pop()
        .ok_or_else(|| XPathError::Type("malformed expression program".to_string()))
}

fn pop_nodeset(stack: &mut Vec<XPathValue>, what: &str) -> Result<Vec<NodeId>> {
    pop(stack)?
        .into_nodeset()
        .ok_or_else(|| XPathError::Type(format!("{what} requires a node-set")))
}

/// Sort into document order and drop duplicates
fn document_order(doc: &dyn DocumentAccess, nodes: Vec<NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::with_capacity(nodes.len());
    let mut unique: Vec<NodeId> = nodes.into_iter().filter(|n| seen.insert(*n)).collect();
    unique.sort_by_key(|&n| doc.document_order(n));
    unique
}

/// Keep the nodes for which `predicate` holds, positions taken from list order
fn apply_predicate(
    pred: &CompiledExpr,
    nodes: Vec<NodeId>,
    ctx: &EvalContext<'_>,
) -> Result<Vec<NodeId>> {
    let size = nodes.len();
    let mut kept = Vec::with_capacity(size);
    for (i, node) in nodes.into_iter().enumerate() {
        let inner = ctx.at(node, i + 1, size);
        let keep = match evaluate_compiled(pred, &inner)? {
            XPathValue::Number(n) => n == (i + 1) as f64,
            other => other.to_boolean(),
        };
        if keep {
            kept.push(node);
        }
    }
    Ok(kept)
}

/// Evaluate a compiled expression
pub fn evaluate_compiled(expr: &CompiledExpr, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    let mut stack: Vec<XPathValue> = Vec::new();
    let doc = ctx.doc;

    for op in &expr.ops {
        match op {
            Op::Root => {
                stack.push(XPathValue::single_node(doc.root_of(ctx.node)));
            }

            Op::Context => {
                stack.push(XPathValue::single_node(ctx.node));
            }

            Op::Step(axis, node_test, predicates) => {
                let nodes = pop_nodeset(&mut stack, "a location step")?;
                let mut result = Vec::new();
                for node in nodes {
                    let mut candidates: Vec<NodeId> = navigate(doc, node, *axis)
                        .into_iter()
                        .filter(|&c| matches_node_test(doc, c, *axis, node_test, ctx.namespaces))
                        .collect();
                    for pred in predicates {
                        candidates = apply_predicate(pred, candidates, ctx)?;
                    }
                    result.extend(candidates);
                }
                stack.push(XPathValue::NodeSet(document_order(doc, result)));
            }

            Op::Filter(pred) => {
                let nodes = pop_nodeset(&mut stack, "a predicate")?;
                let kept = apply_predicate(pred, nodes, ctx)?;
                stack.push(XPathValue::NodeSet(kept));
            }

            Op::Union => {
                let right = pop_nodeset(&mut stack, "union")?;
                let mut left = pop_nodeset(&mut stack, "union")?;
                left.extend(right);
                stack.push(XPathValue::NodeSet(document_order(doc, left)));
            }

            Op::Number(n) => stack.push(XPathValue::Number(*n)),

            Op::String(s) => stack.push(XPathValue::String(s.clone())),

            Op::Variable(name) => {
                let value = ctx
                    .functions
                    .variable(name)
                    .unwrap_or_else(|| XPathValue::String(String::new()));
                stack.push(value);
            }

            Op::Negate => {
                let value = pop(&mut stack)?;
                stack.push(XPathValue::Number(-value.to_number(doc)));
            }

            Op::Binary(op) => {
                let right = pop(&mut stack)?;
                let left = pop(&mut stack)?;
                stack.push(binary(doc, *op, &left, &right));
            }

            Op::Call(name, argc) => {
                if *argc > stack.len() {
                    return Err(XPathError::Type("malformed expression program".to_string()));
                }
                let args = stack.split_off(stack.len() - argc);
                stack.push(call_function(ctx, name, args)?);
            }
        }
    }

    pop(&mut stack)
}

fn call_function(ctx: &EvalContext<'_>, name: &str, args: Vec<XPathValue>) -> Result<XPathValue> {
    let (prefix, local) = split_qname(name);
    let namespace = if prefix.is_empty() {
        ""
    } else {
        ctx.doc
            .namespace_for_prefix(ctx.namespaces, prefix)
            .ok_or_else(|| XPathError::UnknownFunction(name.to_string()))?
    };
    if let Some(result) = ctx.functions.call(ctx, namespace, local, &args) {
        return result;
    }
    if namespace.is_empty() {
        return functions::call(local, args, ctx);
    }
    Err(XPathError::UnknownFunction(name.to_string()))
}

fn binary(doc: &dyn DocumentAccess, op: BinaryOp, left: &XPathValue, right: &XPathValue) -> XPathValue {
    match op {
        BinaryOp::Or => XPathValue::Boolean(left.to_boolean() || right.to_boolean()),
        BinaryOp::And => XPathValue::Boolean(left.to_boolean() && right.to_boolean()),
        BinaryOp::Eq => XPathValue::Boolean(compare_equality(doc, left, right, true)),
        BinaryOp::NotEq => XPathValue::Boolean(compare_equality(doc, left, right, false)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            XPathValue::Boolean(compare_relational(doc, op, left, right))
        }
        BinaryOp::Add => XPathValue::Number(left.to_number(doc) + right.to_number(doc)),
        BinaryOp::Sub => XPathValue::Number(left.to_number(doc) - right.to_number(doc)),
        BinaryOp::Mul => XPathValue::Number(left.to_number(doc) * right.to_number(doc)),
        BinaryOp::Div => XPathValue::Number(left.to_number(doc) / right.to_number(doc)),
        BinaryOp::Mod => XPathValue::Number(left.to_number(doc) % right.to_number(doc)),
    }
}

/// `=` and `!=` with the existential node-set rules
fn compare_equality(doc: &dyn DocumentAccess, left: &XPathValue, right: &XPathValue, equal: bool) -> bool {
    let test = |a: bool| a == equal;
    match (left, right) {
        (XPathValue::NodeSet(l), XPathValue::NodeSet(r)) => {
            let right_values: Vec<String> = r.iter().map(|&n| doc.string_value(n)).collect();
            l.iter().any(|&n| {
                let value = doc.string_value(n);
                right_values.iter().any(|rv| test(*rv == value))
            })
        }
        (XPathValue::NodeSet(nodes), other) | (other, XPathValue::NodeSet(nodes)) => match other {
            XPathValue::Boolean(b) => test(!nodes.is_empty() == *b),
            XPathValue::Number(n) => nodes
                .iter()
                .any(|&node| test(super::value::parse_number(&doc.string_value(node)) == *n)),
            _ => {
                let s = other.to_string_value(doc);
                nodes.iter().any(|&node| test(doc.string_value(node) == s))
            }
        },
        (XPathValue::Boolean(_), _) | (_, XPathValue::Boolean(_)) => {
            test(left.to_boolean() == right.to_boolean())
        }
        (XPathValue::Number(_), _) | (_, XPathValue::Number(_)) => {
            test(left.to_number(doc) == right.to_number(doc))
        }
        _ => test(left.to_string_value(doc) == right.to_string_value(doc)),
    }
}

fn numeric_compare(op: BinaryOp, a: f64, b: f64) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::LtEq => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}

/// `<`, `<=`, `>`, `>=`: both sides compare as numbers, node-sets existentially
fn compare_relational(doc: &dyn DocumentAccess, op: BinaryOp, left: &XPathValue, right: &XPathValue) -> bool {
    let numbers = |value: &XPathValue| -> Vec<f64> {
        match value {
            XPathValue::NodeSet(nodes) => nodes
                .iter()
                .map(|&n| super::value::parse_number(&doc.string_value(n)))
                .collect(),
            XPathValue::Boolean(_) => vec![value.to_number(doc)],
            other => vec![other.to_number(doc)],
        }
    };
    let (l, r) = match (left, right) {
        (XPathValue::NodeSet(nodes), XPathValue::Boolean(b)) => {
            (vec![if nodes.is_empty() { 0.0 } else { 1.0 }], vec![if *b { 1.0 } else { 0.0 }])
        }
        (XPathValue::Boolean(b), XPathValue::NodeSet(nodes)) => {
            (vec![if *b { 1.0 } else { 0.0 }], vec![if nodes.is_empty() { 0.0 } else { 1.0 }])
        }
        _ => (numbers(left), numbers(right)),
    };
    l.iter().any(|&a| r.iter().any(|&b| numeric_compare(op, a, b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::XmlDocument;

    const DOC: &str = r#"<root xmlns:p="urn:p"><item n="1">a</item><item n="2">b</item><group><item n="3">c</item></group><p:item>d</p:item></root>"#;

    fn eval(doc: &XmlDocument, xpath: &str) -> XPathValue {
        let root = doc.document_element(doc.roots()[0]).unwrap();
        evaluate(&EvalContext::new(doc, root, &NoFunctions), xpath).unwrap()
    }

    fn strings(doc: &XmlDocument, value: XPathValue) -> Vec<String> {
        value
            .into_nodeset()
            .unwrap()
            .into_iter()
            .map(|n| doc.string_value(n))
            .collect()
    }

    #[test]
    fn test_simple_path() {
        let doc = XmlDocument::parse(DOC).unwrap();
        assert_eq!(strings(&doc, eval(&doc, "/root/item")), vec!["a", "b"]);
        assert_eq!(strings(&doc, eval(&doc, "item")), vec!["a", "b"]);
    }

    #[test]
    fn test_descendants_in_document_order() {
        let doc = XmlDocument::parse(DOC).unwrap();
        assert_eq!(strings(&doc, eval(&doc, "//item")), vec!["a", "b", "c"]);
        assert_eq!(strings(&doc, eval(&doc, "//p:item")), vec!["d"]);
        assert_eq!(strings(&doc, eval(&doc, "//group/item | item")), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_attribute_nodes() {
        let doc = XmlDocument::parse(DOC).unwrap();
        assert_eq!(strings(&doc, eval(&doc, "item/@n")), vec!["1", "2"]);
        assert_eq!(strings(&doc, eval(&doc, "//item[@n = 3]")), vec!["c"]);
        assert_eq!(eval(&doc, "count(item[1]/@*)"), XPathValue::Number(1.0));
    }

    #[test]
    fn test_step_positions_are_per_context_node() {
        let doc = XmlDocument::parse("<r><a><b>1</b><b>2</b></a><a><b>3</b></a></r>").unwrap();
        assert_eq!(strings(&doc, eval(&doc, "a/b[1]")), vec!["1", "3"]);
        assert_eq!(strings(&doc, eval(&doc, "(a/b)[last()]")), vec!["3"]);
        assert_eq!(strings(&doc, eval(&doc, "a/b[position() > 1]")), vec!["2"]);
    }

    #[test]
    fn test_reverse_axis_positions() {
        let doc = XmlDocument::parse("<r><a>1</a><a>2</a><a>3</a></r>").unwrap();
        assert_eq!(strings(&doc, eval(&doc, "a[3]/preceding-sibling::a[1]")), vec!["2"]);
    }

    #[test]
    fn test_prefixed_name_test() {
        let doc = XmlDocument::parse(DOC).unwrap();
        assert_eq!(strings(&doc, eval(&doc, "p:item")), vec!["d"]);
        assert_eq!(eval(&doc, "count(q:item)"), XPathValue::Number(0.0));
    }

    #[test]
    fn test_unprefixed_name_skips_namespaced_nodes() {
        let doc = XmlDocument::parse(r#"<r xmlns:p="urn:p"><p:v>1</p:v><v>2</v><w xmlns="urn:d">3</w></r>"#).unwrap();
        assert_eq!(strings(&doc, eval(&doc, "v")), vec!["2"]);
        assert_eq!(eval(&doc, "count(w)"), XPathValue::Number(0.0));
        assert_eq!(eval(&doc, "count(*)"), XPathValue::Number(3.0));
    }

    #[test]
    fn test_comparisons_atomize_nodes() {
        let doc = XmlDocument::parse(DOC).unwrap();
        assert_eq!(eval(&doc, "item = 'b'"), XPathValue::Boolean(true));
        assert_eq!(eval(&doc, "item != 'a'"), XPathValue::Boolean(true));
        assert_eq!(eval(&doc, "item/@n > 1"), XPathValue::Boolean(true));
        assert_eq!(eval(&doc, "item/@n + 10"), XPathValue::Number(11.0));
        assert_eq!(eval(&doc, "not(item = 'z')"), XPathValue::Boolean(true));
        assert_eq!(eval(&doc, "1 = true()"), XPathValue::Boolean(true));
    }

    #[test]
    fn test_arithmetic() {
        let doc = XmlDocument::parse("<r/>").unwrap();
        assert_eq!(eval(&doc, "7 mod 3 + 4 div 2 * -1"), XPathValue::Number(-1.0));
    }

    struct Doubler;

    impl FunctionResolver for Doubler {
        fn call(
            &self,
            ctx: &EvalContext<'_>,
            namespace: &str,
            local: &str,
            args: &[XPathValue],
        ) -> Option<Result<XPathValue>> {
            match (namespace, local) {
                ("urn:p", "double") | ("", "double") => {
                    Some(Ok(XPathValue::Number(args[0].to_number(ctx.doc) * 2.0)))
                }
                _ => None,
            }
        }

        fn variable(&self, name: &str) -> Option<XPathValue> {
            (name == "x").then(|| XPathValue::Number(5.0))
        }
    }

    #[test]
    fn test_resolver_functions_and_variables() {
        let doc = XmlDocument::parse(DOC).unwrap();
        let root = doc.document_element(doc.roots()[0]).unwrap();
        let ctx = EvalContext::new(&doc, root, &Doubler);
        assert_eq!(evaluate(&ctx, "p:double($x)").unwrap(), XPathValue::Number(10.0));
        assert_eq!(evaluate(&ctx, "double(2) + count(item)").unwrap(), XPathValue::Number(6.0));
        assert_eq!(evaluate(&ctx, "$unbound").unwrap(), XPathValue::String(String::new()));
        assert!(matches!(evaluate(&ctx, "q:double(1)"), Err(XPathError::UnknownFunction(_))));
        assert!(matches!(evaluate(&ctx, "nope()"), Err(XPathError::UnknownFunction(_))));
    }

    #[test]
    fn test_root_is_tree_of_context_node() {
        let mut doc = XmlDocument::parse("<host/>").unwrap();
        let tree = doc.parse_tree("<data><v>1</v></data>").unwrap();
        let data = doc.document_element(tree).unwrap();
        let ctx = EvalContext::new(&doc, data, &NoFunctions);
        let result = evaluate(&ctx, "/data/v").unwrap();
        assert_eq!(result.into_nodeset().unwrap().len(), 1);
    }
}
