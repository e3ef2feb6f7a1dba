//! XPath 1.0 Functions
//!
//! The core function library:
//!
//! Node Set Functions:
//! - position(), last(), count(), id(), local-name(), namespace-uri(), name()
//!
//! String Functions:
//! - string(), concat(), starts-with(), contains(), substring(),
//!   substring-before(), substring-after(), string-length(),
//!   normalize-space(), translate()
//!
//! Boolean Functions:
//! - boolean(), not(), true(), false(), lang()
//!
//! Number Functions:
//! - number(), sum(), floor(), ceiling(), round()

use super::eval::EvalContext;
use super::value::{parse_number, XPathValue};
use super::{Result, XPathError};
use crate::dom::namespace::ns;
use crate::dom::NodeId;

/// Evaluate a core library call
pub fn call(name: &str, args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    match name {
        // Node Set Functions
        "position" => {
            arity(name, &args, 0, Some(0))?;
            Ok(XPathValue::Number(ctx.position as f64))
        }
        "last" => {
            arity(name, &args, 0, Some(0))?;
            Ok(XPathValue::Number(ctx.size as f64))
        }
        "count" => fn_count(args),
        "id" => fn_id(args, ctx),
        "local-name" => fn_local_name(args, ctx),
        "namespace-uri" => fn_namespace_uri(args, ctx),
        "name" => fn_name(args, ctx),

        // String Functions
        "string" => fn_string(args, ctx),
        "concat" => fn_concat(args, ctx),
        "starts-with" => {
            let (s, prefix) = two_strings(name, &args, ctx)?;
            Ok(XPathValue::Boolean(s.starts_with(&prefix)))
        }
        "contains" => {
            let (s, pattern) = two_strings(name, &args, ctx)?;
            Ok(XPathValue::Boolean(s.contains(&pattern)))
        }
        "substring" => fn_substring(args, ctx),
        "substring-before" => {
            let (s, pattern) = two_strings(name, &args, ctx)?;
            let result = s.find(&pattern).map(|pos| s[..pos].to_string()).unwrap_or_default();
            Ok(XPathValue::String(result))
        }
        "substring-after" => {
            let (s, pattern) = two_strings(name, &args, ctx)?;
            let result = s
                .find(&pattern)
                .map(|pos| s[pos + pattern.len()..].to_string())
                .unwrap_or_default();
            Ok(XPathValue::String(result))
        }
        "string-length" => {
            let s = string_or_context(name, &args, ctx)?;
            Ok(XPathValue::Number(s.chars().count() as f64))
        }
        "normalize-space" => {
            let s = string_or_context(name, &args, ctx)?;
            Ok(XPathValue::String(s.split_whitespace().collect::<Vec<_>>().join(" ")))
        }
        "translate" => fn_translate(args, ctx),

        // Boolean Functions
        "boolean" => {
            arity(name, &args, 1, Some(1))?;
            Ok(XPathValue::Boolean(args[0].to_boolean()))
        }
        "not" => {
            arity(name, &args, 1, Some(1))?;
            Ok(XPathValue::Boolean(!args[0].to_boolean()))
        }
        "true" => {
            arity(name, &args, 0, Some(0))?;
            Ok(XPathValue::Boolean(true))
        }
        "false" => {
            arity(name, &args, 0, Some(0))?;
            Ok(XPathValue::Boolean(false))
        }
        "lang" => fn_lang(args, ctx),

        // Number Functions
        "number" => {
            let value = match args.first() {
                None => parse_number(&ctx.doc.string_value(ctx.node)),
                Some(arg) => {
                    arity(name, &args, 0, Some(1))?;
                    arg.to_number(ctx.doc)
                }
            };
            Ok(XPathValue::Number(value))
        }
        "sum" => fn_sum(args, ctx),
        "floor" => one_number(name, &args, ctx, f64::floor),
        "ceiling" => one_number(name, &args, ctx, f64::ceil),
        "round" => one_number(name, &args, ctx, xpath_round),

        _ => Err(XPathError::UnknownFunction(name.to_string())),
    }
}

/// Check the argument count against `min..=max` (`None` for variadic)
pub fn arity(function: &str, args: &[XPathValue], min: usize, max: Option<usize>) -> Result<()> {
    let found = args.len();
    let ok = found >= min && max.is_none_or(|m| found <= m);
    if ok {
        return Ok(());
    }
    let expected = match max {
        Some(m) if m == min => min.to_string(),
        Some(m) => format!("{min} to {m}"),
        None => format!("at least {min}"),
    };
    Err(XPathError::Arity {
        function: function.to_string(),
        expected,
        found,
    })
}

/// Node-set argument at `index`
pub fn nodeset_arg<'v>(function: &str, args: &'v [XPathValue], index: usize) -> Result<&'v [NodeId]> {
    match args.get(index) {
        Some(XPathValue::NodeSet(nodes)) => Ok(nodes),
        _ => Err(XPathError::Type(format!("{function}() argument must be a node-set"))),
    }
}

/// XPath round(): halves round towards positive infinity
pub fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        n
    } else {
        (n + 0.5).floor()
    }
}

fn two_strings(name: &str, args: &[XPathValue], ctx: &EvalContext<'_>) -> Result<(String, String)> {
    arity(name, args, 2, Some(2))?;
    Ok((args[0].to_string_value(ctx.doc), args[1].to_string_value(ctx.doc)))
}

fn string_or_context(name: &str, args: &[XPathValue], ctx: &EvalContext<'_>) -> Result<String> {
    arity(name, args, 0, Some(1))?;
    Ok(match args.first() {
        Some(arg) => arg.to_string_value(ctx.doc),
        None => ctx.doc.string_value(ctx.node),
    })
}

fn one_number(
    name: &str,
    args: &[XPathValue],
    ctx: &EvalContext<'_>,
    f: fn(f64) -> f64,
) -> Result<XPathValue> {
    arity(name, args, 1, Some(1))?;
    Ok(XPathValue::Number(f(args[0].to_number(ctx.doc))))
}

/// Node argument for the name functions: the first node, the context node
/// when omitted, `None` for an empty node-set
fn name_target(name: &str, args: &[XPathValue], ctx: &EvalContext<'_>) -> Result<Option<NodeId>> {
    arity(name, args, 0, Some(1))?;
    if args.is_empty() {
        return Ok(Some(ctx.node));
    }
    Ok(nodeset_arg(name, args, 0)?.first().copied())
}

// Node Set Functions

fn fn_count(args: Vec<XPathValue>) -> Result<XPathValue> {
    arity("count", &args, 1, Some(1))?;
    let nodes = nodeset_arg("count", &args, 0)?;
    Ok(XPathValue::Number(nodes.len() as f64))
}

fn fn_id(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    arity("id", &args, 1, Some(1))?;
    let tokens: Vec<String> = match &args[0] {
        XPathValue::NodeSet(nodes) => nodes.iter().map(|&n| ctx.doc.string_value(n)).collect(),
        other => vec![other.to_string_value(ctx.doc)],
    };
    let mut found: Vec<NodeId> = tokens
        .iter()
        .flat_map(|t| t.split_whitespace())
        .filter_map(|id| ctx.doc.element_with_id(ctx.node, id))
        .collect();
    found.sort_by_key(|&n| ctx.doc.document_order(n));
    found.dedup();
    Ok(XPathValue::NodeSet(found))
}

fn fn_local_name(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    let name = name_target("local-name", &args, ctx)?
        .and_then(|n| ctx.doc.node_local_name(n))
        .unwrap_or("");
    Ok(XPathValue::String(name.to_string()))
}

fn fn_namespace_uri(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    let uri = name_target("namespace-uri", &args, ctx)?
        .and_then(|n| ctx.doc.node_namespace(n))
        .unwrap_or("");
    Ok(XPathValue::String(uri.to_string()))
}

fn fn_name(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    let name = name_target("name", &args, ctx)?
        .map(|n| ctx.doc.node_name(n))
        .unwrap_or_default();
    Ok(XPathValue::String(name))
}

// String Functions

fn fn_string(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    Ok(XPathValue::String(string_or_context("string", &args, ctx)?))
}

fn fn_concat(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    arity("concat", &args, 2, None)?;
    let result: String = args.iter().map(|a| a.to_string_value(ctx.doc)).collect();
    Ok(XPathValue::String(result))
}

fn fn_substring(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    arity("substring", &args, 2, Some(3))?;

    let s = args[0].to_string_value(ctx.doc);
    let start = xpath_round(args[1].to_number(ctx.doc));
    let length = match args.get(2) {
        Some(len) => xpath_round(len.to_number(ctx.doc)),
        None => f64::INFINITY,
    };

    // Characters at 1-based position p with start <= p < start + length
    let result: String = s
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < start + length
        })
        .map(|(_, c)| c)
        .collect();

    Ok(XPathValue::String(result))
}

fn fn_translate(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    arity("translate", &args, 3, Some(3))?;

    let s = args[0].to_string_value(ctx.doc);
    let from: Vec<char> = args[1].to_string_value(ctx.doc).chars().collect();
    let to: Vec<char> = args[2].to_string_value(ctx.doc).chars().collect();

    let result: String = s
        .chars()
        .filter_map(|c| match from.iter().position(|&fc| fc == c) {
            Some(pos) => to.get(pos).copied(),
            None => Some(c),
        })
        .collect();

    Ok(XPathValue::String(result))
}

// Boolean Functions

fn fn_lang(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    arity("lang", &args, 1, Some(1))?;
    let target_lang = args[0].to_string_value(ctx.doc).to_lowercase();

    // Nearest xml:lang on the ancestor-or-self chain decides
    let mut node = Some(ctx.node);
    while let Some(current) = node {
        let lang = ctx.doc.attributes_of(current).iter().copied().find(|&a| {
            ctx.doc.node_namespace(a) == Some(ns::XML) && ctx.doc.node_local_name(a) == Some("lang")
        });
        if let Some(attr) = lang {
            let lang_lower = ctx.doc.string_value(attr).to_lowercase();
            let matched = lang_lower == target_lang
                || (lang_lower.starts_with(&target_lang)
                    && lang_lower.as_bytes().get(target_lang.len()) == Some(&b'-'));
            return Ok(XPathValue::Boolean(matched));
        }
        node = ctx.doc.parent_of(current);
    }
    Ok(XPathValue::Boolean(false))
}

// Number Functions

fn fn_sum(args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue> {
    arity("sum", &args, 1, Some(1))?;
    let total: f64 = nodeset_arg("sum", &args, 0)?
        .iter()
        .map(|&n| parse_number(&ctx.doc.string_value(n)))
        .sum();
    Ok(XPathValue::Number(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::XmlDocument;
    use crate::xpath::{evaluate, NoFunctions};

    fn eval_at(doc: &XmlDocument, node: NodeId, xpath: &str) -> XPathValue {
        evaluate(&EvalContext::new(doc, node, &NoFunctions), xpath).unwrap()
    }

    fn eval(xpath: &str) -> XPathValue {
        let doc = XmlDocument::parse("<r/>").unwrap();
        let r = doc.document_element(doc.roots()[0]).unwrap();
        eval_at(&doc, r, xpath)
    }

    #[test]
    fn test_concat() {
        assert_eq!(eval("concat('hello', ' ', 'world')"), XPathValue::from("hello world"));
    }

    #[test]
    fn test_contains() {
        assert_eq!(eval("contains('hello world', 'world')"), XPathValue::Boolean(true));
    }

    #[test]
    fn test_substring() {
        assert_eq!(eval("substring('hello', 2, 3)"), XPathValue::from("ell"));
        assert_eq!(eval("substring('12345', 1.5, 2.6)"), XPathValue::from("234"));
        assert_eq!(eval("substring('12345', 0, 3)"), XPathValue::from("12"));
        assert_eq!(eval("substring('12345', 0 div 0, 3)"), XPathValue::from(""));
    }

    #[test]
    fn test_normalize_space() {
        assert_eq!(eval("normalize-space('  hello   world  ')"), XPathValue::from("hello world"));
    }

    #[test]
    fn test_round() {
        assert_eq!(eval("round(2.5)"), XPathValue::Number(3.0));
        assert_eq!(eval("round(-2.5)"), XPathValue::Number(-2.0));
    }

    #[test]
    fn test_arity_errors() {
        let doc = XmlDocument::parse("<r/>").unwrap();
        let ctx = EvalContext::new(&doc, doc.roots()[0], &NoFunctions);
        let err = evaluate(&ctx, "not(1, 2)").unwrap_err();
        assert_eq!(
            err,
            XPathError::Arity {
                function: "not".to_string(),
                expected: "1".to_string(),
                found: 2
            }
        );
        assert!(matches!(evaluate(&ctx, "count('x')"), Err(XPathError::Type(_))));
    }

    #[test]
    fn test_id_finds_elements_in_same_tree() {
        let doc = XmlDocument::parse(r#"<r><a id="one"/><b id="two"/></r>"#).unwrap();
        let r = doc.document_element(doc.roots()[0]).unwrap();
        let result = eval_at(&doc, r, "id('two one missing')");
        assert_eq!(result.into_nodeset().unwrap().len(), 2);
    }

    #[test]
    fn test_lang_matches_xml_lang_attribute() {
        let doc = XmlDocument::parse(r#"<root xml:lang="en-US"><child/></root>"#).unwrap();
        let root = doc.document_element(doc.roots()[0]).unwrap();
        let child = doc.child_elements(root).next().unwrap();
        assert_eq!(eval_at(&doc, child, "lang('en')"), XPathValue::Boolean(true));
        assert_eq!(eval_at(&doc, child, "lang('fr')"), XPathValue::Boolean(false));
    }

    #[test]
    fn test_name_functions() {
        let doc = XmlDocument::parse(r#"<root xmlns:ns="http://example.com"><ns:child/></root>"#).unwrap();
        let root = doc.document_element(doc.roots()[0]).unwrap();
        assert_eq!(eval_at(&doc, root, "namespace-uri(*)"), XPathValue::from("http://example.com"));
        assert_eq!(eval_at(&doc, root, "name(*)"), XPathValue::from("ns:child"));
        assert_eq!(eval_at(&doc, root, "local-name(*)"), XPathValue::from("child"));
        assert_eq!(eval_at(&doc, root, "name(nothing)"), XPathValue::from(""));
    }

    #[test]
    fn test_sum_and_number() {
        let doc = XmlDocument::parse("<r><v>1</v><v>2.5</v></r>").unwrap();
        let r = doc.document_element(doc.roots()[0]).unwrap();
        assert_eq!(eval_at(&doc, r, "sum(v)"), XPathValue::Number(3.5));
        let v = doc.child_elements(r).next().unwrap();
        assert_eq!(eval_at(&doc, v, "number()"), XPathValue::Number(1.0));
    }
}
