//! XForms XPath extension functions
//!
//! Answers unprefixed calls and calls in the XForms namespace. Anything it
//! does not know goes to the host's resolver, and after that to the core
//! library.

use chrono::{NaiveDate, Utc};

use super::datatypes::{parse_date, parse_date_time};
use super::ns;
use crate::dom::NodeId;
use crate::engine::FormDocument;
use crate::xpath::eval::{EvalContext, FunctionResolver};
use crate::xpath::functions::{arity, nodeset_arg};
use crate::xpath::value::parse_number;
use crate::xpath::{Result, XPathValue};

/// Function library bound to one document and model
pub struct XFormsFunctions<'a> {
    doc: &'a FormDocument,
    model: Option<NodeId>,
}

impl<'a> XFormsFunctions<'a> {
    pub fn new(doc: &'a FormDocument, model: Option<NodeId>) -> Self {
        XFormsFunctions { doc, model }
    }

    fn library(&self, ctx: &EvalContext<'_>, local: &str, args: &[XPathValue]) -> Option<Result<XPathValue>> {
        let result = match local {
            "instance" => self.instance(ctx, args),
            "index" => arity(local, args, 1, Some(1)).map(|_| XPathValue::Number(f64::NAN)),
            "boolean-from-string" => arity(local, args, 1, Some(1)).map(|_| {
                let s = args[0].to_string_value(ctx.doc);
                let s = s.trim();
                XPathValue::Boolean(s.eq_ignore_ascii_case("true") || s == "1")
            }),
            "if" => arity(local, args, 3, Some(3)).map(|_| {
                if args[0].to_boolean() {
                    args[1].clone()
                } else {
                    args[2].clone()
                }
            }),
            "property" => arity(local, args, 1, Some(1)).map(|_| {
                XPathValue::String(
                    match args[0].to_string_value(ctx.doc).as_str() {
                        "version" => "1.1",
                        "conformance-level" => "full",
                        _ => "",
                    }
                    .to_string(),
                )
            }),
            "count-non-empty" => nodeset_arg(local, args, 0).map(|nodes| {
                let count = nodes
                    .iter()
                    .filter(|&&n| !ctx.doc.string_value(n).is_empty())
                    .count();
                XPathValue::Number(count as f64)
            }),
            "avg" => numbers(ctx, local, args).map(|values| {
                let avg = if values.is_empty() {
                    f64::NAN
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                };
                XPathValue::Number(avg)
            }),
            "min" => numbers(ctx, local, args).map(|values| XPathValue::Number(fold_or_nan(&values, f64::min))),
            "max" => numbers(ctx, local, args).map(|values| XPathValue::Number(fold_or_nan(&values, f64::max))),
            "days-from-date" => arity(local, args, 1, Some(1)).map(|_| {
                let s = args[0].to_string_value(ctx.doc);
                XPathValue::Number(days_from_date(&s))
            }),
            "seconds-from-dateTime" => arity(local, args, 1, Some(1)).map(|_| {
                let s = args[0].to_string_value(ctx.doc);
                XPathValue::Number(seconds_from_date_time(&s))
            }),
            "now" => arity(local, args, 0, Some(0))
                .map(|_| XPathValue::String(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string())),
            _ => return None,
        };
        Some(result)
    }

    /// Root element of the named instance, or of the model's first instance
    fn instance(&self, ctx: &EvalContext<'_>, args: &[XPathValue]) -> Result<XPathValue> {
        arity("instance", args, 0, Some(1))?;
        let Some(model) = self.model else {
            return Ok(XPathValue::empty_nodeset());
        };
        let id = args
            .first()
            .map(|a| a.to_string_value(ctx.doc).trim().to_string())
            .filter(|id| !id.is_empty());
        let instance = match id {
            Some(id) => self.doc.instance_by_id(model, &id),
            None => self.doc.instances_of(model).find(|i| i.root.is_some()),
        };
        let element = instance
            .and_then(|i| i.root)
            .and_then(|root| self.doc.xml().document_element(root));
        Ok(match element {
            Some(e) => XPathValue::single_node(e),
            None => XPathValue::empty_nodeset(),
        })
    }
}

impl FunctionResolver for XFormsFunctions<'_> {
    fn call(
        &self,
        ctx: &EvalContext<'_>,
        namespace: &str,
        local: &str,
        args: &[XPathValue],
    ) -> Option<Result<XPathValue>> {
        if namespace.is_empty() || namespace == ns::XFORMS {
            if let Some(result) = self.library(ctx, local, args) {
                return Some(result);
            }
        }
        self.doc.host.functions.as_ref()?.call(ctx, namespace, local, args)
    }

    fn variable(&self, name: &str) -> Option<XPathValue> {
        self.doc.host.functions.as_ref()?.variable(name)
    }
}

fn numbers(ctx: &EvalContext<'_>, function: &str, args: &[XPathValue]) -> Result<Vec<f64>> {
    arity(function, args, 1, Some(1))?;
    let nodes = nodeset_arg(function, args, 0)?;
    Ok(nodes
        .iter()
        .map(|&n| parse_number(&ctx.doc.string_value(n)))
        .collect())
}

fn fold_or_nan(values: &[f64], pick: fn(f64, f64) -> f64) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    values.iter().copied().fold(values[0], pick)
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Whole days since 1970-01-01 of an `xsd:date` or `xsd:dateTime`, zone ignored
fn days_from_date(s: &str) -> f64 {
    let date = parse_date(s).or_else(|| parse_date_time(s).map(|(dt, _)| dt.date()));
    match date {
        Some(d) => (d - epoch()).num_days() as f64,
        None => f64::NAN,
    }
}

/// Seconds since the epoch of an `xsd:dateTime`; no zone means UTC
fn seconds_from_date_time(s: &str) -> f64 {
    let Some((naive, zone)) = parse_date_time(s) else {
        return f64::NAN;
    };
    let offset = zone.map_or(0, |z| z.local_minus_utc());
    let utc = naive.and_utc();
    let whole = utc.timestamp() - i64::from(offset);
    whole as f64 + f64::from(utc.timestamp_subsec_nanos()) / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_from_date() {
        assert_eq!(days_from_date("1970-01-02"), 1.0);
        assert_eq!(days_from_date("2002-01-01"), 11688.0);
        assert_eq!(days_from_date("1969-12-31"), -1.0);
        assert_eq!(days_from_date("2002-01-01T12:00:00Z"), 11688.0);
        assert!(days_from_date("not a date").is_nan());
    }

    #[test]
    fn test_seconds_from_date_time() {
        assert_eq!(seconds_from_date_time("1970-01-01T00:00:00Z"), 0.0);
        assert_eq!(seconds_from_date_time("1970-01-01T01:00:00+01:00"), 0.0);
        assert_eq!(seconds_from_date_time("1970-01-01T00:00:01.5"), 1.5);
        assert!(seconds_from_date_time("1970-01-01").is_nan());
    }

    #[test]
    fn test_fold_or_nan() {
        assert_eq!(fold_or_nan(&[3.0, 1.0, 2.0], f64::min), 1.0);
        assert_eq!(fold_or_nan(&[3.0, 1.0, 2.0], f64::max), 3.0);
        assert!(fold_or_nan(&[], f64::max).is_nan());
        assert!(fold_or_nan(&[1.0, f64::NAN], f64::max).is_nan());
    }
}
