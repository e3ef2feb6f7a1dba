//! Binding resolution
//!
//! Turns `bind`, `ref` and `nodeset` attributes into a [`Binding`]. The
//! `bind` attribute wins over `ref`/`nodeset`; a `model` attribute switches
//! the context to that model's default context.
//!
//! Without an enclosing scope the context falls back to the first model's
//! default context, but only when that model precedes the first `group` of
//! the host document.

use thiserror::Error;

use super::context::EvaluationContext;
use super::registry::ElementKind;
use crate::dom::{NodeId, NodeKind};
use crate::engine::FormDocument;

/// Nodes selected by a binding expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub expression: String,
    /// Context the expression was evaluated in, if one existed
    pub context: Option<EvaluationContext>,
    /// Selected nodes in document order
    pub nodes: Vec<NodeId>,
}

impl Binding {
    pub fn first(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Keep only the first node
    pub fn into_single(mut self) -> Self {
        self.nodes.truncate(1);
        self
    }
}

/// Why a binding attribute could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingException {
    #[error("no bind element with id '{0}'")]
    UnknownBind(String),

    #[error("bind '{0}' has no binding")]
    UnboundBind(String),

    #[error("no model element with id '{0}'")]
    UnknownModel(String),
}

/// Resolve `bind` or `ref` to at most one node
pub fn resolve_single_node_binding(
    doc: &FormDocument,
    element: NodeId,
) -> Result<Option<Binding>, BindingException> {
    Ok(resolve(doc, element, "ref")?.map(Binding::into_single))
}

/// Resolve `bind` or `nodeset`
pub fn resolve_node_set_binding(
    doc: &FormDocument,
    element: NodeId,
) -> Result<Option<Binding>, BindingException> {
    resolve(doc, element, "nodeset")
}

fn resolve(
    doc: &FormDocument,
    element: NodeId,
    attribute: &str,
) -> Result<Option<Binding>, BindingException> {
    let xml = doc.xml();
    if let Some(bind_id) = xml.attribute(element, "bind") {
        let bind = doc
            .element_by_id(bind_id)
            .filter(|&b| doc.kind_of(b) == Some(ElementKind::Bind))
            .ok_or_else(|| BindingException::UnknownBind(bind_id.to_string()))?;
        let binding = doc
            .binding_of(bind)
            .ok_or_else(|| BindingException::UnboundBind(bind_id.to_string()))?;
        return Ok(Some(binding.clone()));
    }

    let Some(expression) = xml.attribute(element, attribute) else {
        return Ok(None);
    };
    let context = model_context(doc, element)?;
    let nodes = match context {
        Some(ctx) if ctx.is_valid(xml) => doc
            .evaluate_or_warn(&ctx, element, expression)
            .and_then(|v| v.into_nodeset())
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    Ok(Some(Binding {
        expression: expression.to_string(),
        context,
        nodes,
    }))
}

/// In-scope context, overridden by the element's `model` attribute
fn model_context(
    doc: &FormDocument,
    element: NodeId,
) -> Result<Option<EvaluationContext>, BindingException> {
    let in_scope = in_scope_context(doc, element);
    let Some(model_id) = doc.xml().attribute(element, "model") else {
        return Ok(in_scope);
    };
    let model = doc
        .element_by_id(model_id)
        .filter(|&m| doc.kind_of(m) == Some(ElementKind::Model))
        .ok_or_else(|| BindingException::UnknownModel(model_id.to_string()))?;
    match in_scope {
        Some(ctx) if ctx.model == model => Ok(Some(ctx)),
        _ => Ok(doc.default_context(model)),
    }
}

/// Whether the element carries any binding attribute
pub fn has_binding_attributes(doc: &FormDocument, element: NodeId) -> bool {
    let xml = doc.xml();
    ["ref", "nodeset", "bind"]
        .iter()
        .any(|a| xml.attribute_node(element, a).is_some())
}

/// Context for expressions on `element`
///
/// The nearest enclosing scope decides: a model gives its default context,
/// a bound scope its first node. A bound scope that selected nothing leaves
/// no context at all.
pub fn in_scope_context(doc: &FormDocument, element: NodeId) -> Option<EvaluationContext> {
    for ancestor in doc.xml().ancestors(element) {
        let Some(kind) = doc.kind_of(ancestor) else {
            continue;
        };
        if !kind.is_context_scope() {
            continue;
        }
        if kind == ElementKind::Model {
            return doc.default_context(ancestor);
        }
        if has_binding_attributes(doc, ancestor) {
            let node = doc.binding_of(ancestor)?.first()?;
            return doc.context_for_node(node, 1, 1);
        }
    }
    default_model_context(doc)
}

/// Default context of the first model that precedes any `group`
fn default_model_context(doc: &FormDocument) -> Option<EvaluationContext> {
    let xml = doc.xml();
    for node in xml.descendants(doc.host_root()) {
        if xml.kind(node) != Some(NodeKind::Element) {
            continue;
        }
        match doc.kind_of(node) {
            Some(ElementKind::Group) => return None,
            Some(ElementKind::Model) => return doc.default_context(node),
            _ => {}
        }
    }
    None
}

/// Re-resolve the bindings of every control, group and submission
///
/// Elements are visited in document order so enclosing groups are current
/// before their content.
pub fn refresh_bindings(doc: &mut FormDocument) {
    let elements =
        doc.elements_where(|k| k.is_ui_bound() || k == ElementKind::Submission);
    for element in elements {
        let resolved = resolve_single_node_binding(doc, element);
        let binding = match resolved {
            Ok(binding) => binding,
            Err(err) => {
                doc.binding_exception(element, &err.to_string());
                None
            }
        };
        if let Some(behavior) = doc.behaviors.get_mut(&element) {
            behavior.binding = binding;
        }
    }
}
