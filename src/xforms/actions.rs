//! XForms actions
//!
//! Handlers run synchronously against the document. The model actions
//! (`rebuild`, `recalculate`, `revalidate`, `refresh`) run their phase at
//! once instead of waiting for the next invoke pass.

use super::binding::{in_scope_context, resolve_single_node_binding};
use super::model;
use super::ns;
use super::registry::ElementKind;
use super::submission;
use crate::dom::{DocumentAccess, NodeId, NodeKind};
use crate::engine::FormDocument;
use crate::error::FatalError;

/// Run a handler element queued by the event layer
pub fn run_handler(doc: &mut FormDocument, handler: NodeId) -> Result<(), FatalError> {
    if doc.is_failed() || !doc.xml.is_attached(handler) {
        return Ok(());
    }
    run_action(doc, handler)
}

/// Run one action element; unknown elements are ignored
pub fn run_action(doc: &mut FormDocument, element: NodeId) -> Result<(), FatalError> {
    let Some(kind) = doc.kind_of(element) else {
        tracing::debug!(element, "not an action; ignored");
        return Ok(());
    };
    tracing::debug!(element, ?kind, "action");
    match kind {
        ElementKind::Action => {
            let children: Vec<NodeId> = doc
                .xml
                .child_elements(element)
                .filter(|&c| doc.xml.attribute_node_ns(c, ns::EVENTS, "event").is_none())
                .collect();
            for child in children {
                if doc.kind_of(child).is_some_and(ElementKind::is_action) {
                    run_action(doc, child)?;
                }
                if doc.is_failed() {
                    break;
                }
            }
        }
        ElementKind::SetValue => set_value(doc, element),
        ElementKind::Send => send(doc, element),
        ElementKind::Dispatch => dispatch(doc, element),
        ElementKind::Rebuild => {
            if let Some(model) = target_model(doc, element) {
                flag(doc, model, |f| f.rebuild = true);
                model::rebuild(doc, model)?;
            }
        }
        ElementKind::Recalculate => {
            if let Some(model) = target_model(doc, element) {
                flag(doc, model, |f| f.recalculate = true);
                model::recalculate(doc, model)?;
            }
        }
        ElementKind::Revalidate => {
            if let Some(model) = target_model(doc, element) {
                flag(doc, model, |f| f.revalidate = true);
                model::revalidate(doc, model)?;
            }
        }
        ElementKind::Refresh => {
            if let Some(model) = target_model(doc, element) {
                flag(doc, model, |f| f.refresh = true);
                model::refresh(doc, model)?;
            }
        }
        _ => tracing::debug!(element, ?kind, "element is not an action"),
    }
    Ok(())
}

fn flag(doc: &mut FormDocument, model: NodeId, apply: impl FnOnce(&mut model::DeferredFlags)) {
    if let Some(flags) = doc.flags_mut(model) {
        apply(flags);
    }
}

/// The `model` attribute, else the enclosing or in-scope model
fn target_model(doc: &mut FormDocument, element: NodeId) -> Option<NodeId> {
    if let Some(id) = doc.xml.attribute(element, "model").map(str::to_string) {
        let model = doc
            .element_by_id(&id)
            .filter(|&m| doc.kind_of(m) == Some(ElementKind::Model));
        if model.is_none() {
            doc.binding_exception(element, &format!("no model element with id '{id}'"));
        }
        return model;
    }
    doc.enclosing_model(element)
        .or_else(|| in_scope_context(doc, element).map(|ctx| ctx.model))
        .or_else(|| doc.models.first().map(|m| m.element))
}

/// `setvalue`: the `value` expression, else the element's text
fn set_value(doc: &mut FormDocument, element: NodeId) {
    let binding = match resolve_single_node_binding(doc, element) {
        Ok(binding) => binding,
        Err(err) => {
            doc.binding_exception(element, &err.to_string());
            return;
        }
    };
    let Some(node) = binding.as_ref().and_then(|b| b.first()) else {
        tracing::debug!(element, "setvalue bound to nothing");
        return;
    };
    let value = match doc.xml.attribute(element, "value") {
        Some(expr) => {
            let expr = expr.to_string();
            match doc.context_for_node(node, 1, 1) {
                Some(ctx) => doc.evaluate_string(&ctx, element, &expr),
                None => String::new(),
            }
        }
        None => text_of(doc, element),
    };
    doc.set_item_value(node, &value);
}

fn text_of(doc: &FormDocument, element: NodeId) -> String {
    doc.xml
        .children(element)
        .filter(|&c| matches!(doc.xml.kind(c), Some(NodeKind::Text | NodeKind::CData)))
        .map(|c| doc.xml.string_value(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// `send`: run the submission named by `submission`
fn send(doc: &mut FormDocument, element: NodeId) {
    let Some(id) = doc.xml.attribute(element, "submission").map(str::to_string) else {
        tracing::warn!(element, "send without a submission attribute");
        return;
    };
    let target = doc
        .element_by_id(&id)
        .filter(|&s| doc.kind_of(s) == Some(ElementKind::Submission));
    match target {
        Some(submission) => {
            // failures are reported through xforms-submit-error
            let _ = submission::submit(doc, submission);
        }
        None => doc.binding_exception(element, &format!("no submission element with id '{id}'")),
    }
}

/// `dispatch`: raise the event `name` at the element `target`
fn dispatch(doc: &mut FormDocument, element: NodeId) {
    let name = doc.xml.attribute(element, "name").map(str::to_string);
    let target = doc.xml.attribute(element, "target").map(str::to_string);
    let (Some(name), Some(target)) = (name, target) else {
        tracing::warn!(element, "dispatch needs name and target");
        return;
    };
    match doc.element_by_id(&target) {
        Some(target) => doc.notify(&name, target),
        None => tracing::warn!(element, id = %target, "dispatch target not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dom::XmlDocument;
    use crate::engine::HostServices;
    use crate::xforms::events::NotificationLog;
    use crate::xforms::model::{construct, construct_done, ready};

    const FORM: &str = r#"<html xmlns:xf="http://www.w3.org/2002/xforms" xmlns:ev="http://www.w3.org/2001/xml-events">
        <xf:model id="m">
            <xf:instance><data><name/><count>1</count></data></xf:instance>
        </xf:model>
        <xf:action id="fill">
            <xf:setvalue ref="name">  Ada  </xf:setvalue>
            <xf:setvalue ref="count" value=". + 1"/>
            <xf:dispatch name="custom-event" target="m"/>
            <xf:setvalue ev:event="never" ref="name">skipped</xf:setvalue>
        </xf:action>
        <xf:recalculate id="recalc" model="m"/>
        <xf:refresh id="bad-refresh" model="missing"/>
    </html>"#;

    fn load(log: &NotificationLog) -> FormDocument {
        let xml = XmlDocument::parse(FORM).unwrap();
        let host = HostServices {
            sink: Some(Box::new(log.clone())),
            ..HostServices::default()
        };
        let mut doc = FormDocument::new(EngineConfig::default(), xml, host);
        doc.scan();
        let model = doc.models[0].element;
        construct(&mut doc, model).unwrap();
        construct_done(&mut doc, model);
        ready(&mut doc, model);
        doc
    }

    fn value_of(doc: &FormDocument, name: &str) -> Option<String> {
        let root = doc.instances[0].root.unwrap();
        let data = doc.xml.document_element(root).unwrap();
        let node = doc
            .xml
            .child_elements(data)
            .find(|&c| doc.xml.node_local_name(c) == Some(name))
            .unwrap();
        doc.items.value(&doc.xml, node)
    }

    #[test]
    fn test_action_runs_children_in_order() {
        let log = NotificationLog::new();
        let mut doc = load(&log);
        let fill = doc.element_by_id("fill").unwrap();
        run_handler(&mut doc, fill).unwrap();

        assert_eq!(value_of(&doc, "name").as_deref(), Some("Ada"));
        assert_eq!(value_of(&doc, "count").as_deref(), Some("2"));
        let model = doc.element_by_id("m").unwrap();
        assert_eq!(log.names_for(model).last().map(String::as_str), Some("custom-event"));
    }

    #[test]
    fn test_recalculate_applies_queued_values() {
        let log = NotificationLog::new();
        let mut doc = load(&log);
        let fill = doc.element_by_id("fill").unwrap();
        run_handler(&mut doc, fill).unwrap();
        let model = doc.element_by_id("m").unwrap();
        assert!(doc.model_state(model).unwrap().flags.recalculate);

        let recalc = doc.element_by_id("recalc").unwrap();
        run_action(&mut doc, recalc).unwrap();
        let flags = doc.model_state(model).unwrap().flags;
        assert!(!flags.recalculate);
        assert!(flags.revalidate);

        let data = doc.xml.document_element(doc.instances[0].root.unwrap()).unwrap();
        assert_eq!(doc.xml.serialize(data).unwrap(), "<data><name>Ada</name><count>2</count></data>");
    }

    #[test]
    fn test_unknown_model_is_binding_exception() {
        let log = NotificationLog::new();
        let mut doc = load(&log);
        let refresh = doc.element_by_id("bad-refresh").unwrap();
        run_action(&mut doc, refresh).unwrap();
        run_action(&mut doc, refresh).unwrap();
        assert_eq!(log.count(crate::xforms::events::names::BINDING_EXCEPTION), 1);
    }
}
