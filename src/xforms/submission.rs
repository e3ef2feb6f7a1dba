//! Submission pipeline
//!
//! Steps run in a fixed order and stop at the first failure. Nothing in the
//! instance changes before the transport has answered, so a failed
//! submission leaves the data untouched.

use super::binding::resolve_single_node_binding;
use super::context::EvaluationContext;
use super::events::{names, Notification};
use super::model;
use super::registry::ElementKind;
use crate::dom::{DocumentAccess, NodeId, NodeKind, XmlDocument};
use crate::engine::FormDocument;
use crate::error::{SubmitError, SubmitErrorKind};
use crate::host::{Priority, SubmissionHeaders, SubmissionRequest, SubmissionStatus};

/// What a successful submission leaves for the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Done; any replacement already happened inside the document
    Completed,
    /// `replace="all"`: the host should show `body` in place of the document
    ReplaceAll { body: String },
}

/// Run the `submission` element, dispatching submit-done or submit-error
pub fn submit(doc: &mut FormDocument, submission: NodeId) -> Result<SubmitOutcome, SubmitError> {
    if !doc.in_flight.insert(submission) {
        let error = SubmitError::new(SubmitErrorKind::SubmissionInProgress, "submission already running");
        report(doc, submission, &error);
        return Err(error);
    }
    doc.notify(names::SUBMIT, submission);
    let result = run(doc, submission);
    doc.in_flight.remove(&submission);

    match &result {
        Ok(_) => {
            tracing::debug!(submission, "submission done");
            doc.notify(names::SUBMIT_DONE, submission);
        }
        Err(error) => report(doc, submission, error),
    }
    result
}

fn report(doc: &mut FormDocument, submission: NodeId, error: &SubmitError) {
    tracing::warn!(submission, kind = %error.kind, message = %error.message, "submission failed");
    doc.dispatch(
        Notification::new(names::SUBMIT_ERROR, submission)
            .with_error(error.kind)
            .with_message(error.message.clone()),
    );
}

fn err(kind: SubmitErrorKind, message: impl Into<String>) -> SubmitError {
    SubmitError::new(kind, message)
}

fn run(doc: &mut FormDocument, submission: NodeId) -> Result<SubmitOutcome, SubmitError> {
    let model = doc
        .enclosing_model(submission)
        .or_else(|| doc.models.first().map(|m| m.element))
        .ok_or_else(|| err(SubmitErrorKind::NoData, "submission has no model"))?;

    tracing::debug!(submission, "bringing model up to date");
    let flags = doc.model_state(model).map(|m| m.flags).unwrap_or_default();
    if flags.rebuild {
        model::rebuild(doc, model).map_err(|e| err(SubmitErrorKind::Unspecified, e.to_string()))?;
    }
    if doc.model_state(model).is_some_and(|m| m.flags.recalculate) {
        model::recalculate(doc, model).map_err(|e| err(SubmitErrorKind::Unspecified, e.to_string()))?;
    }
    if doc.model_state(model).is_some_and(|m| m.flags.revalidate) {
        model::revalidate(doc, model).map_err(|e| err(SubmitErrorKind::Unspecified, e.to_string()))?;
    }

    let node = bound_node(doc, submission, model)?;
    let ctx = doc
        .context_for_node(node, 1, 1)
        .ok_or_else(|| err(SubmitErrorKind::NoData, "bound node is not instance data"))?;

    let relevant = boolean_attribute(doc, submission, "relevant", true);
    let copy = prune(doc, node, relevant)?;

    if boolean_attribute(doc, submission, "validate", true) {
        tracing::debug!(submission, "validating");
        validate(doc, &copy.originals)?;
    }

    let method = child_value(doc, submission, &ctx, ElementKind::Method)
        .or_else(|| doc.xml.attribute(submission, "method").map(str::to_string))
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| err(SubmitErrorKind::Unspecified, "no submission method"))?;

    let uri = child_value(doc, submission, &ctx, ElementKind::Resource)
        .or_else(|| doc.xml.attribute(submission, "resource").map(str::to_string))
        .or_else(|| doc.xml.attribute(submission, "action").map(str::to_string))
        .ok_or_else(|| err(SubmitErrorKind::ResourceError, "no submission resource"))?;
    let resource = doc
        .config
        .resolve_uri(uri.trim())
        .map_err(|e| err(SubmitErrorKind::ResourceError, e))?;

    let serialization = doc.xml.attribute(submission, "serialization").map(str::to_string);
    let mut request = SubmissionRequest {
        resource,
        method,
        serialization: serialization.clone(),
        media_type: doc.xml.attribute(submission, "mediatype").map(str::to_string),
        encoding: doc.xml.attribute(submission, "encoding").map(str::to_string),
        headers: headers(doc, submission, &ctx),
        body: None,
    };
    if serialization.as_deref() != Some("none") {
        let hooked = doc
            .host
            .serialize_hook
            .as_ref()
            .and_then(|hook| hook.serialize(&request, &copy.xml));
        let body = match hooked {
            Some(body) => body,
            None => copy
                .xml
                .serialize(copy.root)
                .map_err(|e| err(SubmitErrorKind::Unspecified, e.to_string()))?,
        };
        request.body = Some(body);
    }

    tracing::debug!(submission, method = %request.method, resource = %request.resource, "dispatching");
    let response = {
        let mut chosen = None;
        let mut best = Priority::Ignore;
        for processor in &doc.host.processors {
            let priority = processor.can_submit(&request);
            if priority > best {
                best = priority;
                chosen = Some(processor);
            }
        }
        let processor = chosen.ok_or_else(|| {
            err(SubmitErrorKind::ResourceError, format!("no processor accepts '{}'", request.resource))
        })?;
        processor.submit(&request)
    };
    if response.status == SubmissionStatus::Error {
        return Err(err(SubmitErrorKind::ResourceError, format!("'{}' answered with an error", request.resource)));
    }
    let Some(body) = response.body.filter(|b| !b.is_empty()) else {
        return Ok(SubmitOutcome::Completed);
    };

    let replace = doc.xml.attribute(submission, "replace").unwrap_or("all").to_string();
    tracing::debug!(submission, replace = %replace, "applying response");
    match replace.as_str() {
        "none" => Ok(SubmitOutcome::Completed),
        "instance" => {
            let parsed = XmlDocument::parse(&body).map_err(|e| err(SubmitErrorKind::ParseError, e.to_string()))?;
            let (index, target) = replace_target(doc, submission, model, node)?;
            replace_instance(doc, index, target, &parsed)?;
            if let Some(flags) = doc.flags_mut(model) {
                flags.set_all();
            }
            Ok(SubmitOutcome::Completed)
        }
        "text" => {
            let (_, target) = replace_target(doc, submission, model, node)?;
            doc.queue_new_value(target, &body);
            Ok(SubmitOutcome::Completed)
        }
        "all" => Ok(SubmitOutcome::ReplaceAll { body }),
        other => Err(err(SubmitErrorKind::Unspecified, format!("unknown replace mode '{other}'"))),
    }
}

/// The single element or document node the submission sends
fn bound_node(doc: &mut FormDocument, submission: NodeId, model: NodeId) -> Result<NodeId, SubmitError> {
    let binding = match resolve_single_node_binding(doc, submission) {
        Ok(binding) => binding,
        Err(e) => {
            doc.binding_exception(submission, &e.to_string());
            return Err(err(SubmitErrorKind::NoData, e.to_string()));
        }
    };
    let node = match binding {
        Some(binding) => binding.first(),
        None => doc
            .default_context(model)
            .and_then(|ctx| doc.evaluate_or_warn(&ctx, submission, "/"))
            .and_then(|v| v.into_nodeset())
            .and_then(|nodes| nodes.first().copied()),
    };
    let node = node.ok_or_else(|| err(SubmitErrorKind::NoData, "binding selected nothing"))?;
    match doc.xml.kind(node) {
        Some(NodeKind::Element | NodeKind::Document) => Ok(node),
        _ => Err(err(SubmitErrorKind::NoData, "bound node is not an element or document")),
    }
}

fn boolean_attribute(doc: &FormDocument, element: NodeId, name: &str, default: bool) -> bool {
    match doc.xml.attribute(element, name).map(str::trim) {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

/// Detached copy of the submitted subtree
struct Pruned {
    xml: XmlDocument,
    root: NodeId,
    /// Original nodes that made it into the copy
    originals: Vec<NodeId>,
}

fn prune(doc: &FormDocument, node: NodeId, relevant_only: bool) -> Result<Pruned, SubmitError> {
    let keep = |n: NodeId| !relevant_only || doc.items.is_relevant(&doc.xml, n);
    let (xml, map) = doc
        .xml
        .clone_subtree(node, &keep)
        .ok_or_else(|| err(SubmitErrorKind::NoData, "nothing left after pruning"))?;
    let root = xml.roots().first().copied().unwrap_or_default();
    if xml.document_element(root).is_none() {
        return Err(err(SubmitErrorKind::NoData, "nothing left after pruning"));
    }
    let originals = map.into_iter().map(|(original, _)| original).collect();
    Ok(Pruned { xml, root, originals })
}

fn validate(doc: &FormDocument, nodes: &[NodeId]) -> Result<(), SubmitError> {
    for &node in nodes {
        if !doc.items.is_valid(node) {
            let name = doc.xml.node_name(node);
            return Err(err(SubmitErrorKind::ValidationError, format!("'{name}' is invalid")));
        }
    }
    Ok(())
}

/// Text of the first child of `kind`: its `value` expression, else its content
fn child_value(doc: &FormDocument, parent: NodeId, ctx: &EvaluationContext, kind: ElementKind) -> Option<String> {
    let child = doc
        .xml
        .child_elements(parent)
        .find(|&c| doc.kind_of(c) == Some(kind))?;
    Some(element_value(doc, child, ctx))
}

fn element_value(doc: &FormDocument, element: NodeId, ctx: &EvaluationContext) -> String {
    match doc.xml.attribute(element, "value") {
        Some(expr) => doc.evaluate_string(ctx, element, expr),
        None => doc.xml.string_value(element).trim().to_string(),
    }
}

/// `header` children, each with one `name` and any number of `value`s
fn headers(doc: &FormDocument, submission: NodeId, ctx: &EvaluationContext) -> SubmissionHeaders {
    let mut headers = SubmissionHeaders::new();
    let elements: Vec<NodeId> = doc
        .xml
        .child_elements(submission)
        .filter(|&c| doc.kind_of(c) == Some(ElementKind::Header))
        .collect();
    for header in elements {
        let Some(name) = child_value(doc, header, ctx, ElementKind::Name).filter(|n| !n.is_empty()) else {
            tracing::warn!(element = header, "header without a name");
            continue;
        };
        for value in doc
            .xml
            .child_elements(header)
            .filter(|&c| doc.kind_of(c) == Some(ElementKind::Value))
        {
            headers.append(name.clone(), element_value(doc, value, ctx));
        }
    }
    headers
}

/// Instance index and element that a response replaces
fn replace_target(
    doc: &mut FormDocument,
    submission: NodeId,
    model: NodeId,
    submitted: NodeId,
) -> Result<(usize, NodeId), SubmitError> {
    let index = match doc.xml.attribute(submission, "instance").map(str::to_string) {
        Some(id) => {
            let found = doc
                .instance_by_id(model, &id)
                .map(|i| i.element)
                .and_then(|e| doc.instance_index(e));
            match found {
                Some(index) => index,
                None => {
                    let reason = format!("no instance '{id}' in the submission's model");
                    doc.binding_exception(submission, &reason);
                    return Err(err(SubmitErrorKind::TargetError, reason));
                }
            }
        }
        None => {
            let element = doc
                .instance_for_node(submitted)
                .map(|i| i.element)
                .ok_or_else(|| err(SubmitErrorKind::TargetError, "submitted node has no instance"))?;
            doc.instance_index(element)
                .ok_or_else(|| err(SubmitErrorKind::TargetError, "submitted node has no instance"))?
        }
    };

    let root_element = doc.instances[index]
        .root
        .and_then(|root| doc.xml.document_element(root))
        .ok_or_else(|| err(SubmitErrorKind::TargetError, "target instance is empty"))?;
    let target = match doc.xml.attribute(submission, "targetref") {
        Some(expr) => {
            let ctx = doc
                .context_for_node(root_element, 1, 1)
                .ok_or_else(|| err(SubmitErrorKind::TargetError, "target instance is empty"))?;
            doc.evaluate_or_warn(&ctx, submission, expr)
                .and_then(|v| v.into_nodeset())
                .and_then(|nodes| nodes.first().copied())
                .ok_or_else(|| err(SubmitErrorKind::TargetError, "targetref selected nothing"))?
        }
        None => root_element,
    };
    if doc.xml.kind(target) != Some(NodeKind::Element) {
        return Err(err(SubmitErrorKind::TargetError, "replacement target is not an element"));
    }
    Ok((index, target))
}

fn replace_instance(doc: &mut FormDocument, index: usize, target: NodeId, parsed: &XmlDocument) -> Result<(), SubmitError> {
    let fragment = parsed
        .roots()
        .first()
        .and_then(|&root| parsed.document_element(root))
        .and_then(|element| parsed.snapshot(element))
        .ok_or_else(|| err(SubmitErrorKind::ParseError, "response has no document element"))?;
    let old_root = doc.instances[index].root;
    let mut map = Vec::new();

    if old_root.and_then(|root| doc.xml.document_element(root)) == Some(target) {
        let root = doc.xml.new_tree();
        doc.xml.build(&fragment, Some(root), &mut map);
        if let Some(old) = old_root {
            doc.xml.drop_tree(old);
        }
        doc.instances[index].root = Some(root);
        doc.instances[index].next_item = 0;
    } else {
        let replacement = doc.xml.build(&fragment, None, &mut map);
        doc.xml
            .replace_node(target, replacement)
            .map_err(|e| err(SubmitErrorKind::TargetError, e.to_string()))?;
    }
    doc.items.prune(&doc.xml);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::HostServices;
    use crate::host::{SerializeHook, SubmissionProcessor, SubmissionResponse};
    use crate::xforms::events::NotificationLog;
    use crate::xforms::model::{construct, construct_done, ready};

    struct Recorder {
        priority: Priority,
        response: SubmissionResponse,
        calls: Rc<RefCell<Vec<SubmissionRequest>>>,
    }

    impl SubmissionProcessor for Recorder {
        fn can_submit(&self, _request: &SubmissionRequest) -> Priority {
            self.priority
        }

        fn submit(&self, request: &SubmissionRequest) -> SubmissionResponse {
            self.calls.borrow_mut().push(request.clone());
            self.response.clone()
        }
    }

    type Calls = Rc<RefCell<Vec<SubmissionRequest>>>;

    fn recorder(priority: Priority, body: Option<&str>) -> (Box<dyn SubmissionProcessor>, Calls) {
        let calls = Calls::default();
        let processor = Recorder {
            priority,
            response: SubmissionResponse::success(body.map(str::to_string)),
            calls: calls.clone(),
        };
        (Box::new(processor), calls)
    }

    fn form(binds: &str, submission: &str) -> String {
        format!(
            r#"<html xmlns:xf="http://www.w3.org/2002/xforms">
                <xf:model id="m">
                    <xf:instance id="main"><data><name>Ada</name><secret>42</secret></data></xf:instance>
                    <xf:instance id="other"><result/></xf:instance>
                    {binds}
                    {submission}
                </xf:model>
            </html>"#
        )
    }

    fn load(text: &str, processors: Vec<Box<dyn SubmissionProcessor>>, log: &NotificationLog) -> FormDocument {
        load_host(
            text,
            HostServices {
                processors,
                sink: Some(Box::new(log.clone())),
                ..HostServices::default()
            },
        )
    }

    fn load_host(text: &str, host: HostServices) -> FormDocument {
        let xml = XmlDocument::parse(text).unwrap();
        let mut doc = FormDocument::new(EngineConfig::default(), xml, host);
        doc.scan();
        let model = doc.models[0].element;
        construct(&mut doc, model).unwrap();
        construct_done(&mut doc, model);
        ready(&mut doc, model);
        doc
    }

    fn instance_text(doc: &FormDocument, index: usize) -> String {
        doc.xml.serialize(doc.instances[index].root.unwrap()).unwrap()
    }

    #[test]
    fn test_validation_error_sends_nothing() {
        let (processor, calls) = recorder(Priority::Normal, Some("<data/>"));
        let log = NotificationLog::new();
        let text = form(
            r#"<xf:bind nodeset="name" constraint="false()"/>"#,
            r#"<xf:submission id="s" method="get" resource="http://x" replace="instance"/>"#,
        );
        let mut doc = load(&text, vec![processor], &log);
        let before = instance_text(&doc, 0);
        let s = doc.element_by_id("s").unwrap();

        let error = submit(&mut doc, s).unwrap_err();
        assert_eq!(error.kind, SubmitErrorKind::ValidationError);
        assert!(calls.borrow().is_empty());
        assert_eq!(instance_text(&doc, 0), before);

        let entry = log.entries().into_iter().find(|n| n.name == names::SUBMIT_ERROR).unwrap();
        assert_eq!(entry.error_type, Some(SubmitErrorKind::ValidationError));
        assert!(doc.in_flight.is_empty());
    }

    #[test]
    fn test_required_empty_fails_validation() {
        let (processor, calls) = recorder(Priority::Normal, None);
        let log = NotificationLog::new();
        let text = form(
            r#"<xf:bind nodeset="name" required="true()"/>"#,
            r#"<xf:submission id="s" ref="name" method="get" resource="http://x"/>"#,
        );
        let mut doc = load(&text, vec![processor], &log);
        let name = doc.xml.document_element(doc.instances[0].root.unwrap()).unwrap();
        let name = doc.xml.child_elements(name).next().unwrap();
        doc.set_item_value(name, "");
        let s = doc.element_by_id("s").unwrap();

        assert_eq!(submit(&mut doc, s).unwrap_err().kind, SubmitErrorKind::ValidationError);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_irrelevant_nodes_are_pruned() {
        let (processor, calls) = recorder(Priority::Normal, None);
        let log = NotificationLog::new();
        let text = form(
            r#"<xf:bind nodeset="secret" relevant="false()"/>"#,
            r#"<xf:submission id="s" method="post" resource="http://x/save"/>"#,
        );
        let mut doc = load(&text, vec![processor], &log);
        let s = doc.element_by_id("s").unwrap();

        assert_eq!(submit(&mut doc, s).unwrap(), SubmitOutcome::Completed);
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "post");
        assert_eq!(calls[0].resource.as_str(), "http://x/save");
        assert_eq!(calls[0].body.as_deref(), Some("<data><name>Ada</name></data>"));
        assert_eq!(log.count(names::SUBMIT_DONE), 1);
    }

    #[test]
    fn test_highest_priority_processor_wins() {
        let (low, low_calls) = recorder(Priority::Low, None);
        let (high, high_calls) = recorder(Priority::High, None);
        let (also_high, second_calls) = recorder(Priority::High, None);
        let log = NotificationLog::new();
        let text = form("", r#"<xf:submission id="s" method="put" resource="http://x"/>"#);
        let mut doc = load(&text, vec![low, high, also_high], &log);
        let s = doc.element_by_id("s").unwrap();

        submit(&mut doc, s).unwrap();
        assert!(low_calls.borrow().is_empty());
        assert_eq!(high_calls.borrow().len(), 1);
        assert!(second_calls.borrow().is_empty());
    }

    #[test]
    fn test_no_processor_is_resource_error() {
        let (ignoring, _) = recorder(Priority::Ignore, None);
        let log = NotificationLog::new();
        let text = form("", r#"<xf:submission id="s" method="get" resource="http://x"/>"#);
        let mut doc = load(&text, vec![ignoring], &log);
        let s = doc.element_by_id("s").unwrap();
        assert_eq!(submit(&mut doc, s).unwrap_err().kind, SubmitErrorKind::ResourceError);
    }

    #[test]
    fn test_missing_method_and_resource() {
        let log = NotificationLog::new();
        let text = form("", r#"<xf:submission id="a" resource="http://x"/><xf:submission id="b" method="get"/>"#);
        let mut doc = load(&text, Vec::new(), &log);
        let a = doc.element_by_id("a").unwrap();
        let b = doc.element_by_id("b").unwrap();
        assert_eq!(submit(&mut doc, a).unwrap_err().kind, SubmitErrorKind::Unspecified);
        assert_eq!(submit(&mut doc, b).unwrap_err().kind, SubmitErrorKind::ResourceError);
    }

    #[test]
    fn test_in_flight_submission_is_refused() {
        let log = NotificationLog::new();
        let text = form("", r#"<xf:submission id="s" method="get" resource="http://x"/>"#);
        let mut doc = load(&text, Vec::new(), &log);
        let s = doc.element_by_id("s").unwrap();
        doc.in_flight.insert(s);
        assert_eq!(submit(&mut doc, s).unwrap_err().kind, SubmitErrorKind::SubmissionInProgress);
        assert_eq!(log.count(names::SUBMIT), 0);
    }

    #[test]
    fn test_replace_instance_document() {
        let (processor, _) = recorder(Priority::Normal, Some("<data><name>Bob</name></data>"));
        let log = NotificationLog::new();
        let text = form("", r#"<xf:submission id="s" method="get" resource="http://x" replace="instance"/>"#);
        let mut doc = load(&text, vec![processor], &log);
        let s = doc.element_by_id("s").unwrap();
        let model = doc.element_by_id("m").unwrap();

        submit(&mut doc, s).unwrap();
        assert_eq!(instance_text(&doc, 0), "<data><name>Bob</name></data>");
        assert!(doc.model_state(model).unwrap().flags.rebuild);
    }

    #[test]
    fn test_replace_other_instance_with_targetref() {
        let (processor, _) = recorder(Priority::Normal, Some("<answer>yes</answer>"));
        let log = NotificationLog::new();
        let text = form(
            "",
            r#"<xf:submission id="s" method="get" resource="http://x" replace="instance" instance="other"/>"#,
        );
        let mut doc = load(&text, vec![processor], &log);
        let s = doc.element_by_id("s").unwrap();
        submit(&mut doc, s).unwrap();
        assert_eq!(instance_text(&doc, 0), "<data><name>Ada</name><secret>42</secret></data>");
        assert_eq!(instance_text(&doc, 1), "<answer>yes</answer>");
    }

    #[test]
    fn test_replace_unknown_instance_is_target_error() {
        let (processor, _) = recorder(Priority::Normal, Some("<answer/>"));
        let log = NotificationLog::new();
        let text = form(
            "",
            r#"<xf:submission id="s" method="get" resource="http://x" replace="instance" instance="nope"/>"#,
        );
        let mut doc = load(&text, vec![processor], &log);
        let s = doc.element_by_id("s").unwrap();
        assert_eq!(submit(&mut doc, s).unwrap_err().kind, SubmitErrorKind::TargetError);
        assert_eq!(log.count(names::BINDING_EXCEPTION), 1);
    }

    #[test]
    fn test_malformed_response_is_parse_error() {
        let (processor, _) = recorder(Priority::Normal, Some("<a></b>"));
        let log = NotificationLog::new();
        let text = form("", r#"<xf:submission id="s" method="get" resource="http://x" replace="instance"/>"#);
        let mut doc = load(&text, vec![processor], &log);
        let before = instance_text(&doc, 0);
        let s = doc.element_by_id("s").unwrap();
        assert_eq!(submit(&mut doc, s).unwrap_err().kind, SubmitErrorKind::ParseError);
        assert_eq!(instance_text(&doc, 0), before);
    }

    #[test]
    fn test_replace_all_and_text() {
        let (all, _) = recorder(Priority::Normal, Some("<html/>"));
        let log = NotificationLog::new();
        let text = form("", r#"<xf:submission id="s" method="get" resource="http://x"/>"#);
        let mut doc = load(&text, vec![all], &log);
        let s = doc.element_by_id("s").unwrap();
        assert_eq!(
            submit(&mut doc, s).unwrap(),
            SubmitOutcome::ReplaceAll { body: "<html/>".to_string() }
        );

        let (processor, _) = recorder(Priority::Normal, Some("plain"));
        let text = form(
            "",
            r#"<xf:submission id="s" method="get" resource="http://x" replace="text" targetref="name"/>"#,
        );
        let mut doc = load(&text, vec![processor], &log);
        let s = doc.element_by_id("s").unwrap();
        submit(&mut doc, s).unwrap();
        let data = doc.xml.document_element(doc.instances[0].root.unwrap()).unwrap();
        let name = doc.xml.child_elements(data).next().unwrap();
        assert_eq!(doc.items.value(&doc.xml, name).as_deref(), Some("plain"));
    }

    #[test]
    fn test_headers_and_serialization_none() {
        let (processor, calls) = recorder(Priority::Normal, None);
        let log = NotificationLog::new();
        let text = form(
            "",
            r#"<xf:submission id="s" resource="http://x" serialization="none">
                <xf:method value="'DELETE'"/>
                <xf:header>
                    <xf:name>X-Trace</xf:name>
                    <xf:value>one</xf:value>
                    <xf:value value="/data/name"/>
                </xf:header>
            </xf:submission>"#,
        );
        let mut doc = load(&text, vec![processor], &log);
        let s = doc.element_by_id("s").unwrap();
        submit(&mut doc, s).unwrap();

        let calls = calls.borrow();
        assert_eq!(calls[0].method, "delete");
        assert_eq!(calls[0].body, None);
        let values: Vec<&str> = calls[0].headers.get_all("x-trace").collect();
        assert_eq!(values, vec!["one", "Ada"]);
    }

    #[test]
    fn test_non_element_binding_is_no_data() {
        let (processor, calls) = recorder(Priority::Normal, None);
        let log = NotificationLog::new();
        let text = form(
            "",
            r#"<xf:submission id="text" ref="name/text()" method="post" resource="http://x"/>
               <xf:submission id="attr" ref="@missing" method="post" resource="http://x"/>"#,
        );
        let mut doc = load(&text, vec![processor], &log);
        let text_node = doc.element_by_id("text").unwrap();
        let attr = doc.element_by_id("attr").unwrap();

        assert_eq!(submit(&mut doc, text_node).unwrap_err().kind, SubmitErrorKind::NoData);
        assert_eq!(submit(&mut doc, attr).unwrap_err().kind, SubmitErrorKind::NoData);
        assert!(calls.borrow().is_empty());
        let kinds: Vec<_> = log
            .entries()
            .into_iter()
            .filter(|n| n.name == names::SUBMIT_ERROR)
            .map(|n| n.error_type)
            .collect();
        assert_eq!(kinds, vec![Some(SubmitErrorKind::NoData); 2]);
    }

    #[test]
    fn test_attribute_binding_is_no_data() {
        let (processor, calls) = recorder(Priority::Normal, None);
        let log = NotificationLog::new();
        let text = r#"<html xmlns:xf="http://www.w3.org/2002/xforms">
            <xf:model>
                <xf:instance><data lang="en"><name/></data></xf:instance>
                <xf:submission id="s" ref="@lang" method="post" resource="http://x"/>
            </xf:model>
        </html>"#;
        let mut doc = load(text, vec![processor], &log);
        let s = doc.element_by_id("s").unwrap();
        assert_eq!(submit(&mut doc, s).unwrap_err().kind, SubmitErrorKind::NoData);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_irrelevant_root_is_no_data() {
        let (processor, calls) = recorder(Priority::Normal, None);
        let log = NotificationLog::new();
        let text = form(
            r#"<xf:bind nodeset="/data" relevant="false()"/>"#,
            r#"<xf:submission id="s" method="post" resource="http://x"/>
               <xf:submission id="all" method="post" resource="http://x" relevant="false"/>"#,
        );
        let mut doc = load(&text, vec![processor], &log);
        let s = doc.element_by_id("s").unwrap();
        assert_eq!(submit(&mut doc, s).unwrap_err().kind, SubmitErrorKind::NoData);
        assert!(calls.borrow().is_empty());

        let all = doc.element_by_id("all").unwrap();
        submit(&mut doc, all).unwrap();
        assert_eq!(
            calls.borrow()[0].body.as_deref(),
            Some("<data><name>Ada</name><secret>42</secret></data>")
        );
    }

    /// Sends the text content as the body for `text/plain` requests
    struct PlainText;

    impl SerializeHook for PlainText {
        fn serialize(&self, request: &SubmissionRequest, data: &XmlDocument) -> Option<String> {
            if request.media_type.as_deref() != Some("text/plain") {
                return None;
            }
            let root = data.roots().first().copied()?;
            Some(format!("text:{}", data.string_value(root)))
        }
    }

    #[test]
    fn test_serialize_hook_overrides_body() {
        let (processor, calls) = recorder(Priority::Normal, None);
        let text = form(
            "",
            r#"<xf:submission id="plain" method="post" resource="http://x" mediatype="text/plain"/>
               <xf:submission id="xml" method="post" resource="http://x"/>"#,
        );
        let mut doc = load_host(
            &text,
            HostServices {
                processors: vec![processor],
                serialize_hook: Some(Box::new(PlainText)),
                ..HostServices::default()
            },
        );
        let plain = doc.element_by_id("plain").unwrap();
        let xml = doc.element_by_id("xml").unwrap();
        submit(&mut doc, plain).unwrap();
        submit(&mut doc, xml).unwrap();

        let calls = calls.borrow();
        assert_eq!(calls[0].body.as_deref(), Some("text:Ada42"));
        assert_eq!(calls[0].media_type.as_deref(), Some("text/plain"));
        assert_eq!(
            calls[1].body.as_deref(),
            Some("<data><name>Ada</name><secret>42</secret></data>")
        );
    }
}
