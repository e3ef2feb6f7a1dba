//! The form document
//!
//! Owns the arena (host tree plus one tree per loaded instance), the model
//! item side table, the behaviour table keyed by element node id, the model
//! and instance states, the listener table and the pending action queue.
//! All XForms processing borrows it.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::config::EngineConfig;
use crate::dom::{DocumentAccess, NodeId, NodeKind, XmlDocument};
use crate::error::FatalError;
use crate::host::{RefreshHook, ResourceResolver, SerializeHook, SubmissionProcessor};
use crate::xforms::binding::Binding;
use crate::xforms::context::EvaluationContext;
use crate::xforms::events::{names, Listener, ListenerTable, Notification, NotificationSink};
use crate::xforms::functions::XFormsFunctions;
use crate::xforms::item::{ItemTable, ModelItemView};
use crate::xforms::model::{DeferredFlags, InstanceState, ModelState};
use crate::xforms::ns;
use crate::xforms::registry::{ElementKind, Registry};
use crate::xpath::{self, evaluate_compiled, EvalContext, ExpressionCache, FunctionResolver, XPathValue};

use super::ControlView;

/// Behaviour attached to a registered element
#[derive(Debug, Clone)]
pub struct Behavior {
    pub kind: ElementKind,
    /// Last resolved binding; `None` when unbound or unresolvable
    pub binding: Option<Binding>,
}

/// Collaborators supplied through the builder
#[derive(Default)]
pub(crate) struct HostServices {
    pub resolver: Option<Rc<dyn ResourceResolver>>,
    pub processors: Vec<Box<dyn SubmissionProcessor>>,
    pub functions: Option<Box<dyn FunctionResolver>>,
    pub sink: Option<Box<dyn NotificationSink>>,
    pub serialize_hook: Option<Box<dyn SerializeHook>>,
    pub refresh_hooks: Vec<Box<dyn RefreshHook>>,
}

/// Mutable state of one loaded form
pub struct FormDocument {
    pub(crate) config: EngineConfig,
    pub(crate) xml: XmlDocument,
    pub(crate) host_root: NodeId,
    pub(crate) registry: Registry,
    pub(crate) items: ItemTable,
    pub(crate) behaviors: BTreeMap<NodeId, Behavior>,
    /// Models in document order
    pub(crate) models: Vec<ModelState>,
    /// Instances in document order
    pub(crate) instances: Vec<InstanceState>,
    pub(crate) listeners: ListenerTable,
    pub(crate) action_queue: VecDeque<NodeId>,
    pub(crate) next_element_id: u32,
    pub(crate) failure: Option<FatalError>,
    pub(crate) cache: ExpressionCache,
    pub(crate) host: HostServices,
    /// Elements whose binding exception was already reported
    pub(crate) reported_bindings: HashSet<NodeId>,
    /// Submissions currently running
    pub(crate) in_flight: HashSet<NodeId>,
    pub(crate) structure_changed: bool,
    pub(crate) pending_sweep: bool,
}

impl std::fmt::Debug for FormDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormDocument")
            .field("nodes", &self.xml.node_count())
            .field("models", &self.models)
            .field("instances", &self.instances)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl FormDocument {
    pub(crate) fn new(config: EngineConfig, xml: XmlDocument, host: HostServices) -> Self {
        let host_root = xml.roots().first().copied().unwrap_or(0);
        let cache = ExpressionCache::with_capacity(config.expression_cache_capacity);
        FormDocument {
            config,
            xml,
            host_root,
            registry: Registry::standard(),
            items: ItemTable::new(),
            behaviors: BTreeMap::new(),
            models: Vec::new(),
            instances: Vec::new(),
            listeners: ListenerTable::new(),
            action_queue: VecDeque::new(),
            next_element_id: 1,
            failure: None,
            cache,
            host,
            reported_bindings: HashSet::new(),
            in_flight: HashSet::new(),
            structure_changed: false,
            pending_sweep: false,
        }
    }

    pub fn xml(&self) -> &XmlDocument {
        &self.xml
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn items(&self) -> &ItemTable {
        &self.items
    }

    pub fn host_root(&self) -> NodeId {
        self.host_root
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn failure(&self) -> Option<&FatalError> {
        self.failure.as_ref()
    }

    pub fn kind_of(&self, element: NodeId) -> Option<ElementKind> {
        self.behaviors.get(&element).map(|b| b.kind)
    }

    pub fn binding_of(&self, element: NodeId) -> Option<&Binding> {
        self.behaviors.get(&element).and_then(|b| b.binding.as_ref())
    }

    /// Registered elements of `kind` in document order
    pub fn elements_of_kind(&self, kind: ElementKind) -> Vec<NodeId> {
        self.elements_where(|k| k == kind)
    }

    pub fn elements_where(&self, pred: impl Fn(ElementKind) -> bool) -> Vec<NodeId> {
        let mut found: Vec<NodeId> = self
            .behaviors
            .iter()
            .filter(|(_, b)| pred(b.kind))
            .map(|(&n, _)| n)
            .collect();
        self.xml.sort_document_order(&mut found);
        found
    }

    // =========================================================================
    // Structure
    // =========================================================================

    /// Register behaviours, models, instances and listeners for the host tree
    ///
    /// Safe to repeat: known elements keep their state, removed ones are dropped.
    pub fn scan(&mut self) {
        let host_root = self.host_root;
        let elements: Vec<NodeId> = self
            .xml
            .descendants(host_root)
            .filter(|&n| self.xml.kind(n) == Some(NodeKind::Element))
            .collect();

        let xml = &self.xml;
        self.behaviors
            .retain(|&n, _| xml.is_attached(n) && xml.root_of(n) == host_root);

        for element in elements {
            let namespace = self.xml.node_namespace(element).unwrap_or("");
            let local = self.xml.node_local_name(element).unwrap_or("");
            let Some(kind) = self.registry.lookup(namespace, local) else {
                continue;
            };
            self.behaviors
                .entry(element)
                .or_insert(Behavior { kind, binding: None });

            match kind {
                ElementKind::Model if self.model_index(element).is_none() => {
                    tracing::debug!(model = element, "model registered");
                    self.models.push(ModelState::new(element));
                }
                ElementKind::Instance if self.instance_index(element).is_none() => {
                    let parent = self.xml.parent_of(element);
                    if let Some(model) = parent.filter(|&p| self.kind_of(p) == Some(ElementKind::Model)) {
                        self.instances.push(InstanceState::new(element, model));
                    }
                }
                _ => {}
            }

            let is_listener = kind == ElementKind::Listener;
            if is_listener || self.xml.attribute_node_ns(element, ns::EVENTS, "event").is_some() {
                if let Some(listener) = Listener::from_element(&self.xml, element, is_listener) {
                    self.listeners.register(listener);
                }
            }
        }

        let xml = &self.xml;
        self.models.retain(|m| xml.is_attached(m.element));
        let mut dropped = Vec::new();
        self.instances.retain(|i| {
            let keep = xml.is_attached(i.element);
            if !keep {
                dropped.extend(i.root);
            }
            keep
        });
        for root in dropped {
            self.xml.drop_tree(root);
        }
        let xml = &self.xml;
        self.models.sort_by_key(|m| xml.order_key(m.element));
        self.instances.sort_by_key(|i| xml.order_key(i.element));
        self.listeners.retain(|l| xml.is_attached(l.element));
        self.reported_bindings.clear();
        self.pending_sweep = true;
    }

    /// The element's `id`, assigning `_element{N}` when it has none
    pub fn element_id(&mut self, element: NodeId) -> Option<String> {
        if self.xml.kind(element) != Some(NodeKind::Element) {
            return None;
        }
        if let Some(id) = self.xml.attribute(element, "id") {
            return Some(id.to_string());
        }
        let id = format!("_element{}", self.next_element_id);
        self.next_element_id += 1;
        self.xml.set_attribute(element, "id", &id).ok()?;
        Some(id)
    }

    /// Element of the host tree with the given `id`
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.xml.element_by_id(self.host_root, id)
    }

    // =========================================================================
    // Models and instances
    // =========================================================================

    pub(crate) fn model_index(&self, model: NodeId) -> Option<usize> {
        self.models.iter().position(|m| m.element == model)
    }

    pub(crate) fn instance_index(&self, instance: NodeId) -> Option<usize> {
        self.instances.iter().position(|i| i.element == instance)
    }

    pub fn model_state(&self, model: NodeId) -> Option<&ModelState> {
        self.models.iter().find(|m| m.element == model)
    }

    pub(crate) fn flags_mut(&mut self, model: NodeId) -> Option<&mut DeferredFlags> {
        self.models
            .iter_mut()
            .find(|m| m.element == model)
            .map(|m| &mut m.flags)
    }

    pub fn instances_of(&self, model: NodeId) -> impl Iterator<Item = &InstanceState> {
        self.instances.iter().filter(move |i| i.model == model)
    }

    /// Tree roots of the model's loaded instances
    pub fn model_roots(&self, model: NodeId) -> Vec<NodeId> {
        self.instances_of(model).filter_map(|i| i.root).collect()
    }

    /// Instance whose tree contains `node`
    pub fn instance_for_node(&self, node: NodeId) -> Option<&InstanceState> {
        let root = self.xml.root_of(node);
        self.instances.iter().find(|i| i.root == Some(root))
    }

    pub fn model_of_node(&self, node: NodeId) -> Option<NodeId> {
        self.instance_for_node(node).map(|i| i.model)
    }

    /// Nearest `model` element containing `element` in the host tree
    pub fn enclosing_model(&self, element: NodeId) -> Option<NodeId> {
        self.xml
            .ancestors(element)
            .into_iter()
            .find(|&a| self.kind_of(a) == Some(ElementKind::Model))
    }

    /// Instance with the given id, searched in `model` only
    pub fn instance_by_id(&self, model: NodeId, id: &str) -> Option<&InstanceState> {
        self.instances_of(model)
            .find(|i| self.xml.attribute(i.element, "id") == Some(id))
    }

    /// First instance's document element, position 1, size 1
    pub fn default_context(&self, model: NodeId) -> Option<EvaluationContext> {
        let instance = self.instances_of(model).find(|i| i.root.is_some())?;
        let element = self.xml.document_element(instance.root?)?;
        Some(EvaluationContext::new(model, instance.element, element))
    }

    /// Context for a node that lives in an instance tree
    pub fn context_for_node(&self, node: NodeId, position: usize, size: usize) -> Option<EvaluationContext> {
        let instance = self.instance_for_node(node)?;
        Some(EvaluationContext {
            model: instance.model,
            instance: instance.element,
            node,
            position,
            size,
        })
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Evaluate `expr` at `ctx`, resolving prefixes on the host element `namespaces`
    pub fn evaluate(
        &self,
        ctx: &EvaluationContext,
        namespaces: NodeId,
        expr: &str,
    ) -> xpath::Result<XPathValue> {
        let compiled = self.cache.get_or_compile(expr)?;
        let functions = XFormsFunctions::new(self, Some(ctx.model));
        let eval = EvalContext::new(&self.xml, ctx.node, &functions)
            .with_namespaces(namespaces)
            .at(ctx.node, ctx.position, ctx.size);
        evaluate_compiled(&compiled, &eval)
    }

    /// Evaluate, logging a failure and treating it as no result
    pub fn evaluate_or_warn(
        &self,
        ctx: &EvaluationContext,
        element: NodeId,
        expr: &str,
    ) -> Option<XPathValue> {
        match self.evaluate(ctx, element, expr) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(element, expression = expr, error = %err, "expression evaluation failed");
                None
            }
        }
    }

    pub fn evaluate_string(&self, ctx: &EvaluationContext, element: NodeId, expr: &str) -> String {
        self.evaluate_or_warn(ctx, element, expr)
            .map(|v| v.to_string_value(&self.xml))
            .unwrap_or_default()
    }

    pub fn evaluate_boolean(&self, ctx: &EvaluationContext, element: NodeId, expr: &str) -> bool {
        self.evaluate_or_warn(ctx, element, expr)
            .is_some_and(|v| v.to_boolean())
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Deliver to the sink, then queue matching handlers
    pub fn dispatch(&mut self, mut notification: Notification) {
        notification.target_id = self
            .xml
            .attribute(notification.target, "id")
            .map(str::to_string);
        tracing::trace!(event = %notification.name, element = notification.target, "dispatch");
        if let Some(sink) = &self.host.sink {
            sink.notify(&notification);
        }
        if self.failure.is_none() {
            let handlers = self
                .listeners
                .handlers(&self.xml, notification.target, &notification.name);
            self.action_queue.extend(handlers);
        }
    }

    pub fn notify(&mut self, name: &str, target: NodeId) {
        self.dispatch(Notification::new(name, target));
    }

    /// Report a binding exception on `element` once until the next structural change
    pub fn binding_exception(&mut self, element: NodeId, reason: &str) {
        if !self.reported_bindings.insert(element) {
            return;
        }
        tracing::warn!(element, reason, "binding exception");
        self.dispatch(Notification::new(names::BINDING_EXCEPTION, element).with_message(reason));
    }

    /// Record a fatal error and dispatch its exception event
    ///
    /// Only the first error is kept; the document stays failed.
    pub fn fail(&mut self, error: FatalError, target: Option<NodeId>) -> FatalError {
        if self.failure.is_some() {
            return error;
        }
        tracing::error!(error = %error, "document failed");
        let (name, element) = match &error {
            FatalError::Version { element, .. } => (names::VERSION_EXCEPTION, self.element_by_id(element)),
            FatalError::Link { element, .. } => (names::LINK_EXCEPTION, self.element_by_id(element)),
            _ => (names::COMPUTE_EXCEPTION, None),
        };
        let target = target
            .or(element)
            .or_else(|| self.models.first().map(|m| m.element))
            .or_else(|| self.xml.document_element(self.host_root))
            .unwrap_or(self.host_root);
        self.failure = Some(error.clone());
        self.action_queue.clear();
        self.dispatch(Notification::new(name, target).with_message(error.to_string()));
        error
    }

    // =========================================================================
    // Item mutation
    // =========================================================================

    /// Queue a new value for `node` when it differs from the current one
    ///
    /// Returns false for nodes without a value and for equal values.
    pub fn set_item_value(&mut self, node: NodeId, value: &str) -> bool {
        let Some(current) = self.items.value(&self.xml, node) else {
            return false;
        };
        if current == value {
            return false;
        }
        self.queue_new_value(node, value);
        true
    }

    /// Queue a new value without comparing
    pub fn queue_new_value(&mut self, node: NodeId, value: &str) {
        tracing::trace!(node, value, "new value queued");
        self.items.entry(node).new_value = Some(value.to_string());
        self.flag_owner(node, |f| {
            f.recalculate = true;
            f.revalidate = true;
            f.refresh = true;
        });
    }

    /// Queue replacement of the node's children with parsed `xml`
    pub fn queue_new_contents(&mut self, node: NodeId, xml: &str) {
        self.items.entry(node).new_contents = Some(xml.to_string());
        self.flag_owner(node, DeferredFlags::set_all);
    }

    pub fn queue_clear(&mut self, node: NodeId) {
        self.items.entry(node).clear = true;
        self.flag_owner(node, DeferredFlags::set_all);
    }

    fn flag_owner(&mut self, node: NodeId, apply: impl FnOnce(&mut DeferredFlags)) {
        if let Some(model) = self.model_of_node(node) {
            if let Some(flags) = self.flags_mut(model) {
                apply(flags);
            }
        }
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// `{instance-id}${n}` for an instance node, allocating `n` on first use
    pub fn unique_item_id(&mut self, node: NodeId) -> Option<String> {
        let index = {
            let root = self.xml.root_of(node);
            self.instances.iter().position(|i| i.root == Some(root))?
        };
        let element = self.instances[index].element;
        let instance_id = self.element_id(element)?;
        let n = match self.items.get(node).and_then(|s| s.unique) {
            Some(n) => n,
            None => {
                let instance = &mut self.instances[index];
                instance.next_item += 1;
                let n = instance.next_item;
                self.items.entry(node).unique = Some(n);
                n
            }
        };
        Some(format!("{instance_id}${n}"))
    }

    pub fn model_item(&mut self, node: NodeId) -> Option<ModelItemView> {
        let id = self.unique_item_id(node)?;
        Some(ModelItemView {
            node,
            id,
            value: self.items.value(&self.xml, node),
            item_type: self.items.item_type(node),
            read_only: self.items.is_read_only(&self.xml, node),
            required: self.items.is_required(node),
            relevant: self.items.is_relevant(&self.xml, node),
            constraint: self.items.constraint(node),
            valid: self.items.is_valid(node),
        })
    }

    /// Current state of a control or group
    pub fn control_view(&self, element: NodeId) -> Option<ControlView> {
        let behavior = self.behaviors.get(&element)?;
        if !behavior.kind.is_ui_bound() {
            return None;
        }
        let node = behavior.binding.as_ref().and_then(Binding::first);
        let items = &self.items;
        Some(ControlView {
            element,
            id: self.xml.attribute(element, "id").map(str::to_string),
            kind: behavior.kind,
            node,
            value: node.and_then(|n| items.value(&self.xml, n)),
            item_type: node.map(|n| items.item_type(n)).unwrap_or_default(),
            read_only: node.is_some_and(|n| items.is_read_only(&self.xml, n)),
            required: node.is_some_and(|n| items.is_required(n)),
            relevant: node.is_some_and(|n| items.is_relevant(&self.xml, n)),
            valid: node.is_none_or(|n| items.is_valid(n)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = r#"<html xmlns:xf="http://www.w3.org/2002/xforms" xmlns:ev="http://www.w3.org/2001/xml-events">
        <xf:model id="m">
            <xf:instance><data/></xf:instance>
            <xf:action ev:event="xforms-ready"/>
        </xf:model>
        <xf:input ref="a"/>
    </html>"#;

    fn document() -> FormDocument {
        let xml = XmlDocument::parse(FORM).unwrap();
        let mut doc = FormDocument::new(EngineConfig::default(), xml, HostServices::default());
        doc.scan();
        doc
    }

    #[test]
    fn test_scan_registers_elements() {
        let doc = document();
        assert_eq!(doc.models.len(), 1);
        assert_eq!(doc.instances.len(), 1);
        assert_eq!(doc.listeners.len(), 1);
        assert_eq!(doc.elements_where(ElementKind::is_control).len(), 1);
    }

    #[test]
    fn test_scan_is_repeatable() {
        let mut doc = document();
        doc.scan();
        assert_eq!(doc.models.len(), 1);
        assert_eq!(doc.instances.len(), 1);
        assert_eq!(doc.listeners.len(), 1);
    }

    #[test]
    fn test_element_id_assignment() {
        let mut doc = document();
        let model = doc.element_by_id("m").unwrap();
        assert_eq!(doc.element_id(model).as_deref(), Some("m"));

        let instance = doc.instances[0].element;
        assert_eq!(doc.element_id(instance).as_deref(), Some("_element1"));
        assert_eq!(doc.element_id(instance).as_deref(), Some("_element1"));
        assert_eq!(doc.next_element_id, 2);
        assert_eq!(doc.element_by_id("_element1"), Some(instance));
    }

    #[test]
    fn test_fail_keeps_first_error() {
        let mut doc = document();
        doc.fail(
            FatalError::NonConvergent {
                phase: "recalculate".to_string(),
                iterations: 3,
            },
            None,
        );
        doc.fail(
            FatalError::NonConvergent {
                phase: "refresh".to_string(),
                iterations: 3,
            },
            None,
        );
        assert!(doc.is_failed());
        assert!(matches!(doc.failure(), Some(FatalError::NonConvergent { phase, .. }) if phase == "recalculate"));
    }
}
