//! Model state machine
//!
//! Each model walks `Unconstructed -> Constructed -> ConstructDone -> Ready`
//! once and then runs the deferred-update phases whenever their flags are
//! set. Every phase repeats while its own flag is re-armed and gives up with
//! [`FatalError::NonConvergent`] once `max_phase_iterations` is exceeded.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::binding::{resolve_node_set_binding, Binding};
use super::context::EvaluationContext;
use super::datatypes;
use super::events::names;
use super::item::{item_nodes, ItemType, PendingNotifications};
use super::ns;
use super::registry::ElementKind;
use crate::dom::{split_qname, DocumentAccess, NodeId, NodeKind};
use crate::engine::FormDocument;
use crate::error::FatalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelStage {
    Unconstructed,
    Constructed,
    ConstructDone,
    Ready,
}

/// Deferred-update flags of one model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredFlags {
    pub rebuild: bool,
    pub recalculate: bool,
    pub revalidate: bool,
    pub refresh: bool,
}

impl DeferredFlags {
    pub fn any(&self) -> bool {
        self.rebuild || self.recalculate || self.revalidate || self.refresh
    }

    pub fn set_all(&mut self) {
        *self = DeferredFlags {
            rebuild: true,
            recalculate: true,
            revalidate: true,
            refresh: true,
        };
    }
}

/// Lifecycle state of one `model` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelState {
    pub element: NodeId,
    pub stage: ModelStage,
    pub flags: DeferredFlags,
}

impl ModelState {
    pub fn new(element: NodeId) -> Self {
        ModelState {
            element,
            stage: ModelStage::Unconstructed,
            flags: DeferredFlags::default(),
        }
    }
}

/// One `instance` element and the tree holding its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceState {
    pub element: NodeId,
    pub model: NodeId,
    /// Document node of the data tree, once loaded
    pub root: Option<NodeId>,
    /// Last allocated model item sequence number
    pub next_item: u32,
}

impl InstanceState {
    pub fn new(element: NodeId, model: NodeId) -> Self {
        InstanceState {
            element,
            model,
            root: None,
            next_item: 0,
        }
    }
}

fn flags(doc: &FormDocument, model: NodeId) -> DeferredFlags {
    doc.model_state(model).map(|m| m.flags).unwrap_or_default()
}

fn update_flags(doc: &mut FormDocument, model: NodeId, apply: impl FnOnce(&mut DeferredFlags)) {
    if let Some(flags) = doc.flags_mut(model) {
        apply(flags);
    }
}

fn set_stage(doc: &mut FormDocument, model: NodeId, stage: ModelStage) {
    if let Some(index) = doc.model_index(model) {
        doc.models[index].stage = stage;
    }
}

/// Count one iteration of `phase`, failing the document past the ceiling
fn tick(doc: &mut FormDocument, model: NodeId, phase: &str, iterations: &mut u32) -> Result<(), FatalError> {
    *iterations += 1;
    let ceiling = doc.config.max_phase_iterations;
    if *iterations > ceiling {
        let error = FatalError::NonConvergent {
            phase: phase.to_string(),
            iterations: ceiling,
        };
        return Err(doc.fail(error, Some(model)));
    }
    Ok(())
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Check the version, load instances and run the initial update
pub fn construct(doc: &mut FormDocument, model: NodeId) -> Result<(), FatalError> {
    let model_id = doc.element_id(model).unwrap_or_default();
    tracing::debug!(model = %model_id, "construct");
    doc.notify(names::MODEL_CONSTRUCT, model);

    if let Some(version) = doc.xml.attribute(model, "version").map(str::to_string) {
        if !doc.config.accepts_version(&version) {
            let error = FatalError::Version {
                element: model_id,
                version,
            };
            return Err(doc.fail(error, Some(model)));
        }
    }
    if let Some(schema) = doc.xml.attribute(model, "schema") {
        tracing::debug!(model = %model_id, schema, "schema reference not processed");
    }

    let indexes: Vec<usize> = (0..doc.instances.len())
        .filter(|&i| doc.instances[i].model == model)
        .collect();
    let mut loaded = false;
    for index in indexes {
        let element = doc.instances[index].element;
        doc.element_id(element);
        match load_instance(doc, index) {
            Ok(found) => loaded |= found,
            Err(error) => return Err(doc.fail(error, Some(element))),
        }
    }
    set_stage(doc, model, ModelStage::Constructed);

    if !loaded {
        tracing::debug!(model = %model_id, "no instance data; skipping initial update");
        return Ok(());
    }
    update_flags(doc, model, |f| {
        f.rebuild = true;
        f.recalculate = true;
        f.revalidate = true;
    });
    rebuild(doc, model)?;
    recalculate(doc, model)?;
    revalidate(doc, model)
}

/// Load instance data from `src` or the inline child element
///
/// Returns false when the instance has no data.
fn load_instance(doc: &mut FormDocument, index: usize) -> Result<bool, FatalError> {
    if doc.instances[index].root.is_some() {
        return Ok(true);
    }
    let element = doc.instances[index].element;
    let id = doc.element_id(element).unwrap_or_default();

    if let Some(src) = doc.xml.attribute(element, "src").map(str::to_string) {
        let link = |reason: String| FatalError::Link {
            element: id.clone(),
            uri: src.clone(),
            reason,
        };
        let url = doc.config.resolve_uri(&src).map_err(link)?;
        let resolver = doc
            .host
            .resolver
            .clone()
            .ok_or_else(|| link("no resource resolver configured".to_string()))?;
        let bytes = resolver.get(&url).map_err(|e| link(e.to_string()))?;
        let text = String::from_utf8(bytes).map_err(|e| link(e.to_string()))?;
        let root = doc.xml.parse_tree(&text).map_err(|e| link(e.to_string()))?;
        tracing::debug!(instance = %id, uri = %url, "instance loaded");
        doc.instances[index].root = Some(root);
        return Ok(true);
    }

    let Some(child) = doc.xml.child_elements(element).next() else {
        return Ok(false);
    };
    let Some(fragment) = doc.xml.snapshot(child) else {
        return Ok(false);
    };
    let root = doc.xml.new_tree();
    let mut map = Vec::new();
    doc.xml.build(&fragment, Some(root), &mut map);
    doc.instances[index].root = Some(root);
    Ok(true)
}

/// Initial binding refresh; notifications raised so far are discarded
pub fn construct_done(doc: &mut FormDocument, model: NodeId) {
    tracing::debug!(model, "construct-done");
    super::binding::refresh_bindings(doc);
    clear_pending(doc, model);
    update_flags(doc, model, |f| f.refresh = false);
    set_stage(doc, model, ModelStage::ConstructDone);
    doc.notify(names::MODEL_CONSTRUCT_DONE, model);
}

pub fn ready(doc: &mut FormDocument, model: NodeId) {
    tracing::debug!(model, "ready");
    set_stage(doc, model, ModelStage::Ready);
    doc.notify(names::READY, model);
}

/// Run whichever deferred-update phases are flagged; true when any ran
pub fn run_deferred(doc: &mut FormDocument, model: NodeId) -> Result<bool, FatalError> {
    if !flags(doc, model).any() {
        return Ok(false);
    }
    if flags(doc, model).rebuild {
        rebuild(doc, model)?;
    }
    if flags(doc, model).recalculate {
        recalculate(doc, model)?;
    }
    if flags(doc, model).revalidate {
        revalidate(doc, model)?;
    }
    if flags(doc, model).refresh {
        refresh(doc, model)?;
    }
    Ok(true)
}

// =============================================================================
// Deferred update
// =============================================================================

pub fn rebuild(doc: &mut FormDocument, model: NodeId) -> Result<(), FatalError> {
    let mut iterations = 0;
    while flags(doc, model).rebuild {
        tick(doc, model, "rebuild", &mut iterations)?;
        tracing::debug!(model, iteration = iterations, "rebuild");
        update_flags(doc, model, |f| {
            f.rebuild = false;
            f.recalculate = true;
        });
    }
    Ok(())
}

/// Apply queued mutations, then evaluate every bind of the model
pub fn recalculate(doc: &mut FormDocument, model: NodeId) -> Result<(), FatalError> {
    let mut iterations = 0;
    while flags(doc, model).recalculate {
        tick(doc, model, "recalculate", &mut iterations)?;
        tracing::debug!(model, iteration = iterations, "recalculate");
        update_flags(doc, model, |f| f.recalculate = false);
        apply_mutations(doc, model);
        apply_binds(doc, model);
        update_flags(doc, model, |f| {
            f.revalidate = true;
            f.refresh = true;
        });
    }
    Ok(())
}

fn in_model(doc: &FormDocument, roots: &[NodeId], node: NodeId) -> bool {
    roots.contains(&doc.xml.root_of(node))
}

/// Write queued clear, contents and value requests into the instance trees
fn apply_mutations(doc: &mut FormDocument, model: NodeId) {
    let roots = doc.model_roots(model);
    let pending: Vec<NodeId> = doc
        .items
        .iter()
        .filter(|(n, s)| s.has_mutation() && in_model(doc, &roots, *n))
        .map(|(n, _)| n)
        .collect();

    let mut detached_any = false;
    for node in pending {
        let state = doc.items.entry(node);
        let clear = std::mem::take(&mut state.clear);
        let contents = state.new_contents.take();
        let value = state.new_value.take();
        if !doc.xml.is_attached(node) {
            continue;
        }
        let structural = clear || contents.is_some();
        detached_any |= structural;

        if clear {
            if doc.xml.kind(node) == Some(NodeKind::Element) {
                doc.xml.remove_children(node);
            } else if let Err(err) = doc.xml.set_text(node, "") {
                tracing::warn!(node, error = %err, "cannot clear node");
            }
        }
        if let Some(text) = contents {
            match doc.xml.parse_fragment(Some(node), &text) {
                Ok(children) => {
                    doc.xml.remove_children(node);
                    for child in children {
                        if let Err(err) = doc.xml.append_child(node, child) {
                            tracing::warn!(node, error = %err, "cannot insert contents");
                        }
                    }
                }
                Err(err) => tracing::warn!(node, error = %err, "replacement contents are not well-formed"),
            }
        }
        if let Some(value) = value {
            if let Err(err) = doc.xml.set_text(node, &value) {
                tracing::warn!(node, error = %err, "cannot set value");
            }
        }

        tracing::trace!(node, "value changed");
        doc.items.entry(node).pending.value_changed = true;
        update_flags(doc, model, |f| {
            f.revalidate = true;
            f.refresh = true;
            f.rebuild |= structural;
        });
    }
    if detached_any {
        doc.items.prune(&doc.xml);
    }
}

/// Properties one bind computed for one node
#[derive(Debug, Default)]
struct BindResult {
    node: NodeId,
    item_type: Option<ItemType>,
    read_only: Option<bool>,
    required: Option<bool>,
    relevant: Option<bool>,
    constraint: Option<bool>,
    calculate: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Inherited {
    relevant: bool,
    read_only: bool,
    required: bool,
}

fn inherited(doc: &FormDocument, node: NodeId) -> Inherited {
    Inherited {
        relevant: doc.items.is_relevant(&doc.xml, node),
        read_only: doc.items.is_read_only(&doc.xml, node),
        required: doc.items.is_required(node),
    }
}

/// Bind elements of `model` in document order
fn binds_of(doc: &FormDocument, model: NodeId) -> Vec<NodeId> {
    doc.elements_of_kind(ElementKind::Bind)
        .into_iter()
        .filter(|&b| doc.enclosing_model(b) == Some(model))
        .collect()
}

/// Evaluate every bind's node-set and property expressions
///
/// Nested binds are evaluated once per node of their parent bind.
fn evaluate_binds(doc: &FormDocument, model: NodeId) -> (Vec<(NodeId, Binding)>, Vec<BindResult>) {
    let mut bindings: Vec<(NodeId, Binding)> = Vec::new();
    let mut selected: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut results = Vec::new();

    for bind in binds_of(doc, model) {
        let parent = doc.xml.parent_of(bind).filter(|&p| doc.kind_of(p) == Some(ElementKind::Bind));
        let (expression, context, mut nodes) = match parent {
            None if doc.xml.attribute(bind, "nodeset").is_some() => {
                match resolve_node_set_binding(doc, bind) {
                    Ok(Some(binding)) => (binding.expression, binding.context, binding.nodes),
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(bind, error = %err, "bind not evaluated");
                        continue;
                    }
                }
            }
            _ => {
                let contexts: Vec<EvaluationContext> = match parent {
                    Some(parent) => {
                        let nodes = selected.get(&parent).cloned().unwrap_or_default();
                        let size = nodes.len();
                        nodes
                            .iter()
                            .enumerate()
                            .filter_map(|(i, &n)| doc.context_for_node(n, i + 1, size))
                            .collect()
                    }
                    None => doc.default_context(model).into_iter().collect(),
                };
                let Some(expression) = doc
                    .xml
                    .attribute(bind, "nodeset")
                    .or_else(|| doc.xml.attribute(bind, "ref"))
                else {
                    continue;
                };
                let mut nodes = Vec::new();
                for ctx in &contexts {
                    if let Some(value) = doc.evaluate_or_warn(ctx, bind, expression) {
                        nodes.extend(value.into_nodeset().unwrap_or_default());
                    }
                }
                (expression.to_string(), contexts.first().copied(), nodes)
            }
        };
        nodes.retain(|&n| doc.instance_for_node(n).is_some());
        nodes.sort_by_key(|&n| doc.xml.order_key(n));
        nodes.dedup();

        let size = nodes.len();
        for (i, &node) in nodes.iter().enumerate() {
            let Some(ctx) = doc.context_for_node(node, i + 1, size) else {
                continue;
            };
            let boolean = |name: &str| {
                doc.xml
                    .attribute(bind, name)
                    .map(|expr| doc.evaluate_boolean(&ctx, bind, expr))
            };
            results.push(BindResult {
                node,
                item_type: doc.xml.attribute(bind, "type").and_then(|t| resolve_type(doc, bind, t)),
                read_only: boolean("readonly"),
                required: boolean("required"),
                relevant: boolean("relevant"),
                constraint: boolean("constraint"),
                calculate: doc
                    .xml
                    .attribute(bind, "calculate")
                    .map(|expr| doc.evaluate_string(&ctx, bind, expr)),
            });
        }

        bindings.push((
            bind,
            Binding {
                expression,
                context,
                nodes: nodes.clone(),
            },
        ));
        selected.insert(bind, nodes);
    }
    (bindings, results)
}

/// Expand a `type` QName against the bind's namespace declarations
///
/// Unprefixed names use the default namespace, or XML Schema when none is declared.
fn resolve_type(doc: &FormDocument, bind: NodeId, qname: &str) -> Option<ItemType> {
    let (prefix, local) = split_qname(qname.trim());
    let namespace = match doc.xml.lookup_namespace(bind, prefix) {
        Some(uri) => uri.to_string(),
        None if prefix.is_empty() => ns::XSD.to_string(),
        None => {
            tracing::warn!(element = bind, qname, "type prefix is not declared");
            return None;
        }
    };
    Some(ItemType::new(namespace, local))
}

/// Store bind bindings without touching model item properties
pub fn restore_bind_bindings(doc: &mut FormDocument, model: NodeId) {
    let (bindings, _) = evaluate_binds(doc, model);
    store_bindings(doc, bindings);
}

fn store_bindings(doc: &mut FormDocument, bindings: Vec<(NodeId, Binding)>) {
    for (bind, binding) in bindings {
        if let Some(behavior) = doc.behaviors.get_mut(&bind) {
            behavior.binding = Some(binding);
        }
    }
}

/// Recompute every bind property and queue the resulting transitions
fn apply_binds(doc: &mut FormDocument, model: NodeId) {
    let roots = doc.model_roots(model);
    let nodes: Vec<NodeId> = roots.iter().flat_map(|&r| item_nodes(&doc.xml, r)).collect();
    let before: Vec<Inherited> = nodes.iter().map(|&n| inherited(doc, n)).collect();

    for &node in &nodes {
        if doc.items.get(node).is_some() {
            doc.items.entry(node).reset_properties();
        }
    }

    let (bindings, results) = evaluate_binds(doc, model);
    store_bindings(doc, bindings);

    let mut calculated = Vec::new();
    for result in results {
        let state = doc.items.entry(result.node);
        if result.item_type.is_some() {
            state.item_type = result.item_type;
        }
        if result.read_only.is_some() {
            state.read_only = result.read_only;
        }
        if result.required.is_some() {
            state.required = result.required;
        }
        if result.relevant.is_some() {
            state.relevant = result.relevant;
        }
        if result.constraint.is_some() {
            state.constraint = result.constraint;
        }
        if let Some(value) = result.calculate {
            state.calculated = true;
            calculated.push((result.node, value));
        }
    }

    for (node, value) in calculated {
        if doc.items.value(&doc.xml, node).as_deref() != Some(value.as_str()) {
            doc.queue_new_value(node, &value);
        }
    }

    for (node, old) in nodes.into_iter().zip(before) {
        let new = inherited(doc, node);
        if new == old {
            continue;
        }
        tracing::trace!(node, relevant = new.relevant, read_only = new.read_only, required = new.required, "model item properties changed");
        let pending = &mut doc.items.entry(node).pending;
        if new.relevant != old.relevant {
            PendingNotifications::transition(&mut pending.relevant, new.relevant);
        }
        if new.read_only != old.read_only {
            PendingNotifications::transition(&mut pending.read_only, new.read_only);
        }
        if new.required != old.required {
            PendingNotifications::transition(&mut pending.required, new.required);
        }
    }
}

/// Recompute validity of every node of the model
pub fn revalidate(doc: &mut FormDocument, model: NodeId) -> Result<(), FatalError> {
    let mut iterations = 0;
    while flags(doc, model).revalidate {
        tick(doc, model, "revalidate", &mut iterations)?;
        tracing::debug!(model, iteration = iterations, "revalidate");
        update_flags(doc, model, |f| f.revalidate = false);

        let roots = doc.model_roots(model);
        let nodes: Vec<NodeId> = roots.iter().flat_map(|&r| item_nodes(&doc.xml, r)).collect();
        for node in nodes {
            let valid = compute_validity(doc, node);
            if valid == doc.items.is_valid(node) {
                continue;
            }
            tracing::trace!(node, valid, "validity changed");
            let state = doc.items.entry(node);
            state.valid = if valid { None } else { Some(false) };
            PendingNotifications::transition(&mut state.pending.valid, valid);
        }
        update_flags(doc, model, |f| f.refresh = true);
    }
    Ok(())
}

/// `(required implies non-empty) and constraint and type`, for one node
pub fn compute_validity(doc: &FormDocument, node: NodeId) -> bool {
    let items = &doc.items;
    let value = items.value(&doc.xml, node);
    let empty = value.as_deref().is_some_and(|v| v.trim().is_empty());
    if items.is_required(node) && empty {
        return false;
    }
    if !items.constraint(node) {
        return false;
    }
    if doc.config.validate_types {
        if let Some(value) = &value {
            return datatypes::is_valid(&items.item_type(node), value);
        }
    }
    true
}

/// Refresh bindings, run hooks, then deliver this model's notifications
pub fn refresh(doc: &mut FormDocument, model: NodeId) -> Result<(), FatalError> {
    let mut iterations = 0;
    while flags(doc, model).refresh {
        tick(doc, model, "refresh", &mut iterations)?;
        tracing::debug!(model, iteration = iterations, "refresh");
        update_flags(doc, model, |f| f.refresh = false);
        super::binding::refresh_bindings(doc);
        if !doc.host.refresh_hooks.is_empty() {
            for control in doc.elements_where(ElementKind::is_ui_bound) {
                if let Some(view) = doc.control_view(control) {
                    for hook in &doc.host.refresh_hooks {
                        hook.refresh(&view);
                    }
                }
            }
        }
    }
    deliver_notifications(doc, model);
    clear_pending(doc, model);
    Ok(())
}

/// Dispatch pending item notifications to the controls bound to them
fn deliver_notifications(doc: &mut FormDocument, model: NodeId) {
    let roots = doc.model_roots(model);
    for control in doc.elements_where(ElementKind::is_control) {
        let Some(node) = doc.binding_of(control).and_then(Binding::first) else {
            continue;
        };
        if !in_model(doc, &roots, node) {
            continue;
        }
        let Some(pending) = doc.items.get(node).map(|s| s.pending) else {
            continue;
        };
        if pending.value_changed {
            doc.notify(names::VALUE_CHANGED, control);
        }
        let pairs = [
            (pending.valid, names::VALID, names::INVALID),
            (pending.read_only, names::READONLY, names::READWRITE),
            (pending.required, names::REQUIRED, names::OPTIONAL),
            (pending.relevant, names::ENABLED, names::DISABLED),
        ];
        for (slot, on, off) in pairs {
            match slot {
                Some(true) => doc.notify(on, control),
                Some(false) => doc.notify(off, control),
                None => {}
            }
        }
    }
}

fn clear_pending(doc: &mut FormDocument, model: NodeId) {
    let roots = doc.model_roots(model);
    let xml = &doc.xml;
    for (node, state) in doc.items.iter_mut() {
        if roots.contains(&xml.root_of(node)) {
            state.pending = PendingNotifications::default();
        }
    }
}
