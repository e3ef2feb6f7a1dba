//! Document engine
//!
//! [`Engine`] owns a [`FormDocument`] and the modules that advance it.
//! `invoke` runs every module in registration order and repeats the pass
//! until no module reports work. Host calls that change data only queue the
//! change; the next `invoke` applies it. `submit` and `invoke_action` invoke
//! on their own.

mod document;
mod state;

use std::rc::Rc;

use serde::Serialize;

pub use document::{Behavior, FormDocument};
pub(crate) use document::HostServices;
pub use state::{AnnotationTable, EngineState, InstanceSnapshot, ModelAnnotation};

use crate::config::EngineConfig;
use crate::dom::{DocumentAccess, NodeId, NodeKind, XmlDocument};
use crate::error::{EngineError, FatalError, Result, SubmitError};
use crate::host::{
    RefreshHook, ResolverProcessor, ResourceResolver, SerializeHook, SubmissionProcessor,
};
use crate::xforms::events::NotificationSink;
use crate::xforms::item::{ItemType, ModelItemView};
use crate::xforms::model::ModelStage;
use crate::xforms::registry::ElementKind;
use crate::xforms::submission::SubmitOutcome;
use crate::xforms::{actions, binding, model, submission};
use crate::xpath::FunctionResolver;

/// A unit of processing driven by [`Engine::invoke`]
pub trait Module {
    fn name(&self) -> &'static str;

    /// Do any outstanding work; `Ok(true)` asks for another pass
    fn invoke(&mut self, doc: &mut FormDocument) -> std::result::Result<bool, FatalError>;
}

/// Model lifecycle and deferred updates
#[derive(Debug, Default)]
pub struct XFormsModule;

impl Module for XFormsModule {
    fn name(&self) -> &'static str {
        "xforms"
    }

    fn invoke(&mut self, doc: &mut FormDocument) -> std::result::Result<bool, FatalError> {
        let mut worked = false;
        if doc.structure_changed {
            doc.structure_changed = false;
            doc.scan();
            worked = true;
        }

        for m in models_at(doc, ModelStage::Unconstructed) {
            model::construct(doc, m)?;
            worked = true;
        }
        for m in models_at(doc, ModelStage::Constructed) {
            model::construct_done(doc, m);
            worked = true;
        }
        for m in models_at(doc, ModelStage::ConstructDone) {
            model::ready(doc, m);
            worked = true;
        }

        if doc.pending_sweep {
            doc.pending_sweep = false;
            binding::refresh_bindings(doc);
        }
        for m in models_at(doc, ModelStage::Ready) {
            worked |= model::run_deferred(doc, m)?;
        }
        Ok(worked)
    }
}

fn models_at(doc: &FormDocument, stage: ModelStage) -> Vec<NodeId> {
    doc.models
        .iter()
        .filter(|m| m.stage == stage)
        .map(|m| m.element)
        .collect()
}

/// Runs handlers queued by notification dispatch
#[derive(Debug, Default)]
pub struct EventsModule;

impl Module for EventsModule {
    fn name(&self) -> &'static str {
        "events"
    }

    fn invoke(&mut self, doc: &mut FormDocument) -> std::result::Result<bool, FatalError> {
        // handlers queued while draining wait for the next pass
        let queued = doc.action_queue.len();
        for _ in 0..queued {
            let Some(handler) = doc.action_queue.pop_front() else {
                break;
            };
            actions::run_handler(doc, handler)?;
        }
        Ok(queued > 0)
    }
}

/// Host-facing state of a control or group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlView {
    pub element: NodeId,
    pub id: Option<String>,
    pub kind: ElementKind,
    /// First bound node, if any
    pub node: Option<NodeId>,
    pub value: Option<String>,
    pub item_type: ItemType,
    pub read_only: bool,
    pub required: bool,
    pub relevant: bool,
    pub valid: bool,
}

/// Collects configuration and collaborators, then loads a document
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    host: HostServices,
    modules: Vec<Box<dyn Module>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver for instance `src`; also answers `get` submissions
    pub fn resolver(mut self, resolver: Rc<dyn ResourceResolver>) -> Self {
        self.host.resolver = Some(resolver);
        self
    }

    pub fn processor(mut self, processor: impl SubmissionProcessor + 'static) -> Self {
        self.host.processors.push(Box::new(processor));
        self
    }

    /// Extension functions consulted after the XForms library
    pub fn functions(mut self, functions: impl FunctionResolver + 'static) -> Self {
        self.host.functions = Some(Box::new(functions));
        self
    }

    pub fn sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.host.sink = Some(Box::new(sink));
        self
    }

    pub fn serialize_hook(mut self, hook: impl SerializeHook + 'static) -> Self {
        self.host.serialize_hook = Some(Box::new(hook));
        self
    }

    pub fn refresh_hook(mut self, hook: impl RefreshHook + 'static) -> Self {
        self.host.refresh_hooks.push(Box::new(hook));
        self
    }

    /// Extra module, run after the built-in ones
    pub fn module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    /// Parse `xml` and run the first invoke
    ///
    /// A fatal error during loading does not fail the call; the returned
    /// engine is in the failed state instead.
    pub fn load(self, xml: &str) -> Result<Engine> {
        let parsed = XmlDocument::parse(xml)?;
        let (config, host, modules) = self.into_parts();
        let mut doc = FormDocument::new(config, parsed, host);
        doc.scan();
        let mut engine = Engine::from_parts(doc, modules);
        match engine.invoke() {
            Ok(()) | Err(EngineError::Fatal(_)) => Ok(engine),
            Err(err) => Err(err),
        }
    }

    fn into_parts(self) -> (EngineConfig, HostServices, Vec<Box<dyn Module>>) {
        let mut host = self.host;
        if let Some(resolver) = &host.resolver {
            host.processors.push(Box::new(ResolverProcessor::new(resolver.clone())));
        }
        (self.config, host, self.modules)
    }
}

/// A loaded form and its modules
pub struct Engine {
    doc: FormDocument,
    modules: Vec<Box<dyn Module>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.modules.iter().map(|m| m.name()).collect();
        f.debug_struct("Engine")
            .field("doc", &self.doc)
            .field("modules", &names)
            .finish()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn from_parts(doc: FormDocument, extra: Vec<Box<dyn Module>>) -> Self {
        let mut modules: Vec<Box<dyn Module>> = vec![Box::new(XFormsModule), Box::new(EventsModule)];
        modules.extend(extra);
        Engine { doc, modules }
    }

    pub fn document(&self) -> &FormDocument {
        &self.doc
    }

    pub fn is_failed(&self) -> bool {
        self.doc.is_failed()
    }

    pub fn failure(&self) -> Option<&FatalError> {
        self.doc.failure()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.doc.is_failed() {
            return Err(EngineError::Failed);
        }
        Ok(())
    }

    /// Run module passes until none reports work
    ///
    /// A no-op on a failed document. Returns the fatal error on the pass
    /// that fails.
    pub fn invoke(&mut self) -> Result<()> {
        if self.doc.is_failed() {
            return Ok(());
        }
        let ceiling = self.doc.config.max_invoke_passes;
        let mut passes = 0;
        loop {
            passes += 1;
            if passes > ceiling {
                let error = FatalError::NonConvergent {
                    phase: "invoke".to_string(),
                    iterations: ceiling,
                };
                return Err(self.doc.fail(error, None).into());
            }
            let mut worked = false;
            for module in &mut self.modules {
                let did = module.invoke(&mut self.doc)?;
                if let Some(failure) = self.doc.failure() {
                    return Err(failure.clone().into());
                }
                if did {
                    tracing::trace!(module = module.name(), pass = passes, "module did work");
                }
                worked |= did;
            }
            if !worked {
                tracing::debug!(passes, "invoke settled");
                return Ok(());
            }
        }
    }

    // =========================================================================
    // Controls and items
    // =========================================================================

    /// Every control and group in document order
    pub fn controls(&self) -> Vec<ControlView> {
        self.doc
            .elements_where(ElementKind::is_ui_bound)
            .into_iter()
            .filter_map(|e| self.doc.control_view(e))
            .collect()
    }

    pub fn control(&self, element: NodeId) -> Option<ControlView> {
        self.doc.control_view(element)
    }

    /// Queue a value through a control; read-only or unbound controls refuse it
    pub fn set_value(&mut self, control: NodeId, value: &str) -> Result<bool> {
        self.ensure_live()?;
        let view = self
            .doc
            .control_view(control)
            .ok_or_else(|| EngineError::UnknownElement(control.to_string()))?;
        let Some(node) = view.node else {
            return Ok(false);
        };
        if view.read_only {
            tracing::debug!(element = control, "control is read-only; value refused");
            return Ok(false);
        }
        Ok(self.doc.set_item_value(node, value))
    }

    fn instance_node(&self, node: NodeId) -> Result<()> {
        if self.doc.instance_for_node(node).is_none() || !self.doc.xml.is_attached(node) {
            return Err(EngineError::UnknownElement(node.to_string()));
        }
        Ok(())
    }

    /// Queue a new value for an instance node
    pub fn set_item_value(&mut self, node: NodeId, value: &str) -> Result<bool> {
        self.ensure_live()?;
        self.instance_node(node)?;
        Ok(self.doc.set_item_value(node, value))
    }

    /// Queue replacement of an instance element's children with parsed `xml`
    pub fn replace_contents(&mut self, node: NodeId, xml: &str) -> Result<()> {
        self.ensure_live()?;
        self.instance_node(node)?;
        if self.doc.xml.kind(node) != Some(NodeKind::Element) {
            return Err(crate::dom::DomError::NotAnElement(node).into());
        }
        self.doc.queue_new_contents(node, xml);
        Ok(())
    }

    pub fn clear_item(&mut self, node: NodeId) -> Result<()> {
        self.ensure_live()?;
        self.instance_node(node)?;
        self.doc.queue_clear(node);
        Ok(())
    }

    pub fn model_item(&mut self, node: NodeId) -> Option<ModelItemView> {
        self.doc.model_item(node)
    }

    /// Append parsed `xml` to a host element; the next invoke rescans
    pub fn insert_content(&mut self, parent: NodeId, xml: &str) -> Result<Vec<NodeId>> {
        self.ensure_live()?;
        let tree = &self.doc.xml;
        if !tree.is_attached(parent) || tree.root_of(parent) != self.doc.host_root {
            return Err(EngineError::UnknownElement(parent.to_string()));
        }
        let nodes = self.doc.xml.parse_fragment(Some(parent), xml)?;
        for &node in &nodes {
            self.doc.xml.append_child(parent, node)?;
        }
        self.doc.structure_changed = true;
        Ok(nodes)
    }

    // =========================================================================
    // Submissions and actions
    // =========================================================================

    /// Run a submission, then invoke
    pub fn submit(&mut self, element: NodeId) -> Result<SubmitOutcome> {
        self.ensure_live()?;
        if self.doc.kind_of(element) != Some(ElementKind::Submission) {
            return Err(EngineError::UnknownElement(element.to_string()));
        }
        let outcome = submission::submit(&mut self.doc, element);
        self.invoke()?;
        Ok(outcome?)
    }

    /// Bring the document up to date, then run every submission in document order
    pub fn submit_all(&mut self) -> Result<Vec<(NodeId, std::result::Result<SubmitOutcome, SubmitError>)>> {
        self.ensure_live()?;
        self.invoke()?;
        let mut results = Vec::new();
        for element in self.doc.elements_of_kind(ElementKind::Submission) {
            results.push((element, submission::submit(&mut self.doc, element)));
            if self.doc.is_failed() {
                break;
            }
        }
        self.invoke()?;
        Ok(results)
    }

    /// Run an action element, then invoke
    pub fn invoke_action(&mut self, element: NodeId) -> Result<()> {
        self.ensure_live()?;
        if !self.doc.kind_of(element).is_some_and(ElementKind::is_action) {
            return Err(EngineError::UnknownElement(element.to_string()));
        }
        actions::run_action(&mut self.doc, element)?;
        self.invoke()
    }

    // =========================================================================
    // Lookup and serialization
    // =========================================================================

    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.doc.element_by_id(id)
    }

    /// The element's id, assigning one when it has none
    pub fn element_id(&mut self, element: NodeId) -> Option<String> {
        self.doc.element_id(element)
    }

    /// Serialized data of the instance with the given element id
    pub fn serialize_instance(&self, id: &str) -> Result<String> {
        let root = self
            .doc
            .instances
            .iter()
            .find(|i| self.doc.xml.attribute(i.element, "id") == Some(id))
            .and_then(|i| i.root)
            .ok_or_else(|| EngineError::UnknownElement(id.to_string()))?;
        Ok(self.doc.xml.serialize(root)?)
    }

    pub fn serialize_document(&self) -> Result<String> {
        Ok(self.doc.xml.serialize(self.doc.host_root)?)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Snapshot the document in canonical numbering
    pub fn save(&self) -> EngineState {
        EngineState::capture(&self.doc)
    }

    /// Rebuild an engine from saved state
    ///
    /// The builder supplies collaborators and modules; its configuration is
    /// replaced by the saved one.
    pub fn restore(state: EngineState, builder: EngineBuilder) -> Result<Engine> {
        let (_, host, modules) = builder.into_parts();
        let doc = state.into_document(host)?;
        Ok(Engine::from_parts(doc, modules))
    }
}
