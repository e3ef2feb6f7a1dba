//! Persisted engine state
//!
//! Saving renumbers every tree with [`XmlDocument::compact`] and records
//! trees in root order. Restoring parses them back in that order, which
//! allocates the same ids, so annotations can be keyed by plain node id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::document::{FormDocument, HostServices};
use crate::config::EngineConfig;
use crate::dom::{NodeId, XmlDocument};
use crate::error::{EngineError, FatalError, Result};
use crate::xforms::binding;
use crate::xforms::item::{ItemTable, ModelItemState};
use crate::xforms::model::{self, DeferredFlags, ModelStage};

/// Everything needed to rebuild a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub configuration: EngineConfig,
    /// Serialized host document
    pub document: String,
    /// Instance trees in allocation order
    pub instances: Vec<InstanceSnapshot>,
    pub next_element_id: u32,
    pub annotations: AnnotationTable,
}

/// One instance element and its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    /// Canonical node id of the `instance` element
    pub element: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub next_item: u32,
    /// Serialized data; absent for an instance that never loaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAnnotation {
    pub stage: ModelStage,
    #[serde(default)]
    pub flags: DeferredFlags,
}

/// Non-default model item states and model lifecycle, by canonical id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationTable {
    pub items: BTreeMap<NodeId, ModelItemState>,
    pub models: BTreeMap<NodeId, ModelAnnotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FatalError>,
}

fn state_error(message: impl Into<String>) -> EngineError {
    EngineError::State(message.into())
}

impl EngineState {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| state_error(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| state_error(e.to_string()))
    }

    pub(crate) fn capture(doc: &FormDocument) -> Self {
        let (compacted, remap) = doc.xml.compact();
        let canonical = |id: NodeId| remap.get(id as usize).copied().flatten();

        let document = canonical(doc.host_root)
            .and_then(|root| compacted.serialize(root).ok())
            .unwrap_or_default();

        let mut instances: Vec<(Option<NodeId>, InstanceSnapshot)> = doc
            .instances
            .iter()
            .filter_map(|instance| {
                let element = canonical(instance.element)?;
                let root = instance.root.and_then(canonical);
                Some((
                    root,
                    InstanceSnapshot {
                        element,
                        id: doc.xml.attribute(instance.element, "id").map(str::to_string),
                        next_item: instance.next_item,
                        data: root.and_then(|r| compacted.serialize(r).ok()),
                    },
                ))
            })
            .collect();
        // loaded trees first, in the order their ids were allocated
        instances.sort_by_key(|(root, _)| root.map_or(NodeId::MAX, |r| r));

        let items = doc
            .items
            .to_map()
            .into_iter()
            .filter_map(|(node, state)| Some((canonical(node)?, state)))
            .collect();
        let models = doc
            .models
            .iter()
            .filter_map(|m| {
                let annotation = ModelAnnotation {
                    stage: m.stage,
                    flags: m.flags,
                };
                Some((canonical(m.element)?, annotation))
            })
            .collect();

        EngineState {
            configuration: doc.config.clone(),
            document,
            instances: instances.into_iter().map(|(_, snapshot)| snapshot).collect(),
            next_element_id: doc.next_element_id,
            annotations: AnnotationTable {
                items,
                models,
                failure: doc.failure.clone(),
            },
        }
    }

    pub(crate) fn into_document(self, host: HostServices) -> Result<FormDocument> {
        let mut xml = XmlDocument::parse(&self.document)?;
        let mut roots = Vec::with_capacity(self.instances.len());
        for snapshot in &self.instances {
            let root = match &snapshot.data {
                Some(data) => Some(xml.parse_tree(data)?),
                None => None,
            };
            roots.push(root);
        }

        let mut doc = FormDocument::new(self.configuration, xml, host);
        doc.next_element_id = self.next_element_id;
        doc.scan();
        doc.pending_sweep = false;

        for (snapshot, root) in self.instances.iter().zip(roots) {
            let index = doc
                .instance_index(snapshot.element)
                .ok_or_else(|| state_error(format!("node {} is not an instance", snapshot.element)))?;
            doc.instances[index].root = root;
            doc.instances[index].next_item = snapshot.next_item;
        }
        for (element, annotation) in &self.annotations.models {
            let index = doc
                .model_index(*element)
                .ok_or_else(|| state_error(format!("node {element} is not a model")))?;
            doc.models[index].stage = annotation.stage;
            doc.models[index].flags = annotation.flags;
        }
        doc.items = ItemTable::from_map(self.annotations.items);
        doc.failure = self.annotations.failure;

        let constructed: Vec<NodeId> = doc
            .models
            .iter()
            .filter(|m| m.stage >= ModelStage::ConstructDone)
            .map(|m| m.element)
            .collect();
        for m in constructed {
            model::restore_bind_bindings(&mut doc, m);
        }
        binding::refresh_bindings(&mut doc);
        tracing::debug!(
            instances = doc.instances.len(),
            items = doc.items.len(),
            "state restored"
        );
        Ok(doc)
    }
}
