//! Evaluation context

use serde::{Deserialize, Serialize};

use crate::dom::{NodeId, XmlDocument};

/// Where an expression is evaluated: model, instance, node, position and size
///
/// `model` and `instance` are element ids of the `model` and `instance`
/// elements in the host tree; `node` lives in the instance's own tree.
/// Position and size are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub model: NodeId,
    pub instance: NodeId,
    pub node: NodeId,
    pub position: usize,
    pub size: usize,
}

impl EvaluationContext {
    pub fn new(model: NodeId, instance: NodeId, node: NodeId) -> Self {
        EvaluationContext {
            model,
            instance,
            node,
            position: 1,
            size: 1,
        }
    }

    /// A context is usable only while its node is attached
    pub fn is_valid(&self, xml: &XmlDocument) -> bool {
        xml.is_attached(self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_context_is_invalid() {
        let mut xml = XmlDocument::parse("<a><b/></a>").unwrap();
        let root = xml.roots()[0];
        let a = xml.document_element(root).unwrap();
        let b = xml.child_elements(a).next().unwrap();

        let ctx = EvaluationContext {
            position: 2,
            size: 3,
            ..EvaluationContext::new(0, 0, b)
        };
        assert_eq!((ctx.position, ctx.size, ctx.node), (2, 3, b));
        assert!(EvaluationContext::new(0, 0, a).is_valid(&xml));
        assert!(ctx.is_valid(&xml));
        xml.detach(b);
        assert!(!ctx.is_valid(&xml));
    }
}
