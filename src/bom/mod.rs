use chrono::NaiveDate;
use serde::Serialize;

pub mod resolver;

pub use resolver::{direct_components, resolve};

/// One item in a resolved BOM hierarchy.
///
/// Built by the resolver for the duration of one resolution and immutable
/// afterwards; quantity and dates come from the parent → component relation,
/// name and spec text from the item master.
#[derive(Debug, Clone, Serialize)]
pub struct BomNode {
    pub item_code: String,
    pub item_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_text: Option<String>,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub characteristic_code: Option<String>,
    pub children: Vec<BomNode>,
}

impl BomNode {
    /// Total node count including this node.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(BomNode::node_count).sum::<usize>()
    }

    /// Depth of the tree rooted here (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(BomNode::depth)
            .max()
            .unwrap_or(0)
    }
}
