//! Recursive BOM hierarchy resolution.
//!
//! Resolution happens in two passes. An async BFS first loads every
//! reachable item and relation row into an in-memory snapshot, so one call
//! sees one point-in-time view of the store and the build pass needs no
//! further I/O. A synchronous walk over the snapshot then builds the tree,
//! carrying a visiting set for the current path (true cycles fail with the
//! offending path) and a memo of resolved child lists (diamond structures
//! are resolved once and reused, never rejected).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::bom::BomNode;
use crate::db::Db;
use crate::error::{BomGraphError, Result};
use crate::store::{self, ComponentRow, ItemRecord};

/// Sentinel for "no depth bound" in the memo key.
const UNBOUNDED: usize = usize::MAX;

/// Point-in-time view of the store for one resolution call.
struct Snapshot {
    items: HashMap<String, ItemRecord>,
    components: HashMap<String, Vec<ComponentRow>>,
}

/// Resolve the full hierarchy below `root_code`.
///
/// `max_depth` bounds the number of levels below the root; 0 means
/// unbounded (cycle-guarded). Fails with `ItemNotFound` when the root or a
/// referenced component is missing from the item master, and with
/// `CycleDetected` when the relation data loops back to an ancestor.
pub async fn resolve(db: &Db, root_code: &str, max_depth: usize) -> Result<BomNode> {
    let snapshot = load_snapshot(db, root_code, max_depth).await?;
    log::debug!(
        "Resolving {}: snapshot has {} items, {} parents with components",
        root_code,
        snapshot.items.len(),
        snapshot.components.len()
    );

    let remaining = if max_depth == 0 { UNBOUNDED } else { max_depth };
    let mut builder = TreeBuilder {
        snapshot: &snapshot,
        visiting: Vec::new(),
        visiting_set: HashSet::new(),
        memo: HashMap::new(),
    };
    builder.build_root(root_code, remaining)
}

/// Simple mode: the direct children of `root_code`, one level, no
/// recursion. A distinct cheap operation, not a truncated [`resolve`].
pub async fn direct_components(db: &Db, root_code: &str) -> Result<Vec<BomNode>> {
    if store::get_item(db, root_code).await?.is_none() {
        return Err(BomGraphError::ItemNotFound(root_code.to_string()));
    }

    let rows = store::get_direct_components(db, root_code).await?;
    let mut children = Vec::with_capacity(rows.len());
    for row in rows {
        let item = store::get_item(db, &row.component_code)
            .await?
            .ok_or_else(|| BomGraphError::ItemNotFound(row.component_code.clone()))?;
        children.push(leaf_node(&item, &row));
    }
    Ok(children)
}

/// BFS over the relation table, loading every item and component row
/// reachable from the root. A visited set keeps the load finite even when
/// the data contains cycles; the build pass is what rejects them.
async fn load_snapshot(db: &Db, root_code: &str, max_depth: usize) -> Result<Snapshot> {
    let root = store::get_item(db, root_code)
        .await?
        .ok_or_else(|| BomGraphError::ItemNotFound(root_code.to_string()))?;

    let mut items = HashMap::new();
    let mut components = HashMap::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();

    items.insert(root.item_code.clone(), root);
    visited.insert(root_code.to_string());
    queue.push_back((root_code.to_string(), 0usize));

    while let Some((code, depth)) = queue.pop_front() {
        if max_depth > 0 && depth >= max_depth {
            continue;
        }

        let rows = store::get_direct_components(db, &code).await?;
        for row in &rows {
            if visited.insert(row.component_code.clone()) {
                let item = store::get_item(db, &row.component_code)
                    .await?
                    .ok_or_else(|| BomGraphError::ItemNotFound(row.component_code.clone()))?;
                items.insert(item.item_code.clone(), item);
                queue.push_back((row.component_code.clone(), depth + 1));
            }
        }
        components.insert(code, rows);
    }

    Ok(Snapshot { items, components })
}

struct TreeBuilder<'a> {
    snapshot: &'a Snapshot,
    /// Current path, root first. Kept alongside the set so CycleDetected
    /// can report the actual loop.
    visiting: Vec<String>,
    visiting_set: HashSet<String>,
    /// Resolved child lists keyed by (item code, remaining depth). Keying
    /// by remaining depth keeps depth-bounded resolutions correct when the
    /// same subassembly is reached at different levels.
    memo: HashMap<(String, usize), Vec<BomNode>>,
}

impl TreeBuilder<'_> {
    fn build_root(&mut self, root_code: &str, remaining: usize) -> Result<BomNode> {
        let item = self.item(root_code)?.clone();
        let children = self.build_children(root_code, remaining)?;
        Ok(BomNode {
            item_code: item.item_code.clone(),
            item_name: item.item_name.clone(),
            spec_text: item.spec_text.clone(),
            quantity: 1.0,
            effective_date: None,
            expiry_date: None,
            characteristic_code: item.characteristic_code.clone(),
            children,
        })
    }

    fn build_children(&mut self, code: &str, remaining: usize) -> Result<Vec<BomNode>> {
        if remaining == 0 {
            return Ok(Vec::new());
        }
        let memo_key = (code.to_string(), remaining);
        if let Some(children) = self.memo.get(&memo_key) {
            return Ok(children.clone());
        }

        if !self.visiting_set.insert(code.to_string()) {
            return Err(self.cycle_error(code));
        }
        self.visiting.push(code.to_string());

        let next_remaining = if remaining == UNBOUNDED {
            UNBOUNDED
        } else {
            remaining - 1
        };

        let rows = self
            .snapshot
            .components
            .get(code)
            .cloned()
            .unwrap_or_default();
        let mut children = Vec::with_capacity(rows.len());
        for row in &rows {
            if self.visiting_set.contains(&row.component_code) {
                return Err(self.cycle_error(&row.component_code));
            }
            let item = self.item(&row.component_code)?.clone();
            let grandchildren = self.build_children(&row.component_code, next_remaining)?;
            let mut node = leaf_node(&item, row);
            node.children = grandchildren;
            children.push(node);
        }

        self.visiting.pop();
        self.visiting_set.remove(code);
        self.memo.insert(memo_key, children.clone());
        Ok(children)
    }

    fn item(&self, code: &str) -> Result<&ItemRecord> {
        self.snapshot
            .items
            .get(code)
            .ok_or_else(|| BomGraphError::ItemNotFound(code.to_string()))
    }

    /// Build the diagnostic path for a cycle closing at `repeat`: from the
    /// first occurrence of `repeat` on the current path back to itself.
    fn cycle_error(&self, repeat: &str) -> BomGraphError {
        let start = self
            .visiting
            .iter()
            .position(|c| c == repeat)
            .unwrap_or(0);
        let mut path: Vec<String> = self.visiting[start..].to_vec();
        path.push(repeat.to_string());
        BomGraphError::CycleDetected { path }
    }
}

fn leaf_node(item: &ItemRecord, row: &ComponentRow) -> BomNode {
    BomNode {
        item_code: item.item_code.clone(),
        item_name: item.item_name.clone(),
        spec_text: item.spec_text.clone(),
        quantity: row.quantity,
        effective_date: row.effective_date,
        expiry_date: row.expiry_date,
        characteristic_code: row.characteristic_code.clone().or_else(|| item.characteristic_code.clone()),
        children: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_db;
    use crate::store::{insert_component, upsert_item};

    async fn add_item(db: &Db, code: &str) {
        upsert_item(db, code, &format!("Item {}", code), None, None)
            .await
            .unwrap();
    }

    async fn add_edge(db: &Db, parent: &str, child: &str, qty: f64, seq: i64) {
        insert_component(db, parent, child, qty, None, None, None, seq)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_missing_root() {
        let (db, _temp) = test_db().await;
        let err = resolve(&db, "NOPE", 0).await.unwrap_err();
        assert!(matches!(err, BomGraphError::ItemNotFound(code) if code == "NOPE"));
    }

    #[tokio::test]
    async fn test_resolve_leaf_item() {
        let (db, _temp) = test_db().await;
        add_item(&db, "A").await;
        let tree = resolve(&db, "A", 0).await.unwrap();
        assert_eq!(tree.item_code, "A");
        assert_eq!(tree.quantity, 1.0);
        assert!(tree.children.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_two_levels_ordered() {
        let (db, _temp) = test_db().await;
        for code in ["A", "B", "C", "D"] {
            add_item(&db, code).await;
        }
        add_edge(&db, "A", "B", 2.0, 0).await;
        add_edge(&db, "A", "C", 1.0, 1).await;
        add_edge(&db, "B", "D", 4.0, 0).await;

        let tree = resolve(&db, "A", 0).await.unwrap();
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].item_code, "B");
        assert_eq!(tree.children[0].quantity, 2.0);
        assert_eq!(tree.children[1].item_code, "C");
        assert_eq!(tree.children[0].children[0].item_code, "D");
        assert_eq!(tree.node_count(), 4);
    }

    #[tokio::test]
    async fn test_resolve_detects_two_cycle() {
        let (db, _temp) = test_db().await;
        add_item(&db, "A").await;
        add_item(&db, "B").await;
        add_edge(&db, "A", "B", 1.0, 0).await;
        add_edge(&db, "B", "A", 1.0, 0).await;

        let err = resolve(&db, "A", 0).await.unwrap_err();
        match err {
            BomGraphError::CycleDetected { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"A".to_string()));
                assert!(path.contains(&"B".to_string()));
            }
            other => panic!("expected CycleDetected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_detects_self_reference() {
        let (db, _temp) = test_db().await;
        add_item(&db, "A").await;
        add_edge(&db, "A", "A", 1.0, 0).await;

        let err = resolve(&db, "A", 0).await.unwrap_err();
        assert!(matches!(err, BomGraphError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn test_resolve_diamond_is_legal() {
        // A -> B, A -> C, B -> D, C -> D: shared subassembly, not a cycle.
        let (db, _temp) = test_db().await;
        for code in ["A", "B", "C", "D"] {
            add_item(&db, code).await;
        }
        add_edge(&db, "A", "B", 1.0, 0).await;
        add_edge(&db, "A", "C", 1.0, 1).await;
        add_edge(&db, "B", "D", 1.0, 0).await;
        add_edge(&db, "C", "D", 3.0, 0).await;

        let tree = resolve(&db, "A", 0).await.unwrap();
        // D appears once per parent path
        assert_eq!(tree.children[0].children[0].item_code, "D");
        assert_eq!(tree.children[1].children[0].item_code, "D");
        assert_eq!(tree.children[1].children[0].quantity, 3.0);
        assert_eq!(tree.node_count(), 5);
    }

    #[tokio::test]
    async fn test_resolve_deep_cycle_reports_loop_only() {
        // A -> B -> C -> B: reported path starts and ends at B, not A.
        let (db, _temp) = test_db().await;
        for code in ["A", "B", "C"] {
            add_item(&db, code).await;
        }
        add_edge(&db, "A", "B", 1.0, 0).await;
        add_edge(&db, "B", "C", 1.0, 0).await;
        add_edge(&db, "C", "B", 1.0, 0).await;

        let err = resolve(&db, "A", 0).await.unwrap_err();
        match err {
            BomGraphError::CycleDetected { path } => {
                assert_eq!(path, vec!["B", "C", "B"]);
            }
            other => panic!("expected CycleDetected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_depth_bound() {
        let (db, _temp) = test_db().await;
        for code in ["A", "B", "C"] {
            add_item(&db, code).await;
        }
        add_edge(&db, "A", "B", 1.0, 0).await;
        add_edge(&db, "B", "C", 1.0, 0).await;

        let tree = resolve(&db, "A", 1).await.unwrap();
        assert_eq!(tree.children.len(), 1);
        assert!(tree.children[0].children.is_empty());

        let full = resolve(&db, "A", 0).await.unwrap();
        assert_eq!(full.depth(), 3);
    }

    #[tokio::test]
    async fn test_resolve_dangling_component_is_not_found() {
        let (db, _temp) = test_db().await;
        add_item(&db, "A").await;
        add_edge(&db, "A", "GHOST", 1.0, 0).await;

        let err = resolve(&db, "A", 0).await.unwrap_err();
        assert!(matches!(err, BomGraphError::ItemNotFound(code) if code == "GHOST"));
    }

    #[tokio::test]
    async fn test_direct_components_no_recursion() {
        let (db, _temp) = test_db().await;
        for code in ["A", "B", "C"] {
            add_item(&db, code).await;
        }
        add_edge(&db, "A", "B", 2.0, 0).await;
        add_edge(&db, "B", "C", 1.0, 0).await;

        let children = direct_components(&db, "A").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].item_code, "B");
        assert!(children[0].children.is_empty());
    }

    #[tokio::test]
    async fn test_direct_components_missing_root() {
        let (db, _temp) = test_db().await;
        let err = direct_components(&db, "NOPE").await.unwrap_err();
        assert!(matches!(err, BomGraphError::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn test_direct_components_even_with_cyclic_data() {
        // Simple mode never recurses, so cyclic data is fine.
        let (db, _temp) = test_db().await;
        add_item(&db, "A").await;
        add_item(&db, "B").await;
        add_edge(&db, "A", "B", 1.0, 0).await;
        add_edge(&db, "B", "A", 1.0, 0).await;

        let children = direct_components(&db, "A").await.unwrap();
        assert_eq!(children.len(), 1);
    }
}
