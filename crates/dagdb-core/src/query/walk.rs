//! Depth-first search and rewrite over plan subtrees.
//!
//! Both walkers visit a node before its sub-plans and sub-plans in
//! [`PlanNode::children`] order, primary input first, so the first match is
//! the one closest to the root along the primary inputs.

use super::node::{NodeKind, PlanNode};

/// Find the first node of `kind` within `node`, including `node` itself.
pub fn find(node: &PlanNode, kind: NodeKind) -> Option<&PlanNode> {
    if node.kind() == kind {
        return Some(node);
    }
    node.children()
        .into_iter()
        .find_map(|child| find(child, kind))
}

/// Mutable variant of [`find`].
pub fn find_mut(node: &mut PlanNode, kind: NodeKind) -> Option<&mut PlanNode> {
    if node.kind() == kind {
        return Some(node);
    }
    node.children_mut()
        .into_iter()
        .find_map(|child| find_mut(child, kind))
}

/// Replace the first node of `kind` within `node` by `with`.
///
/// Returns the node that was taken out of the tree. When nothing matched the
/// tree is untouched and `with` is handed back as the error.
pub fn replace_first(
    node: &mut PlanNode,
    kind: NodeKind,
    with: PlanNode,
) -> Result<PlanNode, PlanNode> {
    if node.kind() == kind {
        return Ok(std::mem::replace(node, with));
    }
    let mut with = with;
    for child in node.children_mut() {
        match replace_first(child, kind, with) {
            Ok(taken) => return Ok(taken),
            Err(back) => with = back,
        }
    }
    Err(with)
}
