//! Binary space index over the stored entries.
//!
//! Internal nodes cut the space with the hyperplane `v . x = a`; a query goes
//! right iff `v . q > a`. Leaves are stored entries. Nodes and entries live in
//! generational arenas so parents and the MRU list refer to them by handle.
pub mod binary_tree;
pub mod node;

use serde::{Deserialize, Serialize};

use crate::storage::{EntryId, NodeId};

pub use binary_tree::BinaryTree;
pub use node::BinaryNode;

/// A child of a node, or the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot
{
    Leaf(EntryId),
    Node(NodeId),
}
