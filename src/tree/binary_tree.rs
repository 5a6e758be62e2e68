use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::entry::{RegionContext, StoredEntry};
use crate::storage::{Arena, EntryId, NodeId};
use crate::tree::node::BinaryNode;
use crate::tree::Slot;

///
/// Binary tree owning the stored entries (its leaves) and the internal nodes.
///
/// Every entry's own input descends to its own leaf: insertion places the new
/// entry next to the leaf its input reaches, deletion only removes hyperplane
/// tests, and rebalancing partitions by the hyperplanes it creates.
///
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BinaryTree
{
    entries: Arena<EntryId, StoredEntry>,
    nodes: Arena<NodeId, BinaryNode>,
    root: Option<Slot>,
}

impl BinaryTree
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Number of stored entries.
    #[inline]
    pub fn size(&self) -> usize
    {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    #[inline]
    pub fn num_nodes(&self) -> usize
    {
        self.nodes.len()
    }

    #[inline]
    pub fn root(&self) -> Option<Slot>
    {
        self.root
    }

    #[inline]
    pub fn entry(&self, id: EntryId) -> Option<&StoredEntry>
    {
        self.entries.get(id)
    }

    #[inline]
    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut StoredEntry>
    {
        self.entries.get_mut(id)
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&BinaryNode>
    {
        self.nodes.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &StoredEntry)>
    {
        self.entries.iter()
    }

    pub fn clear(&mut self)
    {
        self.entries.clear();
        self.nodes.clear();
        self.root = None;
    }

    ///
    /// Descends from the root and returns the leaf reached by `query`.
    ///
    pub fn find_closest(&self, query: &[f64]) -> Option<EntryId>
    {
        let mut slot = self.root?;
        loop
        {
            match slot
            {
                Slot::Leaf(id) => return Some(id),
                Slot::Node(id) =>
                {
                    let node = &self.nodes[id];
                    slot = if node.go_right(query) { node.right } else { node.left };
                }
            }
        }
    }

    ///
    /// Stores `entry` and hangs it next to `existing`: the leaf of `existing`
    /// is replaced by a node with `existing` on the left and the new entry on
    /// the right. When `existing` is `None` or stale, the leaf reached by the
    /// new entry's input is used; an empty tree gets the entry as root.
    ///
    pub fn insert_new_leaf(&mut self, existing: Option<EntryId>, entry: StoredEntry, ctx: &RegionContext) -> EntryId
    {
        let existing = match existing.filter(|&id| self.entries.contains(id))
        {
            Some(id) => Some(id),
            None => self.find_closest(entry.input()),
        };
        let new_id = self.entries.insert(entry);
        match existing
        {
            None => self.root = Some(Slot::Leaf(new_id)),
            Some(existing) =>
            {
                let parent = self.entries[existing].node;
                let node = BinaryNode::new(&self.entries[existing], &self.entries[new_id], Slot::Leaf(existing), Slot::Leaf(new_id), parent, ctx);
                let node_id = self.nodes.insert(node);
                self.replace_in_parent(parent, Slot::Leaf(existing), Slot::Node(node_id));
                self.entries[existing].node = Some(node_id);
                self.entries[new_id].node = Some(node_id);
            }
        }
        new_id
    }

    ///
    /// Removes an entry. Its parent node is collapsed into the sibling.
    ///
    pub fn delete_leaf(&mut self, id: EntryId) -> Option<StoredEntry>
    {
        let entry = self.entries.remove(id)?;
        match entry.node
        {
            None => self.root = None,
            Some(parent) =>
            {
                if let Some(node) = self.nodes.remove(parent)
                {
                    let sibling = node.sibling_of(Slot::Leaf(id));
                    self.set_parent(sibling, node.parent);
                    self.replace_in_parent(node.parent, Slot::Node(parent), sibling);
                }
            }
        }
        Some(entry)
    }

    fn replace_in_parent(&mut self, parent: Option<NodeId>, old: Slot, new: Slot)
    {
        match parent
        {
            None => self.root = Some(new),
            Some(parent) =>
            {
                let replaced = self.nodes[parent].replace_child(old, new);
                debug_assert!(replaced);
            }
        }
    }

    fn set_parent(&mut self, slot: Slot, parent: Option<NodeId>)
    {
        match slot
        {
            Slot::Leaf(id) => self.entries[id].node = parent,
            Slot::Node(id) => self.nodes[id].parent = parent,
        }
    }

    ///
    /// Checks that every handle reachable from the root resolves, that parent
    /// links agree with the children, that every entry and node is reached
    /// exactly once, and that entries and hyperplanes have `num_dims`
    /// dimensions.
    ///
    pub fn is_consistent(&self, num_dims: usize) -> bool
    {
        let Some(root) = self.root else { return self.entries.is_empty() && self.nodes.is_empty() };
        let (mut num_leaves, mut num_nodes) = (0, 0);
        let mut stack = vec![(root, None)];
        while let Some((slot, parent)) = stack.pop()
        {
            match slot
            {
                Slot::Leaf(id) =>
                {
                    let Some(entry) = self.entries.get(id) else { return false };
                    if entry.node != parent || !entry.is_consistent(num_dims)
                    {
                        return false;
                    }
                    num_leaves += 1;
                }
                Slot::Node(id) =>
                {
                    let Some(node) = self.nodes.get(id) else { return false };
                    num_nodes += 1;
                    // a cycle visits more nodes than are stored
                    if node.parent != parent || node.normal().len() != num_dims || num_nodes > self.nodes.len()
                    {
                        return false;
                    }
                    stack.push((node.left, Some(id)));
                    stack.push((node.right, Some(id)));
                }
            }
        }
        num_leaves == self.entries.len() && num_nodes == self.nodes.len()
    }

    /// Largest number of nodes on a root-to-leaf path.
    pub fn depth(&self) -> usize
    {
        let Some(root) = self.root else { return 0 };
        let mut max_depth = 0;
        let mut stack = vec![(root, 0)];
        while let Some((slot, depth)) = stack.pop()
        {
            match slot
            {
                Slot::Leaf(_) => max_depth = max_depth.max(depth),
                Slot::Node(id) =>
                {
                    let node = &self.nodes[id];
                    stack.push((node.left, depth + 1));
                    stack.push((node.right, depth + 1));
                }
            }
        }
        max_depth
    }

    /// Leaves from left to right.
    pub fn leaves(&self) -> Vec<EntryId>
    {
        let mut leaves = Vec::with_capacity(self.size());
        let mut stack: Vec<Slot> = self.root.into_iter().collect();
        while let Some(slot) = stack.pop()
        {
            match slot
            {
                Slot::Leaf(id) => leaves.push(id),
                Slot::Node(id) =>
                {
                    let node = &self.nodes[id];
                    stack.push(node.right);
                    stack.push(node.left);
                }
            }
        }
        leaves
    }

    ///
    /// Rebuilds the tree from its entries. At each level the entries are
    /// sorted along the scaled input dimension of largest variance, the two
    /// median entries define the node's hyperplane, and the entries are
    /// partitioned by that hyperplane. Entry contents are not touched.
    ///
    pub fn balance(&mut self, ctx: &RegionContext)
    {
        let ids = self.entries.ids();
        let depth_before = self.depth();
        self.nodes.clear();
        self.root = if ids.is_empty() { None } else { Some(self.build(ids, None, ctx)) };
        debug!(size = self.size(), depth_before, depth_after = self.depth(), "rebalanced binary tree");
    }

    fn build(&mut self, mut ids: Vec<EntryId>, parent: Option<NodeId>, ctx: &RegionContext) -> Slot
    {
        if ids.len() == 1
        {
            self.entries[ids[0]].node = parent;
            return Slot::Leaf(ids[0]);
        }
        let dim = self.split_dimension(&ids, ctx);
        ids.sort_by(|&a, &b| self.entries[a].input()[dim].total_cmp(&self.entries[b].input()[dim]));
        let mid = ids.len() / 2;
        let (left_pivot, right_pivot) = (ids[mid - 1], ids[mid]);
        let node = BinaryNode::new(&self.entries[left_pivot], &self.entries[right_pivot], Slot::Leaf(left_pivot), Slot::Leaf(right_pivot), parent, ctx);

        let (mut left, mut right): (Vec<EntryId>, Vec<EntryId>) = ids.iter().copied().partition(|&id| !node.go_right(self.entries[id].input()));
        if left.is_empty() || right.is_empty()
        {
            debug!(size = ids.len(), "degenerate hyperplane during rebalance, splitting by rank");
            right = ids.split_off(mid);
            left = ids;
        }
        let node_id = self.nodes.insert(node);
        let left = self.build(left, Some(node_id), ctx);
        let right = self.build(right, Some(node_id), ctx);
        let node = &mut self.nodes[node_id];
        node.left = left;
        node.right = right;
        Slot::Node(node_id)
    }

    fn split_dimension(&self, ids: &[EntryId], ctx: &RegionContext) -> usize
    {
        let num_dims = self.entries[ids[0]].num_dims();
        let n = ids.len() as f64;
        let mut best = (0, f64::NEG_INFINITY);
        for d in 0..num_dims
        {
            let scale = ctx.scale_factors[d];
            let mean = ids.iter().map(|&id| self.entries[id].input()[d] / scale).sum::<f64>() / n;
            let variance = ids.iter().map(|&id|
            {
                let x = self.entries[id].input()[d] / scale - mean;
                x * x
            }).sum::<f64>() / n;
            if variance > best.1
            {
                best = (d, variance);
            }
        }
        best.0
    }
}

#[cfg(test)]
fn entry_at(input: Vec<f64>, ctx: &RegionContext) -> StoredEntry
{
    let n = input.len();
    StoredEntry::new(input.clone(), input, crate::linalg::identity(n), None, ctx, 0)
}

#[cfg(test)]
fn assert_consistent(tree: &BinaryTree)
{
    // every entry is reached by exactly one path and by its own input
    let mut leaves = tree.leaves();
    assert_eq!(leaves.len(), tree.size());
    leaves.sort();
    leaves.dedup();
    assert_eq!(leaves.len(), tree.size());
    for (id, entry) in tree.entries()
    {
        assert_eq!(tree.find_closest(entry.input()), Some(id));
    }
    assert_eq!(tree.num_nodes() + 1, tree.size().max(1));
    assert!(tree.is_consistent(3));
}

#[test]
fn test_insert_and_find()
{
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(17);
    let scale = [1.0; 3];
    let ctx = crate::storage::entry::test_context(0.01, &scale);
    let mut tree = BinaryTree::new();
    assert_eq!(tree.find_closest(&[0.0, 0.0, 0.0]), None);
    for _ in 0..100
    {
        let x: Vec<f64> = (0..3).map(|_| rng.gen_range(0.0..1.0)).collect();
        let closest = tree.find_closest(&x);
        tree.insert_new_leaf(closest, entry_at(x, &ctx), &ctx);
    }
    assert_eq!(tree.size(), 100);
    assert_consistent(&tree);
}

#[test]
fn test_delete_collapses_parent()
{
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let scale = [1.0; 3];
    let ctx = crate::storage::entry::test_context(0.01, &scale);
    let mut tree = BinaryTree::new();
    let mut ids = Vec::new();
    for _ in 0..50
    {
        let x: Vec<f64> = (0..3).map(|_| rng.gen_range(0.0..1.0)).collect();
        ids.push(tree.insert_new_leaf(None, entry_at(x, &ctx), &ctx));
    }
    for id in ids.iter().step_by(3)
    {
        assert!(tree.delete_leaf(*id).is_some());
        assert!(tree.delete_leaf(*id).is_none());
    }
    assert_eq!(tree.size(), 33);
    for id in ids.iter().step_by(3)
    {
        assert!(tree.entry(*id).is_none());
        assert!(!tree.leaves().contains(id));
    }
    assert_consistent(&tree);

    for id in ids
    {
        tree.delete_leaf(id);
    }
    assert!(tree.is_empty());
    assert_eq!(tree.root(), None);
    assert_eq!(tree.num_nodes(), 0);
}

#[test]
fn test_balance_chain()
{
    let scale = [1.0; 3];
    let ctx = crate::storage::entry::test_context(0.1, &scale);
    let mut tree = BinaryTree::new();
    for i in 0..64
    {
        let x = vec![i as f64, 0.5 * i as f64, 1.0];
        let closest = tree.find_closest(&x);
        tree.insert_new_leaf(closest, entry_at(x, &ctx), &ctx);
    }
    // points inserted in increasing order form a chain
    assert_eq!(tree.depth(), 63);
    let outputs_before: Vec<Vec<f64>> = tree.leaves().iter().map(|&id| tree.entry(id).map(|e| e.output().to_vec()).unwrap_or_default()).collect();
    tree.balance(&ctx);
    assert_eq!(tree.depth(), 6);
    assert_consistent(&tree);
    let mut outputs_after: Vec<Vec<f64>> = tree.leaves().iter().map(|&id| tree.entry(id).map(|e| e.output().to_vec()).unwrap_or_default()).collect();
    outputs_after.sort_by(|a, b| a[0].total_cmp(&b[0]));
    assert_eq!(outputs_before, outputs_after);
}

#[test]
fn test_inconsistent_tree_is_detected()
{
    let scale = [1.0; 3];
    let ctx = crate::storage::entry::test_context(0.1, &scale);
    let mut tree = BinaryTree::new();
    assert!(tree.is_consistent(3));
    let mut ids = Vec::new();
    for i in 0..4
    {
        let x = vec![i as f64, 1.0, 1.0];
        let closest = tree.find_closest(&x);
        ids.push(tree.insert_new_leaf(closest, entry_at(x, &ctx), &ctx));
    }
    assert!(tree.is_consistent(3));
    assert!(!tree.is_consistent(4));

    // an entry missing from the arena leaves a dangling leaf
    let mut dangling = tree.clone();
    dangling.entries.remove(ids[1]);
    assert!(!dangling.is_consistent(3));

    // a node that points back at the root forms a cycle
    let mut cyclic = tree.clone();
    if let (Some(Slot::Node(root)), Some(&leaf)) = (cyclic.root, ids.last())
    {
        let last_parent = cyclic.entries[leaf].node;
        if let Some(parent) = last_parent
        {
            cyclic.nodes[parent].replace_child(Slot::Leaf(leaf), Slot::Node(root));
        }
    }
    assert!(!cyclic.is_consistent(3));
}
