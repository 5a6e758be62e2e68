use serde::{Deserialize, Serialize};

use crate::storage::entry::{RegionContext, StoredEntry};
use crate::storage::NodeId;
use crate::tree::Slot;

///
/// Internal node of the binary tree.
///
/// The hyperplane is computed once from the two entries the node separated
/// when it was created: `v = M_L (x_R - x_L)` with `M_L` the metric of the
/// left entry's ellipsoid, and `a = v . (x_L + x_R) / 2`. It stays fixed until
/// the tree is rebalanced, even if those entries are later removed.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinaryNode
{
    pub(crate) left: Slot,
    pub(crate) right: Slot,
    pub(crate) parent: Option<NodeId>,
    v: Vec<f64>,
    a: f64,
}

impl BinaryNode
{
    pub fn new(left_entry: &StoredEntry, right_entry: &StoredEntry, left: Slot, right: Slot, parent: Option<NodeId>, ctx: &RegionContext) -> Self
    {
        let (v, a) = Self::hyperplane(left_entry, right_entry, ctx);
        Self { left, right, parent, v, a }
    }

    fn hyperplane(left: &StoredEntry, right: &StoredEntry, ctx: &RegionContext) -> (Vec<f64>, f64)
    {
        let diff: Vec<f64> = right.input().iter().zip(left.input()).map(|(r, l)| r - l).collect();
        let v = left.metric_product(&diff, ctx);
        let a = v.iter().zip(left.input().iter().zip(right.input())).map(|(v, (l, r))| v * 0.5 * (l + r)).sum();
        (v, a)
    }

    #[inline]
    pub fn go_right(&self, query: &[f64]) -> bool
    {
        self.v.iter().zip(query).map(|(v, q)| v * q).sum::<f64>() > self.a
    }

    #[inline]
    pub fn left(&self) -> Slot
    {
        self.left
    }

    #[inline]
    pub fn right(&self) -> Slot
    {
        self.right
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId>
    {
        self.parent
    }

    #[inline]
    pub fn normal(&self) -> &[f64]
    {
        &self.v
    }

    #[inline]
    pub fn offset(&self) -> f64
    {
        self.a
    }

    /// Replaces the child `old` by `new`. Returns false if `old` is not a child.
    pub(crate) fn replace_child(&mut self, old: Slot, new: Slot) -> bool
    {
        if self.left == old
        {
            self.left = new;
            true
        }
        else if self.right == old
        {
            self.right = new;
            true
        }
        else
        {
            false
        }
    }

    /// The child that is not `child`.
    pub(crate) fn sibling_of(&self, child: Slot) -> Slot
    {
        if self.left == child { self.right } else { self.left }
    }
}

#[test]
fn test_hyperplane_separates_its_pair()
{
    use crate::storage::entry::test_context;
    use crate::storage::{Arena, EntryId};
    use ndarray::array;
    let scale = [1.0, 3.0, 0.2];
    let ctx = test_context(0.01, &scale);
    let sensitivity = array![[1.0, 0.4, 0.0], [0.0, 2.0, 0.1], [0.3, 0.0, 0.7]];
    let left = StoredEntry::new(vec![0.1, 0.5, 0.2], vec![0.0; 3], sensitivity.clone(), None, &ctx, 0);
    let right = StoredEntry::new(vec![0.12, 0.45, 0.21], vec![0.0; 3], sensitivity, None, &ctx, 0);
    let mut arena: Arena<EntryId, StoredEntry> = Arena::new();
    let l = arena.insert(left);
    let r = arena.insert(right);
    let node = BinaryNode::new(&arena[l], &arena[r], Slot::Leaf(l), Slot::Leaf(r), None, &ctx);
    assert!(!node.go_right(arena[l].input()));
    assert!(node.go_right(arena[r].input()));
    assert_eq!(node.sibling_of(Slot::Leaf(l)), Slot::Leaf(r));
}
