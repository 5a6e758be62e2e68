use indexmap::IndexSet;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

///
/// Partial bijection between complete composition indices and the
/// simplified (active) indices used by the reduced matrices.
///
/// The insertion order of the set is the simplified order: the `k`-th
/// element is the complete index of simplified dimension `k`.
///
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActiveSet
{
    num_species: usize,
    active: IndexSet<usize, FxBuildHasher>,
}

impl PartialEq for ActiveSet
{
    fn eq(&self, other: &Self) -> bool
    {
        self.num_species == other.num_species && self.active.iter().eq(other.active.iter())
    }
}

impl ActiveSet
{
    /// Every species active, in complete order.
    pub fn full(num_species: usize) -> Self
    {
        Self { num_species, active: (0..num_species).collect() }
    }

    pub fn empty(num_species: usize) -> Self
    {
        Self { num_species, active: IndexSet::default() }
    }

    pub fn from_flags(flags: &[bool]) -> Self
    {
        Self { num_species: flags.len(), active: flags.iter().enumerate().filter(|&(_, &a)| a).map(|(i, _)| i).collect() }
    }

    #[inline]
    pub fn num_species(&self) -> usize
    {
        self.num_species
    }

    /// Number of active species.
    #[inline]
    pub fn len(&self) -> usize
    {
        self.active.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.active.is_empty()
    }

    #[inline]
    pub fn is_active(&self, complete: usize) -> bool
    {
        self.active.contains(&complete)
    }

    #[inline]
    pub fn simplified_index(&self, complete: usize) -> Option<usize>
    {
        self.active.get_index_of(&complete)
    }

    #[inline]
    pub fn complete_index(&self, simplified: usize) -> usize
    {
        self.active[simplified]
    }

    ///
    /// Activates `complete` and returns its simplified index. Already active
    /// species keep their position.
    ///
    pub fn activate(&mut self, complete: usize) -> usize
    {
        debug_assert!(complete < self.num_species);
        self.active.insert_full(complete).0
    }

    /// Complete indices in simplified order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_
    {
        self.active.iter().copied()
    }

    pub fn to_flags(&self) -> Vec<bool>
    {
        let mut flags = vec![false; self.num_species];
        for &i in &self.active
        {
            flags[i] = true;
        }
        flags
    }
}

#[test]
fn test_active_set_bijection()
{
    let mut set = ActiveSet::from_flags(&[false, true, false, true, true]);
    assert_eq!(set.len(), 3);
    assert_eq!(set.simplified_index(3), Some(1));
    assert_eq!(set.simplified_index(0), None);
    assert_eq!(set.complete_index(2), 4);
    assert_eq!(set.activate(0), 3);
    assert_eq!(set.activate(1), 0);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 3, 4, 0]);
    assert_eq!(set.to_flags(), vec![true, true, false, true, true]);
}

#[test]
fn test_active_set_equality_is_ordered()
{
    let mut a = ActiveSet::empty(3);
    a.activate(0);
    a.activate(2);
    let mut b = ActiveSet::empty(3);
    b.activate(2);
    b.activate(0);
    assert_ne!(a, b);
    assert_eq!(a, ActiveSet::from_flags(&[true, false, true]));
}
