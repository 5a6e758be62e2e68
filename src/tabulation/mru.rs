use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::storage::EntryId;

///
/// Most recently used entries, newest first, bounded by `capacity`.
///
/// Holds handles only; a handle whose entry has been removed from the tree
/// resolves to nothing and is skipped by the caller or dropped by [`MruList::retain`].
///
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MruList
{
    entries: VecDeque<EntryId>,
    capacity: usize,
}

impl MruList
{
    pub fn new(capacity: usize) -> Self
    {
        Self { entries: VecDeque::with_capacity(capacity.min(1024)), capacity }
    }

    #[inline]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize
    {
        self.capacity
    }

    /// Moves `id` to the front, evicting the oldest handle when full.
    pub fn touch(&mut self, id: EntryId)
    {
        if self.capacity == 0
        {
            return;
        }
        if let Some(position) = self.entries.iter().position(|&e| e == id)
        {
            self.entries.remove(position);
        }
        self.entries.push_front(id);
        self.entries.truncate(self.capacity);
    }

    /// Handles from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_
    {
        self.entries.iter().copied()
    }

    pub fn retain(&mut self, keep: impl FnMut(&EntryId) -> bool)
    {
        self.entries.retain(keep);
    }

    pub fn clear(&mut self)
    {
        self.entries.clear();
    }
}

#[test]
fn test_mru_order_and_eviction()
{
    use crate::storage::Arena;
    let mut arena: Arena<EntryId, u32> = Arena::new();
    let ids: Vec<EntryId> = (0..4).map(|i| arena.insert(i)).collect();
    let mut mru = MruList::new(3);
    for &id in &ids
    {
        mru.touch(id);
    }
    assert_eq!(mru.iter().collect::<Vec<_>>(), vec![ids[3], ids[2], ids[1]]);
    mru.touch(ids[1]);
    assert_eq!(mru.iter().collect::<Vec<_>>(), vec![ids[1], ids[3], ids[2]]);
    arena.remove(ids[3]);
    mru.retain(|&id| arena.contains(id));
    assert_eq!(mru.iter().collect::<Vec<_>>(), vec![ids[1], ids[2]]);
}

#[test]
fn test_mru_disabled()
{
    use crate::storage::Arena;
    let mut arena: Arena<EntryId, u32> = Arena::new();
    let mut mru = MruList::new(0);
    mru.touch(arena.insert(1));
    assert!(mru.is_empty());
}
