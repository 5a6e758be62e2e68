pub mod active_set;
pub mod entry;

use serde::{Deserialize, Serialize};

///
/// Generational handle into an [`Arena`]. A handle whose slot has been
/// reused compares unequal to the new occupant, so stale handles simply
/// resolve to `None`.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key
{
    index: u32,
    generation: u32,
}

impl Key
{
    #[inline]
    pub fn index(&self) -> usize
    {
        self.index as usize
    }
}

/// Typed wrapper around a [`Key`].
pub trait ArenaKey: Copy
{
    fn from_key(key: Key) -> Self;
    fn key(&self) -> Key;
}

/// Handle of a stored entry (a leaf of the binary tree).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(Key);

/// Handle of an internal node of the binary tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Key);

impl ArenaKey for EntryId
{
    fn from_key(key: Key) -> Self { Self(key) }
    fn key(&self) -> Key { self.0 }
}

impl ArenaKey for NodeId
{
    fn from_key(key: Key) -> Self { Self(key) }
    fn key(&self) -> Key { self.0 }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Slot<T>
{
    generation: u32,
    value: Option<T>,
}

///
/// Slot storage with stable handles and slot reuse.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Arena<K, T>
{
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    #[serde(skip)]
    _key: std::marker::PhantomData<K>,
}

impl<K, T> Default for Arena<K, T>
{
    fn default() -> Self
    {
        Self { slots: Vec::new(), free: Vec::new(), len: 0, _key: std::marker::PhantomData }
    }
}

impl<K: ArenaKey, T> Arena<K, T>
{
    pub fn new() -> Self
    {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize
    {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> K
    {
        self.len += 1;
        if let Some(index) = self.free.pop()
        {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            K::from_key(Key { index, generation: slot.generation })
        }
        else
        {
            self.slots.push(Slot { generation: 0, value: Some(value) });
            K::from_key(Key { index: self.slots.len() as u32 - 1, generation: 0 })
        }
    }

    pub fn remove(&mut self, id: K) -> Option<T>
    {
        let key = id.key();
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation || slot.value.is_none()
        {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        slot.value.take()
    }

    #[inline]
    pub fn get(&self, id: K) -> Option<&T>
    {
        let key = id.key();
        self.slots.get(key.index()).filter(|s| s.generation == key.generation).and_then(|s| s.value.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: K) -> Option<&mut T>
    {
        let key = id.key();
        self.slots.get_mut(key.index()).filter(|s| s.generation == key.generation).and_then(|s| s.value.as_mut())
    }

    #[inline]
    pub fn contains(&self, id: K) -> bool
    {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)>
    {
        self.slots.iter().enumerate().filter_map(|(i, s)|
        {
            s.value.as_ref().map(|v| (K::from_key(Key { index: i as u32, generation: s.generation }), v))
        })
    }

    pub fn ids(&self) -> Vec<K>
    {
        self.iter().map(|(id, _)| id).collect()
    }

    ///
    /// Drops every value. Outstanding handles become stale.
    ///
    pub fn clear(&mut self)
    {
        self.free.clear();
        for (i, slot) in self.slots.iter_mut().enumerate()
        {
            if slot.value.take().is_some()
            {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(i as u32);
        }
        self.free.reverse();
        self.len = 0;
    }
}

impl<K: ArenaKey, T> std::ops::Index<K> for Arena<K, T>
{
    type Output = T;

    fn index(&self, id: K) -> &T
    {
        self.get(id).expect("stale arena handle")
    }
}

impl<K: ArenaKey, T> std::ops::IndexMut<K> for Arena<K, T>
{
    fn index_mut(&mut self, id: K) -> &mut T
    {
        self.get_mut(id).expect("stale arena handle")
    }
}

#[test]
fn test_arena_stale_handles()
{
    let mut arena: Arena<EntryId, &str> = Arena::new();
    let a = arena.insert("a");
    let b = arena.insert("b");
    assert_eq!(arena.len(), 2);
    assert_eq!(arena.remove(a), Some("a"));
    assert_eq!(arena.remove(a), None);
    let c = arena.insert("c");
    // slot of `a` is reused, but the old handle stays dead
    assert_eq!(c.key().index(), a.key().index());
    assert!(arena.get(a).is_none());
    assert_eq!(arena[c], "c");
    assert_eq!(arena[b], "b");
    arena.clear();
    assert!(arena.is_empty());
    assert!(arena.get(b).is_none());
    let d = arena.insert("d");
    assert_eq!(arena.iter().map(|(id, v)| (id, *v)).collect::<Vec<_>>(), vec![(d, "d")]);
}
