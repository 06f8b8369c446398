//! Strong-typed index machinery. Every id in the compiler (blocks,
//! instructions, identifiers, scopes) is a distinct wrapper around a `u32` so
//! that the type system rejects accidental cross-use. Construction goes
//! through `Index::new` which takes a `usize` and therefore cannot produce a
//! negative id.

use std::{fmt::Debug, hash::Hash, marker::PhantomData};

use hashbrown::HashMap;

/// A trait to be implemented by any "index-like" types
pub trait Index: Copy + 'static + Eq + PartialEq + Debug + Hash {
    fn new(idx: usize) -> Self;

    fn index(self) -> usize;

    #[inline]
    fn increment_by(&mut self, amount: usize) {
        *self = self.plus(amount);
    }

    #[inline]
    #[must_use = "Use `increment_by` if you wanted to update the index in-place"]
    fn plus(self, amount: usize) -> Self {
        Self::new(self.index() + amount)
    }
}

macro_rules! simple_index {
    ($(#[$attr:meta])* $vis:vis struct $name:ident;) => {
        $(#[$attr])*
        #[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
        $vis struct $name(u32);

        impl $crate::index::Index for $name {
            fn new(idx: usize) -> Self {
                assert!(idx <= u32::MAX as usize, "index overflow");
                Self(idx as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use simple_index;

pub struct IndexVec<I: Index, T> {
    pub raw: Vec<T>,
    _marker: PhantomData<fn(&I)>,
}

impl<I: Index, T> IndexVec<I, T> {
    /// Constructs a new, empty `IndexVec<I, T>`.
    #[inline]
    pub const fn new() -> Self {
        IndexVec::from_raw(Vec::new())
    }

    /// Constructs a new `IndexVec<I, T>` from a `Vec<T>`.
    #[inline]
    pub const fn from_raw(raw: Vec<T>) -> Self {
        IndexVec {
            raw,
            _marker: PhantomData,
        }
    }

    /// Pushes an element returning the index where it was pushed to.
    #[inline]
    pub fn push(&mut self, d: T) -> I {
        let idx = self.next_index();
        self.raw.push(d);
        idx
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.raw.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.raw.iter_mut()
    }

    pub fn enumerate(&self) -> impl Iterator<Item = (I, &'_ T)> {
        self.raw.iter().enumerate().map(|(i, v)| (I::new(i), v))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Gives the next index that will be assigned when `push` is called.
    #[inline]
    pub fn next_index(&self) -> I {
        I::new(self.len())
    }

    #[inline]
    pub fn get(&self, index: I) -> Option<&T> {
        self.raw.get(index.index())
    }

    #[inline]
    pub fn get_mut(&mut self, index: I) -> Option<&mut T> {
        self.raw.get_mut(index.index())
    }
}

impl<I: Index, T: Debug> Debug for IndexVec<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.raw.iter()).finish()
    }
}

impl<I: Index, T> core::ops::Index<I> for IndexVec<I, T> {
    type Output = T;

    fn index(&self, index: I) -> &Self::Output {
        self.get(index).unwrap()
    }
}

impl<I: Index, T> core::ops::IndexMut<I> for IndexVec<I, T> {
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        self.get_mut(index).unwrap()
    }
}

/// A map that iterates in insertion order with O(1) keyed lookup. The HIR
/// stores basic blocks in one of these so that rewriting the entry order to
/// reverse postorder makes every forward dataflow pass a single in-order
/// sweep (no per-pass sorting).
pub struct OrderedMap<K: Index, V> {
    entries: Vec<(K, V)>,
    positions: HashMap<K, usize>,
}

impl<K: Index, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.positions.contains_key(&key)
    }

    /// Inserts at the end of the iteration order. Replaces in place (keeping
    /// the original position) if the key is already present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.positions.get(&key) {
            Some(&pos) => {
                let old = std::mem::replace(&mut self.entries[pos].1, value);
                Some(old)
            }
            None => {
                self.positions.insert(key, self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.positions.get(&key).map(|&pos| &self.entries[pos].1)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        match self.positions.get(&key) {
            Some(&pos) => Some(&mut self.entries[pos].1),
            None => None,
        }
    }

    pub fn remove(&mut self, key: K) -> Option<V> {
        let pos = self.positions.remove(&key)?;
        let (_, value) = self.entries.remove(pos);
        for entry_pos in self.positions.values_mut() {
            if *entry_pos > pos {
                *entry_pos -= 1;
            }
        }
        Some(value)
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Rebuilds the map with the given iteration order. Keys not mentioned
    /// are dropped; this is how unreachable blocks get discarded after the
    /// reverse-postorder rewrite. Only documented passes may call this.
    pub fn reorder(&mut self, order: impl IntoIterator<Item = K>) {
        let mut old: HashMap<K, V> = self.entries.drain(..).collect();
        self.positions.clear();
        for key in order {
            if let Some(value) = old.remove(&key) {
                self.positions.insert(key, self.entries.len());
                self.entries.push((key, value));
            }
        }
    }
}

impl<K: Index, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Index, V: Debug> Debug for OrderedMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl<K: Index, V> core::ops::Index<K> for OrderedMap<K, V> {
    type Output = V;

    fn index(&self, index: K) -> &Self::Output {
        self.get(index).unwrap()
    }
}

impl<K: Index, V> core::ops::IndexMut<K> for OrderedMap<K, V> {
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        self.get_mut(index).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    simple_index! {
        struct TestId;
    }

    #[test]
    fn index_vec_assigns_sequential_ids() {
        let mut v: IndexVec<TestId, &str> = IndexVec::new();
        let a = v.push("a");
        let b = v.push("b");
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(v[b], "b");
        assert_eq!(v.next_index().index(), 2);
    }

    #[test]
    fn ordered_map_preserves_insertion_order() {
        let mut m: OrderedMap<TestId, u32> = OrderedMap::new();
        m.insert(TestId::new(3), 30);
        m.insert(TestId::new(1), 10);
        m.insert(TestId::new(2), 20);
        let keys: Vec<_> = m.keys().map(|k| k.index()).collect();
        assert_eq!(keys, vec![3, 1, 2]);
    }

    #[test]
    fn ordered_map_reorder_drops_missing_keys() {
        let mut m: OrderedMap<TestId, u32> = OrderedMap::new();
        m.insert(TestId::new(0), 0);
        m.insert(TestId::new(1), 1);
        m.insert(TestId::new(2), 2);
        m.reorder([TestId::new(2), TestId::new(0)]);
        let keys: Vec<_> = m.keys().map(|k| k.index()).collect();
        assert_eq!(keys, vec![2, 0]);
        assert!(!m.contains_key(TestId::new(1)));
    }

    #[test]
    fn ordered_map_insert_existing_keeps_position() {
        let mut m: OrderedMap<TestId, u32> = OrderedMap::new();
        m.insert(TestId::new(0), 0);
        m.insert(TestId::new(1), 1);
        assert_eq!(m.insert(TestId::new(0), 100), Some(0));
        let keys: Vec<_> = m.keys().map(|k| k.index()).collect();
        assert_eq!(keys, vec![0, 1]);
        assert_eq!(m[TestId::new(0)], 100);
    }
}
