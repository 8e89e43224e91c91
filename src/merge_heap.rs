//! Indexed binary min-heap over arena ids.
//!
//! `std::collections::BinaryHeap` cannot change or remove an arbitrary
//! entry, which the merge loop needs every time a node's nearest neighbour
//! is recomputed or a node leaves the list. Here every id knows its slot.

use core::cmp::Ordering;

const ABSENT: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct MergeHeap {
    /// Heap array of ids.
    slots: Vec<usize>,
    /// Key per id; meaningful only while the id is in the heap.
    keys: Vec<f64>,
    /// Slot per id, `ABSENT` when not queued.
    positions: Vec<usize>,
}

impl MergeHeap {
    /// Empty heap accepting ids in `0..capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            keys: vec![0.0; capacity],
            positions: vec![ABSENT; capacity],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.positions.get(id).is_some_and(|&p| p != ABSENT)
    }

    pub fn key(&self, id: usize) -> Option<f64> {
        self.contains(id).then(|| self.keys[id])
    }

    /// Lowest `(id, key)`. Equal keys order by id.
    pub fn peek(&self) -> Option<(usize, f64)> {
        self.slots.first().map(|&id| (id, self.keys[id]))
    }

    /// Insert `id`, or move it to `key` if already queued.
    pub fn push(&mut self, id: usize, key: f64) {
        if id >= self.positions.len() {
            self.keys.resize(id + 1, 0.0);
            self.positions.resize(id + 1, ABSENT);
        }
        if self.contains(id) {
            self.update(id, key);
            return;
        }
        self.keys[id] = key;
        self.positions[id] = self.slots.len();
        self.slots.push(id);
        self.sift_up(self.slots.len() - 1);
    }

    /// Change the key of a queued id. Returns `false` if it is not queued.
    pub fn update(&mut self, id: usize, key: f64) -> bool {
        if !self.contains(id) {
            return false;
        }
        let old = self.keys[id];
        self.keys[id] = key;
        let slot = self.positions[id];
        match key.total_cmp(&old) {
            Ordering::Less => self.sift_up(slot),
            Ordering::Greater => self.sift_down(slot),
            Ordering::Equal => {}
        }
        true
    }

    /// Remove `id` from the heap. Returns `false` if it was not queued.
    pub fn remove(&mut self, id: usize) -> bool {
        if !self.contains(id) {
            return false;
        }
        let slot = self.positions[id];
        let last = self.slots.len() - 1;
        self.swap(slot, last);
        self.slots.pop();
        self.positions[id] = ABSENT;
        if slot < self.slots.len() {
            self.sift_down(slot);
            self.sift_up(slot);
        }
        true
    }

    pub fn pop(&mut self) -> Option<(usize, f64)> {
        let top = self.peek()?;
        self.remove(top.0);
        Some(top)
    }

    /// Ids currently queued, in heap-array order.
    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().copied()
    }

    #[inline]
    fn less(&self, a: usize, b: usize) -> bool {
        let (ia, ib) = (self.slots[a], self.slots[b]);
        self.keys[ia]
            .total_cmp(&self.keys[ib])
            .then(ia.cmp(&ib))
            .is_lt()
    }

    #[inline]
    fn swap(&mut self, a: usize, b: usize) {
        self.slots.swap(a, b);
        self.positions[self.slots[a]] = a;
        self.positions[self.slots[b]] = b;
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if !self.less(slot, parent) {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        let len = self.slots.len();
        loop {
            let left = 2 * slot + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, slot) {
                break;
            }
            self.swap(slot, child);
            slot = child;
        }
    }

    #[cfg(test)]
    fn assert_valid(&self) {
        for slot in 1..self.slots.len() {
            let parent = (slot - 1) / 2;
            assert!(!self.less(slot, parent), "heap order broken at slot {slot}");
        }
        for (slot, &id) in self.slots.iter().enumerate() {
            assert_eq!(self.positions[id], slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(heap: &mut MergeHeap) -> Vec<usize> {
        let mut out = Vec::new();
        while let Some((id, _)) = heap.pop() {
            heap.assert_valid();
            out.push(id);
        }
        out
    }

    #[test]
    fn pops_in_key_order() {
        let mut heap = MergeHeap::with_capacity(6);
        for (id, key) in [(0, 5.0), (1, 1.0), (2, 4.0), (3, 2.0), (4, 3.0), (5, 0.5)] {
            heap.push(id, key);
            heap.assert_valid();
        }
        assert_eq!(heap.len(), 6);
        assert_eq!(drain(&mut heap), vec![5, 1, 3, 4, 2, 0]);
        assert!(heap.is_empty());
    }

    #[test]
    fn ties_break_by_id() {
        let mut heap = MergeHeap::with_capacity(4);
        for id in [3, 0, 2, 1] {
            heap.push(id, 7.0);
        }
        assert_eq!(drain(&mut heap), vec![0, 1, 2, 3]);
    }

    #[test]
    fn update_moves_both_ways() {
        let mut heap = MergeHeap::with_capacity(4);
        for id in 0..4 {
            heap.push(id, id as f64);
        }
        assert!(heap.update(3, -1.0));
        heap.assert_valid();
        assert_eq!(heap.peek(), Some((3, -1.0)));
        assert!(heap.update(3, 10.0));
        heap.assert_valid();
        assert_eq!(heap.peek(), Some((0, 0.0)));
        assert_eq!(heap.key(3), Some(10.0));
    }

    #[test]
    fn remove_from_the_middle() {
        let mut heap = MergeHeap::with_capacity(8);
        for id in 0..8 {
            heap.push(id, (8 - id) as f64);
        }
        assert!(heap.remove(4));
        assert!(!heap.remove(4));
        assert!(!heap.contains(4));
        assert_eq!(heap.key(4), None);
        heap.assert_valid();
        assert_eq!(drain(&mut heap), vec![7, 6, 5, 3, 2, 1, 0]);
    }

    #[test]
    fn push_existing_id_updates() {
        let mut heap = MergeHeap::with_capacity(2);
        heap.push(0, 1.0);
        heap.push(1, 2.0);
        heap.push(1, 0.0);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.peek(), Some((1, 0.0)));
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut heap = MergeHeap::with_capacity(0);
        heap.push(10, 1.0);
        assert!(heap.contains(10));
        assert!(!heap.contains(3));
        assert!(!heap.update(3, 0.0));
    }
}
