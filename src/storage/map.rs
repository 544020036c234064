//! Robin Hood open-addressing hash map keyed by `(name, precomputed hash)`.
//!
//! Equality is by `name` only; `hash` is computed once per pipeline
//! argument by the caller and carried through every lookup.

use super::value::{Key, Value};

const INITIAL_CAPACITY: usize = 64;
const LOAD_FACTOR_NUM: usize = 9;
const LOAD_FACTOR_DEN: usize = 10;

struct Entry {
    key: Key,
    value: Value,
    distance: u32,
}

/// Fixed-power-of-two-sized slot array with Robin Hood displacement.
pub struct Map {
    slots: Vec<Option<Entry>>,
    capacity: usize,
    size: usize,
    resize_at: usize,
}

impl Map {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            capacity,
            size: 0,
            resize_at: capacity * LOAD_FACTOR_NUM / LOAD_FACTOR_DEN,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn desired_index(&self, hash: i64) -> usize {
        (hash as u64 as usize) & (self.capacity - 1)
    }

    /// Looks up a value by key, returning `None` if absent.
    pub fn get(&self, name: &[u8], hash: i64) -> Option<&Value> {
        let mut index = self.desired_index(hash);
        let mut distance = 0u32;

        loop {
            match &self.slots[index] {
                None => return None,
                Some(entry) => {
                    if entry.distance < distance {
                        return None;
                    }
                    if entry.key.name == name {
                        return Some(&entry.value);
                    }
                }
            }
            index = (index + 1) & (self.capacity - 1);
            distance += 1;
        }
    }

    /// Inserts or replaces a value, returning the previous value if the key
    /// already existed.
    pub fn set(&mut self, key: Key, value: Value) -> Option<Value> {
        if self.size >= self.resize_at {
            self.resize();
        }

        let mut index = self.desired_index(key.hash);
        let mut distance = 0u32;
        let mut carry = Entry {
            key,
            value,
            distance: 0,
        };

        loop {
            match &mut self.slots[index] {
                None => {
                    carry.distance = distance;
                    self.slots[index] = Some(carry);
                    self.size += 1;
                    return None;
                }
                Some(existing) => {
                    if existing.key.name == carry.key.name {
                        carry.distance = distance;
                        let old = std::mem::replace(existing, carry);
                        return Some(old.value);
                    }
                    if existing.distance < distance {
                        carry.distance = distance;
                        std::mem::swap(existing, &mut carry);
                    }
                }
            }
            index = (index + 1) & (self.capacity - 1);
            distance += 1;
        }
    }

    /// Removes a key, returning its value if present.
    pub fn remove(&mut self, name: &[u8], hash: i64) -> Option<Value> {
        let mut index = self.desired_index(hash);
        let mut distance = 0u32;

        let found_index = loop {
            match &self.slots[index] {
                None => return None,
                Some(entry) => {
                    if entry.distance < distance {
                        return None;
                    }
                    if entry.key.name == name {
                        break index;
                    }
                }
            }
            index = (index + 1) & (self.capacity - 1);
            distance += 1;
        };

        let removed = self.slots[found_index].take().map(|e| e.value);
        self.size -= 1;

        // Backward-shift deletion: pull following entries back one slot
        // while they still have probe distance to spare.
        let mut hole = found_index;
        loop {
            let next = (hole + 1) & (self.capacity - 1);
            let should_shift = matches!(&self.slots[next], Some(e) if e.distance > 0);
            if !should_shift {
                break;
            }
            let mut moved = self.slots[next].take().unwrap();
            moved.distance -= 1;
            self.slots[hole] = Some(moved);
            hole = next;
        }

        removed
    }

    /// Iterates over the names of all present entries, in slot order
    /// (unspecified to clients).
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|e| e.key.name.as_slice()))
    }

    /// Mutable access to every live value, used by `Allocator::defragment`
    /// to relocate values out of fragmented blocks.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.as_mut().map(|e| &mut e.value))
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.size = 0;
    }

    fn resize(&mut self) {
        let new_capacity = self.capacity * 2;
        let old_slots = std::mem::replace(&mut self.slots, {
            let mut v = Vec::with_capacity(new_capacity);
            v.resize_with(new_capacity, || None);
            v
        });
        self.capacity = new_capacity;
        self.resize_at = new_capacity * LOAD_FACTOR_NUM / LOAD_FACTOR_DEN;
        self.size = 0;

        for slot in old_slots.into_iter().flatten() {
            self.set(slot.key, slot.value);
        }
    }
}

impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}
