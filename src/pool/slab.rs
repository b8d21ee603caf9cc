//! Slot slab allocator
//!
//! Pre-allocated slots with O(1) insertion and removal for state owned by a
//! single event loop. Freed slots are recycled through an intrusive free
//! list, so handles stay small and stable for as long as the value lives.

/// Handle to a slot in the slab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabHandle(usize);

impl SlabHandle {
    /// Get the raw index
    pub fn index(&self) -> usize {
        self.0
    }
}

enum Slot<T> {
    Occupied(T),
    /// Next free slot, if any
    Vacant(Option<usize>),
}

/// A single-threaded slab allocator
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    /// Head of the free list
    next_free: Option<usize>,
    /// Number of occupied slots
    len: usize,
}

impl<T> Slab<T> {
    /// Create an empty slab
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a slab with room for `capacity` values before reallocating
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            next_free: None,
            len: 0,
        }
    }

    /// Insert a value, reusing a free slot when one exists
    pub fn insert(&mut self, value: T) -> SlabHandle {
        self.len += 1;

        match self.next_free {
            Some(idx) => {
                let slot = std::mem::replace(&mut self.slots[idx], Slot::Occupied(value));
                match slot {
                    Slot::Vacant(next) => self.next_free = next,
                    Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
                }
                SlabHandle(idx)
            }
            None => {
                self.slots.push(Slot::Occupied(value));
                SlabHandle(self.slots.len() - 1)
            }
        }
    }

    /// Remove and return value at handle
    pub fn remove(&mut self, handle: SlabHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.0)?;
        if matches!(slot, Slot::Vacant(_)) {
            return None;
        }

        let taken = std::mem::replace(slot, Slot::Vacant(self.next_free));
        self.next_free = Some(handle.0);
        self.len -= 1;

        match taken {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant(_) => None,
        }
    }

    /// Get reference to value at handle
    pub fn get(&self, handle: SlabHandle) -> Option<&T> {
        match self.slots.get(handle.0)? {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant(_) => None,
        }
    }

    /// Get mutable reference to value at handle
    pub fn get_mut(&mut self, handle: SlabHandle) -> Option<&mut T> {
        match self.slots.get_mut(handle.0)? {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant(_) => None,
        }
    }

    /// Check whether the handle refers to a live value
    pub fn contains(&self, handle: SlabHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Get current allocation count
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if slab is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots allocated so far, occupied or not
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}
