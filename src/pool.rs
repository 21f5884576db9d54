/// Stable handle into a [`Pool`].
///
/// The generation counter detects reuse of a slot: a handle taken before the
/// slot was recycled no longer resolves, so stale dependency records can never
/// reach a recycled value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UopId {
    index: u32,
    generation: u32,
}

impl UopId {
    /// Handle that never resolves, used for unset references.
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: u32::MAX,
    };

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }
}

impl Default for UopId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for UopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_invalid() {
            write!(f, "uop(-)")
        } else {
            write!(f, "uop({}.{})", self.index, self.generation)
        }
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    live: bool,
    value: T,
}

/// Fixed arena with a free list.
///
/// Values are recycled rather than reallocated every cycle. Callers reset a
/// recycled value after [`Pool::alloc`] returns its handle.
#[derive(Debug)]
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T: Default> Pool<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for index in 0..capacity {
            slots.push(Slot {
                generation: 0,
                live: false,
                value: T::default(),
            });
            free.push(index as u32);
        }
        // pop from the back, so hand out low indices first
        free.reverse();
        Self { slots, free }
    }

    /// Claims a slot and returns its handle. Grows the arena when the free
    /// list is exhausted.
    pub fn alloc(&mut self) -> UopId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    live: false,
                    value: T::default(),
                });
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        debug_assert!(!slot.live);
        slot.live = true;
        UopId {
            index,
            generation: slot.generation,
        }
    }

    /// Resolves a handle, failing when the slot was freed or recycled since
    /// the handle was taken.
    #[must_use]
    pub fn get(&self, id: UopId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.live && slot.generation == id.generation {
            Some(&slot.value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn get_mut(&mut self, id: UopId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.live && slot.generation == id.generation {
            Some(&mut slot.value)
        } else {
            None
        }
    }

    /// Two disjoint mutable borrows, needed when a parent and one of its
    /// children must be updated together.
    #[must_use]
    pub fn get_pair_mut(&mut self, a: UopId, b: UopId) -> Option<(&mut T, &mut T)> {
        assert_ne!(a.index, b.index, "aliasing pool handles: {a} {b}");
        let (low, high, swapped) = if a.index < b.index {
            (a, b, false)
        } else {
            (b, a, true)
        };
        let (head, tail) = self.slots.split_at_mut(high.index as usize);
        let slot_low = head.get_mut(low.index as usize)?;
        let slot_high = tail.first_mut()?;
        if !(slot_low.live && slot_low.generation == low.generation) {
            return None;
        }
        if !(slot_high.live && slot_high.generation == high.generation) {
            return None;
        }
        if swapped {
            Some((&mut slot_high.value, &mut slot_low.value))
        } else {
            Some((&mut slot_low.value, &mut slot_high.value))
        }
    }

    /// Returns the slot to the free list and bumps its generation, so every
    /// outstanding handle to it stops resolving.
    pub fn free(&mut self, id: UopId) {
        let slot = &mut self.slots[id.index as usize];
        assert!(
            slot.live && slot.generation == id.generation,
            "double free or stale free of pool slot {id}"
        );
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    #[must_use]
    pub fn contains(&self, id: UopId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
