//! The per-referent set of weak-reference storage locations.
//!
//! A referent with at most [`INLINE_CAPACITY`] referrers keeps them in a
//! fixed inline array with no allocation; the fifth distinct referrer
//! promotes the set to an out-of-line open-addressed array. Promotion
//! happens once and is never undone, though the out-of-line array may
//! shrink back down to its starting capacity.

use core::mem;

use rust_alloc::boxed::Box;

use crate::obscure::Obscured;
use crate::probe;

/// How many referrers fit inline before the set goes out of line.
pub(crate) const INLINE_CAPACITY: usize = 4;

// starting (and minimum) out-of-line capacity: twice the inline count
const OUT_OF_LINE_FLOOR: usize = 2 * INLINE_CAPACITY;

/// All storage locations currently holding a weak reference to one
/// referent. Slots are disguised cell addresses; nil marks a free slot in
/// either representation.
pub(crate) struct ReferrerSet {
    referent: Obscured,
    referrers: Referrers,
}

enum Referrers {
    Inline([Obscured; INLINE_CAPACITY]),
    OutOfLine(SlotTable),
}

impl ReferrerSet {
    /// A new set holding its first referrer inline.
    pub(crate) fn new(referent: Obscured, first: Obscured) -> Self {
        debug_assert!(!referent.is_nil() && !first.is_nil());
        let mut slots = [Obscured::NIL; INLINE_CAPACITY];
        slots[0] = first;
        Self {
            referent,
            referrers: Referrers::Inline(slots),
        }
    }

    #[inline]
    pub(crate) fn referent(&self) -> Obscured {
        self.referent
    }

    /// Inserts `slot` if it is not already a member. Returns whether an
    /// insertion happened; adding a slot twice is a no-op.
    pub(crate) fn add_slot(&mut self, slot: Obscured) -> bool {
        debug_assert!(!slot.is_nil());
        match &mut self.referrers {
            Referrers::Inline(slots) => {
                if slots.contains(&slot) {
                    return false;
                }
                if let Some(free) = slots.iter_mut().find(|s| s.is_nil()) {
                    *free = slot;
                    return true;
                }
                // fifth distinct referrer: promote to out of line
                let mut table = SlotTable::with_capacity(OUT_OF_LINE_FLOOR);
                for existing in slots.iter().copied() {
                    table.insert(existing);
                }
                table.insert(slot);
                self.referrers = Referrers::OutOfLine(table);
                true
            }
            Referrers::OutOfLine(table) => {
                if table.find(slot).is_some() {
                    return false;
                }
                if probe::over_high_water(table.len, table.capacity()) {
                    table.rehash(table.capacity() * 2);
                }
                table.insert(slot);
                true
            }
        }
    }

    /// Removes `slot` if present, freeing its position back to nil.
    /// Returns whether a removal happened.
    pub(crate) fn remove_slot(&mut self, slot: Obscured) -> bool {
        match &mut self.referrers {
            Referrers::Inline(slots) => {
                let Some(found) = slots.iter_mut().find(|s| **s == slot) else {
                    return false;
                };
                *found = Obscured::NIL;
                true
            }
            Referrers::OutOfLine(table) => {
                let Some(index) = table.find(slot) else {
                    return false;
                };
                table.slots[index] = Obscured::NIL;
                table.len -= 1;
                if probe::under_low_water(table.len, table.capacity(), OUT_OF_LINE_FLOOR) {
                    table.rehash(table.capacity() / 2);
                }
                true
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, slot: Obscured) -> bool {
        match &self.referrers {
            Referrers::Inline(slots) => slots.contains(&slot),
            Referrers::OutOfLine(table) => table.find(slot).is_some(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match &self.referrers {
            Referrers::Inline(slots) => slots.iter().filter(|s| !s.is_nil()).count(),
            Referrers::OutOfLine(table) => table.len,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One-shot traversal over every live slot, in storage order.
    pub(crate) fn iter_slots(&self) -> impl Iterator<Item = Obscured> + '_ {
        let slots: &[Obscured] = match &self.referrers {
            Referrers::Inline(slots) => slots,
            Referrers::OutOfLine(table) => &table.slots,
        };
        slots.iter().copied().filter(|slot| !slot.is_nil())
    }

    #[cfg(test)]
    pub(crate) fn is_out_of_line(&self) -> bool {
        matches!(self.referrers, Referrers::OutOfLine(_))
    }

    #[cfg(test)]
    pub(crate) fn slot_capacity(&self) -> usize {
        match &self.referrers {
            Referrers::Inline(_) => INLINE_CAPACITY,
            Referrers::OutOfLine(table) => table.capacity(),
        }
    }
}

// the out-of-line representation: a power-of-two open-addressed array of
// disguised cell addresses, nil = free
struct SlotTable {
    slots: Box<[Obscured]>,
    len: usize,
    // worst probe distance ever needed by an insert into the current array
    max_displacement: usize,
}

impl SlotTable {
    fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            slots: rust_alloc::vec![Obscured::NIL; capacity].into_boxed_slice(),
            len: 0,
            max_displacement: 0,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    // insert without a membership check; the caller has ruled out duplicates
    fn insert(&mut self, slot: Obscured) {
        let mask = self.mask();
        let mut index = probe::home_index(slot.placement_hash(), mask);
        let mut displacement = 0;
        while !self.slots[index].is_nil() {
            index = (index + 1) & mask;
            displacement += 1;
            debug_assert!(displacement <= mask, "referrer table has no free slot");
        }
        self.slots[index] = slot;
        self.len += 1;
        if displacement > self.max_displacement {
            self.max_displacement = displacement;
        }
    }

    fn find(&self, slot: Obscured) -> Option<usize> {
        let mask = self.mask();
        let mut index = probe::home_index(slot.placement_hash(), mask);
        // removals leave nil holes, not tombstones, so probe past them;
        // the recorded worst displacement bounds the search instead
        for _ in 0..=self.max_displacement {
            if self.slots[index] == slot {
                return Some(index);
            }
            index = (index + 1) & mask;
        }
        None
    }

    fn rehash(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity.is_power_of_two() && new_capacity >= self.len);
        let old = mem::replace(
            &mut self.slots,
            rust_alloc::vec![Obscured::NIL; new_capacity].into_boxed_slice(),
        );
        self.len = 0;
        self.max_displacement = 0;
        for slot in old.iter().copied().filter(|slot| !slot.is_nil()) {
            self.insert(slot);
        }
    }
}
