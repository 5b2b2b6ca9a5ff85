//! The weak-reference registry.
//!
//! One long-lived [`WeakTable`] per runtime domain, owned by the
//! object-lifetime subsystem. The table maps each weakly referenced object
//! to the set of storage cells holding a weak reference to it, so that
//! [`WeakTable::clear`] can nil every one of those cells the moment the
//! object starts being reclaimed.
//!
//! The table is open addressed with linear probing, keyed by the disguised
//! referent address, and grows past 3/4 occupancy / shrinks below 1/4
//! occupancy down to a fixed floor. Entries are whole referrer sets, so
//! there are two nested levels of open addressing: referent to set here,
//! and slot placement inside each out-of-line set.

use core::iter;
use core::ptr::NonNull;

use hashbrown::HashSet;
use rustc_hash::FxBuildHasher;

use crate::obscure::{Obscured, WeakCell};
use crate::probe;

pub(crate) mod referrers;


use referrers::ReferrerSet;

// the table never shrinks below this many entry slots while in use
const MIN_CAPACITY: usize = 64;

/// Registry of every storage location holding a weak reference, keyed by
/// the referenced object.
///
/// The table does no locking: all operations take `&mut self` and expect
/// the caller to serialize every call touching the same referent behind
/// one lock. In particular [`clear`] must never race `register` or
/// `unregister` for the same referent; the deallocating marker exists to
/// fault on violations of that ordering instead of corrupting memory.
///
/// [`clear`]: WeakTable::clear
pub struct WeakTable {
    // open-addressed entry array, None = free slot
    entries: rust_alloc::boxed::Box<[Option<ReferrerSet>]>,
    num_entries: usize,
    // worst probe distance ever needed by an insert into the current array
    max_displacement: usize,
    // referents currently undergoing reclamation, installed by the
    // object-lifetime subsystem around its dealloc path
    deallocating: HashSet<usize, FxBuildHasher>,
}

impl WeakTable {
    pub fn new() -> Self {
        Self {
            entries: empty_entries(MIN_CAPACITY),
            num_entries: 0,
            max_displacement: 0,
            deallocating: HashSet::with_hasher(FxBuildHasher),
        }
    }

    /// Registers `slot` as a weak reference to `referent`, then writes the
    /// referent's disguised address into the cell. This is the only
    /// operation that stores a non-nil value into caller-owned memory.
    ///
    /// Returns the referent on success. If `referent` is currently marked
    /// deallocating and `crash_if_deallocating` is false, returns `None`
    /// and registers nothing; the caller treats that as having observed a
    /// nil weak reference.
    ///
    /// Registering the same `(referent, slot)` pair twice is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `referent` is null (registering a weak reference to
    /// nothing is a programming error), or if `referent` is marked
    /// deallocating and `crash_if_deallocating` is true.
    ///
    /// # Safety
    ///
    /// `slot` must point to a live [`WeakCell`] that remains valid until
    /// it is unregistered or the referent is cleared.
    pub unsafe fn register(
        &mut self,
        referent: *const (),
        slot: NonNull<WeakCell>,
        crash_if_deallocating: bool,
    ) -> Option<NonNull<()>> {
        assert!(
            !referent.is_null(),
            "cannot register a weak reference to nothing"
        );
        if self.deallocating.contains(&(referent as usize)) {
            if crash_if_deallocating {
                panic!("cannot form weak reference to {referent:p}: object is being deallocated");
            }
            return None;
        }

        let referent_obs = Obscured::encode(referent);
        let slot_obs = Obscured::encode(slot.as_ptr().cast::<()>());
        match self.find_index(referent_obs) {
            Some(index) => {
                if let Some(entry) = self.entries[index].as_mut() {
                    entry.add_slot(slot_obs);
                }
            }
            None => {
                if probe::over_high_water(self.num_entries, self.capacity()) {
                    self.resize(self.capacity() * 2);
                }
                self.insert_entry(ReferrerSet::new(referent_obs, slot_obs));
            }
        }

        // SAFETY: the caller guarantees the cell is live
        unsafe { slot.as_ref() }.store(referent_obs);
        // SAFETY: asserted non-null above
        Some(unsafe { NonNull::new_unchecked(referent.cast_mut()) })
    }

    /// Removes the `(referent, slot)` pair from the registry. Bookkeeping
    /// only: the cell's contents are left alone.
    ///
    /// A null `referent`, a referent with no entry, or a slot that was
    /// never registered are all quiet no-ops.
    pub fn unregister(&mut self, referent: *const (), slot: NonNull<WeakCell>) {
        if referent.is_null() {
            return;
        }
        let referent_obs = Obscured::encode(referent);
        let Some(index) = self.find_index(referent_obs) else {
            return;
        };
        let emptied = match self.entries[index].as_mut() {
            Some(entry) => {
                entry.remove_slot(Obscured::encode(slot.as_ptr().cast::<()>()));
                entry.is_empty()
            }
            None => false,
        };
        // an entry that loses its last referrer leaves the table entirely
        if emptied {
            self.entries[index] = None;
            self.num_entries -= 1;
            self.maybe_shrink();
        }
    }

    /// Nils out every weak reference to `referent` and drops its entry.
    ///
    /// The object-lifetime subsystem calls this exactly once as `referent`
    /// begins reclamation, before its memory is reused and before the
    /// deallocating marker comes off. A referent with no entry is a no-op.
    ///
    /// # Safety
    ///
    /// Every cell still registered for `referent` must be live; the
    /// registry writes [`Obscured::NIL`] into each one.
    pub unsafe fn clear(&mut self, referent: NonNull<()>) {
        let referent_obs = Obscured::encode(referent.as_ptr());
        let Some(index) = self.find_index(referent_obs) else {
            // no weak references were ever taken, or all unregistered already
            return;
        };
        if let Some(entry) = self.entries[index].take() {
            self.num_entries -= 1;
            for slot in entry.iter_slots() {
                // SAFETY: the caller guarantees registered cells outlive
                // their registration
                let cell = unsafe { &*slot.decode().cast_const().cast::<WeakCell>() };
                // a registered cell must still hold this referent; anything
                // else means a store bypassed the registry
                debug_assert!(
                    cell.value() == referent_obs,
                    "weak cell out of sync with registry"
                );
                cell.store(Obscured::NIL);
            }
        }
        self.maybe_shrink();
    }

    /// Whether any weak reference to `referent` is currently registered.
    /// Diagnostic; an occupied entry always has at least one referrer.
    pub fn is_registered(&self, referent: *const ()) -> bool {
        !referent.is_null() && self.find_index(Obscured::encode(referent)).is_some()
    }

    /// How many storage locations currently hold a weak reference to
    /// `referent`. Diagnostic.
    pub fn referrer_count(&self, referent: *const ()) -> usize {
        if referent.is_null() {
            return 0;
        }
        self.find_index(Obscured::encode(referent))
            .and_then(|index| self.entries[index].as_ref())
            .map_or(0, ReferrerSet::len)
    }

    /// Number of referents with at least one registered weak reference.
    pub fn len(&self) -> usize {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Marks `referent` as undergoing reclamation. The object-lifetime
    /// subsystem installs this just before its dealloc path can run
    /// concurrently with new registrations, and removes it with
    /// [`unmark_deallocating`] only after [`clear`] has finished.
    ///
    /// [`unmark_deallocating`]: WeakTable::unmark_deallocating
    /// [`clear`]: WeakTable::clear
    pub fn mark_deallocating(&mut self, referent: NonNull<()>) {
        self.deallocating.insert(referent.as_ptr() as usize);
    }

    pub fn unmark_deallocating(&mut self, referent: NonNull<()>) {
        self.deallocating.remove(&(referent.as_ptr() as usize));
    }

    pub fn is_deallocating(&self, referent: NonNull<()>) -> bool {
        self.deallocating.contains(&(referent.as_ptr() as usize))
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.entries.len() - 1
    }

    // locate the entry slot holding `referent`, bounded by the worst probe
    // displacement ever recorded; holes don't stop the scan
    fn find_index(&self, referent: Obscured) -> Option<usize> {
        let mask = self.mask();
        let mut index = probe::home_index(referent.placement_hash(), mask);
        for _ in 0..=self.max_displacement {
            if let Some(entry) = &self.entries[index] {
                if entry.referent() == referent {
                    return Some(index);
                }
            }
            index = (index + 1) & mask;
        }
        None
    }

    // place an entry whose referent is known to be absent
    fn insert_entry(&mut self, entry: ReferrerSet) {
        let mask = self.mask();
        let mut index = probe::home_index(entry.referent().placement_hash(), mask);
        let mut displacement = 0;
        while self.entries[index].is_some() {
            index = (index + 1) & mask;
            displacement += 1;
            // the growth policy keeps free slots available; wrapping the
            // whole array means the table is corrupted
            assert!(
                displacement <= mask,
                "weak table corrupted: no free entry slot"
            );
        }
        self.entries[index] = Some(entry);
        self.num_entries += 1;
        if displacement > self.max_displacement {
            self.max_displacement = displacement;
        }
    }

    fn maybe_shrink(&mut self) {
        if probe::under_low_water(self.num_entries, self.capacity(), MIN_CAPACITY) {
            self.resize(self.capacity() / 2);
        }
    }

    // full rehash; max_displacement is recomputed from scratch
    fn resize(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity.is_power_of_two() && new_capacity >= self.num_entries);
        let old = core::mem::replace(&mut self.entries, empty_entries(new_capacity));
        self.num_entries = 0;
        self.max_displacement = 0;
        for entry in old.into_vec().into_iter().flatten() {
            self.insert_entry(entry);
        }
    }
}

impl Default for WeakTable {
    fn default() -> Self {
        Self::new()
    }
}

fn empty_entries(capacity: usize) -> rust_alloc::boxed::Box<[Option<ReferrerSet>]> {
    iter::repeat_with(|| None).take(capacity).collect()
}
