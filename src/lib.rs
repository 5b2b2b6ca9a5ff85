//! A registry that keeps weak references honest.
//!
//! For every object with at least one weak reference pointing at it, the
//! [`WeakTable`] records the address of every storage cell currently holding
//! such a reference. When the object is reclaimed, [`WeakTable::clear`] nils
//! all of those cells in one pass so no stale pointer can ever be
//! dereferenced.
//!
//! The table performs no locking of its own. Every operation expects the
//! caller to already hold whatever lock serializes access to the table,
//! which Rust expresses directly through the `&mut self` receivers: the
//! exclusive borrow is the critical section.

#![no_std]

extern crate alloc as rust_alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod obscure;
pub mod registry;

pub(crate) mod probe;

pub use obscure::{Obscured, WeakCell};
pub use registry::WeakTable;
