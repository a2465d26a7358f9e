//! Process-shared memory primitives.
//!
//! This crate provides the low-level building blocks for data structures
//! that live in memory shared between processes:
//!
//! - [`SharedArena`]: an anonymous `MAP_SHARED` mapping, inherited by child
//!   processes across `fork()`.
//! - [`Region`]: an offset-addressed view over raw memory. All shared
//!   structures are addressed by byte offset from the region base, never by
//!   absolute pointer, so the same structure is valid in every process that
//!   maps it.
//! - [`RawSpinLock`]: a word-sized spinlock that works from any process
//!   mapping the word, with no per-process initialization.
//!
//! Nothing in this crate knows about the loader built on top of it.

pub mod arena;
pub mod region;
pub mod spinlock;

pub use arena::SharedArena;
pub use region::Region;
pub use spinlock::{RawSpinLock, SpinGuard};
