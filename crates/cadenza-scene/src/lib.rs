#![forbid(unsafe_code)]

//! The composition tree: accumulated, inherited visual state.
//!
//! A [`SceneNode`] composes streams: children subscribe to the parent's
//! *resolved* layout and size streams, combine them with their own partial
//! attributes through externally-supplied composition functions
//! ([`Composers`]), and expose the result as their own resolved streams. The
//! tree therefore recomputes lazily and top-down: a change near the root
//! flows to exactly the leaves below it, once per step.
//!
//! Nodes can be detached and re-attached at any time. A node caches its last
//! resolved state; on re-attachment the cache is replayed through the normal
//! emission channels, so late subscribers see the most recent value without
//! the ancestor chain re-emitting.
//!
//! Leaves are [`Element`]s: they borrow an opaque target from an external
//! [`TargetPool`] while mounted and push changed attributes to a
//! [`CommitSink`] at most once per changed attribute per frame.
//!
//! # Invariants
//!
//! 1. A node's resolved state is only valid downstream of a fully resolved
//!    ancestor chain to a [`Root`]; a detached node does not emit resolved
//!    state but keeps its cache.
//! 2. `"mount"`/`"unmount"` lifecycle notices follow the ancestor chain
//!    reaching/leaving a root.
//! 3. Composition functions are the only place domain-specific layout logic
//!    lives; this crate treats them as opaque.

mod element;
mod node;
mod source;
mod spec;

pub use element::{CommitSink, DirtyAttrs, Element, TargetId, TargetPool};
pub use node::{
    ATTACH, DETACH, Lifecycle, MOUNT, Root, RootHandle, SceneNode, UNMOUNT,
};
pub use source::SpecSource;
pub use spec::{
    Composers, LayoutAttributes, LayoutSpec, Size, SizeAttributes, Transform,
};
