#![forbid(unsafe_code)]

//! Named-channel event emission and upstream relay subscription.
//!
//! This crate provides the publish/subscribe substrate the rest of cadenza is
//! built on:
//!
//! - [`EventEmitter`]: the named-channel publish primitive. Listeners are
//!   invoked in registration order.
//! - [`EventHandler`]: an emitter plus *upstream subscription*, a node that
//!   can forward events from any number of upstream sources through its own
//!   emitter, including channels it only starts listening to later.
//! - [`EventMapper`] / [`EventFilter`] / [`EventSplitter`]: payload adaptors
//!   that sit between sources and subscribers.
//!
//! # Design
//!
//! All node types are cheaply-cloneable handles over `Rc`-shared interior
//! state; cloning a handle never copies listeners. The subscription seam is
//! the object-safe [`EventSource`] trait, so graph wiring works uniformly
//! across emitters, handlers, adaptors, and the stream/motion nodes built in
//! downstream crates.
//!
//! Relaying is lazy: a handler only attaches itself to an upstream source for
//! channels that have at least one local listener. The per-channel relay
//! closure is created once, memoized, and attached to every upstream source,
//! both the sources known at listener-registration time and any source
//! subscribed afterwards.
//!
//! # Invariants
//!
//! 1. Listeners fire in registration order.
//! 2. Emission iterates a snapshot: a listener added during an emission first
//!    fires on the *next* emission; no in-flight registration is skipped or
//!    double-invoked when the listener list is mutated mid-emission.
//! 3. A relay closure is created at most once per (node, channel).
//! 4. `subscribe` is idempotent per source; `unsubscribe` of an unknown
//!    source is a no-op.
//! 5. Emitting on a channel with no listeners is a no-op.
//! 6. Upstream sources are attached and detached in subscription order.

use std::sync::atomic::{AtomicU64, Ordering};

mod adapt;
mod emitter;
mod handler;

pub use adapt::{EventFilter, EventMapper, EventSplitter};
pub use emitter::EventEmitter;
pub use handler::EventHandler;

use std::rc::Rc;

/// Channel carrying the initial value of a change sequence.
pub const START: &str = "start";
/// Channel carrying intermediate values of a change sequence.
pub const UPDATE: &str = "update";
/// Channel carrying the final value of a change sequence.
pub const END: &str = "end";
/// Channel carrying size changes; coalesced rather than deduplicated.
pub const RESIZE: &str = "resize";

/// Shared listener callback type.
pub type Callback<T> = Rc<dyn Fn(&T)>;

// ─── Identity ────────────────────────────────────────────────────────────────

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_source_id() -> SourceId {
    SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
}

/// Identity of an event node, used for idempotent subscribe/unsubscribe.
///
/// Every emitter-backed node gets a unique id at construction; cloned handles
/// share it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// Token identifying one listener registration on one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// ─── Capability traits ───────────────────────────────────────────────────────

/// The publish capability: push a payload to every listener of a channel.
pub trait Emitter<T> {
    /// Invoke all current listeners of `channel`, in registration order.
    fn emit(&self, channel: &str, payload: &T);
}

/// The subscription capability: anything listeners can be attached to.
///
/// Object-safe so subscribers can hold heterogeneous sources behind
/// `Rc<dyn EventSource<T>>`. Prefer the [`EventSourceExt::on`] convenience
/// over calling [`add_listener`](EventSource::add_listener) directly.
pub trait EventSource<T> {
    /// Stable identity of the underlying node.
    fn source_id(&self) -> SourceId;

    /// Register `callback` on `channel`. Returns a token for removal.
    fn add_listener(&self, channel: &str, callback: Callback<T>) -> ListenerId;

    /// Remove a previous registration. Unknown tokens are ignored.
    fn remove_listener(&self, channel: &str, id: ListenerId);
}

/// Ergonomic extensions available on every [`EventSource`].
pub trait EventSourceExt<T>: EventSource<T> {
    /// Register a listener closure on `channel`.
    fn on(&self, channel: &str, f: impl Fn(&T) + 'static) -> ListenerId {
        self.add_listener(channel, Rc::new(f))
    }

    /// Remove a listener previously registered with [`on`](EventSourceExt::on).
    fn off(&self, channel: &str, id: ListenerId) {
        self.remove_listener(channel, id);
    }
}

impl<T, S: EventSource<T> + ?Sized> EventSourceExt<T> for S {}
