#![forbid(unsafe_code)]

//! Leaf elements: dirty-flag-gated commits against an external surface.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use cadenza_engine::{Engine, Size};
use cadenza_events::{END, EventHandler, EventSourceExt, RESIZE, START, UPDATE};

use crate::node::{Lifecycle, MOUNT, RootHandle, UNMOUNT};
use crate::spec::{LayoutSpec, Transform};

/// Opaque handle to an externally pooled render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

/// External pool of render targets keyed by a type tag.
///
/// The core never constructs or destroys the underlying resource; it only
/// borrows targets while an element is mounted.
pub trait TargetPool {
    /// Borrow a target of the given kind.
    fn acquire(&self, kind: &str) -> TargetId;
    /// Return a previously acquired target for reuse.
    fn release(&self, kind: &str, target: TargetId);
}

/// External renderer for resolved state.
///
/// Called at most once per changed attribute per frame, never
/// unconditionally every frame.
pub trait CommitSink {
    /// Apply an accumulated transform.
    fn commit_transform(&self, target: TargetId, transform: &Transform);
    /// Apply an accumulated opacity.
    fn commit_opacity(&self, target: TargetId, opacity: f64);
    /// Apply an alignment origin.
    fn commit_origin(&self, target: TargetId, origin: [f64; 2]);
    /// Apply a resolved size.
    fn commit_size(&self, target: TargetId, size: Size);
}

bitflags! {
    /// Which attributes changed since the last commit.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DirtyAttrs: u8 {
        const TRANSFORM = 1;
        const OPACITY = 1 << 1;
        const ORIGIN = 1 << 2;
        const SIZE = 1 << 3;
    }
}

struct ElementState {
    target: Option<TargetId>,
    root: Option<RootHandle>,
    spec: Option<LayoutSpec>,
    size: Option<Size>,
    dirty: DirtyAttrs,
    commit_queued: bool,
}

struct ElementInner {
    engine: Engine,
    kind: String,
    sink: Rc<dyn CommitSink>,
    layout_in: EventHandler<LayoutSpec>,
    size_in: EventHandler<Size>,
    lifecycle: EventHandler<Lifecycle>,
    state: RefCell<ElementState>,
}

/// A tree leaf bound to a physical surface.
///
/// While mounted the element holds a target borrowed from the root's
/// [`TargetPool`]. Incoming resolved state sets per-attribute dirty bits and
/// queues one commit job per step (post-tick); the commit pushes each dirty
/// attribute to the [`CommitSink`] once and clears the bits. Unmounting
/// releases the target in the dirty phase, after every consumer of the frame
/// has run.
pub struct Element {
    inner: Rc<ElementInner>,
}

impl Clone for Element {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Element")
            .field("kind", &self.inner.kind)
            .field("target", &state.target)
            .field("dirty", &state.dirty)
            .finish()
    }
}

impl Element {
    /// Create an unmounted element of the given target kind.
    #[must_use]
    pub fn new(engine: &Engine, kind: impl Into<String>, sink: Rc<dyn CommitSink>) -> Self {
        let element = Self {
            inner: Rc::new(ElementInner {
                engine: engine.clone(),
                kind: kind.into(),
                sink,
                layout_in: EventHandler::new(),
                size_in: EventHandler::new(),
                lifecycle: EventHandler::new(),
                state: RefCell::new(ElementState {
                    target: None,
                    root: None,
                    spec: None,
                    size: None,
                    dirty: DirtyAttrs::empty(),
                    commit_queued: false,
                }),
            }),
        };
        element.wire();
        element
    }

    /// The borrowed target while mounted.
    #[must_use]
    pub fn target(&self) -> Option<TargetId> {
        self.inner.state.borrow().target
    }

    /// Whether the element currently sits under a mounted root.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.state.borrow().root.is_some()
    }

    pub(crate) fn layout_in(&self) -> &EventHandler<LayoutSpec> {
        &self.inner.layout_in
    }

    pub(crate) fn size_in(&self) -> &EventHandler<Size> {
        &self.inner.size_in
    }

    pub(crate) fn lifecycle(&self) -> &EventHandler<Lifecycle> {
        &self.inner.lifecycle
    }

    fn wire(&self) {
        for channel in [START, UPDATE, END] {
            let weak = Rc::downgrade(&self.inner);
            self.inner.layout_in.on(channel, move |spec: &LayoutSpec| {
                if let Some(inner) = weak.upgrade() {
                    Element { inner }.apply_layout(spec);
                }
            });
        }
        {
            let weak = Rc::downgrade(&self.inner);
            self.inner.size_in.on(RESIZE, move |size: &Size| {
                if let Some(inner) = weak.upgrade() {
                    Element { inner }.apply_size(*size);
                }
            });
        }
        {
            let weak = Rc::downgrade(&self.inner);
            self.inner.lifecycle.on(MOUNT, move |event: &Lifecycle| {
                if let (Some(inner), Lifecycle::Mount(root)) = (weak.upgrade(), event) {
                    Element { inner }.mount(root.clone());
                }
            });
        }
        {
            let weak = Rc::downgrade(&self.inner);
            self.inner.lifecycle.on(UNMOUNT, move |_: &Lifecycle| {
                if let Some(inner) = weak.upgrade() {
                    Element { inner }.unmount();
                }
            });
        }
    }

    fn mount(&self, root: RootHandle) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.target.is_none() {
                let target = root.pool().acquire(&self.inner.kind);
                state.target = Some(target);
                // Fresh target: everything known must be pushed.
                state.dirty = DirtyAttrs::all();
            }
            state.root = Some(root);
        }
        tracing::debug!(kind = %self.inner.kind, "element mounted");
        self.queue_commit();
    }

    fn unmount(&self) {
        let released = {
            let mut state = self.inner.state.borrow_mut();
            let root = state.root.take();
            state.target.take().zip(root)
        };
        if let Some((target, root)) = released {
            // Deferred to the dirty phase: the surface may still be read by
            // consumers reacting to this frame.
            let kind = self.inner.kind.clone();
            self.inner.engine.push_dirty(move || {
                root.pool().release(&kind, target);
            });
            tracing::debug!(kind = %self.inner.kind, "element unmounted");
        }
    }

    fn apply_layout(&self, new: &LayoutSpec) {
        {
            let mut state = self.inner.state.borrow_mut();
            let mut dirty = DirtyAttrs::empty();
            match &state.spec {
                Some(old) => {
                    if old.transform != new.transform {
                        dirty |= DirtyAttrs::TRANSFORM;
                    }
                    if old.opacity != new.opacity {
                        dirty |= DirtyAttrs::OPACITY;
                    }
                    if old.origin != new.origin {
                        dirty |= DirtyAttrs::ORIGIN;
                    }
                }
                None => {
                    dirty = DirtyAttrs::TRANSFORM | DirtyAttrs::OPACITY | DirtyAttrs::ORIGIN;
                }
            }
            state.spec = Some(*new);
            if dirty.is_empty() {
                return;
            }
            state.dirty |= dirty;
        }
        self.queue_commit();
    }

    fn apply_size(&self, new: Size) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.size == Some(new) {
                return;
            }
            state.size = Some(new);
            state.dirty |= DirtyAttrs::SIZE;
        }
        self.queue_commit();
    }

    fn queue_commit(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.commit_queued {
                return;
            }
            state.commit_queued = true;
        }
        let weak = Rc::downgrade(&self.inner);
        self.inner.engine.push_post_tick(move || {
            if let Some(inner) = weak.upgrade() {
                Element { inner }.commit();
            }
        });
    }

    /// Push every dirty attribute to the sink once, then clear the bits.
    fn commit(&self) {
        let (target, spec, size, dirty) = {
            let mut state = self.inner.state.borrow_mut();
            state.commit_queued = false;
            let Some(target) = state.target else {
                // Unmounted: keep the dirty bits for the next mount.
                return;
            };
            let snapshot = (target, state.spec, state.size, state.dirty);
            state.dirty = DirtyAttrs::empty();
            snapshot
        };

        if let Some(spec) = spec {
            if dirty.contains(DirtyAttrs::TRANSFORM) {
                self.inner.sink.commit_transform(target, &spec.transform);
            }
            if dirty.contains(DirtyAttrs::OPACITY) {
                self.inner.sink.commit_opacity(target, spec.opacity);
            }
            if dirty.contains(DirtyAttrs::ORIGIN) {
                self.inner.sink.commit_origin(target, spec.origin);
            }
        }
        if let (Some(size), true) = (size, dirty.contains(DirtyAttrs::SIZE)) {
            self.inner.sink.commit_size(target, size);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
