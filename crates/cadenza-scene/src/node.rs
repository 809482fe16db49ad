#![forbid(unsafe_code)]

//! Tree nodes, lifecycle propagation, and the root.

use std::cell::RefCell;
use std::rc::Rc;

use cadenza_engine::{Engine, Size};
use cadenza_events::{
    Emitter, END, EventHandler, EventSource, EventSourceExt, RESIZE, START, UPDATE,
};
use cadenza_streams::{ResizeStream, Stream};

use crate::element::{Element, TargetPool};
use crate::spec::{Composers, LayoutAttributes, LayoutSpec, SizeAttributes};

/// Channel announcing that the ancestor chain reached a root. Carries
/// [`Lifecycle::Mount`].
pub const MOUNT: &str = "mount";
/// Channel announcing that the ancestor chain left its root.
pub const UNMOUNT: &str = "unmount";
/// Channel announcing a subtree attachment below this node.
pub const ATTACH: &str = "attach";
/// Channel announcing this node's detachment from its parent.
pub const DETACH: &str = "detach";

/// Payload of the lifecycle channels.
#[derive(Clone)]
pub enum Lifecycle {
    /// The chain reached a root; carries the root's services.
    Mount(RootHandle),
    /// The chain left its root.
    Unmount,
    /// A subtree was attached.
    Attach,
    /// This subtree was detached.
    Detach,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mount(_) => f.write_str("Mount"),
            Self::Unmount => f.write_str("Unmount"),
            Self::Attach => f.write_str("Attach"),
            Self::Detach => f.write_str("Detach"),
        }
    }
}

/// Services a mounted subtree inherits from its root.
#[derive(Clone)]
pub struct RootHandle {
    pool: Rc<dyn TargetPool>,
}

impl RootHandle {
    pub(crate) fn new(pool: Rc<dyn TargetPool>) -> Self {
        Self { pool }
    }

    /// The target pool elements borrow from while mounted.
    #[must_use]
    pub fn pool(&self) -> &Rc<dyn TargetPool> {
        &self.pool
    }
}

impl std::fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootHandle")
    }
}

#[derive(Clone, Default)]
struct CachedSpec {
    layout: Option<LayoutSpec>,
    size: Option<Size>,
}

struct NodeInner {
    engine: Engine,
    composers: Composers,
    /// Parent-facing inputs; cut on detach.
    layout_in: EventHandler<LayoutSpec>,
    size_in: EventHandler<Size>,
    logic: EventHandler<Lifecycle>,
    /// Child-facing resolved streams.
    layout_out: EventHandler<LayoutSpec>,
    size_out: EventHandler<Size>,
    /// Last resolved state, replayed on (re-)attachment.
    cached: RefCell<CachedSpec>,
    root: RefCell<Option<RootHandle>>,
}

/// A node in the composition tree.
///
/// Children do not live in a list; they subscribe to the parent's resolved
/// streams, so "the tree" is the subscription graph. Removal tears the
/// node's input subscriptions down while the cached resolved state survives
/// for re-attachment.
pub struct SceneNode {
    inner: Rc<NodeInner>,
}

impl Clone for SceneNode {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for SceneNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.inner.cached.borrow();
        f.debug_struct("SceneNode")
            .field("mounted", &self.inner.root.borrow().is_some())
            .field("cached_layout", &cached.layout.is_some())
            .field("cached_size", &cached.size.is_some())
            .finish()
    }
}

impl SceneNode {
    fn bare(engine: &Engine, composers: Composers) -> Self {
        let node = Self {
            inner: Rc::new(NodeInner {
                engine: engine.clone(),
                composers,
                layout_in: EventHandler::new(),
                size_in: EventHandler::new(),
                logic: EventHandler::new(),
                layout_out: EventHandler::new(),
                size_out: EventHandler::new(),
                cached: RefCell::new(CachedSpec::default()),
                root: RefCell::new(None),
            }),
        };

        // Keep the cache current with whatever the resolved streams carry.
        for channel in [START, UPDATE, END] {
            let weak = Rc::downgrade(&node.inner);
            node.inner.layout_out.on(channel, move |spec: &LayoutSpec| {
                if let Some(inner) = weak.upgrade() {
                    inner.cached.borrow_mut().layout = Some(*spec);
                }
            });
        }
        {
            let weak = Rc::downgrade(&node.inner);
            node.inner.size_out.on(RESIZE, move |size: &Size| {
                if let Some(inner) = weak.upgrade() {
                    inner.cached.borrow_mut().size = Some(*size);
                }
            });
        }

        // Track the root as mount/unmount notices pass through.
        {
            let weak = Rc::downgrade(&node.inner);
            node.inner.logic.on(MOUNT, move |event: &Lifecycle| {
                if let (Some(inner), Lifecycle::Mount(root)) = (weak.upgrade(), event) {
                    *inner.root.borrow_mut() = Some(root.clone());
                }
            });
        }
        {
            let weak = Rc::downgrade(&node.inner);
            node.inner.logic.on(UNMOUNT, move |_: &Lifecycle| {
                if let Some(inner) = weak.upgrade() {
                    *inner.root.borrow_mut() = None;
                }
            });
        }

        node
    }

    /// A node that forwards its parent's resolved state unchanged.
    #[must_use]
    pub fn plain(engine: &Engine, composers: &Composers) -> Self {
        let node = Self::bare(engine, composers.clone());
        node.inner.layout_out.subscribe(&node.inner.layout_in);
        node.inner.size_out.subscribe(&node.inner.size_in);
        node
    }

    /// A node contributing layout attributes: its resolved layout is
    /// `composers.layout(attrs, parent layout, size)`; size passes through.
    #[must_use]
    pub fn with_layout<S>(engine: &Engine, composers: &Composers, attrs: &S) -> Self
    where
        S: EventSource<LayoutAttributes>,
    {
        let node = Self::bare(engine, composers.clone());
        let compose = Rc::clone(&node.inner.composers.layout);
        let resolved = Stream::lift3(
            engine,
            move |attrs: &LayoutAttributes, parent: &LayoutSpec, size: &Size| {
                (*compose)(attrs, parent, size)
            },
            attrs,
            &node.inner.layout_in,
            &node.inner.size_in,
        );
        node.inner.layout_out.subscribe(&resolved);
        node.inner.size_out.subscribe(&node.inner.size_in);
        node
    }

    /// A node contributing size attributes: its resolved size is
    /// `composers.size(attrs, parent size)`; layout passes through.
    #[must_use]
    pub fn with_size<S>(engine: &Engine, composers: &Composers, attrs: &S) -> Self
    where
        S: EventSource<SizeAttributes>,
    {
        let node = Self::bare(engine, composers.clone());
        let compose = Rc::clone(&node.inner.composers.size);
        let resolved = ResizeStream::lift2(
            engine,
            move |attrs: &SizeAttributes, parent: &Size| (*compose)(attrs, parent),
            attrs,
            &node.inner.size_in,
        );
        node.inner.size_out.subscribe(&resolved);
        node.inner.layout_out.subscribe(&node.inner.layout_in);
        node
    }

    /// The resolved layout stream children and observers subscribe to.
    #[must_use]
    pub fn layout(&self) -> EventHandler<LayoutSpec> {
        self.inner.layout_out.clone()
    }

    /// The resolved size stream children and observers subscribe to.
    #[must_use]
    pub fn size(&self) -> EventHandler<Size> {
        self.inner.size_out.clone()
    }

    /// Last resolved layout, surviving detachment.
    #[must_use]
    pub fn cached_layout(&self) -> Option<LayoutSpec> {
        self.inner.cached.borrow().layout
    }

    /// Last resolved size, surviving detachment.
    #[must_use]
    pub fn cached_size(&self) -> Option<Size> {
        self.inner.cached.borrow().size
    }

    /// Whether the ancestor chain currently reaches a root.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.root.borrow().is_some()
    }

    /// Attach a pre-built subtree below this node.
    ///
    /// The child's inputs subscribe to this node's resolved streams; if this
    /// node is mounted and the child is not, a mount notice flows down. The
    /// cached resolved state is replayed through the normal channels next
    /// pre-tick, so the newcomer does not wait for the next upstream event.
    pub fn add(&self, child: &SceneNode) -> SceneNode {
        self.replay_cached();

        child.inner.layout_in.subscribe(&self.inner.layout_out);
        child.inner.size_in.subscribe(&self.inner.size_out);
        child.inner.logic.subscribe(&self.inner.logic);

        let root = self.inner.root.borrow().clone();
        if let Some(root) = root {
            if child.inner.root.borrow().is_none() {
                child.inner.logic.emit(MOUNT, &Lifecycle::Mount(root));
            }
        }
        self.inner.logic.emit(ATTACH, &Lifecycle::Attach);
        child.clone()
    }

    /// Create and attach a layout-contributing child.
    pub fn add_layout<S>(&self, attrs: &S) -> SceneNode
    where
        S: EventSource<LayoutAttributes>,
    {
        let child = Self::with_layout(&self.inner.engine, &self.inner.composers, attrs);
        self.add(&child)
    }

    /// Create and attach a size-contributing child.
    pub fn add_size<S>(&self, attrs: &S) -> SceneNode
    where
        S: EventSource<SizeAttributes>,
    {
        let child = Self::with_size(&self.inner.engine, &self.inner.composers, attrs);
        self.add(&child)
    }

    /// Bind a leaf element below this node.
    pub fn add_element(&self, element: &Element) {
        self.replay_cached();

        element.size_in().subscribe(&self.inner.size_out);
        element.layout_in().subscribe(&self.inner.layout_out);
        element.lifecycle().subscribe(&self.inner.logic);

        let root = self.inner.root.borrow().clone();
        if let Some(root) = root {
            element.lifecycle().emit(MOUNT, &Lifecycle::Mount(root));
        }
        self.inner.logic.emit(ATTACH, &Lifecycle::Attach);
    }

    /// Detach this subtree: a detach/unmount pair flows down, then every
    /// input subscription is torn down. The resolved-state cache survives
    /// for a later [`add`](SceneNode::add).
    pub fn remove(&self) {
        self.inner.logic.emit(DETACH, &Lifecycle::Detach);
        self.inner.logic.emit(UNMOUNT, &Lifecycle::Unmount);
        self.inner.layout_in.unsubscribe_all();
        self.inner.size_in.unsubscribe_all();
        self.inner.logic.unsubscribe_all();
        tracing::debug!("scene node detached");
    }

    /// Re-announce the cached resolved state next pre-tick, bracketed with
    /// an end notice in the dirty phase.
    fn replay_cached(&self) {
        let weak = Rc::downgrade(&self.inner);
        let engine = self.inner.engine.clone();
        self.inner.engine.push_pre_tick(move || {
            let Some(inner) = weak.upgrade() else { return };
            let cached = inner.cached.borrow().clone();
            if let Some(size) = cached.size {
                inner.size_out.emit(RESIZE, &size);
            }
            if let Some(layout) = cached.layout {
                inner.layout_out.emit(START, &layout);
                let weak = weak.clone();
                engine.push_dirty(move || {
                    let Some(inner) = weak.upgrade() else { return };
                    let layout = inner.cached.borrow().layout;
                    if let Some(layout) = layout {
                        inner.layout_out.emit(END, &layout);
                    }
                });
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// The top of a composition tree.
///
/// Construction registers engine interest, mounts the tree, subscribes the
/// root size to the engine's resize boundary, and seeds the baseline layout
/// every descendant composes against. Dropping the root unmounts the tree
/// and releases the interest registration.
pub struct Root {
    node: SceneNode,
    handle: RootHandle,
    engine: Engine,
}

impl Root {
    /// Create a mounted root using the given composition functions and
    /// target pool.
    #[must_use]
    pub fn new(engine: &Engine, composers: Composers, pool: Rc<dyn TargetPool>) -> Self {
        let node = SceneNode::plain(engine, &composers);
        let handle = RootHandle::new(pool);

        node.inner.size_in.subscribe(&engine.resizes());

        // Baseline resolved layout for the whole tree.
        {
            let seed = node.clone();
            let dirty_engine = engine.clone();
            engine.push_pre_tick(move || {
                let base = LayoutSpec::default();
                seed.inner.layout_in.emit(START, &base);
                let seed = seed.clone();
                dirty_engine.push_dirty(move || {
                    seed.inner.layout_in.emit(END, &LayoutSpec::default());
                });
            });
        }

        node.inner
            .logic
            .emit(MOUNT, &Lifecycle::Mount(handle.clone()));
        engine.register_root();
        tracing::debug!("root mounted");

        Self {
            node,
            handle,
            engine: engine.clone(),
        }
    }

    /// The tree node to build under.
    #[must_use]
    pub fn node(&self) -> &SceneNode {
        &self.node
    }

    /// The services handle descendants receive on mount.
    #[must_use]
    pub fn handle(&self) -> &RootHandle {
        &self.handle
    }

    /// Feed the root size directly (the engine resize boundary does the same
    /// through its own channel).
    pub fn resize(&self, size: Size) {
        self.node.inner.size_in.emit(RESIZE, &size);
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        self.node.remove();
        self.engine.deregister_root();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::TargetId;
    use crate::source::SpecSource;
    use std::cell::Cell;

    struct NullPool;

    impl TargetPool for NullPool {
        fn acquire(&self, _kind: &str) -> TargetId {
            TargetId(0)
        }

        fn release(&self, _kind: &str, _target: TargetId) {}
    }

    fn multiplicative() -> Composers {
        Composers::new(
            |attrs, parent, _size| LayoutSpec {
                transform: attrs.transform.unwrap_or(parent.transform),
                opacity: parent.opacity * attrs.opacity.unwrap_or(1.0),
                origin: attrs.origin.unwrap_or(parent.origin),
            },
            |attrs, parent| match (attrs.size, attrs.proportions) {
                (Some(size), _) => size,
                (None, Some(p)) => [parent[0] * p[0], parent[1] * p[1]],
                (None, None) => *parent,
            },
        )
    }

    fn mounted_root(engine: &Engine) -> Root {
        let root = Root::new(engine, multiplicative(), Rc::new(NullPool));
        root.resize([800.0, 600.0]);
        root
    }

    #[test]
    fn resolved_opacity_composes_down_the_chain() {
        let engine = Engine::new();
        let root = mounted_root(&engine);

        let half = SpecSource::with_value(&engine, LayoutAttributes::opacity(0.5));
        let node = root.node().add_layout(&half);

        let seen = Rc::new(Cell::new(0.0f64));
        let sink = Rc::clone(&seen);
        node.layout().on(UPDATE, move |spec: &LayoutSpec| sink.set(spec.opacity));

        engine.step_nominal();
        assert_eq!(seen.get(), 0.5);
        assert_eq!(node.cached_layout().unwrap().opacity, 0.5);
    }

    #[test]
    fn size_node_scales_parent_size() {
        let engine = Engine::new();
        let root = mounted_root(&engine);

        let attrs = SpecSource::with_value(&engine, SizeAttributes::proportional([0.5, 0.25]));
        let node = root.node().add_size(&attrs);

        engine.step_nominal();
        assert_eq!(node.cached_size(), Some([400.0, 150.0]));
    }

    #[test]
    fn mount_propagates_to_descendants() {
        let engine = Engine::new();
        let root = mounted_root(&engine);

        let attrs = SpecSource::with_value(&engine, LayoutAttributes::opacity(0.9));
        let child = root.node().add_layout(&attrs);
        let grandchild = child.add(&SceneNode::plain(&engine, &multiplicative()));

        assert!(child.is_mounted());
        assert!(grandchild.is_mounted());
    }

    #[test]
    fn remove_unmounts_subtree_and_stops_emissions() {
        let engine = Engine::new();
        let root = mounted_root(&engine);

        let attrs = SpecSource::with_value(&engine, LayoutAttributes::opacity(0.5));
        let node = root.node().add_layout(&attrs);
        engine.step_nominal();
        assert!(node.is_mounted());

        node.remove();
        assert!(!node.is_mounted());

        // Upstream changes no longer reach the detached subtree.
        let updates = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&updates);
        node.layout().on(UPDATE, move |_: &LayoutSpec| sink.set(sink.get() + 1));
        root.resize([100.0, 100.0]);
        engine.step_nominal();
        assert_eq!(updates.get(), 0, "a detached node must not emit resolved state");
        assert!(node.cached_layout().is_some(), "cache survives detachment");
    }

    #[test]
    fn readd_replays_cached_state_to_newly_attached_child() {
        let engine = Engine::new();
        let root = mounted_root(&engine);

        let attrs = SpecSource::with_value(&engine, LayoutAttributes::opacity(0.5));
        let node = root.node().add_layout(&attrs);
        engine.step_nominal();
        node.remove();

        // Re-attach, then hang a fresh child below the re-added node. The
        // child sees the cached resolved spec without the ancestor chain
        // re-emitting anything.
        root.node().add(&node);
        let child = node.add(&SceneNode::plain(&engine, &multiplicative()));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        child.layout().on(START, move |spec: &LayoutSpec| {
            sink.borrow_mut().push(spec.opacity);
        });

        engine.step_nominal();
        assert!(
            seen.borrow().contains(&0.5),
            "cached spec is replayed to late subscribers, got {:?}",
            seen.borrow()
        );
        assert!(node.is_mounted());
    }

    #[test]
    fn attach_notice_fires_on_add() {
        let engine = Engine::new();
        let root = mounted_root(&engine);

        let attaches = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&attaches);
        root.node()
            .inner
            .logic
            .on(ATTACH, move |_: &Lifecycle| sink.set(sink.get() + 1));

        let attrs = SpecSource::with_value(&engine, LayoutAttributes::opacity(0.5));
        let _child = root.node().add_layout(&attrs);
        assert_eq!(attaches.get(), 1);
    }

    #[test]
    fn dropping_root_releases_engine_interest() {
        let engine = Engine::new();
        {
            let _root = mounted_root(&engine);
            assert!(engine.is_active());
            // Drain the setup jobs so queue emptiness is not what keeps the
            // engine active.
            engine.step_nominal();
            assert!(engine.is_active());
        }
        assert!(!engine.is_active());
    }
}
