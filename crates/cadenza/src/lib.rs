#![forbid(unsafe_code)]

//! Cadenza public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users: the
//! member crates re-exported as modules, plus the common types at the top
//! level.

pub mod prelude {
    pub use cadenza_engine as engine;
    pub use cadenza_events as events;
    pub use cadenza_motion as motion;
    pub use cadenza_scene as scene;
    pub use cadenza_streams as streams;
}

pub use cadenza_engine::{Engine, EngineConfig, FrameClock, Phase, Size};
pub use cadenza_events::{
    Emitter, EventEmitter, EventFilter, EventHandler, EventMapper, EventSource, EventSourceExt,
    EventSplitter,
};
pub use cadenza_motion::{Curve, Easing, MotionError, Transition, Transitionable};
pub use cadenza_scene::{
    CommitSink, Composers, Element, LayoutAttributes, LayoutSpec, Root, SceneNode, SizeAttributes,
    SpecSource, TargetId, TargetPool, Transform,
};
pub use cadenza_streams::{ResizeStream, Stream};
