#![forbid(unsafe_code)]

//! Resolved and partial state payloads, and the injected composition seams.

use std::rc::Rc;

pub use cadenza_engine::Size;

/// Opaque column-major 4×4 transform payload.
///
/// This crate only constructs the identity and simple translations; every
/// composition formula is supplied by the embedder through [`Composers`].
#[derive(Clone, Copy, PartialEq)]
pub struct Transform(pub [f64; 16]);

impl Transform {
    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        let mut matrix = [0.0; 16];
        matrix[0] = 1.0;
        matrix[5] = 1.0;
        matrix[10] = 1.0;
        matrix[15] = 1.0;
        Self(matrix)
    }

    /// A translation by `(x, y, z)`.
    #[must_use]
    pub fn translate(x: f64, y: f64, z: f64) -> Self {
        let mut transform = Self::identity();
        transform.0[12] = x;
        transform.0[13] = y;
        transform.0[14] = z;
        transform
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transform(t=[{}, {}, {}])",
            self.0[12], self.0[13], self.0[14]
        )
    }
}

/// A fully composed, ancestor-inclusive state snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayoutSpec {
    /// Accumulated transform.
    pub transform: Transform,
    /// Accumulated opacity.
    pub opacity: f64,
    /// Alignment origin in [0, 1] coordinates.
    pub origin: [f64; 2],
}

impl Default for LayoutSpec {
    fn default() -> Self {
        Self {
            transform: Transform::identity(),
            opacity: 1.0,
            origin: [0.0, 0.0],
        }
    }
}

/// A node's own partial layout contribution. Unset fields inherit.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LayoutAttributes {
    /// Local transform, composed with the parent's.
    pub transform: Option<Transform>,
    /// Local opacity, composed with the parent's.
    pub opacity: Option<f64>,
    /// Local alignment origin.
    pub origin: Option<[f64; 2]>,
}

impl LayoutAttributes {
    /// An opacity-only contribution.
    #[must_use]
    pub fn opacity(opacity: f64) -> Self {
        Self {
            opacity: Some(opacity),
            ..Self::default()
        }
    }

    /// A transform-only contribution.
    #[must_use]
    pub fn transform(transform: Transform) -> Self {
        Self {
            transform: Some(transform),
            ..Self::default()
        }
    }
}

/// A node's own partial size contribution. Unset fields inherit.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SizeAttributes {
    /// Absolute size.
    pub size: Option<Size>,
    /// Fraction of the parent size, per axis.
    pub proportions: Option<[f64; 2]>,
    /// Pixels subtracted from the parent size, per axis.
    pub margins: Option<[f64; 2]>,
}

impl SizeAttributes {
    /// An absolute-size contribution.
    #[must_use]
    pub fn fixed(size: Size) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    /// A proportional contribution.
    #[must_use]
    pub fn proportional(proportions: [f64; 2]) -> Self {
        Self {
            proportions: Some(proportions),
            ..Self::default()
        }
    }
}

/// Composes a node's layout attributes with the parent's resolved spec and
/// the node's current size.
pub type LayoutCompose = Rc<dyn Fn(&LayoutAttributes, &LayoutSpec, &Size) -> LayoutSpec>;

/// Composes a node's size attributes with the parent's resolved size.
pub type SizeCompose = Rc<dyn Fn(&SizeAttributes, &Size) -> Size>;

/// The externally-supplied, order-sensitive composition functions: the only
/// place domain-specific layout logic lives. Injected once at root
/// construction and inherited by every node.
#[derive(Clone)]
pub struct Composers {
    /// Layout composition (`child attributes ⊕ parent spec`).
    pub layout: LayoutCompose,
    /// Size composition (`child attributes ⊕ parent size`).
    pub size: SizeCompose,
}

impl Composers {
    /// Bundle the two composition functions.
    pub fn new(
        layout: impl Fn(&LayoutAttributes, &LayoutSpec, &Size) -> LayoutSpec + 'static,
        size: impl Fn(&SizeAttributes, &Size) -> Size + 'static,
    ) -> Self {
        Self {
            layout: Rc::new(layout),
            size: Rc::new(size),
        }
    }
}

impl std::fmt::Debug for Composers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Composers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_transform_diagonal() {
        let id = Transform::identity();
        assert_eq!(id.0[0], 1.0);
        assert_eq!(id.0[5], 1.0);
        assert_eq!(id.0[10], 1.0);
        assert_eq!(id.0[15], 1.0);
        assert_eq!(id, Transform::default());
    }

    #[test]
    fn translate_writes_last_column() {
        let t = Transform::translate(3.0, -2.0, 1.0);
        assert_eq!(t.0[12], 3.0);
        assert_eq!(t.0[13], -2.0);
        assert_eq!(t.0[14], 1.0);
    }

    #[test]
    fn default_spec_is_opaque_identity() {
        let spec = LayoutSpec::default();
        assert_eq!(spec.opacity, 1.0);
        assert_eq!(spec.transform, Transform::identity());
    }
}
