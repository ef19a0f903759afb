// Core modules for strip-pattern toolpath generation over curved surfaces
pub mod geometry;
pub mod curve;
pub mod surface;
pub mod grid;
pub mod skeleton;
pub mod pattern;
pub mod stack;
pub mod fillet;
pub mod obstacle;

// Re-export commonly used types
pub use geometry::{OrientationFrame, Point3D, Vector3D};
pub use curve::Curve;
pub use surface::{ControlGridSurface, Surface};
pub use grid::{AnchorGrid, AnchorPoint, GridIndex, TraversalNode, Turning};
pub use skeleton::{EdgeSide, Skeleton, SkeletonStrategy};
pub use pattern::{PatternKind, ToolpathPattern};
pub use stack::{LayerToolpath, OrientationMode, StackConfig, StackKind, StackPatterns, ToolpathStack};
pub use fillet::{fillet_curve, fillet_stack, FilletConfig};
pub use obstacle::{avoid_obstacles, AvoidanceOutcome};

/// Main result type for the toolpath generator
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the toolpath generator
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Anchor grid has no populated cells")]
    EmptyGrid,

    #[error("Strip width {strip_width} too narrow for path width {path_width} (needs at least 6x)")]
    StripTooNarrow { strip_width: f64, path_width: f64 },

    #[error("Path width {path_width} is not smaller than ring length {ring_length}")]
    PathWiderThanRing { path_width: f64, ring_length: f64 },

    #[error("Degenerate curve: {0}")]
    DegenerateCurve(String),

    #[error("Surface projection failed: {0}")]
    ProjectionFailed(String),

    #[error("Control grid dimensions do not match: {a_u}x{a_v} vs {b_u}x{b_v}")]
    DimensionMismatch {
        a_u: usize,
        a_v: usize,
        b_u: usize,
        b_v: usize,
    },
}
