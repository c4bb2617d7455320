//! Incremental three-dimensional Delaunay triangulation with mobile nodes.
//!
//! The triangulation is built by inserting nodes one at a time and stays
//! Delaunay while nodes move around and disappear again. Nodes carry a
//! user payload, the convex hull is closed by tetrahedra bordering a
//! virtual point at infinity, and every geometric predicate falls back to
//! exact rational arithmetic when floating point cannot decide safely.
//!
//! # Example
//!
//! ```
//! use dynamic_delaunay::prelude::*;
//!
//! let mut triangulation: Triangulation<&str> = Triangulation::with_seed(42);
//! triangulation.create_node([0.0, 0.0, 0.0], "a")?;
//! triangulation.create_node([4.0, 0.0, 0.0], "b")?;
//! triangulation.create_node([0.0, 4.0, 0.0], "c")?;
//! triangulation.create_node([0.0, 0.0, 4.0], "d")?;
//! assert_eq!(triangulation.finite_tetrahedron_count(), 1);
//!
//! // A node inside the tetrahedron splits it four ways.
//! let center = triangulation.create_node([0.5, 0.5, 0.5], "center")?;
//! assert_eq!(triangulation.finite_tetrahedron_count(), 4);
//!
//! // Moving it keeps the structure Delaunay.
//! triangulation.move_node_to(center, [0.6, 0.5, 0.4])?;
//! assert!(triangulation.is_delaunay()?);
//! # Ok::<(), dynamic_delaunay::error::SpatialError>(())
//! ```

pub mod core;
pub mod error;
pub mod geometry;

/// Commonly used types, re-exported for glob import.
pub mod prelude {
    pub use crate::core::{
        EdgeKey, InstrumentationHooks, MovementListener, NodeKey, SpaceNode, TetKey, TriKey,
        Triangulation,
    };
    pub use crate::error::{PositionError, SpatialError, TriangulationError};
    pub use crate::geometry::{ExactVector, Plane};
}
