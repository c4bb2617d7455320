//! The incremental triangulation data structure.

pub mod edge;
pub mod node;
pub(crate) mod organizer;
pub mod tetrahedron;
pub mod triangle;
pub mod triangulation;

pub use edge::Edge;
pub use node::{MovementListener, SpaceNode};
pub use tetrahedron::Tetrahedron;
pub use triangle::Triangle;
pub use triangulation::{
    EdgeKey, InstrumentationHooks, NodeKey, TetKey, TriKey, Triangulation,
};
