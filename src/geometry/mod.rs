//! Geometric primitives: inexact vectors, exact rational fallbacks and
//! tolerance-window planes.

pub mod exact;
pub mod plane;
pub mod vector;

pub use exact::ExactVector;
pub use plane::Plane;
