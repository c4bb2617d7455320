//! Error types for triangulation operations.
//!
//! Two failure classes exist. [`PositionError`] is recoverable: the caller
//! asked for a coordinate the triangulation cannot accept and gets a nearby
//! alternative to retry with. [`TriangulationError`] covers broken internal
//! invariants and stale handles; after one of these the structure can no
//! longer be trusted.

use thiserror::Error;

/// Recoverable rejection of a requested coordinate.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum PositionError {
    /// The coordinate coincides with an existing node. `proposed` is a
    /// nearby position, derived from the local edge lengths, that the caller
    /// may retry with.
    #[error("position coincides with an existing node (suggested retry at {proposed:?})")]
    PositionNotAllowed {
        /// Alternative position to retry with.
        proposed: [f64; 3],
    },
}

impl PositionError {
    /// The suggested alternative position.
    #[must_use]
    pub fn proposed_position(&self) -> [f64; 3] {
        match self {
            Self::PositionNotAllowed { proposed } => *proposed,
        }
    }
}

/// Fatal violation of a structural invariant.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TriangulationError {
    /// A handle refers to an element that has been removed from its arena.
    #[error("stale handle: the referenced element no longer exists")]
    StaleHandle,
    /// An element was expected to be incident to another but is not.
    #[error("{0} is not incident to the given element")]
    NotIncident(&'static str),
    /// A triangle that was expected to have an open side is closed.
    #[error("triangle has no open side")]
    NoOpenSide,
    /// A triangle that was expected to border a tetrahedron is open on both
    /// sides.
    #[error("triangle is open on both sides")]
    TwoOpenSides,
    /// A triangle cannot be oriented towards a point lying in its own plane.
    #[error("cannot orient a triangle towards a point in its plane")]
    PointInPlane,
    /// Two direction vectors spanned a zero normal.
    #[error("degenerate plane: the spanning directions are parallel")]
    DegeneratePlane,
    /// A tetrahedron was expected across a triangle but the slot is empty.
    #[error("expected a tetrahedron on the far side of a triangle")]
    MissingNeighbor,
    /// Cavity filling did not terminate within its iteration budget.
    #[error("cavity fill exceeded {limit} iterations")]
    IterationLimitExceeded {
        /// The budget that was exhausted.
        limit: usize,
    },
    /// The open-triangle bookkeeping finished with unfilled entries.
    #[error("{count} open triangles remained after cavity filling")]
    OpenTrianglesRemaining {
        /// Number of leftover open triangles.
        count: usize,
    },
    /// Inserting a node produced no tetrahedron at all.
    #[error("node insertion produced an empty cavity")]
    EmptyCavity,
    /// A candidate search over the nodes bordering a cavity came up empty.
    #[error("no candidate node found while filling a cavity")]
    NoCandidateNode,
}

/// Umbrella error for the public triangulation API.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SpatialError {
    /// Recoverable coordinate rejection.
    #[error(transparent)]
    Position(#[from] PositionError),
    /// Fatal invariant violation.
    #[error(transparent)]
    Topology(#[from] TriangulationError),
}

impl SpatialError {
    /// If this is a recoverable position rejection, the suggested
    /// alternative coordinate.
    #[must_use]
    pub fn proposed_position(&self) -> Option<[f64; 3]> {
        match self {
            Self::Position(p) => Some(p.proposed_position()),
            Self::Topology(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_error_carries_the_alternative() {
        let err = PositionError::PositionNotAllowed {
            proposed: [1.0, 2.0, 3.0],
        };
        assert_eq!(err.proposed_position(), [1.0, 2.0, 3.0]);
        let umbrella: SpatialError = err.into();
        assert_eq!(umbrella.proposed_position(), Some([1.0, 2.0, 3.0]));
    }

    #[test]
    fn topology_errors_have_no_retry_position() {
        let umbrella: SpatialError = TriangulationError::StaleHandle.into();
        assert_eq!(umbrella.proposed_position(), None);
    }

    #[test]
    fn messages_are_stable() {
        assert_eq!(
            TriangulationError::NoOpenSide.to_string(),
            "triangle has no open side"
        );
        assert_eq!(
            TriangulationError::IterationLimitExceeded { limit: 2000 }.to_string(),
            "cavity fill exceeded 2000 iterations"
        );
    }
}
