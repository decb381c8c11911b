//! DelaunayError: Unified error type for parallel-delaunay public APIs
//!
//! Every fallible operation of the crate (geometry engine, placement, exchange,
//! consolidation, communication) reports through this one enum so that callers can
//! propagate with `?` across layers.

use thiserror::Error;

use crate::leaf::LeafId;

/// Unified error type for parallel-delaunay operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DelaunayError {
    /// Only 2D and 3D triangulations are supported.
    #[error("unsupported dimension {0} (expected 2 or 3)")]
    InvalidDimension(usize),
    /// Ranks disagree about the dimensionality of the run.
    #[error("inconsistent dimension across ranks: local {local}, min {min}, max {max}")]
    InconsistentDimension { local: usize, min: usize, max: usize },
    /// Domain bounds are malformed (wrong length, empty or inverted extent).
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    /// The decomposition produced fewer leaves than there are ranks.
    #[error("decomposition produced {leaves} leaves for {ranks} ranks")]
    TooFewLeaves { leaves: usize, ranks: usize },
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Coordinate and id arrays do not describe the same number of points.
    #[error("point arrays disagree: {coords} coordinates, {ids} ids, ndim {ndim}")]
    PointCountMismatch { coords: usize, ids: usize, ndim: usize },
    /// A coordinate is NaN or infinite.
    #[error("non-finite coordinate for point with info {info}")]
    NonFinitePoint { info: u64 },
    /// A point coincides exactly with an existing vertex.
    #[error("duplicate point with info {info}")]
    DuplicatePoint { info: u64 },
    /// The engine found no cell in conflict with a new point.
    #[error("degenerate insertion of point with info {info}")]
    DegenerateInsertion { info: u64 },
    /// `init_triangulation` was called on a leaf that already has one.
    #[error("leaf {0} already has a triangulation")]
    TriangulationAlreadyInitialized(LeafId),
    /// An operation needs the local triangulation before it exists.
    #[error("leaf {0} has no triangulation yet")]
    TriangulationNotInitialized(LeafId),
    /// Serialized cell/neighbor arrays are inconsistent.
    #[error("invalid serialized triangulation: {0}")]
    InvalidSerialization(String),

    /// A batch references a leaf that is not owned by this rank.
    #[error("protocol violation: leaf {0} is not owned by this rank")]
    UnknownLeaf(LeafId),
    /// Collective participants disagree about message layout.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Point-to-point or collective communication failed.
    #[error("communication error with rank {peer}: {reason}")]
    Comm { peer: usize, reason: String },
    /// A wire buffer could not be decoded.
    #[error("wire decode error: {0}")]
    WireDecode(String),
    /// `max_exchange_rounds` was reached before the exchange converged.
    #[error("exchange did not converge after {rounds} rounds")]
    NotConverged { rounds: usize },

    /// MPI could not be initialized (already initialized or unavailable).
    #[error("MPI runtime unavailable")]
    MpiUnavailable,
}

impl DelaunayError {
    /// Shorthand for a [`DelaunayError::Comm`] with a formatted reason.
    pub fn comm(peer: usize, reason: impl Into<String>) -> Self {
        DelaunayError::Comm {
            peer,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_error_carries_reason_as_text() {
        let err = DelaunayError::comm(3, "mailbox closed");
        assert_eq!(err.to_string(), "communication error with rank 3: mailbox closed");
        assert!(std::error::Error::source(&err).is_none());
        assert!(matches!(err, DelaunayError::Comm { peer: 3, ref reason } if reason == "mailbox closed"));
    }
}
