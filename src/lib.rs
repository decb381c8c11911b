#![cfg_attr(docsrs, feature(doc_cfg))]
//! # parallel-delaunay
//!
//! parallel-delaunay computes the Delaunay triangulation of a point set split
//! into spatial leaves that live on cooperating processes. Each leaf
//! triangulates its own points, the leaves then trade the boundary points
//! their neighbors need until no leaf receives anything new, and finally the
//! per-leaf triangulations are merged into one duplicate-free global mesh.
//!
//! ## Features
//! - 2D and 3D, with periodic axes handled by shifting ghost coordinates
//! - Pluggable communication backends (serial, threaded, MPI) behind one
//!   [`Communicator`](crate::algs::communicator::Communicator) trait
//! - Incremental batches inserted into the existing decomposition
//! - A serial reference path ([`triangulate_serial`](crate::triangulation::triangulate_serial))
//!   producing the same consolidated form
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! parallel-delaunay = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ```
//! use parallel_delaunay::prelude::*;
//!
//! let domain = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
//! let mut pd = ParallelDelaunay::new(&NoComm, domain, DelaunayConfig::default()).unwrap();
//! let tri = pd
//!     .triangulate(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0])
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(tri.num_finite_cells(), 2);
//! ```
//!
//! ## Determinism
//!
//! Leaf ids follow the depth-first order of the decomposition, leaves are
//! owned by rank `id % size`, batches travel in leaf order and the merge runs
//! in leaf-id order, so a run with the same inputs and rank count yields the
//! same consolidated arrays.

pub mod algs;
pub mod config;
pub mod debug_invariants;
pub mod decomposition;
pub mod delaunay_error;
pub mod geometry;
pub mod leaf;
pub mod parallel;
pub mod triangulation;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::consolidate::{ConsolidatedTriangulation, SerializedLeaf};
    pub use crate::algs::exchange::{ExchangeReport, RoundReport};
    pub use crate::config::DelaunayConfig;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::decomposition::KdDecomposition;
    pub use crate::delaunay_error::DelaunayError;
    pub use crate::geometry::{BoundingBox, Domain};
    pub use crate::leaf::{Leaf, LeafId, LeafSet, LeafSnapshot};
    pub use crate::parallel::{InsertReport, ParallelDelaunay};
    pub use crate::triangulation::{INFINITE_VERTEX, LocalTriangulation, triangulate_serial};
}
