//! Geometry utilities: axis-aligned boxes, domains and the small dense
//! predicates used by the local triangulation engine.

pub mod bbox;
pub mod predicates;

pub use bbox::{BoundingBox, Domain};
