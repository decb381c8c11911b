//! Distributed algorithms: communication, placement, exchange and
//! consolidation.

pub mod communicator;
pub mod consolidate;
pub mod exchange;
pub mod placement;
pub mod wire;
